#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;
    use wright_config::WrightConfig;
    use wright_core::{EventKind, Role, WrightError};
    use wright_llm::{MockProvider, MockResponse, ModelRouter};
    use wright_runtime::{AgentRuntime, EvictionPolicy, RunRequest, SessionStatus, SessionStore};
    use wright_tools::{BuiltinOptions, ToolRegistry, register_builtins};

    fn runtime(mock: Arc<MockProvider>) -> (AgentRuntime, TempDir) {
        let mut config = WrightConfig::default();
        config.agent.model = "mock/test-model".into();
        config.agent.stream = false;
        config.review.model = Some("mock/test-model".into());
        config.retry.backoff_base_ms = 1;
        config.retry.backoff_max_ms = 5;

        let mut router = ModelRouter::new().with_retry_policy(0, Duration::from_millis(1));
        router.add_provider(mock);
        let mut tools = ToolRegistry::new();
        register_builtins(&mut tools, &BuiltinOptions::default()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let runtime = AgentRuntime::from_config(&config, router, tools, dir.path()).unwrap();
        (runtime, dir)
    }

    // ── Store ──────────────────────────────────────────────────

    #[test]
    fn test_expired_sessions_are_evicted() {
        let store = SessionStore::new(EvictionPolicy {
            idle_ttl: Duration::ZERO,
            max_sessions: 16,
        });
        store.get_or_create("s1", "p1");
        store.get_or_create("s2", "p1");

        let mut evicted = store.evict_idle();
        evicted.sort();
        assert_eq!(evicted, vec!["s1", "s2"]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_least_recently_used_evicted_over_capacity() {
        let store = SessionStore::new(EvictionPolicy {
            idle_ttl: Duration::from_secs(3600),
            max_sessions: 2,
        });
        store.get_or_create("a", "p1");
        std::thread::sleep(Duration::from_millis(5));
        store.get_or_create("b", "p1");
        std::thread::sleep(Duration::from_millis(5));
        store.get_or_create("c", "p1");
        std::thread::sleep(Duration::from_millis(5));
        // Touching "a" makes "b" the oldest.
        store.get_or_create("a", "p1");

        assert_eq!(store.evict_idle(), vec!["b"]);
        assert_eq!(store.len(), 2);
        assert!(store.evict_idle().is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_evicts_until_shutdown() {
        let store = Arc::new(SessionStore::new(EvictionPolicy {
            idle_ttl: Duration::ZERO,
            max_sessions: 16,
        }));
        let shutdown = CancellationToken::new();
        let handle = store.spawn_sweeper(Duration::from_millis(10), shutdown.clone());

        store.get_or_create("s1", "p1");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.is_empty());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    // ── Runtime ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_unknown_session_queries_fail() {
        let (runtime, _dir) = runtime(Arc::new(MockProvider::new("mock")));
        assert!(runtime.session("nope").is_none());
        assert!(matches!(runtime.tasks("nope"), Err(WrightError::SessionNotFound(id)) if id == "nope"));
        assert!(runtime.history("nope").is_err());
        assert!(runtime.events("nope", 0).is_err());
        assert!(!runtime.cancel("nope"));
    }

    #[tokio::test]
    async fn test_session_is_bound_to_its_project() {
        let mock = Arc::new(MockProvider::new("mock").with_fallback(MockResponse::text("ok")));
        let (runtime, _dir) = runtime(mock);
        runtime.run("s1", "p1", "hello").await.unwrap();

        let err = runtime.run("s1", "p2", "hello").await.unwrap_err();
        assert!(matches!(err, WrightError::ProjectMismatch { .. }));
        assert_eq!(runtime.history("s1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_completed_session_accepts_another_run() {
        let mock = Arc::new(
            MockProvider::new("mock")
                .with_tool_call("create_tasks", json!({"tasks": ["first"]}))
                .with_tool_call("final_response", json!({"message": "first done"}))
                .with_tool_call("final_response", json!({"message": "second done"})),
        );
        let (runtime, _dir) = runtime(Arc::clone(&mock));

        let first = runtime.run("s1", "p1", "one").await.unwrap();
        assert!(first.is_complete());
        let second = runtime.run("s1", "p1", "two").await.unwrap();
        assert!(second.is_complete());
        assert_eq!(second.message.as_deref(), Some("second done"));

        let snapshot = runtime.session("s1").unwrap();
        assert_eq!(snapshot.status, SessionStatus::Complete);
        // Tasks carry over between runs of the same session.
        assert_eq!(snapshot.tasks.len(), 1);
        let completes = runtime
            .events("s1", 0)
            .unwrap()
            .iter()
            .filter(|e| e.kind == EventKind::Complete)
            .count();
        assert_eq!(completes, 2);

        // The second run sees the first one's conversation.
        let last_request = mock.recorded_requests().pop().unwrap();
        assert!(last_request.messages.iter().any(|m| m.text_content() == "first done"));
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let mock = Arc::new(MockProvider::new("mock").with_fallback(MockResponse::text("ok")));
        let (runtime, _dir) = runtime(mock);

        let (a, b) = tokio::join!(runtime.run("a", "p1", "hello a"), runtime.run("b", "p2", "hello b"));
        assert!(a.unwrap().is_complete());
        assert!(b.unwrap().is_complete());

        let history_a = runtime.history("a").unwrap();
        let history_b = runtime.history("b").unwrap();
        assert_eq!(history_a.len(), 2);
        assert_eq!(history_b.len(), 2);
        assert_eq!(history_a[0].text_content(), "hello a");
        assert_eq!(history_b[0].text_content(), "hello b");
        assert_eq!(runtime.store().len(), 2);
    }

    #[tokio::test]
    async fn test_runs_of_one_session_are_serialized() {
        let mock = Arc::new(MockProvider::new("mock").with_fallback(MockResponse::text("ok")));
        let (runtime, _dir) = runtime(mock);

        let (x, y) = tokio::join!(runtime.run("s1", "p1", "first"), runtime.run("s1", "p1", "second"));
        assert!(x.unwrap().is_complete());
        assert!(y.unwrap().is_complete());

        let roles: Vec<Role> = runtime.history("s1").unwrap().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn test_cancel_by_session_id() {
        let mock = Arc::new(
            MockProvider::new("mock")
                .with_tool_call("run_command", json!({"command": "sleep 10"}))
                .with_response("unused"),
        );
        let (runtime, dir) = runtime(mock);
        let runtime = Arc::new(runtime);
        std::fs::create_dir_all(dir.path().join("p1")).unwrap();

        let background = Arc::clone(&runtime);
        let handle = tokio::spawn(async move { background.run("s1", "p1", "build").await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(runtime.session("s1").unwrap().status.is_active());
        assert!(runtime.cancel("s1"));

        let outcome = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(outcome.error.as_deref(), Some("cancelled"));
        assert_eq!(runtime.session("s1").unwrap().status, SessionStatus::Idle);
    }

    #[tokio::test]
    async fn test_event_subscription_sees_live_events() {
        let mock = Arc::new(MockProvider::new("mock").with_response("ok"));
        let (runtime, dir) = runtime(mock);
        runtime.store().get_or_create("s1", "p1");
        let mut rx = runtime.subscribe_events("s1").unwrap();

        runtime
            .run_with(RunRequest::new("s1", "p1", dir.path(), "hi"))
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind);
        }
        assert_eq!(kinds.first(), Some(&EventKind::Message));
        assert_eq!(kinds.last(), Some(&EventKind::Complete));
        assert_eq!(kinds.len(), runtime.events("s1", 0).unwrap().len());
    }

    #[tokio::test]
    async fn test_deltas_stream_while_generating() {
        let mock = Arc::new(MockProvider::new("mock").with_response("hello there world"));
        let mut config = WrightConfig::default();
        config.agent.model = "mock/test-model".into();
        config.agent.stream = true;
        let mut router = ModelRouter::new();
        router.add_provider(mock);
        let dir = tempfile::tempdir().unwrap();
        let runtime = AgentRuntime::from_config(&config, router, ToolRegistry::new(), dir.path()).unwrap();
        let mut deltas = runtime.subscribe_deltas();

        let outcome = runtime.run("s1", "p1", "greet").await.unwrap();
        assert_eq!(outcome.message.as_deref(), Some("hello there world"));

        let mut received = 0;
        while deltas.try_recv().is_ok() {
            received += 1;
        }
        assert!(received >= 3);
    }
}
