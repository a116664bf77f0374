#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;
    use wright_core::{AgentEvent, EventKind, Message, MessageContent, Role, ToolCall, ToolContext, ToolSpec, WrightError};
    use wright_llm::{AdapterSettings, MockProvider, MockResponse, ModelRouter, ProviderAdapter};
    use wright_runtime::{
        AgentRuntime, EngineConfig, OrchestrationEngine, ReviewSettings, ReviewSubroutine, RunOutcome, RunRequest,
        SessionStatus, SessionStore, TaskStatus,
    };
    use wright_tools::{BuiltinOptions, ToolExecutor, ToolRegistry, register_builtins};

    // ── Harness ────────────────────────────────────────────────

    struct Harness {
        runtime: AgentRuntime,
        mock: Arc<MockProvider>,
        dir: TempDir,
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn adapter(mock: Arc<MockProvider>, stream: bool) -> Arc<ProviderAdapter> {
        let mut router = ModelRouter::new().with_retry_policy(0, Duration::from_millis(1));
        router.add_provider(mock);
        Arc::new(ProviderAdapter::new(
            router,
            AdapterSettings {
                model: "mock/test-model".into(),
                stream,
                ..Default::default()
            },
        ))
    }

    fn builtin_tools() -> ToolRegistry {
        let mut tools = ToolRegistry::new();
        register_builtins(&mut tools, &BuiltinOptions::default()).unwrap();
        tools
    }

    fn engine(mock: Arc<MockProvider>, config: EngineConfig, stream: bool) -> OrchestrationEngine {
        let adapter = adapter(mock, stream);
        let review = ReviewSubroutine::new(
            Arc::clone(&adapter),
            ReviewSettings {
                enabled: true,
                model: "mock/test-model".into(),
                max_files: 4,
                max_file_bytes: 4096,
                max_tokens: 512,
            },
        );
        OrchestrationEngine::new(adapter, Arc::new(builtin_tools()), review, config).unwrap()
    }

    fn harness_with(mock: MockProvider, config: EngineConfig, stream: bool) -> Harness {
        let mock = Arc::new(mock);
        let dir = tempfile::tempdir().unwrap();
        let runtime = AgentRuntime::new(
            engine(Arc::clone(&mock), config, stream),
            SessionStore::default(),
            dir.path(),
        );
        Harness { runtime, mock, dir }
    }

    fn harness(mock: MockProvider) -> Harness {
        harness_with(mock, fast_config(), false)
    }

    impl Harness {
        fn request(&self, message: &str) -> RunRequest {
            RunRequest::new("s1", "p1", self.dir.path(), message)
        }

        async fn run(&self, message: &str) -> RunOutcome {
            self.runtime.run_with(self.request(message)).await.unwrap()
        }

        fn history(&self) -> Vec<Message> {
            self.runtime.history("s1").unwrap()
        }

        fn events(&self) -> Vec<AgentEvent> {
            self.runtime.events("s1", 0).unwrap()
        }

        fn events_of(&self, kind: EventKind) -> Vec<AgentEvent> {
            self.events().into_iter().filter(|e| e.kind == kind).collect()
        }

        /// The `tool_result` event for a call id.
        fn result_event(&self, call_id: &str) -> Value {
            self.events_of(EventKind::ToolResult)
                .into_iter()
                .find(|e| e.data["id"] == call_id)
                .map(|e| e.data)
                .unwrap_or_else(|| panic!("no tool_result event for {call_id}"))
        }
    }

    /// (call id, content, is_error) of every tool-role message.
    fn tool_messages(history: &[Message]) -> Vec<(String, String, bool)> {
        history
            .iter()
            .filter(|m| m.role == Role::Tool)
            .flat_map(|m| {
                m.content.iter().filter_map(|c| match c {
                    MessageContent::ToolResult {
                        tool_call_id,
                        content,
                        is_error,
                    } => Some((tool_call_id.clone(), content.clone(), *is_error)),
                    _ => None,
                })
            })
            .collect()
    }

    /// Every assistant turn with k calls is followed by exactly k tool
    /// messages carrying the call ids in issuance order.
    fn assert_one_result_per_call(history: &[Message]) {
        for (i, msg) in history.iter().enumerate() {
            if msg.role != Role::Assistant || msg.tool_calls.is_empty() {
                continue;
            }
            let k = msg.tool_calls.len();
            let following = &history[i + 1..];
            assert!(following.len() >= k, "turn at {i} is missing results");
            for (call, result) in msg.tool_calls.iter().zip(following) {
                assert_eq!(result.role, Role::Tool);
                assert_eq!(result.tool_call_id(), Some(call.id.as_str()));
            }
            if let Some(next) = following.get(k) {
                assert_ne!(next.role, Role::Tool, "extra tool message after turn at {i}");
            }
        }
    }

    // ── One result per call ────────────────────────────────────

    #[tokio::test]
    async fn test_k_calls_yield_k_results_in_issuance_order() {
        let h = harness(
            MockProvider::new("mock")
                .with_tool_calls(vec![
                    ("read_file", json!({"path": "missing.txt"})),
                    ("list_files", json!({})),
                    ("teleport", json!({})),
                ])
                .with_tool_call("final_response", json!({"message": "done"})),
        );
        std::fs::write(h.dir.path().join("schema.sql"), "create table x();").unwrap();

        let outcome = h.run("inspect the project").await;
        assert!(outcome.is_complete());

        let history = h.history();
        assert_one_result_per_call(&history);
        let ids: Vec<_> = tool_messages(&history).into_iter().map(|(id, _, _)| id).collect();
        assert_eq!(ids, vec!["call_1", "call_2", "call_3", "call_4"]);
    }

    #[tokio::test]
    async fn test_mixed_turn_keeps_order_with_parallel_and_sequential_calls() {
        let h = harness(
            MockProvider::new("mock")
                .with_tool_calls(vec![
                    ("create_tasks", json!({"tasks": ["write schema"]})),
                    ("list_files", json!({})),
                    ("read_file", json!({"path": "a.txt"})),
                    ("write_file", json!({"path": "schema.sql", "content": "create table x();"})),
                    ("read_file", json!({"path": "schema.sql"})),
                    ("update_task", json!({"id": "task_1", "status": "completed"})),
                ])
                .with_tool_call("final_response", json!({"message": "done"})),
        );
        std::fs::write(h.dir.path().join("a.txt"), "hello").unwrap();

        h.run("add a schema").await;
        let history = h.history();
        assert_one_result_per_call(&history);

        let results = tool_messages(&history);
        assert_eq!(results.len(), 7);
        // The read after the write sees the written file.
        assert!(results[4].1.contains("create table x();"));
        assert!(!results[4].2);
    }

    #[tokio::test]
    async fn test_sequential_mode_produces_the_same_messages() {
        let config = EngineConfig {
            parallel_tool_calls: false,
            ..fast_config()
        };
        let h = harness_with(
            MockProvider::new("mock")
                .with_tool_calls(vec![("list_files", json!({})), ("list_files", json!({"path": "."}))])
                .with_response("nothing to do"),
            config,
            false,
        );
        h.run("look around").await;
        assert_one_result_per_call(&h.history());
        assert_eq!(tool_messages(&h.history()).len(), 2);
    }

    // ── Tasks ──────────────────────────────────────────────────

    #[tokio::test]
    async fn test_create_tasks_returns_pending_tasks_in_input_order() {
        let h = harness(
            MockProvider::new("mock")
                .with_tool_call("create_tasks", json!({"tasks": ["a", "b"]}))
                .with_tool_call("final_response", json!({"message": "planned"})),
        );
        h.run("plan it").await;

        let tasks = h.runtime.tasks("s1").unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].content, "a");
        assert_eq!(tasks[1].content, "b");
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Pending));
        assert_eq!(h.events_of(EventKind::TaskUpdate).len(), 2);
    }

    #[tokio::test]
    async fn test_update_task_is_idempotent() {
        let update = json!({"id": "task_1", "status": "completed", "result": "schema written"});
        let h = harness(
            MockProvider::new("mock")
                .with_tool_call("create_tasks", json!({"tasks": ["design schema"]}))
                .with_tool_call("update_task", update.clone())
                .with_tool_call("update_task", update)
                .with_tool_call("final_response", json!({"message": "done"})),
        );
        h.run("design it").await;

        let updates: Vec<Value> = h
            .events_of(EventKind::TaskUpdate)
            .into_iter()
            .filter(|e| e.data["action"] == "updated")
            .map(|e| e.data["task"].clone())
            .collect();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0], updates[1]);

        let task = &h.runtime.tasks("s1").unwrap()[0];
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result.as_deref(), Some("schema written"));
        assert_eq!(serde_json::to_value(task).unwrap(), updates[1]);
    }

    #[tokio::test]
    async fn test_update_of_unknown_task_is_reported() {
        let h = harness(
            MockProvider::new("mock")
                .with_tool_call("update_task", json!({"id": "task_42", "status": "completed"}))
                .with_tool_call("final_response", json!({"message": "done"})),
        );
        let outcome = h.run("go").await;
        assert!(outcome.is_complete());

        let event = h.result_event("call_1");
        assert_eq!(event["success"], false);
        assert_eq!(event["error"], "task not found: task_42");
        assert!(h.runtime.tasks("s1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_control_arguments_do_not_abort() {
        let h = harness(
            MockProvider::new("mock")
                .with_tool_calls(vec![
                    ("create_tasks", json!({"tasks": "not a list"})),
                    ("final_response", json!({})),
                ])
                .with_tool_call("final_response", json!({"message": "recovered"})),
        );
        let outcome = h.run("go").await;
        assert_eq!(outcome.message.as_deref(), Some("recovered"));
        assert!(
            h.result_event("call_1")["error"]
                .as_str()
                .unwrap()
                .starts_with("invalid arguments for create_tasks")
        );
        assert_eq!(h.result_event("call_2")["success"], false);
    }

    // ── Iteration cap ──────────────────────────────────────────

    #[tokio::test]
    async fn test_max_iterations_stops_after_exactly_one_iteration() {
        let config = EngineConfig {
            max_iterations: 1,
            ..fast_config()
        };
        let h = harness_with(
            MockProvider::new("mock").with_fallback(MockResponse::tool_calls(vec![ToolCall {
                id: "again".into(),
                tool_name: "list_files".into(),
                arguments: json!({}),
            }])),
            config,
            false,
        );

        let outcome = h.run("never stop").await;
        assert_eq!(outcome.status, SessionStatus::Idle);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.error.as_deref(), Some("maximum iterations reached"));
        assert_eq!(h.mock.request_count(), 1);

        let errors = h.events_of(EventKind::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].data["kind"], "max_iterations");
        assert_eq!(h.events().last().unwrap().kind, EventKind::Error);
        assert_eq!(h.runtime.session("s1").unwrap().status, SessionStatus::Idle);
    }

    // ── Rate limits and provider failures ──────────────────────

    #[tokio::test]
    async fn test_two_rate_limits_then_success() {
        for stream in [false, true] {
            let h = harness_with(
                MockProvider::new("mock")
                    .with_rate_limit()
                    .with_rate_limit()
                    .with_tool_call("final_response", json!({"message": "done"})),
                fast_config(),
                stream,
            );
            let outcome = h.run("go").await;
            assert!(outcome.is_complete(), "stream={stream}");
            assert_eq!(outcome.iterations, 1);

            let backoffs = h
                .events_of(EventKind::Thinking)
                .into_iter()
                .filter(|e| e.data["backoff"] == true)
                .count();
            assert_eq!(backoffs, 2, "stream={stream}");
            assert!(h.events_of(EventKind::Error).is_empty());
            assert_eq!(h.mock.request_count(), 3);
        }
    }

    #[tokio::test]
    async fn test_rate_limit_retries_are_bounded() {
        let h = harness(MockProvider::new("mock").with_fallback(MockResponse::rate_limited()));
        let outcome = h.run("go").await;

        assert_eq!(outcome.status, SessionStatus::Idle);
        // One attempt plus three retries.
        assert_eq!(h.mock.request_count(), 4);
        let errors = h.events_of(EventKind::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].data["kind"], "rate_limited");
    }

    #[tokio::test]
    async fn test_provider_failure_is_fatal() {
        let h = harness(
            MockProvider::new("mock")
                .with_error("HTTP 400: invalid request")
                .with_response("never reached"),
        );
        let outcome = h.run("go").await;

        assert_eq!(outcome.status, SessionStatus::Idle);
        assert!(outcome.error.unwrap().contains("invalid request"));
        assert_eq!(h.mock.request_count(), 1);
        assert_eq!(h.events_of(EventKind::Error)[0].data["kind"], "provider");
        assert!(h.events_of(EventKind::Complete).is_empty());
    }

    // ── Review ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_must_fix_blocks_completion_in_the_same_turn() {
        let h = harness(
            MockProvider::new("mock")
                .with_tool_calls(vec![
                    ("request_review", json!({"summary": "added users table", "files_changed": ["schema.sql"]})),
                    ("final_response", json!({"message": "done early"})),
                ])
                .with_response(
                    r#"{"approved": false, "grade": "C", "issues": [], "must_fix": ["add an index on users.email"]}"#,
                )
                .with_tool_calls(vec![
                    ("request_review", json!({"summary": "added the index"})),
                    ("final_response", json!({"message": "done"})),
                ])
                .with_response(r#"{"approved": true, "grade": "A", "issues": [], "must_fix": []}"#),
        );
        std::fs::write(h.dir.path().join("schema.sql"), "create table users (email text);").unwrap();

        let outcome = h.run("add a users table").await;

        let review = h.result_event("call_1");
        assert_eq!(review["data"]["requires_more_work"], true);
        assert!(
            review["data"]["instruction"]
                .as_str()
                .unwrap()
                .contains("add an index on users.email")
        );
        let refused = h.result_event("call_2");
        assert_eq!(refused["success"], false);
        assert!(refused["error"].as_str().unwrap().contains("review requires more work"));

        assert!(outcome.is_complete());
        assert_eq!(outcome.message.as_deref(), Some("done"));
        assert_eq!(outcome.iterations, 2);
        assert_eq!(h.events_of(EventKind::Complete).len(), 1);
        assert_eq!(h.events_of(EventKind::Review).len(), 2);

        // The review saw the changed file, without tools, in one blocking call.
        let review_request = &h.mock.recorded_requests()[1];
        assert!(review_request.tools.is_empty());
        assert!(!review_request.stream);
        assert!(review_request.messages[0].text_content().contains("create table users"));
    }

    #[tokio::test]
    async fn test_unparseable_review_approves_leniently() {
        let h = harness(
            MockProvider::new("mock")
                .with_tool_call("request_review", json!({"summary": "did things"}))
                .with_response("Looks reasonable.")
                .with_tool_call("final_response", json!({"message": "done"})),
        );
        let outcome = h.run("go").await;
        assert!(outcome.is_complete());

        let verdict = &h.events_of(EventKind::Review)[0].data["verdict"];
        assert_eq!(verdict["approved"], true);
        assert_eq!(verdict["grade"], "B");
        assert_eq!(verdict["feedback"], "Looks reasonable.");
    }

    // ── Termination ────────────────────────────────────────────

    #[tokio::test]
    async fn test_end_to_end_add_table() {
        for stream in [false, true] {
            let h = harness_with(
                MockProvider::new("mock")
                    .with_tool_call("create_tasks", json!({"tasks": ["design schema", "write migration"]}))
                    .with_tool_calls(vec![
                        ("update_task", json!({"id": "task_1", "status": "completed"})),
                        ("update_task", json!({"id": "task_2", "status": "completed"})),
                    ])
                    .with_tool_call("final_response", json!({"message": "done"})),
                fast_config(),
                stream,
            );
            let outcome = h.run("add table X").await;

            assert_eq!(outcome.status, SessionStatus::Complete);
            let session = h.runtime.session("s1").unwrap();
            assert_eq!(session.status, SessionStatus::Complete);
            assert_eq!(session.tasks.len(), 2);
            assert!(session.tasks.iter().all(|t| t.status == TaskStatus::Completed));

            let last = h.events().last().cloned().unwrap();
            assert_eq!(last.kind, EventKind::Complete);
            assert_eq!(last.data["message"], "done");

            let history = h.history();
            assert_eq!(history.last().unwrap().text_content(), "done");
            assert_one_result_per_call(&history);
        }
    }

    #[tokio::test]
    async fn test_final_response_skips_remaining_calls() {
        let h = harness(MockProvider::new("mock").with_tool_calls(vec![
            ("final_response", json!({"message": "all done", "next_steps": ["deploy"]})),
            ("write_file", json!({"path": "late.txt", "content": "too late"})),
        ]));
        let outcome = h.run("go").await;

        assert!(outcome.is_complete());
        assert!(!h.dir.path().join("late.txt").exists());
        let results = tool_messages(&h.history());
        assert_eq!(results.len(), 2);
        assert!(results[1].1.contains("skipped"));
        let last = h.events().last().cloned().unwrap();
        assert_eq!(last.kind, EventKind::Complete);
        assert_eq!(last.data["next_steps"], json!(["deploy"]));
    }

    #[tokio::test]
    async fn test_plain_answer_completes_the_run() {
        let h = harness(MockProvider::new("mock").with_response("The project has no tables yet."));
        let outcome = h.run("what tables exist?").await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.message.as_deref(), Some("The project has no tables yet."));
        let history = h.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_legacy_json_completion_in_free_text() {
        let h = harness(MockProvider::new("mock").with_response(
            "```json\n{\"final_response\": {\"message\": \"migrated\", \"summary\": \"1 table\"}}\n```",
        ));
        let outcome = h.run("migrate").await;
        assert_eq!(outcome.message.as_deref(), Some("migrated"));
        assert_eq!(h.events().last().unwrap().data["summary"], "1 table");
    }

    // ── Tool failures ──────────────────────────────────────────

    #[tokio::test]
    async fn test_denied_destructive_call_is_fed_back() {
        let h = harness(
            MockProvider::new("mock")
                .with_tool_call("run_command", json!({"command": "rm -rf /"}))
                .with_tool_call("final_response", json!({"message": "ok"})),
        );
        let outcome = h.run("clean up").await;

        assert!(outcome.is_complete());
        assert_eq!(h.result_event("call_1")["error"], "denied: recursive root deletion");
        let results = tool_messages(&h.history());
        assert!(results[0].2);
        assert_eq!(results[0].1, "Error: denied: recursive root deletion");
    }

    struct Exploding;

    #[async_trait]
    impl ToolExecutor for Exploding {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("explode", "Panics", json!({}))
        }

        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> wright_core::Result<Value> {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn test_panicking_tool_does_not_end_the_run() {
        let mock = Arc::new(
            MockProvider::new("mock")
                .with_tool_call("explode", json!({}))
                .with_tool_call("final_response", json!({"message": "survived"})),
        );
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(Exploding)).unwrap();
        let adapter = adapter(Arc::clone(&mock), false);
        let review = ReviewSubroutine::new(
            Arc::clone(&adapter),
            ReviewSettings {
                enabled: false,
                model: "mock/test-model".into(),
                max_files: 1,
                max_file_bytes: 1,
                max_tokens: 1,
            },
        );
        let engine = OrchestrationEngine::new(adapter, Arc::new(tools), review, fast_config()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let runtime = AgentRuntime::new(engine, SessionStore::default(), dir.path());

        let outcome = runtime.run("s1", "p1", "go").await.unwrap();
        assert_eq!(outcome.message.as_deref(), Some("survived"));
    }

    struct Impostor;

    #[async_trait]
    impl ToolExecutor for Impostor {
        fn spec(&self) -> ToolSpec {
            ToolSpec::new("final_response", "Not the real one", json!({}))
        }

        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> wright_core::Result<Value> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn test_domain_tool_cannot_shadow_control_tool() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(Impostor)).unwrap();
        let adapter = adapter(Arc::new(MockProvider::new("mock")), false);
        let review = ReviewSubroutine::new(
            Arc::clone(&adapter),
            ReviewSettings {
                enabled: false,
                model: "mock/test-model".into(),
                max_files: 1,
                max_file_bytes: 1,
                max_tokens: 1,
            },
        );
        let err = OrchestrationEngine::new(adapter, Arc::new(tools), review, fast_config())
            .err()
            .unwrap();
        assert!(matches!(err, WrightError::ReservedToolName(name) if name == "final_response"));
    }

    // ── Context ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_model_sees_a_bounded_window_without_orphans() {
        let config = EngineConfig {
            history_window: 3,
            ..fast_config()
        };
        let h = harness_with(
            MockProvider::new("mock")
                .with_tool_call("list_files", json!({}))
                .with_tool_call("list_files", json!({}))
                .with_tool_call("list_files", json!({}))
                .with_tool_call("final_response", json!({"message": "done"})),
            config,
            false,
        );
        h.run("explore").await;

        let requests = h.mock.recorded_requests();
        assert_eq!(requests.len(), 4);
        for request in &requests {
            assert_eq!(request.messages[0].role, Role::User);
            // One earlier turn may be pulled in to keep tool results paired.
            assert!(request.messages.len() <= 1 + 3 + 1);
        }
        assert_eq!(requests[3].messages.len(), 5);
        assert!(requests[3].system.as_deref().unwrap().contains("2 earlier messages"));
        // The session keeps everything.
        assert_eq!(h.history().len(), 1 + 4 * 2 + 1);
    }

    #[tokio::test]
    async fn test_turn_wider_than_window_reaches_model_whole() {
        let config = EngineConfig {
            history_window: 3,
            ..fast_config()
        };
        let h = harness_with(
            MockProvider::new("mock")
                .with_tool_calls(vec![
                    ("list_files", json!({})),
                    ("list_files", json!({"path": "."})),
                    ("list_files", json!({})),
                ])
                .with_tool_call("final_response", json!({"message": "done"})),
            config,
            false,
        );
        let outcome = h.run("survey the project").await;
        assert!(outcome.is_complete());

        let requests = h.mock.recorded_requests();
        assert_eq!(requests.len(), 2);
        let second = &requests[1].messages;
        let roles: Vec<Role> = second.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Tool]
        );
        assert_eq!(second[0].text_content(), "survey the project");
        for request in &requests {
            assert!(!request.messages.is_empty());
            assert!(request.messages.iter().any(|m| m.role == Role::User));
        }
    }

    #[tokio::test]
    async fn test_large_results_are_truncated_in_history_only() {
        let config = EngineConfig {
            tool_result_max_tokens: 10,
            ..fast_config()
        };
        let h = harness_with(
            MockProvider::new("mock")
                .with_tool_call("read_file", json!({"path": "big.txt"}))
                .with_tool_call("final_response", json!({"message": "done"})),
            config,
            false,
        );
        std::fs::write(h.dir.path().join("big.txt"), "x".repeat(2000)).unwrap();
        h.run("read it").await;

        let results = tool_messages(&h.history());
        assert!(results[0].1.contains("truncated"));
        assert!(results[0].1.chars().count() < 200);
        let event = h.result_event("call_1");
        assert_eq!(event["data"]["content"].as_str().unwrap().len(), 2000);
    }

    #[tokio::test]
    async fn test_system_prompt_carries_project_domain_and_tasks() {
        let h = harness(
            MockProvider::new("mock")
                .with_tool_call("create_tasks", json!({"tasks": ["design schema"]}))
                .with_response("ok"),
        );
        h.runtime
            .run_with(h.request("plan").with_domain("postgres"))
            .await
            .unwrap();

        let system = h.mock.recorded_requests()[1].system.clone().unwrap();
        assert!(system.contains("Project: p1"));
        assert!(system.contains("Domain: postgres"));
        assert!(system.contains("[pending] task_1: design schema"));
    }

    // ── Cancellation ───────────────────────────────────────────

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let h = harness(MockProvider::new("mock").with_response("unused"));
        let token = CancellationToken::new();
        token.cancel();
        let outcome = h.runtime.run_with(h.request("go").with_cancel(token)).await.unwrap();

        assert_eq!(outcome.status, SessionStatus::Idle);
        assert_eq!(outcome.error.as_deref(), Some("cancelled"));
        assert_eq!(h.mock.request_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_a_running_tool() {
        let h = harness(
            MockProvider::new("mock")
                .with_tool_call("run_command", json!({"command": "sleep 10"}))
                .with_response("unused"),
        );
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let outcome = h.runtime.run_with(h.request("build").with_cancel(token)).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(outcome.error.as_deref(), Some("cancelled"));
        let results = tool_messages(&h.history());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].1, "Error: cancelled");
        assert_eq!(h.events().last().unwrap().data["kind"], "cancelled");
    }

    // ── Event log ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_event_log_is_ordered_and_replayable() {
        let h = harness(
            MockProvider::new("mock")
                .with_tool_call("list_files", json!({}))
                .with_tool_call("final_response", json!({"message": "done"})),
        );
        h.run("go").await;

        let events = h.events();
        for (i, pair) in events.windows(2).enumerate() {
            assert_eq!(pair[0].seq, i as u64);
            assert_eq!(pair[1].seq, pair[0].seq + 1);
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Message,
                EventKind::Thinking,
                EventKind::ToolCall,
                EventKind::ToolResult,
                EventKind::Thinking,
                EventKind::ToolCall,
                EventKind::ToolResult,
                EventKind::Complete,
            ]
        );
        assert_eq!(h.runtime.events("s1", 6).unwrap().len(), 2);
    }
}
