use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex as TokioMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wright_config::WrightConfig;
use wright_core::{AgentEvent, EventKind, EventLog, Message, ProjectId, Role, SessionId, ToolContext};

use crate::context::{self, ContextWindow};
use crate::engine::{OrchestrationEngine, RunOutcome};
use crate::tasks::{Task, TaskStatus, TaskTracker};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Reviewing,
    Complete,
}

impl SessionStatus {
    /// idle → running → (reviewing → running)* → complete, a finished session
    /// may start a new run, and any state may fall back to idle.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (_, Idle)
                | (Idle, Running)
                | (Running, Reviewing)
                | (Reviewing, Running)
                | (Running, Complete)
                | (Complete, Running)
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, SessionStatus::Running | SessionStatus::Reviewing)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Reviewing => "reviewing",
            SessionStatus::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// Read-only view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub project_id: ProjectId,
    pub status: SessionStatus,
    pub tasks: Vec<Task>,
    pub message_count: usize,
    pub event_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct SessionState {
    status: SessionStatus,
    history: Vec<Message>,
    tasks: TaskTracker,
}

/// One conversation: full history, tasks, events and status.
///
/// State sits behind a short-held lock so readers never wait for a run;
/// `run_lock` keeps two runs of the same session from overlapping.
pub struct ConversationSession {
    id: SessionId,
    project_id: ProjectId,
    created_at: DateTime<Utc>,
    state: RwLock<SessionState>,
    events: EventLog,
    run_lock: TokioMutex<()>,
    /// Outstanding checkouts. Eviction skips the session while non-zero.
    pending: AtomicUsize,
    last_active: Mutex<Instant>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl ConversationSession {
    pub fn new(id: impl Into<SessionId>, project_id: impl Into<ProjectId>) -> Self {
        Self {
            id: id.into(),
            project_id: project_id.into(),
            created_at: Utc::now(),
            state: RwLock::new(SessionState::default()),
            events: EventLog::default(),
            run_lock: TokioMutex::new(()),
            pending: AtomicUsize::new(0),
            last_active: Mutex::new(Instant::now()),
            cancel: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn status(&self) -> SessionStatus {
        self.state.read().status
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state.read().tasks.list().to_vec()
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        self.state.read().tasks.get(id).cloned()
    }

    /// The full, unwindowed history.
    pub fn history(&self) -> Vec<Message> {
        self.state.read().history.clone()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read();
        SessionSnapshot {
            session_id: self.id.clone(),
            project_id: self.project_id.clone(),
            status: state.status,
            tasks: state.tasks.list().to_vec(),
            message_count: state.history.len(),
            event_count: self.events.len(),
            created_at: self.created_at,
        }
    }

    /// Whether a run is in progress, waiting for the run lock, or about to
    /// start through a checkout.
    pub fn is_busy(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0
            || self.status().is_active()
            || self.run_lock.try_lock().is_err()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.lock().elapsed()
    }

    pub fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    /// Cancel the run in progress, if any.
    pub fn cancel(&self) -> bool {
        match self.cancel.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Run one user message through the engine. Runs of the same session
    /// queue behind each other.
    pub async fn run(&self, engine: &OrchestrationEngine, ctx: &ToolContext, message: &str) -> RunOutcome {
        let _guard = self.run_lock.lock().await;
        self.touch();
        *self.cancel.lock() = Some(ctx.cancel.clone());

        self.transition(SessionStatus::Running);
        self.push_message(Message::text(Role::User, message));
        self.emit(EventKind::Message, json!({ "role": "user", "content": message }));
        info!(session = %self.id, project = %self.project_id, "run started");

        let outcome = engine.run(self, ctx).await;

        *self.cancel.lock() = None;
        self.touch();
        outcome
    }

    // ── Mutation, used by the engine only ──────────────────────

    pub(crate) fn emit(&self, kind: EventKind, data: Value) -> AgentEvent {
        self.events.emit(kind, data)
    }

    pub(crate) fn push_message(&self, message: Message) {
        self.state.write().history.push(message);
    }

    /// Apply a status change. Invalid transitions are refused and logged.
    pub(crate) fn transition(&self, next: SessionStatus) -> bool {
        let mut state = self.state.write();
        if !state.status.can_transition_to(next) {
            warn!(session = %self.id, from = %state.status, to = %next, "refused status transition");
            return false;
        }
        if state.status != next {
            debug!(session = %self.id, from = %state.status, to = %next, "status changed");
        }
        state.status = next;
        true
    }

    pub(crate) fn create_tasks(&self, contents: Vec<String>) -> Vec<Task> {
        self.state.write().tasks.create(contents)
    }

    pub(crate) fn update_task(&self, id: &str, status: TaskStatus, result: Option<String>) -> Option<Task> {
        self.state.write().tasks.update(id, status, result)
    }

    pub(crate) fn window(&self, limit: usize) -> ContextWindow {
        context::window(&self.state.read().history, limit)
    }

    pub(crate) fn render_tasks(&self) -> String {
        self.state.read().tasks.render()
    }
}

// ── Registry ───────────────────────────────────────────────────

/// When idle sessions are dropped from the store.
#[derive(Debug, Clone)]
pub struct EvictionPolicy {
    pub idle_ttl: Duration,
    pub max_sessions: usize,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(3600),
            max_sessions: 256,
        }
    }
}

impl EvictionPolicy {
    pub fn from_config(config: &WrightConfig) -> Self {
        Self {
            idle_ttl: Duration::from_secs(config.sessions.idle_ttl_secs),
            max_sessions: config.sessions.max_sessions,
        }
    }
}

/// Process-wide map of session id to session. Entries are created on first
/// reference; sessions never share state with each other.
pub struct SessionStore {
    sessions: DashMap<SessionId, Arc<ConversationSession>>,
    policy: EvictionPolicy,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(EvictionPolicy::default())
    }
}

impl SessionStore {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            sessions: DashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    /// The session for `id`, created atomically if it does not exist.
    pub fn get_or_create(&self, id: &str, project_id: &str) -> Arc<ConversationSession> {
        let entry = self.sessions.entry(id.to_string()).or_insert_with(|| {
            info!(session = id, project = project_id, "session created");
            Arc::new(ConversationSession::new(id, project_id))
        });
        let session = Arc::clone(entry.value());
        drop(entry);
        session.touch();
        session
    }

    /// Like [`get_or_create`](Self::get_or_create), but the session is
    /// reserved against eviction until the returned handle is dropped. The
    /// reservation is taken under the map entry lock, so a concurrent sweep
    /// either runs before it or sees the session as busy.
    pub fn checkout(&self, id: &str, project_id: &str) -> SessionCheckout {
        let entry = self.sessions.entry(id.to_string()).or_insert_with(|| {
            info!(session = id, project = project_id, "session created");
            Arc::new(ConversationSession::new(id, project_id))
        });
        entry.value().pending.fetch_add(1, Ordering::AcqRel);
        let session = Arc::clone(entry.value());
        drop(entry);
        session.touch();
        SessionCheckout { session }
    }

    pub fn get(&self, id: &str) -> Option<Arc<ConversationSession>> {
        self.sessions.get(id).map(|s| Arc::clone(s.value()))
    }

    pub fn remove(&self, id: &str) -> Option<Arc<ConversationSession>> {
        self.sessions.remove(id).map(|(_, s)| s)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions idle past the TTL, then the least recently used idle
    /// sessions while the store is over capacity. Busy sessions stay.
    pub fn evict_idle(&self) -> Vec<SessionId> {
        let mut evicted = Vec::new();

        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|e| !e.value().is_busy() && e.value().idle_for() >= self.policy.idle_ttl)
            .map(|e| e.key().clone())
            .collect();
        for id in expired {
            if self
                .sessions
                .remove_if(&id, |_, s| !s.is_busy() && s.idle_for() >= self.policy.idle_ttl)
                .is_some()
            {
                evicted.push(id);
            }
        }

        if self.sessions.len() > self.policy.max_sessions {
            let mut idle: Vec<(SessionId, Duration)> = self
                .sessions
                .iter()
                .filter(|e| !e.value().is_busy())
                .map(|e| (e.key().clone(), e.value().idle_for()))
                .collect();
            // Longest idle first.
            idle.sort_by(|a, b| b.1.cmp(&a.1));
            for (id, _) in idle {
                if self.sessions.len() <= self.policy.max_sessions {
                    break;
                }
                if self.sessions.remove_if(&id, |_, s| !s.is_busy()).is_some() {
                    evicted.push(id);
                }
            }
        }

        if !evicted.is_empty() {
            info!(count = evicted.len(), remaining = self.sessions.len(), "evicted idle sessions");
        }
        evicted
    }

    /// Run [`SessionStore::evict_idle`] every `interval` until `shutdown` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        store.evict_idle();
                    }
                }
            }
            debug!("session sweeper stopped");
        })
    }
}

/// A session reserved by [`SessionStore::checkout`].
pub struct SessionCheckout {
    session: Arc<ConversationSession>,
}

impl SessionCheckout {
    pub fn session(&self) -> &Arc<ConversationSession> {
        &self.session
    }
}

impl Deref for SessionCheckout {
    type Target = ConversationSession;

    fn deref(&self) -> &ConversationSession {
        &self.session
    }
}

impl Drop for SessionCheckout {
    fn drop(&mut self) {
        self.session.pending.fetch_sub(1, Ordering::AcqRel);
    }
}
