use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;
use wright_config::WrightConfig;
use wright_core::{AgentEvent, Message, ProjectId, Result, SessionId, ToolContext, WrightError};
use wright_llm::{AdapterSettings, Delta, ModelRouter, ProviderAdapter};
use wright_tools::ToolRegistry;

use crate::engine::{EngineConfig, OrchestrationEngine, RunOutcome};
use crate::review::{ReviewSettings, ReviewSubroutine};
use crate::session::{ConversationSession, EvictionPolicy, SessionSnapshot, SessionStore};
use crate::tasks::Task;

/// Everything needed to run one message.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub session_id: SessionId,
    pub project_id: ProjectId,
    /// Directory the project's tools operate in.
    pub root: PathBuf,
    pub domain: Option<String>,
    pub message: String,
    pub cancel: CancellationToken,
}

impl RunRequest {
    pub fn new(
        session_id: impl Into<SessionId>,
        project_id: impl Into<ProjectId>,
        root: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            project_id: project_id.into(),
            root: root.into(),
            domain: None,
            message: message.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Entry point for callers: runs messages and answers queries about
/// sessions. `run` is the only way to change a session.
pub struct AgentRuntime {
    engine: Arc<OrchestrationEngine>,
    store: Arc<SessionStore>,
    /// Project roots default to `<workspace>/<project_id>`.
    workspace: PathBuf,
}

impl AgentRuntime {
    pub fn new(engine: OrchestrationEngine, store: SessionStore, workspace: impl Into<PathBuf>) -> Self {
        Self {
            engine: Arc::new(engine),
            store: Arc::new(store),
            workspace: workspace.into(),
        }
    }

    /// Wire adapter, review, engine and store from configuration.
    pub fn from_config(
        config: &WrightConfig,
        router: ModelRouter,
        tools: ToolRegistry,
        workspace: impl Into<PathBuf>,
    ) -> Result<Self> {
        let adapter = Arc::new(ProviderAdapter::new(
            router,
            AdapterSettings {
                model: config.agent.model.clone(),
                fallback_model: config.agent.fallback_model.clone(),
                max_tokens: config.agent.max_tokens,
                temperature: config.agent.temperature,
                stream: config.agent.stream,
            },
        ));
        let review = ReviewSubroutine::new(Arc::clone(&adapter), ReviewSettings::from_config(config));
        let engine = OrchestrationEngine::new(adapter, Arc::new(tools), review, EngineConfig::from_config(config))?;
        info!(
            model = %config.agent.model,
            tools = engine.tools().len(),
            max_iterations = config.agent.max_iterations,
            "agent runtime ready"
        );
        Ok(Self::new(engine, SessionStore::new(EvictionPolicy::from_config(config)), workspace))
    }

    pub fn engine(&self) -> &OrchestrationEngine {
        &self.engine
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Run `message` in the session, creating it on first use. The project
    /// root is `<workspace>/<project_id>`.
    pub async fn run(&self, session_id: &str, project_id: &str, message: &str) -> Result<RunOutcome> {
        let root = self.workspace.join(project_id);
        self.run_with(RunRequest::new(session_id, project_id, root, message)).await
    }

    pub async fn run_with(&self, request: RunRequest) -> Result<RunOutcome> {
        let session = self.store.checkout(&request.session_id, &request.project_id);
        if session.project_id() != request.project_id {
            return Err(WrightError::ProjectMismatch {
                session: request.session_id,
                project: session.project_id().to_string(),
            });
        }

        let mut ctx = ToolContext::new(request.project_id, request.root);
        ctx.domain = request.domain;
        ctx.cancel = request.cancel;
        Ok(session.run(&self.engine, &ctx, &request.message).await)
    }

    /// Cancel the session's run in progress.
    pub fn cancel(&self, session_id: &str) -> bool {
        self.store.get(session_id).is_some_and(|s| s.cancel())
    }

    pub fn session(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.store.get(session_id).map(|s| s.snapshot())
    }

    pub fn tasks(&self, session_id: &str) -> Result<Vec<Task>> {
        Ok(self.get(session_id)?.tasks())
    }

    pub fn history(&self, session_id: &str) -> Result<Vec<Message>> {
        Ok(self.get(session_id)?.history())
    }

    /// Events from sequence number `from` on, in emission order.
    pub fn events(&self, session_id: &str, from: u64) -> Result<Vec<AgentEvent>> {
        Ok(self.get(session_id)?.events().since(from))
    }

    pub fn subscribe_events(&self, session_id: &str) -> Result<broadcast::Receiver<AgentEvent>> {
        Ok(self.get(session_id)?.events().subscribe())
    }

    /// Partial model output for every session served by this runtime.
    pub fn subscribe_deltas(&self) -> broadcast::Receiver<Delta> {
        self.engine.adapter().subscribe_deltas()
    }

    pub fn evict_idle(&self) -> Vec<SessionId> {
        self.store.evict_idle()
    }

    pub fn spawn_sweeper(&self, interval: Duration, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        self.store.spawn_sweeper(interval, shutdown)
    }

    fn get(&self, session_id: &str) -> Result<Arc<ConversationSession>> {
        self.store
            .get(session_id)
            .ok_or_else(|| WrightError::SessionNotFound(session_id.to_string()))
    }
}
