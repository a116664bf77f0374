use std::path::Path;

use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use wright_config::WrightConfig;
use wright_core::{Result, WrightError};
use wright_runtime::{AgentRuntime, RunOutcome, RunRequest};

use super::render;

pub(super) async fn cmd_run(
    config: &WrightConfig,
    project: &Path,
    session: Option<String>,
    domain: Option<String>,
    message: String,
) -> Result<()> {
    let (root, project_id) = super::resolve_project(project)?;
    let runtime = super::build_runtime(config, &root)?;
    let session_id = session.unwrap_or_else(super::new_session_id);

    let mut request = RunRequest::new(session_id, project_id, root, message);
    if let Some(domain) = domain {
        request = request.with_domain(domain);
    }

    let outcome = run_and_print(&runtime, request).await?;
    if outcome.is_complete() {
        Ok(())
    } else {
        Err(WrightError::Other(anyhow::anyhow!(
            "run stopped after {} iterations: {}",
            outcome.iterations,
            outcome.error.unwrap_or_default()
        )))
    }
}

/// Run `request`, printing the session's events as they happen. Ctrl+C
/// cancels the run.
pub(super) async fn run_and_print(runtime: &AgentRuntime, request: RunRequest) -> Result<RunOutcome> {
    // Held until the run finishes so the subscribed session is the one that runs.
    let _held = runtime
        .store()
        .checkout(&request.session_id, &request.project_id);
    let mut events = runtime.subscribe_events(&request.session_id)?;

    let cancel = CancellationToken::new();
    let request = request.with_cancel(cancel.clone());
    let interrupt = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", console::style("   cancelling...").yellow());
                cancel.cancel();
            }
        }
    });

    let run = runtime.run_with(request);
    tokio::pin!(run);
    let mut open = true;
    let outcome = loop {
        tokio::select! {
            outcome = &mut run => break outcome,
            event = events.recv(), if open => match event {
                Ok(event) => render::print_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event display fell behind"),
                Err(RecvError::Closed) => open = false,
            },
        }
    };
    interrupt.abort();

    while let Ok(event) = events.try_recv() {
        render::print_event(&event);
    }
    outcome
}
