use std::io::Write;
use std::path::Path;

use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::error;

use wright_config::WrightConfig;
use wright_runtime::RunRequest;

use super::{render, run::run_and_print};

pub(super) async fn cmd_chat(
    config: &WrightConfig,
    project: &Path,
    session: Option<String>,
    domain: Option<String>,
) -> wright_core::Result<()> {
    let (root, project_id) = super::resolve_project(project)?;
    let runtime = super::build_runtime(config, &root)?;
    let session_id = session.unwrap_or_else(super::new_session_id);

    println!("🔨 Wright Interactive Chat");
    println!("   Project: {} ({})", project_id, root.display());
    println!("   Session: {session_id}");
    println!("   Type 'exit' to quit, '/tasks' for the task list, '/status' for the session");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("{} ", style("you>").cyan());
        std::io::stderr().flush().ok();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        let trimmed = line.trim();
        match trimmed {
            "" => continue,
            "exit" | "quit" | "/exit" => {
                println!("👋 Goodbye!");
                break;
            }
            "/tasks" => {
                match runtime.tasks(&session_id) {
                    Ok(tasks) => render::print_tasks(&tasks),
                    Err(_) => println!("No tasks yet."),
                }
                continue;
            }
            "/status" => {
                match runtime.session(&session_id) {
                    Some(snapshot) => println!(
                        "   status: {}, {} messages, {} tasks, {} events",
                        snapshot.status,
                        snapshot.message_count,
                        snapshot.tasks.len(),
                        snapshot.event_count
                    ),
                    None => println!("   no messages yet"),
                }
                continue;
            }
            _ => {}
        }

        let mut request = RunRequest::new(session_id.as_str(), project_id.as_str(), &root, trimmed);
        if let Some(domain) = &domain {
            request = request.with_domain(domain.as_str());
        }
        match run_and_print(&runtime, request).await {
            Ok(outcome) if !outcome.is_complete() => {
                println!("{}", style(format!("   run stopped after {} iterations", outcome.iterations)).dim());
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "run failed");
                println!("{}", style(format!("❌ {e}")).red());
            }
        }
        println!();
    }

    Ok(())
}
