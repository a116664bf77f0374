use console::style;
use serde_json::Value;

use wright_core::{AgentEvent, EventKind};
use wright_runtime::Task;

/// Print one session event to the terminal.
pub(super) fn print_event(event: &AgentEvent) {
    let data = &event.data;
    match event.kind {
        // The user's own message is already on screen.
        EventKind::Message if data["role"] == "user" => {}
        EventKind::Message => {
            println!("{} {}", style("wright>").green(), str_of(&data["content"]));
        }
        EventKind::Thinking if data["backoff"] == true => {
            eprintln!("{}", style(format!("   ⏳ {}", str_of(&data["message"]))).yellow());
        }
        EventKind::Thinking if data["source"] == "model" => {
            eprintln!("{}", style(format!("   💭 {}", truncate_output(str_of(&data["message"]), 200))).dim());
        }
        EventKind::Thinking => {
            tracing::debug!(iteration = %data["iteration"], "iteration");
        }
        EventKind::ToolCall => {
            let args = truncate_output(&data["arguments"].to_string(), 120);
            eprintln!(
                "{} {} {}",
                style("🔧").yellow(),
                style(str_of(&data["name"])).yellow().bold(),
                style(args).dim()
            );
        }
        EventKind::ToolResult => {
            if data["success"] == true {
                let shown = match &data["data"] {
                    Value::Null => "ok".to_string(),
                    other => other.to_string(),
                };
                eprintln!("{}", style(format!("   ✓ {}", truncate_output(&shown, 200))).dim());
            } else {
                eprintln!(
                    "{}",
                    style(format!("   ❌ {}", truncate_output(str_of(&data["error"]), 200))).red()
                );
            }
        }
        EventKind::TaskUpdate => {
            if let Ok(task) = serde_json::from_value::<Task>(data["task"].clone()) {
                eprintln!(
                    "{} [{}] {}: {}",
                    style("📋").cyan(),
                    style(task.status).cyan(),
                    task.id,
                    task.content
                );
            }
        }
        EventKind::Review => print_review(&data["verdict"]),
        EventKind::Complete => {
            println!();
            println!("{}", style(str_of(&data["message"])).green().bold());
            if let Some(summary) = data["summary"].as_str() {
                println!("{}", style(summary).dim());
            }
            if let Some(steps) = data["next_steps"].as_array().filter(|s| !s.is_empty()) {
                println!("{}", style("Next steps:").bold());
                for step in steps {
                    println!("  • {}", str_of(step));
                }
            }
        }
        EventKind::Error => {
            eprintln!(
                "{}",
                style(format!(
                    "❌ Error ({}): {}",
                    str_of(&data["kind"]),
                    str_of(&data["error"])
                ))
                .red()
            );
        }
    }
}

fn print_review(verdict: &Value) {
    let grade = str_of(&verdict["grade"]);
    if verdict["approved"] == true {
        eprintln!("{} approved, grade {grade}", style("🔍 review:").magenta());
    } else {
        eprintln!("{} changes requested, grade {grade}", style("🔍 review:").magenta());
    }
    for item in verdict["must_fix"].as_array().into_iter().flatten() {
        eprintln!("   {} {}", style("must fix:").red(), str_of(item));
    }
}

pub(super) fn print_tasks(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("No tasks yet.");
        return;
    }
    for task in tasks {
        let status = style(task.status);
        let status = match task.status {
            wright_runtime::TaskStatus::Completed => status.green(),
            wright_runtime::TaskStatus::Failed => status.red(),
            wright_runtime::TaskStatus::InProgress => status.yellow(),
            wright_runtime::TaskStatus::Pending => status.dim(),
        };
        println!("  [{status}] {}: {}", task.id, task.content);
        if let Some(result) = &task.result {
            println!("      {}", style(result).dim());
        }
    }
}

fn str_of(value: &Value) -> &str {
    value.as_str().unwrap_or_default()
}

/// Truncate a string to `max` characters, appending "..." if truncated.
fn truncate_output(s: &str, max: usize) -> String {
    let flat = s.replace('\n', " ");
    if flat.chars().count() <= max {
        flat
    } else {
        let head: String = flat.chars().take(max).collect();
        format!("{head}...")
    }
}
