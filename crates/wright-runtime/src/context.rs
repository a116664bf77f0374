use wright_core::{Message, Role};

/// The model-visible slice of a session's history.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    pub messages: Vec<Message>,
    /// Messages left out at the front.
    pub omitted: usize,
}

impl ContextWindow {
    /// Count-only summary of what was left out.
    pub fn omitted_note(&self) -> Option<String> {
        (self.omitted > 0).then(|| {
            format!(
                "[{} earlier messages of this conversation are omitted from context. \
                 Use the task list and the project files for anything you need from them.]",
                self.omitted
            )
        })
    }
}

/// The last `limit` messages of `history`, widened so that a tool result
/// always travels with the assistant message that requested it. The latest
/// user message is pinned at the front when it would otherwise fall out.
pub fn window(history: &[Message], limit: usize) -> ContextWindow {
    let limit = limit.max(1);
    if history.len() <= limit {
        return ContextWindow {
            messages: history.to_vec(),
            omitted: 0,
        };
    }
    let mut start = history.len() - limit;
    while start > 0 && history[start].role == Role::Tool {
        start -= 1;
    }

    let mut messages = Vec::with_capacity(history.len() - start + 1);
    let mut omitted = start;
    let pinned = if history[start..].iter().any(|m| m.role == Role::User) {
        None
    } else {
        history[..start].iter().rposition(|m| m.role == Role::User)
    };
    if let Some(user) = pinned {
        messages.push(history[user].clone());
        omitted -= 1;
    }
    messages.extend_from_slice(&history[start..]);
    ContextWindow { messages, omitted }
}

/// Cap a tool result at roughly `max_tokens` (4 chars per token), keeping
/// the first 60% and last 20%. `0` disables the cap.
pub fn truncate_tool_result(content: &str, max_tokens: usize) -> String {
    if max_tokens == 0 {
        return content.to_string();
    }
    let max_chars = max_tokens * 4;
    let total = content.chars().count();
    if total <= max_chars {
        return content.to_string();
    }

    let head_chars = max_chars * 6 / 10;
    let tail_chars = max_chars * 2 / 10;
    let head: String = content.chars().take(head_chars).collect();
    let tail: String = content.chars().skip(total - tail_chars).collect();
    let omitted_chars = total - head_chars - tail_chars;

    format!(
        "{head}\n\n[... truncated {} tokens ({omitted_chars} chars) to fit the context window ...]\n\n{tail}",
        omitted_chars / 4
    )
}
