use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};
use wright_core::{Result, ToolSpec, WrightError};

/// Outcome of screening a destructive tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    Allow,
    /// The call must not run. Carries the name of the rule that matched.
    Deny(String),
}

/// Built-in patterns: (rule name, regex).
const BUILTIN_RULES: &[(&str, &str)] = &[
    (
        "recursive root deletion",
        r"(?i)\brm\s+(?:-\S+\s+)*(?:/|/\*|~/?|\$HOME/?)(?:\s|;|&|\||$)",
    ),
    ("filesystem format", r"(?i)\bmkfs(?:\.\w+)?\b"),
    ("raw device write", r"(?i)\bdd\b[^\n]*\bof=/dev/"),
    ("fork bomb", r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:"),
    ("drop database", r"(?i)\bdrop\s+(?:database|schema)\b"),
    ("truncate table", r"(?i)\btruncate\s+(?:table\s+)?[A-Za-z_]"),
    (
        "unqualified delete",
        r#"(?i)\bdelete\s+from\s+[\w."`\[\]]+\s*(?:;|$)"#,
    ),
    ("force push", r"(?i)\bgit\s+push\b[^\n]*(?:--force\b|\s-f\b)"),
    ("world-writable root", r"(?i)\bchmod\s+(?:-\S+\s+)*777\s+/(?:\s|$)"),
    (
        "host shutdown",
        r"(?im)^\s*(?:sudo\s+)?(?:shutdown|reboot|halt|poweroff)\b",
    ),
];

/// Screens the string arguments of destructive tools against a denylist of
/// dangerous patterns.
pub struct CommandGuard {
    rules: Vec<(String, Regex)>,
}

impl Default for CommandGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandGuard {
    /// A guard with the built-in denylist only.
    pub fn new() -> Self {
        let rules = BUILTIN_RULES
            .iter()
            .filter_map(|(name, pattern)| match Regex::new(pattern) {
                Ok(re) => Some((name.to_string(), re)),
                Err(e) => {
                    warn!(rule = name, error = %e, "skipping invalid built-in rule");
                    None
                }
            })
            .collect();
        Self { rules }
    }

    /// A guard with the built-in denylist plus `extra` regexes.
    pub fn with_patterns(extra: &[String]) -> Result<Self> {
        let mut guard = Self::new();
        for pattern in extra {
            let re = Regex::new(pattern).map_err(|e| WrightError::ConfigValidation {
                field: "tools.denied_patterns".into(),
                reason: format!("invalid regex '{pattern}': {e}"),
            })?;
            guard.rules.push((format!("custom pattern '{pattern}'"), re));
        }
        Ok(guard)
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Check the strings in `args`, recursively, against the denylist. Only
    /// the tool's guarded arguments are looked at when it names any, so file
    /// content is not mistaken for a command.
    pub fn check(&self, tool: &ToolSpec, args: &Value) -> GuardVerdict {
        let mut strings = Vec::new();
        match args {
            Value::Object(map) if !tool.guarded_args.is_empty() => tool
                .guarded_args
                .iter()
                .filter_map(|name| map.get(name))
                .for_each(|v| collect_strings(v, &mut strings)),
            _ => collect_strings(args, &mut strings),
        }

        for s in strings {
            if let Some((name, _)) = self.rules.iter().find(|(_, re)| re.is_match(s)) {
                info!(tool = %tool.name, rule = %name, "guard denied tool call");
                return GuardVerdict::Deny(name.clone());
            }
        }
        GuardVerdict::Allow
    }
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}
