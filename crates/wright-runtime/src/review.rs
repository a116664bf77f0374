//! Read-only audit pass over the agent's own work.
//!
//! Gathers a capped amount of project context, asks the model for a verdict
//! once, and never writes anything.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use wright_config::WrightConfig;
use wright_core::{Message, Result, Role};
use wright_llm::ProviderAdapter;
use wright_tools::ProjectFs;

use crate::fallback::extract_json_object;

const REVIEW_SYSTEM_PROMPT: &str = "\
You are a strict senior reviewer auditing changes an autonomous build agent made to a project.
Check the work against this list:
1. Does it do what the summary claims? Are any claimed files missing or empty?
2. Correctness: syntax errors, broken references, wrong types, missing imports.
3. Data safety: destructive migrations, missing constraints, unguarded deletes.
4. Security: hard-coded secrets, injection, unchecked input.
5. Completeness: TODO stubs, placeholder values, unfinished branches.
6. Consistency with the existing project structure and conventions.

Reply with a single JSON object and nothing else:
{\"approved\": bool, \"grade\": \"A\"|\"B\"|\"C\"|\"D\"|\"F\", \"issues\": [string], \"must_fix\": [string], \"feedback\": string}
Only list blocking problems in must_fix. Minor remarks go in issues.";

/// Structured audit output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(default)]
    pub approved: bool,
    #[serde(default = "default_grade")]
    pub grade: String,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default, alias = "mustFix")]
    pub must_fix: Vec<String>,
    #[serde(default)]
    pub feedback: String,
    #[serde(default, alias = "requiresMoreWork")]
    pub requires_more_work: bool,
}

fn default_grade() -> String {
    "B".to_string()
}

impl Verdict {
    /// The verdict used when the reply cannot be parsed.
    pub fn lenient(raw: &str) -> Self {
        Self {
            approved: true,
            grade: default_grade(),
            issues: vec![],
            must_fix: vec![],
            feedback: raw.trim().to_string(),
            requires_more_work: false,
        }
    }

    /// Parse a model reply. Never fails; unparseable replies degrade to
    /// [`Verdict::lenient`].
    pub fn parse(raw: &str) -> Self {
        let parsed = extract_json_object(raw).and_then(|json| serde_json::from_str::<Verdict>(json).ok());
        let mut verdict = match parsed {
            Some(v) => v,
            None => {
                warn!(chars = raw.len(), "review reply was not a verdict, approving leniently");
                return Self::lenient(raw);
            }
        };
        verdict.must_fix.retain(|item| !item.trim().is_empty());
        if !verdict.must_fix.is_empty() {
            verdict.requires_more_work = true;
        }
        verdict
    }

    /// Instruction fed back to the model when the review demands more work.
    pub fn continuation(&self) -> String {
        let items = self
            .must_fix
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}. {item}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "The review found problems that must be fixed before you finish:\n{items}\n\
             Fix each of them, then call request_review again. Do not call final_response until the review passes."
        )
    }
}

/// Review settings.
#[derive(Debug, Clone)]
pub struct ReviewSettings {
    pub enabled: bool,
    pub model: String,
    pub max_files: usize,
    pub max_file_bytes: usize,
    pub max_tokens: u32,
}

impl ReviewSettings {
    pub fn from_config(config: &WrightConfig) -> Self {
        Self {
            enabled: config.review.enabled,
            model: config.review_model().to_string(),
            max_files: config.review.max_files,
            max_file_bytes: config.review.max_file_bytes,
            max_tokens: config.review.max_tokens,
        }
    }
}

pub struct ReviewSubroutine {
    adapter: Arc<ProviderAdapter>,
    settings: ReviewSettings,
}

impl ReviewSubroutine {
    pub fn new(adapter: Arc<ProviderAdapter>, settings: ReviewSettings) -> Self {
        Self { adapter, settings }
    }

    pub fn settings(&self) -> &ReviewSettings {
        &self.settings
    }

    /// Audit the work described by `summary`. Provider failures are returned;
    /// a reply that is not a verdict is not an error.
    pub async fn review(&self, root: &Path, summary: &str, files_changed: &[String]) -> Result<Verdict> {
        if !self.settings.enabled {
            return Ok(Verdict {
                approved: true,
                grade: "n/a".into(),
                issues: vec![],
                must_fix: vec![],
                feedback: "review disabled".into(),
                requires_more_work: false,
            });
        }

        let context = self.gather_context(root, files_changed).await;
        let prompt = format!("## Summary from the agent\n{summary}\n\n{context}");
        let generation = self
            .adapter
            .complete_once(
                &self.settings.model,
                REVIEW_SYSTEM_PROMPT,
                &[Message::text(Role::User, prompt)],
                self.settings.max_tokens,
            )
            .await?;

        let verdict = Verdict::parse(&generation.content);
        info!(
            approved = verdict.approved,
            grade = %verdict.grade,
            must_fix = verdict.must_fix.len(),
            "review finished"
        );
        Ok(verdict)
    }

    async fn gather_context(&self, root: &Path, files_changed: &[String]) -> String {
        let fs = ProjectFs::new(root);
        let mut out = String::new();

        let manifests = fs.manifests().await;
        if !manifests.is_empty() {
            out.push_str(&format!("## Project manifests\n{}\n\n", manifests.join(", ")));
        }
        if let Ok(entries) = fs.list(".", 200, true).await {
            let files = entries.iter().filter(|e| !e.is_dir).count();
            out.push_str(&format!("## Project size\n{files} files\n\n"));
        }

        out.push_str("## Changed files\n");
        if files_changed.is_empty() {
            out.push_str("(none listed)\n");
        }
        for path in files_changed.iter().take(self.settings.max_files) {
            match fs.read_capped(path, self.settings.max_file_bytes).await {
                Ok(file) => {
                    let marker = if file.truncated { " (truncated)" } else { "" };
                    out.push_str(&format!("\n### {path}{marker}\n```\n{}\n```\n", file.content));
                }
                Err(e) => out.push_str(&format!("\n### {path}\n(unreadable: {e})\n")),
            }
        }
        if files_changed.len() > self.settings.max_files {
            out.push_str(&format!(
                "\n({} more files not shown)\n",
                files_changed.len() - self.settings.max_files
            ));
        }
        out
    }
}
