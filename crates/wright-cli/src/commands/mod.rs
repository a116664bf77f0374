use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use wright_config::{ConfigLoader, WrightConfig};
use wright_core::{Result, WrightError};
use wright_llm::{AnthropicProvider, ModelRouter, OpenAiProvider};
use wright_runtime::AgentRuntime;
use wright_tools::{BuiltinOptions, CommandGuard, ToolRegistry, register_builtins};

mod chat;
mod render;
mod run;

/// Wright: an LLM-driven build agent
#[derive(Parser)]
#[command(name = "wright", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to wright.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one message against a project and print what the agent does
    Run {
        /// Project directory the tools operate in
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
        /// Session ID (a new one is generated if omitted)
        #[arg(short, long)]
        session: Option<String>,
        /// Domain hint passed to the model (e.g. postgres, react)
        #[arg(short, long)]
        domain: Option<String>,
        /// What the agent should do
        #[arg(required = true, trailing_var_arg = true)]
        message: Vec<String>,
    },
    /// Interactive chat with the agent over one session
    Chat {
        /// Project directory the tools operate in
        #[arg(short, long, default_value = ".")]
        project: PathBuf,
        /// Session ID (a new one is generated if omitted)
        #[arg(short, long)]
        session: Option<String>,
        /// Domain hint passed to the model
        #[arg(short, long)]
        domain: Option<String>,
    },
    /// List the tools the model can call
    Tools {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // Resolve log level: --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or(&config.logging.level)
        };
        init_tracing(log_level, &config.logging.format);

        match self.command {
            Commands::Run {
                project,
                session,
                domain,
                message,
            } => run::cmd_run(&config, &project, session, domain, message.join(" ")).await,
            Commands::Chat {
                project,
                session,
                domain,
            } => chat::cmd_chat(&config, &project, session, domain).await,
            Commands::Tools { json } => Self::cmd_tools(&config, json),
            Commands::Config { json } => Self::cmd_config(config, json),
            Commands::Completions { shell } => Self::cmd_completions(shell),
        }
    }

    fn cmd_tools(config: &WrightConfig, json: bool) -> Result<()> {
        let tools = build_tools(config)?;
        let control = wright_runtime::control_specs();

        if json {
            let all: Vec<_> = tools.specs().iter().chain(control.iter()).collect();
            println!("{}", serde_json::to_string_pretty(&all)?);
            return Ok(());
        }

        println!("{}", console::style("Project tools").bold());
        for spec in tools.specs() {
            let marker = if spec.destructive {
                console::style(" (destructive)").red().to_string()
            } else {
                String::new()
            };
            println!("  {}{marker}", console::style(&spec.name).cyan());
            println!("      {}", console::style(&spec.description).dim());
        }
        println!();
        println!("{}", console::style("Control tools").bold());
        for spec in &control {
            println!("  {}", console::style(&spec.name).magenta());
            println!("      {}", console::style(&spec.description).dim());
        }
        Ok(())
    }

    fn cmd_config(config: WrightConfig, json: bool) -> Result<()> {
        let config = redacted(config);
        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| WrightError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_completions(shell: Shell) -> Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "wright", &mut std::io::stdout());
        Ok(())
    }
}

fn init_tracing(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        "json" => builder.json().with_target(true).init(),
        "compact" => builder.compact().with_target(false).init(),
        _ => builder.with_target(false).init(),
    }
}

/// API keys never leave the process.
fn redacted(mut config: WrightConfig) -> WrightConfig {
    for key in [
        &mut config.services.anthropic_api_key,
        &mut config.services.openai_api_key,
    ] {
        if key.is_some() {
            *key = Some("********".into());
        }
    }
    config
}

/// Register a backend for every key in `[services]`.
pub(crate) fn build_router(config: &WrightConfig) -> ModelRouter {
    let mut router = ModelRouter::new();
    let mut registered = 0u32;

    if let Some(key) = &config.services.anthropic_api_key {
        router.add_provider(Arc::new(AnthropicProvider::new(key.clone())));
        registered += 1;
    }
    if let Some(key) = &config.services.openai_api_key {
        let mut provider = OpenAiProvider::new(key.clone());
        if let Some(url) = &config.services.openai_base_url {
            provider = provider.with_base_url(url.clone(), "openai".into());
        }
        router.add_provider(Arc::new(provider));
        registered += 1;
    }

    if registered == 0 {
        let model = &config.agent.model;
        eprintln!("{}", console::style("⚠️  No LLM API keys found.").yellow());
        if model.starts_with("anthropic/") {
            eprintln!("   Add to [services] in wright.toml:  anthropic_api_key = \"sk-ant-...\"");
            eprintln!("   Or set env var: export ANTHROPIC_API_KEY=sk-ant-...");
        } else if model.starts_with("openai/") {
            eprintln!("   Add to [services] in wright.toml:  openai_api_key = \"sk-...\"");
            eprintln!("   Or set env var: export OPENAI_API_KEY=sk-...");
        } else {
            eprintln!("   Add API keys to [services] in wright.toml or set ANTHROPIC_API_KEY / OPENAI_API_KEY.");
        }
        eprintln!();
    }
    router
}

pub(crate) fn build_tools(config: &WrightConfig) -> Result<ToolRegistry> {
    let guard = CommandGuard::with_patterns(&config.tools.denied_patterns)?;
    let mut tools = ToolRegistry::with_guard(guard);
    register_builtins(
        &mut tools,
        &BuiltinOptions {
            allow_commands: config.tools.allow_commands,
            command_timeout: Duration::from_secs(config.tools.command_timeout_secs),
            ..Default::default()
        },
    )?;
    Ok(tools)
}

pub(crate) fn build_runtime(config: &WrightConfig, project: &Path) -> Result<AgentRuntime> {
    AgentRuntime::from_config(config, build_router(config), build_tools(config)?, project)
}

/// Canonical project directory and the id derived from its name.
pub(crate) fn resolve_project(project: &Path) -> Result<(PathBuf, String)> {
    let root = std::fs::canonicalize(project).map_err(|e| {
        WrightError::Config(format!("project directory {}: {e}", project.display()))
    })?;
    if !root.is_dir() {
        return Err(WrightError::Config(format!("{} is not a directory", root.display())));
    }
    let id = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".into());
    Ok((root, id))
}

pub(crate) fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
