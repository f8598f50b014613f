mod session;

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

use arbor::config::Config;
use arbor::providers::base::AgentOptions;
use arbor::providers::factory;
use arbor::session::Session;
use arbor::tools::mcp::McpRegistry;
use arbor::tools::runner::ToolRunner;
use arbor::tools::workspace;
use arbor::tools::ToolContext;

#[derive(Parser)]
#[command(name = "arbor", about = "An interactive coding assistant", version)]
struct Cli {
    /// Path to the config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start or resume an interactive session (the default).
    Session {
        /// Backend name from the config file.
        #[arg(long)]
        backend: Option<String>,

        /// Resume an existing session by id.
        #[arg(long)]
        resume: Option<String>,

        /// Run a single prompt and exit instead of going interactive.
        #[arg(long)]
        prompt: Option<String>,
    },
    /// List saved sessions.
    Sessions,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("ARBOR_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command.unwrap_or(Command::Session {
        backend: None,
        resume: None,
        prompt: None,
    }) {
        Command::Sessions => list_sessions(),
        Command::Session {
            backend,
            resume,
            prompt,
        } => run_session(config, backend.as_deref(), resume.as_deref(), prompt).await,
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None => {
            let default = Config::default_path()
                .ok_or_else(|| anyhow!("no config directory available"))?;
            if default.exists() {
                Ok(Config::load(&default)?)
            } else {
                Err(anyhow!(
                    "no config found at {}; create one or pass --config",
                    default.display()
                ))
            }
        }
    }
}

fn list_sessions() -> Result<()> {
    let sessions = Session::list()?;
    if sessions.is_empty() {
        println!("no sessions yet");
        return Ok(());
    }
    for meta in sessions {
        println!(
            "{}  {}  {}",
            meta.id,
            meta.created_at.format("%Y-%m-%d %H:%M"),
            style(meta.backend).dim()
        );
    }
    Ok(())
}

async fn run_session(
    config: Config,
    backend: Option<&str>,
    resume: Option<&str>,
    prompt: Option<String>,
) -> Result<()> {
    let backend_config = config.select_backend(backend)?;

    let mut runner = ToolRunner::new();
    for server_config in &config.mcp_servers {
        let registry = McpRegistry::new(server_config.clone());
        match registry.list_tools().await {
            Ok(tools) => {
                for tool in tools {
                    runner.register(tool);
                }
            }
            Err(err) => {
                // A dead server should not block the session.
                eprintln!(
                    "{} tool server {} unavailable: {err}",
                    style("warning:").yellow(),
                    registry.name()
                );
            }
        }
    }
    // Built-ins go last so they win any name collision.
    workspace::register_builtins(&mut runner);

    let session = match resume {
        Some(id) => Session::resume(id)?,
        None => Session::create(&backend_config.name)?,
    };

    let options = AgentOptions {
        system_prompt: config.system_prompt.clone().unwrap_or_default(),
        tools: runner.specs(),
        history_path: Some(session.history_path()),
    };
    let mut agent = factory::new_agent(backend_config.provider_config(), options)?;

    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let cx = ToolContext::new(cwd);

    match prompt {
        Some(prompt) => session::run_once(agent.as_mut(), &runner, &cx, &prompt).await,
        None => {
            println!(
                "session {} ({})",
                style(&session.meta.id).cyan(),
                backend_config.name
            );
            session::run_interactive(agent.as_mut(), &runner, &cx).await
        }
    }
}
