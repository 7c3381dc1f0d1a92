//! askdb - ask business questions of a SQLite database

mod activity;
mod chat;
mod config;
mod server;

use anyhow::Context as _;
use askdb_agent::{
    Agent, AgentConfig, ProviderTransport, RunOptions, SqlGuard, SqliteDatabase, Transport,
    default_graders,
};
use askdb_ai::{Message, Model};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, Layer, filter::Targets, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// askdb - answers business questions from your data
#[derive(Parser, Debug)]
#[command(name = "askdb")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: ~/.config/askdb/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database to answer from
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Chat model id
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the chat API
    Serve {
        #[arg(long)]
        address: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Answer a single question
    Ask {
        question: String,
        /// Print the SQL that produced the answer
        #[arg(long)]
        show_query: bool,
    },
    /// Interactive question session
    Repl {
        /// Print the SQL that produced each answer
        #[arg(long)]
        show_query: bool,
    },
    /// Write an example config file
    InitConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Command::InitConfig = args.command {
        let path = config::Config::init()?;
        println!("Config file at: {}", path.display());
        println!("\nExample config:\n{}", config::example_config());
        return Ok(());
    }

    let mut cfg = Config::load(args.config.as_deref())?;
    if let Some(database) = args.database {
        cfg.database.path = database;
    }
    if let Some(model) = args.model {
        cfg.model.id = model;
    }

    init_tracing(args.verbose, &cfg)?;

    let agent = Arc::new(build_agent(&cfg)?);
    let _activity = activity::spawn(agent.subscribe());

    match args.command {
        Command::Serve { address, port } => {
            let address = address.unwrap_or_else(|| cfg.server.address.clone());
            let port = port.unwrap_or(cfg.server.port);
            let state = server::AppState {
                agent,
                word_delay: Duration::from_millis(cfg.server.word_delay_ms),
            };
            server::serve(state, &address, port).await
        }
        Command::Ask {
            question,
            show_query,
        } => {
            let options = RunOptions {
                show_query: Some(show_query || cfg.show_query),
                ..Default::default()
            };
            let state = agent
                .run(vec![Message::user(question)], &options, CancellationToken::new())
                .await?;
            println!("{}", state.formatted_response);
            Ok(())
        }
        Command::Repl { show_query } => run_repl(&agent, show_query || cfg.show_query).await,
        Command::InitConfig => Ok(()),
    }
}

/// Stderr logging per `RUST_LOG`, plus the activity records appended to
/// the configured file.
fn init_tracing(verbose: bool, cfg: &Config) -> anyhow::Result<()> {
    let stderr_filter = if verbose {
        EnvFilter::new("askdb=debug,askdb_agent=debug,askdb_ai=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let stderr_filter = stderr_filter.add_directive(format!("{}=off", activity::TARGET).parse()?);

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&cfg.activity_log)
        .with_context(|| format!("Failed to open activity log {}", cfg.activity_log.display()))?;
    let activity_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .with_filter(Targets::new().with_target(activity::TARGET, tracing::Level::INFO));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(stderr_filter),
        )
        .with(activity_layer)
        .init();
    Ok(())
}

fn build_agent(cfg: &Config) -> anyhow::Result<Agent> {
    let db = SqliteDatabase::open(&cfg.database.path)
        .with_context(|| format!("Failed to open database {}", cfg.database.path.display()))?
        .with_max_result_chars(cfg.database.max_result_chars);

    let transport: Arc<dyn Transport> = Arc::new(ProviderTransport::new(cfg.model.api_key()));
    let model = cfg.model.to_model();

    let mut agent_config = AgentConfig::new(model.clone());
    if let Some(prompt) = cfg.system_prompt()? {
        agent_config.system_prompt = prompt;
    }
    agent_config.max_tokens = cfg.model.max_tokens;
    agent_config.temperature = cfg.model.temperature;
    agent_config.grading.enabled = cfg.grading.enabled;
    agent_config.grading.max_retries = cfg.grading.max_retries;
    agent_config.max_turns = cfg.max_turns;
    agent_config.show_query = cfg.show_query;

    let grader_model = match &cfg.grading.model {
        Some(id) => Model {
            id: id.clone(),
            ..model.clone()
        },
        None => model,
    };

    tracing::debug!(
        "askdb using model {} at {}, database {}",
        agent_config.model.id,
        agent_config.model.base_url,
        cfg.database.path.display()
    );

    Ok(Agent::new(agent_config, transport.clone())
        .with_database(Arc::new(db), SqlGuard::new(cfg.database.strict_guard))
        .with_graders(default_graders(transport, grader_model, cfg.grading.temperature)))
}

/// Read questions from stdin, keeping the conversation between them.
async fn run_repl(agent: &Agent, show_query: bool) -> anyhow::Result<()> {
    use std::io::{self, Write};

    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        eprintln!("askdb ({}) - /clear to start over, /exit to quit", agent.config().model.id);
        eprintln!();
    }

    let options = RunOptions {
        show_query: Some(show_query),
        ..Default::default()
    };
    let mut history: Vec<Message> = vec![];

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        match input {
            "" => continue,
            "/exit" | "/quit" => break,
            "/clear" => {
                history.clear();
                println!("Cleared conversation.\n");
                continue;
            }
            _ => {}
        }

        let mut messages = history.clone();
        messages.push(Message::user(input));

        match agent.run(messages, &options, CancellationToken::new()).await {
            Ok(state) => {
                println!("{}\n", state.formatted_response);
                history = state.messages;
            }
            Err(e) => eprintln!("Error: {}\n", e),
        }
    }

    Ok(())
}
