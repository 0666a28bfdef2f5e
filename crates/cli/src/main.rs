use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use lib::agent::{ChatAgent, ERROR_PREFIX};
use lib::bridge::TaskBridge;
use lib::config::{resolve_database_path, Settings};
use lib::models::ModelDirectory;
use lib::session::{SessionStore, DEFAULT_LIST_LIMIT};
use lib::startup::exit_code;

#[derive(Parser)]
#[command(name = "dai")]
#[command(about = "Desktop AI CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// List models installed on the local model host.
    Models {
        /// Config file path (default: DAI_CONFIG_PATH or ~/.config/desktop-ai/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Print a JSON array instead of one name per line.
        #[arg(long)]
        json: bool,
    },

    /// Browse and manage saved conversations.
    Sessions {
        /// Config file path (default: DAI_CONFIG_PATH or ~/.config/desktop-ai/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[command(subcommand)]
        action: SessionAction,
    },

    /// Send one prompt and print the reply.
    Ask {
        /// Config file path (default: DAI_CONFIG_PATH or ~/.config/desktop-ai/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Continue an existing session instead of starting a new one.
        #[arg(long, value_name = "ID")]
        session: Option<String>,

        /// Model to use for this prompt (not saved).
        #[arg(long, short, value_name = "NAME")]
        model: Option<String>,

        /// Prompt text.
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
    },

    /// Chat interactively. /new starts a new session, /quit exits.
    Chat {
        /// Config file path (default: DAI_CONFIG_PATH or ~/.config/desktop-ai/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Optional existing session id to continue.
        #[arg(long, value_name = "ID")]
        session: Option<String>,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// List sessions, most recently updated first.
    List {
        #[arg(long, short, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
    },
    /// Print the messages of a session.
    Show { id: String },
    /// Delete a session and its messages.
    Delete { id: String },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("dai {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
        Some(Commands::Models { config, json }) => run_models(config, json),
        Some(Commands::Sessions { config, action }) => run_sessions(config, action),
        Some(Commands::Ask {
            config,
            session,
            model,
            prompt,
        }) => run_ask(config, session, model, prompt.join(" ")),
        Some(Commands::Chat { config, session }) => run_chat(config, session),
        None => {
            println!("Run with --help for usage");
            Ok(0)
        }
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            log::error!("{:#}", e);
            eprintln!("error: {:#}", e);
            std::process::exit(exit_code::GENERAL);
        }
    }
}

fn block_on<F: std::future::Future>(future: F) -> anyhow::Result<F::Output> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(rt.block_on(future))
}

fn open_store(settings: &Settings) -> SessionStore {
    let path = resolve_database_path(settings.config());
    log::debug!("conversation database: {}", path.display());
    SessionStore::new(path)
}

fn run_models(config_path: Option<PathBuf>, json: bool) -> anyhow::Result<i32> {
    let settings = Settings::load(config_path);
    let directory = ModelDirectory::from_config(settings.config());
    let (available, models) = block_on(async {
        let available = directory.is_available().await;
        let models = if available {
            directory.get_models().await
        } else {
            Vec::new()
        };
        (available, models)
    })?;

    if !available {
        eprintln!("cannot reach the model host at {}", directory.host());
        return Ok(exit_code::HOST_UNREACHABLE);
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&models)?);
    } else {
        for m in &models {
            let marker = if *m == settings.config().model { "*" } else { " " };
            println!("{} {}", marker, m);
        }
    }
    if models.is_empty() {
        eprintln!("no models installed on {}", directory.host());
        return Ok(exit_code::NO_MODELS);
    }
    Ok(0)
}

fn run_sessions(config_path: Option<PathBuf>, action: SessionAction) -> anyhow::Result<i32> {
    let settings = Settings::load(config_path);
    let store = open_store(&settings);

    match action {
        SessionAction::List { limit } => {
            let now = chrono::Utc::now().naive_utc();
            let sessions = store.list_sessions(limit);
            if sessions.is_empty() {
                println!("No conversations yet.");
            }
            for s in sessions {
                println!(
                    "{}  {:>14}  {:>3} msg  {}",
                    s.session_id,
                    s.relative_time(now),
                    s.message_count,
                    s.preview()
                );
            }
            Ok(0)
        }
        SessionAction::Show { id } => {
            if !store.session_exists(&id) {
                eprintln!("no session {}", id);
                return Ok(exit_code::GENERAL);
            }
            for m in store.get_messages(&id) {
                println!("[{}] {}:", m.created_at.format("%Y-%m-%d %H:%M"), m.role.as_str());
                println!("{}\n", m.content.to_plain_text());
            }
            Ok(0)
        }
        SessionAction::Delete { id } => {
            if store.delete_session(&id) {
                println!("deleted {}", id);
                Ok(0)
            } else {
                eprintln!("no session {}", id);
                Ok(exit_code::GENERAL)
            }
        }
    }
}

fn build_agent(
    settings: &Settings,
    model: Option<String>,
    session: Option<String>,
) -> anyhow::Result<ChatAgent> {
    let mut config = settings.agent_config();
    if let Some(m) = model {
        config.model = m;
    }
    let store = open_store(settings);
    let mut agent = ChatAgent::with_openai(config, store, settings.config().request_timeout());
    if let Some(id) = session {
        if !agent.store().session_exists(&id) {
            anyhow::bail!("no session {}", id);
        }
        agent.load_session(id);
    }
    Ok(agent)
}

/// Run one turn on the task bridge, printing a dot every half second while waiting.
/// A failed request comes back as `Err` carrying the request error.
fn run_turn(
    bridge: &mut TaskBridge<String>,
    agent: &ChatAgent,
    prompt: &str,
) -> anyhow::Result<Result<String, String>> {
    let agent = agent.clone();
    let prompt = prompt.to_string();
    bridge.start_task(move || async move {
        agent
            .try_get_response(&prompt)
            .await
            .map_err(anyhow::Error::from)
    })?;

    let mut waited = Duration::ZERO;
    let event = loop {
        if let Some(event) = bridge.poll() {
            break event;
        }
        std::thread::sleep(Duration::from_millis(50));
        waited += Duration::from_millis(50);
        if waited.as_millis() % 500 == 0 {
            eprint!(".");
            io::stderr().flush().ok();
        }
    };
    if waited >= Duration::from_millis(500) {
        eprintln!();
    }
    Ok(event.dispatch(Ok, Err))
}

fn run_ask(
    config_path: Option<PathBuf>,
    session: Option<String>,
    model: Option<String>,
    prompt: String,
) -> anyhow::Result<i32> {
    let settings = Settings::load(config_path);
    let agent = build_agent(&settings, model, session)?;
    let mut bridge = TaskBridge::new();
    match run_turn(&mut bridge, &agent, &prompt)? {
        Ok(reply) => {
            println!("{}", reply.trim());
            log::info!("session {}", agent.session_id());
            Ok(0)
        }
        Err(e) => {
            eprintln!("{}{}", ERROR_PREFIX, e);
            Ok(exit_code::GENERAL)
        }
    }
}

fn run_chat(config_path: Option<PathBuf>, session: Option<String>) -> anyhow::Result<i32> {
    let settings = Settings::load(config_path);
    let mut agent = build_agent(&settings, None, session)?;
    let mut bridge = TaskBridge::new();
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    println!(
        "model {} | session {} | /new, /help, /quit",
        agent.model(),
        agent.session_id()
    );
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        if input.eq_ignore_ascii_case("/new") {
            agent.reset();
            println!("new session {}", agent.session_id());
            continue;
        }
        if input.eq_ignore_ascii_case("/help") {
            println!("/new   start a new conversation");
            println!("/quit  leave the chat");
            continue;
        }

        match run_turn(&mut bridge, &agent, input) {
            Ok(Ok(reply)) => println!("< {}", reply.trim()),
            Ok(Err(e)) => eprintln!("{}{}", ERROR_PREFIX, e),
            Err(e) => eprintln!("chat error: {:#}", e),
        }
    }
    Ok(0)
}
