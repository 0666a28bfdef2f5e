//! Desktop AI: application entry.

mod app;

use clap::Parser;
use eframe::egui;
use lib::agent::ChatAgent;
use lib::config::{resolve_database_path, Settings};
use lib::models::ModelDirectory;
use lib::session::SessionStore;
use lib::startup::{check_display, exit_code, resolve_startup_model, StartupError};
use std::path::PathBuf;

const APP_TITLE: &str = "Desktop AI";

#[derive(Parser)]
#[command(name = "dai-desktop")]
#[command(about = "Desktop AI chat window", long_about = None)]
struct Args {
    /// Config file path (default: DAI_CONFIG_PATH or ~/.config/desktop-ai/config.json)
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Detach from the terminal before opening the window.
    #[arg(long)]
    daemon: bool,
}

fn main() {
    let args = Args::parse();

    // Must happen before any thread exists.
    if args.daemon {
        if let Err(e) = lib::lifecycle::daemonize() {
            eprintln!("failed to detach: {}", e);
            std::process::exit(exit_code::GENERAL);
        }
    }
    app::install_logger();

    let code = match run(args.config) {
        Ok(()) => 0,
        Err(code) => code,
    };
    if code != 0 {
        std::process::exit(code);
    }
}

fn native_options(size: [f32; 2], min_size: [f32; 2]) -> eframe::NativeOptions {
    eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size(size)
            .with_min_inner_size(min_size),
        ..Default::default()
    }
}

fn show_fatal_dialog(message: String) {
    let shown = eframe::run_native(
        APP_TITLE,
        native_options([480.0, 200.0], [360.0, 160.0]),
        Box::new(move |_cc| Box::new(app::FatalDialog::new(message))),
    );
    if let Err(e) = shown {
        log::warn!("could not show error dialog: {}", e);
    }
}

/// Report a startup failure: log, stderr, and a dialog when a display exists.
fn fail(err: StartupError) -> i32 {
    log::error!("startup failed: {}", err);
    eprintln!("{}", err);
    if err != StartupError::NoDisplay {
        show_fatal_dialog(err.to_string());
    }
    err.exit_code()
}

fn run(config_path: Option<PathBuf>) -> Result<(), i32> {
    check_display().map_err(fail)?;

    let settings = Settings::load(config_path);
    if !settings.path().exists() {
        settings
            .save()
            .map_err(|e| fail(StartupError::Config(format!("{:#}", e))))?;
    }
    let store = SessionStore::new(resolve_database_path(settings.config()));
    store.init().map_err(|e| {
        fail(StartupError::Config(format!(
            "cannot open history database {}: {}",
            store.path().display(),
            e
        )))
    })?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            log::error!("failed to start runtime: {}", e);
            exit_code::GENERAL
        })?;

    let directory = ModelDirectory::from_config(settings.config());
    let preferred = settings.config().model.clone();
    let model = runtime
        .block_on(resolve_startup_model(&directory, &preferred))
        .map_err(fail)?;
    let models = runtime.block_on(directory.get_models());

    let mut agent_config = settings.agent_config();
    agent_config.model = model;
    let agent = ChatAgent::with_openai(agent_config, store, settings.config().request_timeout());

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        eframe::run_native(
            APP_TITLE,
            native_options([960.0, 720.0], [640.0, 480.0]),
            Box::new(move |cc| {
                Box::new(app::DesktopApp::new(
                    cc, settings, agent, directory, models, runtime,
                ))
            }),
        )
    }));
    match result {
        Ok(Ok(())) => {
            log::info!("desktop exited");
            Ok(())
        }
        Ok(Err(e)) => {
            log::error!("window failed: {}", e);
            eprintln!("error: {}", e);
            Err(exit_code::GENERAL)
        }
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("desktop panicked: {}", detail);
            eprintln!("error: unexpected failure: {}", detail);
            show_fatal_dialog(format!("An unexpected error occurred:\n\n{}", detail));
            Err(exit_code::GENERAL)
        }
    }
}
