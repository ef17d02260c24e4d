use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use zodiac_server::batch::{open_record, parse_invocation, run_report, Invocation, ReportArgs};
use zodiac_server::capture::{BackdropView, CaptureScheduler, SystemClock};
use zodiac_server::config::{AppConfig, CONFIG_ENV_VAR};
use zodiac_server::engine::engine_from_config;
use zodiac_server::error_codes::find_coded_error;
use zodiac_server::session::SessionManager;
use zodiac_server::store::RecordStore;

#[derive(Debug, Parser)]
#[command(name = "zodiac-server")]
#[command(about = "Headless chart report pipeline")]
#[command(version = env!("ZODIAC_VERSION"))]
struct Cli {
    /// YAML configuration file.
    #[arg(long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,
    /// Overrides `records_dir` from the configuration.
    #[arg(long)]
    records_dir: Option<PathBuf>,
    /// Print failures as a JSON envelope on stderr.
    #[arg(long)]
    json_errors: bool,
    /// `<record>` to open it, or the sixteen report arguments.
    #[arg(allow_negative_numbers = true)]
    args: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            report_error(&error, cli.json_errors);
            ExitCode::FAILURE
        }
    }
}

fn report_error(error: &anyhow::Error, json: bool) {
    if json {
        if let Some(coded) = find_coded_error(error) {
            match serde_json::to_string(&coded.envelope()) {
                Ok(envelope) => eprintln!("{envelope}"),
                Err(_) => eprintln!("error: {error:#}"),
            }
            return;
        }
    }
    eprintln!("error: {error:#}");
}

fn run(cli: &Cli) -> Result<()> {
    let invocation = parse_invocation(&cli.args).context("invalid batch arguments")?;

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(records_dir) = &cli.records_dir {
        config.records_dir = records_dir.clone();
    }
    let store = RecordStore::new(&config.records_dir);
    let mut session = SessionManager::new(config.session_config());

    match invocation {
        Invocation::Report(args) => run_report_mode(&args, &config, &mut session, &store),
        Invocation::OpenRecord { key } => {
            if open_record(&mut session, &store, &key)? {
                println!("Opened {key}");
            } else {
                println!("Empty session");
            }
            Ok(())
        }
        Invocation::EmptySession { arity } => {
            info!("{} argument(s); starting an empty session", arity);
            println!("Empty session");
            Ok(())
        }
    }
}

fn run_report_mode(
    args: &ReportArgs,
    config: &AppConfig,
    session: &mut SessionManager,
    store: &RecordStore,
) -> Result<()> {
    let background = config.capture_background_rgb()?;
    let mut clock = SystemClock::start();
    let mut engine = engine_from_config(config.engine.as_ref())?;
    let outcome = run_report(args, session, store, engine.as_mut())?;
    println!("Wrote {}", outcome.json_path.display());

    let scheduler = CaptureScheduler::new(
        args.capture_schedule(config.capture_period()),
        args.capture_target(),
    );
    scheduler.run(&mut BackdropView::new(background), &mut clock);
    Ok(())
}
