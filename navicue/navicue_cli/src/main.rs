use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use navicue_runtime::{CueCatalog, CueSession, HostContract, RuntimeConfig, SessionOptions};
use navicue_stage::{
    timing::{DEFAULT_ACTIVE_AT, DEFAULT_PRESENT_AT},
    LifecycleTelemetry, Stage,
};
use serde_json::Value;
use shared_diagnostics::{DiagnosticSink, FanoutSink, JsonDiagnosticSink, LineSink};
use shared_event_bus::FileEventPublisher;
use tokio::time::{self, Instant};

mod script;

use script::InputScript;

#[derive(Parser, Debug)]
#[command(name = "navicue", version, about = "Runs NaviCue cues headlessly")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Lists the cues in the catalog.
    List,
    /// Prints the five stages with the default auto-advance offsets.
    Stages,
    /// Mounts a cue and replays scripted input against it.
    Run(RunArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Catalog id of the cue.
    cue: String,
    /// Runtime configuration (TOML).
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSON payload handed to the cue.
    #[arg(long)]
    payload: Option<String>,
    /// Input timeline, e.g. `tap@4000,hold@4000..6500,choose:calm@3600`.
    #[arg(long, default_value = "")]
    input: InputScript,
    /// Give up if the cue has not completed by this offset.
    #[arg(long, default_value_t = 15_000)]
    until_ms: u64,
    /// JSON-lines lifecycle event log; overrides the config file.
    #[arg(long)]
    event_log: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::List => {
            for id in CueCatalog::new().ids() {
                println!("{id}");
            }
            Ok(())
        }
        Commands::Stages => {
            for stage in Stage::ALL {
                let note = match stage {
                    Stage::Arriving => "at mount".to_string(),
                    Stage::Present => format!("auto at {} ms", DEFAULT_PRESENT_AT.as_millis()),
                    Stage::Active => format!("auto at {} ms", DEFAULT_ACTIVE_AT.as_millis()),
                    Stage::Resonant | Stage::Afterglow => "set by the cue".to_string(),
                };
                println!("{:<9} {note}", stage.as_str());
            }
            Ok(())
        }
        Commands::Run(args) => handle_run(args).await,
    }
}

async fn handle_run(args: RunArgs) -> Result<()> {
    let config = args
        .config
        .as_ref()
        .map(RuntimeConfig::load)
        .transpose()?
        .unwrap_or_default();
    let payload = match &args.payload {
        Some(raw) => serde_json::from_str(raw).context("parsing --payload")?,
        None => Value::Null,
    };

    let cue = CueCatalog::new().build(&args.cue, &payload)?;
    let timing = config.timing_for(cue.id(), cue.timing());
    if config.overrides_timing(cue.id()) {
        tracing::info!(cue = %args.cue, ?timing, "timing overridden by config");
    }

    let start = Instant::now();
    let mut options = SessionOptions::new().timing(timing).observer(move |change| {
        println!(
            "{:>6} ms  stage {} -> {}",
            start.elapsed().as_millis(),
            change.from,
            change.to
        );
    });
    if let Some(sink) = diagnostics_sink(&config)? {
        options = options.diagnostics(sink);
    }
    let telemetry = if let Some(path) =
        args.event_log.clone().or_else(|| config.events.log_path.clone())
    {
        let publisher = FileEventPublisher::new(&path)
            .with_context(|| format!("opening event log {}", path.display()))?;
        let telemetry = LifecycleTelemetry::builder("navicue.cli")
            .event_publisher(Arc::new(publisher))
            .build()?;
        options = options.telemetry(telemetry.clone());
        Some(telemetry)
    } else {
        None
    };

    let host = HostContract::new().payload(payload).on_complete(move || {
        println!("{:>6} ms  completed", start.elapsed().as_millis());
    });
    println!("{:>6} ms  stage {}", 0, Stage::Arriving);
    let mut session = CueSession::mount(cue, host, options)?;
    tracing::info!(cue = %args.cue, ?timing, steps = args.input.steps().len(), "running cue");

    let deadline = start + Duration::from_millis(args.until_ms);
    for step in args.input.steps() {
        let at = start + step.at;
        if at > deadline || session.is_complete() {
            break;
        }
        tokio::select! {
            () = time::sleep_until(at) => {
                println!("{:>6} ms  input {}", step.at.as_millis(), step.input.kind());
                session.send_input(step.input.clone())?;
            }
            () = session.completed() => break,
        }
    }
    let completed = time::timeout_at(deadline, session.completed()).await.is_ok();

    let report = session.unmount();
    tracing::info!(cue = %args.cue, cancelled = report.cancelled, fired = report.fired, "unmounted");
    if let Some(telemetry) = &telemetry {
        telemetry.flush().await;
    }

    if !completed {
        bail!(
            "cue `{}` did not complete within {} ms (stage {})",
            args.cue,
            args.until_ms,
            session.stage()
        );
    }
    Ok(())
}

fn diagnostics_sink(config: &RuntimeConfig) -> Result<Option<Arc<dyn DiagnosticSink>>> {
    let mut fanout = FanoutSink::new();
    if config.diagnostics.echo_stdout {
        fanout = fanout.with(Arc::new(LineSink::stdout()));
    }
    if let Some(path) = &config.diagnostics.journal_path {
        let journal = JsonDiagnosticSink::new(path)
            .with_context(|| format!("opening diagnostic journal {}", path.display()))?;
        fanout = fanout.with(Arc::new(journal));
    }
    if fanout.is_empty() {
        return Ok(None);
    }
    Ok(Some(Arc::new(fanout)))
}
