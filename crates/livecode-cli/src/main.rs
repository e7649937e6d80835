use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use livecode_canvas::{LogicalSize, RecordingSurface, to_svg};
use livecode_core::config::{LoggingConfig, ServerConfig, livecode_url};
use livecode_core::{AuxFile, Config, RunRequest, ServerMessage};
use livecode_editor::{EditorController, EditorOptions, OutputRouter, Sinks};
use livecode_session::{CloseReason, ExecClient, RuntimeOptions, WsConnector};

mod output;

use output::{NoteLog, TerminalSink};

#[derive(Parser)]
#[command(
    name = "livecode",
    about = "Run programs on a LiveCode server and stream their output",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program over a streaming session
    Run(RunArgs),

    /// Run a program through the one-shot HTTP endpoints
    Exec(ExecArgs),

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Source file to run
    path: PathBuf,

    /// Runtime to execute with (default from config)
    #[arg(long)]
    runtime: Option<String>,

    /// Extra file to ship alongside the program (repeatable)
    #[arg(long = "file", value_name = "PATH")]
    files: Vec<PathBuf>,

    /// Environment variable for the program, as KEY=VALUE (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    env: Vec<(String, String)>,

    /// Write the final canvas to this SVG file
    #[arg(long, value_name = "OUT")]
    svg: Option<PathBuf>,

    /// Server base URL or ws:// endpoint (overrides config)
    #[arg(long)]
    url: Option<String>,
}

#[derive(Args)]
struct ExecArgs {
    /// Source file to run
    path: PathBuf,

    /// Runtime to execute with (default from config)
    #[arg(long)]
    runtime: Option<String>,

    /// Environment variable for the program, as KEY=VALUE (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    env: Vec<(String, String)>,

    /// Value for FALCON_MODE in the program's environment
    #[arg(long, conflicts_with = "raw")]
    mode: Option<String>,

    /// Command argument replacing the runtime's default (repeatable)
    #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true, conflicts_with = "raw")]
    args: Vec<String>,

    /// Stream the backend's JSON messages from /exec instead of plain output
    #[arg(long)]
    raw: bool,

    /// Server base URL (overrides config)
    #[arg(long)]
    url: Option<String>,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    init_logging(cli.verbose, config.logging.as_ref())?;
    tracing::debug!(path = %config_path.display(), "Configuration loaded");

    let status = match cli.command {
        Commands::Run(args) => run(&config, args).await?,
        Commands::Exec(args) => exec(&config, args).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
                let (warnings, errors) = config.validate();
                for warning in warnings {
                    eprintln!("warning: {warning}");
                }
                for error in &errors {
                    eprintln!("error: {error}");
                }
                if errors.is_empty() { 0 } else { 1 }
            }
        },
    };

    if status != 0 {
        std::process::exit(status);
    }
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over config and flags.
fn init_logging(verbose: bool, logging: Option<&LoggingConfig>) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let level = if verbose {
                "debug"
            } else {
                logging.and_then(|l| l.level.as_deref()).unwrap_or("warn")
            };
            let mut filter = EnvFilter::new(level);
            for directive in logging.map(|l| l.filters.as_slice()).unwrap_or_default() {
                let directive = directive
                    .parse::<Directive>()
                    .with_context(|| format!("invalid logging filter: {directive}"))?;
                filter = filter.add_directive(directive);
            }
            filter
        }
    };

    let (format, output) = logging
        .map(|l| (l.format.as_str(), l.output.as_str()))
        .unwrap_or(("plain", "stderr"));
    let writer = match output {
        "stdout" => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn run(config: &Config, args: RunArgs) -> anyhow::Result<i32> {
    let code = std::fs::read_to_string(&args.path)
        .with_context(|| format!("failed to read {}", args.path.display()))?;

    let mut options = EditorOptions::from_config(config);
    if let Some(url) = &args.url {
        options.target = livecode_url(url);
    }
    if let Some(runtime) = args.runtime {
        options.runtime = runtime;
    }
    options.code_filename = file_name(&args.path);
    for path in &args.files {
        options.files.push(read_aux_file(path)?);
    }
    options.env.extend(args.env);

    let canvas = Arc::new(Mutex::new(RecordingSurface::new(
        config.canvas.pixel_width,
        config.canvas.pixel_height,
    )));
    let sinks = Sinks::new()
        .with_text(TerminalSink::stdout())
        .with_canvas(canvas.clone())
        .with_audio(NoteLog::default());
    let router = OutputRouter::standard()
        .with_logical_size(LogicalSize::new(
            config.canvas.logical_width,
            config.canvas.logical_height,
        ))
        .with_extension("error", |msg: &ServerMessage, _: &mut Sinks| {
            if let ServerMessage::Error { error } = msg {
                eprintln!("error: {error}");
            }
        })
        .with_extension("debug", |msg: &ServerMessage, _: &mut Sinks| {
            if let ServerMessage::Debug { message } = msg {
                tracing::debug!(%message, "Backend debug message");
            }
        });

    tracing::info!(url = %options.target, runtime = %options.runtime, "Running {}", args.path.display());
    let mut editor = EditorController::new(Arc::new(WsConnector), options)
        .with_source(code)
        .with_sinks(sinks)
        .with_router(router);

    editor.run().await;
    let finished = tokio::select! {
        outcome = editor.run_to_completion() => outcome,
        _ = tokio::signal::ctrl_c() => None,
    };
    let Some(outcome) = finished else {
        editor.stop().await;
        eprintln!("interrupted");
        return Ok(130);
    };

    if let Some(out) = &args.svg {
        let svg = {
            let canvas = canvas.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            to_svg(&canvas)
        };
        std::fs::write(out, svg).with_context(|| format!("failed to write {}", out.display()))?;
        tracing::info!(path = %out.display(), "Canvas written");
    }

    if outcome.exit_status.is_none() && outcome.reason.is_failure() {
        eprintln!("run failed: {:?}", outcome.reason);
    }
    Ok(run_exit_code(outcome.exit_status, &outcome.reason))
}

fn run_exit_code(exit_status: Option<i64>, reason: &CloseReason) -> i32 {
    match exit_status {
        Some(code) => i32::try_from(code).unwrap_or(1),
        None if reason.is_failure() => 1,
        None => 0,
    }
}

/// Plain runs go through `/runtimes/{runtime}` and exit with the program's
/// status; `--raw` streams the JSON messages from `/exec`.
async fn exec(config: &Config, args: ExecArgs) -> anyhow::Result<i32> {
    let code = std::fs::read_to_string(&args.path)
        .with_context(|| format!("failed to read {}", args.path.display()))?;
    let server = match args.url {
        Some(base_url) => ServerConfig { base_url },
        None => config.server.clone(),
    };
    let runtime = args.runtime.as_deref().unwrap_or(config.runtime());
    let client = ExecClient::from_config(&server);
    let mut stdout = std::io::stdout();

    if args.raw {
        let mut request = RunRequest::new(runtime, code);
        request.code_filename = file_name(&args.path);
        request.env.extend(args.env);
        let mut stream = client.exec(&request, true).await?;
        while let Some(chunk) = stream.next().await {
            stdout.write_all(chunk?.as_bytes())?;
            stdout.flush()?;
        }
        return Ok(0);
    }

    let options = RuntimeOptions {
        env: args.env.into_iter().collect(),
        mode: args.mode,
        args: args.args,
    };
    let result = client.run_runtime(runtime, &code, &options).await?;
    stdout.write_all(result.output.as_bytes())?;
    stdout.flush()?;
    if let Some(elapsed) = result.time_taken {
        tracing::info!(?elapsed, "Run finished");
    }
    Ok(exit_code(result.exit_status))
}

/// The server reports -1 when the program never sent a status.
fn exit_code(status: Option<i64>) -> i32 {
    match status {
        Some(code) if code >= 0 => i32::try_from(code).unwrap_or(1),
        _ => 1,
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name().map(|name| name.to_string_lossy().into_owned())
}

fn read_aux_file(path: &Path) -> anyhow::Result<AuxFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let name = file_name(path).with_context(|| format!("not a file: {}", path.display()))?;
    Ok(AuxFile::new(name, contents))
}

fn parse_env(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{s}`")),
    }
}
