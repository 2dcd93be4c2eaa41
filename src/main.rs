//! Yulan - CLI

use std::fs;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use serde::Serialize;
use yulan::resolve::{extract_declarations, ImportKind};
use yulan::runner::{BaseScope, Phase, Pipeline, PipelineState};
use yulan::util::config::{get_config_path, load_or_create_user_config, load_user_config, UserConfig};
use yulan::util::logger;
use yulan::watch::SourceWatcher;
use yulan::{run_file, run_source, NAME, VERSION};

/// Resolve imports from a CDN, evaluate, and report the preview state
#[derive(Parser, Debug)]
#[command(name = "yulan")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Base URL for module specifiers
    #[arg(long, global = true, value_name = "URL")]
    module_cdn: Option<String>,

    /// Base URL for stylesheet specifiers
    #[arg(long, global = true, value_name = "URL")]
    style_cdn: Option<String>,

    /// Do not show the last rendered result while loading or on errors
    #[arg(long, global = true)]
    disable_cache: bool,

    /// Extra base scope entries as a JSON object
    #[arg(long, global = true, value_name = "JSON")]
    scope: Option<String>,

    /// Print states as JSON lines
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a source file once
    Run {
        /// Source file to run
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Evaluate code from the command line
    Eval {
        /// Code to evaluate
        #[arg(value_name = "CODE")]
        code: String,
    },

    /// List the imports of a source file and where they resolve to
    Imports {
        /// Source file to scan
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Re-run a source file every time it changes
    Watch {
        /// Source file to watch
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Show the effective configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },

    /// Print version information
    Version,
}

#[derive(Serialize)]
struct ImportLine<'a> {
    kind: ImportKind,
    specifier: &'a str,
    url: String,
}

/// Config file + environment + CLI flags
fn effective_config(args: &Args) -> Result<UserConfig> {
    let mut config = load_user_config().context("Failed to load config")?;
    config.apply_env();

    if let Some(base) = &args.module_cdn {
        config.cdn.module_base = base.clone();
    }
    if let Some(base) = &args.style_cdn {
        config.cdn.style_base = base.clone();
    }
    if args.disable_cache {
        config.pipeline.disable_cache = true;
    }
    if let Some(scope) = &args.scope {
        let extra: BaseScope =
            serde_json::from_str(scope).context("--scope must be a JSON object")?;
        config.scope.extend(extra);
    }

    Ok(config)
}

fn print_state(
    state: &PipelineState,
    json: bool,
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(state)?);
        return Ok(());
    }

    let phase = state.phase();
    let label = format!("[{}] revision {}", phase, state.revision);
    if std::io::stdout().is_terminal() {
        match phase {
            Phase::Rendered => println!("{}", label.green()),
            Phase::Errored => println!("{}", label.red()),
            Phase::Loading => println!("{}", label.yellow()),
            Phase::Idle => println!("{}", label.dimmed()),
        }
    } else {
        println!("{}", label);
    }

    if let Some(element) = &state.element {
        println!("  element: {}", element);
    }
    for sheet in &state.style_sheets {
        println!("  stylesheet: {} ({} rules)", sheet.href(), sheet.rules().len());
    }
    if let Some(error) = &state.error {
        println!("  error: {}", error);
    }
    Ok(())
}

fn exit_code(state: &PipelineState) -> ExitCode {
    if state.phase() == Phase::Errored {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn watch(
    file: PathBuf,
    config: UserConfig,
    json: bool,
) -> Result<()> {
    let pipeline = Pipeline::http(config.to_pipeline_options(), config.request_timeout())
        .context("Failed to create HTTP client")?;

    let mut watcher = SourceWatcher::new(file.clone(), config.debounce());
    let mut sources = watcher
        .start()
        .with_context(|| format!("Failed to watch: {}", file.display()))?;
    let mut states = pipeline.subscribe();

    let initial = fs::read_to_string(&file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;
    let _ = pipeline.submit(&initial);

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                print_state(&state, json)?;
            }
            source = sources.recv() => match source {
                Some(source) => {
                    let _ = pipeline.submit(&source);
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    watcher.stop();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    logger::init_cli(args.verbose);

    match &args.command {
        Commands::Run { file } => {
            let config = effective_config(&args)?;
            let state = run_file(file, config.to_pipeline_options(), config.request_timeout())
                .await
                .with_context(|| format!("Failed to run: {}", file.display()))?;
            print_state(&state, args.json)?;
            Ok(exit_code(&state))
        }
        Commands::Eval { code } => {
            let config = effective_config(&args)?;
            let state = run_source(code, config.to_pipeline_options(), config.request_timeout())
                .await
                .context("Failed to evaluate code")?;
            print_state(&state, args.json)?;
            Ok(exit_code(&state))
        }
        Commands::Imports { file } => {
            let config = effective_config(&args)?;
            let source = fs::read_to_string(file)
                .with_context(|| format!("Failed to read file: {}", file.display()))?;
            for declaration in extract_declarations(source.trim()) {
                let line = ImportLine {
                    kind: declaration.kind,
                    specifier: &declaration.specifier,
                    url: config.cdn.normalize(&declaration.specifier, declaration.kind),
                };
                if args.json {
                    println!("{}", serde_json::to_string(&line)?);
                } else {
                    println!("{:<10} {:<32} {}", line.kind, line.specifier, line.url);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Watch { file } => {
            let config = effective_config(&args)?;
            watch(file.clone(), config, args.json).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { init } => {
            let (config, path) = if *init {
                let (config, path) =
                    load_or_create_user_config().context("Failed to create config")?;
                (config, Some(path))
            } else {
                (effective_config(&args)?, get_config_path())
            };
            if let Some(path) = path {
                eprintln!("# {}", path.display());
            }
            print!("{}", toml::to_string_pretty(&config).context("Failed to render config")?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
            Ok(ExitCode::SUCCESS)
        }
    }
}
