use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use restfill::config::{self, Config};
use restfill::example::Example;
use restfill::inference::{Completion, OpenAiClient};
use restfill::interface::{load_catalog, InterfaceFormat};
use restfill::pipeline::{self, Inputs, RunOptions};
use restfill::FillError;

#[derive(Parser, Debug)]
#[command(name = "restfill", version)]
#[command(about = "Fill a REST API test script from one captured request/response example")]
struct Cli {
    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML config file [default: $RESTFILL_CONFIG, then <config dir>/restfill/config.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Match the example to an operation and patch that operation's invocation
    Fill {
        #[command(flatten)]
        matching: MatchArgs,

        /// Draft test script
        #[arg(long)]
        script: PathBuf,

        /// Write the patched script here instead of stdout
        #[arg(long, short, conflicts_with = "in_place")]
        out: Option<PathBuf>,

        /// Overwrite the draft script
        #[arg(long)]
        in_place: bool,
    },
    /// Rank every operation against the example without touching a script
    Match {
        #[command(flatten)]
        matching: MatchArgs,
    },
}

#[derive(Args, Debug)]
struct MatchArgs {
    /// Interface description (catalog YAML/JSON or TypeSpec)
    #[arg(long)]
    interface: PathBuf,

    #[arg(long, value_enum, default_value_t = InterfaceFormat::Auto)]
    interface_format: InterfaceFormat,

    /// Captured example (JSON or YAML)
    #[arg(long)]
    example: PathBuf,

    /// Minimum score for a match
    #[arg(long)]
    threshold: Option<f64>,

    #[arg(long)]
    route_bonus: Option<f64>,

    #[arg(long)]
    verb_bonus: Option<f64>,

    /// Ask the configured language model to break ties
    #[arg(long)]
    assist: bool,

    /// OpenAI-compatible chat completions URL (implies --assist)
    #[arg(long)]
    llm_url: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let kind = err.downcast_ref::<FillError>().map(FillError::kind).unwrap_or("Error");
            eprintln!("restfill: {}: {:#}", kind, err);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "restfill=debug" } else { "restfill=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Config file values, overridden by flags.
fn run_options(cfg: &Config, args: &MatchArgs) -> Result<RunOptions> {
    let mut opts = RunOptions { weights: cfg.matcher, inference: cfg.inference.clone() };
    if let Some(t) = args.threshold {
        opts.weights.threshold = t;
    }
    if let Some(b) = args.route_bonus {
        opts.weights.route_bonus = b;
    }
    if let Some(b) = args.verb_bonus {
        opts.weights.verb_bonus = b;
    }
    if let Some(url) = &args.llm_url {
        opts.inference.url = url.clone();
        opts.inference.enabled = true;
    }
    if args.assist {
        opts.inference.enabled = true;
    }
    config::check_weights(&opts.weights).context("invalid matcher flags")?;
    Ok(opts)
}

fn read(path: &Path, what: &str) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {} {}", what, path.display()))
}

fn execute(cli: Cli) -> Result<()> {
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Fill { matching, script, out, in_place } => {
            let opts = run_options(&cfg, &matching)?;
            let interface = read(&matching.interface, "interface description")?;
            let example = read(&matching.example, "example")?;
            let draft = read(&script, "draft script")?;

            let client = OpenAiClient::new(&opts.inference);
            let completion: Option<&dyn Completion> = opts.inference.enabled.then_some(&client as &dyn Completion);

            let inputs = Inputs {
                interface:        &interface,
                interface_format: matching.interface_format,
                example:          &example,
                script:           &draft,
                script_name:      script.file_name().and_then(|n| n.to_str()),
            };
            let outcome = pipeline::run(&inputs, &opts, completion)
                .with_context(|| format!("filling {}", script.display()))?;

            tracing::info!(
                operation = %outcome.operation,
                line = outcome.report.invocation_line,
                changed = outcome.report.changed,
                "done"
            );

            let target = if in_place { Some(script.as_path()) } else { out.as_deref() };
            match target {
                Some(path) => std::fs::write(path, &outcome.patched)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => {
                    let stdout = std::io::stdout();
                    let mut lock = stdout.lock();
                    lock.write_all(outcome.patched.as_bytes())?;
                    lock.flush()?;
                }
            }
        }
        Command::Match { matching } => {
            let opts = run_options(&cfg, &matching)?;
            let interface = read(&matching.interface, "interface description")?;
            let example = read(&matching.example, "example")?;

            let catalog = load_catalog(&interface, matching.interface_format)?;
            let example = Example::parse(&example)?;

            let client = OpenAiClient::new(&opts.inference);
            let completion: Option<&dyn Completion> = opts.inference.enabled.then_some(&client as &dyn Completion);
            let matched = pipeline::match_example(&catalog, &example, &opts, completion)?;

            println!(
                "{:<40} {:>7} {:>8} {:>9} {:>6} {:>5}",
                "operation", "total", "coverage", "precision", "route", "verb"
            );
            for c in pipeline::scores_of(&matched) {
                println!(
                    "{:<40} {:>7.3} {:>8.3} {:>9.3} {:>6.2} {:>5.2}",
                    c.name, c.score.total, c.score.coverage, c.score.precision, c.score.route_bonus, c.score.verb_bonus
                );
            }
            println!("\nselected: {} ({:?})", matched.selected.name(), matched.resolution);
        }
    }
    Ok(())
}
