use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use foodharvest::{
    config::{self, Config},
    fetch::{HttpFetcher, DEFAULT_TIMEOUT},
    normalize, Harvester, MissingFieldPolicy, OutputFormat, OutputTarget,
};
use std::{path::PathBuf, time::Duration};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "foodharvest", version, about = "Harvest paginated food/recipe data into tables")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List configured endpoints.
    List {
        /// YAML endpoint file; defaults to the bundled presets.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Harvest one or more endpoints.
    Run {
        #[arg(required = true)]
        names: Vec<String>,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the output path (single endpoint only).
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
        #[arg(long)]
        concurrency: Option<usize>,
        /// Drop items with missing fields instead of failing the run.
        #[arg(long)]
        skip_missing: bool,
        /// HTTP timeout in seconds.
        #[arg(long)]
        timeout: Option<u64>,
        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Split MANUALnn recipe step columns into one row per step.
    NormalizeSteps {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Input delimiter.
        #[arg(long, default_value_t = '\t')]
        delimiter: char,
    },
}

fn load(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(p) => config::load_config(p),
        None => config::presets(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();

    match Cli::parse().command {
        Command::List { config } => {
            let cfg = load(config.as_ref())?;
            for ep in &cfg.endpoints {
                println!(
                    "{:<18} {}",
                    ep.name,
                    ep.description.as_deref().unwrap_or("")
                );
            }
        }

        Command::Run {
            names,
            config,
            output,
            format,
            concurrency,
            skip_missing,
            timeout,
            json,
        } => {
            if output.is_some() && names.len() > 1 {
                bail!("--output can only be used with a single endpoint");
            }
            let cfg = load(config.as_ref())?;
            let timeout = timeout.map(Duration::from_secs).unwrap_or(DEFAULT_TIMEOUT);
            let harvester = Harvester::new(HttpFetcher::new(timeout)?);

            for name in &names {
                let mut spec = cfg.find(name)?.clone();
                if let Some(path) = &output {
                    spec.output.path = path.clone();
                }
                if format.is_some() {
                    spec.output.format = format;
                }
                if let Some(n) = concurrency {
                    spec.concurrency = n;
                }
                if skip_missing {
                    spec.on_missing_field = MissingFieldPolicy::SkipItem;
                }
                let ep = spec.compile()?;

                info!(endpoint = %name, "starting harvest");
                let report = harvester
                    .harvest_to_file(&ep)
                    .await
                    .with_context(|| format!("harvesting `{}`", name))?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
        }

        Command::NormalizeSteps {
            input,
            output,
            delimiter,
        } => {
            if !delimiter.is_ascii() {
                bail!("delimiter must be a single ASCII character");
            }
            let mut target = OutputTarget::csv(&output);
            target.format = OutputFormat::from_path(&output);
            normalize::normalize_steps(&input, delimiter as u8, &target)?;
        }
    }

    info!("all done");
    Ok(())
}
