use clap::{Parser, Subcommand};
use revsite::{config, output, pipeline, serve};
use std::path::PathBuf;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "revsite")]
#[command(about = "Content-hashed asset pipeline for static websites")]
#[command(long_about = "\
Content-hashed asset pipeline for static websites

Publishes every asset under a name derived from its content and rewrites
every reference to it, so browsers can cache assets forever.

Source structure (defaults):

  src/
  ├── images/          # → build/dist/img/  (hashed, plus .webp of png/jpg)
  ├── css/             # → build/dist/css/  (hashed)
  ├── js/              # → build/dist/js/   (hashed)
  ├── pages/           # → build/dist/      (copied, references rewritten)
  └── static/          # → build/dist/      (copied, references rewritten)

Each asset directory gets a rev-manifest.json mapping original paths to
hashed paths. References that match no manifest entry are reported and
left unchanged.

Run 'revsite gen-config' to generate a documented revsite.toml.")]
#[command(version)]
struct Cli {
    /// Configuration file; relative paths inside it resolve against its directory
    #[arg(long, default_value = "revsite.toml", global = true)]
    config: PathBuf,

    /// Log debug detail to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every stage: clean → assets → copy → rewrite → sitemap
    Build,
    /// Run a single stage against the results of earlier runs
    Stage {
        /// Stage name (see `revsite check`)
        name: String,
    },
    /// Empty the output directory
    Clean,
    /// Validate the configuration and print the stage graph
    Check,
    /// Serve the output directory over HTTP
    Serve,
    /// Print a stock revsite.toml with all options documented
    GenConfig,
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("revsite=debug")
        } else {
            EnvFilter::new("warn")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let site_config = config::load_config(&cli.config)?;
    init_thread_pool(&site_config.processing);
    let pipeline = pipeline::Pipeline::new(&site_config);

    match cli.command {
        Command::Build => {
            pipeline.run_all(output::print_stage_report)?;
            println!("==> Build complete: {}", site_config.output_dir.display());
        }
        Command::Stage { name } => {
            pipeline.run_stage(&name, output::print_stage_report)?;
        }
        Command::Clean => {
            pipeline.run_stage("clean", output::print_stage_report)?;
        }
        Command::Check => {
            println!("==> Checking {}", cli.config.display());
            output::print_plan(pipeline.stages());
            println!("==> Configuration is valid");
        }
        Command::Serve => {
            serve::serve(&site_config)?;
        }
        Command::GenConfig => {}
    }

    Ok(())
}

/// Initialize the rayon thread pool based on processing config.
///
/// Capped at the number of available CPU cores; the config can only lower it.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
