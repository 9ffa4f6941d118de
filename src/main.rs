//! Runbox CLI
//!
//! Thin command-line façade over the execution engine: run one snippet in a
//! throwaway session and print the captured streams.

use clap::{Parser, Subcommand};
use runbox::types::Verbosity;
use runbox::{
    ExecutionEngine, ExecutionOptions, PlacementStrategy, Result, SessionConfig, VERSION,
};

#[derive(Parser)]
#[command(
    name = "runbox",
    version = VERSION,
    about = "Run untrusted code snippets in short-lived containers",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a code snippet in a container
    Run {
        /// Programming language (see `runbox languages`)
        language: String,
        /// Code to execute
        code: String,
        /// Dependencies to install first
        #[arg(short, long)]
        dependency: Vec<String>,
        /// Placement strategy
        #[arg(short, long, default_value = "per-execution")]
        strategy: PlacementStrategy,
        /// Image override
        #[arg(short, long)]
        image: Option<String>,
        /// Keep files the code generated
        #[arg(long)]
        keep_generated: bool,
        /// Per-phase diagnostics
        #[arg(long)]
        debug: bool,
    },

    /// List registered languages
    Languages,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("runbox=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            language,
            code,
            dependency,
            strategy,
            image,
            keep_generated,
            debug,
        } => {
            run_snippet(
                language,
                code,
                dependency,
                strategy,
                image,
                keep_generated,
                debug,
            )
            .await
        }
        Commands::Languages => {
            for name in runbox::languages::names() {
                println!("{}", name);
            }
            Ok(())
        }
    }
}

async fn run_snippet(
    language: String,
    code: String,
    dependencies: Vec<String>,
    strategy: PlacementStrategy,
    image: Option<String>,
    keep_generated: bool,
    debug: bool,
) -> Result<()> {
    let engine = ExecutionEngine::new().await?;
    if debug {
        engine.set_verbosity(Verbosity::Debug);
    }

    let mut config = SessionConfig::new(strategy);
    if let Some(image) = image {
        config = config.with_image(image);
    }
    let session = engine.create_session(config)?;

    let mut options = ExecutionOptions::new(language, code).with_dependencies(dependencies);
    options.keep_generated_files = keep_generated;

    let result = engine.execute_code(&session, options).await;

    // One-shot sessions clean themselves up; everything else is ours
    if strategy != PlacementStrategy::PerExecution {
        if let Err(e) = engine.cleanup_session(&session, keep_generated).await {
            eprintln!("cleanup failed: {}", e);
        }
    }

    let result = result?;
    print!("{}", result.stdout);
    eprint!("{}", result.stderr);
    if !result.generated_files.is_empty() {
        eprintln!("generated files ({}):", result.generated_files.len());
        for path in &result.generated_files {
            eprintln!("  {}", path.display());
        }
    }
    use std::io::Write;
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
    std::process::exit(result.exit_code as i32);
}
