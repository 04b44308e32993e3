#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::style)]

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use clap::Parser;
use nodesift::cli::{Args, prompt_test_mode};
use nodesift::crlf::CrlfWriter;
use nodesift::generator::{Generator, STAGES};
use tracing::Dispatch;
use tracing::instrument::WithSubscriber;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        // Config and engine failures happen before the global subscriber exists
        if tracing::dispatcher::has_been_set() {
            tracing::error!("Error: {:#}", e);
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

fn level_for(verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    }
}

/// Installs a console layer and, when the file can be created, a CRLF run log
fn init_tracing(verbose: bool, run_log: &Path) {
    let level = level_for(verbose);

    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(level);

    let (file_layer, file_error) = match File::create(run_log)
        .with_context(|| format!("Failed to create run log {:?}", run_log))
    {
        Ok(file) => {
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(CrlfWriter::new(file)))
                .with_filter(level);
            (Some(layer), None)
        }
        Err(e) => (None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        tracing::warn!("{:#}", e);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    // The run log location comes from the config, and nothing may be written
    // before the engine is up, so both happen under a console-only subscriber
    let bootstrap = Dispatch::new(
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_max_level(level_for(args.verbose))
            .finish(),
    );
    let generator = Generator::load(&args.config)
        .with_subscriber(bootstrap.clone())
        .await?;
    let engine = generator.start_engine().with_subscriber(bootstrap).await?;

    init_tracing(args.verbose, &generator.config().run_log_path());

    println!(
        "There are {} stages: {}, {}, {} (optional), {}",
        STAGES.len(),
        STAGES[0],
        STAGES[1],
        STAGES[2],
        STAGES[3],
    );
    let mode = match args.test_mode() {
        Some(mode) => mode,
        None => prompt_test_mode(generator.config().prompt_deadline()).await,
    };

    let report = generator.run_with_engine(mode, engine).await;
    tracing::info!(
        "Run complete: {} nodes written to {:?}",
        report.kept,
        report.document_path
    );

    println!();
    println!("Build and run completed!");
    Ok(())
}
