use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use theme_assets::config::{Cli, Config};
use theme_assets::pipeline::{BuildReport, BuildStatus, Pipeline};
use theme_assets::resolver::resolve;
use theme_assets::theme::Mode;
use theme_assets::transform::TransformerRegistry;
use theme_assets::watch::{DevSession, LogNotifier};

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::from_cli(cli)?;

    let default_level = if config.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    if !config.root.exists() {
        bail!("Project root not found: {}", config.root.display());
    }

    // Setup Ctrl+C handler
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    // Configure Rayon thread pool
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.jobs)
        .build_global()
        .ok();

    let mut registry = TransformerRegistry::with_builtins();
    for binding in &config.transformers {
        registry
            .bind_command(&binding.id, &binding.command)
            .map_err(|e| anyhow!(e))?;
    }

    let build = resolve(&config.root, &config.request, &config.build_env())
        .with_context(|| format!("Failed to configure theme '{}'", config.request.theme))?;

    if config.verbose {
        eprintln!(
            "Building theme '{}' ({}) with {} worker(s) into {}",
            config.request.theme,
            config.request.mode,
            config.jobs,
            build.output_dir.display()
        );
    }

    let pipeline = Pipeline::new(build, registry, shutdown.clone());

    let report = match config.request.mode {
        Mode::Release => {
            let mut pipeline = pipeline;
            pipeline.run()?
        }
        Mode::Dev => {
            let mut session = DevSession::new(pipeline, LogNotifier);
            let report = session.start()?;
            if !config.once && report.status != BuildStatus::Cancelled {
                print_summary(&report);
                session.watch()?;
                return Ok(if shutdown.load(Ordering::Relaxed) {
                    ExitCode::from(130)
                } else {
                    ExitCode::SUCCESS
                });
            }
            report
        }
    };

    if report.status == BuildStatus::Cancelled {
        eprintln!("\nBuild cancelled");
        return Ok(ExitCode::from(130));
    }

    print_summary(&report);

    Ok(match report.status {
        BuildStatus::Success => ExitCode::SUCCESS,
        BuildStatus::Failed => ExitCode::from(1),
        BuildStatus::Cancelled => ExitCode::from(130),
    })
}

fn print_summary(report: &BuildReport) {
    let secs = report.duration.as_secs_f64();
    let throughput = if secs > 0.0 {
        report.processed.len() as f64 / secs
    } else {
        0.0
    };

    println!(
        "Built {} artifacts ({} bytes) from {} modules in {:.2}s ({:.0} modules/sec)",
        report.artifacts.len(),
        report.output_bytes(),
        report.processed.len(),
        secs,
        throughput
    );

    for artifact in &report.artifacts {
        println!(
            "  {} ({}): {} bytes",
            artifact.logical_name,
            artifact.category,
            artifact.bytes.len()
        );
    }

    for warning in &report.warnings {
        println!("  warning: {warning}");
    }

    for diagnostic in &report.diagnostics {
        println!("  FAILED: {diagnostic}");
    }
}
