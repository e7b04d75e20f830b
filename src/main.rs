use std::path::PathBuf;

use anyhow::{Context, bail};

use gridrunner::config::RunConfig;
use gridrunner::grid::{Analyzer, DataSource};
use gridrunner::tasks::TaskGenerator;

fn main() -> anyhow::Result<()> {
    // Kept alive so the file writer flushes on exit.
    let _log_guard = init_tracing();

    let mut args = std::env::args().skip(1);
    let Some(source) = args.next().map(PathBuf::from) else {
        eprintln!("Usage: gridrunner <source.json> [group-index]");
        std::process::exit(2);
    };
    let group = args
        .next()
        .map(|raw| raw.parse::<usize>())
        .transpose()
        .context("group index must be a non-negative integer")?;
    if args.next().is_some() {
        bail!("unexpected extra arguments");
    }

    let config = RunConfig::from_env()?;
    let data = DataSource::from_json_file(&source)
        .with_context(|| format!("failed to load {}", source.display()))?;

    let analyzer = Analyzer::new(config.generator.clone());
    let analysis = analyzer.analyze(&data);
    tracing::info!(
        groups = analysis.groups.len(),
        work_rows = analysis.work_rows.len(),
        "Sheet analyzed"
    );

    let generator = TaskGenerator::new(data.grid(), &analysis);
    let tasks = match group {
        Some(index) => generator.generate_for_group(index)?,
        None => generator.generate_all(),
    };

    for task in &tasks {
        println!("{}", serde_json::to_string(task)?);
    }
    tracing::info!(tasks = tasks.len(), "Plan written");
    Ok(())
}

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match std::env::var("GRIDRUNNER_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "gridrunner.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}
