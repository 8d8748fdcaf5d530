use crate::settings;
use colored::Colorize;
use stackflow_config::Settings;
use std::path::Path;

/// Print the effective settings after defaults are applied.
pub fn handle(settings: &Settings, source: Option<&Path>) -> anyhow::Result<()> {
    match source {
        Some(path) => println!("{} {}", "Config file:".blue(), path.display().to_string().cyan()),
        None => println!("{}", "No config file found, using defaults".yellow()),
    }
    println!();

    let run = settings::run_settings(settings);
    let recovery = settings::recovery_config(settings);

    println!("{}", "Orchestration".bold());
    println!("  run timeout:        {:?}", run.run_timeout);
    println!("  reference timeout:  {:?}", run.reference_timeout);
    println!(
        "  convergence poll:   every {:?}, up to {:?}",
        run.poll.interval, run.poll.timeout
    );
    println!("{}", "Recovery".bold());
    println!("  run timeout:        {:?}", recovery.run_timeout);
    println!(
        "  router ACTIVE poll: every {:?}, up to {:?}",
        recovery.router_active.interval, recovery.router_active.timeout
    );
    println!("{}", "Snapshots".bold());
    println!("  directory:          {}", settings.snapshot_dir()?.display());

    if !settings.catalog.non_blocking.is_empty() {
        println!("{}", "Non-blocking edges".bold());
        for edge in &settings.catalog.non_blocking {
            println!("  {} → {}", edge.dependent.cyan(), edge.dependency);
        }
    }
    Ok(())
}
