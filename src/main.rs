mod abort;
mod capture;
mod config;
mod planner;
mod predict;
mod scheduler;

use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::planner::{PassPlanner, Plan, PlannerSettings};
use crate::predict::{ElementSource, TleLoader};
use crate::scheduler::Runner;

#[derive(Parser)]
#[command(name = "wxsat-o-mat")]
#[command(about = "Weather satellite pass scheduler and capture pipeline")]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the conflict-free pass timeline for the next hours
    Predict {
        #[arg(long, default_value_t = 24)]
        hours: u32,
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the scheduler until interrupted
    Run,
    /// Validate the configuration and the orbital element files
    Check,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Predict { hours, json } => predict(&config, hours, json),
        Commands::Run => run(&config),
        Commands::Check => check(&config),
    }
}

fn predict(config: &Config, hours: u32, json: bool) -> ExitCode {
    let settings = match PlannerSettings::from_config(config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let planner = PassPlanner::new(settings, TleLoader::new(config.directories.tle.clone()));

    let plan = match planner.plan(Utc::now(), chrono::Duration::hours(hours.into())) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Prediction failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if json {
        match serde_json::to_string_pretty(&plan) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                eprintln!("Failed to serialize plan: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        print_plan(&plan, hours);
    }
    ExitCode::SUCCESS
}

fn print_plan(plan: &Plan, hours: u32) {
    println!("{} passes in the next {}h", plan.passes.len(), hours);
    for pass in &plan.passes {
        println!(
            "  {:<14} AOS {}  TCA {}  LOS {}  peak {:5.1}°  {:>3} min  az {:>3.0}°→{:>3.0}°  {:.4} MHz",
            pass.satellite,
            pass.aos.format("%Y-%m-%d %H:%M:%S"),
            pass.tca.format("%H:%M:%S"),
            pass.los.format("%H:%M:%S"),
            pass.max_elevation_deg,
            pass.duration().num_minutes(),
            pass.aos_azimuth_deg,
            pass.los_azimuth_deg,
            pass.frequency_hz as f64 / 1e6,
        );
    }

    if !plan.dropped.is_empty() {
        println!("Dropped (receiver busy):");
        for dropped in &plan.dropped {
            println!(
                "  {:<14} AOS {}  peak {:5.1}°  overlaps {} ({:.1}°)",
                dropped.pass.satellite,
                dropped.pass.aos.format("%Y-%m-%d %H:%M:%S"),
                dropped.pass.max_elevation_deg,
                dropped.beaten_by.satellite,
                dropped.beaten_by.max_elevation_deg,
            );
        }
    }
}

fn run(config: &Config) -> ExitCode {
    let runner = match Runner::from_config(config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async {
        let (handle, mut signal) = abort::channel();
        tokio::spawn(async move {
            let reason = shutdown_signal().await;
            handle.abort(reason);
        });

        log::info!(
            "Scheduler started for {} ({} satellites enabled)",
            config.station.name.as_deref().unwrap_or("ground station"),
            config.enabled_satellites().count()
        );
        runner.run(&mut signal).await;
    });

    ExitCode::SUCCESS
}

async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "interrupted",
            Err(e) => {
                log::error!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                "terminated"
            }
            Err(e) => {
                log::error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending().await
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<&'static str>();

    tokio::select! {
        reason = ctrl_c => reason,
        reason = terminate => reason,
    }
}

fn check(config: &Config) -> ExitCode {
    println!(
        "Configuration is valid ({} satellites, {} enabled)",
        config.satellites.len(),
        config.enabled_satellites().count()
    );

    let elements = match TleLoader::new(config.directories.tle.clone()).load() {
        Ok(e) => e,
        Err(e) => {
            eprintln!("Cannot load orbital elements: {}", e);
            return ExitCode::FAILURE;
        }
    };
    println!(
        "{} element sets in {}",
        elements.len(),
        config.directories.tle.display()
    );

    let now = Utc::now();
    let max_age = config.planning.max_element_age.as_secs() as i64;
    let mut ok = true;
    for satellite in config.enabled_satellites() {
        let Some(block) = elements.find(&satellite.name) else {
            println!("  {:<14} missing", satellite.name);
            ok = false;
            continue;
        };
        match block.parse() {
            Ok(parsed) => {
                let age = parsed.age(now);
                let stale = if age.num_seconds() > max_age { " (stale)" } else { "" };
                println!(
                    "  {:<14} NORAD {} from {}, epoch {} ({} days old){}",
                    satellite.name,
                    parsed.norad_id(),
                    block.source,
                    parsed.epoch().format("%Y-%m-%d %H:%M"),
                    age.num_days(),
                    stale
                );
            }
            Err(e) => {
                println!("  {:<14} {}", satellite.name, e);
                ok = false;
            }
        }
    }

    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
