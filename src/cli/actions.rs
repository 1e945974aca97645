use anyhow::{Context, Result};
use clap::ArgMatches;
use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use super::{config::DeviceConfig, report::PollReport};
use crate::{api::Session, core::error::EngineError, utils::sleep_for};

const STOP_POLL_STEP: Duration = Duration::from_millis(100);

/// Load the device configuration named on the command line and poll it.
pub fn run(matches: &ArgMatches) -> Result<()> {
    let config_path = matches
        .get_one::<String>("config")
        .context("--config is required")?;
    let config = DeviceConfig::from_file(Path::new(config_path))?;
    let mut session = config
        .build_session()
        .with_context(|| format!("Invalid configuration for device '{}'", config.name))?;

    if matches.get_flag("plan") {
        print_plan(&session);
        return Ok(());
    }

    let json = matches.get_flag("json");
    if matches.get_flag("once") {
        let outcome = session
            .read_cycle()
            .with_context(|| format!("Failed to poll {}", session.describe()))?;
        let report = PollReport::new(&config.name, &outcome, &config.registers, &config.alerts);
        emit(&config, &session, &report, json)?;
        session.disconnect();
        return Ok(());
    }

    let interval = matches
        .get_one::<u64>("interval-ms")
        .copied()
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5));
    run_persistent(&config, &mut session, interval, json)
}

fn run_persistent(
    config: &DeviceConfig,
    session: &mut Session,
    interval: Duration,
    json: bool,
) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("Failed to install Ctrl-C handler")?;
    }

    log::info!(
        "Polling {} ({}) every {:?}",
        config.name,
        session.describe(),
        interval
    );

    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        match session.read_cycle() {
            Ok(outcome) => {
                let report =
                    PollReport::new(&config.name, &outcome, &config.registers, &config.alerts);
                emit(config, session, &report, json)?;
            }
            Err(err @ EngineError::Config { .. }) => {
                return Err(err).context("Polling stopped");
            }
            Err(err) => {
                // The next cycle reconnects.
                log::error!("Poll of {} failed: {}", config.name, err);
            }
        }
        wait_until(started + interval, &running);
    }

    session.disconnect();
    let stats = session.stats();
    log::info!(
        "Stopped polling {}: {} ok, {} cached, {} failed, {} reconnects",
        config.name,
        stats.cycles_ok,
        stats.cycles_cached,
        stats.cycles_failed,
        stats.reconnects
    );
    Ok(())
}

fn emit(config: &DeviceConfig, session: &Session, report: &PollReport, json: bool) -> Result<()> {
    if json {
        let line = serde_json::to_string(report).context("Failed to serialize report")?;
        println!("{line}");
    } else {
        println!("{}", report.render_text(session.registers()));
    }
    log::debug!(
        "{}: {} values, {} errors, {} alerts",
        config.name,
        report.values.len(),
        report.errors.len(),
        report.alerts.codes.len()
    );
    Ok(())
}

fn print_plan(session: &Session) {
    let config = session.config();
    println!(
        "{} groups (max {} words per read, max gap {})",
        session.plan().len(),
        config.max_regs_per_read,
        config.max_gap
    );
    for group in session.plan() {
        println!("  {group}: {}", group.keys.join(", "));
    }
}

fn wait_until(deadline: Instant, running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        sleep_for((deadline - now).min(STOP_POLL_STEP));
    }
}
