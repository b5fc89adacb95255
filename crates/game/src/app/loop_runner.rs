use std::process::ExitCode;
use std::thread;
use std::time::Instant;

use stellar_engine::{GalaxyState, SubmitError};
use tracing::{error, info, warn};

use super::bootstrap::AppWiring;

pub(crate) fn run(app: AppWiring) -> ExitCode {
    let AppWiring {
        mut galaxy,
        orders,
        run_for,
        report_interval,
    } = app;

    if let Err(err) = galaxy.start() {
        error!(error = %err, "galaxy_start_failed");
        return ExitCode::FAILURE;
    }

    for (system, command) in orders {
        let name = command.name();
        match galaxy.submit(system, command) {
            Ok(()) => info!(system = %system, command = name, "order_submitted"),
            Err(SubmitError::QueueFull { capacity, .. }) => {
                warn!(system = %system, command = name, capacity, "order_rejected_queue_full");
            }
            Err(err) => warn!(system = %system, command = name, error = %err, "order_rejected"),
        }
    }

    let started = Instant::now();
    while started.elapsed() < run_for {
        thread::sleep(report_interval.min(run_for.saturating_sub(started.elapsed())));
        if galaxy.state() == GalaxyState::Halted {
            break;
        }
        let snapshot = galaxy.metrics().snapshot();
        info!(
            day = galaxy.day(),
            tps = snapshot.tps,
            tick_time_ms = snapshot.tick_time_ms,
            speed_limited = snapshot.speed_limited,
            "galaxy_status"
        );
    }

    galaxy.shutdown();
    let state = galaxy.state();
    info!(time = galaxy.time(), day = galaxy.day(), state = ?state, "galaxy_run_complete");
    if state == GalaxyState::Halted {
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
