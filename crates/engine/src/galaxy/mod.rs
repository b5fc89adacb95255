mod clock;
mod control;
mod metrics;

use std::any::Any;
use std::cmp::Reverse;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::command::{Command, SubmitError};
use crate::config::GalaxyConfig;
use crate::ecs::ComponentRegistry;
use crate::identity::{EntityReference, IdentityResolver, StarSystemId};
use crate::locks;
use crate::migration::MigratingEntity;
use crate::pipeline::{SubsystemError, TickContext};
use crate::shadow::{SyncStats, SECONDS_PER_DAY};
use crate::star_system::{StarSystem, StarSystemBuilder, SystemTickError};

pub use clock::{ClockStep, GalaxyClock};
pub use control::{SpeedControl, SPEED_STEPS};
pub use metrics::{GalaxyMetricsSnapshot, MetricsHandle};

use metrics::MetricsAccumulator;

const MIN_SLEEP: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum GalaxyError {
    #[error("galaxy halted after an invariant violation; it cannot be resumed")]
    Halted,
    #[error("galaxy scheduler thread is already running")]
    AlreadyRunning,
    #[error("unknown star system {0}")]
    UnknownSystem(StarSystemId),
    #[error("galaxy has no star systems")]
    Empty,
    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] ThreadPoolBuildError),
    #[error("failed to spawn galaxy thread: {0}")]
    SpawnThread(#[source] std::io::Error),
    #[error(transparent)]
    SystemTick(#[from] SystemTickError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GalaxyState {
    Running,
    Paused,
    Halted,
}

/// Cross-system bookkeeping run after every system finished a tick.
pub trait GalacticSubsystem: Send {
    fn name(&self) -> &'static str;

    fn process(&mut self, ctx: &GalacticContext<'_>) -> Result<(), SubsystemError>;
}

pub struct GalacticContext<'a> {
    pub time: u64,
    pub tick_size: u32,
    pub resolver: &'a IdentityResolver,
    pub systems: &'a [StarSystem],
}

impl GalacticContext<'_> {
    pub fn day(&self) -> u64 {
        self.time / SECONDS_PER_DAY
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub time: u64,
    pub tick_size: u32,
    pub duration: Duration,
    pub failed: Vec<StarSystemId>,
    pub migrations: usize,
    pub state: GalaxyState,
}

struct GlobalState {
    subsystems: Vec<Box<dyn GalacticSubsystem>>,
    /// Migrants whose target failed its tick; retried after the next one.
    held: Vec<MigratingEntity>,
}

struct GalaxyShared {
    config: GalaxyConfig,
    systems: Vec<StarSystem>,
    resolver: IdentityResolver,
    control: SpeedControl,
    time: AtomicU64,
    global: Mutex<GlobalState>,
    schedule: Mutex<Vec<usize>>,
    pool: ThreadPool,
    metrics: MetricsHandle,
    accumulator: Mutex<MetricsAccumulator>,
}

pub struct GalaxyBuilder {
    config: GalaxyConfig,
    registry: Arc<ComponentRegistry>,
    systems: Vec<StarSystemBuilder>,
    galactic: Vec<Box<dyn GalacticSubsystem>>,
}

impl GalaxyBuilder {
    /// Every star system shares `registry`, so component ids agree across
    /// systems and migrating entities keep their component types.
    pub fn new(config: GalaxyConfig, registry: Arc<ComponentRegistry>) -> Self {
        Self {
            config: config.normalized(),
            registry,
            systems: Vec::new(),
            galactic: Vec::new(),
        }
    }

    pub fn add_system(&mut self, system: StarSystemBuilder) -> StarSystemId {
        let id = StarSystemId(self.systems.len() as u32);
        self.systems.push(system);
        id
    }

    pub fn add_galactic_subsystem(&mut self, subsystem: impl GalacticSubsystem + 'static) {
        self.galactic.push(Box::new(subsystem));
    }

    pub fn build(self) -> Result<Galaxy, GalaxyError> {
        if self.systems.is_empty() {
            return Err(GalaxyError::Empty);
        }
        let worker_threads = self.config.resolved_worker_threads();
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_threads)
            .thread_name(|index| format!("galaxy-worker-{index}"))
            .build()?;

        let capacity = self.config.command_queue_capacity;
        let systems = self
            .systems
            .into_iter()
            .enumerate()
            .map(|(index, builder)| {
                builder.build(StarSystemId(index as u32), &self.registry, capacity)
            })
            .collect::<Vec<_>>();
        let resolver = IdentityResolver::new(
            systems
                .iter()
                .map(|system| Arc::clone(system.shadow()))
                .collect(),
        );

        info!(
            systems = systems.len(),
            worker_threads,
            speed_nanos = self.config.initial_speed_nanos,
            max_tick_seconds = self.config.max_tick_seconds,
            "galaxy_config"
        );

        let shared = GalaxyShared {
            control: SpeedControl::new(self.config.initial_speed_nanos),
            schedule: Mutex::new((0..systems.len()).collect()),
            accumulator: Mutex::new(MetricsAccumulator::new(self.config.metrics_log_interval())),
            config: self.config,
            systems,
            resolver,
            time: AtomicU64::new(0),
            global: Mutex::new(GlobalState {
                subsystems: self.galactic,
                held: Vec::new(),
            }),
            pool,
            metrics: MetricsHandle::default(),
        };
        Ok(Galaxy {
            shared: Arc::new(shared),
            thread: None,
        })
    }
}

/// A set of star systems advanced in lockstep by one scheduler.
pub struct Galaxy {
    shared: Arc<GalaxyShared>,
    thread: Option<JoinHandle<()>>,
}

impl Galaxy {
    /// Spawns the scheduler thread.
    pub fn start(&mut self) -> Result<(), GalaxyError> {
        if self.thread.is_some() {
            return Err(GalaxyError::AlreadyRunning);
        }
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("galaxy".to_string())
            .spawn(move || run_loop(&shared))
            .map_err(GalaxyError::SpawnThread)?;
        self.thread = Some(handle);
        Ok(())
    }

    /// Stops the scheduler thread after its current iteration.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        self.shared.control.request_shutdown();
        if handle.join().is_err() {
            error!("galaxy_thread_panicked");
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Runs exactly one tick on the calling thread. Refused while the
    /// scheduler thread owns the clock.
    pub fn step(&self, tick_size: u32) -> Result<TickReport, GalaxyError> {
        if self.thread.is_some() {
            return Err(GalaxyError::AlreadyRunning);
        }
        if self.shared.control.is_halted() {
            return Err(GalaxyError::Halted);
        }
        let tick_size = tick_size.clamp(
            self.shared.config.min_tick_seconds,
            self.shared.config.max_tick_seconds,
        );
        Ok(self.shared.run_tick(tick_size))
    }

    pub fn state(&self) -> GalaxyState {
        self.shared.state()
    }

    pub fn time(&self) -> u64 {
        self.shared.time.load(Ordering::Acquire)
    }

    pub fn day(&self) -> u64 {
        self.time() / SECONDS_PER_DAY
    }

    pub fn control(&self) -> &SpeedControl {
        &self.shared.control
    }

    pub fn pause(&self) {
        if self.shared.control.pause() {
            info!(time = self.time(), "galaxy_paused");
        }
    }

    pub fn resume(&self) -> Result<(), GalaxyError> {
        if self.shared.control.is_halted() {
            return Err(GalaxyError::Halted);
        }
        if self.shared.control.resume() {
            info!(time = self.time(), "galaxy_resumed");
        }
        Ok(())
    }

    pub fn set_speed(&self, nanos: u64) {
        self.shared.control.set_speed(nanos);
        info!(speed_nanos = nanos, "galaxy_speed_changed");
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.shared.resolver
    }

    pub fn systems(&self) -> &[StarSystem] {
        &self.shared.systems
    }

    pub fn system(&self, id: StarSystemId) -> Option<&StarSystem> {
        self.shared.systems.get(id.index())
    }

    pub fn metrics(&self) -> MetricsHandle {
        self.shared.metrics.clone()
    }

    pub fn submit(
        &self,
        system: StarSystemId,
        command: Box<dyn Command>,
    ) -> Result<(), SubmitError> {
        match self.system(system) {
            Some(target) => target.submit(command),
            None => Err(SubmitError::UnknownSystem { system, command }),
        }
    }

    /// Edits a system's live world between ticks and publishes its shadow.
    pub fn populate<R>(
        &self,
        system: StarSystemId,
        f: impl FnOnce(&mut TickContext<'_>) -> R,
    ) -> Result<R, GalaxyError> {
        let target = self
            .system(system)
            .ok_or(GalaxyError::UnknownSystem(system))?;
        Ok(target.populate(&self.shared.resolver, f)?)
    }

    /// Current task order, slowest system first.
    pub fn schedule(&self) -> Vec<StarSystemId> {
        locks::lock(&self.shared.schedule, "galaxy_schedule")
            .iter()
            .map(|index| StarSystemId(*index as u32))
            .collect()
    }

    /// Resolves a reference against every published shadow.
    pub fn resolve(&self, reference: &mut EntityReference) -> bool {
        self.shared.resolver.resolve(reference).is_resolved()
    }
}

impl Drop for Galaxy {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl GalaxyShared {
    fn state(&self) -> GalaxyState {
        if self.control.is_halted() {
            GalaxyState::Halted
        } else if self.control.is_paused() {
            GalaxyState::Paused
        } else {
            GalaxyState::Running
        }
    }

    fn run_tick(&self, tick_size: u32) -> TickReport {
        let started = Instant::now();
        let time = self
            .time
            .fetch_add(u64::from(tick_size), Ordering::AcqRel)
            + u64::from(tick_size);
        let order = locks::lock(&self.schedule, "galaxy_schedule").clone();

        let outcomes = self.pool.install(|| {
            order
                .par_iter()
                .map(|index| self.run_system(&self.systems[*index], tick_size, time))
                .collect::<Vec<_>>()
        });

        let mut failed = Vec::new();
        let mut fatal = false;
        for outcome in outcomes {
            let Err(error) = outcome else {
                continue;
            };
            if error.is_fatal() {
                fatal = true;
                error!(system = %error.system(), error = %error, "galaxy_invariant_violation");
            } else {
                error!(system = %error.system(), error = %error, "system_tick_failed");
            }
            failed.push(error.system());
        }

        let mut global_failed = false;
        let mut global = locks::lock(&self.global, "galaxy_global");
        let (migrations, delivery_errors) = self.deliver_migrations(&mut global.held, &failed);
        for error in delivery_errors {
            fatal |= error.is_fatal();
            global_failed = true;
            error!(system = %error.system(), error = %error, "migration_delivery_failed");
        }
        if failed.is_empty() && !global_failed {
            let ctx = GalacticContext {
                time,
                tick_size,
                resolver: &self.resolver,
                systems: &self.systems,
            };
            for subsystem in &mut global.subsystems {
                if let Err(error) = subsystem.process(&ctx) {
                    global_failed = true;
                    error!(
                        subsystem = subsystem.name(),
                        error = %error,
                        "galactic_subsystem_failed"
                    );
                    break;
                }
            }
        }
        drop(global);

        if fatal {
            self.control.halt();
            error!(time, "galaxy_halted");
        } else if (!failed.is_empty() || global_failed) && self.control.pause() {
            warn!(time, failed = failed.len(), "galaxy_paused_on_failure");
        }

        let duration = started.elapsed();
        self.reorder_schedule(tick_size);
        self.record_metrics(duration, tick_size, time);

        TickReport {
            time,
            tick_size,
            duration,
            failed,
            migrations,
            state: self.state(),
        }
    }

    fn run_system(
        &self,
        system: &StarSystem,
        tick_size: u32,
        time: u64,
    ) -> Result<SyncStats, SystemTickError> {
        panic::catch_unwind(AssertUnwindSafe(|| {
            system.tick(tick_size, time, &self.resolver)
        }))
        .unwrap_or_else(|payload| {
            Err(SystemTickError::Panicked {
                system: system.id(),
                message: panic_message(payload.as_ref()),
            })
        })
    }

    /// Moves migrants out of every source that completed its tick and lands
    /// them in targets that completed theirs. Migrants bound for a failed
    /// target stay in `held` and keep resolving as in transit.
    fn deliver_migrations(
        &self,
        held: &mut Vec<MigratingEntity>,
        failed: &[StarSystemId],
    ) -> (usize, Vec<SystemTickError>) {
        for source in &self.systems {
            if failed.contains(&source.id()) {
                continue;
            }
            for migrant in source.take_migrants() {
                self.resolver.begin_transit(migrant.uuid, migrant.target);
                held.push(migrant);
            }
        }

        let mut delivered = 0;
        let mut errors: Vec<SystemTickError> = Vec::new();
        for migrant in std::mem::take(held) {
            let Some(target) = self.systems.get(migrant.target.index()) else {
                warn!(
                    uuid = %migrant.uuid,
                    target = migrant.target.0,
                    "migration_target_missing"
                );
                self.resolver.end_transit(&migrant.uuid);
                continue;
            };
            let blocked = failed.contains(&target.id())
                || errors.iter().any(|error| error.system() == target.id());
            if blocked {
                debug!(uuid = %migrant.uuid, target = migrant.target.0, "migration_held");
                held.push(migrant);
                continue;
            }
            let uuid = migrant.uuid;
            match target.receive(migrant, &self.resolver) {
                Ok(_) => {
                    self.resolver.end_transit(&uuid);
                    delivered += 1;
                }
                Err(error) => errors.push(error),
            }
        }
        (delivered, errors)
    }

    /// Slowest system first; durations within a tenth of the tick budget
    /// count as equal and keep their relative order.
    fn reorder_schedule(&self, tick_size: u32) {
        let budget = self
            .control
            .speed_nanos()
            .unsigned_abs()
            .saturating_mul(u64::from(tick_size));
        let bucket = (budget / 10).max(1);
        let mut schedule = locks::lock(&self.schedule, "galaxy_schedule");
        schedule.sort_by_key(|index| {
            let nanos = self.systems[*index].last_update().as_nanos() as u64;
            Reverse(nanos / bucket)
        });
    }

    fn record_metrics(&self, duration: Duration, tick_size: u32, time: u64) {
        let budget = Duration::from_nanos(
            self.control
                .speed_nanos()
                .unsigned_abs()
                .saturating_mul(u64::from(tick_size)),
        );
        let mut accumulator = locks::lock(&self.accumulator, "galaxy_metrics");
        accumulator.record_tick(duration, duration > budget);
        if let Some(snapshot) =
            accumulator.maybe_snapshot(Instant::now(), time, self.resolver.global_scans())
        {
            self.metrics.publish(snapshot);
            info!(
                tps = snapshot.tps,
                tick_time_ms = snapshot.tick_time_ms,
                simulated_time = snapshot.simulated_time,
                speed_limited = snapshot.speed_limited,
                resolver_scans = snapshot.resolver_scans,
                "galaxy_metrics"
            );
        }
    }
}

fn run_loop(shared: &GalaxyShared) {
    info!(systems = shared.systems.len(), "galaxy_started");
    let mut clock = GalaxyClock::new(&shared.config);
    let mut last = Instant::now();

    while !shared.control.is_shutdown() {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(last);
        last = now;

        if shared.control.is_halted() {
            shared.control.sleep(shared.config.paused_poll_interval());
            continue;
        }

        match clock.advance(elapsed, shared.control.speed_nanos()) {
            ClockStep::Tick { tick_size } => {
                let report = shared.run_tick(tick_size);
                debug!(
                    time = report.time,
                    tick_size,
                    duration_us = report.duration.as_micros() as u64,
                    "galaxy_tick"
                );
            }
            ClockStep::Wait(remaining) => {
                if remaining >= MIN_SLEEP {
                    shared.control.sleep(remaining);
                } else {
                    thread::yield_now();
                }
            }
            ClockStep::Paused => shared.control.sleep(shared.config.paused_poll_interval()),
        }
    }
    info!(time = shared.time.load(Ordering::Acquire), "galaxy_stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
