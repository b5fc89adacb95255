pub mod command;
pub mod config;
pub mod ecs;
pub mod galaxy;
pub mod identity;
mod locks;
pub mod migration;
pub mod pipeline;
pub mod shadow;
pub mod star_system;

pub use command::{
    ensure_local, revalidate, revalidate_all, Command, CommandError, CommandQueue, SubmitError,
    DEFAULT_COMMAND_CAPACITY,
};
pub use config::{ConfigError, GalaxyConfig, CONFIG_ENV_VAR, NANOS_PER_SECOND};
pub use ecs::{
    Component, ComponentRegistry, ComponentRegistryBuilder, ComponentTypeId, DerivedState,
    EntityBitSet, EntityId, MirrorComponent, OwnerIndex, SpatialGrid, World, WorldError,
};
pub use galaxy::{
    ClockStep, GalacticContext, GalacticSubsystem, Galaxy, GalaxyBuilder, GalaxyClock,
    GalaxyError, GalaxyMetricsSnapshot, GalaxyState, MetricsHandle, SpeedControl, TickReport,
    SPEED_STEPS,
};
pub use identity::{
    EmpireId, EntityReference, EntityUuid, IdentityResolver, Resolution, StarSystemId,
    UuidComponent,
};
pub use migration::{MigratingEntity, MigrationError};
pub use pipeline::{
    DailyGate, IntervalGate, Phase, PipelineError, Subsystem, SubsystemError, TickContext,
};
pub use shadow::{Materializer, ShadowWorld, SyncError, SyncStats, SECONDS_PER_DAY};
pub use star_system::{StarSystem, StarSystemBuilder, SystemTickError};
