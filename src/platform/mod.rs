pub mod apps;
pub mod broadcaster;
pub mod cache;
pub mod db;
pub mod deployment;
pub mod dual_write;
pub mod engine;
pub mod error;
pub mod log_stream_service;
pub mod observer_registry;
pub mod pg_store;
pub mod platform_service;
pub mod release;
pub mod startup;
pub mod store;

// Re-export commonly used items
pub use broadcaster::{BroadcastMessage, LogBroadcaster};
pub use deployment::{DeploymentHandle, DeploymentOrchestrator};
pub use engine::Engine;
pub use error::PlatformError;
pub use observer_registry::ObserverRegistry;
pub use release::ReleaseSequencer;
pub use startup::{PlatformBuilder, PlatformInstance, RunningPlatformInstance};
pub use store::DurableStore;
