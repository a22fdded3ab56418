// Engine modules
pub mod catalog;
pub mod database;
pub mod fuse;
pub mod links;
pub mod sync;

// Service wiring
pub mod process;
pub mod service_config;

// App state (configuration, paths)
pub mod state;

// Re-exports for consumers
pub use database::{Database, LinkStore, MetadataStore};
pub use process::{init_tracing, spawn_service, Engine, ServiceError, ShutdownHandle};
pub use service_config::Config as ServiceConfig;
pub use state::{AppState, StateError};
