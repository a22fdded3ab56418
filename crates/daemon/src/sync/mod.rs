//! Catalog synchronization
//!
//! The [`Synchronizer`] owns the record set. Each refresh cycle lists every
//! configured category, enriches and stores the ready files, publishes a
//! rebuilt [`common::FilesystemIndex`] per category, then reconciles mirror
//! links. A failing category keeps its previous snapshot.

mod enrich;
mod events;
mod scheduler;
mod synchronizer;

pub use enrich::Enricher;
pub use events::SyncEvent;
pub use scheduler::{spawn_scheduler, SchedulerConfig, SyncDispatcher, SyncReceiver, SyncRequest};
pub use synchronizer::{
    CategoryFailure, CategoryReport, CycleOutcome, CycleReport, CycleRequest, SyncError,
    SyncPhase, SyncSettings, Synchronizer,
};
