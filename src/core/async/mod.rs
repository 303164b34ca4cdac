//! Concurrent implementations of the core components
//!
//! The async side shares its computation with the single-threaded one and
//! only swaps the state containers:
//!
//! - **AsyncReadingStore**: per-nozzle series in a `DashMap`
//! - **AsyncInventoryTracker**: per-tank entry locks, no global lock
//! - **AsyncReconciliationEngine**: concurrent, time-bounded source fetches
//! - **BatchProcessor**: ingests a batch with one task per station
//! - **WindowScheduler**: runs independent reconciliation units in parallel
//!
//! # Thread Safety
//!
//! - Operations on different stations proceed in parallel
//! - Operations on the same nozzle or tank are serialized
//! - The reconciliation ledger is shared by every unit

pub mod batch_processor;
pub mod engine;
pub mod inventory_tracker;
pub mod reading_store;
pub mod scheduler;

pub use batch_processor::{BatchProcessor, IngestResult};
pub use engine::AsyncReconciliationEngine;
pub use inventory_tracker::AsyncInventoryTracker;
pub use reading_store::AsyncReadingStore;
pub use scheduler::WindowScheduler;
