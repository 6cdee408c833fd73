//! Concurrency utilities shared by the fetch and sync subsystems.

pub mod capacity_manager;
pub mod completion;
pub mod dedup;

pub use capacity_manager::{CapacityManager, UsedCapacity};
pub use completion::Completion;
pub use dedup::{Dedup, LeaderAbandoned};
