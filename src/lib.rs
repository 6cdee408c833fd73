//! artifact-sync - keeps a project's declared binary dependencies present and
//! verified in a local artifact cache.

pub mod app;
pub mod cli;
pub mod config;
pub mod fetch;
pub mod model;
pub mod report;
pub mod repository;
pub mod resolve;
pub mod source;
pub mod sync;
pub mod util;

pub use util::{CapacityManager, UsedCapacity};
