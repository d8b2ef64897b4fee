//! # Charging Core
//!
//! Admission-control and pile-dispatch core for an EV charging station.
//!
//! ## Architecture
//!
//! The project follows Clean Architecture principles:
//!
//! - **domain**: Core business entities, types and errors
//! - **application**: Business logic (queueing, dispatch, lifecycle, billing)
//! - **infrastructure**: Storage abstraction and the in-memory backend
//! - **config**: TOML station configuration
//!
//! Requests flow through a single lifecycle: submitted requests enter a
//! per-type FCFS waiting queue, the event-driven [`application::Dispatcher`]
//! binds them to available piles, the [`application::ChargingMonitor`]
//! finalizes sessions when the requested energy has been delivered, and the
//! pure billing engine prices each finished session against the time-of-use
//! tariff table.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::StationConfig;

// Re-export the assembled core and the storage seam for embedders
pub use application::Station;
pub use infrastructure::{InMemoryStore, Storage};
