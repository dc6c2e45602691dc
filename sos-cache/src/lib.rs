//! # SOS Cache - Capabilities cache for a Sensor Observation Service
//!
//! An in-memory index of everything a client can ask an SOS about:
//! offerings, procedures, observable properties, features of interest,
//! result templates and their spatial and temporal extents.
//!
//! - **[`ContentCache`]**: the indexed relations with read accessors,
//!   idempotent mutators and cascading removal
//! - **[`CacheUpdate`]**: one variant per transactional operation plus the
//!   full rebuild from the data source
//! - **[`CacheController`]**: publishes caches, serializes updates and runs
//!   the full-rebuild state machine
//! - **[`snapshot`]**: versioned snapshot files for fast restarts
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use sos_cache::datasource::{InMemoryDataSource, OfferingRecord};
//! use sos_cache::request::{InsertSensorRequest, InsertSensorResponse};
//! use sos_cache::{CacheController, ControllerConfig};
//!
//! let source = Arc::new(InMemoryDataSource::new());
//! let mut offering = OfferingRecord::new("urn:offering:air");
//! offering.procedures.push("urn:procedure:station-1".to_string());
//! source.insert_offering(offering);
//!
//! let controller = CacheController::new(ControllerConfig::default(), source.clone(), source);
//! controller.update_cache_from_datasource().unwrap();
//!
//! controller
//!     .update_after_sensor_insertion(
//!         InsertSensorRequest {
//!             observable_properties: vec!["urn:property:temperature".to_string()],
//!             ..Default::default()
//!         },
//!         InsertSensorResponse {
//!             assigned_procedure: "urn:procedure:station-2".to_string(),
//!             assigned_offering: "urn:offering:station-2".to_string(),
//!         },
//!     )
//!     .unwrap();
//!
//! let cache = controller.cache();
//! assert_eq!(cache.offerings().len(), 2);
//! assert!(cache.has_procedure("urn:procedure:station-2"));
//! ```

pub mod cache;
pub mod config;
pub mod controller;
pub mod datasource;
pub mod error;
pub mod model;
pub mod request;
pub mod scheduler;
pub mod snapshot;
pub mod update;
pub mod workers;

// Re-export main types
pub use cache::{ContentCache, IntegrityViolation, RemovalReport};
pub use config::ControllerConfig;
pub use controller::{CacheController, RebuildState, RebuildStatus, UnitStatus};
pub use datasource::{DataSource, FeatureQueryHandler, InMemoryDataSource};
pub use error::{CacheError, ErrorCategory, OfferingFailure, Result};
pub use model::{Envelope, SpatialEnvelope, TimePeriod};
pub use scheduler::{RebuildScheduler, SchedulerHandle};
pub use snapshot::{FileSnapshotStore, InMemorySnapshotStore, NullSnapshotStore, SnapshotStore};
pub use update::{CacheUpdate, UpdateKind};
