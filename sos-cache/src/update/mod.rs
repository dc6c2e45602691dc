//! Cache updates
//!
//! A [`CacheUpdate`] is a single-use recipe that mutates a [`ContentCache`].
//! Constructors validate the triggering request, so a constructed update
//! can only fail while executing if it talks to the data source (full
//! rebuild). Partial updates are idempotent per relation key, which is what
//! lets the controller replay them onto a freshly rebuilt cache.

mod observation;
mod rebuild;
mod result_template;
mod sensor;

pub use observation::{ObservationInsertion, ResultInsertion};
pub use rebuild::FullRebuild;
pub use result_template::ResultTemplateInsertion;
pub use sensor::{SensorDeletion, SensorInsertion};

use std::sync::Arc;

use crate::cache::ContentCache;
use crate::datasource::{DataSource, FeatureQueryHandler};
use crate::error::Result;
use crate::request::{
    DeleteSensorRequest, InsertObservationRequest, InsertResultRequest, InsertResultTemplateRequest,
    InsertResultTemplateResponse, InsertSensorRequest, InsertSensorResponse,
};

/// Whether an update replaces the cache or edits it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Builds a new cache from the data source
    Complete,
    /// Applied to the live cache and replayed onto in-flight rebuilds
    Partial,
}

/// A unit of work against a content cache
#[derive(Debug, Clone)]
pub enum CacheUpdate {
    FullRebuild(FullRebuild),
    SensorInsertion(SensorInsertion),
    SensorDeletion(SensorDeletion),
    ObservationInsertion(ObservationInsertion),
    ResultTemplateInsertion(ResultTemplateInsertion),
    ResultInsertion(ResultInsertion),
}

impl CacheUpdate {
    pub fn full_rebuild(
        source: Arc<dyn DataSource>,
        features: Arc<dyn FeatureQueryHandler>,
        threads: usize,
        default_epsg: i32,
    ) -> Self {
        CacheUpdate::FullRebuild(FullRebuild::new(source, features, threads, default_epsg))
    }

    pub fn sensor_insertion(request: InsertSensorRequest, response: InsertSensorResponse) -> Result<Self> {
        Ok(CacheUpdate::SensorInsertion(SensorInsertion::new(request, response)?))
    }

    pub fn sensor_deletion(request: DeleteSensorRequest) -> Result<Self> {
        Ok(CacheUpdate::SensorDeletion(SensorDeletion::new(request)?))
    }

    pub fn observation_insertion(request: InsertObservationRequest) -> Result<Self> {
        Ok(CacheUpdate::ObservationInsertion(ObservationInsertion::new(request)?))
    }

    pub fn result_template_insertion(
        request: InsertResultTemplateRequest,
        response: InsertResultTemplateResponse,
    ) -> Result<Self> {
        Ok(CacheUpdate::ResultTemplateInsertion(ResultTemplateInsertion::new(request, response)?))
    }

    pub fn result_insertion(request: InsertResultRequest) -> Result<Self> {
        Ok(CacheUpdate::ResultInsertion(ResultInsertion::new(request)?))
    }

    pub fn kind(&self) -> UpdateKind {
        match self {
            CacheUpdate::FullRebuild(_) => UpdateKind::Complete,
            CacheUpdate::SensorInsertion(_)
            | CacheUpdate::SensorDeletion(_)
            | CacheUpdate::ObservationInsertion(_)
            | CacheUpdate::ResultTemplateInsertion(_)
            | CacheUpdate::ResultInsertion(_) => UpdateKind::Partial,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.kind() == UpdateKind::Complete
    }

    /// Name for logging
    pub fn name(&self) -> &'static str {
        match self {
            CacheUpdate::FullRebuild(_) => "full_rebuild",
            CacheUpdate::SensorInsertion(_) => "sensor_insertion",
            CacheUpdate::SensorDeletion(_) => "sensor_deletion",
            CacheUpdate::ObservationInsertion(_) => "observation_insertion",
            CacheUpdate::ResultTemplateInsertion(_) => "result_template_insertion",
            CacheUpdate::ResultInsertion(_) => "result_insertion",
        }
    }

    /// Apply this update to `cache`
    ///
    /// A full rebuild replaces the content of `cache` only when it succeeds
    /// completely; on error `cache` is left untouched.
    pub fn execute(&self, cache: &mut ContentCache) -> Result<()> {
        match self {
            CacheUpdate::FullRebuild(u) => u.execute(cache),
            CacheUpdate::SensorInsertion(u) => {
                u.apply(cache);
                Ok(())
            }
            CacheUpdate::SensorDeletion(u) => {
                u.apply(cache);
                Ok(())
            }
            CacheUpdate::ObservationInsertion(u) => {
                u.apply(cache);
                Ok(())
            }
            CacheUpdate::ResultTemplateInsertion(u) => {
                u.apply(cache);
                Ok(())
            }
            CacheUpdate::ResultInsertion(u) => {
                u.apply(cache);
                Ok(())
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::datasource::{InMemoryDataSource, NoGeometries};

    #[test]
    fn test_kinds() {
        let (req, resp) = sensor("P1", "O1", &["OP1"]);
        let insertion = CacheUpdate::sensor_insertion(req, resp).unwrap();
        assert_eq!(insertion.kind(), UpdateKind::Partial);
        assert_eq!(insertion.name(), "sensor_insertion");

        let rebuild = CacheUpdate::full_rebuild(
            Arc::new(InMemoryDataSource::new()),
            Arc::new(NoGeometries),
            2,
            4326,
        );
        assert!(rebuild.is_complete());
    }

    #[test]
    fn test_construction_rejects_missing_fields() {
        let (req, mut resp) = sensor("P1", "O1", &["OP1"]);
        resp.assigned_procedure = String::new();
        let err = CacheUpdate::sensor_insertion(req, resp).unwrap_err();
        assert_eq!(err.error_code(), "MISSING_FIELD");

        let err = CacheUpdate::sensor_deletion(DeleteSensorRequest { procedure: " ".into() }).unwrap_err();
        assert!(err.to_string().contains("procedure"));
    }
}
