//! Data source collaborators used by the full rebuild
//!
//! The authoritative store is reached through two traits: [`DataSource`]
//! answers entity queries, [`FeatureQueryHandler`] turns feature identifiers
//! into a spatial envelope. Both are synchronous and shared between rebuild
//! worker threads, so they take `&self`.
//!
//! [`InMemoryDataSource`] implements both over a [`Dataset`] that can be
//! built in code or loaded from JSON.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::model::{Envelope, SpatialEnvelope, TimePeriod};

/// Everything stored for one offering
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferingRecord {
    pub identifier: String,
    pub name: Option<String>,
    pub procedures: Vec<String>,
    pub observable_properties: Vec<String>,
    pub composite_phenomena: Vec<String>,
    pub related_features: Vec<String>,
    pub observation_types: Vec<String>,
    pub allowed_observation_types: Vec<String>,
    pub features_of_interest: Vec<String>,
    pub phenomenon_time: Option<TimePeriod>,
    pub result_time: Option<TimePeriod>,
}

impl OfferingRecord {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcedureRecord {
    pub identifier: String,
    /// Marked deleted in the store but not purged yet
    pub deleted: bool,
    pub parent_procedures: Vec<String>,
    pub observable_properties: Vec<String>,
    pub observation_identifiers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservablePropertyRecord {
    pub identifier: String,
    pub offerings: Vec<String>,
    pub procedures: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureRecord {
    pub identifier: String,
    pub feature_type: Option<String>,
    pub procedures: Vec<String>,
    pub parent_features: Vec<String>,
    pub geometry: Option<Envelope>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelatedFeatureRecord {
    pub identifier: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositePhenomenonRecord {
    pub identifier: String,
    pub observable_properties: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultTemplateRecord {
    pub identifier: String,
    pub offering: String,
    pub observable_property: String,
    pub features_of_interest: Vec<String>,
}

/// Query interface to the authoritative store
pub trait DataSource: Send + Sync {
    /// Identifiers of all offerings
    fn offering_identifiers(&self) -> Result<Vec<String>>;

    /// One offering's data; called concurrently from rebuild workers
    fn offering(&self, identifier: &str) -> Result<OfferingRecord>;

    fn procedures(&self) -> Result<Vec<ProcedureRecord>>;

    fn observable_properties(&self) -> Result<Vec<ObservablePropertyRecord>>;

    fn features_of_interest(&self) -> Result<Vec<FeatureRecord>>;

    fn related_features(&self) -> Result<Vec<RelatedFeatureRecord>>;

    fn composite_phenomena(&self) -> Result<Vec<CompositePhenomenonRecord>>;

    fn result_templates(&self) -> Result<Vec<ResultTemplateRecord>>;

    fn observation_types(&self) -> Result<Vec<String>>;

    fn epsg_codes(&self) -> Result<Vec<i32>>;

    /// Get source name (for logging/debugging)
    fn name(&self) -> &'static str;
}

/// Resolves feature identifiers to their combined extent
pub trait FeatureQueryHandler: Send + Sync {
    /// Union envelope of the given features, `None` if none has a geometry
    fn envelope_for_features(&self, features: &[String]) -> Result<Option<SpatialEnvelope>>;
}

/// Contents of an [`InMemoryDataSource`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Dataset {
    pub srid: Option<i32>,
    pub offerings: BTreeMap<String, OfferingRecord>,
    pub procedures: Vec<ProcedureRecord>,
    pub observable_properties: Vec<ObservablePropertyRecord>,
    pub features_of_interest: Vec<FeatureRecord>,
    pub related_features: Vec<RelatedFeatureRecord>,
    pub composite_phenomena: Vec<CompositePhenomenonRecord>,
    pub result_templates: Vec<ResultTemplateRecord>,
    pub observation_types: Vec<String>,
    pub epsg_codes: Vec<i32>,
}

/// Data source backed by an in-memory [`Dataset`]
///
/// Thread-safe via RwLock; contents can be replaced while rebuilds run.
#[derive(Debug, Default)]
pub struct InMemoryDataSource {
    data: RwLock<Dataset>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dataset(dataset: Dataset) -> Self {
        Self {
            data: RwLock::new(dataset),
        }
    }

    /// Load a dataset from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CacheError::IoError {
            message: format!("Failed to read dataset {}: {}", path.display(), e),
        })?;
        Ok(Self::from_dataset(serde_json::from_str(&content)?))
    }

    pub fn insert_offering(&self, record: OfferingRecord) {
        self.data
            .write()
            .offerings
            .insert(record.identifier.clone(), record);
    }

    pub fn remove_offering(&self, identifier: &str) {
        self.data.write().offerings.remove(identifier);
    }

    pub fn insert_procedure(&self, record: ProcedureRecord) {
        let mut data = self.data.write();
        data.procedures.retain(|p| p.identifier != record.identifier);
        data.procedures.push(record);
    }

    pub fn insert_feature(&self, record: FeatureRecord) {
        let mut data = self.data.write();
        data.features_of_interest
            .retain(|f| f.identifier != record.identifier);
        data.features_of_interest.push(record);
    }

    /// Apply an arbitrary change to the dataset
    pub fn modify<F: FnOnce(&mut Dataset)>(&self, change: F) {
        change(&mut self.data.write());
    }

    pub fn snapshot(&self) -> Dataset {
        self.data.read().clone()
    }
}

impl DataSource for InMemoryDataSource {
    fn offering_identifiers(&self) -> Result<Vec<String>> {
        Ok(self.data.read().offerings.keys().cloned().collect())
    }

    fn offering(&self, identifier: &str) -> Result<OfferingRecord> {
        self.data
            .read()
            .offerings
            .get(identifier)
            .cloned()
            .ok_or_else(|| CacheError::OfferingFetch {
                offering: identifier.to_string(),
                reason: "offering not found".to_string(),
            })
    }

    fn procedures(&self) -> Result<Vec<ProcedureRecord>> {
        Ok(self.data.read().procedures.clone())
    }

    fn observable_properties(&self) -> Result<Vec<ObservablePropertyRecord>> {
        Ok(self.data.read().observable_properties.clone())
    }

    fn features_of_interest(&self) -> Result<Vec<FeatureRecord>> {
        Ok(self.data.read().features_of_interest.clone())
    }

    fn related_features(&self) -> Result<Vec<RelatedFeatureRecord>> {
        Ok(self.data.read().related_features.clone())
    }

    fn composite_phenomena(&self) -> Result<Vec<CompositePhenomenonRecord>> {
        Ok(self.data.read().composite_phenomena.clone())
    }

    fn result_templates(&self) -> Result<Vec<ResultTemplateRecord>> {
        Ok(self.data.read().result_templates.clone())
    }

    fn observation_types(&self) -> Result<Vec<String>> {
        Ok(self.data.read().observation_types.clone())
    }

    fn epsg_codes(&self) -> Result<Vec<i32>> {
        Ok(self.data.read().epsg_codes.clone())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

impl FeatureQueryHandler for InMemoryDataSource {
    fn envelope_for_features(&self, features: &[String]) -> Result<Option<SpatialEnvelope>> {
        let data = self.data.read();
        let geometries: HashMap<&str, &Envelope> = data
            .features_of_interest
            .iter()
            .filter_map(|f| f.geometry.as_ref().map(|g| (f.identifier.as_str(), g)))
            .collect();
        let union = Envelope::union_all(features.iter().filter_map(|id| geometries.get(id.as_str()).copied()));
        let srid = data.srid.unwrap_or(crate::config::DEFAULT_EPSG);
        Ok(union.map(|e| SpatialEnvelope::new(e, srid)))
    }
}

/// Feature handler for stores without geometries
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGeometries;

impl FeatureQueryHandler for NoGeometries {
    fn envelope_for_features(&self, _features: &[String]) -> Result<Option<SpatialEnvelope>> {
        Ok(None)
    }
}
