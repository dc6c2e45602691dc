//! Request and response payloads of the transactional operations
//!
//! These are the already-decoded forms of InsertSensor, DeleteSensor,
//! InsertObservation, InsertResultTemplate and InsertResult. Decoding the
//! wire formats happens elsewhere; the cache only reads the identifiers,
//! times and geometries carried here.

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::model::{Envelope, TimePeriod};

/// Offering declared in a procedure description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SosOffering {
    pub identifier: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl SosOffering {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Feature related to an offering together with its role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedFeature {
    pub identifier: String,
    pub role: String,
}

/// Decoded InsertSensor request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertSensorRequest {
    /// Offerings named in the procedure description
    #[serde(default)]
    pub offerings: Vec<SosOffering>,
    #[serde(default)]
    pub parent_procedures: Vec<String>,
    pub observable_properties: Vec<String>,
    #[serde(default)]
    pub related_features: Vec<RelatedFeature>,
    /// Observation types from the insertion metadata
    #[serde(default)]
    pub observation_types: Vec<String>,
}

/// Identifiers assigned by the InsertSensor operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertSensorResponse {
    pub assigned_procedure: String,
    pub assigned_offering: String,
}

/// Decoded DeleteSensor request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteSensorRequest {
    pub procedure: String,
}

/// A sampling feature observed by an observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingFeature {
    pub identifier: String,
    #[serde(default)]
    pub feature_type: Option<String>,
    #[serde(default)]
    pub geometry: Option<Envelope>,
    /// Features this one samples; they become its parents
    #[serde(default)]
    pub sampled_features: Vec<String>,
}

impl SamplingFeature {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            feature_type: None,
            geometry: None,
            sampled_features: Vec::new(),
        }
    }

    pub fn with_geometry(mut self, geometry: Envelope) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_feature_type(mut self, feature_type: impl Into<String>) -> Self {
        self.feature_type = Some(feature_type.into());
        self
    }

    pub fn with_sampled_feature(mut self, parent: impl Into<String>) -> Self {
        self.sampled_features.push(parent.into());
        self
    }
}

/// Feature of interest: a single feature or a (nested) collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureOfInterest {
    Feature(SamplingFeature),
    Collection { members: Vec<FeatureOfInterest> },
}

impl FeatureOfInterest {
    /// All sampling features, collections flattened depth first
    pub fn flatten(&self) -> Vec<&SamplingFeature> {
        let mut out = Vec::new();
        self.collect_into(&mut out);
        out
    }

    fn collect_into<'a>(&'a self, out: &mut Vec<&'a SamplingFeature>) {
        match self {
            FeatureOfInterest::Feature(f) => out.push(f),
            FeatureOfInterest::Collection { members } => {
                for member in members {
                    member.collect_into(out);
                }
            }
        }
    }
}

impl From<SamplingFeature> for FeatureOfInterest {
    fn from(feature: SamplingFeature) -> Self {
        FeatureOfInterest::Feature(feature)
    }
}

/// What was observed, by which procedure, for which feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationConstellation {
    pub procedure: String,
    pub observable_property: String,
    #[serde(default)]
    pub observation_type: Option<String>,
    pub feature_of_interest: FeatureOfInterest,
    #[serde(default)]
    pub offerings: Vec<String>,
}

/// One observation as decoded from InsertObservation or InsertResult
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    #[serde(default)]
    pub identifier: Option<String>,
    pub constellation: ObservationConstellation,
    pub phenomenon_time: TimePeriod,
    #[serde(default)]
    pub result_time: Option<TimePeriod>,
}

/// Decoded InsertObservation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertObservationRequest {
    pub offerings: Vec<String>,
    pub observations: Vec<Observation>,
}

/// Decoded InsertResultTemplate request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertResultTemplateRequest {
    pub observation_template: ObservationConstellation,
    /// Phenomenon time of the template observation, if it carries one
    #[serde(default)]
    pub phenomenon_time: Option<TimePeriod>,
}

/// Identifier accepted by the InsertResultTemplate operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertResultTemplateResponse {
    pub accepted_template: String,
}

/// Decoded InsertResult request, already resolved against its template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertResultRequest {
    pub template_identifier: String,
    pub observation: Observation,
}

pub(crate) fn require(value: &str, request: &'static str, field: &'static str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(CacheError::missing(request, field));
    }
    Ok(())
}

pub(crate) fn require_all(
    values: &[String],
    request: &'static str,
    field: &'static str,
) -> Result<()> {
    if values.is_empty() || values.iter().any(|v| v.trim().is_empty()) {
        return Err(CacheError::missing(request, field));
    }
    Ok(())
}

impl ObservationConstellation {
    pub(crate) fn validate(&self, request: &'static str) -> Result<()> {
        require(&self.procedure, request, "procedure")?;
        require(&self.observable_property, request, "observable_property")?;
        let features = self.feature_of_interest.flatten();
        if features.is_empty() {
            return Err(CacheError::missing(request, "feature_of_interest"));
        }
        for feature in features {
            require(&feature.identifier, request, "feature_of_interest.identifier")?;
        }
        Ok(())
    }
}
