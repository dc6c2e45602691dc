//! Observation and result insertion

use std::collections::BTreeSet;

use tracing::debug;

use crate::cache::ContentCache;
use crate::error::{CacheError, Result};
use crate::model::Envelope;
use crate::request::{require, InsertObservationRequest, InsertResultRequest, Observation};

/// Records newly inserted observations
///
/// For every observation: procedure and observable property relations,
/// observation type, identifier, phenomenon and result time bounds, the
/// envelope of the observed features, feature relations and hierarchy.
/// Every offering of the request and of the observation is updated.
#[derive(Debug, Clone)]
pub struct ObservationInsertion {
    request: InsertObservationRequest,
}

impl ObservationInsertion {
    pub fn new(request: InsertObservationRequest) -> Result<Self> {
        const REQUEST: &str = "InsertObservation";
        if request.observations.is_empty() {
            return Err(CacheError::missing(REQUEST, "observations"));
        }
        for offering in &request.offerings {
            require(offering, REQUEST, "offerings")?;
        }
        for observation in &request.observations {
            validate_observation(observation, REQUEST)?;
            if offerings_of(&request.offerings, observation).is_empty() {
                return Err(CacheError::missing(REQUEST, "offerings"));
            }
        }
        Ok(Self { request })
    }

    pub fn observations(&self) -> &[Observation] {
        &self.request.observations
    }

    pub(crate) fn apply(&self, cache: &mut ContentCache) {
        for observation in &self.request.observations {
            let offerings = offerings_of(&self.request.offerings, observation);
            record_observation(cache, observation, &offerings, true);
        }
        debug!(
            observations = self.request.observations.len(),
            "Applied observation insertion"
        );
    }
}

/// Records one observation decoded from an InsertResult
///
/// Same relations as [`ObservationInsertion`] for the offerings of the
/// template's observation constellation, without adding the observed
/// features as related features.
#[derive(Debug, Clone)]
pub struct ResultInsertion {
    request: InsertResultRequest,
}

impl ResultInsertion {
    pub fn new(request: InsertResultRequest) -> Result<Self> {
        const REQUEST: &str = "InsertResult";
        require(&request.template_identifier, REQUEST, "template_identifier")?;
        validate_observation(&request.observation, REQUEST)?;
        if offerings_of(&[], &request.observation).is_empty() {
            return Err(CacheError::missing(REQUEST, "constellation.offerings"));
        }
        Ok(Self { request })
    }

    pub fn template_identifier(&self) -> &str {
        &self.request.template_identifier
    }

    pub(crate) fn apply(&self, cache: &mut ContentCache) {
        let observation = &self.request.observation;
        let offerings = offerings_of(&[], observation);
        record_observation(cache, observation, &offerings, false);
        debug!(
            template = self.template_identifier(),
            "Applied result insertion"
        );
    }
}

fn validate_observation(observation: &Observation, request: &'static str) -> Result<()> {
    observation.constellation.validate(request)?;
    if let Some(identifier) = &observation.identifier {
        require(identifier, request, "observation.identifier")?;
    }
    for offering in &observation.constellation.offerings {
        require(offering, request, "constellation.offerings")?;
    }
    Ok(())
}

fn offerings_of(request_offerings: &[String], observation: &Observation) -> BTreeSet<String> {
    request_offerings
        .iter()
        .chain(observation.constellation.offerings.iter())
        .cloned()
        .collect()
}

fn record_observation(
    cache: &mut ContentCache,
    observation: &Observation,
    offerings: &BTreeSet<String>,
    features_are_related: bool,
) {
    let constellation = &observation.constellation;
    let procedure = constellation.procedure.as_str();
    let observable_property = constellation.observable_property.as_str();

    cache.add_procedure(procedure);
    cache.add_procedure_for_observable_property(observable_property, procedure);
    cache.add_observable_property_for_procedure(procedure, observable_property);

    cache.update_global_phenomenon_time(&observation.phenomenon_time);
    if let Some(result_time) = &observation.result_time {
        cache.update_global_result_time(result_time);
    }

    if let Some(observation_type) = &constellation.observation_type {
        cache.add_observation_type(observation_type);
    }
    if let Some(identifier) = &observation.identifier {
        cache.add_observation_identifier(identifier);
        cache.add_observation_identifier_for_procedure(procedure, identifier);
    }

    let features = constellation.feature_of_interest.flatten();
    let envelope = Envelope::union_all(features.iter().filter_map(|f| f.geometry.as_ref()));
    if let Some(envelope) = &envelope {
        cache.update_global_envelope(envelope);
    }

    for feature in &features {
        let id = feature.identifier.as_str();
        cache.add_feature_of_interest(id);
        if let Some(feature_type) = &feature.feature_type {
            cache.add_feature_of_interest_type(feature_type);
        }
        cache.add_procedure_for_feature_of_interest(id, procedure);
        cache.add_parent_features(id, &feature.sampled_features);
        for offering in offerings {
            if features_are_related {
                cache.add_related_feature_for_offering(offering, id);
            }
            cache.add_feature_of_interest_for_offering(offering, id);
        }
    }

    for offering in offerings {
        cache.add_procedure_for_offering(offering, procedure);
        cache.add_offering_for_procedure(procedure, offering);
        cache.add_observable_property_for_offering(offering, observable_property);
        cache.add_offering_for_observable_property(observable_property, offering);
        if let Some(observation_type) = &constellation.observation_type {
            cache.add_observation_type_for_offering(offering, observation_type);
        }
        cache.update_phenomenon_time_for_offering(offering, &observation.phenomenon_time);
        if let Some(result_time) = &observation.result_time {
            cache.update_result_time_for_offering(offering, result_time);
        }
        if let Some(envelope) = &envelope {
            cache.update_envelope_for_offering(offering, envelope);
        }
    }
}
