//! Full rebuild from the data source

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::ContentCache;
use crate::datasource::{DataSource, FeatureQueryHandler, OfferingRecord};
use crate::error::{CacheError, Result};
use crate::model::SpatialEnvelope;
use crate::workers::RebuildWorkers;

/// Rebuilds the whole cache from the data source
///
/// Offerings are fetched concurrently by [`RebuildWorkers`]; the remaining
/// entity queries run on the calling thread. The target cache is replaced
/// only if every query succeeded.
#[derive(Clone)]
pub struct FullRebuild {
    source: Arc<dyn DataSource>,
    features: Arc<dyn FeatureQueryHandler>,
    workers: RebuildWorkers,
    default_epsg: i32,
}

impl fmt::Debug for FullRebuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FullRebuild")
            .field("source", &self.source.name())
            .field("threads", &self.workers.threads())
            .field("default_epsg", &self.default_epsg)
            .finish()
    }
}

/// One offering's share of the new cache
struct OfferingSlice {
    record: OfferingRecord,
    envelope: Option<SpatialEnvelope>,
}

impl OfferingSlice {
    fn store(self, cache: &mut ContentCache) {
        let OfferingSlice { record, envelope } = self;
        let offering = record.identifier.as_str();

        for procedure in &record.procedures {
            cache.add_procedure(procedure);
            cache.add_procedure_for_offering(offering, procedure);
            cache.add_offering_for_procedure(procedure, offering);
        }
        if let Some(name) = &record.name {
            cache.set_name_for_offering(offering, name);
        }
        for observable_property in &record.observable_properties {
            cache.add_observable_property_for_offering(offering, observable_property);
            cache.add_offering_for_observable_property(observable_property, offering);
        }
        for composite in &record.composite_phenomena {
            cache.add_composite_phenomenon_for_offering(offering, composite);
        }
        for feature in &record.related_features {
            cache.add_related_feature_for_offering(offering, feature);
        }
        for observation_type in &record.observation_types {
            cache.add_observation_type_for_offering(offering, observation_type);
        }
        cache.add_allowed_observation_types_for_offering(offering, &record.allowed_observation_types);
        for feature in &record.features_of_interest {
            cache.add_feature_of_interest(feature);
            cache.add_feature_of_interest_for_offering(offering, feature);
        }
        cache.set_phenomenon_time_for_offering(offering, record.phenomenon_time);
        cache.set_result_time_for_offering(offering, record.result_time);
        cache.set_envelope_for_offering(offering, envelope);
    }
}

impl FullRebuild {
    pub fn new(
        source: Arc<dyn DataSource>,
        features: Arc<dyn FeatureQueryHandler>,
        threads: usize,
        default_epsg: i32,
    ) -> Self {
        Self {
            source,
            features,
            workers: RebuildWorkers::new(threads),
            default_epsg,
        }
    }

    /// Build a new cache and, on success, move it into `cache`
    pub fn execute(&self, cache: &mut ContentCache) -> Result<()> {
        let started = Instant::now();
        let fresh = self.build()?;
        info!(
            source = self.source.name(),
            offerings = fresh.offerings().len(),
            procedures = fresh.procedures().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Full rebuild finished"
        );
        *cache = fresh;
        Ok(())
    }

    fn build(&self) -> Result<ContentCache> {
        let procedures = self.source.procedures()?;
        let deleted: BTreeSet<String> = procedures
            .iter()
            .filter(|p| p.deleted)
            .map(|p| p.identifier.clone())
            .collect();

        let offerings = self.source.offering_identifiers()?;
        debug!(offerings = offerings.len(), threads = self.workers.threads(), "Fetching offerings");

        let target = Mutex::new(ContentCache::new(self.default_epsg));
        let failures = self.workers.run(
            &offerings,
            |offering| self.fetch_offering(offering, &deleted),
            |_, slice| {
                if let Some(slice) = slice {
                    slice.store(&mut target.lock());
                }
            },
        );
        if !failures.is_empty() {
            warn!(failed = failures.len(), total = offerings.len(), "Discarding incomplete rebuild");
            return Err(CacheError::RebuildIncomplete { failures });
        }
        let mut cache = target.into_inner();

        for record in procedures.iter().filter(|p| !p.deleted) {
            let procedure = record.identifier.as_str();
            cache.add_procedure(procedure);
            cache.add_parent_procedures(procedure, &record.parent_procedures);
            for observable_property in &record.observable_properties {
                cache.add_observable_property_for_procedure(procedure, observable_property);
                cache.add_procedure_for_observable_property(observable_property, procedure);
            }
            for identifier in &record.observation_identifiers {
                cache.add_observation_identifier(identifier);
                cache.add_observation_identifier_for_procedure(procedure, identifier);
            }
        }

        let known_offerings = cache.offerings();
        let known_procedures = cache.procedures();

        for record in self.source.observable_properties()? {
            let observable_property = record.identifier.as_str();
            for offering in record.offerings.iter().filter(|o| known_offerings.contains(*o)) {
                cache.add_offering_for_observable_property(observable_property, offering);
                cache.add_observable_property_for_offering(offering, observable_property);
            }
            for procedure in record.procedures.iter().filter(|p| known_procedures.contains(*p)) {
                cache.add_procedure_for_observable_property(observable_property, procedure);
                cache.add_observable_property_for_procedure(procedure, observable_property);
            }
        }

        for record in self.source.features_of_interest()? {
            let feature = record.identifier.as_str();
            cache.add_feature_of_interest(feature);
            if let Some(feature_type) = &record.feature_type {
                cache.add_feature_of_interest_type(feature_type);
            }
            for procedure in record.procedures.iter().filter(|p| known_procedures.contains(*p)) {
                cache.add_procedure_for_feature_of_interest(feature, procedure);
            }
            cache.add_parent_features(feature, &record.parent_features);
        }

        for record in self.source.related_features()? {
            for role in &record.roles {
                cache.add_role_for_related_feature(&record.identifier, role);
            }
        }

        for record in self.source.composite_phenomena()? {
            for observable_property in &record.observable_properties {
                cache.add_observable_property_for_composite_phenomenon(&record.identifier, observable_property);
            }
        }

        for record in self.source.result_templates()? {
            if !cache.has_offering(&record.offering)
                || record.observable_property.is_empty()
                || record.features_of_interest.is_empty()
            {
                debug!(template = record.identifier.as_str(), "Skipping unusable result template");
                continue;
            }
            let template = record.identifier.as_str();
            cache.add_result_template(template);
            cache.add_result_template_for_offering(&record.offering, template);
            cache.add_observable_property_for_result_template(template, &record.observable_property);
            for feature in &record.features_of_interest {
                cache.add_feature_of_interest(feature);
                cache.add_feature_of_interest_for_offering(&record.offering, feature);
                cache.add_feature_of_interest_for_result_template(template, feature);
            }
        }

        for observation_type in self.source.observation_types()? {
            cache.add_observation_type(&observation_type);
        }
        for epsg in self.source.epsg_codes()? {
            cache.add_epsg_code(epsg);
        }

        cache.recalculate_global_envelope();
        cache.recalculate_phenomenon_time();
        cache.recalculate_result_time();
        Ok(cache)
    }

    /// Fetch one offering; `None` if none of its procedures is live
    fn fetch_offering(&self, offering: &str, deleted: &BTreeSet<String>) -> Result<Option<OfferingSlice>> {
        let mut record = self.source.offering(offering)?;
        record.identifier = offering.to_string();
        record.procedures.retain(|p| !deleted.contains(p));
        if record.procedures.is_empty() {
            debug!(offering, "Skipping offering without live procedures");
            return Ok(None);
        }
        let envelope = if record.features_of_interest.is_empty() {
            None
        } else {
            self.features
                .envelope_for_features(&record.features_of_interest)
                .map_err(|e| CacheError::OfferingFetch {
                    offering: offering.to_string(),
                    reason: format!("envelope query failed: {}", e),
                })?
        };
        Ok(Some(OfferingSlice { record, envelope }))
    }
}
