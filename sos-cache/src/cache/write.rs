//! Mutators of the content cache
//!
//! One method per relation. Adding is idempotent; removing a pair that does
//! not exist is a no-op.

use tracing::trace;

use super::ContentCache;
use crate::model::{Envelope, SpatialEnvelope, TimePeriod};

impl ContentCache {
    pub fn set_default_epsg(&mut self, epsg: i32) {
        self.default_epsg = epsg;
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Primary sets
    // ═══════════════════════════════════════════════════════════════════════

    pub fn add_procedure(&mut self, procedure: &str) {
        trace!(procedure, "Adding procedure");
        self.procedures.insert(procedure.to_string());
    }

    pub fn add_feature_of_interest(&mut self, feature: &str) {
        self.features_of_interest.insert(feature.to_string());
    }

    pub fn add_feature_of_interest_type(&mut self, feature_type: &str) {
        self.feature_of_interest_types.insert(feature_type.to_string());
    }

    pub fn add_observation_identifier(&mut self, identifier: &str) {
        self.observation_identifiers.insert(identifier.to_string());
    }

    pub fn add_observation_type(&mut self, observation_type: &str) {
        self.observation_types.insert(observation_type.to_string());
    }

    pub fn add_result_template(&mut self, template: &str) {
        trace!(template, "Adding result template");
        self.result_templates.insert(template.to_string());
    }

    pub fn add_epsg_code(&mut self, epsg: i32) {
        self.epsg_codes.insert(epsg);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Offering relations
    // ═══════════════════════════════════════════════════════════════════════

    pub fn add_procedure_for_offering(&mut self, offering: &str, procedure: &str) {
        trace!(offering, procedure, "Adding procedure to offering");
        self.procedures_for_offerings.add(offering, procedure);
    }

    pub fn add_offering_for_procedure(&mut self, procedure: &str, offering: &str) {
        self.offerings_for_procedures.add(procedure, offering);
    }

    pub fn set_name_for_offering(&mut self, offering: &str, name: &str) {
        self.names_for_offerings
            .insert(offering.to_string(), name.to_string());
    }

    pub fn add_observable_property_for_offering(&mut self, offering: &str, observable_property: &str) {
        self.observable_properties_for_offerings
            .add(offering, observable_property);
    }

    pub fn add_offering_for_observable_property(&mut self, observable_property: &str, offering: &str) {
        self.offerings_for_observable_properties
            .add(observable_property, offering);
    }

    pub fn add_feature_of_interest_for_offering(&mut self, offering: &str, feature: &str) {
        self.features_for_offerings.add(offering, feature);
    }

    pub fn add_related_feature_for_offering(&mut self, offering: &str, feature: &str) {
        self.related_features_for_offerings.add(offering, feature);
    }

    pub fn add_role_for_related_feature(&mut self, feature: &str, role: &str) {
        self.roles_for_related_features.add(feature, role);
    }

    pub fn add_observation_type_for_offering(&mut self, offering: &str, observation_type: &str) {
        self.observation_types_for_offerings
            .add(offering, observation_type);
    }

    pub fn add_allowed_observation_types_for_offering<I, S>(&mut self, offering: &str, types: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_observation_types_for_offerings
            .add_all(offering, types);
    }

    pub fn add_composite_phenomenon_for_offering(&mut self, offering: &str, composite: &str) {
        self.composite_phenomena_for_offerings.add(offering, composite);
    }

    pub fn add_observable_property_for_composite_phenomenon(&mut self, composite: &str, observable_property: &str) {
        self.observable_properties_for_composite_phenomena
            .add(composite, observable_property);
    }

    pub fn add_result_template_for_offering(&mut self, offering: &str, template: &str) {
        self.result_templates_for_offerings.add(offering, template);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Procedure, observable property and feature relations
    // ═══════════════════════════════════════════════════════════════════════

    pub fn add_observable_property_for_procedure(&mut self, procedure: &str, observable_property: &str) {
        self.observable_properties_for_procedures
            .add(procedure, observable_property);
    }

    pub fn add_procedure_for_observable_property(&mut self, observable_property: &str, procedure: &str) {
        self.procedures_for_observable_properties
            .add(observable_property, procedure);
    }

    pub fn add_observation_identifier_for_procedure(&mut self, procedure: &str, identifier: &str) {
        self.observation_identifiers_for_procedures
            .add(procedure, identifier);
    }

    pub fn add_procedure_for_feature_of_interest(&mut self, feature: &str, procedure: &str) {
        self.procedures_for_features.add(feature, procedure);
    }

    /// Record `parents` as parents of `procedure` and the reverse child links
    pub fn add_parent_procedures<I, S>(&mut self, procedure: &str, parents: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for parent in parents {
            let parent = parent.as_ref();
            self.parent_procedures.add(procedure, parent);
            self.child_procedures.add(parent, procedure);
        }
    }

    /// Record `parents` as parents of `feature` and the reverse child links
    pub fn add_parent_features<I, S>(&mut self, feature: &str, parents: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for parent in parents {
            let parent = parent.as_ref();
            self.parent_features.add(feature, parent);
            self.child_features.add(parent, feature);
        }
    }

    pub fn add_feature_of_interest_for_result_template(&mut self, template: &str, feature: &str) {
        self.features_for_result_templates.add(template, feature);
    }

    pub fn add_observable_property_for_result_template(&mut self, template: &str, observable_property: &str) {
        self.observable_properties_for_result_templates
            .add(template, observable_property);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Spatial extent
    // ═══════════════════════════════════════════════════════════════════════

    pub fn set_envelope_for_offering(&mut self, offering: &str, envelope: Option<SpatialEnvelope>) {
        match envelope {
            Some(envelope) => {
                self.envelopes_for_offerings
                    .insert(offering.to_string(), envelope);
            }
            None => {
                self.envelopes_for_offerings.remove(offering);
            }
        }
    }

    /// Expand the offering's envelope, creating it in the default CRS
    pub fn update_envelope_for_offering(&mut self, offering: &str, envelope: &Envelope) {
        let srid = self.default_epsg;
        self.envelopes_for_offerings
            .entry(offering.to_string())
            .and_modify(|e| e.expand_to_include(envelope))
            .or_insert_with(|| SpatialEnvelope::new(*envelope, srid));
    }

    pub fn set_global_envelope(&mut self, envelope: Option<SpatialEnvelope>) {
        self.global_envelope = envelope;
    }

    /// Expand the global envelope, creating it in the default CRS
    pub fn update_global_envelope(&mut self, envelope: &Envelope) {
        match self.global_envelope.as_mut() {
            Some(global) => global.expand_to_include(envelope),
            None => self.global_envelope = Some(SpatialEnvelope::new(*envelope, self.default_epsg)),
        }
    }

    /// Set the global envelope to the union of all offering envelopes
    pub fn recalculate_global_envelope(&mut self) {
        let union = Envelope::union_all(self.envelopes_for_offerings.values().map(|e| &e.envelope));
        self.global_envelope = union.map(|e| SpatialEnvelope::new(e, self.default_epsg));
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Temporal extent
    // ═══════════════════════════════════════════════════════════════════════

    pub fn set_phenomenon_time_for_offering(&mut self, offering: &str, period: Option<TimePeriod>) {
        set_period(&mut self.phenomenon_time_for_offerings, offering, period);
    }

    pub fn update_phenomenon_time_for_offering(&mut self, offering: &str, period: &TimePeriod) {
        extend_period(&mut self.phenomenon_time_for_offerings, offering, period);
    }

    pub fn update_global_phenomenon_time(&mut self, period: &TimePeriod) {
        extend_global(&mut self.global_phenomenon_time, period);
    }

    pub fn set_global_phenomenon_time(&mut self, period: Option<TimePeriod>) {
        self.global_phenomenon_time = period;
    }

    /// Set the global phenomenon time to the union of all offering periods
    pub fn recalculate_phenomenon_time(&mut self) {
        self.global_phenomenon_time = union_of(self.phenomenon_time_for_offerings.values());
    }

    pub fn set_result_time_for_offering(&mut self, offering: &str, period: Option<TimePeriod>) {
        set_period(&mut self.result_time_for_offerings, offering, period);
    }

    pub fn update_result_time_for_offering(&mut self, offering: &str, period: &TimePeriod) {
        extend_period(&mut self.result_time_for_offerings, offering, period);
    }

    pub fn update_global_result_time(&mut self, period: &TimePeriod) {
        extend_global(&mut self.global_result_time, period);
    }

    pub fn set_global_result_time(&mut self, period: Option<TimePeriod>) {
        self.global_result_time = period;
    }

    /// Set the global result time to the union of all offering periods
    pub fn recalculate_result_time(&mut self) {
        self.global_result_time = union_of(self.result_time_for_offerings.values());
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Removal of single entries
    // ═══════════════════════════════════════════════════════════════════════

    pub fn remove_procedure_for_offering(&mut self, offering: &str, procedure: &str) {
        self.procedures_for_offerings.remove_value(offering, procedure);
    }

    pub fn remove_offering_for_procedure(&mut self, procedure: &str, offering: &str) {
        self.offerings_for_procedures.remove_value(procedure, offering);
    }

    pub fn remove_feature_of_interest(&mut self, feature: &str) {
        trace!(feature, "Removing feature of interest");
        self.features_of_interest.remove(feature);
    }

    pub fn remove_observation_identifier(&mut self, identifier: &str) {
        self.observation_identifiers.remove(identifier);
    }

    /// Remove a result template and everything keyed by it
    pub fn remove_result_template(&mut self, template: &str) {
        trace!(template, "Removing result template");
        self.result_templates.remove(template);
        self.features_for_result_templates.remove_key(template);
        self.observable_properties_for_result_templates
            .remove_key(template);
        self.result_templates_for_offerings
            .remove_value_everywhere(template);
    }
}

fn set_period(
    map: &mut std::collections::BTreeMap<String, TimePeriod>,
    key: &str,
    period: Option<TimePeriod>,
) {
    match period {
        Some(period) => {
            map.insert(key.to_string(), period);
        }
        None => {
            map.remove(key);
        }
    }
}

fn extend_period(
    map: &mut std::collections::BTreeMap<String, TimePeriod>,
    key: &str,
    period: &TimePeriod,
) {
    map.entry(key.to_string())
        .and_modify(|p| p.extend(period))
        .or_insert(*period);
}

fn extend_global(slot: &mut Option<TimePeriod>, period: &TimePeriod) {
    match slot.as_mut() {
        Some(current) => current.extend(period),
        None => *slot = Some(*period),
    }
}

fn union_of<'a>(periods: impl Iterator<Item = &'a TimePeriod>) -> Option<TimePeriod> {
    periods.fold(None, |acc: Option<TimePeriod>, p| match acc {
        Some(mut acc) => {
            acc.extend(p);
            Some(acc)
        }
        None => Some(*p),
    })
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::cache::ContentCache;
    use crate::model::{Envelope, TimePeriod};

    #[test]
    fn test_envelope_updates_use_default_epsg() {
        let mut cache = ContentCache::new(31467);
        cache.update_envelope_for_offering("O1", &Envelope::point(1.0, 1.0));
        cache.update_envelope_for_offering("O1", &Envelope::point(3.0, -1.0));
        cache.update_global_envelope(&Envelope::point(1.0, 1.0));

        let env = cache.envelope_for_offering("O1").unwrap();
        assert_eq!(env.srid, 31467);
        assert_eq!(env.envelope, Envelope::new(1.0, -1.0, 3.0, 1.0));
        assert_eq!(cache.global_envelope().unwrap().srid, 31467);
    }

    #[test]
    fn test_recalculate_from_offerings() {
        let t = |d| Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap();
        let mut cache = ContentCache::default();
        cache.update_phenomenon_time_for_offering("O1", &TimePeriod::instant(t(5)));
        cache.update_phenomenon_time_for_offering("O2", &TimePeriod::new(t(2), t(3)));
        cache.update_global_phenomenon_time(&TimePeriod::instant(t(28)));

        cache.recalculate_phenomenon_time();
        assert_eq!(cache.global_phenomenon_time(), Some(TimePeriod::new(t(2), t(5))));

        cache.set_phenomenon_time_for_offering("O1", None);
        cache.set_phenomenon_time_for_offering("O2", None);
        cache.recalculate_phenomenon_time();
        assert!(cache.global_phenomenon_time().is_none());

        cache.update_envelope_for_offering("O1", &Envelope::point(0.0, 0.0));
        cache.update_envelope_for_offering("O2", &Envelope::point(4.0, 2.0));
        cache.recalculate_global_envelope();
        assert_eq!(cache.global_envelope().unwrap().envelope, Envelope::new(0.0, 0.0, 4.0, 2.0));
    }

    #[test]
    fn test_remove_result_template() {
        let mut cache = ContentCache::default();
        cache.add_result_template("T1");
        cache.add_result_template_for_offering("O1", "T1");
        cache.add_feature_of_interest_for_result_template("T1", "F1");
        cache.add_observable_property_for_result_template("T1", "OP1");

        cache.remove_result_template("T1");
        assert!(!cache.has_result_template("T1"));
        assert!(cache.result_templates_for_offering("O1").is_empty());
        assert!(cache.features_of_interest_for_result_template("T1").is_empty());
        assert!(cache.offerings_with_result_template().is_empty());
    }
}
