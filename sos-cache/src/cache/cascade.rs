//! Removal of a procedure and everything that only existed because of it

use std::collections::BTreeSet;

use tracing::{debug, trace};

use super::ContentCache;

/// What a procedure removal took out of the cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalReport {
    pub offerings: BTreeSet<String>,
    pub features_of_interest: BTreeSet<String>,
    pub related_features: BTreeSet<String>,
    pub observation_identifiers: BTreeSet<String>,
    pub result_templates: BTreeSet<String>,
}

impl ContentCache {
    /// Remove `procedure` and cascade to every entry left orphaned
    ///
    /// Steps run in this order so no intermediate state references an entry
    /// that was already removed:
    /// 1. feature ↔ procedure
    /// 2. offering ↔ procedure
    /// 3. procedure → observation identifiers
    /// 4. per offering left without procedures: time bounds, envelope, name,
    ///    features, related features, observation types, result templates
    /// 5. globally orphaned features, related features, observation ids
    /// 6. global envelope and time bounds from the remaining offerings
    /// 7. observable property ↔ procedure, hierarchy, the procedure itself
    ///
    /// Offerings still served by another procedure keep their descriptive
    /// data, minus the features whose only procedure was this one.
    pub fn remove_procedure_cascading(&mut self, procedure: &str) -> RemovalReport {
        let mut report = RemovalReport::default();

        // 1. features lose the procedure; those left with none are orphaned
        let orphaned_features: BTreeSet<String> = self
            .procedures_for_features
            .remove_value_everywhere(procedure)
            .into_iter()
            .collect();

        // 2. offerings lose the procedure
        let mut affected = self.offerings_for_procedures.get(procedure);
        affected.extend(
            self.procedures_for_offerings
                .iter()
                .filter(|(_, procs)| procs.contains(procedure))
                .map(|(offering, _)| offering.clone())
                .collect::<Vec<_>>(),
        );
        let mut orphaned_offerings = BTreeSet::new();
        for offering in &affected {
            self.procedures_for_offerings.remove_value(offering, procedure);
            if !self.procedures_for_offerings.contains_key(offering) {
                orphaned_offerings.insert(offering.clone());
            }
        }

        // 3. observation identifiers of the procedure
        self.observation_identifiers_for_procedures.remove_key(procedure);

        // 4. per-offering data
        for offering in &orphaned_offerings {
            trace!(offering = offering.as_str(), "Removing orphaned offering");
            report
                .result_templates
                .extend(self.remove_offering_data(offering));
        }
        for feature in &orphaned_features {
            self.features_for_offerings.remove_value_everywhere(feature);
            for template in self.features_for_result_templates.remove_value_everywhere(feature) {
                // a template must keep a non-empty feature set
                self.remove_result_template(&template);
                report.result_templates.insert(template);
            }
        }

        // 5. global sets
        let referenced_features = self.features_for_offerings.all_values();
        let features_before = std::mem::take(&mut self.features_of_interest);
        let (kept, dropped): (BTreeSet<String>, BTreeSet<String>) = features_before
            .into_iter()
            .partition(|f| referenced_features.contains(f));
        self.features_of_interest = kept;
        for feature in &dropped {
            self.procedures_for_features.remove_key(feature);
            self.remove_feature_hierarchy(feature);
        }
        report.features_of_interest = dropped;

        let referenced_related = self.related_features_for_offerings.all_values();
        let related_before = self.roles_for_related_features.key_set();
        self.roles_for_related_features
            .retain_keys(|f| referenced_related.contains(f));
        report.related_features = related_before
            .difference(&self.roles_for_related_features.key_set())
            .cloned()
            .collect();

        let referenced_observations = self.observation_identifiers_for_procedures.all_values();
        let observations_before = std::mem::take(&mut self.observation_identifiers);
        let (kept, dropped): (BTreeSet<String>, BTreeSet<String>) = observations_before
            .into_iter()
            .partition(|o| referenced_observations.contains(o));
        self.observation_identifiers = kept;
        report.observation_identifiers = dropped;

        // 6. global extent
        self.recalculate_phenomenon_time();
        self.recalculate_result_time();
        self.recalculate_global_envelope();

        // 7. observable properties, hierarchy, procedure
        self.procedures_for_observable_properties
            .remove_value_everywhere(procedure);
        self.observable_properties_for_procedures.remove_key(procedure);

        self.parent_procedures.remove_key(procedure);
        self.parent_procedures.remove_value_everywhere(procedure);
        self.child_procedures.remove_key(procedure);
        self.child_procedures.remove_value_everywhere(procedure);

        self.offerings_for_procedures.remove_key(procedure);
        self.procedures.remove(procedure);

        report.offerings = orphaned_offerings;
        debug!(
            procedure,
            offerings = report.offerings.len(),
            features = report.features_of_interest.len(),
            observations = report.observation_identifiers.len(),
            "Removed procedure"
        );
        report
    }

    /// Drop every entry keyed by an offering that has no procedures left;
    /// returns the result templates removed with it
    fn remove_offering_data(&mut self, offering: &str) -> BTreeSet<String> {
        self.procedures_for_offerings.remove_key(offering);
        self.phenomenon_time_for_offerings.remove(offering);
        self.result_time_for_offerings.remove(offering);
        self.envelopes_for_offerings.remove(offering);
        self.names_for_offerings.remove(offering);
        self.features_for_offerings.remove_key(offering);
        self.related_features_for_offerings.remove_key(offering);
        self.observation_types_for_offerings.remove_key(offering);
        self.allowed_observation_types_for_offerings.remove_key(offering);
        self.composite_phenomena_for_offerings.remove_key(offering);
        self.observable_properties_for_offerings.remove_key(offering);
        self.offerings_for_observable_properties
            .remove_value_everywhere(offering);
        self.offerings_for_procedures.remove_value_everywhere(offering);

        let templates = self
            .result_templates_for_offerings
            .remove_key(offering)
            .unwrap_or_default();
        for template in &templates {
            self.remove_result_template(template);
        }
        templates
    }

    fn remove_feature_hierarchy(&mut self, feature: &str) {
        self.parent_features.remove_key(feature);
        self.parent_features.remove_value_everywhere(feature);
        self.child_features.remove_key(feature);
        self.child_features.remove_value_everywhere(feature);
    }
}
