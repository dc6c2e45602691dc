//! Capabilities content cache
//!
//! [`ContentCache`] indexes everything a client can ask the service about:
//! offerings, procedures, observable properties, features of interest,
//! result templates and the spatial/temporal extent of each offering.
//! It is plain data. Mutators live in `write`, the procedure removal cascade
//! in `cascade` and the referential checks in `integrity`; sequencing and
//! publication belong to the controller.
//!
//! ```text
//!   offering ──► procedures, observable properties, features, related
//!      │         features, observation types, result templates, name,
//!      │         envelope, phenomenon time, result time
//!      ▼
//!   global envelope / phenomenon time / result time  (union of offerings)
//! ```
//!
//! An offering exists while at least one procedure is associated with it.

mod cascade;
mod integrity;
mod relation;
mod write;

pub use cascade::RemovalReport;
pub use integrity::IntegrityViolation;
pub use relation::Relation;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_EPSG;
use crate::model::{SpatialEnvelope, TimePeriod};

/// Index of the service's queryable content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentCache {
    default_epsg: i32,

    procedures: BTreeSet<String>,
    features_of_interest: BTreeSet<String>,
    feature_of_interest_types: BTreeSet<String>,
    observation_identifiers: BTreeSet<String>,
    observation_types: BTreeSet<String>,
    result_templates: BTreeSet<String>,
    epsg_codes: BTreeSet<i32>,

    procedures_for_offerings: Relation,
    observable_properties_for_offerings: Relation,
    features_for_offerings: Relation,
    related_features_for_offerings: Relation,
    observation_types_for_offerings: Relation,
    allowed_observation_types_for_offerings: Relation,
    composite_phenomena_for_offerings: Relation,
    result_templates_for_offerings: Relation,
    names_for_offerings: BTreeMap<String, String>,
    envelopes_for_offerings: BTreeMap<String, SpatialEnvelope>,
    phenomenon_time_for_offerings: BTreeMap<String, TimePeriod>,
    result_time_for_offerings: BTreeMap<String, TimePeriod>,

    offerings_for_procedures: Relation,
    observable_properties_for_procedures: Relation,
    observation_identifiers_for_procedures: Relation,
    parent_procedures: Relation,
    child_procedures: Relation,

    offerings_for_observable_properties: Relation,
    procedures_for_observable_properties: Relation,
    observable_properties_for_composite_phenomena: Relation,

    procedures_for_features: Relation,
    parent_features: Relation,
    child_features: Relation,
    roles_for_related_features: Relation,

    features_for_result_templates: Relation,
    observable_properties_for_result_templates: Relation,

    global_envelope: Option<SpatialEnvelope>,
    global_phenomenon_time: Option<TimePeriod>,
    global_result_time: Option<TimePeriod>,
}

impl Default for ContentCache {
    fn default() -> Self {
        Self::new(DEFAULT_EPSG)
    }
}

impl ContentCache {
    /// Create an empty cache whose computed envelopes use `default_epsg`
    pub fn new(default_epsg: i32) -> Self {
        Self {
            default_epsg,
            procedures: BTreeSet::new(),
            features_of_interest: BTreeSet::new(),
            feature_of_interest_types: BTreeSet::new(),
            observation_identifiers: BTreeSet::new(),
            observation_types: BTreeSet::new(),
            result_templates: BTreeSet::new(),
            epsg_codes: BTreeSet::new(),
            procedures_for_offerings: Relation::new(),
            observable_properties_for_offerings: Relation::new(),
            features_for_offerings: Relation::new(),
            related_features_for_offerings: Relation::new(),
            observation_types_for_offerings: Relation::new(),
            allowed_observation_types_for_offerings: Relation::new(),
            composite_phenomena_for_offerings: Relation::new(),
            result_templates_for_offerings: Relation::new(),
            names_for_offerings: BTreeMap::new(),
            envelopes_for_offerings: BTreeMap::new(),
            phenomenon_time_for_offerings: BTreeMap::new(),
            result_time_for_offerings: BTreeMap::new(),
            offerings_for_procedures: Relation::new(),
            observable_properties_for_procedures: Relation::new(),
            observation_identifiers_for_procedures: Relation::new(),
            parent_procedures: Relation::new(),
            child_procedures: Relation::new(),
            offerings_for_observable_properties: Relation::new(),
            procedures_for_observable_properties: Relation::new(),
            observable_properties_for_composite_phenomena: Relation::new(),
            procedures_for_features: Relation::new(),
            parent_features: Relation::new(),
            child_features: Relation::new(),
            roles_for_related_features: Relation::new(),
            features_for_result_templates: Relation::new(),
            observable_properties_for_result_templates: Relation::new(),
            global_envelope: None,
            global_phenomenon_time: None,
            global_result_time: None,
        }
    }

    pub fn default_epsg(&self) -> i32 {
        self.default_epsg
    }

    /// True if nothing has been added yet
    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
            && self.procedures_for_offerings.is_empty()
            && self.features_of_interest.is_empty()
            && self.result_templates.is_empty()
            && self.observation_types.is_empty()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Offerings
    // ═══════════════════════════════════════════════════════════════════════

    pub fn offerings(&self) -> BTreeSet<String> {
        self.procedures_for_offerings.key_set()
    }

    pub fn has_offering(&self, offering: &str) -> bool {
        self.procedures_for_offerings.contains_key(offering)
    }

    pub fn procedures_for_offering(&self, offering: &str) -> BTreeSet<String> {
        self.procedures_for_offerings.get(offering)
    }

    /// Observable properties of the offering, including members of its
    /// composite phenomena
    pub fn observable_properties_for_offering(&self, offering: &str) -> BTreeSet<String> {
        let mut result = self.observable_properties_for_offerings.get(offering);
        if let Some(composites) = self.composite_phenomena_for_offerings.values_of(offering) {
            for composite in composites {
                result.extend(self.observable_properties_for_composite_phenomena.get(composite));
            }
        }
        result
    }

    pub fn envelope_for_offering(&self, offering: &str) -> Option<SpatialEnvelope> {
        self.envelopes_for_offerings.get(offering).copied()
    }

    pub fn features_of_interest_for_offering(&self, offering: &str) -> BTreeSet<String> {
        self.features_for_offerings.get(offering)
    }

    pub fn phenomenon_time_for_offering(&self, offering: &str) -> Option<TimePeriod> {
        self.phenomenon_time_for_offerings.get(offering).copied()
    }

    pub fn result_time_for_offering(&self, offering: &str) -> Option<TimePeriod> {
        self.result_time_for_offerings.get(offering).copied()
    }

    pub fn name_for_offering(&self, offering: &str) -> Option<&str> {
        self.names_for_offerings.get(offering).map(String::as_str)
    }

    pub fn related_features_for_offering(&self, offering: &str) -> BTreeSet<String> {
        self.related_features_for_offerings.get(offering)
    }

    pub fn observation_types_for_offering(&self, offering: &str) -> BTreeSet<String> {
        self.observation_types_for_offerings.get(offering)
    }

    pub fn allowed_observation_types_for_offering(&self, offering: &str) -> BTreeSet<String> {
        self.allowed_observation_types_for_offerings.get(offering)
    }

    pub fn result_templates_for_offering(&self, offering: &str) -> BTreeSet<String> {
        self.result_templates_for_offerings.get(offering)
    }

    pub fn composite_phenomena_for_offering(&self, offering: &str) -> BTreeSet<String> {
        self.composite_phenomena_for_offerings.get(offering)
    }

    pub fn offerings_with_result_template(&self) -> BTreeSet<String> {
        self.result_templates_for_offerings.key_set()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Procedures
    // ═══════════════════════════════════════════════════════════════════════

    pub fn procedures(&self) -> BTreeSet<String> {
        self.procedures.clone()
    }

    pub fn has_procedure(&self, procedure: &str) -> bool {
        self.procedures.contains(procedure)
    }

    pub fn offerings_for_procedure(&self, procedure: &str) -> BTreeSet<String> {
        self.offerings_for_procedures.get(procedure)
    }

    pub fn observable_properties_for_procedure(&self, procedure: &str) -> BTreeSet<String> {
        self.observable_properties_for_procedures.get(procedure)
    }

    pub fn observation_identifiers_for_procedure(&self, procedure: &str) -> BTreeSet<String> {
        self.observation_identifiers_for_procedures.get(procedure)
    }

    /// Parents of a procedure, optionally transitive and including itself
    pub fn parent_procedures(&self, procedure: &str, full_hierarchy: bool, include_self: bool) -> BTreeSet<String> {
        hierarchy(&self.parent_procedures, procedure, full_hierarchy, include_self)
    }

    pub fn child_procedures(&self, procedure: &str, full_hierarchy: bool, include_self: bool) -> BTreeSet<String> {
        hierarchy(&self.child_procedures, procedure, full_hierarchy, include_self)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Observable properties
    // ═══════════════════════════════════════════════════════════════════════

    /// Every observable property offered by some offering
    pub fn observable_properties(&self) -> BTreeSet<String> {
        self.observable_properties_for_offerings.all_values()
    }

    pub fn has_observable_property(&self, observable_property: &str) -> bool {
        self.observable_properties_for_offerings
            .iter()
            .any(|(_, values)| values.contains(observable_property))
    }

    pub fn offerings_for_observable_property(&self, observable_property: &str) -> BTreeSet<String> {
        self.offerings_for_observable_properties.get(observable_property)
    }

    pub fn procedures_for_observable_property(&self, observable_property: &str) -> BTreeSet<String> {
        self.procedures_for_observable_properties.get(observable_property)
    }

    pub fn observable_properties_for_composite_phenomenon(&self, composite: &str) -> BTreeSet<String> {
        self.observable_properties_for_composite_phenomena.get(composite)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Features of interest
    // ═══════════════════════════════════════════════════════════════════════

    pub fn features_of_interest(&self) -> BTreeSet<String> {
        self.features_of_interest.clone()
    }

    pub fn has_feature_of_interest(&self, feature: &str) -> bool {
        self.features_of_interest.contains(feature)
    }

    pub fn feature_of_interest_types(&self) -> BTreeSet<String> {
        self.feature_of_interest_types.clone()
    }

    pub fn procedures_for_feature_of_interest(&self, feature: &str) -> BTreeSet<String> {
        self.procedures_for_features.get(feature)
    }

    pub fn parent_features(&self, feature: &str, full_hierarchy: bool, include_self: bool) -> BTreeSet<String> {
        hierarchy(&self.parent_features, feature, full_hierarchy, include_self)
    }

    pub fn child_features(&self, feature: &str, full_hierarchy: bool, include_self: bool) -> BTreeSet<String> {
        hierarchy(&self.child_features, feature, full_hierarchy, include_self)
    }

    /// Features related to any offering
    pub fn related_features(&self) -> BTreeSet<String> {
        self.related_features_for_offerings.all_values()
    }

    pub fn has_related_feature(&self, feature: &str) -> bool {
        self.related_features_for_offerings
            .iter()
            .any(|(_, values)| values.contains(feature))
    }

    pub fn roles_for_related_feature(&self, feature: &str) -> BTreeSet<String> {
        self.roles_for_related_features.get(feature)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Result templates, observations, global extent
    // ═══════════════════════════════════════════════════════════════════════

    pub fn result_templates(&self) -> BTreeSet<String> {
        self.result_templates.clone()
    }

    pub fn has_result_template(&self, template: &str) -> bool {
        self.result_templates.contains(template)
    }

    pub fn features_of_interest_for_result_template(&self, template: &str) -> BTreeSet<String> {
        self.features_for_result_templates.get(template)
    }

    pub fn observable_properties_for_result_template(&self, template: &str) -> BTreeSet<String> {
        self.observable_properties_for_result_templates.get(template)
    }

    pub fn observation_identifiers(&self) -> BTreeSet<String> {
        self.observation_identifiers.clone()
    }

    pub fn has_observation_identifier(&self, identifier: &str) -> bool {
        self.observation_identifiers.contains(identifier)
    }

    pub fn observation_types(&self) -> BTreeSet<String> {
        self.observation_types.clone()
    }

    pub fn epsg_codes(&self) -> BTreeSet<i32> {
        self.epsg_codes.clone()
    }

    pub fn global_envelope(&self) -> Option<SpatialEnvelope> {
        self.global_envelope
    }

    pub fn global_phenomenon_time(&self) -> Option<TimePeriod> {
        self.global_phenomenon_time
    }

    pub fn global_result_time(&self) -> Option<TimePeriod> {
        self.global_result_time
    }
}

/// Walk a parent or child relation starting at `start`
fn hierarchy(relation: &Relation, start: &str, full: bool, include_self: bool) -> BTreeSet<String> {
    let mut result = BTreeSet::new();
    let mut pending: Vec<String> = relation.get(start).into_iter().collect();
    while let Some(next) = pending.pop() {
        if next == start || !result.insert(next.clone()) {
            continue;
        }
        if full {
            pending.extend(relation.get(&next));
        }
    }
    if include_self {
        result.insert(start.to_string());
    }
    result
}

#[cfg(test)]
pub(crate) fn ids(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}
