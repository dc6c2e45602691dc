//! Referential integrity checks

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use super::{ContentCache, Relation};

/// A reference to an identifier missing from its primary set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityViolation {
    pub relation: &'static str,
    pub identifier: String,
    pub problem: &'static str,
}

impl fmt::Display for IntegrityViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: '{}' {}", self.relation, self.identifier, self.problem)
    }
}

impl ContentCache {
    /// Every referential invariant the cache currently violates
    ///
    /// An empty result means: all referenced offerings exist, all features
    /// of offerings and result templates are known, all procedures used in
    /// relations are known, every result template has non-empty feature and
    /// observable-property sets, and global bounds are present exactly when
    /// some offering has bounds.
    pub fn integrity_violations(&self) -> Vec<IntegrityViolation> {
        let mut out = Vec::new();
        let offerings = self.offerings();

        let offering_keyed: [(&'static str, BTreeSet<String>); 13] = [
            ("observable_properties_for_offerings", self.observable_properties_for_offerings.key_set()),
            ("features_for_offerings", self.features_for_offerings.key_set()),
            ("related_features_for_offerings", self.related_features_for_offerings.key_set()),
            ("observation_types_for_offerings", self.observation_types_for_offerings.key_set()),
            ("allowed_observation_types_for_offerings", self.allowed_observation_types_for_offerings.key_set()),
            ("composite_phenomena_for_offerings", self.composite_phenomena_for_offerings.key_set()),
            ("result_templates_for_offerings", self.result_templates_for_offerings.key_set()),
            ("names_for_offerings", self.names_for_offerings.keys().cloned().collect()),
            ("envelopes_for_offerings", self.envelopes_for_offerings.keys().cloned().collect()),
            ("phenomenon_time_for_offerings", self.phenomenon_time_for_offerings.keys().cloned().collect()),
            ("result_time_for_offerings", self.result_time_for_offerings.keys().cloned().collect()),
            ("offerings_for_procedures", self.offerings_for_procedures.all_values()),
            ("offerings_for_observable_properties", self.offerings_for_observable_properties.all_values()),
        ];
        for (relation, referenced) in offering_keyed {
            missing(&mut out, relation, referenced.iter(), &offerings, "references an unknown offering");
        }

        missing(
            &mut out,
            "features_for_offerings",
            self.features_for_offerings.all_values().iter(),
            &self.features_of_interest,
            "is not a known feature of interest",
        );
        missing(
            &mut out,
            "features_for_result_templates",
            self.features_for_result_templates.all_values().iter(),
            &self.features_of_interest,
            "is not a known feature of interest",
        );

        let procedure_refs: [(&'static str, BTreeSet<String>); 6] = [
            ("procedures_for_offerings", self.procedures_for_offerings.all_values()),
            ("procedures_for_features", self.procedures_for_features.all_values()),
            ("procedures_for_observable_properties", self.procedures_for_observable_properties.all_values()),
            ("offerings_for_procedures", self.offerings_for_procedures.key_set()),
            ("observable_properties_for_procedures", self.observable_properties_for_procedures.key_set()),
            ("observation_identifiers_for_procedures", self.observation_identifiers_for_procedures.key_set()),
        ];
        for (relation, referenced) in procedure_refs {
            missing(&mut out, relation, referenced.iter(), &self.procedures, "is not a known procedure");
        }

        for template in &self.result_templates {
            check_non_empty(&mut out, "features_for_result_templates", &self.features_for_result_templates, template);
            check_non_empty(
                &mut out,
                "observable_properties_for_result_templates",
                &self.observable_properties_for_result_templates,
                template,
            );
        }

        if self.global_phenomenon_time.is_some() != !self.phenomenon_time_for_offerings.is_empty() {
            out.push(IntegrityViolation {
                relation: "global_phenomenon_time",
                identifier: format!("{:?}", self.global_phenomenon_time),
                problem: "disagrees with the offering phenomenon times",
            });
        }
        if self.global_envelope.is_some() != !self.envelopes_for_offerings.is_empty() {
            out.push(IntegrityViolation {
                relation: "global_envelope",
                identifier: format!("{:?}", self.global_envelope.map(|e| e.envelope)),
                problem: "disagrees with the offering envelopes",
            });
        }

        out
    }
}

fn missing<'a>(
    out: &mut Vec<IntegrityViolation>,
    relation: &'static str,
    referenced: impl Iterator<Item = &'a String>,
    known: &BTreeSet<String>,
    problem: &'static str,
) {
    for id in referenced {
        if !known.contains(id) {
            out.push(IntegrityViolation {
                relation,
                identifier: id.clone(),
                problem,
            });
        }
    }
}

fn check_non_empty(out: &mut Vec<IntegrityViolation>, relation: &'static str, rel: &Relation, template: &str) {
    if !rel.contains_key(template) {
        out.push(IntegrityViolation {
            relation,
            identifier: template.to_string(),
            problem: "result template has no entries",
        });
    }
}
