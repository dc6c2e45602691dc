//! Sensor insertion and deletion

use tracing::debug;

use crate::cache::ContentCache;
use crate::error::Result;
use crate::request::{require, require_all, DeleteSensorRequest, InsertSensorRequest, InsertSensorResponse};

/// Registers a newly inserted procedure and its offering
///
/// Adds procedure ↔ offering, offering → name, offering → allowed
/// observation types, offering → related features with their roles, and
/// observable property ↔ procedure / offering in both directions.
#[derive(Debug, Clone)]
pub struct SensorInsertion {
    request: InsertSensorRequest,
    response: InsertSensorResponse,
}

impl SensorInsertion {
    pub fn new(request: InsertSensorRequest, response: InsertSensorResponse) -> Result<Self> {
        const REQUEST: &str = "InsertSensor";
        require(&response.assigned_procedure, REQUEST, "assigned_procedure")?;
        require(&response.assigned_offering, REQUEST, "assigned_offering")?;
        require_all(&request.observable_properties, REQUEST, "observable_properties")?;
        for related in &request.related_features {
            require(&related.identifier, REQUEST, "related_features.identifier")?;
            require(&related.role, REQUEST, "related_features.role")?;
        }
        Ok(Self { request, response })
    }

    pub fn procedure(&self) -> &str {
        &self.response.assigned_procedure
    }

    pub fn offering(&self) -> &str {
        &self.response.assigned_offering
    }

    pub(crate) fn apply(&self, cache: &mut ContentCache) {
        let procedure = self.procedure();
        let offering = self.offering();

        cache.add_procedure(procedure);
        cache.add_parent_procedures(procedure, &self.request.parent_procedures);

        cache.add_procedure_for_offering(offering, procedure);
        cache.add_offering_for_procedure(procedure, offering);
        let name = self
            .request
            .offerings
            .iter()
            .find(|o| o.identifier == offering)
            .and_then(|o| o.name.as_deref());
        if let Some(name) = name {
            cache.set_name_for_offering(offering, name);
        }

        cache.add_allowed_observation_types_for_offering(offering, &self.request.observation_types);

        for related in &self.request.related_features {
            cache.add_related_feature_for_offering(offering, &related.identifier);
            cache.add_role_for_related_feature(&related.identifier, &related.role);
        }

        for observable_property in &self.request.observable_properties {
            cache.add_procedure_for_observable_property(observable_property, procedure);
            cache.add_observable_property_for_procedure(procedure, observable_property);
            cache.add_offering_for_observable_property(observable_property, offering);
            cache.add_observable_property_for_offering(offering, observable_property);
        }
        debug!(procedure, offering, "Applied sensor insertion");
    }
}

/// Removes a procedure and cascades to everything orphaned by it
#[derive(Debug, Clone)]
pub struct SensorDeletion {
    procedure: String,
}

impl SensorDeletion {
    pub fn new(request: DeleteSensorRequest) -> Result<Self> {
        require(&request.procedure, "DeleteSensor", "procedure")?;
        Ok(Self {
            procedure: request.procedure,
        })
    }

    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    pub(crate) fn apply(&self, cache: &mut ContentCache) {
        if !cache.has_procedure(&self.procedure) {
            debug!(procedure = self.procedure.as_str(), "Deleting unknown procedure");
        }
        cache.remove_procedure_cascading(&self.procedure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ids;
    use crate::request::RelatedFeature;
    use crate::update::fixtures::sensor;

    #[test]
    fn test_insertion_adds_all_relations() {
        let (mut req, resp) = sensor("P1", "O1", &["OP1", "OP2"]);
        req.related_features.push(RelatedFeature {
            identifier: "station-7".into(),
            role: "featureOfInterestType".into(),
        });
        req.parent_procedures.push("network".into());

        let mut cache = ContentCache::default();
        SensorInsertion::new(req, resp).unwrap().apply(&mut cache);

        assert_eq!(cache.offerings(), ids(&["O1"]));
        assert_eq!(cache.procedures_for_offering("O1"), ids(&["P1"]));
        assert_eq!(cache.offerings_for_procedure("P1"), ids(&["O1"]));
        assert_eq!(cache.name_for_offering("O1"), Some("O1 offering"));
        assert_eq!(cache.allowed_observation_types_for_offering("O1"), ids(&["OM_Measurement"]));
        assert_eq!(cache.related_features_for_offering("O1"), ids(&["station-7"]));
        assert_eq!(cache.roles_for_related_feature("station-7"), ids(&["featureOfInterestType"]));
        assert_eq!(cache.observable_properties_for_procedure("P1"), ids(&["OP1", "OP2"]));
        assert_eq!(cache.observable_properties_for_offering("O1"), ids(&["OP1", "OP2"]));
        assert_eq!(cache.procedures_for_observable_property("OP2"), ids(&["P1"]));
        assert_eq!(cache.offerings_for_observable_property("OP1"), ids(&["O1"]));
        assert_eq!(cache.parent_procedures("P1", false, false), ids(&["network"]));
        assert!(cache.integrity_violations().is_empty());
    }

    #[test]
    fn test_insertion_is_idempotent() {
        let (req, resp) = sensor("P1", "O1", &["OP1"]);
        let update = SensorInsertion::new(req, resp).unwrap();

        let mut once = ContentCache::default();
        update.apply(&mut once);
        let mut twice = once.clone();
        update.apply(&mut twice);

        assert_eq!(once, twice);
    }

    #[test]
    fn test_deletion_reverts_insertion() {
        let (req, resp) = sensor("P1", "O1", &["OP1"]);
        let mut cache = ContentCache::default();
        SensorInsertion::new(req, resp).unwrap().apply(&mut cache);

        SensorDeletion::new(DeleteSensorRequest { procedure: "P1".into() })
            .unwrap()
            .apply(&mut cache);

        assert!(cache.offerings().is_empty());
        assert!(cache.procedures().is_empty());
        assert!(cache.observable_properties().is_empty());
        assert!(cache.name_for_offering("O1").is_none());
        assert!(cache.allowed_observation_types_for_offering("O1").is_empty());
        assert_eq!(cache, ContentCache::default());
    }
}
