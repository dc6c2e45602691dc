//! Result template insertion

use tracing::debug;

use crate::cache::ContentCache;
use crate::error::Result;
use crate::request::{require, require_all, InsertResultTemplateRequest, InsertResultTemplateResponse};

/// Registers a result template and the observation constellation it implies
#[derive(Debug, Clone)]
pub struct ResultTemplateInsertion {
    request: InsertResultTemplateRequest,
    response: InsertResultTemplateResponse,
}

impl ResultTemplateInsertion {
    pub fn new(request: InsertResultTemplateRequest, response: InsertResultTemplateResponse) -> Result<Self> {
        const REQUEST: &str = "InsertResultTemplate";
        require(&response.accepted_template, REQUEST, "accepted_template")?;
        request.observation_template.validate(REQUEST)?;
        require_all(&request.observation_template.offerings, REQUEST, "observation_template.offerings")?;
        Ok(Self { request, response })
    }

    pub fn template(&self) -> &str {
        &self.response.accepted_template
    }

    pub(crate) fn apply(&self, cache: &mut ContentCache) {
        let template = self.template();
        let constellation = &self.request.observation_template;
        let procedure = constellation.procedure.as_str();
        let observable_property = constellation.observable_property.as_str();

        cache.add_result_template(template);
        cache.add_observable_property_for_result_template(template, observable_property);

        cache.add_procedure(procedure);
        cache.add_procedure_for_observable_property(observable_property, procedure);
        cache.add_observable_property_for_procedure(procedure, observable_property);
        if let Some(observation_type) = &constellation.observation_type {
            cache.add_observation_type(observation_type);
        }

        for feature in constellation.feature_of_interest.flatten() {
            let id = feature.identifier.as_str();
            cache.add_feature_of_interest(id);
            cache.add_feature_of_interest_for_result_template(template, id);
            cache.add_procedure_for_feature_of_interest(id, procedure);
            if let Some(feature_type) = &feature.feature_type {
                cache.add_feature_of_interest_type(feature_type);
            }
            cache.add_parent_features(id, &feature.sampled_features);
            for offering in &constellation.offerings {
                cache.add_feature_of_interest_for_offering(offering, id);
            }
        }

        for offering in &constellation.offerings {
            cache.add_result_template_for_offering(offering, template);
            cache.add_procedure_for_offering(offering, procedure);
            cache.add_offering_for_procedure(procedure, offering);
            cache.add_observable_property_for_offering(offering, observable_property);
            cache.add_offering_for_observable_property(observable_property, offering);
            if let Some(observation_type) = &constellation.observation_type {
                cache.add_observation_type_for_offering(offering, observation_type);
            }
            if let Some(period) = &self.request.phenomenon_time {
                cache.update_phenomenon_time_for_offering(offering, period);
            }
        }
        if let Some(period) = &self.request.phenomenon_time {
            cache.update_global_phenomenon_time(period);
        }
        debug!(template, procedure, "Applied result template insertion");
    }
}
