//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::{Condvar, Mutex};

use sos_cache::datasource::{
    CompositePhenomenonRecord, DataSource, FeatureQueryHandler, FeatureRecord, InMemoryDataSource,
    ObservablePropertyRecord, OfferingRecord, ProcedureRecord, RelatedFeatureRecord, ResultTemplateRecord,
};
use sos_cache::request::{
    InsertObservationRequest, InsertSensorRequest, InsertSensorResponse, Observation, ObservationConstellation,
    SamplingFeature, SosOffering,
};
use sos_cache::{CacheError, Envelope, Result, SpatialEnvelope, TimePeriod};

/// Blocks offering fetches until opened
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    opened: Condvar,
    entered: AtomicUsize,
}

impl Gate {
    pub fn pass(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock();
        while !*open {
            self.opened.wait(&mut open);
        }
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    /// Number of fetches that reached the gate
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }
}

/// In-memory data source with an optional gate and injectable failures
#[derive(Default)]
pub struct ScriptedSource {
    pub data: InMemoryDataSource,
    gate: Mutex<Option<Arc<Gate>>>,
    failing: Mutex<BTreeSet<String>>,
}

impl ScriptedSource {
    /// Source holding offering `O-db` served by procedure `P-db`
    pub fn new() -> Arc<Self> {
        let source = Self::default();
        source.data.insert_offering(offering_record("O-db", "P-db", "F-db"));
        source.data.insert_procedure(ProcedureRecord {
            identifier: "P-db".into(),
            observable_properties: vec!["OP-db".into()],
            ..Default::default()
        });
        source.data.insert_feature(FeatureRecord {
            identifier: "F-db".into(),
            procedures: vec!["P-db".into()],
            geometry: Some(Envelope::point(7.0, 51.0)),
            ..Default::default()
        });
        Arc::new(source)
    }

    /// Install a closed gate in front of every offering fetch
    pub fn gate(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    pub fn fail_offering(&self, offering: &str) {
        self.failing.lock().insert(offering.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().clear();
    }
}

impl DataSource for ScriptedSource {
    fn offering_identifiers(&self) -> Result<Vec<String>> {
        let mut ids = self.data.offering_identifiers()?;
        for failing in self.failing.lock().iter() {
            if !ids.contains(failing) {
                ids.push(failing.clone());
            }
        }
        Ok(ids)
    }

    fn offering(&self, identifier: &str) -> Result<OfferingRecord> {
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.pass();
        }
        if self.failing.lock().contains(identifier) {
            return Err(CacheError::OfferingFetch {
                offering: identifier.to_string(),
                reason: "connection reset by peer".to_string(),
            });
        }
        self.data.offering(identifier)
    }

    fn procedures(&self) -> Result<Vec<ProcedureRecord>> {
        self.data.procedures()
    }

    fn observable_properties(&self) -> Result<Vec<ObservablePropertyRecord>> {
        self.data.observable_properties()
    }

    fn features_of_interest(&self) -> Result<Vec<FeatureRecord>> {
        self.data.features_of_interest()
    }

    fn related_features(&self) -> Result<Vec<RelatedFeatureRecord>> {
        self.data.related_features()
    }

    fn composite_phenomena(&self) -> Result<Vec<CompositePhenomenonRecord>> {
        self.data.composite_phenomena()
    }

    fn result_templates(&self) -> Result<Vec<ResultTemplateRecord>> {
        self.data.result_templates()
    }

    fn observation_types(&self) -> Result<Vec<String>> {
        self.data.observation_types()
    }

    fn epsg_codes(&self) -> Result<Vec<i32>> {
        self.data.epsg_codes()
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

impl FeatureQueryHandler for ScriptedSource {
    fn envelope_for_features(&self, features: &[String]) -> Result<Option<SpatialEnvelope>> {
        self.data.envelope_for_features(features)
    }
}

pub fn offering_record(offering: &str, procedure: &str, feature: &str) -> OfferingRecord {
    let mut record = OfferingRecord::new(offering);
    record.name = Some(format!("{} offering", offering));
    record.procedures = vec![procedure.into()];
    record.observable_properties = vec!["OP-db".into()];
    record.features_of_interest = vec![feature.into()];
    record.phenomenon_time = Some(TimePeriod::new(at(1), at(3)));
    record
}

pub fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap()
}

pub fn ids(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn sensor(procedure: &str, offering: &str, properties: &[&str]) -> (InsertSensorRequest, InsertSensorResponse) {
    let request = InsertSensorRequest {
        offerings: vec![SosOffering::new(offering).with_name(format!("{} offering", offering))],
        observable_properties: properties.iter().map(|p| p.to_string()).collect(),
        observation_types: vec!["OM_Measurement".into()],
        ..Default::default()
    };
    let response = InsertSensorResponse {
        assigned_procedure: procedure.into(),
        assigned_offering: offering.into(),
    };
    (request, response)
}

pub fn observation(procedure: &str, property: &str, feature: &str, day: u32) -> Observation {
    Observation {
        identifier: Some(format!("{}/{}/{}", procedure, feature, day)),
        constellation: ObservationConstellation {
            procedure: procedure.into(),
            observable_property: property.into(),
            observation_type: Some("OM_Measurement".into()),
            feature_of_interest: SamplingFeature::new(feature)
                .with_geometry(Envelope::point(day as f64, 10.0))
                .into(),
            offerings: vec![],
        },
        phenomenon_time: TimePeriod::instant(at(day)),
        result_time: Some(TimePeriod::instant(at(day))),
    }
}

pub fn observations(offering: &str, observations: Vec<Observation>) -> InsertObservationRequest {
    InsertObservationRequest {
        offerings: vec![offering.into()],
        observations,
    }
}

/// Poll `condition` for up to five seconds
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}
