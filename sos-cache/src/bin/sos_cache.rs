//! SOS Cache CLI - Inspect and build cache snapshots
//!
//! Usage:
//!     sos-cache cache.snapshot
//!     sos-cache cache.snapshot --offering urn:offering:air --json
//!     sos-cache cache.snapshot --verify
//!     sos-cache cache.snapshot --rebuild-from dataset.json --threads 8

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use serde::Serialize;
use sos_cache::snapshot::{FileSnapshotStore, NullSnapshotStore, SnapshotHeader};
use sos_cache::{
    CacheController, ContentCache, ControllerConfig, InMemoryDataSource, SpatialEnvelope, TimePeriod,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sos-cache")]
#[command(about = "Inspect, verify and build SOS capabilities cache snapshots")]
#[command(version)]
struct Args {
    /// Snapshot file
    snapshot: PathBuf,

    /// Show a single offering instead of the summary
    #[arg(short, long)]
    offering: Option<String>,

    /// Check referential integrity; exit code 1 on violations
    #[arg(long)]
    verify: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,

    /// Rebuild from a dataset JSON file and write the snapshot first
    #[arg(long, value_name = "DATASET")]
    rebuild_from: Option<PathBuf>,

    /// Worker threads for --rebuild-from (default: one per CPU)
    #[arg(long)]
    threads: Option<usize>,
}

#[derive(Serialize)]
struct Summary {
    saved_at: String,
    offerings: usize,
    procedures: usize,
    observable_properties: usize,
    features_of_interest: usize,
    result_templates: usize,
    observation_identifiers: usize,
    global_envelope: Option<SpatialEnvelope>,
    global_phenomenon_time: Option<TimePeriod>,
    global_result_time: Option<TimePeriod>,
}

#[derive(Serialize)]
struct OfferingDetails {
    identifier: String,
    name: Option<String>,
    procedures: BTreeSet<String>,
    observable_properties: BTreeSet<String>,
    features_of_interest: BTreeSet<String>,
    related_features: BTreeSet<String>,
    observation_types: BTreeSet<String>,
    result_templates: BTreeSet<String>,
    envelope: Option<SpatialEnvelope>,
    phenomenon_time: Option<TimePeriod>,
    result_time: Option<TimePeriod>,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sos_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    let store = FileSnapshotStore::new(&args.snapshot);

    if let Some(dataset) = &args.rebuild_from {
        if let Err(e) = rebuild(dataset, args.threads, &store) {
            eprintln!("Error rebuilding cache: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let (header, cache) = match store.read() {
        Ok(read) => read,
        Err(e) => {
            eprintln!("Error reading snapshot: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.verify {
        return verify(&cache, args.json);
    }

    match &args.offering {
        Some(offering) if !cache.has_offering(offering) => {
            eprintln!("Unknown offering: {}", offering);
            ExitCode::FAILURE
        }
        Some(offering) => {
            output(&offering_details(&cache, offering), args.json, print_offering);
            ExitCode::SUCCESS
        }
        None => {
            output(&summary(&header, &cache), args.json, print_summary);
            ExitCode::SUCCESS
        }
    }
}

fn rebuild(dataset: &Path, threads: Option<usize>, store: &FileSnapshotStore) -> sos_cache::Result<()> {
    use sos_cache::SnapshotStore;

    let source = Arc::new(InMemoryDataSource::from_json_file(dataset)?);
    let mut config = ControllerConfig::default().with_persist_on_shutdown(false);
    if let Some(threads) = threads {
        config = config.with_rebuild_threads(threads);
    }
    let controller = CacheController::with_store(config, source.clone(), source, Arc::new(NullSnapshotStore));
    controller.update_cache_from_datasource()?;
    store.save(&controller.cache())
}

fn verify(cache: &ContentCache, json: bool) -> ExitCode {
    let violations = cache.integrity_violations();
    if json {
        match serde_json::to_string_pretty(&violations) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error encoding output: {}", e),
        }
    } else if violations.is_empty() {
        println!("OK: no integrity violations");
    } else {
        for violation in &violations {
            println!("  {}", violation);
        }
        println!();
        println!("Total: {} violations", violations.len());
    }
    if violations.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn summary(header: &SnapshotHeader, cache: &ContentCache) -> Summary {
    Summary {
        saved_at: header.saved_at.to_rfc3339(),
        offerings: cache.offerings().len(),
        procedures: cache.procedures().len(),
        observable_properties: cache.observable_properties().len(),
        features_of_interest: cache.features_of_interest().len(),
        result_templates: cache.result_templates().len(),
        observation_identifiers: cache.observation_identifiers().len(),
        global_envelope: cache.global_envelope(),
        global_phenomenon_time: cache.global_phenomenon_time(),
        global_result_time: cache.global_result_time(),
    }
}

fn offering_details(cache: &ContentCache, offering: &str) -> OfferingDetails {
    OfferingDetails {
        identifier: offering.to_string(),
        name: cache.name_for_offering(offering).map(str::to_string),
        procedures: cache.procedures_for_offering(offering),
        observable_properties: cache.observable_properties_for_offering(offering),
        features_of_interest: cache.features_of_interest_for_offering(offering),
        related_features: cache.related_features_for_offering(offering),
        observation_types: cache.observation_types_for_offering(offering),
        result_templates: cache.result_templates_for_offering(offering),
        envelope: cache.envelope_for_offering(offering),
        phenomenon_time: cache.phenomenon_time_for_offering(offering),
        result_time: cache.result_time_for_offering(offering),
    }
}

fn output<T: Serialize>(value: &T, json: bool, print: fn(&T)) {
    if !json {
        print(value);
        return;
    }
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Error encoding output: {}", e),
    }
}

fn print_summary(summary: &Summary) {
    println!("Snapshot saved at {}", summary.saved_at);
    println!();
    println!("  offerings:               {}", summary.offerings);
    println!("  procedures:              {}", summary.procedures);
    println!("  observable properties:   {}", summary.observable_properties);
    println!("  features of interest:    {}", summary.features_of_interest);
    println!("  result templates:        {}", summary.result_templates);
    println!("  observation identifiers: {}", summary.observation_identifiers);
    println!();
    println!("  envelope:        {}", describe_envelope(summary.global_envelope.as_ref()));
    println!("  phenomenon time: {}", describe_period(summary.global_phenomenon_time.as_ref()));
    println!("  result time:     {}", describe_period(summary.global_result_time.as_ref()));
}

fn print_offering(details: &OfferingDetails) {
    println!("{}", details.identifier);
    if let Some(name) = &details.name {
        println!("  name: {}", name);
    }
    print_set("procedures", &details.procedures);
    print_set("observable properties", &details.observable_properties);
    print_set("features of interest", &details.features_of_interest);
    print_set("related features", &details.related_features);
    print_set("observation types", &details.observation_types);
    print_set("result templates", &details.result_templates);
    println!("  envelope:        {}", describe_envelope(details.envelope.as_ref()));
    println!("  phenomenon time: {}", describe_period(details.phenomenon_time.as_ref()));
    println!("  result time:     {}", describe_period(details.result_time.as_ref()));
}

fn print_set(label: &str, values: &BTreeSet<String>) {
    println!("  {} ({}):", label, values.len());
    for value in values {
        println!("    - {}", value);
    }
}

fn describe_envelope(envelope: Option<&SpatialEnvelope>) -> String {
    match envelope {
        Some(e) => format!(
            "[{}, {}] - [{}, {}] (EPSG:{})",
            e.envelope.min_x, e.envelope.min_y, e.envelope.max_x, e.envelope.max_y, e.srid
        ),
        None => "none".to_string(),
    }
}

fn describe_period(period: Option<&TimePeriod>) -> String {
    match period {
        Some(p) if p.is_instant() => p.start.to_rfc3339(),
        Some(p) => format!("{} / {}", p.start.to_rfc3339(), p.end.to_rfc3339()),
        None => "none".to_string(),
    }
}
