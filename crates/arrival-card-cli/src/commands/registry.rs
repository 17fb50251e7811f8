//! `registry info` and `registry check`.

use std::collections::BTreeMap;
use std::path::Path;

use arrival_card::{FieldCategory, SubmissionError};
use serde_json::json;

use super::{load_config, load_registry, read_record, Output};

pub fn info(out: Output, config: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let registry = load_registry(&config)?;
    let today = chrono::Utc::now().date_naive();
    let max_age = config.registry.reference.max_age_days;
    let stale = registry.is_stale(max_age, today);

    let coverage: BTreeMap<&str, usize> = FieldCategory::ALL
        .into_iter()
        .map(|c| (c.name(), registry.coverage(c)))
        .collect();

    out.emit(
        json!({
            "version": registry.version(),
            "published": registry.published(),
            "source": config.registry.path.as_ref().map(|p| p.display().to_string()),
            "stale": stale,
            "max_age_days": max_age,
            "coverage": coverage,
        }),
        || {
            println!("Taxonomy {}", registry.version());
            println!("  Published: {}", registry.published());
            match &config.registry.path {
                Some(path) => println!("  Source:    {}", path.display()),
                None => println!("  Source:    bundled"),
            }
            if stale {
                println!("  Status:    stale (older than {max_age} days), the reference step will run");
            } else {
                println!("  Status:    current");
            }
            for (name, count) in &coverage {
                println!("  {name:<20} {count} values");
            }
        },
    )
}

pub fn check(out: Output, config: Option<&Path>, record_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let registry = load_registry(&config)?;
    let record = read_record(record_path)?;

    let encoded = registry
        .encode_record(&record)
        .map_err(SubmissionError::from)?;

    out.emit(
        json!({
            "registry_version": encoded.registry_version,
            "trip_key": record.trip_key().as_str(),
            "fields": encoded.fields.len(),
        }),
        || {
            println!(
                "Every value maps in taxonomy {} ({} fields).",
                encoded.registry_version,
                encoded.fields.len()
            );
            println!("Trip key: {}", record.trip_key());
        },
    )
}
