//! Taxonomy asset loading and encoding.

mod common;

use std::io::Write;

use arrival_card::{FieldCategory, FieldEncodingRegistry, RegistryHandle};
use chrono::NaiveDate;

use common::{fixture_registry, sample_record};

#[test]
fn test_fixture_encodes_sample_record() {
    let encoded = fixture_registry().encode_record(&sample_record()).unwrap();
    assert_eq!(encoded.registry_version, "fixture-3");
    assert_eq!(encoded.field("nationality"), Some("3f9c1e07"));
    assert_eq!(encoded.field("travelMode"), Some("tm-0001"));
    assert_eq!(encoded.field("departureCountry"), Some("c-0840"));
    assert_eq!(encoded.field("arrivalDate"), Some("2026-11-02"));
    assert_eq!(encoded.field("accommodationPhone"), Some("+81300000000"));
}

#[test]
fn test_bundled_asset_covers_sample_record() {
    let registry = FieldEncodingRegistry::bundled().unwrap();
    assert!(registry.coverage(FieldCategory::Nationality) > 20);
    let encoded = registry.encode_record(&sample_record()).unwrap();
    assert_eq!(encoded.registry_version, registry.version());
}

#[test]
fn test_staleness_is_relative_to_publication() {
    let registry = fixture_registry();
    let published = registry.published();
    assert!(!registry.is_stale(30, published + chrono::Days::new(30)));
    assert!(registry.is_stale(30, published + chrono::Days::new(31)));
    assert!(registry.is_stale(0, NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()));
}

#[test]
fn test_reload_swaps_snapshot_for_new_readers() {
    let handle = RegistryHandle::new(fixture_registry());
    let before = handle.snapshot();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    let replacement = include_str!("fixtures/taxonomy.json").replace("fixture-3", "fixture-4");
    file.write_all(replacement.as_bytes()).unwrap();

    let version = handle.reload(file.path()).unwrap();
    assert_eq!(version, "fixture-4");
    assert_eq!(before.version(), "fixture-3");
    assert_eq!(handle.snapshot().version(), "fixture-4");
}

#[test]
fn test_failed_reload_keeps_previous_snapshot() {
    let handle = RegistryHandle::new(fixture_registry());
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"{\"version\": \"\", \"published\": \"2026-01-01\", \"categories\": {}}")
        .unwrap();

    assert!(handle.reload(file.path()).is_err());
    assert_eq!(handle.snapshot().version(), "fixture-3");
}
