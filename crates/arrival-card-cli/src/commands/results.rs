//! `show`, `clear` and `list` over the local result store.

use std::path::Path;

use anyhow::bail;
use arrival_card::TripKey;
use serde_json::json;

use super::{load_config, open_store, write_proof, Output};

pub fn show(out: Output, config: Option<&Path>, trip_key: &str, proof_out: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let store = open_store(&config)?;
    let key = TripKey::from_raw(trip_key);

    let Some(result) = store.load(&key)? else {
        bail!("no stored confirmation for {trip_key}");
    };

    if let Some(path) = proof_out {
        write_proof(path, &result.proof.bytes)?;
    }

    out.emit(json!({ "trip_key": key.as_str(), "result": result }), || {
        println!("Trip key:          {key}");
        println!("Confirmation code: {}", result.confirmation_code);
        println!("Path:              {}", result.path.as_str());
        println!("Completed:         {}", result.completed_at.to_rfc3339());
        println!("Submit id:         {}", result.submit_id);
        println!(
            "Proof:             {} bytes ({})",
            result.proof.bytes.len(),
            result.proof.media_type
        );
    })
}

pub fn clear(out: Output, config: Option<&Path>, trip_key: &str) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let store = open_store(&config)?;
    let removed = store.clear(&TripKey::from_raw(trip_key))?;

    out.emit(json!({ "trip_key": trip_key, "removed": removed }), || {
        if removed {
            println!("Cleared {trip_key}");
        } else {
            println!("Nothing stored for {trip_key}");
        }
    })
}

pub fn list(out: Output, config: Option<&Path>) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let store = open_store(&config)?;
    let rows = store.list()?;

    out.emit(json!({ "count": rows.len(), "submissions": rows }), || {
        if rows.is_empty() {
            println!("No stored confirmations.");
            return;
        }
        for row in &rows {
            println!(
                "{:<40} {:<16} {:<10} {}",
                row.trip_key,
                row.confirmation_code,
                row.path.as_str(),
                row.completed_at.format("%Y-%m-%d %H:%M")
            );
        }
    })
}
