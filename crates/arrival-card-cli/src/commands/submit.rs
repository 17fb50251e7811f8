//! `arrival-card submit`.

use std::path::Path;
use std::time::Duration;

use arrival_card::{
    ArrivalPipeline, CancelSignal, EventBus, StrategyChoice, SubmissionEvent, SubmissionOutcome,
};
use serde_json::json;
use tokio::sync::broadcast;

use super::{load_config, read_record, write_proof, Output};

pub async fn run(
    out: Output,
    config: Option<&Path>,
    record_path: &Path,
    strategy: StrategyChoice,
    proof_out: Option<&Path>,
) -> anyhow::Result<()> {
    let config = load_config(config)?;
    let record = read_record(record_path)?;

    let events = EventBus::default();
    let pipeline = ArrivalPipeline::from_config(&config, events.clone())?.with_choice(strategy);

    let progress = (!out.json).then(|| tokio::spawn(print_progress(events.subscribe())));

    let cancel = CancelSignal::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling attempt");
            on_interrupt.cancel();
        }
    });

    let outcome = pipeline.submit(&record, &cancel).await;
    drop(pipeline);
    drop(events);
    if let Some(task) = progress {
        // Give the printer a moment to drain; it exits once every sender is gone.
        let _ = tokio::time::timeout(Duration::from_millis(200), task).await;
    }
    let result = outcome?;

    if let Some(path) = proof_out {
        write_proof(path, &result.proof.bytes)?;
    }

    out.emit(
        json!({
            "trip_key": record.trip_key().as_str(),
            "result": result,
            "proof_written_to": proof_out.map(|p| p.display().to_string()),
        }),
        || {
            let note = match result.outcome {
                SubmissionOutcome::Accepted => "accepted",
                SubmissionOutcome::PreviouslyAccepted => "already accepted earlier",
            };
            println!("Arrival card {note}.");
            println!("  Confirmation code: {}", result.confirmation_code);
            println!("  Trip key:          {}", record.trip_key());
            println!("  Path:              {}", result.path.as_str());
            println!("  Submit id:         {}", result.submit_id);
            match proof_out {
                Some(path) => println!("  Proof:             {}", path.display()),
                None => println!(
                    "  Proof:             {} bytes ({}), use --proof-out to save",
                    result.proof.bytes.len(),
                    result.proof.media_type
                ),
            }
        },
    )
}

async fn print_progress(mut rx: broadcast::Receiver<SubmissionEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if let Some(line) = progress_line(&event) {
                    eprintln!("{line}");
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// One terminal line per event worth showing.
fn progress_line(event: &SubmissionEvent) -> Option<String> {
    let line = match event {
        SubmissionEvent::AttemptStarted { path, .. } => format!("→ {} attempt", path.as_str()),
        SubmissionEvent::ResultReused { .. } => "→ stored acceptance found".to_string(),
        SubmissionEvent::AcquisitionStarted { .. } => "  loading challenge".to_string(),
        SubmissionEvent::TokenAcquired { polls, elapsed_ms } => {
            format!("  challenge solved after {polls} polls ({elapsed_ms} ms)")
        }
        SubmissionEvent::StepCompleted { step, elapsed_ms, .. } => {
            format!("  ✓ {step} ({elapsed_ms} ms)")
        }
        SubmissionEvent::StepSkipped { step, .. } => format!("  - {step} skipped"),
        SubmissionEvent::StepRetrying { step, attempt, reason, .. } => {
            format!("  ↻ {step} retry {attempt}: {reason}")
        }
        SubmissionEvent::FallbackEngaged { cause, .. } => {
            format!("→ hybrid path failed ({cause}), opening browser")
        }
        SubmissionEvent::AutomationStage { stage } => format!("  {stage}"),
        SubmissionEvent::AttemptFailed { path, class, .. } => {
            format!("✗ {} attempt failed: {class}", path.as_str())
        }
        SubmissionEvent::AttemptSucceeded { path, elapsed_ms, .. } => {
            format!("✓ {} attempt done in {elapsed_ms} ms", path.as_str())
        }
        SubmissionEvent::AcquisitionPolled { .. } | SubmissionEvent::StepStarted { .. } => {
            return None
        }
    };
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrival_card::{ErrorClass, Step, SubmissionPath};

    #[test]
    fn test_polls_are_quiet() {
        assert!(progress_line(&SubmissionEvent::AcquisitionPolled {
            poll: 3,
            elapsed_ms: 1500
        })
        .is_none());
    }

    #[test]
    fn test_step_lines_name_the_step() {
        let line = progress_line(&SubmissionEvent::StepCompleted {
            submit_id: "ACS-1".to_string(),
            step: Step::SubmitRecord,
            elapsed_ms: 42,
        })
        .unwrap();
        assert!(line.contains("submit_record"));
        assert!(!line.contains("ACS-1"));
    }

    #[test]
    fn test_fallback_line_names_cause() {
        let line = progress_line(&SubmissionEvent::FallbackEngaged {
            trip_digest: "ab12".to_string(),
            cause: ErrorClass::AcquisitionTimeout,
        })
        .unwrap();
        assert!(line.contains("acquisition_timeout"));

        let line = progress_line(&SubmissionEvent::AttemptStarted {
            trip_digest: "ab12".to_string(),
            path: SubmissionPath::Automation,
            timestamp: "2026-10-18T00:00:00Z".to_string(),
        })
        .unwrap();
        assert!(line.contains("automation"));
    }
}
