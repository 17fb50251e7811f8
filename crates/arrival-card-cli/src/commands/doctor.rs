//! `arrival-card doctor`: environment checks.

use std::path::Path;

use arrival_card::config::resolve_config_path;
use arrival_card::renderer::chromium::find_chromium;
use serde::Serialize;
use serde_json::json;

use super::{load_config, load_registry, open_store, Output};

#[derive(Debug, Serialize)]
struct Check {
    name: &'static str,
    ok: bool,
    detail: String,
}

impl Check {
    fn pass(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &'static str, detail: impl Into<String>) -> Self {
        Self {
            name,
            ok: false,
            detail: detail.into(),
        }
    }
}

pub fn run(out: Output, config_path: Option<&Path>) -> anyhow::Result<()> {
    let mut checks = Vec::new();

    let source = resolve_config_path(config_path)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "built-in defaults".to_string());

    let config = match load_config(config_path) {
        Ok(config) => {
            checks.push(Check::pass("config", source));
            Some(config)
        }
        Err(e) => {
            checks.push(Check::fail("config", format!("{source}: {e:#}")));
            None
        }
    };

    if let Some(config) = &config {
        checks.push(Check::pass("remote", config.remote.base_url.clone()));

        let chromium = config
            .acquisition
            .chromium_path
            .clone()
            .filter(|p| p.exists())
            .or_else(find_chromium);
        checks.push(match chromium {
            Some(path) => Check::pass("chromium", path.display().to_string()),
            None => Check::fail(
                "chromium",
                "not found; install Chrome or set ARRIVAL_CARD_CHROMIUM_PATH",
            ),
        });

        checks.push(match open_store(config) {
            Ok(store) => {
                let rows = store.list().map(|r| r.len()).unwrap_or(0);
                Check::pass(
                    "storage",
                    format!("{} ({rows} stored)", config.storage.db_path().display()),
                )
            }
            Err(e) => Check::fail("storage", format!("{e:#}")),
        });

        checks.push(match load_registry(config) {
            Ok(registry) => {
                let today = chrono::Utc::now().date_naive();
                let max_age = config.registry.reference.max_age_days;
                let detail = format!("{} published {}", registry.version(), registry.published());
                if registry.is_stale(max_age, today) {
                    Check::pass("taxonomy", format!("{detail} (stale, will refresh remotely)"))
                } else {
                    Check::pass("taxonomy", detail)
                }
            }
            Err(e) => Check::fail("taxonomy", format!("{e:#}")),
        });
    }

    let healthy = checks.iter().all(|c| c.ok);
    out.emit(json!({ "healthy": healthy, "checks": checks }), || {
        for check in &checks {
            let mark = if check.ok { "ok  " } else { "FAIL" };
            println!("[{mark}] {:<9} {}", check.name, check.detail);
        }
    })?;

    if !healthy {
        anyhow::bail!("environment check failed");
    }
    Ok(())
}
