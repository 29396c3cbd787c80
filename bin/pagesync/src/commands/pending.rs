use pagesync_core::{Config, ModelId, Paths, TargetId};
use pagesync_storage::{keys, PendingCapture, SqliteStateStore, StateStore};
use std::path::PathBuf;
use std::time::Duration;

pub async fn run(
    target: Option<String>,
    model: Option<String>,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let store = SqliteStateStore::open(&paths.state_db())?;
    let model = ModelId::new(model.unwrap_or_else(|| config.delivery.default_model.clone()));
    let max_age = Duration::from_secs(config.delivery.pending_max_age_secs);

    if let Some(out) = out {
        let Some(target) = target else {
            anyhow::bail!("--out needs --target");
        };
        let target = TargetId::new(target);
        match PendingCapture::take(&store, &model, &target, max_age)? {
            Some(pending) => {
                std::fs::write(&out, pending.decode()?)?;
                println!("✓ Wrote {} to {}", pending.filename, out.display());
            }
            None => {
                eprintln!("No fresh pending capture for {} → {}.", target, model);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let now = chrono::Utc::now().timestamp_millis();
    let mut shown = 0;
    println!();
    for key in store.keys_with_prefix(keys::PENDING_PREFIX)? {
        if let Some(t) = &target {
            if !key.ends_with(&format!("_{}", t)) {
                continue;
            }
        }
        let Some(raw) = store.get(&key)? else {
            continue;
        };
        let Ok(pending) = serde_json::from_value::<PendingCapture>(raw) else {
            continue;
        };
        let age_secs = (now - pending.timestamp).max(0) / 1000;
        let state = if pending.is_fresh(now, max_age) {
            "fresh"
        } else {
            "stale"
        };
        println!(
            "  {:<40} {:<32} {:>5}s old ({})",
            key, pending.filename, age_secs, state
        );
        shown += 1;
    }
    if shown == 0 {
        println!("  No pending captures.");
    }
    println!();
    Ok(())
}
