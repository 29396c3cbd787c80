use pagesync_capture::browser::{find_browser_binary, launcher};
use pagesync_core::{Config, Paths};
use pagesync_storage::{keys, SqliteStateStore, StateStore};
use std::time::Duration;

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("pagesync status");
    println!("===============");
    println!();

    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_exists { "✓" } else { "✗ (defaults)" }
    );
    let config = Config::load_or_default(&paths)?;

    let db_path = paths.state_db();
    println!(
        "State:     {} {}",
        db_path.display(),
        if db_path.exists() { "✓" } else { "✗ (not created yet)" }
    );

    match &config.delivery.outbox_dir {
        Some(dir) => println!("Delivery:  outbox at {}", dir),
        None => println!(
            "Delivery:  pending store (expires after {}s)",
            config.delivery.pending_max_age_secs
        ),
    }
    println!(
        "Models:    {} (default {})",
        config.delivery.models.join(", "),
        config.delivery.default_model
    );
    println!();

    println!("Browser:");
    if let Some(endpoint) = &config.browser.endpoint {
        println!("  endpoint  {}", endpoint);
    } else {
        let base = config.debug_http_base();
        match launcher::wait_for_cdp_ready(&base, Duration::from_secs(1)).await {
            Ok(ws) => println!("  ✓ reachable at {} ({})", base, ws),
            Err(_) => println!("  ✗ nothing listening at {}", base),
        }
    }
    match find_browser_binary() {
        Some(path) => println!("  binary    {}", path),
        None => println!("  binary    ✗ not found"),
    }
    if config.browser.launch {
        println!("  launch    on ({})", if config.browser.headed { "headed" } else { "headless" });
    }
    println!();

    if db_path.exists() {
        let store = SqliteStateStore::open(&db_path)?;
        let mut synced = Vec::new();
        for key in store.keys_with_prefix(keys::AUTO_SYNC_PREFIX)? {
            if store.get_bool(&key)? {
                if let Some(target) = keys::auto_sync_target(&key) {
                    synced.push(target.to_string());
                }
            }
        }
        if synced.is_empty() {
            println!("Auto-sync: none");
        } else {
            println!("Auto-sync: {}", synced.join(", "));
        }
    }
    Ok(())
}
