//! Start a local Chrome/Chromium with remote debugging, or find a running one.

use pagesync_core::config::BrowserConfig;
use pagesync_core::{Error, Paths, Result};
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// A browser process started by us. Killed when dropped.
pub struct LaunchedBrowser {
    child: Child,
    pub debug_port: u16,
    pub ws_url: String,
}

impl LaunchedBrowser {
    pub async fn shutdown(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "Browser already exited");
        }
    }
}

impl Drop for LaunchedBrowser {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

/// Locate a Chromium-family browser binary.
pub fn find_browser_binary() -> Option<String> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ]
    } else if cfg!(target_os = "linux") {
        &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

fn build_browser_args(debug_port: u16, user_data_dir: &Path, headed: bool) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--password-store=basic".to_string(),
    ];
    if !headed {
        args.push("--headless=new".to_string());
    }
    args.push("--window-size=1280,720".to_string());
    args.push("about:blank".to_string());
    args
}

pub async fn launch(config: &BrowserConfig, paths: &Paths) -> Result<LaunchedBrowser> {
    let binary = match &config.executable {
        Some(path) => path.clone(),
        None => find_browser_binary()
            .ok_or_else(|| Error::NotFound("Chrome/Chromium not found. Please install it.".to_string()))?,
    };

    let user_data_dir = paths.browser_profile_dir();
    std::fs::create_dir_all(&user_data_dir)?;

    let debug_port = config.debug_port;
    let args = build_browser_args(debug_port, &user_data_dir, config.headed);
    info!(port = debug_port, headed = config.headed, browser = %binary, "Launching browser");

    let child = Command::new(&binary)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Other(format!("Failed to launch {}: {}", binary, e)))?;

    let ws_url = wait_for_cdp_ready(
        &format!("http://127.0.0.1:{}", debug_port),
        Duration::from_secs(15),
    )
    .await?;

    Ok(LaunchedBrowser {
        child,
        debug_port,
        ws_url,
    })
}

/// Poll `/json/version` until the browser-level WebSocket URL is published.
pub async fn wait_for_cdp_ready(http_base: &str, timeout: Duration) -> Result<String> {
    let start = std::time::Instant::now();
    let url = format!("{}/json/version", http_base.trim_end_matches('/'));

    loop {
        if start.elapsed() > timeout {
            return Err(Error::Timeout(format!(
                "Browser debugging endpoint not ready after {}s at {}",
                timeout.as_secs(),
                http_base
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
