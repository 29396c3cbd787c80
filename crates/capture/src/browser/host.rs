//! `DebugCapability` and `TargetHost` over one browser-level CDP connection.

use async_trait::async_trait;
use pagesync_core::{Config, Error, Paths, Result, Target, TargetId};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::cdp::{CdpClient, CdpEvent};
use super::launcher::{self, LaunchedBrowser};
use crate::host::{classify_attach_error, AttachError, DebugCapability, TargetHost};

type Sessions = Arc<Mutex<HashMap<TargetId, String>>>;

fn lock(sessions: &Sessions) -> MutexGuard<'_, HashMap<TargetId, String>> {
    sessions.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct ChromeHost {
    cdp: Arc<CdpClient>,
    /// Target → flattened session id.
    sessions: Sessions,
    destroyed_tx: broadcast::Sender<TargetId>,
    navigation_tx: broadcast::Sender<TargetId>,
    pump: JoinHandle<()>,
    _browser: Option<LaunchedBrowser>,
}

impl ChromeHost {
    /// Launch or discover the browser named by the config and connect to it.
    pub async fn connect(config: &Config, paths: &Paths) -> Result<Self> {
        let (ws_url, browser) = if config.browser.launch {
            let browser = launcher::launch(&config.browser, paths).await?;
            (browser.ws_url.clone(), Some(browser))
        } else if let Some(endpoint) = &config.browser.endpoint {
            (endpoint.clone(), None)
        } else {
            let url =
                launcher::wait_for_cdp_ready(&config.debug_http_base(), Duration::from_secs(5))
                    .await?;
            (url, None)
        };

        let cdp = CdpClient::connect(&ws_url).await?;
        info!(ws_url = %ws_url, "Connected to browser");
        Self::from_client(cdp, browser).await
    }

    async fn from_client(cdp: CdpClient, browser: Option<LaunchedBrowser>) -> Result<Self> {
        let cdp = Arc::new(cdp);
        let sessions: Sessions = Arc::new(Mutex::new(HashMap::new()));
        let (destroyed_tx, _) = broadcast::channel(64);
        let (navigation_tx, _) = broadcast::channel(64);

        let destroyed = cdp.subscribe_event("Target.targetDestroyed").await;
        let detached = cdp.subscribe_event("Target.detachedFromTarget").await;
        let loaded = cdp.subscribe_event("Page.loadEventFired").await;
        cdp.set_discover_targets(true).await?;

        let pump = tokio::spawn(pump_events(
            destroyed,
            detached,
            loaded,
            sessions.clone(),
            destroyed_tx.clone(),
            navigation_tx.clone(),
        ));

        Ok(Self {
            cdp,
            sessions,
            destroyed_tx,
            navigation_tx,
            pump,
            _browser: browser,
        })
    }

    fn session_for(&self, target: &TargetId) -> Result<String> {
        lock(&self.sessions)
            .get(target)
            .cloned()
            .ok_or_else(|| Error::Cdp(format!("Debugger is not attached to {}", target)))
    }

    async fn page_targets(&self) -> Result<Vec<Target>> {
        Ok(self
            .cdp
            .get_targets()
            .await?
            .iter()
            .filter(|info| info.get("type").and_then(|v| v.as_str()) == Some("page"))
            .filter_map(target_from_info)
            .collect())
    }
}

impl Drop for ChromeHost {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

fn target_from_info(info: &Value) -> Option<Target> {
    let id = info.get("targetId")?.as_str()?;
    Some(Target::new(
        id,
        info.get("url").and_then(|v| v.as_str()).unwrap_or_default(),
        info.get("title").and_then(|v| v.as_str()).unwrap_or_default(),
    ))
}

/// The browser has no notion of a focused tab over CDP; take the first web page
/// in its (most recently used first) listing.
fn pick_active(targets: &[Target]) -> Option<&Target> {
    targets
        .iter()
        .find(|t| t.is_capturable())
        .or_else(|| targets.first())
}

async fn pump_events(
    mut destroyed: mpsc::Receiver<CdpEvent>,
    mut detached: mpsc::Receiver<CdpEvent>,
    mut loaded: mpsc::Receiver<CdpEvent>,
    sessions: Sessions,
    destroyed_tx: broadcast::Sender<TargetId>,
    navigation_tx: broadcast::Sender<TargetId>,
) {
    loop {
        tokio::select! {
            Some(event) = destroyed.recv() => {
                let Some(id) = event.params.get("targetId").and_then(|v| v.as_str()) else {
                    continue;
                };
                let target = TargetId::from(id);
                lock(&sessions).remove(&target);
                debug!(target = %target, "Target destroyed");
                let _ = destroyed_tx.send(target);
            }
            Some(event) = detached.recv() => {
                if let Some(session) = event.params.get("sessionId").and_then(|v| v.as_str()) {
                    lock(&sessions).retain(|_, s| s.as_str() != session);
                }
            }
            Some(event) = loaded.recv() => {
                let Some(session) = event.session_id else {
                    continue;
                };
                let target = lock(&sessions)
                    .iter()
                    .find(|(_, s)| **s == session)
                    .map(|(t, _)| t.clone());
                if let Some(target) = target {
                    let _ = navigation_tx.send(target);
                }
            }
            else => break,
        }
    }
}

#[async_trait]
impl DebugCapability for ChromeHost {
    async fn attach(&self, target: &TargetId) -> std::result::Result<(), AttachError> {
        if lock(&self.sessions).contains_key(target) {
            return Err(AttachError::AlreadyAttached);
        }
        let response = self
            .cdp
            .send_raw(
                None,
                "Target.attachToTarget",
                json!({"targetId": target.as_str(), "flatten": true}),
            )
            .await
            .map_err(|e| AttachError::Other(e.to_string()))?;

        match response {
            Ok(result) => {
                let session = result
                    .get("sessionId")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| AttachError::Other("No sessionId returned".to_string()))?;
                lock(&self.sessions).insert(target.clone(), session.to_string());
                Ok(())
            }
            Err(e) => Err(classify_attach_error(&e.message)),
        }
    }

    async fn detach(&self, target: &TargetId) -> Result<()> {
        let session = lock(&self.sessions).remove(target);
        match session {
            Some(session) => self.cdp.detach_from_session(&session).await,
            None => Err(Error::Cdp(format!("Debugger is not attached to {}", target))),
        }
    }

    async fn invoke(&self, target: &TargetId, command: &str, params: Value) -> Result<Value> {
        let session = self.session_for(target)?;
        self.cdp.send_session_command(&session, command, params).await
    }
}

#[async_trait]
impl TargetHost for ChromeHost {
    async fn get(&self, id: &TargetId) -> Result<Target> {
        let info = self
            .cdp
            .get_target_info(id.as_str())
            .await
            .map_err(|_| Error::NotFound(format!("No target with id: {}", id)))?;
        target_from_info(&info).ok_or_else(|| Error::NotFound(format!("No target with id: {}", id)))
    }

    async fn query_active(&self) -> Result<Target> {
        let targets = self.page_targets().await?;
        pick_active(&targets)
            .cloned()
            .ok_or_else(|| Error::NotFound("No open page".to_string()))
    }

    async fn list(&self) -> Result<Vec<Target>> {
        self.page_targets().await
    }

    async fn create(&self, url: &str, visible: bool) -> Result<Target> {
        let id = self.cdp.create_target(url, !visible).await?;
        let id = TargetId::new(id);
        match self.get(&id).await {
            Ok(target) => Ok(target),
            Err(_) => Ok(Target::new(id, url, "")),
        }
    }

    async fn update(&self, id: &TargetId, url: &str) -> Result<()> {
        if let Ok(session) = self.session_for(id) {
            self.cdp.navigate(&session, url).await?;
            return Ok(());
        }

        // Not held by anyone: borrow a session just for the navigation.
        let response = self
            .cdp
            .send_command(
                "Target.attachToTarget",
                json!({"targetId": id.as_str(), "flatten": true}),
            )
            .await?;
        let session = response
            .get("sessionId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Cdp("No sessionId returned".to_string()))?
            .to_string();
        let navigated = self.cdp.navigate(&session, url).await;
        if let Err(e) = self.cdp.detach_from_session(&session).await {
            debug!(target = %id, error = %e, "Ignoring detach error");
        }
        navigated.map(|_| ())
    }

    async fn remove(&self, id: &TargetId) -> Result<()> {
        self.cdp.close_target(id.as_str()).await
    }

    fn on_destroyed(&self) -> broadcast::Receiver<TargetId> {
        self.destroyed_tx.subscribe()
    }

    fn on_navigation_complete(&self) -> broadcast::Receiver<TargetId> {
        self.navigation_tx.subscribe()
    }
}
