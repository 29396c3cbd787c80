//! In-memory host fakes shared by the unit tests.

use async_trait::async_trait;
use pagesync_core::{Error, ModelId, Result, Target, TargetId};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::host::{
    commands, AttachError, DebugCapability, DeliverySink, FetchedResource, ResourceFetcher,
    TargetHost,
};

type Handler = Box<dyn Fn(&TargetId, &str, &Value) -> Result<Value> + Send + Sync>;

#[derive(Default)]
pub struct FakeCapability {
    attaches: Mutex<Vec<TargetId>>,
    detaches: Mutex<Vec<TargetId>>,
    invocations: Mutex<Vec<(TargetId, String, Value)>>,
    attach_failure: Mutex<Option<AttachError>>,
    attach_delay: Mutex<Option<Duration>>,
    detach_fails: AtomicBool,
    handler: Mutex<Option<Handler>>,
}

impl FakeCapability {
    pub fn fail_attach_with(&self, err: AttachError) {
        *self.attach_failure.lock().unwrap() = Some(err);
    }

    pub fn allow_attach(&self) {
        *self.attach_failure.lock().unwrap() = None;
    }

    pub fn set_attach_delay(&self, delay: Duration) {
        *self.attach_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_detach(&self, fail: bool) {
        self.detach_fails.store(fail, Ordering::SeqCst);
    }

    /// Route every `invoke` through `f`. Without a handler, printing returns
    /// `"pdf"` bytes and evaluation returns an empty string.
    pub fn set_handler<F>(&self, f: F)
    where
        F: Fn(&TargetId, &str, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        *self.handler.lock().unwrap() = Some(Box::new(f));
    }

    pub fn attach_count(&self) -> usize {
        self.attaches.lock().unwrap().len()
    }

    pub fn attached_targets(&self) -> Vec<TargetId> {
        self.attaches.lock().unwrap().clone()
    }

    pub fn detach_count(&self) -> usize {
        self.detaches.lock().unwrap().len()
    }

    pub fn detached_targets(&self) -> Vec<TargetId> {
        self.detaches.lock().unwrap().clone()
    }

    pub fn commands_for(&self, target: &TargetId) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| t == target)
            .map(|(_, c, _)| c.clone())
            .collect()
    }

    pub fn invocations(&self) -> Vec<(TargetId, String, Value)> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl DebugCapability for FakeCapability {
    async fn attach(&self, target: &TargetId) -> std::result::Result<(), AttachError> {
        let delay = *self.attach_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.attaches.lock().unwrap().push(target.clone());
        match self.attach_failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn detach(&self, target: &TargetId) -> Result<()> {
        self.detaches.lock().unwrap().push(target.clone());
        if self.detach_fails.load(Ordering::SeqCst) {
            return Err(Error::Cdp("Debugger is not attached".to_string()));
        }
        Ok(())
    }

    async fn invoke(&self, target: &TargetId, command: &str, params: Value) -> Result<Value> {
        self.invocations
            .lock()
            .unwrap()
            .push((target.clone(), command.to_string(), params.clone()));
        if let Some(handler) = self.handler.lock().unwrap().as_ref() {
            return handler(target, command, &params);
        }
        Ok(match command {
            commands::PRINT_TO_PDF => json!({"data": "cGRm"}),
            commands::EVALUATE => json!({"result": {"type": "string", "value": ""}}),
            _ => json!({}),
        })
    }
}

/// Wrap a value the way `Runtime.evaluate` returns it.
pub fn eval_result(value: Value) -> Value {
    json!({"result": {"value": value}})
}

pub struct FakeHost {
    targets: Mutex<HashMap<TargetId, Target>>,
    active: Mutex<Option<TargetId>>,
    created: Mutex<Vec<(TargetId, bool)>>,
    updates: Mutex<Vec<(TargetId, String)>>,
    removed: Mutex<Vec<TargetId>>,
    next_id: AtomicU64,
    emit_navigation: AtomicBool,
    destroyed_tx: broadcast::Sender<TargetId>,
    navigation_tx: broadcast::Sender<TargetId>,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            targets: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
            created: Mutex::new(Vec::new()),
            updates: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1000),
            emit_navigation: AtomicBool::new(true),
            destroyed_tx: broadcast::channel(64).0,
            navigation_tx: broadcast::channel(64).0,
        }
    }
}

impl FakeHost {
    pub fn with_target(target: Target) -> Self {
        let host = Self::default();
        host.add(target);
        host
    }

    pub fn add(&self, target: Target) {
        *self.active.lock().unwrap() = Some(target.id.clone());
        self.targets.lock().unwrap().insert(target.id.clone(), target);
    }

    pub fn set_url(&self, id: &TargetId, url: &str) {
        if let Some(t) = self.targets.lock().unwrap().get_mut(id) {
            t.url = url.to_string();
        }
    }

    /// Stop reporting navigation completion, so waits run into their deadline.
    pub fn suppress_navigation(&self) {
        self.emit_navigation.store(false, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<(TargetId, bool)> {
        self.created.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<(TargetId, String)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<TargetId> {
        self.removed.lock().unwrap().clone()
    }

    pub fn destroy(&self, id: &TargetId) {
        self.targets.lock().unwrap().remove(id);
        let _ = self.destroyed_tx.send(id.clone());
    }
}

#[async_trait]
impl TargetHost for FakeHost {
    async fn get(&self, id: &TargetId) -> Result<Target> {
        self.targets
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No tab with id: {}", id)))
    }

    async fn query_active(&self) -> Result<Target> {
        let active = self.active.lock().unwrap().clone();
        match active {
            Some(id) => self.get(&id).await,
            None => Err(Error::NotFound("No active tab".to_string())),
        }
    }

    async fn list(&self) -> Result<Vec<Target>> {
        let mut targets: Vec<Target> = self.targets.lock().unwrap().values().cloned().collect();
        targets.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(targets)
    }

    async fn create(&self, url: &str, visible: bool) -> Result<Target> {
        let id = TargetId::new(self.next_id.fetch_add(1, Ordering::SeqCst).to_string());
        let target = Target::new(id.clone(), url, "");
        self.targets.lock().unwrap().insert(id.clone(), target.clone());
        self.created.lock().unwrap().push((id, visible));
        Ok(target)
    }

    async fn update(&self, id: &TargetId, url: &str) -> Result<()> {
        self.updates.lock().unwrap().push((id.clone(), url.to_string()));
        self.set_url(id, url);
        if self.emit_navigation.load(Ordering::SeqCst) {
            let _ = self.navigation_tx.send(id.clone());
        }
        Ok(())
    }

    async fn remove(&self, id: &TargetId) -> Result<()> {
        self.removed.lock().unwrap().push(id.clone());
        self.destroy(id);
        Ok(())
    }

    fn on_destroyed(&self) -> broadcast::Receiver<TargetId> {
        self.destroyed_tx.subscribe()
    }

    fn on_navigation_complete(&self) -> broadcast::Receiver<TargetId> {
        self.navigation_tx.subscribe()
    }
}

pub struct FakeFetcher {
    response: Mutex<Result<FetchedResource>>,
    calls: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn returning(content_type: &str, bytes: &[u8]) -> Self {
        Self {
            response: Mutex::new(Ok(FetchedResource {
                status: 200,
                content_type: Some(content_type.to_string()),
                bytes: bytes.to_vec(),
            })),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: Mutex::new(Err(Error::Other(message.to_string()))),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResourceFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedResource> {
        self.calls.lock().unwrap().push(url.to_string());
        match &*self.response.lock().unwrap() {
            Ok(r) => Ok(r.clone()),
            Err(e) => Err(Error::Other(e.to_string())),
        }
    }
}

#[derive(Default)]
pub struct FakeSink {
    delivered: Mutex<Vec<(String, TargetId, ModelId, usize)>>,
    fail: AtomicBool,
}

impl FakeSink {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn deliveries(&self) -> Vec<(String, TargetId, ModelId, usize)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliverySink for FakeSink {
    async fn deliver(
        &self,
        bytes: &[u8],
        filename: &str,
        target: &TargetId,
        model: &ModelId,
    ) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::DeliveryFailure(
                "Could not find drop target".to_string(),
            ));
        }
        self.delivered.lock().unwrap().push((
            filename.to_string(),
            target.clone(),
            model.clone(),
            bytes.len(),
        ));
        Ok(())
    }
}
