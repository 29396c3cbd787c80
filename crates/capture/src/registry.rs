//! Reference-counted ownership of each target's debugging session.
//!
//! A target's debugger attachment is exclusive and visibly expensive to toggle,
//! so the registry keeps one attachment alive for as long as any requester
//! references the target. Attach happens on the empty → non-empty transition
//! and detach on the non-empty → empty transition, nowhere else.
//!
//! Requesters joining while the attach is still in flight wait for its result.
//! A failed attach drops every requester that joined it.

use pagesync_core::{Error, RequesterId, Result, TargetId};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::host::{AttachError, DebugCapability};

type AttachResult = std::result::Result<(), AttachError>;

struct Holders {
    requesters: HashSet<RequesterId>,
    /// Identifies this attachment; a later entry for the same target gets a new one.
    attempt: u64,
    /// `None` while the attach is in flight.
    attached: watch::Receiver<Option<AttachResult>>,
}

impl Holders {
    fn is_attached(&self) -> bool {
        matches!(*self.attached.borrow(), Some(Ok(())))
    }

    fn is_pending(&self) -> bool {
        self.attached.borrow().is_none()
    }
}

enum Role {
    Attach(watch::Sender<Option<AttachResult>>),
    Join(watch::Receiver<Option<AttachResult>>),
}

pub struct DebugSessionRegistry {
    capability: Arc<dyn DebugCapability>,
    /// Target → requesters holding it. Never contains an empty set.
    refs: Mutex<HashMap<TargetId, Holders>>,
    next_attempt: AtomicU64,
}

impl DebugSessionRegistry {
    pub fn new(capability: Arc<dyn DebugCapability>) -> Self {
        Self {
            capability,
            refs: Mutex::new(HashMap::new()),
            next_attempt: AtomicU64::new(1),
        }
    }

    pub fn capability(&self) -> &Arc<dyn DebugCapability> {
        &self.capability
    }

    fn table(&self) -> MutexGuard<'_, HashMap<TargetId, Holders>> {
        self.refs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `requester` against `target`, attaching if it is the first reference.
    pub async fn acquire(&self, target: &TargetId, requester: &RequesterId) -> Result<()> {
        // The first-reference check and the insert happen under one lock, with no
        // await in between, so concurrent acquires attach at most once.
        let (role, attempt) = {
            let mut refs = self.table();
            match refs.get_mut(target) {
                Some(holders) => {
                    holders.requesters.insert(requester.clone());
                    (Role::Join(holders.attached.clone()), holders.attempt)
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
                    refs.insert(
                        target.clone(),
                        Holders {
                            requesters: HashSet::from([requester.clone()]),
                            attempt,
                            attached: rx,
                        },
                    );
                    (Role::Attach(tx), attempt)
                }
            }
        };

        let result = match role {
            Role::Attach(tx) => {
                let result = match self.capability.attach(target).await {
                    Ok(()) => {
                        info!(target = %target, requester = %requester, "Debugger attached");
                        Ok(())
                    }
                    Err(AttachError::AlreadyAttached) => {
                        debug!(target = %target, "Debugger was already attached, reusing it");
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = tx.send(Some(result.clone()));
                if result.is_ok() && !self.is_current(target, attempt) {
                    // Every holder went away while attaching.
                    self.detach_quietly(target).await;
                    return Err(Error::AttachFailure(
                        "session was released while attaching".to_string(),
                    ));
                }
                result
            }
            Role::Join(mut rx) => {
                debug!(target = %target, requester = %requester, "Debugger already held, adding reference");
                let observed = rx.wait_for(|r| r.is_some()).await.map(|r| r.clone());
                match observed {
                    Ok(Some(result)) => result,
                    Ok(None) | Err(_) => Err(AttachError::Other("attach was abandoned".to_string())),
                }
            }
        };

        let Err(e) = result else {
            return Ok(());
        };
        self.roll_back(target, attempt);
        match e {
            AttachError::CapabilityConflict(msg) => {
                warn!(target = %target, requester = %requester, error = %msg, "Debugger blocked by another principal");
                Err(Error::CapabilityConflict(msg))
            }
            other => {
                warn!(target = %target, requester = %requester, error = %other, "Debugger attach failed");
                Err(Error::AttachFailure(other.to_string()))
            }
        }
    }

    /// Drop `requester`'s reference, detaching when it was the last one.
    pub async fn release(&self, target: &TargetId, requester: &RequesterId) {
        let detach = {
            let mut refs = self.table();
            let Some(holders) = refs.get_mut(target) else {
                return;
            };
            if !holders.requesters.remove(requester) {
                return;
            }
            if holders.requesters.is_empty() {
                // An in-flight attach detaches by itself once it sees the entry gone.
                refs.remove(target).map(|h| h.is_attached()).unwrap_or(false)
            } else {
                debug!(target = %target, requester = %requester, "Reference released, debugger still held");
                false
            }
        };

        if detach {
            self.detach_quietly(target).await;
        }
    }

    /// Forget every reference to `target` and detach regardless of count.
    pub async fn sweep(&self, target: &TargetId) {
        let removed = self.table().remove(target);
        debug!(target = %target, had_refs = removed.is_some(), "Sweeping debugger session");
        if removed.map(|h| h.is_pending()).unwrap_or(false) {
            return;
        }
        self.detach_quietly(target).await;
    }

    /// Remove `requester` from every target's holder set. Returns the targets left
    /// without holders; their entries are already gone but they are not detached.
    pub fn drop_requester(&self, requester: &RequesterId) -> Vec<TargetId> {
        let mut refs = self.table();
        let mut emptied = Vec::new();
        refs.retain(|target, holders| {
            if holders.requesters.remove(requester) && holders.requesters.is_empty() {
                emptied.push(target.clone());
                false
            } else {
                true
            }
        });
        emptied
    }

    pub fn is_held(&self, target: &TargetId) -> bool {
        self.table().contains_key(target)
    }

    pub fn holders(&self, target: &TargetId) -> BTreeSet<RequesterId> {
        self.table()
            .get(target)
            .map(|h| h.requesters.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Sorted copy of the whole reference table.
    pub fn snapshot(&self) -> BTreeMap<TargetId, BTreeSet<RequesterId>> {
        self.table()
            .iter()
            .map(|(t, h)| (t.clone(), h.requesters.iter().cloned().collect()))
            .collect()
    }

    fn is_current(&self, target: &TargetId, attempt: u64) -> bool {
        self.table()
            .get(target)
            .map(|h| h.attempt == attempt)
            .unwrap_or(false)
    }

    /// Drop the entry of a failed attach, with every requester that joined it.
    fn roll_back(&self, target: &TargetId, attempt: u64) {
        let mut refs = self.table();
        if refs.get(target).map(|h| h.attempt == attempt).unwrap_or(false) {
            refs.remove(target);
        }
    }

    async fn detach_quietly(&self, target: &TargetId) {
        match self.capability.detach(target).await {
            Ok(()) => info!(target = %target, "Debugger detached"),
            Err(e) => debug!(target = %target, error = %e, "Ignoring detach error"),
        }
    }
}
