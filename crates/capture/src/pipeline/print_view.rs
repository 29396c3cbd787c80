//! Capture through a site's dedicated print view, loaded in a hidden auxiliary target.
//!
//! The auxiliary target is always released and removed, whatever happens after
//! it was created.

use async_trait::async_trait;
use pagesync_core::config::CaptureConfig;
use pagesync_core::{CaptureResult, Error, RequesterId, Result, Target, TargetId};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{evaluate, page_text, print_to_pdf, CaptureStrategy, StrategyContext, StrategyOutcome};
use crate::host::{commands, DebugCapability};

/// Keeps print views from opening the native print dialog.
pub const PRINT_GUARD_SCRIPT: &str = r#"(() => {
  try {
    Object.defineProperty(window, 'print', { value: function () {}, writable: false, configurable: false });
  } catch (e) {
    window.print = function () {};
  }
})();"#;

/// A site with a printer-friendly rendering of its content.
pub struct PrintViewSite {
    pub name: &'static str,
    pub hosts: &'static [&'static str],
    /// Evaluated on the original target; yields the print-view address or null.
    pub derive_expression: &'static str,
    /// Evaluated on the auxiliary target; yields `{ marker, text }`.
    pub readiness_expression: &'static str,
    /// Page texts that mean the print view will never become ready.
    pub unavailable_markers: &'static [&'static str],
}

impl PrintViewSite {
    pub fn matches(&self, address: &str) -> bool {
        url::Url::parse(address)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
            .map(|host| self.hosts.iter().any(|h| host == *h))
            .unwrap_or(false)
    }
}

pub static GMAIL: PrintViewSite = PrintViewSite {
    name: "gmail",
    hosts: &["mail.google.com"],
    derive_expression: GMAIL_DERIVE,
    readiness_expression: GMAIL_READINESS,
    unavailable_markers: &[
        "Conversation not found",
        "This conversation could not be loaded",
        "Temporary Error",
    ],
};

const GMAIL_DERIVE: &str = r#"(() => {
  const base = location.origin + location.pathname;
  const html = () => document.documentElement ? document.documentElement.innerHTML : '';
  const ik = (() => {
    try {
      if (window.GLOBALS && window.GLOBALS[9]) return String(window.GLOBALS[9]);
    } catch (e) {}
    const m = html().match(/["']ik["']\s*[:,]\s*["']([0-9a-f]{6,})["']/i);
    return m ? m[1] : null;
  })();
  const build = (th) => (ik && th)
    ? base + '?ui=2&ik=' + encodeURIComponent(ik) + '&view=pt&search=all&th=' + encodeURIComponent(th)
    : null;

  const legacy = document.querySelector('[data-legacy-thread-id]');
  if (legacy) {
    const url = build(legacy.getAttribute('data-legacy-thread-id'));
    if (url) return url;
  }
  const perm = document.querySelector('[data-thread-perm-id]');
  if (perm) {
    const url = build((perm.getAttribute('data-thread-perm-id') || '').replace(/^#?thread-f:/, ''));
    if (url) return url;
  }

  const parts = location.hash.replace(/^#/, '').split('?')[0].split('/');
  const last = parts[parts.length - 1];
  if (parts.length >= 2 && /^[A-Za-z0-9_-]{6,}$/.test(last)) {
    const url = build(last);
    if (url) return url;
  }

  const link = document.querySelector('a[href*="view=pt"]');
  if (link && link.href) return link.href;

  const scan = html().match(/thread-f:(\d{10,})/);
  if (scan) {
    const url = build(scan[1]);
    if (url) return url;
  }
  return null;
})()"#;

const GMAIL_READINESS: &str = r#"(() => ({
  marker: !!document.querySelector('.maincontent, table.message, .message'),
  text: document.body ? document.body.innerText : ''
}))()"#;

#[derive(Debug, Default, Deserialize)]
struct ReadinessSnapshot {
    #[serde(default)]
    marker: bool,
    #[serde(default)]
    text: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Readiness {
    Ready,
    Unavailable,
    Pending,
}

fn assess(snapshot: &ReadinessSnapshot, site: &PrintViewSite, min_text: usize) -> Readiness {
    if site
        .unavailable_markers
        .iter()
        .any(|m| snapshot.text.contains(m))
    {
        Readiness::Unavailable
    } else if snapshot.marker && snapshot.text.trim().chars().count() >= min_text {
        Readiness::Ready
    } else {
        Readiness::Pending
    }
}

pub struct PrintViewStrategy {
    sites: Vec<&'static PrintViewSite>,
}

impl Default for PrintViewStrategy {
    fn default() -> Self {
        Self { sites: vec![&GMAIL] }
    }
}

impl PrintViewStrategy {
    pub fn new(sites: Vec<&'static PrintViewSite>) -> Self {
        Self { sites }
    }

    fn site_for(&self, address: &str) -> Option<&'static PrintViewSite> {
        self.sites.iter().copied().find(|s| s.matches(address))
    }

    /// Everything that happens once the auxiliary target exists.
    async fn capture_on_auxiliary(
        &self,
        ctx: &StrategyContext<'_>,
        site: &PrintViewSite,
        original: &Target,
        aux: &TargetId,
        aux_requester: &RequesterId,
        print_url: &str,
    ) -> StrategyOutcome {
        if let Err(e) = ctx.registry.acquire(aux, aux_requester).await {
            return StrategyOutcome::Fatal(e);
        }
        let capability = ctx.registry.capability().as_ref();

        if let Err(e) = prepare(capability, aux).await {
            return StrategyOutcome::NotApplicable(format!("could not prepare print view: {}", e));
        }

        // Subscribe before navigating so the completion cannot be missed.
        let navigation = ctx.host.on_navigation_complete();
        if let Err(e) = ctx.host.update(aux, print_url).await {
            return StrategyOutcome::NotApplicable(format!("could not open print view: {}", e));
        }
        if let Err(e) = wait_for_navigation(navigation, aux, ctx.config.navigation_timeout()).await {
            return StrategyOutcome::NotApplicable(e.to_string());
        }

        let observed = wait_for_readiness(capability, aux, site, ctx.config).await;

        let bytes = match print_to_pdf(capability, aux, ctx.config).await {
            Ok(bytes) => bytes,
            Err(e) => return StrategyOutcome::NotApplicable(format!("print view render failed: {}", e)),
        };
        let text = match page_text(capability, aux).await {
            Ok(text) => text,
            Err(e) => {
                debug!(error = %e, "Falling back to readiness text for fingerprint");
                observed
            }
        };

        StrategyOutcome::Captured(CaptureResult {
            bytes,
            fingerprint_text: text,
            address: original.url.clone(),
            title: original.title.clone(),
            filename: None,
        })
    }
}

#[async_trait]
impl CaptureStrategy for PrintViewStrategy {
    fn name(&self) -> &'static str {
        "print-view"
    }

    fn applies_to(&self, target: &Target) -> bool {
        self.site_for(&target.url).is_some()
    }

    async fn capture(&self, ctx: &StrategyContext<'_>, target: &Target) -> StrategyOutcome {
        let Some(site) = self.site_for(&target.url) else {
            return StrategyOutcome::NotApplicable("no print view for this site".to_string());
        };

        if let Err(e) = ctx.registry.acquire(&target.id, ctx.requester).await {
            return StrategyOutcome::Fatal(e);
        }
        let capability = ctx.registry.capability().as_ref();
        let print_url = match evaluate(capability, &target.id, site.derive_expression, false).await {
            Ok(value) => value.as_str().map(str::to_string).filter(|u| u.starts_with("http")),
            Err(e) => {
                debug!(target = %target.id, error = %e, "Print view derivation failed");
                None
            }
        };
        let Some(print_url) = print_url else {
            return StrategyOutcome::NotApplicable(format!("no {} print view for this page", site.name));
        };

        let aux = match ctx.host.create("about:blank", false).await {
            Ok(aux) => aux,
            Err(e) => {
                return StrategyOutcome::NotApplicable(format!("could not create auxiliary target: {}", e))
            }
        };
        let aux_requester = RequesterId::new(format!("aux:{}", uuid::Uuid::new_v4()));
        info!(target = %target.id, aux = %aux.id, site = site.name, "Capturing through print view");

        let outcome = self
            .capture_on_auxiliary(ctx, site, target, &aux.id, &aux_requester, &print_url)
            .await;

        ctx.registry.release(&aux.id, &aux_requester).await;
        if let Err(e) = ctx.host.remove(&aux.id).await {
            warn!(aux = %aux.id, error = %e, "Failed to remove auxiliary target");
        }
        outcome
    }
}

async fn prepare(capability: &dyn DebugCapability, aux: &TargetId) -> Result<()> {
    capability
        .invoke(aux, commands::ENABLE_PAGE_EVENTS, json!({}))
        .await?;
    capability
        .invoke(
            aux,
            commands::ADD_SCRIPT_ON_NEW_DOCUMENT,
            json!({ "source": PRINT_GUARD_SCRIPT }),
        )
        .await?;
    Ok(())
}

async fn wait_for_navigation(
    mut events: broadcast::Receiver<TargetId>,
    target: &TargetId,
    deadline: Duration,
) -> Result<()> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(id) if &id == target => return Ok(()),
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => {
                    return Err(Error::NavigationTimeout(
                        "navigation events stopped".to_string(),
                    ))
                }
            }
        }
    };
    tokio::time::timeout(deadline, wait).await.map_err(|_| {
        Error::NavigationTimeout(format!("print view did not load within {:?}", deadline))
    })?
}

/// Poll until the content looks complete. Soft: on timeout the caller prints
/// whatever is there. Returns the last observed text.
async fn wait_for_readiness(
    capability: &dyn DebugCapability,
    aux: &TargetId,
    site: &PrintViewSite,
    config: &CaptureConfig,
) -> String {
    let started = Instant::now();
    loop {
        let snapshot = evaluate(capability, aux, site.readiness_expression, false)
            .await
            .ok()
            .and_then(|v| serde_json::from_value::<ReadinessSnapshot>(v).ok())
            .unwrap_or_default();

        match assess(&snapshot, site, config.min_ready_text_length) {
            Readiness::Ready => return snapshot.text,
            Readiness::Unavailable => {
                debug!(aux = %aux, "Print view reports content unavailable");
                return snapshot.text;
            }
            Readiness::Pending => {}
        }

        if started.elapsed() >= config.readiness_timeout() {
            let e = Error::ReadinessTimeout(format!("{} print view", site.name));
            debug!(aux = %aux, error = %e, "Printing without readiness");
            return snapshot.text;
        }
        tokio::time::sleep(config.readiness_poll()).await;
    }
}
