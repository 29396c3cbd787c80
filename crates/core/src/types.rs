use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Opaque identifier of a page, stable for the page's lifetime.
    TargetId
);

string_id!(
    /// A logical consumer holding a reference to a capture session.
    RequesterId
);

string_id!(
    /// The destination surface a capture is delivered into (e.g. "chatgpt").
    ModelId
);

impl RequesterId {
    /// A panel instance is identified by the target it is attached to.
    pub fn for_panel(target: &TargetId) -> Self {
        Self(target.0.clone())
    }
}

impl From<&TargetId> for RequesterId {
    fn from(target: &TargetId) -> Self {
        Self::for_panel(target)
    }
}

/// An addressable page a capture may be taken from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub url: String,
    #[serde(default)]
    pub title: String,
}

impl Target {
    pub fn new(id: impl Into<TargetId>, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            title: title.into(),
        }
    }

    /// Only regular web pages can be captured.
    pub fn is_capturable(&self) -> bool {
        self.url.starts_with("http://") || self.url.starts_with("https://")
    }
}

/// Bytes plus the text used purely as a change fingerprint.
#[derive(Clone, PartialEq)]
pub struct CaptureResult {
    pub bytes: Vec<u8>,
    pub fingerprint_text: String,
    pub address: String,
    pub title: String,
    /// Filename the capture should be delivered under, when the strategy knows better than the title.
    pub filename: Option<String>,
}

impl fmt::Debug for CaptureResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureResult")
            .field("bytes", &self.bytes.len())
            .field("fingerprint_text", &self.fingerprint_text.len())
            .field("address", &self.address)
            .field("title", &self.title)
            .field("filename", &self.filename)
            .finish()
    }
}

/// Result of one capture-and-deliver invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Delivered { filename: String },
    SkippedUnchanged,
    Failed { reason: String },
}

impl Outcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Outcome::Delivered { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capturable_targets() {
        assert!(Target::new("1", "https://example.com", "x").is_capturable());
        assert!(Target::new("1", "http://example.com", "x").is_capturable());
        assert!(!Target::new("1", "chrome://settings", "x").is_capturable());
        assert!(!Target::new("1", "about:blank", "").is_capturable());
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(Outcome::Failed { reason: "x".into() }).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["reason"], "x");
        let json = serde_json::to_value(Outcome::SkippedUnchanged).unwrap();
        assert_eq!(json["status"], "skipped_unchanged");
    }

    #[test]
    fn test_ids_are_transparent() {
        let id: TargetId = serde_json::from_str("\"ABC\"").unwrap();
        assert_eq!(id.as_str(), "ABC");
        assert_eq!(RequesterId::for_panel(&id).as_str(), "ABC");
    }
}
