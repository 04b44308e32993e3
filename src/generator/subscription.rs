use serde::{Deserialize, Serialize};

// ============================================================================
// Subscription Source
// ============================================================================

/// One subscription source: a URL or a local file with URI-list content
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    /// Optional label used in logs, defaults to the url
    #[serde(default)]
    pub name: String,

    /// URL or local file path
    pub url: String,
}

impl Subscription {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            url: url.into(),
        }
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.url
        } else {
            &self.name
        }
    }
}
