/// Proxy configuration
///
/// Options are plain serde structs so they can be loaded from JSON; missing
/// fields take their defaults.

use serde::{Deserialize, Serialize};

use crate::error::ProxyResult;

/// Tunables of a `QueryModelProxy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyOptions {
    /// Rows resolved per round trip when a row is read that is not cached yet.
    pub window: usize,
}

impl Default for ProxyOptions {
    fn default() -> Self {
        ProxyOptions { window: 40 }
    }
}

impl ProxyOptions {
    pub fn from_json(json: &str) -> ProxyResult<Self> {
        let mut options: ProxyOptions = serde_json::from_str(json)?;
        options.window = options.window.max(1);
        Ok(options)
    }
}
