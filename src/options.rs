use std::{fmt, sync::Arc};

use crate::{events::LogSettings, selector::SelectorFactory};

/// Read consistency level.
///
/// Writes always run at `Strong` regardless of what the caller asks for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Consistency {
    /// Linearizable read through the leader's consensus round.
    Strong,
    /// Leader-served read without a full consensus round.
    #[default]
    Weak,
    /// Any-node read bounded by a freshness window; may come back stale.
    None,
}

impl Consistency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strong => "strong",
            Self::Weak => "weak",
            Self::None => "none",
        }
    }

    /// Whether a request at this level has to reach the leader.
    pub fn requires_leader(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configures timeouts, retry budgets, default consistency, and logging.
///
/// Immutable once the connection is built.
#[derive(Clone)]
pub struct ConnectionOptions {
    /// Connect timeout in milliseconds: fetch start until OK headers.
    pub timeout_ms: u64,
    /// Read timeout in milliseconds: OK headers until the body is fully
    /// consumed.
    pub response_timeout_ms: u64,
    /// Redirects followed per node selection.
    pub max_redirects: u32,
    /// Total attempts per host before the selector gives up.
    pub max_attempts_per_host: u32,
    /// Default consistency for reads.
    pub read_consistency: Consistency,
    /// Default freshness window for `none`-level reads, e.g. `"5m"`.
    pub freshness: String,
    /// Log event configuration.
    pub log: LogSettings,
    /// Replaces the built-in node selection when set.
    pub selector_factory: Option<Arc<dyn SelectorFactory>>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            response_timeout_ms: 60_000,
            max_redirects: 2,
            max_attempts_per_host: 2,
            read_consistency: Consistency::Weak,
            freshness: "5m".to_owned(),
            log: LogSettings::default(),
            selector_factory: None,
        }
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("timeout_ms", &self.timeout_ms)
            .field("response_timeout_ms", &self.response_timeout_ms)
            .field("max_redirects", &self.max_redirects)
            .field("max_attempts_per_host", &self.max_attempts_per_host)
            .field("read_consistency", &self.read_consistency)
            .field("freshness", &self.freshness)
            .field(
                "selector_factory",
                &self.selector_factory.as_ref().map(|_| "<custom>"),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Consistency, ConnectionOptions};

    #[test]
    fn defaults_match_the_documented_values() {
        let options = ConnectionOptions::default();
        assert_eq!(options.timeout_ms, 5_000);
        assert_eq!(options.response_timeout_ms, 60_000);
        assert_eq!(options.max_redirects, 2);
        assert_eq!(options.max_attempts_per_host, 2);
        assert_eq!(options.read_consistency, Consistency::Weak);
        assert_eq!(options.freshness, "5m");
        assert!(options.selector_factory.is_none());
    }

    #[test]
    fn only_none_level_skips_the_leader() {
        assert!(Consistency::Strong.requires_leader());
        assert!(Consistency::Weak.requires_leader());
        assert!(!Consistency::None.requires_leader());
        assert_eq!(Consistency::None.as_str(), "none");
    }
}
