//! Logging setup and build metadata

use chrono::{TimeZone, Utc};
use serde::Serialize;
use std::fmt;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Calling this
/// again once a subscriber is installed does nothing.
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Compile-time build information stamped by `build.rs`
#[derive(Debug, Clone, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub git_branch: &'static str,
    pub build_time: String,
    pub profile: &'static str,
    pub rustc: &'static str,
}

pub fn build_info() -> BuildInfo {
    let build_time_raw = option_env!("BUILD_TIME").unwrap_or("unknown");
    let build_time = build_time_raw
        .parse::<i64>()
        .ok()
        .and_then(|epoch| Utc.timestamp_opt(epoch, 0).single())
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| build_time_raw.to_string());

    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        git_hash: non_empty(option_env!("GIT_HASH")),
        git_branch: non_empty(option_env!("GIT_BRANCH")),
        build_time,
        profile: non_empty(option_env!("PROFILE")),
        rustc: non_empty(option_env!("RUSTC_VERSION")),
    }
}

fn non_empty(value: Option<&'static str>) -> &'static str {
    match value {
        Some(v) if !v.is_empty() => v,
        _ => "unknown",
    }
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trade-engine {} ({}@{}, {} build, {})",
            self.version, self.git_hash, self.git_branch, self.profile, self.build_time
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_info() {
        let info = build_info();
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        assert!(!info.git_hash.is_empty());
        assert!(info.to_string().starts_with("trade-engine "));
        init_tracing(false);
        init_tracing(true);
    }
}
