// Version information for the Fabstir Sim Node

/// Full version string with feature description
pub const VERSION: &str = "v1.0.0-distributed-sim-2025-11-03";

/// Semantic version number
pub const VERSION_NUMBER: &str = "1.0.0";

pub const VERSION_MAJOR: u32 = 1;
pub const VERSION_MINOR: u32 = 0;
pub const VERSION_PATCH: u32 = 0;

/// Build date
pub const BUILD_DATE: &str = "2025-11-03";

/// Supported features in this version
pub const FEATURES: &[&str] = &[
    "ed25519-request-signing",
    "claim-codes",
    "content-addressed-configs",
    "chunked-jobs",
    "atomic-chunk-claim",
    "exactly-once-completion",
    "wave-worker-pool",
    "ndjson-remote-runs",
    "stale-chunk-requeue",
];

/// Get formatted version string for logging
pub fn get_version_string() -> String {
    format!("Fabstir Sim Node {} ({})", VERSION_NUMBER, BUILD_DATE)
}

/// Get full version info for API responses
pub fn get_version_info() -> serde_json::Value {
    serde_json::json!({
        "version": VERSION_NUMBER,
        "build": VERSION,
        "date": BUILD_DATE,
        "features": FEATURES,
    })
}
