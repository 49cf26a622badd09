pub mod platform;
pub mod proto;

#[cfg(any(test, feature = "test-harness"))]
pub mod test_harness;

// Log source tags
pub const LOG_SOURCE_APP: &str = "app";
pub const LOG_SOURCE_BUILD: &str = "build";

// Release status (the only one this service produces)
pub const RELEASE_STATUS_SUCCEEDED: &str = "succeeded";

// Activity records
pub const ACTIVITY_ACTOR_SYSTEM: &str = "system";
pub const ACTIVITY_ACTION_RELEASE: &str = "release";
pub const ACTIVITY_ACTION_ADDON_CREATE: &str = "addon:create";

// Add-on defaults
pub const ADDON_DEFAULT_PLAN: &str = "Free";
pub const ADDON_STATUS_PROVISIONING: &str = "provisioning";

// Recent-log cache bounds
pub const RECENT_LOG_LIMIT: usize = 100;
pub const RECENT_LOG_TTL_SECS: u64 = 3600;

// Number of application ids returned by the deployment statistics
pub const RECENT_DEPLOYS_LIMIT: usize = 10;
