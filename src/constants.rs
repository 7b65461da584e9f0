//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! Tunables here are defaults; `ControllerConfig::from_env` can override them.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Periodic resync interval for a healthy policy (seconds)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 300;

/// Fibonacci backoff bounds for failed reconciliations (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 5;
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 600;

/// Status write attempts on conflict
pub const DEFAULT_STATUS_RETRY_ATTEMPTS: u32 = 5;

/// First status retry delay, doubled per attempt (milliseconds)
pub const DEFAULT_STATUS_RETRY_BASE_MS: u64 = 10;

/// Discovery document HTTP timeout (seconds)
pub const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 10;

/// How long a fetched discovery document is reused (seconds)
pub const DEFAULT_DISCOVERY_CACHE_TTL_SECS: u64 = 300;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default delay before restarting watch stream after it ends (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_AFTER_END_SECS: u64 = 1;

/// Watch stream error backoff bounds (milliseconds)
pub const DEFAULT_WATCH_BACKOFF_START_MS: u64 = 1000;
pub const DEFAULT_WATCH_BACKOFF_MAX_MS: u64 = 30_000;

pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: usize = 10;

/// Field manager and event reporter name
pub const CONTROLLER_NAME: &str = "authpolicy-controller";

/// Label put on every generated object
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Upper bound for the serialized workload selector (bytes)
pub const MAX_SELECTOR_BYTES: usize = 4096;

/// Auto-login defaults
pub const DEFAULT_REDIRECT_PATH: &str = "/oauth2/callback";
pub const DEFAULT_LOGOUT_PATH: &str = "/logout";

/// Headers set by the login script for the OAuth2 filter
pub const BYPASS_LOGIN_HEADER: &str = "x-bypass-login";
pub const DENY_REDIRECT_HEADER: &str = "x-deny-redirect";

/// Sidecar annotations that mount the login Secret into the proxy
pub const USER_VOLUME_ANNOTATION: &str = "sidecar.istio.io/userVolume";
pub const USER_VOLUME_MOUNT_ANNOTATION: &str = "sidecar.istio.io/userVolumeMount";

/// Where the proxy reads SDS secret files from
pub const ENVOY_SECRET_MOUNT_PATH: &str = "/etc/istio/config";

/// Keys of the generated Secret
pub const TOKEN_SECRET_FILE: &str = "token-secret.yaml";
pub const HMAC_SECRET_FILE: &str = "hmac-secret.yaml";

/// Name suffixes of generated objects
pub const DENY_POLICY_SUFFIX: &str = "-deny-auth-rules";
pub const IGNORE_POLICY_SUFFIX: &str = "-ignore-auth";
pub const REQUIRE_POLICY_SUFFIX: &str = "-require-auth";
pub const LOGIN_FILTER_SUFFIX: &str = "-login";
pub const ENVOY_SECRET_SUFFIX: &str = "-envoy-secret";
