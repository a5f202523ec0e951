//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::Result;
use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    /// Redis connection URL. When unset, the server falls back to the
    /// in-process store (single-node deployments and tests).
    pub redis_url: Option<String>,

    /// Path of the byte-range proxy used when source resolution demands it
    pub proxy_path: String,

    /// Allowed CORS origins ("*" allows any)
    pub cors_allowed_origins: Vec<String>,

    /// Number of chat messages retained per room
    pub chat_history: usize,

    /// Maximum participants per signaling modality (voice / camera mesh)
    pub signal_cap: usize,

    /// Playback drift beyond which guests get a sync-update, in seconds
    pub drift_threshold: f64,

    /// Deadline for a single HEAD or range probe
    pub probe_timeout: Duration,

    /// Overall deadline for the whole probe sequence
    pub probe_deadline: Duration,

    /// Idle time before the server pings a quiet connection
    pub ping_idle: Duration,

    /// Room record TTL in seconds (default: 86400 = 24 h)
    pub room_ttl: i64,

    /// Chat list TTL in seconds (default: 86400 = 24 h)
    pub chat_ttl: i64,

    /// userId -> connection mapping TTL in seconds (default: 7200 = 2 h)
    pub socket_ttl: i64,

    /// Interval between stale-room sweeps
    pub sweep_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            redis_url: env::var("REDIS_URL").ok(),
            proxy_path: env::var("VIDEO_PROXY_PATH").unwrap_or_else(|_| "/api/video-proxy".into()),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            chat_history: env::var("WP_CHAT_HISTORY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            signal_cap: env::var("WP_SIGNAL_CAP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            drift_threshold: env::var("WP_DRIFT_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.5),
            probe_timeout: Duration::from_secs(
                env::var("WP_PROBE_TIMEOUT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
            ),
            probe_deadline: Duration::from_secs(
                env::var("WP_PROBE_DEADLINE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(10),
            ),
            ping_idle: Duration::from_secs(
                env::var("WP_PING_IDLE")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
            ),
            room_ttl: env::var("WP_ROOM_TTL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(86400),
            chat_ttl: env::var("WP_CHAT_TTL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(86400),
            socket_ttl: env::var("WP_SOCKET_TTL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(7200),
            sweep_interval: Duration::from_secs(
                env::var("WP_SWEEP_INTERVAL")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(600),
            ),
        })
    }

    /// Create a default configuration for testing.
    ///
    /// Uses the in-process store, so tests need neither Redis nor network.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".into(),
            redis_url: None,
            proxy_path: "/api/video-proxy".into(),
            cors_allowed_origins: vec!["*".into()],
            chat_history: 50,
            signal_cap: 5,
            drift_threshold: 1.5,
            probe_timeout: Duration::from_secs(5),
            probe_deadline: Duration::from_secs(10),
            ping_idle: Duration::from_secs(60),
            room_ttl: 86400,
            chat_ttl: 86400,
            socket_ttl: 7200,
            sweep_interval: Duration::from_secs(600),
        }
    }
}
