//! Parsed runtime configuration.
//!
//! Loading (file discovery, TOML parsing) happens at the composition root;
//! this module only defines the shape, the defaults, and the environment
//! overrides applied on top of the parsed tree.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub turn: TurnConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub container: ContainerConfig,
    /// Adapter-private configuration blobs keyed by channel type. Shape is
    /// opaque here; each adapter normalizes its own table.
    #[serde(default)]
    pub channels: HashMap<String, Value>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_addr")]
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { addr: d_addr() }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret for schedule-scoped JWTs. Empty = token issuance is
    /// refused (startup aborts if schedules are enabled).
    #[serde(default)]
    pub jwt_secret: String,
    /// Validity window for issued schedule tokens. Values below the
    /// 10-minute floor are raised to it.
    #[serde(default = "d_jwt_ttl")]
    pub jwt_ttl_minutes: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_ttl_minutes: d_jwt_ttl(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Wall-clock deadline per turn. On expiry the turn context is
    /// cancelled and an error `final` event is emitted.
    #[serde(default = "d_deadline")]
    pub deadline_secs: u64,
    /// History window: messages newer than `now - active_context_minutes`
    /// are loaded into the prompt.
    #[serde(default = "d_context_minutes")]
    pub active_context_minutes: i64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            deadline_secs: d_deadline(),
            active_context_minutes: d_context_minutes(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schedule engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Dispatch tick. One-second resolution keeps cron matching precise
    /// without back-filling missed ticks.
    #[serde(default = "d_tick")]
    pub tick_secs: u64,
    /// Bounded worker pool for concurrent fires.
    #[serde(default = "d_workers")]
    pub workers: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            tick_secs: d_tick(),
            workers: d_workers(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Container runtime (external collaborator; only the socket is ours)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(default = "d_socket")]
    pub socket_path: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            socket_path: d_socket(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_addr() -> String {
    "127.0.0.1:7600".into()
}
fn d_jwt_ttl() -> u64 {
    10
}
fn d_deadline() -> u64 {
    600
}
fn d_context_minutes() -> i64 {
    30
}
fn d_tick() -> u64 {
    1
}
fn d_workers() -> usize {
    4
}
fn d_socket() -> String {
    "/var/run/docker.sock".into()
}

impl Config {
    /// Apply environment overrides on top of the parsed tree. Called once
    /// at startup, after TOML parsing and before anything reads the config.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if !addr.is_empty() {
                tracing::info!(%addr, "HTTP_ADDR override applied");
                self.server.addr = addr;
            }
        }
        if let Ok(socket) = std::env::var("BOTHIVE_CONTAINER_SOCKET") {
            if !socket.is_empty() {
                self.container.socket_path = socket;
            }
        }
    }

    /// Effective JWT ttl with the 10-minute floor applied.
    pub fn jwt_ttl_minutes(&self) -> u64 {
        self.auth.jwt_ttl_minutes.max(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.server.addr, "127.0.0.1:7600");
        assert_eq!(cfg.turn.deadline_secs, 600);
        assert_eq!(cfg.turn.active_context_minutes, 30);
        assert_eq!(cfg.schedule.tick_secs, 1);
        assert_eq!(cfg.jwt_ttl_minutes(), 10);
    }

    #[test]
    fn jwt_ttl_floor_is_ten_minutes() {
        let mut cfg = Config::default();
        cfg.auth.jwt_ttl_minutes = 2;
        assert_eq!(cfg.jwt_ttl_minutes(), 10);
        cfg.auth.jwt_ttl_minutes = 45;
        assert_eq!(cfg.jwt_ttl_minutes(), 45);
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: Config = toml::from_str(
            r#"
            [server]
            addr = "0.0.0.0:9000"

            [auth]
            jwt_secret = "s3cret"

            [channels.telegram]
            bot_token = "123:abc"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.addr, "0.0.0.0:9000");
        assert_eq!(cfg.auth.jwt_secret, "s3cret");
        assert_eq!(cfg.turn.deadline_secs, 600);
        assert_eq!(
            cfg.channels["telegram"]["bot_token"],
            serde_json::json!("123:abc")
        );
    }

    #[test]
    fn channel_blobs_stay_opaque() {
        let cfg: Config = toml::from_str(
            r#"
            [channels.discord]
            bot_token = "t"
            application_id = "42"
            "#,
        )
        .unwrap();
        let discord = &cfg.channels["discord"];
        assert_eq!(discord["application_id"], serde_json::json!("42"));
    }
}
