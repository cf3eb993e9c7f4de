use config::ConfigError;
use serde::Deserialize;
use std::time::Duration;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub gateway: GatewaySettings,
    pub presence: PresenceSettings,
    pub emitter: EmitterSettings,
    pub log: LogSettings,
}

/// Bind addresses and the shared key used to sign and verify delivery tokens.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub ingest_port: u16,
    pub relay_port: u16,
    pub gateway_port: u16,
    pub token_signing_key: String,
}

/// Limits applied by the pub/sub broker to publishers and relay subscribers.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    pub max_ingest_connections: usize,
    pub ingest_max_connection_ms: u64,
    pub ingest_idle_timeout_ms: u64,
    pub relay_high_water_mark: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewaySettings {
    pub max_connections: usize,
    pub keep_alive_ms: u64,
    pub max_duration_ms: u64,
}

/// Presence cache polling policy. When `enabled` is false the poller never
/// starts and every presence check answers false.
#[derive(Debug, Deserialize, Clone)]
pub struct PresenceSettings {
    pub enabled: bool,
    pub db_path: String,
    pub poll_interval_ms: u64,
    pub max_poll_interval_ms: u64,
    pub backoff_factor: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmitterSettings {
    pub max_entries: usize,
    pub flush_interval_ms: u64,
    pub final_flush_timeout_ms: u64,
    pub token_expiry_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    pub level: String,
}

const MAX_BACKOFF_FACTOR: f64 = 10.0;

impl Settings {
    /// Rejects values the timers and the poller cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("gateway.keep_alive_ms", self.gateway.keep_alive_ms),
            ("gateway.max_duration_ms", self.gateway.max_duration_ms),
            ("presence.poll_interval_ms", self.presence.poll_interval_ms),
            ("presence.max_poll_interval_ms", self.presence.max_poll_interval_ms),
            ("emitter.flush_interval_ms", self.emitter.flush_interval_ms),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Message(format!("{key} must be greater than zero")));
        }

        let factor = self.presence.backoff_factor;
        if !factor.is_finite() || !(1.0..=MAX_BACKOFF_FACTOR).contains(&factor) {
            return Err(ConfigError::Message(format!(
                "presence.backoff_factor must be between 1 and {MAX_BACKOFF_FACTOR}, got {factor}"
            )));
        }
        Ok(())
    }
}

impl ServerSettings {
    pub fn ingest_addr(&self) -> String {
        format!("{}:{}", self.host, self.ingest_port)
    }

    pub fn relay_addr(&self) -> String {
        format!("{}:{}", self.host, self.relay_port)
    }

    pub fn gateway_addr(&self) -> String {
        format!("{}:{}", self.host, self.gateway_port)
    }
}

impl BrokerSettings {
    pub fn ingest_max_connection_time(&self) -> Duration {
        Duration::from_millis(self.ingest_max_connection_ms)
    }

    pub fn ingest_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.ingest_idle_timeout_ms)
    }
}

impl GatewaySettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }
}

impl PresenceSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_interval(&self) -> Duration {
        Duration::from_millis(self.max_poll_interval_ms)
    }
}

impl EmitterSettings {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn final_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.final_flush_timeout_ms)
    }
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()` by the loader.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub gateway: Option<PartialGatewaySettings>,
    pub presence: Option<PartialPresenceSettings>,
    pub emitter: Option<PartialEmitterSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub ingest_port: Option<u16>,
    pub relay_port: Option<u16>,
    pub gateway_port: Option<u16>,
    pub token_signing_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub max_ingest_connections: Option<usize>,
    pub ingest_max_connection_ms: Option<u64>,
    pub ingest_idle_timeout_ms: Option<u64>,
    pub relay_high_water_mark: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialGatewaySettings {
    pub max_connections: Option<usize>,
    pub keep_alive_ms: Option<u64>,
    pub max_duration_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialPresenceSettings {
    pub enabled: Option<bool>,
    pub db_path: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub max_poll_interval_ms: Option<u64>,
    pub backoff_factor: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialEmitterSettings {
    pub max_entries: Option<usize>,
    pub flush_interval_ms: Option<u64>,
    pub final_flush_timeout_ms: Option<u64>,
    pub token_expiry_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Overlay whatever was provided on top of `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let broker = self.broker.unwrap_or_default();
        let gateway = self.gateway.unwrap_or_default();
        let presence = self.presence.unwrap_or_default();
        let emitter = self.emitter.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                ingest_port: server.ingest_port.unwrap_or(default.server.ingest_port),
                relay_port: server.relay_port.unwrap_or(default.server.relay_port),
                gateway_port: server.gateway_port.unwrap_or(default.server.gateway_port),
                token_signing_key: server
                    .token_signing_key
                    .unwrap_or(default.server.token_signing_key),
            },
            broker: BrokerSettings {
                max_ingest_connections: broker
                    .max_ingest_connections
                    .unwrap_or(default.broker.max_ingest_connections),
                ingest_max_connection_ms: broker
                    .ingest_max_connection_ms
                    .unwrap_or(default.broker.ingest_max_connection_ms),
                ingest_idle_timeout_ms: broker
                    .ingest_idle_timeout_ms
                    .unwrap_or(default.broker.ingest_idle_timeout_ms),
                relay_high_water_mark: broker
                    .relay_high_water_mark
                    .unwrap_or(default.broker.relay_high_water_mark),
            },
            gateway: GatewaySettings {
                max_connections: gateway
                    .max_connections
                    .unwrap_or(default.gateway.max_connections),
                keep_alive_ms: gateway
                    .keep_alive_ms
                    .unwrap_or(default.gateway.keep_alive_ms),
                max_duration_ms: gateway
                    .max_duration_ms
                    .unwrap_or(default.gateway.max_duration_ms),
            },
            presence: PresenceSettings {
                enabled: presence.enabled.unwrap_or(default.presence.enabled),
                db_path: presence.db_path.unwrap_or(default.presence.db_path),
                poll_interval_ms: presence
                    .poll_interval_ms
                    .unwrap_or(default.presence.poll_interval_ms),
                max_poll_interval_ms: presence
                    .max_poll_interval_ms
                    .unwrap_or(default.presence.max_poll_interval_ms),
                backoff_factor: presence
                    .backoff_factor
                    .unwrap_or(default.presence.backoff_factor),
            },
            emitter: EmitterSettings {
                max_entries: emitter.max_entries.unwrap_or(default.emitter.max_entries),
                flush_interval_ms: emitter
                    .flush_interval_ms
                    .unwrap_or(default.emitter.flush_interval_ms),
                final_flush_timeout_ms: emitter
                    .final_flush_timeout_ms
                    .unwrap_or(default.emitter.final_flush_timeout_ms),
                token_expiry_secs: emitter
                    .token_expiry_secs
                    .unwrap_or(default.emitter.token_expiry_secs),
            },
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
            },
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                ingest_port: 5002,
                relay_port: 5001,
                gateway_port: 8080,
                token_signing_key: "livelog-dev-signing-key".to_string(),
            },
            broker: BrokerSettings {
                max_ingest_connections: 1000,
                ingest_max_connection_ms: 600_000,
                ingest_idle_timeout_ms: 60_000,
                relay_high_water_mark: 1000,
            },
            gateway: GatewaySettings {
                max_connections: 1000,
                keep_alive_ms: 30_000,
                max_duration_ms: 600_000,
            },
            presence: PresenceSettings {
                enabled: true,
                db_path: "livelog_db".to_string(),
                poll_interval_ms: 5_000,
                max_poll_interval_ms: 300_000,
                backoff_factor: 1.2,
            },
            emitter: EmitterSettings {
                max_entries: 100,
                flush_interval_ms: 250,
                final_flush_timeout_ms: 1_000,
                token_expiry_secs: 900,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
