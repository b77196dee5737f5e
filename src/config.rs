use crate::client::ClientSpec;
use crate::codec::{FnCodec, JsonOpCodec, SubscriptionCodec};
use crate::errors::Result;
use crate::heartbeat::HeartbeatConfig;
use crate::okx::{OkxCodec, OKX_PUBLIC_URL};
use crate::reconnect::ReconnectPolicy;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const CONFIG_FILE: &str = "feeder.toml";
pub const CONFIG_DIR_ENV: &str = "SOCKETFEEDER_CONFIG_DIR";
const ENV_PREFIX: &str = "SOCKETFEEDER";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeederConfig {
    pub logging: LoggingConfig,
    /// 0 또는 미지정이면 런타임 기본값
    pub runtime_threads: Option<usize>,
    pub clients: Vec<ClientConfig>,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            runtime_threads: None,
            clients: vec![ClientConfig::okx_public()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Protocol {
    Okx,
    JsonOp,
    /// `SUB:<topic>` / `UNSUB:<topic>`
    Prefixed,
}

impl Protocol {
    pub fn codec(&self) -> Arc<dyn SubscriptionCodec> {
        match self {
            Protocol::Okx => Arc::new(OkxCodec),
            Protocol::JsonOp => Arc::new(JsonOpCodec),
            Protocol::Prefixed => Arc::new(FnCodec::prefixed()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub id: String,
    pub url: String,
    #[serde(default = "default_protocol")]
    pub protocol: Protocol,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub trust_all_certs: bool,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default = "default_true")]
    pub heartbeat_enabled: bool,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

fn default_protocol() -> Protocol {
    Protocol::Okx
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

impl ClientConfig {
    /// 설정 파일이 없을 때 쓰는 OKX 공개 티커 구독
    pub fn okx_public() -> Self {
        Self {
            id: "okx-public".to_string(),
            url: OKX_PUBLIC_URL.to_string(),
            protocol: Protocol::Okx,
            enabled: true,
            trust_all_certs: false,
            topics: vec![r#"{"channel":"tickers","instId":"BTC-USDT"}"#.to_string()],
            heartbeat_enabled: true,
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }

    /// 핸들러를 제외한 등록 정보
    pub fn to_spec(&self) -> ClientSpec {
        let heartbeat = self.heartbeat_enabled.then(|| self.heartbeat.clone());
        ClientSpec::new(self.id.clone(), self.url.clone())
            .codec(self.protocol.codec())
            .trust_all_certs(self.trust_all_certs)
            .connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .handshake_timeout(Duration::from_millis(self.handshake_timeout_ms))
            .heartbeat(heartbeat)
            .reconnect(self.reconnect.clone())
            .topics(self.topics.iter().cloned())
    }
}

impl FeederConfig {
    /// feeder.toml 탐색 후 로드. 파일이 없으면 기본 설정에 환경 변수만 반영한다.
    pub fn load() -> Result<Self> {
        Self::load_from(find_config_file(CONFIG_FILE).as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        match path {
            Some(path) => {
                info!("📄 설정 파일 로드: {}", path.display());
                builder = builder.add_source(config::File::from(path));
            }
            None => warn!("{} 파일을 찾지 못해 기본 설정 사용", CONFIG_FILE),
        }

        // SOCKETFEEDER_LOGGING__LEVEL=debug 형태
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: FeederConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    pub fn enabled_clients(&self) -> impl Iterator<Item = &ClientConfig> {
        self.clients.iter().filter(|client| client.enabled)
    }

    pub fn runtime_threads(&self) -> Option<usize> {
        self.runtime_threads.filter(|threads| *threads > 0)
    }
}

/// 구성 파일을 여러 후보 경로에서 탐색한다.
/// 탐색 순서:
/// 1) 환경 변수 SOCKETFEEDER_CONFIG_DIR 지정 시: <env>/name (최우선)
/// 2) 현재 작업 디렉터리 기준: ./config/<name>
/// 3) 실행 파일 디렉터리 기준: <exe_dir>/config/<name>
/// 4) 개발 빌드 위치 보정: <exe_dir>/../../config/<name>
pub fn find_config_file(name: &str) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
        candidates.push(Path::new(&custom_dir).join(name));
    }

    candidates.push(Path::new("config").join(name));

    if let Ok(exe) = env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            candidates.push(exe_dir.join("config").join(name));
            // target/release → 프로젝트 루트/config
            if let Some(root) = exe_dir.parent().and_then(Path::parent) {
                candidates.push(root.join("config").join(name));
            }
        }
    }

    candidates.into_iter().find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconnect::Backoff;
    use pretty_assertions::assert_eq;
    use std::fs;

    const SAMPLE: &str = r#"
runtime_threads = 2

[logging]
level = "debug"

[[clients]]
id = "okx-public"
url = "wss://ws.okx.com:8443/ws/v5/public"
topics = ['{"channel":"tickers","instId":"BTC-USDT"}']

[clients.heartbeat]
ping_interval_ms = 15000

[clients.reconnect]
max_attempts = 3
backoff = "exponential"

[[clients]]
id = "local"
url = "ws://127.0.0.1:9001/feed"
protocol = "prefixed"
enabled = false
heartbeat_enabled = false
connect_timeout_ms = 1000
"#;

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, SAMPLE).unwrap();

        let config = FeederConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.runtime_threads(), Some(2));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.clients.len(), 2);

        let okx = &config.clients[0];
        assert_eq!(okx.protocol, Protocol::Okx);
        assert!(okx.enabled);
        assert_eq!(okx.heartbeat.ping_interval_ms, 15_000);
        assert_eq!(okx.heartbeat.pong_token, "pong");
        assert_eq!(okx.reconnect.max_attempts, 3);
        assert_eq!(okx.reconnect.backoff, Backoff::Exponential);
        assert_eq!(okx.topics.len(), 1);

        let local = &config.clients[1];
        assert_eq!(local.protocol, Protocol::Prefixed);
        assert_eq!(local.connect_timeout_ms, 1_000);
        assert_eq!(local.handshake_timeout_ms, 10_000);

        let enabled: Vec<&str> = config.enabled_clients().map(|c| c.id.as_str()).collect();
        assert_eq!(enabled, vec!["okx-public"]);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = FeederConfig::load_from(None).unwrap();
        assert_eq!(config.clients.len(), 1);
        assert_eq!(config.clients[0].id, "okx-public");
        assert_eq!(config.clients[0].url, OKX_PUBLIC_URL);
        assert_eq!(config.runtime_threads(), None);
    }

    #[test]
    fn test_client_config_to_spec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, SAMPLE).unwrap();
        let config = FeederConfig::load_from(Some(&path)).unwrap();

        let spec = config.clients[1].to_spec();
        assert_eq!(spec.client_id, "local");
        assert_eq!(spec.options.heartbeat, None);
        assert_eq!(spec.options.connect_timeout, Duration::from_millis(1_000));
        assert_eq!(spec.codec.format_subscribe("trades"), "SUB:trades");

        let spec = config.clients[0].to_spec();
        assert_eq!(spec.options.heartbeat.map(|hb| hb.ping_interval_ms), Some(15_000));
        assert_eq!(spec.topics, vec![r#"{"channel":"tickers","instId":"BTC-USDT"}"#]);
    }

    #[test]
    fn test_find_config_file_in_custom_dir() {
        let dir = tempfile::tempdir().unwrap();
        let name = "find-test-feeder.toml";
        fs::write(dir.path().join(name), "").unwrap();

        env::set_var(CONFIG_DIR_ENV, dir.path());
        let found = find_config_file(name);
        env::remove_var(CONFIG_DIR_ENV);

        assert_eq!(found, Some(dir.path().join(name)));
        assert_eq!(find_config_file("definitely-missing.toml"), None);
    }
}
