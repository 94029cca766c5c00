use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::{
    CaptureSource, PlaybackSink, CAPTURE_SAMPLE_RATE, CAPTURE_WINDOW_SAMPLES, PLAYBACK_SAMPLE_RATE,
};
use crate::capture::CaptureSettings;
use crate::session::{SessionConfig, DEFAULT_ENDPOINT};
use crate::transport::ReconnectPolicy;

/// Environment variable prefix, e.g. `LOQA_VOICE__TRANSPORT__ENDPOINT`
pub const ENV_PREFIX: &str = "LOQA_VOICE";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub transport: TransportConfig,
    pub reconnect: ReconnectConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub session: SessionTuning,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    /// Fallback log filter when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "loqa-voice".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub endpoint: String,
    /// In-flight frames per direction before sends are rejected
    pub queue_frames: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            queue_frames: 64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 10000,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: CaptureSource,
    pub sample_rate: u32,
    pub window_samples: usize,
    /// Start capturing as soon as the session connects
    pub autostart: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: CaptureSource::default(),
            sample_rate: CAPTURE_SAMPLE_RATE,
            window_samples: CAPTURE_WINDOW_SAMPLES,
            autostart: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub sink: PlaybackSink,
    /// Output device rate; inbound frames are resampled to it
    pub sample_rate: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sink: PlaybackSink::default(),
            sample_rate: PLAYBACK_SAMPLE_RATE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionTuning {
    pub state_poll_ms: u64,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self { state_poll_ms: 50 }
    }
}

impl Config {
    /// Load `path` (extension optional, file optional) with environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to load config from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            max_attempts: self.reconnect.max_attempts,
        }
    }

    /// Project the file configuration onto a fresh session
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.transport.endpoint.clone(),
            capture: CaptureSettings {
                sample_rate: self.capture.sample_rate,
                window_samples: self.capture.window_samples,
            },
            reconnect: self.reconnect_policy(),
            state_poll_interval: Duration::from_millis(self.session.state_poll_ms.max(1)),
            ..SessionConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn test_missing_file_gives_reference_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent");
        let cfg = Config::load(path.to_str().unwrap()).unwrap();

        assert_eq!(cfg.transport.endpoint, "ws://localhost:8000/ws/audio");
        assert_eq!(cfg.capture.sample_rate, 16000);
        assert_eq!(cfg.capture.window_samples, 4096);
        assert_eq!(cfg.playback.sample_rate, 24000);
        assert_eq!(cfg.reconnect_policy(), ReconnectPolicy::default());
        assert_eq!(cfg.capture.source, CaptureSource::Microphone);
    }

    #[test]
    fn test_toml_file_overrides_sections() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[transport]
endpoint = "ws://voice.local:9000/ws/audio"

[reconnect]
max_attempts = 3

[capture]
autostart = false

[capture.source]
kind = "file"
path = "prompt.wav"

[playback.sink]
kind = "file"
path = "reply.wav"
"#
        )
        .unwrap();

        let cfg = Config::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.transport.endpoint, "ws://voice.local:9000/ws/audio");
        assert_eq!(cfg.reconnect.max_attempts, 3);
        assert_eq!(cfg.reconnect.base_delay_ms, 1000);
        assert!(!cfg.capture.autostart);
        assert_eq!(
            cfg.capture.source,
            CaptureSource::File {
                path: PathBuf::from("prompt.wav")
            }
        );
        assert_eq!(
            cfg.playback.sink,
            PlaybackSink::File {
                path: PathBuf::from("reply.wav")
            }
        );

        let session = cfg.session_config();
        assert_eq!(session.endpoint, "ws://voice.local:9000/ws/audio");
        assert_eq!(session.reconnect.max_attempts, 3);
        assert!(session.session_id.starts_with("voice-"));
    }

    #[test]
    fn test_environment_overrides_file() {
        std::env::set_var("LOQA_VOICE__SERVICE__NAME", "voice-from-env");
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(dir.path().join("absent").to_str().unwrap()).unwrap();
        std::env::remove_var("LOQA_VOICE__SERVICE__NAME");

        assert_eq!(cfg.service.name, "voice-from-env");
    }
}
