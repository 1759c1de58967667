//! TOML 配置文件
//!
//! 默认路径：
//! - Linux: `~/.config/pantrack/config.toml`
//! - macOS: `~/Library/Application Support/pantrack/config.toml`
//! - Windows: `%APPDATA%\pantrack\config.toml`
//!
//! 所有字段都有默认值，配置文件只需写出需要修改的项：
//!
//! ```toml
//! [broker]
//! host = "192.168.1.20"
//! team_id = "elvin01"
//!
//! [servo]
//! step_max = 6
//! ```

use crate::link::{MAX_DELAY, RetryPolicy};
use pantrack_mqtt::MqttOptions;
use pantrack_servo::{ScanConfig, ServoConfig};
use pantrack_vision::ClassifierConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// 消息代理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerSection {
    pub host: String,
    pub port: u16,
    /// 队伍 ID，用于派生主题和客户端 ID
    pub team_id: String,
    /// 覆盖默认主题 `vision/{team_id}/movement`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// 覆盖默认控制端客户端 ID `esp8266_{team_id}`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            team_id: "elvin01".to_string(),
            topic: None,
            client_id: None,
            keep_alive_secs: 60,
            connect_timeout_secs: 5.0,
            username: None,
            password: None,
        }
    }
}

impl BrokerSection {
    pub fn topic(&self) -> String {
        self.topic
            .clone()
            .unwrap_or_else(|| format!("vision/{}/movement", self.team_id))
    }

    /// 控制端（订阅者）客户端 ID
    pub fn controller_client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("esp8266_{}", self.team_id))
    }

    /// 识别端（发布者）客户端 ID
    pub fn bridge_client_id(&self) -> String {
        format!("vision_{}", self.team_id)
    }

    pub fn mqtt_options(&self, client_id: impl Into<String>) -> MqttOptions {
        MqttOptions::new(client_id, self.host.clone(), self.port)
            .with_keep_alive(Duration::from_secs(self.keep_alive_secs))
            .with_connect_timeout(secs(self.connect_timeout_secs))
            .with_credentials(self.username.clone(), self.password.clone())
    }
}

/// 舵机配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServoSection {
    pub angle_min: i32,
    pub angle_max: i32,
    pub neutral_angle: i32,
    pub step_min: i32,
    pub step_max: i32,
    pub duty_min: u32,
    pub duty_max: u32,
    pub frequency_hz: u32,
    /// sysfs PWM 芯片号
    pub pwm_chip: u32,
    /// sysfs PWM 通道号
    pub pwm_channel: u32,
}

impl Default for ServoSection {
    fn default() -> Self {
        let servo = ServoConfig::default();
        Self {
            angle_min: servo.angle_min,
            angle_max: servo.angle_max,
            neutral_angle: servo.neutral_angle,
            step_min: servo.step_min,
            step_max: servo.step_max,
            duty_min: servo.duty_min,
            duty_max: servo.duty_max,
            frequency_hz: servo.frequency_hz,
            pwm_chip: 0,
            pwm_channel: 0,
        }
    }
}

impl ServoSection {
    pub fn servo_config(&self) -> ServoConfig {
        ServoConfig {
            angle_min: self.angle_min,
            angle_max: self.angle_max,
            neutral_angle: self.neutral_angle,
            step_min: self.step_min,
            step_max: self.step_max,
            duty_min: self.duty_min,
            duty_max: self.duty_max,
            frequency_hz: self.frequency_hz,
        }
    }
}

/// 扫描配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanSection {
    pub step: i32,
    pub interval_ms: u64,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            step: 2,
            interval_ms: 100,
        }
    }
}

impl ScanSection {
    pub fn scan_config(&self) -> ScanConfig {
        ScanConfig {
            step: self.step,
            interval: Duration::from_millis(self.interval_ms),
        }
    }
}

/// 分类器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifierSection {
    pub dead_zone: f64,
    pub hysteresis: f64,
    pub min_publish_interval_secs: f64,
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            dead_zone: 0.10,
            hysteresis: 0.05,
            min_publish_interval_secs: 0.5,
        }
    }
}

impl ClassifierSection {
    pub fn classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            dead_zone: self.dead_zone,
            hysteresis: self.hysteresis,
            min_publish_interval: secs(self.min_publish_interval_secs),
        }
    }
}

/// 分派循环时间参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherSection {
    pub connect_retry_secs: f64,
    pub reconnect_delay_secs: f64,
    pub poll_interval_ms: u64,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            connect_retry_secs: 5.0,
            reconnect_delay_secs: 3.0,
            poll_interval_ms: 50,
        }
    }
}

impl DispatcherSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            connect_retry: secs(self.connect_retry_secs),
            reconnect_delay: secs(self.reconnect_delay_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

/// 完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    pub broker: BrokerSection,
    pub servo: ServoSection,
    pub scan: ScanSection,
    pub classifier: ClassifierSection,
    pub dispatcher: DispatcherSection,
}

impl TrackerConfig {
    /// 默认配置文件路径
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pantrack").join("config.toml"))
    }

    /// 从文件加载并校验
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// 解析 TOML 文本并校验
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 加载配置
    ///
    /// - 显式路径：文件必须存在
    /// - 未指定：读取默认路径，文件不存在时使用默认值
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// 保存到文件（自动创建父目录）
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(write_err)
    }

    /// 检查各段配置的一致性
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| ConfigError::Invalid(msg);

        if self.broker.host.trim().is_empty() {
            return Err(invalid("broker.host is empty".to_string()));
        }
        if self.broker.topic().trim().is_empty() {
            return Err(invalid("broker.topic is empty".to_string()));
        }
        check_secs("broker.connect_timeout_secs", self.broker.connect_timeout_secs)?;
        // TcpStream::connect_timeout 不接受零时长
        if self.broker.connect_timeout_secs <= 0.0 {
            return Err(invalid("broker.connect_timeout_secs must be positive".to_string()));
        }
        check_millis("broker.keep_alive_secs", self.broker.keep_alive_secs.saturating_mul(1000))?;

        let servo = self.servo.servo_config();
        servo.validate().map_err(|e| invalid(format!("servo: {}", e)))?;
        self.scan
            .scan_config()
            .validate(&servo)
            .map_err(|e| invalid(format!("scan: {}", e)))?;
        check_millis("scan.interval_ms", self.scan.interval_ms)?;

        let c = &self.classifier;
        for (name, value) in [("dead_zone", c.dead_zone), ("hysteresis", c.hysteresis)] {
            if !value.is_finite() || !(0.0..=0.5).contains(&value) {
                return Err(invalid(format!("classifier.{} must be in [0, 0.5], got {}", name, value)));
            }
        }
        check_secs("classifier.min_publish_interval_secs", c.min_publish_interval_secs)?;

        check_secs("dispatcher.connect_retry_secs", self.dispatcher.connect_retry_secs)?;
        check_secs("dispatcher.reconnect_delay_secs", self.dispatcher.reconnect_delay_secs)?;
        check_millis("dispatcher.poll_interval_ms", self.dispatcher.poll_interval_ms)?;
        Ok(())
    }
}

/// 秒数必须在 [0, MAX_DELAY] 内
fn check_secs(name: &str, value: f64) -> Result<(), ConfigError> {
    match Duration::try_from_secs_f64(value) {
        Ok(duration) if duration <= MAX_DELAY => Ok(()),
        _ => Err(ConfigError::Invalid(format!(
            "{} must be between 0 and {} seconds, got {}",
            name,
            MAX_DELAY.as_secs(),
            value
        ))),
    }
}

fn check_millis(name: &str, value: u64) -> Result<(), ConfigError> {
    if Duration::from_millis(value) > MAX_DELAY {
        return Err(ConfigError::Invalid(format!(
            "{} exceeds {} seconds",
            name,
            MAX_DELAY.as_secs()
        )));
    }
    Ok(())
}

/// 秒数转换（校验后使用，非法值退化为 0）
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployment() {
        let config = TrackerConfig::default();
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.broker.topic(), "vision/elvin01/movement");
        assert_eq!(config.broker.controller_client_id(), "esp8266_elvin01");
        assert_eq!(config.broker.bridge_client_id(), "vision_elvin01");
        assert_eq!(config.servo.servo_config(), ServoConfig::default());
        assert_eq!(config.scan.scan_config(), ScanConfig::default());
        assert_eq!(config.classifier.classifier_config(), ClassifierConfig::default());
        assert_eq!(config.dispatcher.retry_policy(), RetryPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file() {
        let config = TrackerConfig::parse(
            r#"
[broker]
host = "10.0.0.5"
team_id = "red"

[servo]
step_max = 6
"#,
        )
        .unwrap();
        assert_eq!(config.broker.host, "10.0.0.5");
        assert_eq!(config.broker.topic(), "vision/red/movement");
        assert_eq!(config.servo.step_max, 6);
        assert_eq!(config.servo.angle_max, 180);
        assert_eq!(config.scan.step, 2);
    }

    #[test]
    fn test_topic_override() {
        let config = TrackerConfig::parse("[broker]\ntopic = \"custom/topic\"\n").unwrap();
        assert_eq!(config.broker.topic(), "custom/topic");
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(matches!(
            TrackerConfig::parse("[servo]\nangle_min = 180\nangle_max = 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            TrackerConfig::parse("[servo]\nstep_min = 9\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            TrackerConfig::parse("[classifier]\ndead_zone = -0.1\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            TrackerConfig::parse("[dispatcher]\nreconnect_delay_secs = -1.0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            TrackerConfig::parse("[broker]\ntopic = \"  \"\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            TrackerConfig::parse("[servo]\nunknown_key = 1\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_rejects_oversized_delays() {
        for content in [
            "[dispatcher]\nconnect_retry_secs = 1.8e19\n",
            "[dispatcher]\nreconnect_delay_secs = 86401.0\n",
            "[dispatcher]\npoll_interval_ms = 9000000000000000000\n",
            "[scan]\ninterval_ms = 90000000\n",
            "[classifier]\nmin_publish_interval_secs = 1e12\n",
            "[broker]\nkeep_alive_secs = 100000\n",
        ] {
            assert!(
                matches!(TrackerConfig::parse(content), Err(ConfigError::Invalid(_))),
                "{}",
                content
            );
        }
        assert!(TrackerConfig::parse("[dispatcher]\nconnect_retry_secs = 86400.0\n").is_ok());
    }

    #[test]
    fn test_rejects_zero_connect_timeout() {
        assert!(matches!(
            TrackerConfig::parse("[broker]\nconnect_timeout_secs = 0.0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(TrackerConfig::parse("[broker]\nconnect_timeout_secs = 0.5\n").is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = TrackerConfig::default();
        config.broker.host = "broker.local".to_string();
        config.scan.interval_ms = 80;
        config.save(&path).unwrap();

        let loaded = TrackerConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            TrackerConfig::load_or_default(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_mqtt_options() {
        let config = TrackerConfig::default();
        let opts = config.broker.mqtt_options(config.broker.controller_client_id());
        assert_eq!(opts.client_id, "esp8266_elvin01");
        assert_eq!(opts.port, 1883);
        assert_eq!(opts.keep_alive, Duration::from_secs(60));
        assert_eq!(opts.connect_timeout, Duration::from_secs(5));
    }
}
