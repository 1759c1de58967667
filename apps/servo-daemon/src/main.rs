//! 云台舵机守护进程
//!
//! 控制端主程序：订阅运动事件，驱动舵机跟踪人脸，无人脸时自动扫描。
//! Ctrl+C 后停止扫描、释放舵机并断开连接。

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use pantrack_control::{Dispatcher, TrackerConfig, TrackingRig};
use pantrack_mqtt::MqttSubscriber;
use pantrack_servo::{LogOutput, PwmOutput};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 按 `--verbose` 级别启用日志的 crate
const LOG_TARGETS: [&str; 5] = [
    "servo_daemon",
    "pantrack_control",
    "pantrack_servo",
    "pantrack_mqtt",
    "pantrack_vision",
];

/// PWM 输出后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// 只记录占空比（无硬件）
    Log,
    /// Linux sysfs PWM（/sys/class/pwm）
    Sysfs,
}

/// 云台舵机守护进程
#[derive(Parser, Debug)]
#[command(name = "servo-daemon")]
#[command(about = "Pan servo controller - follows movement events from the vision side", long_about = None)]
struct Args {
    /// 配置文件路径
    ///
    /// 默认: ~/.config/pantrack/config.toml（不存在时使用内置默认值）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 消息代理地址（覆盖配置文件）
    #[arg(long)]
    host: Option<String>,

    /// 消息代理端口（覆盖配置文件）
    #[arg(long)]
    port: Option<u16>,

    /// 订阅主题（覆盖配置文件）
    #[arg(long)]
    topic: Option<String>,

    /// 队伍 ID（决定默认主题和客户端 ID）
    #[arg(long)]
    team_id: Option<String>,

    /// PWM 输出后端
    #[arg(long, value_enum, default_value = "log")]
    backend: Backend,

    /// sysfs PWM 芯片号（覆盖配置文件）
    #[arg(long)]
    pwm_chip: Option<u32>,

    /// sysfs PWM 通道号（覆盖配置文件）
    #[arg(long)]
    pwm_channel: Option<u32>,

    /// 打印生效的配置并退出
    #[arg(long)]
    dump_config: bool,

    /// 把生效的配置写入配置文件并退出（路径同 --config）
    #[arg(long, conflicts_with = "dump_config")]
    save_config: bool,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn apply_overrides(&self, config: &mut TrackerConfig) {
        if let Some(host) = &self.host {
            config.broker.host = host.clone();
        }
        if let Some(port) = self.port {
            config.broker.port = port;
        }
        if let Some(team_id) = &self.team_id {
            config.broker.team_id = team_id.clone();
        }
        if let Some(topic) = &self.topic {
            config.broker.topic = Some(topic.clone());
        }
        if let Some(chip) = self.pwm_chip {
            config.servo.pwm_chip = chip;
        }
        if let Some(channel) = self.pwm_channel {
            config.servo.pwm_channel = channel;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 初始化日志
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(level)?)
        .init();

    let mut config = TrackerConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    args.apply_overrides(&mut config);
    config.validate().context("Invalid configuration")?;

    if args.dump_config {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    if args.save_config {
        let path = match &args.config {
            Some(path) => path.clone(),
            None => TrackerConfig::default_path()
                .context("Could not determine the default config directory")?,
        };
        config
            .save(&path)
            .with_context(|| format!("Failed to save configuration to {}", path.display()))?;
        info!("Configuration saved to {}", path.display());
        return Ok(());
    }

    // Ctrl+C 只置位停止标志，停止流程由主循环完成
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let output = open_output(args.backend, &config)?;
    let topic = config.broker.topic();
    let client_id = config.broker.controller_client_id();
    info!(
        "Servo daemon starting: broker {}:{}, topic '{}', client '{}', backend {:?}",
        config.broker.host, config.broker.port, topic, client_id, args.backend
    );

    let source = MqttSubscriber::new(config.broker.mqtt_options(client_id), topic);
    let rig = TrackingRig::new(
        config.servo.servo_config(),
        config.scan.scan_config(),
        output,
    );
    let mut dispatcher = Dispatcher::new(source, rig, config.dispatcher.retry_policy());

    let report = dispatcher.run(&shutdown);
    if !report.released {
        warn!("Servo was not released cleanly");
    }
    info!("Servo daemon stopped");
    Ok(())
}

fn open_output(backend: Backend, config: &TrackerConfig) -> Result<Box<dyn PwmOutput>> {
    match backend {
        Backend::Log => Ok(Box::new(LogOutput::new())),
        Backend::Sysfs => open_sysfs(config),
    }
}

#[cfg(target_os = "linux")]
fn open_sysfs(config: &TrackerConfig) -> Result<Box<dyn PwmOutput>> {
    let output = pantrack_servo::SysfsPwmOutput::open(
        config.servo.pwm_chip,
        config.servo.pwm_channel,
        config.servo.frequency_hz,
    )
    .with_context(|| {
        format!(
            "Failed to open PWM channel pwmchip{}/pwm{}",
            config.servo.pwm_chip, config.servo.pwm_channel
        )
    })?;
    Ok(Box::new(output))
}

#[cfg(not(target_os = "linux"))]
fn open_sysfs(_config: &TrackerConfig) -> Result<Box<dyn PwmOutput>> {
    anyhow::bail!("The sysfs PWM backend is only available on Linux")
}

fn log_filter(level: &str) -> Result<EnvFilter> {
    let mut filter = EnvFilter::from_default_env();
    for target in LOG_TARGETS {
        filter = filter.add_directive(format!("{}={}", target, level).parse()?);
    }
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "servo-daemon",
            "--host",
            "10.0.0.2",
            "--team-id",
            "blue",
            "--pwm-channel",
            "1",
        ]);
        let mut config = TrackerConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.broker.host, "10.0.0.2");
        assert_eq!(config.broker.topic(), "vision/blue/movement");
        assert_eq!(config.broker.controller_client_id(), "esp8266_blue");
        assert_eq!(config.servo.pwm_channel, 1);
        assert_eq!(args.backend, Backend::Log);
    }

    #[test]
    fn test_backend_flag() {
        let args = Args::parse_from(["servo-daemon", "--backend", "sysfs", "-v"]);
        assert_eq!(args.backend, Backend::Sysfs);
        assert!(args.verbose);
    }

    #[test]
    fn test_save_config_conflicts_with_dump() {
        assert!(Args::try_parse_from(["servo-daemon", "--dump-config", "--save-config"]).is_err());
        let args = Args::parse_from(["servo-daemon", "--save-config", "-c", "/tmp/pantrack.toml"]);
        assert!(args.save_config);
    }

    #[test]
    fn test_log_filter_covers_workspace_crates() {
        let filter = log_filter("debug").unwrap().to_string();
        for target in LOG_TARGETS {
            assert!(
                filter.contains(&format!("{}=debug", target)),
                "{} missing from {}",
                target,
                filter
            );
        }
    }
}
