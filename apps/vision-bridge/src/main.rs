//! 识别端发布桥
//!
//! 从标准输入逐行读取人脸锁定观测（JSON），分类后把运动事件发布到消息代理。
//! 输入结束或 Ctrl+C 时断开连接并退出。

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{RecvTimeoutError, Sender};
use pantrack_control::{ObservationBridge, TrackerConfig, parse_observation_line};
use pantrack_mqtt::MqttPublisher;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Instant, SystemTime};
use tracing::{debug, info, trace, warn};
use tracing_subscriber::EnvFilter;

/// 按 `--verbose` 级别启用日志的 crate
const LOG_TARGETS: [&str; 5] = [
    "vision_bridge",
    "pantrack_control",
    "pantrack_servo",
    "pantrack_mqtt",
    "pantrack_vision",
];

/// 输入行通道容量
const LINE_QUEUE: usize = 64;

/// 识别端发布桥
#[derive(Parser, Debug)]
#[command(name = "vision-bridge")]
#[command(about = "Reads face-lock observations from stdin and publishes movement events", long_about = None)]
struct Args {
    /// 配置文件路径
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 消息代理地址（覆盖配置文件）
    #[arg(long)]
    host: Option<String>,

    /// 消息代理端口（覆盖配置文件）
    #[arg(long)]
    port: Option<u16>,

    /// 发布主题（覆盖配置文件）
    #[arg(long)]
    topic: Option<String>,

    /// 队伍 ID
    #[arg(long)]
    team_id: Option<String>,

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
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // 日志写到 stderr，stdout 不使用
    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(log_filter(level)?)
        .init();

    let mut config = TrackerConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration")?;
    args.apply_overrides(&mut config);
    config.validate().context("Invalid configuration")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    // 读线程阻塞在 stdin 上，不等待它退出
    let (tx, rx) = crossbeam_channel::bounded(LINE_QUEUE);
    thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || forward_lines(io::stdin().lock(), &tx))
        .context("Failed to spawn stdin reader")?;

    let topic = config.broker.topic();
    let client_id = config.broker.bridge_client_id();
    info!(
        "Vision bridge starting: broker {}:{}, topic '{}', client '{}'",
        config.broker.host, config.broker.port, topic, client_id
    );

    let policy = config.dispatcher.retry_policy();
    let poll_interval = policy.poll_interval;
    let sink = MqttPublisher::new(config.broker.mqtt_options(client_id), topic);
    let mut bridge = ObservationBridge::new(sink, config.classifier.classifier_config(), policy);

    while !shutdown.load(Ordering::Relaxed) {
        bridge.maintain(Instant::now());

        let line = match rx.recv_timeout(poll_interval) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                info!("Input closed");
                break;
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_observation_line(&line) {
            Ok(observation) => {
                let outcome =
                    bridge.handle_observation(&observation, SystemTime::now(), Instant::now());
                trace!(?outcome, "Observation handled");
            },
            Err(e) => warn!("Skipping observation: {}", e),
        }
    }

    let stats = bridge.shutdown();
    debug!(?stats, "Final bridge stats");
    Ok(())
}

/// 逐行转发输入，直到输入结束、读错误或接收端关闭
fn forward_lines<R: BufRead>(reader: R, tx: &Sender<String>) {
    for line in reader.lines() {
        match line {
            Ok(line) => {
                if tx.send(line).is_err() {
                    break;
                }
            },
            Err(e) => {
                warn!("Failed to read input: {}", e);
                break;
            },
        }
    }
    debug!("Input reader finished");
}

fn log_filter(level: &str) -> Result<EnvFilter> {
    let mut filter = EnvFilter::from_default_env();
    for target in LOG_TARGETS {
        filter = filter.add_directive(format!("{}={}", target, level).parse()?);
    }
    Ok(filter)
}
