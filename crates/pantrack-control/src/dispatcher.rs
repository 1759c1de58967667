//! 控制端消息分派循环
//!
//! 单线程顺序执行，每轮：
//!
//! 1. 未连接：尝试连接并订阅；失败则等待 `connect_retry`
//! 2. 已连接：非阻塞取一条消息并处理 → 扫描步进 → 休眠 `poll_interval`；
//!    传输错误则断开并等待 `reconnect_delay`
//!
//! 收到停止信号后依次：停止扫描 → 释放舵机 → 断开连接。
//! 断开失败只记录日志，停止流程总能完成。

use crate::link::{LinkEvent, LinkState, RetryPolicy, deadline_after};
use crate::rig::{Motion, TrackingRig};
use pantrack_mqtt::{MessageSource, TransportError};
use pantrack_protocol::decode_event;
use pantrack_servo::PwmOutput;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 一条消息的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    /// 比例移动（携带新角度）
    Moved { angle: i32 },
    /// 居中：停止扫描并保持角度
    Held { angle: i32 },
    /// 无人脸：进入扫描
    ScanStarted,
    /// 负载格式错误，已丢弃
    Malformed,
    /// 未知状态，已忽略
    UnknownStatus,
}

impl From<Motion> for Handled {
    fn from(motion: Motion) -> Self {
        match motion {
            Motion::Moved { angle } => Handled::Moved { angle },
            Motion::Held { angle } => Handled::Held { angle },
            Motion::ScanStarted => Handled::ScanStarted,
        }
    }
}

/// 单轮循环的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    /// 本轮结束后的连接状态
    pub link: LinkState,
    /// 本轮处理的消息（如有）
    pub handled: Option<Handled>,
    /// 本轮是否执行了扫描步进
    pub scan_ticked: bool,
    /// 下一轮之前应等待的时间
    pub delay: Duration,
}

/// 运行统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub messages: u64,
    pub moves: u64,
    pub malformed: u64,
    pub unknown_status: u64,
    pub connects: u64,
    pub connect_failures: u64,
    pub reconnects: u64,
    pub output_errors: u64,
}

/// 停止流程的结果
#[derive(Debug)]
pub struct ShutdownReport {
    /// 舵机释放是否成功
    pub released: bool,
    /// 断开连接的错误（尽力而为，不向上传播）
    pub disconnect_error: Option<TransportError>,
    pub stats: DispatchStats,
}

/// 消息分派器
pub struct Dispatcher<S: MessageSource, O: PwmOutput> {
    source: S,
    rig: TrackingRig<O>,
    link: LinkState,
    policy: RetryPolicy,
    stats: DispatchStats,
}

impl<S: MessageSource, O: PwmOutput> Dispatcher<S, O> {
    pub fn new(source: S, rig: TrackingRig<O>, policy: RetryPolicy) -> Self {
        Self {
            source,
            rig,
            link: LinkState::Disconnected,
            policy,
            stats: DispatchStats::default(),
        }
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn rig(&self) -> &TrackingRig<O> {
        &self.rig
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// 启动时舵机回中
    pub fn start(&mut self) {
        match self.rig.center() {
            Ok(()) => info!("Servo centered at {}°", self.rig.angle()),
            Err(e) => {
                self.stats.output_errors += 1;
                warn!("Failed to center servo: {}", e);
            },
        }
    }

    /// 执行一轮循环（不休眠）
    pub fn step(&mut self, now: Instant) -> StepOutcome {
        match self.link {
            LinkState::Disconnected => self.try_connect(),
            LinkState::Connected => self.service(now),
        }
    }

    fn try_connect(&mut self) -> StepOutcome {
        let (event, result) = match self.source.connect() {
            Ok(()) => (LinkEvent::ConnectSucceeded, Ok(())),
            Err(e) => (LinkEvent::ConnectFailed, Err(e)),
        };
        let transition = self.link.on(event, &self.policy);
        self.link = transition.next;

        match result {
            Ok(()) => {
                self.stats.connects += 1;
                info!("Transport connected");
            },
            Err(e) => {
                self.stats.connect_failures += 1;
                if e.is_transient() {
                    warn!("Connect failed: {}; retrying in {:?}", e, transition.delay);
                } else {
                    error!("Connect failed: {}; retrying in {:?}", e, transition.delay);
                }
            },
        }

        StepOutcome {
            link: self.link,
            handled: None,
            scan_ticked: false,
            delay: transition.delay,
        }
    }

    fn service(&mut self, now: Instant) -> StepOutcome {
        let handled = match self.source.poll() {
            Ok(Some(payload)) => Some(self.handle_payload_at(&payload, now)),
            Ok(None) => None,
            Err(e) => {
                let transition = self.link.on(LinkEvent::TransportFailed, &self.policy);
                self.link = transition.next;
                self.stats.reconnects += 1;
                warn!("Transport error: {}; reconnecting in {:?}", e, transition.delay);
                return StepOutcome {
                    link: self.link,
                    handled: None,
                    scan_ticked: false,
                    delay: transition.delay,
                };
            },
        };

        // 消息先于扫描步进处理：命令运动总会先停止扫描
        let scan_ticked = match self.rig.tick(now) {
            Ok(ticked) => ticked,
            Err(e) => {
                self.stats.output_errors += 1;
                warn!("Scan output failed: {}", e);
                true
            },
        };

        StepOutcome {
            link: self.link,
            handled,
            scan_ticked,
            delay: self.policy.poll_interval,
        }
    }

    /// 处理一条原始消息负载
    pub fn handle_payload(&mut self, payload: &[u8]) -> Handled {
        self.handle_payload_at(payload, Instant::now())
    }

    pub fn handle_payload_at(&mut self, payload: &[u8], now: Instant) -> Handled {
        self.stats.messages += 1;

        let event = match decode_event(payload) {
            Ok(event) => event,
            Err(e) if e.is_unknown_status() => {
                self.stats.unknown_status += 1;
                warn!("Ignoring message: {}", e);
                return Handled::UnknownStatus;
            },
            Err(e) => {
                self.stats.malformed += 1;
                warn!("Discarding malformed payload: {}", e);
                return Handled::Malformed;
            },
        };

        debug!(
            status = %event.status(),
            offset = event.offset(),
            confidence = event.confidence(),
            "Movement event"
        );

        let handled = match self.rig.apply(&event, now) {
            Ok(motion) => Handled::from(motion),
            Err(e) => {
                // 角度已更新，只是输出失败
                self.stats.output_errors += 1;
                warn!("Servo output failed: {}", e);
                Handled::Moved {
                    angle: self.rig.angle(),
                }
            },
        };
        if matches!(handled, Handled::Moved { .. }) {
            self.stats.moves += 1;
        }
        handled
    }

    /// 运行直到 `shutdown` 被置位，然后执行停止流程
    pub fn run(&mut self, shutdown: &AtomicBool) -> ShutdownReport {
        self.start();
        while !shutdown.load(Ordering::Relaxed) {
            let outcome = self.step(Instant::now());
            sleep_unless(shutdown, outcome.delay, self.policy.poll_interval);
        }
        self.shutdown()
    }

    /// 停止扫描 → 释放舵机 → 断开连接
    pub fn shutdown(&mut self) -> ShutdownReport {
        info!("Shutting down dispatcher");

        self.rig.stop_scan();

        let released = match self.rig.release() {
            Ok(()) => {
                info!("Servo released");
                true
            },
            Err(e) => {
                warn!("Failed to release servo: {}", e);
                false
            },
        };

        let disconnect_error = match self.source.disconnect() {
            Ok(()) => {
                info!("Transport disconnected");
                None
            },
            Err(e) => {
                warn!("Disconnect failed (ignored): {}", e);
                Some(e)
            },
        };
        self.link = LinkState::Disconnected;

        let stats = self.stats;
        info!(
            messages = stats.messages,
            moves = stats.moves,
            malformed = stats.malformed,
            unknown_status = stats.unknown_status,
            reconnects = stats.reconnects,
            "Dispatcher stopped"
        );

        ShutdownReport {
            released,
            disconnect_error,
            stats,
        }
    }
}

/// 分片休眠，每片检查停止标志
pub(crate) fn sleep_unless(shutdown: &AtomicBool, total: Duration, slice: Duration) {
    let slice = slice.max(Duration::from_millis(1));
    let deadline = deadline_after(Instant::now(), total);
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::sleep((deadline - now).min(slice));
    }
}
