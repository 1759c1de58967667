//! 识别端发布桥
//!
//! 把人脸锁定子系统的逐帧观测送入 `MovementClassifier`，
//! 并把产生的事件编码后发布出去。
//!
//! 连接维护不阻塞：断链后按 `RetryPolicy` 计算下一次尝试的时间点，
//! 期间产生的事件直接丢弃。

use crate::link::{LinkEvent, LinkState, RetryPolicy, deadline_after};
use pantrack_mqtt::{MessageSink, TransportError};
use pantrack_protocol::{MovementEvent, encode_event};
use pantrack_vision::{ClassifierConfig, FrameObservation, MovementClassifier, ObservationError};
use std::time::{Instant, SystemTime};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// 观测行解析错误
#[derive(Error, Debug)]
pub enum LineError {
    #[error("Invalid observation JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid observation: {0}")]
    Invalid(#[from] ObservationError),
}

/// 解析一行 JSON 观测并校验
pub fn parse_observation_line(line: &str) -> Result<FrameObservation, LineError> {
    let observation: FrameObservation = serde_json::from_str(line)?;
    observation.validate()?;
    Ok(observation)
}

/// 一帧观测的处理结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BridgeOutcome {
    /// 事件已发布
    Published(MovementEvent),
    /// 被防刷屏逻辑抑制
    Suppressed,
    /// 事件产生时未连接，已丢弃
    Dropped(MovementEvent),
    /// 发布失败，连接已断开
    Failed(MovementEvent),
}

/// 发布统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub observations: u64,
    pub published: u64,
    pub suppressed: u64,
    pub dropped: u64,
    pub reconnects: u64,
}

/// 观测 → 事件发布桥
pub struct ObservationBridge<S: MessageSink> {
    sink: S,
    classifier: MovementClassifier,
    link: LinkState,
    policy: RetryPolicy,
    next_attempt: Option<Instant>,
    stats: BridgeStats,
}

impl<S: MessageSink> ObservationBridge<S> {
    pub fn new(sink: S, classifier: ClassifierConfig, policy: RetryPolicy) -> Self {
        Self {
            sink,
            classifier: MovementClassifier::new(classifier),
            link: LinkState::Disconnected,
            policy,
            next_attempt: None,
            stats: BridgeStats::default(),
        }
    }

    pub fn link(&self) -> LinkState {
        self.link
    }

    pub fn classifier(&self) -> &MovementClassifier {
        &self.classifier
    }

    pub fn stats(&self) -> &BridgeStats {
        &self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// 维护连接：到期时重连，已连接时处理保活
    pub fn maintain(&mut self, now: Instant) {
        match self.link {
            LinkState::Disconnected => {
                if self.next_attempt.is_some_and(|at| now < at) {
                    return;
                }
                match self.sink.connect() {
                    Ok(()) => {
                        self.apply(LinkEvent::ConnectSucceeded, now);
                        info!("Publisher connected");
                    },
                    Err(e) => {
                        let delay = self.apply(LinkEvent::ConnectFailed, now);
                        log_connect_failure(&e, delay);
                    },
                }
            },
            LinkState::Connected => {
                if let Err(e) = self.sink.service() {
                    self.transport_failed(&e, now);
                }
            },
        }
    }

    /// 处理一帧观测
    pub fn handle_observation(
        &mut self,
        observation: &FrameObservation,
        wall_clock: SystemTime,
        now: Instant,
    ) -> BridgeOutcome {
        self.stats.observations += 1;

        let Some(event) = self.classifier.compute_at(observation, wall_clock) else {
            self.stats.suppressed += 1;
            return BridgeOutcome::Suppressed;
        };

        if !self.link.is_connected() {
            self.stats.dropped += 1;
            debug!(status = %event.status(), "Dropping event while disconnected");
            return BridgeOutcome::Dropped(event);
        }

        let payload = match encode_event(&event) {
            Ok(payload) => payload,
            Err(e) => {
                // MovementEvent 的字段都是有限值，正常情况下不会发生
                error!("Failed to encode event: {}", e);
                self.stats.dropped += 1;
                return BridgeOutcome::Dropped(event);
            },
        };

        match self.sink.publish(&payload) {
            Ok(()) => {
                self.stats.published += 1;
                debug!(
                    status = %event.status(),
                    offset = event.offset(),
                    confidence = event.confidence(),
                    "Published movement event"
                );
                BridgeOutcome::Published(event)
            },
            Err(e) => {
                self.transport_failed(&e, now);
                BridgeOutcome::Failed(event)
            },
        }
    }

    /// 断开连接（尽力而为）
    pub fn shutdown(&mut self) -> BridgeStats {
        if let Err(e) = self.sink.disconnect() {
            warn!("Disconnect failed (ignored): {}", e);
        }
        self.link = LinkState::Disconnected;
        let stats = self.stats;
        info!(
            observations = stats.observations,
            published = stats.published,
            suppressed = stats.suppressed,
            dropped = stats.dropped,
            "Bridge stopped"
        );
        stats
    }

    fn transport_failed(&mut self, err: &TransportError, now: Instant) {
        let delay = self.apply(LinkEvent::TransportFailed, now);
        self.stats.reconnects += 1;
        warn!("Transport error: {}; reconnecting in {:?}", err, delay);
    }

    fn apply(&mut self, event: LinkEvent, now: Instant) -> std::time::Duration {
        let transition = self.link.on(event, &self.policy);
        self.link = transition.next;
        self.next_attempt = Some(deadline_after(now, transition.delay));
        transition.delay
    }
}

fn log_connect_failure(err: &TransportError, delay: std::time::Duration) {
    if err.is_transient() {
        warn!("Connect failed: {}; retrying in {:?}", err, delay);
    } else {
        error!("Connect failed: {}; retrying in {:?}", err, delay);
    }
}
