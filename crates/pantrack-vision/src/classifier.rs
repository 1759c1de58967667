//! 运动分类器
//!
//! 把帧观测映射为离散的运动事件：
//!
//! 1. 搜索中或无包围框 → `NO_FACE`（置信度、偏移均为 0）
//! 2. 否则 `offset = (box_center_x - frame_width / 2) / frame_width`
//! 3. 阈值取决于**上一次已发出**的状态：上次为 `CENTERED` 时阈值为
//!    `dead_zone + hysteresis`，否则为 `dead_zone`（进入居中容易，离开居中需越过更宽的带）
//! 4. `|offset| <= threshold` → `CENTERED`，否则按符号 `MOVE_LEFT` / `MOVE_RIGHT`
//! 5. 防刷屏：状态未变化且距上次发出未满 `min_publish_interval` 时不发出
//!
//! # 状态更新
//!
//! `ClassifierState` 只在事件真正发出时更新。被抑制的计算结果不会改变滞回基准，
//! 滞回比较始终使用最后一次发出的状态。

use pantrack_protocol::{MovementEvent, MovementStatus, OFFSET_LIMIT, epoch_seconds};
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};

use crate::observation::FrameObservation;

/// 分类器配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierConfig {
    /// 死区（画面宽度比例，中心两侧各此值以内视为居中）
    pub dead_zone: f64,

    /// 滞回带（已居中时额外增加的宽度）
    pub hysteresis: f64,

    /// 状态未变化时的最小发布间隔（周期性刷新）
    pub min_publish_interval: Duration,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            dead_zone: 0.10,
            hysteresis: 0.05,
            min_publish_interval: Duration::from_millis(500),
        }
    }
}

/// 分类器状态（仅在发出事件时更新）
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClassifierState {
    /// 上一次发出的状态（会话开始时为 `None`）
    pub last_emitted_status: Option<MovementStatus>,

    /// 上一次发出的时间
    pub last_emit_time: Option<SystemTime>,
}

/// 单帧分类结果（未经防刷屏过滤）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub status: MovementStatus,
    pub confidence: f64,
    pub offset: f64,
}

/// 运动分类器
///
/// 一个实例对应一个跟踪会话，独占自己的 [`ClassifierState`]。
#[derive(Debug, Clone)]
pub struct MovementClassifier {
    config: ClassifierConfig,
    state: ClassifierState,
}

impl MovementClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self {
            config,
            state: ClassifierState::default(),
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn state(&self) -> &ClassifierState {
        &self.state
    }

    /// 当前使用的居中阈值
    pub fn threshold(&self) -> f64 {
        if self.state.last_emitted_status == Some(MovementStatus::Centered) {
            self.config.dead_zone + self.config.hysteresis
        } else {
            self.config.dead_zone
        }
    }

    /// 仅分类，不经过防刷屏，也不修改状态
    pub fn classify(&self, observation: &FrameObservation) -> Classification {
        let face_box = match observation.bounding_box {
            Some(b) if observation.has_face() && observation.frame_width > 0 => b,
            _ => {
                return Classification {
                    status: MovementStatus::NoFace,
                    confidence: 0.0,
                    offset: 0.0,
                };
            },
        };

        let width = f64::from(observation.frame_width);
        let offset = ((face_box.center_x() - width / 2.0) / width).clamp(-OFFSET_LIMIT, OFFSET_LIMIT);

        let status = if offset.abs() <= self.threshold() {
            MovementStatus::Centered
        } else if offset < 0.0 {
            MovementStatus::MoveLeft
        } else {
            MovementStatus::MoveRight
        };

        Classification {
            status,
            confidence: observation.confidence,
            offset,
        }
    }

    /// 使用当前系统时间计算
    pub fn compute(&mut self, observation: &FrameObservation) -> Option<MovementEvent> {
        self.compute_at(observation, SystemTime::now())
    }

    /// 计算一帧，返回需要发布的事件（被抑制时返回 `None`）
    pub fn compute_at(
        &mut self,
        observation: &FrameObservation,
        now: SystemTime,
    ) -> Option<MovementEvent> {
        let classification = self.classify(observation);

        let changed = self.state.last_emitted_status != Some(classification.status);
        let interval_elapsed = match self.state.last_emit_time {
            None => true,
            // 时钟回拨时视为未到间隔
            Some(last) => now
                .duration_since(last)
                .map(|elapsed| elapsed >= self.config.min_publish_interval)
                .unwrap_or(false),
        };

        if !changed && !interval_elapsed {
            trace!(status = %classification.status, "Suppressed unchanged movement");
            return None;
        }

        if changed {
            debug!(
                from = ?self.state.last_emitted_status,
                to = %classification.status,
                offset = classification.offset,
                "Movement status changed"
            );
        }

        self.state.last_emitted_status = Some(classification.status);
        self.state.last_emit_time = Some(now);

        Some(MovementEvent::new(
            classification.status,
            round_to(classification.confidence, 3),
            round_to(classification.offset, 4),
            epoch_seconds(now),
        ))
    }
}

impl Default for MovementClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::BoundingBox;
    use std::time::UNIX_EPOCH;

    const WIDTH: u32 = 1000;

    /// 构造中心位于 `center_x` 的观测
    fn face_at(center_x: f64, width: u32) -> FrameObservation {
        FrameObservation::tracking(
            BoundingBox::new(center_x - 20.0, 100.0, center_x + 20.0, 160.0),
            0.9,
            width,
        )
    }

    fn t(ms: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(1_730_000_000_000 + ms)
    }

    fn classifier() -> MovementClassifier {
        MovementClassifier::new(ClassifierConfig {
            dead_zone: 0.1,
            hysteresis: 0.05,
            min_publish_interval: Duration::from_millis(500),
        })
    }

    #[test]
    fn test_searching_is_no_face() {
        let mut c = classifier();
        let mut obs = face_at(100.0, WIDTH);
        obs.lock_state = crate::observation::LockState::Searching;

        let event = c.compute_at(&obs, t(0)).unwrap();
        assert_eq!(event.status(), MovementStatus::NoFace);
        assert_eq!(event.confidence(), 0.0);
        assert_eq!(event.offset(), 0.0);
    }

    #[test]
    fn test_missing_box_is_no_face() {
        let mut c = classifier();
        let obs = FrameObservation {
            lock_state: crate::observation::LockState::Tracking,
            bounding_box: None,
            confidence: 0.8,
            frame_width: WIDTH,
        };
        let event = c.compute_at(&obs, t(0)).unwrap();
        assert_eq!(event.status(), MovementStatus::NoFace);
        assert_eq!(event.confidence(), 0.0);
    }

    #[test]
    fn test_scenario_move_left_640() {
        // frame_width=640，框中心 x=224（画面中心 320）→ offset=-0.15
        let mut c = classifier();
        let obs = FrameObservation::tracking(BoundingBox::new(200.0, 50.0, 248.0, 110.0), 0.87, 640);
        let event = c.compute_at(&obs, t(0)).unwrap();
        assert_eq!(event.status(), MovementStatus::MoveLeft);
        assert_eq!(event.offset(), -0.15);
        assert_eq!(event.confidence(), 0.87);
    }

    #[test]
    fn test_dead_zone_without_hysteresis() {
        let c = classifier();
        // 未发出过 CENTERED 时阈值为 dead_zone
        assert_eq!(c.classify(&face_at(600.0, WIDTH)).status, MovementStatus::Centered);
        assert_eq!(c.classify(&face_at(620.0, WIDTH)).status, MovementStatus::MoveRight);
        assert_eq!(c.classify(&face_at(380.0, WIDTH)).status, MovementStatus::MoveLeft);
    }

    #[test]
    fn test_hysteresis_boundary() {
        let mut c = classifier();
        c.compute_at(&face_at(500.0, WIDTH), t(0)).unwrap();
        assert_eq!(c.state().last_emitted_status, Some(MovementStatus::Centered));

        // dead_zone + hysteresis - ε → 仍居中
        assert_eq!(c.classify(&face_at(649.0, WIDTH)).status, MovementStatus::Centered);
        assert_eq!(c.classify(&face_at(351.0, WIDTH)).status, MovementStatus::Centered);

        // dead_zone + hysteresis + ε → 移动
        assert_eq!(c.classify(&face_at(651.0, WIDTH)).status, MovementStatus::MoveRight);
        assert_eq!(c.classify(&face_at(349.0, WIDTH)).status, MovementStatus::MoveLeft);
    }

    #[test]
    fn test_centered_within_dead_zone_stays_centered() {
        let mut c = classifier();
        assert!(c.compute_at(&face_at(500.0, WIDTH), t(0)).is_some());

        for (i, x) in [450.0, 520.0, 599.0, 401.0].into_iter().enumerate() {
            let obs = face_at(x, WIDTH);
            assert_eq!(c.classify(&obs).status, MovementStatus::Centered);
            // 间隔内不变化 → 抑制
            assert!(c.compute_at(&obs, t(10 * (i as u64 + 1))).is_none());
        }
    }

    #[test]
    fn test_flood_suppression() {
        let mut c = classifier();
        let obs = face_at(800.0, WIDTH);

        let first = c.compute_at(&obs, t(0));
        let second = c.compute_at(&obs, t(100));
        assert!(first.is_some());
        assert!(second.is_none());

        // 间隔到达后，即使状态不变也再次发出
        let third = c.compute_at(&obs, t(600));
        assert_eq!(third.map(|e| e.status()), Some(MovementStatus::MoveRight));
    }

    #[test]
    fn test_change_bypasses_interval() {
        let mut c = classifier();
        assert!(c.compute_at(&face_at(800.0, WIDTH), t(0)).is_some());
        let event = c.compute_at(&face_at(200.0, WIDTH), t(10)).unwrap();
        assert_eq!(event.status(), MovementStatus::MoveLeft);
    }

    #[test]
    fn test_state_updates_only_on_emit() {
        let mut c = classifier();
        // 发出 CENTERED
        c.compute_at(&face_at(500.0, WIDTH), t(0)).unwrap();

        // offset=0.12：在滞回带内，仍判为 CENTERED，被抑制
        assert!(c.compute_at(&face_at(620.0, WIDTH), t(50)).is_none());
        assert_eq!(c.state().last_emitted_status, Some(MovementStatus::Centered));
        assert_eq!(c.state().last_emit_time, Some(t(0)));
        assert!((c.threshold() - 0.15).abs() < 1e-12);

        // 越过滞回带 → 发出 MOVE_RIGHT，基准随之更新
        let event = c.compute_at(&face_at(700.0, WIDTH), t(80)).unwrap();
        assert_eq!(event.status(), MovementStatus::MoveRight);
        assert_eq!(c.state().last_emit_time, Some(t(80)));
        assert!((c.threshold() - 0.1).abs() < 1e-12);

        // offset=0.12 在非居中状态下判为 MOVE_RIGHT（不再享有滞回）
        assert_eq!(c.classify(&face_at(620.0, WIDTH)).status, MovementStatus::MoveRight);
    }

    #[test]
    fn test_clock_going_backwards_suppresses() {
        let mut c = classifier();
        let obs = face_at(800.0, WIDTH);
        c.compute_at(&obs, t(1000)).unwrap();
        assert!(c.compute_at(&obs, t(0)).is_none());
    }

    #[test]
    fn test_offset_clamped_and_rounded() {
        let mut c = classifier();
        // 包围框中心超出画面
        let obs = face_at(2000.0, WIDTH);
        let event = c.compute_at(&obs, t(0)).unwrap();
        assert_eq!(event.offset(), 0.5);

        let mut c = classifier();
        let obs = FrameObservation::tracking(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 0.123456, 3);
        let event = c.compute_at(&obs, t(0)).unwrap();
        assert_eq!(event.confidence(), 0.123);
        assert_eq!(event.offset(), -0.3333);
    }

    #[test]
    fn test_timestamp_epoch_seconds() {
        let mut c = classifier();
        let event = c.compute_at(&FrameObservation::searching(WIDTH), t(1500)).unwrap();
        assert_eq!(event.timestamp(), 1_730_000_001);
    }
}
