//! 扫描状态机
//!
//! 无目标时舵机在机械范围内往复扫描。状态只有两个：
//!
//! ```text
//! Inactive --start()--> Active
//! Active   --stop()---> Inactive
//! ```
//!
//! 方向在移动之前判定：接近上限时转向左、接近下限时转向右，
//! 因此无论之前的方向如何都不会越界。

use crate::actuator::ActuatorController;
use crate::config::ScanConfig;
use crate::error::ServoError;
use crate::output::PwmOutput;
use pantrack_protocol::Direction;
use std::time::Instant;
use tracing::{debug, trace};

/// 扫描模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanMode {
    #[default]
    Inactive,
    Active,
}

/// 扫描状态机
#[derive(Debug)]
pub struct ScanStateMachine {
    config: ScanConfig,
    mode: ScanMode,
    direction: Direction,
    last_tick: Option<Instant>,
}

impl ScanStateMachine {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            mode: ScanMode::Inactive,
            direction: Direction::Right,
            last_tick: None,
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn mode(&self) -> ScanMode {
        self.mode
    }

    pub fn is_active(&self) -> bool {
        self.mode == ScanMode::Active
    }

    /// 当前扫描方向
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// 开始扫描（已在扫描时无操作）
    ///
    /// 返回是否发生了状态转换。
    pub fn start_at(&mut self, now: Instant) -> bool {
        if self.is_active() {
            return false;
        }
        debug!("Scan started");
        self.mode = ScanMode::Active;
        self.last_tick = Some(now);
        true
    }

    pub fn start(&mut self) -> bool {
        self.start_at(Instant::now())
    }

    /// 停止扫描（幂等）
    pub fn stop(&mut self) {
        if self.is_active() {
            debug!("Scan stopped");
        }
        self.mode = ScanMode::Inactive;
    }

    /// 推进一步扫描
    ///
    /// 未激活或距上次步进不足 `interval` 时返回 `Ok(false)`。
    pub fn tick<O: PwmOutput>(
        &mut self,
        now: Instant,
        controller: &mut ActuatorController<O>,
    ) -> Result<bool, ServoError> {
        if !self.is_active() {
            return Ok(false);
        }
        if let Some(last) = self.last_tick
            && now.saturating_duration_since(last) < self.config.interval
        {
            return Ok(false);
        }

        let angle = controller.angle();
        let step = self.config.step;
        let servo = controller.config();
        if angle >= servo.angle_max - step {
            self.direction = Direction::Left;
        } else if angle <= servo.angle_min + step {
            self.direction = Direction::Right;
        }

        let target = angle + self.direction.sign() * step;
        trace!(angle, target, "Scan step");
        self.last_tick = Some(now);
        controller.set_angle(target)?;
        Ok(true)
    }
}
