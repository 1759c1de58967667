//! 舵机执行器
//!
//! `ActuatorController` 独占当前角度。所有运动命令最终都经过 `set_angle`：
//! 钳位 → 存储 → 计算占空比 → 写入输出。
//!
//! 角度在写入输出之前就已更新，输出故障不会让内部状态与命令脱节。

use crate::config::ServoConfig;
use crate::error::ServoError;
use crate::output::PwmOutput;
use pantrack_protocol::Direction;
use tracing::{debug, trace};

/// 比例步长饱和时的偏移量（|offset| ≥ 0.4 时步长取 `step_max`）
pub const FULL_SCALE_OFFSET: f64 = 0.4;

/// 舵机执行器
#[derive(Debug)]
pub struct ActuatorController<O: PwmOutput> {
    config: ServoConfig,
    angle: i32,
    duty: u32,
    output: O,
}

impl<O: PwmOutput> ActuatorController<O> {
    /// 创建执行器（初始角度为中位，但不写输出，调用 `center()` 才真正驱动舵机）
    pub fn new(config: ServoConfig, output: O) -> Self {
        let angle = config.clamp_angle(config.neutral_angle);
        Self {
            duty: config.duty_for(angle),
            config,
            angle,
            output,
        }
    }

    /// 当前角度
    pub fn angle(&self) -> i32 {
        self.angle
    }

    /// 当前角度对应的占空比
    pub fn duty(&self) -> u32 {
        self.duty
    }

    pub fn config(&self) -> &ServoConfig {
        &self.config
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    /// 设置目标角度（超界钳位）
    pub fn set_angle(&mut self, angle: i32) -> Result<(), ServoError> {
        let clamped = self.config.clamp_angle(angle);
        if clamped != angle {
            trace!("Angle {} clamped to {}", angle, clamped);
        }
        self.angle = clamped;
        self.duty = self.config.duty_for(clamped);
        debug!(angle = self.angle, duty = self.duty, "Servo target");
        self.output.write_duty(self.duty)
    }

    /// 偏移量对应的比例步长
    ///
    /// `step = step_min + (step_max - step_min) * min(|offset| / 0.4, 1)`，截断取整。
    /// 非有限或负输入按 0 处理。
    pub fn proportional_step(&self, offset_abs: f64) -> i32 {
        let offset_abs = if offset_abs.is_finite() { offset_abs.max(0.0) } else { 0.0 };
        let t = (offset_abs / FULL_SCALE_OFFSET).min(1.0);
        let span = f64::from(self.config.step_max - self.config.step_min);
        self.config.step_min + (span * t) as i32
    }

    /// 按方向比例移动
    pub fn move_proportional(
        &mut self,
        direction: Direction,
        offset_abs: f64,
    ) -> Result<(), ServoError> {
        let step = self.proportional_step(offset_abs);
        let target = self.angle.saturating_add(direction.sign().saturating_mul(step));
        self.set_angle(target)
    }

    /// 回到中位
    pub fn center(&mut self) -> Result<(), ServoError> {
        self.set_angle(self.config.neutral_angle)
    }

    /// 释放舵机（零输出，保留存储角度）
    pub fn release(&mut self) -> Result<(), ServoError> {
        debug!(angle = self.angle, "Servo released");
        self.output.release()
    }
}
