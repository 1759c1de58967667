//! 舵机与扫描配置

use std::time::Duration;

/// 舵机配置
///
/// 默认值对应 SG90 类 180° 舵机（50Hz，10 位占空比 40..115）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoConfig {
    /// 机械下限（度）
    pub angle_min: i32,

    /// 机械上限（度）
    pub angle_max: i32,

    /// 中位角（度）
    pub neutral_angle: i32,

    /// 最小偏移对应的比例步长（度）
    pub step_min: i32,

    /// 偏移饱和时的比例步长（度）
    pub step_max: i32,

    /// `angle_min` 对应的占空比
    pub duty_min: u32,

    /// `angle_max` 对应的占空比
    pub duty_max: u32,

    /// PWM 频率（Hz），由硬件层使用
    pub frequency_hz: u32,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            angle_min: 0,
            angle_max: 180,
            neutral_angle: 90,
            step_min: 1,
            step_max: 8,
            duty_min: 40,  // 0.5ms 脉宽
            duty_max: 115, // 2.5ms 脉宽
            frequency_hz: 50,
        }
    }
}

impl ServoConfig {
    /// 钳位到机械范围
    pub fn clamp_angle(&self, angle: i32) -> i32 {
        angle.clamp(self.angle_min, self.angle_max)
    }

    /// 角度到占空比的线性映射（截断取整）
    ///
    /// 输入先钳位到机械范围。
    pub fn duty_for(&self, angle: i32) -> u32 {
        let angle = self.clamp_angle(angle);
        let span = i64::from(self.angle_max) - i64::from(self.angle_min);
        if span <= 0 {
            return self.duty_min;
        }
        let duty_span = i64::from(self.duty_max) - i64::from(self.duty_min);
        let duty = f64::from(self.duty_min)
            + duty_span as f64 * (i64::from(angle) - i64::from(self.angle_min)) as f64 / span as f64;
        duty as u32
    }

    /// 检查配置一致性
    pub fn validate(&self) -> Result<(), String> {
        if self.angle_min >= self.angle_max {
            return Err(format!(
                "angle_min ({}) must be below angle_max ({})",
                self.angle_min, self.angle_max
            ));
        }
        if !(self.angle_min..=self.angle_max).contains(&self.neutral_angle) {
            return Err(format!(
                "neutral_angle ({}) outside [{}, {}]",
                self.neutral_angle, self.angle_min, self.angle_max
            ));
        }
        if self.step_min < 0 || self.step_min > self.step_max {
            return Err(format!(
                "step range invalid: step_min={} step_max={}",
                self.step_min, self.step_max
            ));
        }
        if self.frequency_hz == 0 {
            return Err("frequency_hz must be positive".to_string());
        }
        Ok(())
    }
}

/// 扫描配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    /// 每次扫描步进（度）
    pub step: i32,

    /// 扫描步进间隔
    pub interval: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            step: 2,
            interval: Duration::from_millis(100),
        }
    }
}

impl ScanConfig {
    pub fn validate(&self, servo: &ServoConfig) -> Result<(), String> {
        if self.step <= 0 {
            return Err(format!("scan step must be positive, got {}", self.step));
        }
        if 2 * self.step > servo.angle_max - servo.angle_min {
            return Err(format!(
                "scan step {} too large for range [{}, {}]",
                self.step, servo.angle_min, servo.angle_max
            ));
        }
        Ok(())
    }
}
