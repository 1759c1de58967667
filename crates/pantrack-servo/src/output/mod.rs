//! PWM 输出抽象层
//!
//! 控制核心只计算占空比，真正的信号生成（固定频率）由外部硬件层负责。
//! 本模块定义两者之间的接口以及几个后端：
//!
//! - `LogOutput`: 只记录占空比（空跑 / 无硬件调试）
//! - `SysfsPwmOutput`: Linux `/sys/class/pwm` 后端（仅 Linux）
//! - `MockPwmOutput`: 记录所有写入（测试用，`mock` feature）

use crate::error::ServoError;
use tracing::debug;

#[cfg(target_os = "linux")]
mod sysfs;
#[cfg(target_os = "linux")]
pub use sysfs::SysfsPwmOutput;

#[cfg(any(test, feature = "mock"))]
mod mock;
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockPwmOutput, PwmWrite};

/// 占空比分辨率（每个 PWM 周期 1024 份，10 位）
pub const DUTY_RESOLUTION: u32 = 1024;

/// 占空比输出接口
pub trait PwmOutput {
    /// 输出占空比（0..DUTY_RESOLUTION）
    fn write_duty(&mut self, duty: u32) -> Result<(), ServoError>;

    /// 输出零/禁用信号（舵机失去保持力矩）
    fn release(&mut self) -> Result<(), ServoError>;
}

impl<T: PwmOutput + ?Sized> PwmOutput for Box<T> {
    fn write_duty(&mut self, duty: u32) -> Result<(), ServoError> {
        (**self).write_duty(duty)
    }

    fn release(&mut self) -> Result<(), ServoError> {
        (**self).release()
    }
}

/// 只记录日志的输出（无硬件）
#[derive(Debug, Default)]
pub struct LogOutput {
    last_duty: Option<u32>,
}

impl LogOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最后一次输出的占空比（释放后为 `None`）
    pub fn last_duty(&self) -> Option<u32> {
        self.last_duty
    }
}

impl PwmOutput for LogOutput {
    fn write_duty(&mut self, duty: u32) -> Result<(), ServoError> {
        debug!(duty, "PWM duty");
        self.last_duty = Some(duty);
        Ok(())
    }

    fn release(&mut self) -> Result<(), ServoError> {
        debug!("PWM released");
        self.last_duty = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_output() {
        let mut out = LogOutput::new();
        assert_eq!(out.last_duty(), None);
        out.write_duty(77).unwrap();
        assert_eq!(out.last_duty(), Some(77));
        out.release().unwrap();
        assert_eq!(out.last_duty(), None);
    }

    #[test]
    fn test_boxed_output() {
        let mock = MockPwmOutput::new();
        let mut boxed: Box<dyn PwmOutput> = Box::new(mock.clone());
        boxed.write_duty(40).unwrap();
        boxed.release().unwrap();
        assert_eq!(mock.writes(), vec![PwmWrite::Duty(40), PwmWrite::Release]);
    }
}
