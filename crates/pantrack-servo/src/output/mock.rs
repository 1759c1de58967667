//! Mock PWM 输出
//!
//! 克隆共享同一份记录，测试代码可以在把输出交给控制器之后继续检查写入。

use super::PwmOutput;
use crate::error::ServoError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// 一次输出操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmWrite {
    Duty(u32),
    Release,
}

/// 记录所有写入的 Mock 输出
#[derive(Debug, Clone, Default)]
pub struct MockPwmOutput {
    writes: Arc<Mutex<Vec<PwmWrite>>>,
    failing: Arc<AtomicBool>,
}

impl MockPwmOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// 所有写入（按顺序）
    pub fn writes(&self) -> Vec<PwmWrite> {
        self.writes.lock().unwrap().clone()
    }

    /// 最后一次写入的占空比
    pub fn last_duty(&self) -> Option<u32> {
        self.writes.lock().unwrap().iter().rev().find_map(|w| match w {
            PwmWrite::Duty(d) => Some(*d),
            PwmWrite::Release => None,
        })
    }

    /// 释放次数
    pub fn release_count(&self) -> usize {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .filter(|w| matches!(w, PwmWrite::Release))
            .count()
    }

    /// 清空记录
    pub fn clear(&self) {
        self.writes.lock().unwrap().clear();
    }

    /// 模拟后端故障（之后的写入都返回错误且不记录）
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn record(&self, write: PwmWrite) -> Result<(), ServoError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(ServoError::Backend("simulated output failure".to_string()));
        }
        self.writes.lock().unwrap().push(write);
        Ok(())
    }
}

impl PwmOutput for MockPwmOutput {
    fn write_duty(&mut self, duty: u32) -> Result<(), ServoError> {
        self.record(PwmWrite::Duty(duty))
    }

    fn release(&mut self) -> Result<(), ServoError> {
        self.record(PwmWrite::Release)
    }
}
