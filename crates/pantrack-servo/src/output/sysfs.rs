//! Linux sysfs PWM 后端
//!
//! 通过 `/sys/class/pwm/pwmchipN/pwmM` 驱动舵机：
//!
//! 1. 通道目录不存在时向 `export` 写入通道号
//! 2. 写入 `period`（纳秒，由频率换算）并 `enable`
//! 3. 占空比（0..1024 份）换算为纳秒写入 `duty_cycle`
//!
//! 释放时占空比清零并关闭通道。

use super::{DUTY_RESOLUTION, PwmOutput};
use crate::error::ServoError;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// sysfs PWM 根目录
pub const SYSFS_PWM_ROOT: &str = "/sys/class/pwm";

/// 导出后等待通道目录出现的重试次数（udev 异步创建）
const EXPORT_POLL_ATTEMPTS: u32 = 20;
const EXPORT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// sysfs PWM 输出
#[derive(Debug)]
pub struct SysfsPwmOutput {
    channel_dir: PathBuf,
    period_ns: u64,
    enabled: bool,
}

impl SysfsPwmOutput {
    /// 打开 `/sys/class/pwm/pwmchip{chip}/pwm{channel}`
    pub fn open(chip: u32, channel: u32, frequency_hz: u32) -> Result<Self, ServoError> {
        Self::open_at(SYSFS_PWM_ROOT, chip, channel, frequency_hz)
    }

    /// 在指定根目录下打开通道（测试时指向临时目录）
    pub fn open_at(
        root: impl AsRef<Path>,
        chip: u32,
        channel: u32,
        frequency_hz: u32,
    ) -> Result<Self, ServoError> {
        if frequency_hz == 0 {
            return Err(ServoError::Backend("PWM frequency must be positive".to_string()));
        }

        let chip_dir = root.as_ref().join(format!("pwmchip{}", chip));
        if !chip_dir.is_dir() {
            return Err(ServoError::Backend(format!(
                "PWM chip not found: {}",
                chip_dir.display()
            )));
        }

        let channel_dir = chip_dir.join(format!("pwm{}", channel));
        if !channel_dir.is_dir() {
            debug!("Exporting PWM channel {} on {}", channel, chip_dir.display());
            fs::write(chip_dir.join("export"), channel.to_string())?;
            wait_for_dir(&channel_dir)?;
        }

        let period_ns = 1_000_000_000u64 / u64::from(frequency_hz);

        // duty_cycle 不能大于 period，先清零再设置周期
        fs::write(channel_dir.join("duty_cycle"), "0")?;
        fs::write(channel_dir.join("period"), period_ns.to_string())?;
        fs::write(channel_dir.join("enable"), "1")?;

        info!(
            "PWM channel ready: {} (period {} ns)",
            channel_dir.display(),
            period_ns
        );

        Ok(Self {
            channel_dir,
            period_ns,
            enabled: true,
        })
    }

    /// PWM 周期（纳秒）
    pub fn period_ns(&self) -> u64 {
        self.period_ns
    }

    /// 占空比份数换算为纳秒（不超过周期）
    pub fn duty_to_ns(&self, duty: u32) -> u64 {
        (u64::from(duty) * self.period_ns / u64::from(DUTY_RESOLUTION)).min(self.period_ns)
    }
}

impl PwmOutput for SysfsPwmOutput {
    fn write_duty(&mut self, duty: u32) -> Result<(), ServoError> {
        let duty_ns = self.duty_to_ns(duty);
        fs::write(self.channel_dir.join("duty_cycle"), duty_ns.to_string())?;
        if !self.enabled {
            fs::write(self.channel_dir.join("enable"), "1")?;
            self.enabled = true;
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), ServoError> {
        fs::write(self.channel_dir.join("duty_cycle"), "0")?;
        fs::write(self.channel_dir.join("enable"), "0")?;
        self.enabled = false;
        Ok(())
    }
}

fn wait_for_dir(dir: &Path) -> Result<(), ServoError> {
    for _ in 0..EXPORT_POLL_ATTEMPTS {
        if dir.is_dir() {
            return Ok(());
        }
        thread::sleep(EXPORT_POLL_INTERVAL);
    }
    Err(ServoError::Backend(format!(
        "PWM channel did not appear after export: {}",
        dir.display()
    )))
}
