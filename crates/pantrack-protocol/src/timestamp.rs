//! # 时间戳处理
//!
//! 线格式使用整数 Unix 纪元秒。

use std::time::{SystemTime, UNIX_EPOCH};

/// 将系统时间转换为 Unix 纪元秒
///
/// 早于纪元的时间（时钟异常）返回 0。
pub fn epoch_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
