//! 舵机层错误类型定义

use thiserror::Error;

/// 舵机层错误类型
///
/// 角度命令永远不会失败（超界会被钳位），这里只有输出后端的错误。
#[derive(Error, Debug)]
pub enum ServoError {
    /// 输出后端 IO 错误（如 sysfs 写入失败）
    #[error("PWM output IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 输出后端配置错误
    #[error("PWM backend error: {0}")]
    Backend(String),
}
