//! 运动状态定义

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 运动状态
///
/// 线格式中使用大写下划线字符串（`"MOVE_LEFT"` 等）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementStatus {
    /// 人脸在画面中心左侧，云台应向左转
    MoveLeft,
    /// 人脸在画面中心右侧，云台应向右转
    MoveRight,
    /// 人脸位于死区内，保持当前角度
    Centered,
    /// 未检测到人脸（或锁定丢失），进入扫描
    NoFace,
}

impl MovementStatus {
    /// 线格式字符串
    pub fn as_str(self) -> &'static str {
        match self {
            MovementStatus::MoveLeft => "MOVE_LEFT",
            MovementStatus::MoveRight => "MOVE_RIGHT",
            MovementStatus::Centered => "CENTERED",
            MovementStatus::NoFace => "NO_FACE",
        }
    }

    /// 是否为需要直接控制舵机的状态（方向移动或居中保持）
    ///
    /// 这些状态都会停止扫描。
    pub fn is_commanded(self) -> bool {
        !matches!(self, MovementStatus::NoFace)
    }
}

impl fmt::Display for MovementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 未知状态字符串
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl FromStr for MovementStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MOVE_LEFT" => Ok(MovementStatus::MoveLeft),
            "MOVE_RIGHT" => Ok(MovementStatus::MoveRight),
            "CENTERED" => Ok(MovementStatus::Centered),
            "NO_FACE" => Ok(MovementStatus::NoFace),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}
