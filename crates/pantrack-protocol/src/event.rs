//! 运动事件

use crate::status::MovementStatus;
use serde::Serialize;

/// 偏移量的绝对值上限（画面宽度的一半）
pub const OFFSET_LIMIT: f64 = 0.5;

/// 水平转动方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// 向左（角度减小）
    Left,
    /// 向右（角度增大）
    Right,
}

impl Direction {
    /// 角度变化符号：Left = -1，Right = +1
    pub fn sign(self) -> i32 {
        match self {
            Direction::Left => -1,
            Direction::Right => 1,
        }
    }
}

/// 运动事件
///
/// 由识别端的分类器创建，序列化后经消息代理传给控制端。创建后不可变。
///
/// # 不变量
///
/// - `confidence` ∈ [0, 1]
/// - `offset` ∈ [-0.5, 0.5]
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MovementEvent {
    status: MovementStatus,
    confidence: f64,
    offset: f64,
    timestamp: u64,
}

impl MovementEvent {
    /// 创建事件，超出范围的置信度和偏移量会被钳位
    ///
    /// 非有限值（NaN/Inf）按 0 处理。
    pub fn new(status: MovementStatus, confidence: f64, offset: f64, timestamp: u64) -> Self {
        Self {
            status,
            confidence: finite_or_zero(confidence).clamp(0.0, 1.0),
            offset: finite_or_zero(offset).clamp(-OFFSET_LIMIT, OFFSET_LIMIT),
            timestamp,
        }
    }

    /// 无人脸事件（置信度与偏移量均为 0）
    pub fn no_face(timestamp: u64) -> Self {
        Self::new(MovementStatus::NoFace, 0.0, 0.0, timestamp)
    }

    pub fn status(&self) -> MovementStatus {
        self.status
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// 人脸中心相对画面中心的水平偏移（画面宽度的比例，负值在左）
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Unix 纪元秒
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// 方向移动事件对应的转动方向，其余状态返回 `None`
    pub fn direction(&self) -> Option<Direction> {
        match self.status {
            MovementStatus::MoveLeft => Some(Direction::Left),
            MovementStatus::MoveRight => Some(Direction::Right),
            MovementStatus::Centered | MovementStatus::NoFace => None,
        }
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}
