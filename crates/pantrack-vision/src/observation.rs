//! 帧观测数据
//!
//! 每帧一条，由外部人脸锁定子系统产生，只被分类器消费一次。
//!
//! JSON 形式（视觉桥接程序从标准输入逐行读取）：
//!
//! ```text
//! {"state": "tracking", "face_box": [200, 120, 248, 180],
//!  "lock_confidence": 0.91, "frame_width": 640}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 锁定状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockState {
    /// 尚未锁定人脸
    Searching,
    /// 已锁定并跟踪
    Tracking,
}

/// 人脸包围框（像素坐标，左上角 x1/y1，右下角 x2/y2）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// 水平中心
    pub fn center_x(&self) -> f64 {
        (self.x1 + self.x2) / 2.0
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f64; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// 观测数据校验错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ObservationError {
    #[error("Frame width must be positive")]
    ZeroFrameWidth,

    #[error("Confidence out of range: {0}")]
    ConfidenceOutOfRange(f64),

    #[error("Bounding box has non-finite coordinates")]
    NonFiniteBox,
}

/// 单帧观测
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameObservation {
    /// 锁定状态
    #[serde(alias = "state")]
    pub lock_state: LockState,

    /// 人脸包围框（未检测到时为 `None`）
    #[serde(default, alias = "face_box")]
    pub bounding_box: Option<BoundingBox>,

    /// 锁定置信度 [0, 1]
    #[serde(default, alias = "lock_confidence")]
    pub confidence: f64,

    /// 画面宽度（像素，> 0）
    pub frame_width: u32,
}

impl FrameObservation {
    /// 已锁定人脸的观测
    pub fn tracking(bounding_box: BoundingBox, confidence: f64, frame_width: u32) -> Self {
        Self {
            lock_state: LockState::Tracking,
            bounding_box: Some(bounding_box),
            confidence,
            frame_width,
        }
    }

    /// 搜索中（无人脸）的观测
    pub fn searching(frame_width: u32) -> Self {
        Self {
            lock_state: LockState::Searching,
            bounding_box: None,
            confidence: 0.0,
            frame_width,
        }
    }

    /// 校验数据模型约束
    pub fn validate(&self) -> Result<(), ObservationError> {
        if self.frame_width == 0 {
            return Err(ObservationError::ZeroFrameWidth);
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(ObservationError::ConfidenceOutOfRange(self.confidence));
        }
        if let Some(b) = self.bounding_box
            && !(b.x1.is_finite() && b.y1.is_finite() && b.x2.is_finite() && b.y2.is_finite())
        {
            return Err(ObservationError::NonFiniteBox);
        }
        Ok(())
    }

    /// 是否有可用于计算偏移的人脸
    pub fn has_face(&self) -> bool {
        self.lock_state == LockState::Tracking && self.bounding_box.is_some()
    }
}
