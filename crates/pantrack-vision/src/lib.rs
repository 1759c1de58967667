//! # Pantrack Vision
//!
//! 识别端：把人脸锁定子系统的逐帧结果转换为离散的运动事件。
//!
//! - `observation`: 帧观测数据（由外部人脸检测/锁定子系统产生）
//! - `classifier`: 带滞回与防刷屏的运动分类器

pub mod classifier;
pub mod observation;

pub use classifier::{Classification, ClassifierConfig, ClassifierState, MovementClassifier};
pub use observation::{BoundingBox, FrameObservation, LockState, ObservationError};
