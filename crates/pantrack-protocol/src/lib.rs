//! # Pantrack Protocol
//!
//! 人脸跟踪云台的消息协议定义（无硬件、无传输依赖）
//!
//! ## 模块
//!
//! - `status`: 运动状态枚举（MOVE_LEFT / MOVE_RIGHT / CENTERED / NO_FACE）
//! - `event`: 运动事件（一次识别结果，发布后不可变）
//! - `payload`: JSON 线格式编码/解码与校验
//! - `timestamp`: 事件时间戳（Unix 纪元秒）
//!
//! ## 数据流
//!
//! ```text
//! vision (MovementClassifier)
//!     ↓ encode_event()
//! JSON payload（经消息代理传输）
//!     ↓ decode_event()
//! controller (Dispatcher)
//! ```

pub mod event;
pub mod payload;
pub mod status;
pub mod timestamp;

pub use event::{Direction, MovementEvent, OFFSET_LIMIT};
pub use payload::{PayloadError, decode_event, encode_event};
pub use status::MovementStatus;
pub use timestamp::epoch_seconds;
