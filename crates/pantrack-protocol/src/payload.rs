//! JSON 线格式
//!
//! 每条消息对应一个运动事件：
//!
//! ```text
//! { "status": "MOVE_LEFT"|"MOVE_RIGHT"|"CENTERED"|"NO_FACE",
//!   "confidence": 0.87,
//!   "offset": -0.25,
//!   "timestamp": 1730000000 }
//! ```
//!
//! 解码时先按宽松结构解析，再逐字段校验，得到类型化的 [`MovementEvent`]
//! 或带标签的 [`PayloadError`]。`confidence`/`offset`/`timestamp` 缺省为 0，
//! `status` 必填。

use crate::event::{MovementEvent, OFFSET_LIMIT};
use crate::status::MovementStatus;
use serde::Deserialize;
use thiserror::Error;

/// 负载解析错误
#[derive(Error, Debug)]
pub enum PayloadError {
    /// JSON 语法错误或字段类型不符
    #[error("Malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// 缺少必填字段
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// 状态字符串不在已知集合中
    #[error("Unknown status: {0:?}")]
    UnknownStatus(String),

    /// 数值字段超出范围或非有限值
    #[error("Field `{field}` out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

impl PayloadError {
    /// 是否为未知状态（与格式错误分开处理）
    pub fn is_unknown_status(&self) -> bool {
        matches!(self, PayloadError::UnknownStatus(_))
    }
}

/// 宽松的原始记录（仅用于解码）
#[derive(Debug, Deserialize)]
struct RawPayload {
    status: Option<String>,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    offset: f64,
    #[serde(default)]
    timestamp: u64,
}

/// 解码并校验一条消息
///
/// # Errors
///
/// - `PayloadError::Json`: 不是合法 JSON 对象或字段类型错误
/// - `PayloadError::MissingField`: 缺少 `status`
/// - `PayloadError::UnknownStatus`: `status` 不是四种已知值之一
/// - `PayloadError::OutOfRange`: `confidence` ∉ [0,1] 或 `offset` ∉ [-0.5,0.5]
pub fn decode_event(payload: &[u8]) -> Result<MovementEvent, PayloadError> {
    let raw: RawPayload = serde_json::from_slice(payload)?;

    let status = raw.status.ok_or(PayloadError::MissingField("status"))?;
    let status = status
        .parse::<MovementStatus>()
        .map_err(|e| PayloadError::UnknownStatus(e.0))?;

    if !raw.confidence.is_finite() || !(0.0..=1.0).contains(&raw.confidence) {
        return Err(PayloadError::OutOfRange {
            field: "confidence",
            value: raw.confidence,
        });
    }
    if !raw.offset.is_finite() || raw.offset.abs() > OFFSET_LIMIT {
        return Err(PayloadError::OutOfRange {
            field: "offset",
            value: raw.offset,
        });
    }

    Ok(MovementEvent::new(
        status,
        raw.confidence,
        raw.offset,
        raw.timestamp,
    ))
}

/// 编码为 JSON 字节
pub fn encode_event(event: &MovementEvent) -> Result<Vec<u8>, PayloadError> {
    Ok(serde_json::to_vec(event)?)
}
