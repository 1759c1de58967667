//! 传输层错误类型

use crate::codec::{CodecError, ConnectReturnCode};
use thiserror::Error;

/// 传输层错误
///
/// 所有传输错误都可恢复：调用方断开并按重连策略重试。
#[derive(Error, Debug)]
pub enum TransportError {
    /// 底层 IO 错误
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    /// 代理地址无法解析
    #[error("Invalid broker address: {0}")]
    Address(String),

    /// 等待代理响应超时（CONNACK / SUBACK）
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    /// 代理拒绝连接
    #[error("Connection refused by broker: {0}")]
    ConnectRefused(ConnectReturnCode),

    /// 代理拒绝订阅
    #[error("Subscription rejected for topic '{0}'")]
    SubscribeRejected(String),

    /// 对端关闭连接
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// 保活期内没有收到 PINGRESP
    #[error("Keep-alive timeout")]
    KeepAliveTimeout,

    /// 报文格式错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] CodecError),

    /// 未连接
    #[error("Not connected")]
    NotConnected,
}

impl TransportError {
    /// 是否为链路类的临时故障（网络抖动、对端断开）
    ///
    /// 返回 `false` 的错误（代理拒绝、地址错误）重试大概率仍会失败，
    /// 调用方通常以更高的日志级别报告。
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Io(_)
            | TransportError::Timeout(_)
            | TransportError::ConnectionClosed
            | TransportError::KeepAliveTimeout
            | TransportError::Protocol(_)
            | TransportError::NotConnected => true,
            TransportError::ConnectRefused(code) => *code == ConnectReturnCode::ServerUnavailable,
            TransportError::Address(_) | TransportError::SubscribeRejected(_) => false,
        }
    }
}
