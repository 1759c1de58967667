//! 消息传输接口
//!
//! 控制循环和视觉桥只依赖这两个 trait，不关心底层是 MQTT 还是 Mock。

use crate::error::TransportError;

/// 入站消息源（订阅端）
pub trait MessageSource {
    /// 建立连接并完成订阅
    fn connect(&mut self) -> Result<(), TransportError>;

    /// 非阻塞轮询，每次最多返回一条消息负载
    fn poll(&mut self) -> Result<Option<Vec<u8>>, TransportError>;

    /// 断开连接
    fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// 出站消息接收端（发布端）
pub trait MessageSink {
    fn connect(&mut self) -> Result<(), TransportError>;

    /// 发布一条消息负载
    fn publish(&mut self, payload: &[u8]) -> Result<(), TransportError>;

    /// 维护连接（处理入站报文、发送保活）
    fn service(&mut self) -> Result<(), TransportError>;

    fn disconnect(&mut self) -> Result<(), TransportError>;
}

impl<T: MessageSource + ?Sized> MessageSource for Box<T> {
    fn connect(&mut self) -> Result<(), TransportError> {
        (**self).connect()
    }

    fn poll(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        (**self).poll()
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        (**self).disconnect()
    }
}

impl<T: MessageSink + ?Sized> MessageSink for Box<T> {
    fn connect(&mut self) -> Result<(), TransportError> {
        (**self).connect()
    }

    fn publish(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        (**self).publish(payload)
    }

    fn service(&mut self) -> Result<(), TransportError> {
        (**self).service()
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        (**self).disconnect()
    }
}
