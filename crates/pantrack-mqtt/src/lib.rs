//! # Pantrack MQTT
//!
//! 跟踪链路的消息传输层：
//! - `codec`: MQTT 3.1.1 报文子集的编解码
//! - `client`: 基于 `std::net::TcpStream` 的客户端（非阻塞轮询、保活）
//! - `MessageSource` / `MessageSink`: 控制循环与视觉桥依赖的传输接口
//!
//! 传输层只搬运原始字节，负载的解析与校验在 `pantrack-protocol` 中完成。

pub mod client;
pub mod codec;
mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod transport;

pub use client::{DEFAULT_MAX_PACKET_SIZE, MqttClient, MqttOptions, MqttPublisher, MqttSubscriber};
pub use codec::{CodecError, ConnectReturnCode, Packet, Publish, QoS};
pub use error::TransportError;
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockSink, MockSource};
pub use transport::{MessageSink, MessageSource};
