//! MQTT 3.1.1 报文编解码
//!
//! 只实现跟踪链路用到的子集：
//!
//! | 报文 | 类型 | 方向 |
//! |------|------|------|
//! | CONNECT | 0x10 | 客户端 → 代理 |
//! | CONNACK | 0x20 | 代理 → 客户端 |
//! | PUBLISH | 0x30 | 双向 |
//! | PUBACK | 0x40 | 双向 |
//! | SUBSCRIBE | 0x82 | 客户端 → 代理 |
//! | SUBACK | 0x90 | 代理 → 客户端 |
//! | PINGREQ / PINGRESP | 0xC0 / 0xD0 | 双向 |
//! | DISCONNECT | 0xE0 | 客户端 → 代理 |
//!
//! 固定头之后是变长编码的剩余长度（1-4 字节，每字节 7 位，最高位为续位）。

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// 剩余长度上限（4 字节变长编码）
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;

// ============================================================================
// Codec Error
// ============================================================================

/// 编解码错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed remaining length")]
    MalformedLength,

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Unknown packet type: 0x{0:02X}")]
    UnknownPacketType(u8),

    #[error("Invalid fixed header flags: 0x{0:02X}")]
    InvalidFlags(u8),

    #[error("Truncated packet body")]
    Truncated,

    #[error("Invalid UTF-8 string")]
    InvalidUtf8,

    #[error("String too long: {0} bytes")]
    StringTooLong(usize),

    #[error("Invalid QoS: {0}")]
    InvalidQoS(u8),

    #[error("Invalid CONNACK return code: {0}")]
    InvalidReturnCode(u8),

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),
}

// ============================================================================
// QoS / Return Codes
// ============================================================================

/// 服务质量等级
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    pub fn from_u8(value: u8) -> Result<Self, CodecError> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(CodecError::InvalidQoS(other)),
        }
    }
}

/// CONNACK 返回码
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocol = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadCredentials = 4,
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    pub fn from_u8(value: u8) -> Result<Self, CodecError> {
        match value {
            0 => Ok(ConnectReturnCode::Accepted),
            1 => Ok(ConnectReturnCode::UnacceptableProtocol),
            2 => Ok(ConnectReturnCode::IdentifierRejected),
            3 => Ok(ConnectReturnCode::ServerUnavailable),
            4 => Ok(ConnectReturnCode::BadCredentials),
            5 => Ok(ConnectReturnCode::NotAuthorized),
            other => Err(CodecError::InvalidReturnCode(other)),
        }
    }
}

impl std::fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ConnectReturnCode::Accepted => "accepted",
            ConnectReturnCode::UnacceptableProtocol => "unacceptable protocol version",
            ConnectReturnCode::IdentifierRejected => "identifier rejected",
            ConnectReturnCode::ServerUnavailable => "server unavailable",
            ConnectReturnCode::BadCredentials => "bad user name or password",
            ConnectReturnCode::NotAuthorized => "not authorized",
        };
        f.write_str(text)
    }
}

/// SUBACK 中表示订阅失败的返回码
pub const SUBACK_FAILURE: u8 = 0x80;

// ============================================================================
// Packets
// ============================================================================

/// CONNECT 报文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    /// 保活间隔（秒，0 表示禁用）
    pub keep_alive: u16,
    pub clean_session: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// PUBLISH 报文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    /// QoS > 0 时必须存在
    pub packet_id: Option<u16>,
    pub payload: Bytes,
}

impl Publish {
    /// QoS 0 发布
    pub fn at_most_once(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            dup: false,
            packet_id: None,
            payload: payload.into(),
        }
    }
}

/// MQTT 报文
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck {
        session_present: bool,
        code: ConnectReturnCode,
    },
    Publish(Publish),
    PubAck {
        packet_id: u16,
    },
    Subscribe {
        packet_id: u16,
        filters: Vec<(String, QoS)>,
    },
    SubAck {
        packet_id: u16,
        return_codes: Vec<u8>,
    },
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    /// 报文名（日志用）
    pub fn name(&self) -> &'static str {
        match self {
            Packet::Connect(_) => "CONNECT",
            Packet::ConnAck { .. } => "CONNACK",
            Packet::Publish(_) => "PUBLISH",
            Packet::PubAck { .. } => "PUBACK",
            Packet::Subscribe { .. } => "SUBSCRIBE",
            Packet::SubAck { .. } => "SUBACK",
            Packet::PingReq => "PINGREQ",
            Packet::PingResp => "PINGRESP",
            Packet::Disconnect => "DISCONNECT",
        }
    }

    /// 编码到缓冲区末尾
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        let mut body = BytesMut::new();
        let header = match self {
            Packet::Connect(connect) => {
                write_string(&mut body, PROTOCOL_NAME)?;
                body.put_u8(PROTOCOL_LEVEL);
                let mut flags = 0u8;
                if connect.clean_session {
                    flags |= 0x02;
                }
                if connect.password.is_some() {
                    flags |= 0x40;
                }
                if connect.username.is_some() {
                    flags |= 0x80;
                }
                body.put_u8(flags);
                body.put_u16(connect.keep_alive);
                write_string(&mut body, &connect.client_id)?;
                if let Some(username) = &connect.username {
                    write_string(&mut body, username)?;
                }
                if let Some(password) = &connect.password {
                    write_string(&mut body, password)?;
                }
                0x10
            },
            Packet::ConnAck {
                session_present,
                code,
            } => {
                body.put_u8(u8::from(*session_present));
                body.put_u8(*code as u8);
                0x20
            },
            Packet::Publish(publish) => {
                write_string(&mut body, &publish.topic)?;
                if publish.qos != QoS::AtMostOnce {
                    body.put_u16(publish.packet_id.ok_or(CodecError::Truncated)?);
                }
                body.put_slice(&publish.payload);
                0x30 | (u8::from(publish.dup) << 3)
                    | ((publish.qos as u8) << 1)
                    | u8::from(publish.retain)
            },
            Packet::PubAck { packet_id } => {
                body.put_u16(*packet_id);
                0x40
            },
            Packet::Subscribe { packet_id, filters } => {
                body.put_u16(*packet_id);
                for (filter, qos) in filters {
                    write_string(&mut body, filter)?;
                    body.put_u8(*qos as u8);
                }
                0x82
            },
            Packet::SubAck {
                packet_id,
                return_codes,
            } => {
                body.put_u16(*packet_id);
                body.put_slice(return_codes);
                0x90
            },
            Packet::PingReq => 0xC0,
            Packet::PingResp => 0xD0,
            Packet::Disconnect => 0xE0,
        };

        if body.len() > MAX_REMAINING_LENGTH {
            return Err(CodecError::PacketTooLarge(body.len()));
        }
        buf.reserve(1 + 4 + body.len());
        buf.put_u8(header);
        write_remaining_length(buf, body.len());
        buf.put_slice(&body);
        Ok(())
    }

    /// 从缓冲区解码一个完整报文
    ///
    /// 数据不足时返回 `Ok(None)` 且不消费任何字节；成功时消费该报文的全部字节。
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        Self::decode_limited(buf, MAX_REMAINING_LENGTH)
    }

    /// 同 [`Packet::decode`]，剩余长度超过 `max_remaining` 时立即报错
    ///
    /// 固定头一到就检查，不等待报文体。
    pub fn decode_limited(
        buf: &mut BytesMut,
        max_remaining: usize,
    ) -> Result<Option<Packet>, CodecError> {
        if buf.len() < 2 {
            return Ok(None);
        }
        let Some((remaining, len_bytes)) = read_remaining_length(&buf[1..])? else {
            return Ok(None);
        };
        if remaining > max_remaining {
            return Err(CodecError::PacketTooLarge(remaining));
        }
        let total = 1 + len_bytes + remaining;
        if buf.len() < total {
            return Ok(None);
        }

        let mut frame = buf.split_to(total).freeze();
        let header = frame.get_u8();
        frame.advance(len_bytes);
        decode_body(header, frame).map(Some)
    }
}

fn decode_body(header: u8, mut body: Bytes) -> Result<Packet, CodecError> {
    let packet_type = header >> 4;
    let flags = header & 0x0F;

    let packet = match packet_type {
        1 => {
            expect_flags(header, 0)?;
            let protocol = read_string(&mut body)?;
            let level = read_u8(&mut body)?;
            if protocol != PROTOCOL_NAME || level != PROTOCOL_LEVEL {
                return Err(CodecError::UnsupportedProtocol(format!("{} v{}", protocol, level)));
            }
            let connect_flags = read_u8(&mut body)?;
            let keep_alive = read_u16(&mut body)?;
            let client_id = read_string(&mut body)?;
            let username = if connect_flags & 0x80 != 0 {
                Some(read_string(&mut body)?)
            } else {
                None
            };
            let password = if connect_flags & 0x40 != 0 {
                Some(read_string(&mut body)?)
            } else {
                None
            };
            Packet::Connect(Connect {
                client_id,
                keep_alive,
                clean_session: connect_flags & 0x02 != 0,
                username,
                password,
            })
        },
        2 => {
            expect_flags(header, 0)?;
            let ack_flags = read_u8(&mut body)?;
            let code = ConnectReturnCode::from_u8(read_u8(&mut body)?)?;
            Packet::ConnAck {
                session_present: ack_flags & 0x01 != 0,
                code,
            }
        },
        3 => {
            let qos = QoS::from_u8((flags >> 1) & 0x03)?;
            let topic = read_string(&mut body)?;
            let packet_id = if qos == QoS::AtMostOnce {
                None
            } else {
                Some(read_u16(&mut body)?)
            };
            Packet::Publish(Publish {
                topic,
                qos,
                retain: flags & 0x01 != 0,
                dup: flags & 0x08 != 0,
                packet_id,
                payload: body,
            })
        },
        4 => {
            expect_flags(header, 0)?;
            Packet::PubAck {
                packet_id: read_u16(&mut body)?,
            }
        },
        8 => {
            expect_flags(header, 0x02)?;
            let packet_id = read_u16(&mut body)?;
            let mut filters = Vec::new();
            while body.has_remaining() {
                let filter = read_string(&mut body)?;
                let qos = QoS::from_u8(read_u8(&mut body)? & 0x03)?;
                filters.push((filter, qos));
            }
            Packet::Subscribe { packet_id, filters }
        },
        9 => {
            expect_flags(header, 0)?;
            let packet_id = read_u16(&mut body)?;
            Packet::SubAck {
                packet_id,
                return_codes: body.to_vec(),
            }
        },
        12 => {
            expect_flags(header, 0)?;
            Packet::PingReq
        },
        13 => {
            expect_flags(header, 0)?;
            Packet::PingResp
        },
        14 => {
            expect_flags(header, 0)?;
            Packet::Disconnect
        },
        _ => return Err(CodecError::UnknownPacketType(header)),
    };
    Ok(packet)
}

fn expect_flags(header: u8, expected: u8) -> Result<(), CodecError> {
    if header & 0x0F != expected {
        return Err(CodecError::InvalidFlags(header));
    }
    Ok(())
}

// ============================================================================
// Primitive helpers
// ============================================================================

/// 写入变长剩余长度
fn write_remaining_length(buf: &mut BytesMut, mut len: usize) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

/// 读取变长剩余长度，返回 (长度, 占用字节数)；数据不足返回 `None`
fn read_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, CodecError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, byte) in buf.iter().enumerate() {
        if i >= 4 {
            return Err(CodecError::MalformedLength);
        }
        value += usize::from(byte & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if buf.len() >= 4 {
        return Err(CodecError::MalformedLength);
    }
    Ok(None)
}

fn write_string(buf: &mut BytesMut, s: &str) -> Result<(), CodecError> {
    let len = u16::try_from(s.len()).map_err(|_| CodecError::StringTooLong(s.len()))?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn read_u8(buf: &mut Bytes) -> Result<u8, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u8())
}

fn read_u16(buf: &mut Bytes) -> Result<u16, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::Truncated);
    }
    Ok(buf.get_u16())
}

fn read_string(buf: &mut Bytes) -> Result<String, CodecError> {
    let len = usize::from(read_u16(buf)?);
    if buf.remaining() < len {
        return Err(CodecError::Truncated);
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}
