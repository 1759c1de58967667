//! MQTT TCP 会话
//!
//! `MqttClient` 在握手完成后把 socket 切换为非阻塞模式，`poll()` 从不阻塞：
//! 每次调用读取当前可用的字节、解出所有完整报文，并按需发送保活 PINGREQ。
//!
//! 任何会话级错误都会丢弃当前连接，调用方需要重新 `connect()`。

use crate::codec::{Connect, ConnectReturnCode, Packet, Publish, QoS, SUBACK_FAILURE};
use crate::error::TransportError;
use crate::transport::{MessageSink, MessageSource};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

const READ_CHUNK: usize = 4096;

/// 默认入站报文体上限
pub const DEFAULT_MAX_PACKET_SIZE: usize = 64 * 1024;

/// 握手/写入等待时的轮询间隔
const WAIT_SLICE: Duration = Duration::from_millis(5);

/// 连接参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttOptions {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// 保活间隔（零表示禁用）
    pub keep_alive: Duration,
    /// TCP 连接、CONNACK/SUBACK 等待和写入的超时
    pub connect_timeout: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 入站报文剩余长度上限，超过即断开
    pub max_packet_size: usize,
}

impl MqttOptions {
    pub fn new(client_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            username: None,
            password: None,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    fn keep_alive_secs(&self) -> u16 {
        self.keep_alive.as_secs().min(u64::from(u16::MAX)) as u16
    }
}

/// 已建立的 TCP 会话
struct Session {
    stream: TcpStream,
    read_buf: BytesMut,
    max_packet_size: usize,
    eof: bool,
    last_sent: Instant,
    ping_sent_at: Option<Instant>,
}

impl Session {
    fn new(stream: TcpStream, max_packet_size: usize) -> Self {
        Self {
            stream,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            max_packet_size,
            eof: false,
            last_sent: Instant::now(),
            ping_sent_at: None,
        }
    }

    /// 读取当前可用的字节（非阻塞），缓冲区最多容纳一个上限大小的报文
    fn fill(&mut self) -> Result<(), TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        // 固定头最多 5 字节
        let limit = self.max_packet_size.saturating_add(5);
        while !self.eof && self.read_buf.len() < limit {
            match self.stream.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// 取出下一个完整报文；对端已关闭且缓冲区没有完整报文时返回 `ConnectionClosed`
    fn next_packet(&mut self) -> Result<Option<Packet>, TransportError> {
        if let Some(packet) = Packet::decode_limited(&mut self.read_buf, self.max_packet_size)? {
            return Ok(Some(packet));
        }
        self.fill()?;
        match Packet::decode_limited(&mut self.read_buf, self.max_packet_size)? {
            Some(packet) => Ok(Some(packet)),
            None if self.eof => Err(TransportError::ConnectionClosed),
            None => Ok(None),
        }
    }

    fn send(&mut self, packet: &Packet, timeout: Duration) -> Result<(), TransportError> {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf)?;

        let deadline = Instant::now() + timeout;
        let mut written = 0;
        while written < buf.len() {
            match self.stream.write(&buf[written..]) {
                Ok(0) => return Err(TransportError::ConnectionClosed),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(TransportError::Timeout("socket write"));
                    }
                    thread::sleep(WAIT_SLICE);
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(e.into()),
            }
        }
        self.last_sent = Instant::now();
        trace!("Sent {} ({} bytes)", packet.name(), buf.len());
        Ok(())
    }

    /// 处理一个入站报文，PUBLISH 放入队列
    fn route(
        &mut self,
        packet: Packet,
        inbound: &mut VecDeque<Publish>,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        match packet {
            Packet::Publish(publish) => {
                if publish.qos == QoS::AtLeastOnce
                    && let Some(packet_id) = publish.packet_id
                {
                    self.send(&Packet::PubAck { packet_id }, timeout)?;
                } else if publish.qos == QoS::ExactlyOnce {
                    warn!("QoS 2 PUBLISH on '{}' delivered without handshake", publish.topic);
                }
                trace!("Received PUBLISH on '{}' ({} bytes)", publish.topic, publish.payload.len());
                inbound.push_back(publish);
            },
            Packet::PingResp => self.ping_sent_at = None,
            Packet::PingReq => self.send(&Packet::PingResp, timeout)?,
            other => debug!("Ignoring unexpected {} packet", other.name()),
        }
        Ok(())
    }

    /// 保活：空闲满一个周期发送 PINGREQ，再过一个周期仍无 PINGRESP 视为断链
    fn keep_alive(
        &mut self,
        keep_alive: Duration,
        now: Instant,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        if keep_alive.is_zero() {
            return Ok(());
        }
        if let Some(sent) = self.ping_sent_at {
            if now.saturating_duration_since(sent) >= keep_alive {
                return Err(TransportError::KeepAliveTimeout);
            }
            return Ok(());
        }
        if now.saturating_duration_since(self.last_sent) >= keep_alive {
            self.send(&Packet::PingReq, timeout)?;
            self.ping_sent_at = Some(now);
        }
        Ok(())
    }
}

/// MQTT 3.1.1 客户端（TCP，非阻塞轮询）
pub struct MqttClient {
    options: MqttOptions,
    session: Option<Session>,
    inbound: VecDeque<Publish>,
    next_packet_id: u16,
}

impl MqttClient {
    pub fn new(options: MqttOptions) -> Self {
        Self {
            options,
            session: None,
            inbound: VecDeque::new(),
            next_packet_id: 0,
        }
    }

    pub fn options(&self) -> &MqttOptions {
        &self.options
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// 建立 TCP 连接并完成 CONNECT/CONNACK 握手
    pub fn connect(&mut self) -> Result<(), TransportError> {
        self.session = None;
        self.inbound.clear();

        let timeout = self.options.connect_timeout;
        let stream = self.open_stream(timeout)?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;

        let mut session = Session::new(stream, self.options.max_packet_size);
        let connect = Packet::Connect(Connect {
            client_id: self.options.client_id.clone(),
            keep_alive: self.options.keep_alive_secs(),
            clean_session: true,
            username: self.options.username.clone(),
            password: self.options.password.clone(),
        });
        session.send(&connect, timeout)?;

        let deadline = Instant::now() + timeout;
        loop {
            match session.next_packet()? {
                Some(Packet::ConnAck { code, .. }) => {
                    if code != ConnectReturnCode::Accepted {
                        return Err(TransportError::ConnectRefused(code));
                    }
                    break;
                },
                Some(other) => debug!("Ignoring {} before CONNACK", other.name()),
                None => {
                    if Instant::now() >= deadline {
                        return Err(TransportError::Timeout("CONNACK"));
                    }
                    thread::sleep(WAIT_SLICE);
                },
            }
        }

        info!(
            "Connected to MQTT broker {}:{} as '{}'",
            self.options.host, self.options.port, self.options.client_id
        );
        self.session = Some(session);
        Ok(())
    }

    fn open_stream(&self, timeout: Duration) -> Result<TcpStream, TransportError> {
        let host = self.options.host.as_str();
        let port = self.options.port;
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| TransportError::Address(format!("{}:{}: {}", host, port, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(TransportError::Address(format!("{}:{}: no addresses", host, port)));
        }

        let mut last_err = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("TCP connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                },
            }
        }
        Err(match last_err {
            Some(e) if e.kind() == io::ErrorKind::TimedOut => TransportError::Timeout("TCP connect"),
            Some(e) => TransportError::Io(e),
            None => TransportError::Address(format!("{}:{}", host, port)),
        })
    }

    /// 订阅主题并等待 SUBACK
    pub fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        let result = self.subscribe_inner(topic, qos);
        if result.is_err() {
            self.session = None;
        }
        result
    }

    fn subscribe_inner(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        let packet_id = self.allocate_packet_id();
        let timeout = self.options.connect_timeout;
        let session = self.session.as_mut().ok_or(TransportError::NotConnected)?;

        session.send(
            &Packet::Subscribe {
                packet_id,
                filters: vec![(topic.to_string(), qos)],
            },
            timeout,
        )?;

        let deadline = Instant::now() + timeout;
        loop {
            match session.next_packet()? {
                Some(Packet::SubAck {
                    packet_id: acked,
                    return_codes,
                }) if acked == packet_id => {
                    if return_codes.first().is_none_or(|code| *code == SUBACK_FAILURE) {
                        return Err(TransportError::SubscribeRejected(topic.to_string()));
                    }
                    break;
                },
                Some(packet) => session.route(packet, &mut self.inbound, timeout)?,
                None => {
                    if Instant::now() >= deadline {
                        return Err(TransportError::Timeout("SUBACK"));
                    }
                    thread::sleep(WAIT_SLICE);
                },
            }
        }

        info!("Subscribed to '{}'", topic);
        Ok(())
    }

    /// 非阻塞轮询：返回一条入站 PUBLISH（如有）
    pub fn poll(&mut self) -> Result<Option<Publish>, TransportError> {
        let result = self.poll_inner();
        if result.is_err() {
            self.session = None;
        }
        result
    }

    fn poll_inner(&mut self) -> Result<Option<Publish>, TransportError> {
        if let Some(publish) = self.inbound.pop_front() {
            return Ok(Some(publish));
        }

        let timeout = self.options.connect_timeout;
        let keep_alive = self.options.keep_alive;
        let session = self.session.as_mut().ok_or(TransportError::NotConnected)?;

        while let Some(packet) = session.next_packet()? {
            session.route(packet, &mut self.inbound, timeout)?;
        }
        session.keep_alive(keep_alive, Instant::now(), timeout)?;

        Ok(self.inbound.pop_front())
    }

    /// QoS 0 发布
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let timeout = self.options.connect_timeout;
        let packet = Packet::Publish(Publish::at_most_once(topic, Bytes::copy_from_slice(payload)));
        let result = match self.session.as_mut() {
            Some(session) => session.send(&packet, timeout),
            None => Err(TransportError::NotConnected),
        };
        if result.is_err() {
            self.session = None;
        }
        result
    }

    /// 发送 DISCONNECT 并关闭 socket（未连接时无操作）
    pub fn disconnect(&mut self) -> Result<(), TransportError> {
        self.inbound.clear();
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        let result = session.send(&Packet::Disconnect, self.options.connect_timeout);
        let _ = session.stream.shutdown(Shutdown::Both);
        info!("Disconnected from MQTT broker {}:{}", self.options.host, self.options.port);
        result
    }

    fn allocate_packet_id(&mut self) -> u16 {
        // 报文标识符不能为 0
        self.next_packet_id = self.next_packet_id.wrapping_add(1).max(1);
        self.next_packet_id
    }
}

/// 订阅单个主题的消息源
pub struct MqttSubscriber {
    client: MqttClient,
    topic: String,
}

impl MqttSubscriber {
    pub fn new(options: MqttOptions, topic: impl Into<String>) -> Self {
        Self {
            client: MqttClient::new(options),
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn client(&self) -> &MqttClient {
        &self.client
    }
}

impl MessageSource for MqttSubscriber {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.client.connect()?;
        self.client.subscribe(&self.topic, QoS::AtMostOnce)
    }

    fn poll(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(self.client.poll()?.map(|publish| publish.payload.to_vec()))
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.client.disconnect()
    }
}

/// 发布到单个主题的消息接收端
pub struct MqttPublisher {
    client: MqttClient,
    topic: String,
}

impl MqttPublisher {
    pub fn new(options: MqttOptions, topic: impl Into<String>) -> Self {
        Self {
            client: MqttClient::new(options),
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn client(&self) -> &MqttClient {
        &self.client
    }
}

impl MessageSink for MqttPublisher {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.client.connect()
    }

    fn publish(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.client.publish(&self.topic, payload)
    }

    fn service(&mut self) -> Result<(), TransportError> {
        while let Some(publish) = self.client.poll()? {
            debug!("Publisher dropped inbound message on '{}'", publish.topic);
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.client.disconnect()
    }
}
