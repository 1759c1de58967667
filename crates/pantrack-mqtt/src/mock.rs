//! Mock 传输（用于测试）
//!
//! `MockSource` / `MockSink` 的克隆共享同一份状态：测试把一个克隆交给
//! 被测对象，用另一个克隆编排连接结果、注入消息并检查调用记录。

use crate::error::TransportError;
use crate::transport::{MessageSink, MessageSource};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct SourceState {
    connected: bool,
    connect_script: VecDeque<Result<(), TransportError>>,
    inbound: VecDeque<Result<Vec<u8>, TransportError>>,
    connect_attempts: usize,
    disconnects: usize,
    polls: usize,
    fail_disconnect: bool,
}

/// 脚本化消息源
///
/// - 连接结果按 `push_connect_*` 的顺序消费，脚本用完后连接总是成功
/// - 入站队列为空时 `poll()` 返回 `Ok(None)`
/// - 入站错误被消费后连接标记为断开
#[derive(Debug, Clone, Default)]
pub struct MockSource {
    state: Arc<Mutex<SourceState>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// 下一次连接失败
    pub fn push_connect_failure(&self, err: TransportError) {
        self.state.lock().unwrap().connect_script.push_back(Err(err));
    }

    /// 下一次连接成功
    pub fn push_connect_success(&self) {
        self.state.lock().unwrap().connect_script.push_back(Ok(()));
    }

    /// 注入一条入站消息
    pub fn push_payload(&self, payload: impl Into<Vec<u8>>) {
        self.state.lock().unwrap().inbound.push_back(Ok(payload.into()));
    }

    /// 注入一个运行期传输错误
    pub fn push_error(&self, err: TransportError) {
        self.state.lock().unwrap().inbound.push_back(Err(err));
    }

    /// `disconnect()` 返回错误（仍然标记为断开）
    pub fn set_disconnect_error(&self, fail: bool) {
        self.state.lock().unwrap().fail_disconnect = fail;
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.lock().unwrap().connect_attempts
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }

    pub fn poll_count(&self) -> usize {
        self.state.lock().unwrap().polls
    }

    /// 尚未被消费的入站条目数
    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().inbound.len()
    }
}

impl MessageSource for MockSource {
    fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.connect_attempts += 1;
        let result = state.connect_script.pop_front().unwrap_or(Ok(()));
        state.connected = result.is_ok();
        result
    }

    fn poll(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.polls += 1;
        match state.inbound.pop_front() {
            None => Ok(None),
            Some(Ok(payload)) => Ok(Some(payload)),
            Some(Err(err)) => {
                state.connected = false;
                Err(err)
            },
        }
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.disconnects += 1;
        state.connected = false;
        if state.fail_disconnect {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SinkState {
    connected: bool,
    connect_script: VecDeque<Result<(), TransportError>>,
    publish_failures: VecDeque<TransportError>,
    published: Vec<Vec<u8>>,
    connect_attempts: usize,
    services: usize,
    disconnects: usize,
}

/// 记录发布内容的消息接收端
#[derive(Debug, Clone, Default)]
pub struct MockSink {
    state: Arc<Mutex<SinkState>>,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_connect_failure(&self, err: TransportError) {
        self.state.lock().unwrap().connect_script.push_back(Err(err));
    }

    /// 下一次发布失败（连接随之断开）
    pub fn push_publish_failure(&self, err: TransportError) {
        self.state.lock().unwrap().publish_failures.push_back(err);
    }

    /// 所有成功发布的负载
    pub fn published(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().published.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.lock().unwrap().connect_attempts
    }

    pub fn service_count(&self) -> usize {
        self.state.lock().unwrap().services
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.lock().unwrap().disconnects
    }
}

impl MessageSink for MockSink {
    fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.connect_attempts += 1;
        let result = state.connect_script.pop_front().unwrap_or(Ok(()));
        state.connected = result.is_ok();
        result
    }

    fn publish(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if let Some(err) = state.publish_failures.pop_front() {
            state.connected = false;
            return Err(err);
        }
        state.published.push(payload.to_vec());
        Ok(())
    }

    fn service(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.services += 1;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state.disconnects += 1;
        state.connected = false;
        Ok(())
    }
}
