//! 分派循环集成测试
//!
//! 使用 Mock 传输和 Mock PWM 输出，通过 `step()` 注入时间驱动循环，
//! 不依赖真实休眠（`run()` 测试除外）。

use pantrack_control::{
    Dispatcher, Handled, LinkState, RetryPolicy, ShutdownReport, TrackingRig,
};
use pantrack_mqtt::{MessageSource, MockSource, TransportError};
use pantrack_servo::{
    MockPwmOutput, PwmOutput, PwmWrite, ScanConfig, ServoConfig, ServoError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn payload(status: &str, offset: f64) -> Vec<u8> {
    format!(
        r#"{{"status":"{}","confidence":0.9,"offset":{},"timestamp":1700000000}}"#,
        status, offset
    )
    .into_bytes()
}

fn dispatcher() -> (Dispatcher<MockSource, MockPwmOutput>, MockSource, MockPwmOutput) {
    let source = MockSource::new();
    let output = MockPwmOutput::new();
    let rig = TrackingRig::new(ServoConfig::default(), ScanConfig::default(), output.clone());
    (
        Dispatcher::new(source.clone(), rig, RetryPolicy::default()),
        source,
        output,
    )
}

/// 连接并确认进入 Connected
fn connect(d: &mut Dispatcher<MockSource, MockPwmOutput>, now: Instant) {
    let outcome = d.step(now);
    assert_eq!(outcome.link, LinkState::Connected);
}

#[test]
fn test_connect_retry_forever_with_initial_delay() {
    let (mut d, source, _) = dispatcher();
    for _ in 0..3 {
        source.push_connect_failure(TransportError::Timeout("CONNACK"));
    }
    let now = Instant::now();

    for _ in 0..3 {
        let outcome = d.step(now);
        assert_eq!(outcome.link, LinkState::Disconnected);
        assert_eq!(outcome.delay, Duration::from_secs(5));
        assert!(outcome.handled.is_none());
    }

    let outcome = d.step(now);
    assert_eq!(outcome.link, LinkState::Connected);
    assert_eq!(outcome.delay, Duration::ZERO);
    assert_eq!(source.connect_attempts(), 4);
    assert_eq!(d.stats().connect_failures, 3);
    assert_eq!(d.stats().connects, 1);

    // 已连接：空轮询后按轮询间隔休眠
    let outcome = d.step(now);
    assert_eq!(outcome.delay, Duration::from_millis(50));
    assert_eq!(source.poll_count(), 1);
}

#[test]
fn test_runtime_failure_uses_reconnect_delay() {
    let (mut d, source, _) = dispatcher();
    let now = Instant::now();
    connect(&mut d, now);

    source.push_error(TransportError::ConnectionClosed);
    let outcome = d.step(now);
    assert_eq!(outcome.link, LinkState::Disconnected);
    assert_eq!(outcome.delay, Duration::from_secs(3));
    assert!(!outcome.scan_ticked);
    assert_eq!(d.stats().reconnects, 1);

    // 下一轮重新连接并订阅
    let outcome = d.step(now);
    assert_eq!(outcome.link, LinkState::Connected);
    assert_eq!(source.connect_attempts(), 2);
}

#[test]
fn test_move_right_stops_scan_before_move() {
    let (mut d, source, output) = dispatcher();
    let t0 = Instant::now();
    connect(&mut d, t0);

    source.push_payload(payload("NO_FACE", 0.0));
    let outcome = d.step(t0);
    assert_eq!(outcome.handled, Some(Handled::ScanStarted));
    assert!(!outcome.scan_ticked);
    assert!(d.rig().scan().is_active());

    let outcome = d.step(t0 + Duration::from_millis(100));
    assert!(outcome.scan_ticked);
    assert_eq!(d.rig().angle(), 92);

    source.push_payload(payload("MOVE_RIGHT", 0.5));
    let outcome = d.step(t0 + Duration::from_millis(200));
    assert_eq!(outcome.handled, Some(Handled::Moved { angle: 100 }));
    assert!(!outcome.scan_ticked);
    assert!(!d.rig().scan().is_active());

    // 之后的步进不再扫描
    let outcome = d.step(t0 + Duration::from_millis(300));
    assert!(!outcome.scan_ticked);
    assert_eq!(d.rig().angle(), 100);
    assert_eq!(output.last_duty(), Some(ServoConfig::default().duty_for(100)));
}

#[test]
fn test_move_left_scenario() {
    let (mut d, _, _) = dispatcher();
    assert_eq!(
        d.handle_payload(&payload("MOVE_LEFT", -0.5)),
        Handled::Moved { angle: 82 }
    );
    assert_eq!(d.stats().moves, 1);
}

#[test]
fn test_centered_holds_angle() {
    let (mut d, _, output) = dispatcher();
    d.handle_payload(&payload("MOVE_LEFT", -0.2));
    let angle = d.rig().angle();
    let writes = output.writes().len();

    d.handle_payload(&payload("NO_FACE", 0.0));
    assert!(d.rig().scan().is_active());

    assert_eq!(
        d.handle_payload(&payload("CENTERED", 0.02)),
        Handled::Held { angle }
    );
    assert!(!d.rig().scan().is_active());
    assert_eq!(output.writes().len(), writes);
}

#[test]
fn test_malformed_and_unknown_payloads_change_nothing() {
    let (mut d, _, output) = dispatcher();
    d.handle_payload(&payload("NO_FACE", 0.0));
    assert!(d.rig().scan().is_active());

    for bad in [
        &b"not json"[..],
        &br#"{"confidence":0.5}"#[..],
        &br#"{"status":"MOVE_LEFT","offset":"far"}"#[..],
        &br#"{"status":"MOVE_LEFT","offset":0.9}"#[..],
        &b""[..],
    ] {
        assert_eq!(d.handle_payload(bad), Handled::Malformed, "{:?}", bad);
    }
    assert_eq!(
        d.handle_payload(br#"{"status":"JUMP","offset":0.1}"#),
        Handled::UnknownStatus
    );

    assert_eq!(d.rig().angle(), 90);
    assert!(d.rig().scan().is_active());
    assert!(output.writes().is_empty());
    assert_eq!(d.stats().malformed, 5);
    assert_eq!(d.stats().unknown_status, 1);
    assert_eq!(d.stats().messages, 6);
}

#[test]
fn test_output_failure_does_not_stop_dispatch() {
    let (mut d, _, output) = dispatcher();
    output.set_failing(true);
    assert_eq!(
        d.handle_payload(&payload("MOVE_RIGHT", 0.5)),
        Handled::Moved { angle: 98 }
    );
    assert_eq!(d.stats().output_errors, 1);

    output.set_failing(false);
    assert_eq!(
        d.handle_payload(&payload("MOVE_RIGHT", 0.5)),
        Handled::Moved { angle: 106 }
    );
}

#[test]
fn test_start_centers_servo() {
    let (mut d, _, output) = dispatcher();
    d.start();
    assert_eq!(output.writes(), vec![PwmWrite::Duty(77)]);
}

#[test]
fn test_shutdown_releases_and_disconnects() {
    let (mut d, source, output) = dispatcher();
    let now = Instant::now();
    connect(&mut d, now);
    d.handle_payload(&payload("NO_FACE", 0.0));

    let report: ShutdownReport = d.shutdown();
    assert!(report.released);
    assert!(report.disconnect_error.is_none());
    assert!(!d.rig().scan().is_active());
    assert_eq!(d.link(), LinkState::Disconnected);
    assert_eq!(output.release_count(), 1);
    assert_eq!(source.disconnect_count(), 1);
    assert!(!source.is_connected());
}

#[test]
fn test_shutdown_completes_when_disconnect_fails() {
    let (mut d, source, output) = dispatcher();
    connect(&mut d, Instant::now());
    source.set_disconnect_error(true);

    let report = d.shutdown();
    assert!(report.released);
    assert!(report.disconnect_error.is_some());
    assert_eq!(output.release_count(), 1);
}

#[test]
fn test_shutdown_while_disconnected() {
    let (mut d, source, output) = dispatcher();
    source.push_connect_failure(TransportError::ConnectionClosed);
    d.step(Instant::now());

    let report = d.shutdown();
    assert!(report.released);
    assert_eq!(output.release_count(), 1);
    assert_eq!(source.disconnect_count(), 1);
}

// ============================================================================
// 停止顺序
// ============================================================================

type Journal = Arc<Mutex<Vec<&'static str>>>;

struct JournalOutput(Journal);

impl PwmOutput for JournalOutput {
    fn write_duty(&mut self, _duty: u32) -> Result<(), ServoError> {
        self.0.lock().unwrap().push("duty");
        Ok(())
    }

    fn release(&mut self) -> Result<(), ServoError> {
        self.0.lock().unwrap().push("release");
        Ok(())
    }
}

struct JournalSource {
    inner: MockSource,
    journal: Journal,
}

impl MessageSource for JournalSource {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.journal.lock().unwrap().push("connect");
        self.inner.connect()
    }

    fn poll(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        self.inner.poll()
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.journal.lock().unwrap().push("disconnect");
        self.inner.disconnect()
    }
}

#[test]
fn test_shutdown_order_release_before_disconnect() {
    let journal: Journal = Arc::default();
    let source = JournalSource {
        inner: MockSource::new(),
        journal: journal.clone(),
    };
    let rig = TrackingRig::new(
        ServoConfig::default(),
        ScanConfig::default(),
        JournalOutput(journal.clone()),
    );
    let mut d = Dispatcher::new(source, rig, RetryPolicy::default());

    d.start();
    d.step(Instant::now());
    d.shutdown();

    assert_eq!(
        *journal.lock().unwrap(),
        vec!["duty", "connect", "release", "disconnect"]
    );
}

// ============================================================================
// run()
// ============================================================================

#[test]
fn test_run_until_shutdown_flag() {
    let source = MockSource::new();
    let output = MockPwmOutput::new();
    let rig = TrackingRig::new(ServoConfig::default(), ScanConfig::default(), output.clone());
    let policy = RetryPolicy {
        connect_retry: Duration::from_secs(60),
        reconnect_delay: Duration::from_secs(60),
        poll_interval: Duration::from_millis(5),
    };
    let mut d = Dispatcher::new(source.clone(), rig, policy);

    // 第一次连接失败 → 进入 60s 重试等待；停止信号应在一个轮询间隔内生效
    source.push_connect_failure(TransportError::ConnectionClosed);
    source.push_payload(payload("MOVE_LEFT", -0.4));

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    let started = Instant::now();
    let handle = thread::spawn(move || {
        let report = d.run(&flag);
        (report, d)
    });

    thread::sleep(Duration::from_millis(100));
    shutdown.store(true, Ordering::Relaxed);
    let (report, d) = handle.join().unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(report.released);
    assert_eq!(report.stats.connect_failures, 1);
    assert_eq!(d.link(), LinkState::Disconnected);
    assert_eq!(output.writes().first(), Some(&PwmWrite::Duty(77)));
    assert_eq!(output.writes().last(), Some(&PwmWrite::Release));
    assert_eq!(source.pending(), 1);
}

#[test]
fn test_run_with_unbounded_retry_delay() {
    let source = MockSource::new();
    let output = MockPwmOutput::new();
    let rig = TrackingRig::new(ServoConfig::default(), ScanConfig::default(), output.clone());
    let policy = RetryPolicy {
        connect_retry: Duration::MAX,
        reconnect_delay: Duration::MAX,
        poll_interval: Duration::from_millis(5),
    };
    let mut d = Dispatcher::new(source.clone(), rig, policy);
    source.push_connect_failure(TransportError::ConnectionClosed);

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    let handle = thread::spawn(move || d.run(&flag));

    thread::sleep(Duration::from_millis(50));
    shutdown.store(true, Ordering::Relaxed);
    let report = handle.join().unwrap();

    assert!(report.released);
    assert_eq!(report.stats.connect_failures, 1);
    assert_eq!(source.connect_attempts(), 1);
}
