//! 传输连接状态机
//!
//! ```text
//!                ConnectFailed (等待 connect_retry)
//!                  ┌──────┐
//!                  ▼      │
//!            ┌──────────────┐  ConnectSucceeded  ┌───────────┐
//!            │ Disconnected │ ─────────────────► │ Connected │
//!            └──────────────┘ ◄───────────────── └───────────┘
//!                   TransportFailed (等待 reconnect_delay)
//! ```
//!
//! 重试永不放弃；首次连接失败和运行期断链使用不同的等待时间。

use std::time::{Duration, Instant};

/// 配置允许的最长等待（重试间隔、轮询间隔等）
pub const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connected,
}

/// 连接事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    ConnectSucceeded,
    ConnectFailed,
    TransportFailed,
}

/// 重连与轮询时间参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 连接失败后的重试间隔
    pub connect_retry: Duration,

    /// 运行期断链后的重连等待
    pub reconnect_delay: Duration,

    /// 已连接时每轮循环的休眠
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_retry: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(3),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// 状态转换结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: LinkState,
    /// 进入下一状态前的等待
    pub delay: Duration,
}

impl LinkState {
    /// 转换表
    pub fn on(self, event: LinkEvent, policy: &RetryPolicy) -> Transition {
        use LinkEvent::*;
        use LinkState::*;

        match (self, event) {
            (Disconnected, ConnectSucceeded) => Transition {
                next: Connected,
                delay: Duration::ZERO,
            },
            (Disconnected, ConnectFailed) => Transition {
                next: Disconnected,
                delay: policy.connect_retry,
            },
            (Connected, TransportFailed) => Transition {
                next: Disconnected,
                delay: policy.reconnect_delay,
            },
            (state, _) => Transition {
                next: state,
                delay: Duration::ZERO,
            },
        }
    }

    pub fn is_connected(self) -> bool {
        self == LinkState::Connected
    }
}

/// `now + delay`，溢出时退化为 `now + MAX_DELAY`
pub fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(MAX_DELAY))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        let policy = RetryPolicy::default();

        let t = LinkState::Disconnected.on(LinkEvent::ConnectSucceeded, &policy);
        assert_eq!(t.next, LinkState::Connected);
        assert_eq!(t.delay, Duration::ZERO);

        let t = LinkState::Disconnected.on(LinkEvent::ConnectFailed, &policy);
        assert_eq!(t.next, LinkState::Disconnected);
        assert_eq!(t.delay, Duration::from_secs(5));

        let t = LinkState::Connected.on(LinkEvent::TransportFailed, &policy);
        assert_eq!(t.next, LinkState::Disconnected);
        assert_eq!(t.delay, Duration::from_secs(3));
    }

    #[test]
    fn test_unexpected_events_keep_state() {
        let policy = RetryPolicy::default();
        for (state, event) in [
            (LinkState::Connected, LinkEvent::ConnectSucceeded),
            (LinkState::Connected, LinkEvent::ConnectFailed),
            (LinkState::Disconnected, LinkEvent::TransportFailed),
        ] {
            let t = state.on(event, &policy);
            assert_eq!(t.next, state);
            assert_eq!(t.delay, Duration::ZERO);
        }
    }

    #[test]
    fn test_deadline_after_saturates() {
        let now = Instant::now();
        assert_eq!(deadline_after(now, Duration::from_secs(3)), now + Duration::from_secs(3));
        assert_eq!(deadline_after(now, Duration::MAX), now + MAX_DELAY);
    }

    #[test]
    fn test_reconnect_shorter_than_initial_retry() {
        let policy = RetryPolicy::default();
        assert!(policy.reconnect_delay < policy.connect_retry);
        assert!(!LinkState::default().is_connected());
    }
}
