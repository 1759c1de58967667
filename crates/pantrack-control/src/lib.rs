//! # Pantrack Control
//!
//! 控制层，把传输、协议、分类器和舵机组合起来：
//!
//! - `Dispatcher`: 控制端主循环（连接/重连、消息分派、扫描步进、有序停止）
//! - `ObservationBridge`: 识别端发布桥（观测 → 分类 → 发布）
//! - `TrackingRig`: 显式持有的舵机 + 扫描状态
//! - `LinkState`: 连接状态转换表
//! - `TrackerConfig`: TOML 配置文件

pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod link;
pub mod rig;

pub use bridge::{BridgeOutcome, BridgeStats, LineError, ObservationBridge, parse_observation_line};
pub use config::{ConfigError, TrackerConfig};
pub use dispatcher::{DispatchStats, Dispatcher, Handled, ShutdownReport, StepOutcome};
pub use link::{LinkEvent, LinkState, MAX_DELAY, RetryPolicy, Transition, deadline_after};
pub use rig::{Motion, TrackingRig};
