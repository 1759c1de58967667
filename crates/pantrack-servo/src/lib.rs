//! # Pantrack Servo
//!
//! 云台舵机控制层：
//! - `ActuatorController`: 持有当前角度，把命令转换为钳位后的目标角度和占空比
//! - `ScanStateMachine`: 无目标时的自主往复扫描
//! - `PwmOutput`: 占空比输出的硬件抽象（信号生成由外部硬件层负责）
//!
//! 所有角度输入都被钳位而不是拒绝；`ServoError` 只表示输出后端的故障。

pub mod actuator;
pub mod config;
mod error;
pub mod output;
pub mod scan;

pub use actuator::{ActuatorController, FULL_SCALE_OFFSET};
pub use config::{ScanConfig, ServoConfig};
pub use error::ServoError;
#[cfg(any(test, feature = "mock"))]
pub use output::{MockPwmOutput, PwmWrite};
#[cfg(target_os = "linux")]
pub use output::SysfsPwmOutput;
pub use output::{DUTY_RESOLUTION, LogOutput, PwmOutput};
pub use pantrack_protocol::Direction;
pub use scan::{ScanMode, ScanStateMachine};
