//! 跟踪执行装置
//!
//! 把 `ActuatorController` 和 `ScanStateMachine` 绑定为一个显式持有的结构，
//! 由控制循环独占；不存在全局可变状态，也不需要加锁。
//!
//! 运动命令总是先停止扫描再移动，保证下一次扫描步进不会与命令运动交错。

use pantrack_protocol::MovementEvent;
use pantrack_servo::{
    ActuatorController, Direction, PwmOutput, ScanConfig, ScanStateMachine, ServoConfig,
    ServoError,
};
use std::time::Instant;
use tracing::debug;

/// 一条事件产生的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    /// 比例移动到新角度
    Moved { angle: i32 },
    /// 保持当前角度
    Held { angle: i32 },
    /// 进入（或保持）扫描
    ScanStarted,
}

/// 舵机 + 扫描状态
#[derive(Debug)]
pub struct TrackingRig<O: PwmOutput> {
    actuator: ActuatorController<O>,
    scan: ScanStateMachine,
}

impl<O: PwmOutput> TrackingRig<O> {
    pub fn new(servo: ServoConfig, scan: ScanConfig, output: O) -> Self {
        Self {
            actuator: ActuatorController::new(servo, output),
            scan: ScanStateMachine::new(scan),
        }
    }

    pub fn actuator(&self) -> &ActuatorController<O> {
        &self.actuator
    }

    pub fn scan(&self) -> &ScanStateMachine {
        &self.scan
    }

    pub fn angle(&self) -> i32 {
        self.actuator.angle()
    }

    /// 按事件状态分派
    ///
    /// 输出后端故障时角度已更新，错误交给调用方记录。
    pub fn apply(&mut self, event: &MovementEvent, now: Instant) -> Result<Motion, ServoError> {
        if !event.status().is_commanded() {
            self.scan.start_at(now);
            return Ok(Motion::ScanStarted);
        }

        // 命令运动先停止扫描，再移动或保持
        self.scan.stop();
        match event.direction() {
            Some(direction) => self.step_toward(direction, event.offset()),
            None => Ok(Motion::Held {
                angle: self.actuator.angle(),
            }),
        }
    }

    fn step_toward(&mut self, direction: Direction, offset: f64) -> Result<Motion, ServoError> {
        let from = self.actuator.angle();
        let result = self.actuator.move_proportional(direction, offset.abs());
        debug!(?direction, offset, from, to = self.actuator.angle(), "Proportional move");
        result.map(|()| Motion::Moved {
            angle: self.actuator.angle(),
        })
    }

    /// 扫描步进（未激活或未到间隔时无操作）
    pub fn tick(&mut self, now: Instant) -> Result<bool, ServoError> {
        self.scan.tick(now, &mut self.actuator)
    }

    /// 回到中位
    pub fn center(&mut self) -> Result<(), ServoError> {
        self.actuator.center()
    }

    pub fn stop_scan(&mut self) {
        self.scan.stop();
    }

    /// 释放舵机
    pub fn release(&mut self) -> Result<(), ServoError> {
        self.actuator.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pantrack_protocol::MovementStatus;
    use pantrack_servo::{MockPwmOutput, PwmWrite};
    use std::time::Duration;

    fn rig() -> (TrackingRig<MockPwmOutput>, MockPwmOutput) {
        let mock = MockPwmOutput::new();
        (
            TrackingRig::new(ServoConfig::default(), ScanConfig::default(), mock.clone()),
            mock,
        )
    }

    #[test]
    fn test_move_left_uses_offset_magnitude() {
        let (mut rig, _) = rig();
        let event = MovementEvent::new(MovementStatus::MoveLeft, 0.9, -0.5, 0);
        assert_eq!(rig.apply(&event, Instant::now()).unwrap(), Motion::Moved { angle: 82 });
    }

    #[test]
    fn test_move_right_small_offset() {
        let (mut rig, _) = rig();
        // 1 + 7 * (0.12 / 0.4) = 3.1 → 3
        let event = MovementEvent::new(MovementStatus::MoveRight, 0.9, 0.12, 0);
        assert_eq!(rig.apply(&event, Instant::now()).unwrap(), Motion::Moved { angle: 93 });
    }

    #[test]
    fn test_centered_holds_and_stops_scan() {
        let (mut rig, mock) = rig();
        let now = Instant::now();
        rig.apply(&MovementEvent::no_face(0), now).unwrap();
        assert!(rig.scan().is_active());

        let motion = rig
            .apply(&MovementEvent::new(MovementStatus::Centered, 0.8, 0.01, 0), now)
            .unwrap();
        assert_eq!(motion, Motion::Held { angle: 90 });
        assert!(!rig.scan().is_active());
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn test_no_face_then_ticks() {
        let (mut rig, _) = rig();
        let t0 = Instant::now();
        assert_eq!(rig.apply(&MovementEvent::no_face(0), t0).unwrap(), Motion::ScanStarted);
        assert!(!rig.tick(t0).unwrap());
        assert!(rig.tick(t0 + Duration::from_millis(100)).unwrap());
        assert_eq!(rig.angle(), 92);
    }

    #[test]
    fn test_move_stops_active_scan() {
        let (mut rig, _) = rig();
        let t0 = Instant::now();
        rig.apply(&MovementEvent::no_face(0), t0).unwrap();
        assert!(rig.scan().is_active());

        let event = MovementEvent::new(MovementStatus::MoveRight, 0.9, 0.5, 0);
        assert_eq!(rig.apply(&event, t0).unwrap(), Motion::Moved { angle: 98 });
        assert!(!rig.scan().is_active());
        assert!(!rig.tick(t0 + Duration::from_millis(500)).unwrap());
        assert_eq!(rig.angle(), 98);
    }

    #[test]
    fn test_release_keeps_angle() {
        let (mut rig, mock) = rig();
        rig.center().unwrap();
        rig.release().unwrap();
        assert_eq!(rig.angle(), 90);
        assert_eq!(mock.writes(), vec![PwmWrite::Duty(77), PwmWrite::Release]);
    }
}
