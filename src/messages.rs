// Message types exchanged with teleop/scripts over zenoh

use serde::{Deserialize, Serialize};

// Command from teleop/scripts -> runtime
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum BodyCommand {
    /// Tripod-gait walk; displacement per half-step in the body frame (mm)
    Walk { x: f32, y: f32, step_time_ms: u32 },

    /// In-place tripod turn; radians per half-step
    Turn { angular: f32, step_time_ms: u32 },

    /// Body tilt, feet holding ground contact (radians)
    Tilt {
        roll: f32,
        pitch: f32,
        yaw: f32,
        time_ms: u32,
    },

    /// Body origin shift in the body frame (mm)
    Shift {
        x: f32,
        y: f32,
        z: f32,
        time_ms: u32,
    },

    /// Scripted sit choreography
    Sit,

    /// Every servo to its calibrated midpoint
    MidPose,

    /// Drop queued trajectories and hold the current pose
    Stop,
}

/// Health status published by the runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    LinkError,
}

/// Session bookkeeping published alongside health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub uptime_s: u64,
    pub idle_s: u64,
    pub power_cycles: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let cmd = BodyCommand::Walk {
            x: 15.0,
            y: 0.0,
            step_time_ms: 400,
        };
        let text = serde_json::to_string(&cmd).unwrap();
        assert!(text.contains("\"cmd\":\"walk\""));

        let back: BodyCommand = serde_json::from_str(&text).unwrap();
        assert_eq!(back, cmd);

        let stop: BodyCommand = serde_json::from_str(r#"{"cmd":"stop"}"#).unwrap();
        assert_eq!(stop, BodyCommand::Stop);
    }
}
