//! Camera control for the rendered scene.
//!
//! [`CameraControlSurface`] owns camera state and arbitrates between direct
//! user input and agent commands. Agent tools reach it through the
//! [`CameraCapabilities`] trait so the dispatcher never depends on the
//! concrete camera.

mod projection;
mod surface;

use serde::Serialize;
use thiserror::Error;

pub use projection::{
    PITCH_LIMIT, SCENE_YAW_OFFSET, angles_from_direction, direction_from_angles,
    scene_alignment, uv_to_direction, wrap_angle,
};
pub use surface::{
    AgentCommand, CameraConfig, CameraControlSurface, CameraState, CollisionProbe, LOOK_DISTANCE,
    MoveKey, NoCollision, UserInput,
};

#[derive(Debug, Error, PartialEq)]
pub enum CameraError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

pub type CameraResult<T> = Result<T, CameraError>;

/// Whether an agent command took effect now or waits for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Started,
    Deferred,
}

/// Camera operations exposed to the agent.
pub trait CameraCapabilities: Send {
    /// Turn toward an equirectangular panorama coordinate in `[0, 1]²`.
    fn look_at(&mut self, u: f32, v: f32) -> CameraResult<CommandStatus>;

    fn reset_view(&mut self) -> CameraResult<CommandStatus>;

    /// Move along the view direction. Negative distances move backward.
    fn move_by(&mut self, distance: f32) -> CameraResult<CommandStatus>;

    fn stop(&mut self);
}
