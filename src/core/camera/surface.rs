use glam::{Vec2, Vec3};

use super::projection::{
    PITCH_LIMIT, angles_from_direction, direction_from_angles, uv_to_direction, wrap_angle,
};
use super::{CameraCapabilities, CameraError, CameraResult, CommandStatus};

/// Distance from the eye to the reported look target.
pub const LOOK_DISTANCE: f32 = 1.0;

/// Remaining look error below which interpolation snaps to the target.
const LOOK_EPSILON: f32 = 1e-3;

/// Remaining move distance below which the move completes.
const MOVE_EPSILON: f32 = 1e-3;

/// Shortfall of a clamped step that counts as a collision.
const COLLISION_TOLERANCE: f32 = 1e-4;

/// Time without user input after which the user counts as idle.
const USER_IDLE_GRACE_SECS: f32 = 0.25;

// =============================================================================
// Types
// =============================================================================

/// Camera position and look target, read once per frame by the renderer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub position: Vec3,
    pub target: Vec3,
}

/// Tuning for camera motion.
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Exponential approach rate of look interpolation (1/s)
    pub look_rate: f32,
    /// Cruise speed of agent moves (units/s)
    pub max_speed: f32,
    /// Floor speed near the end of a move so it always arrives
    pub min_speed: f32,
    pub acceleration: f32,
    pub deceleration: f32,
    /// Keyboard and joystick walking speed (units/s)
    pub walk_speed: f32,
    /// Radians per pixel of drag
    pub drag_sensitivity: f32,
    /// Radians per second at full joystick deflection
    pub joystick_turn_rate: f32,
    pub home_position: Vec3,
    pub home_yaw: f32,
    pub home_pitch: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            look_rate: 4.0,
            max_speed: 3.0,
            min_speed: 0.2,
            acceleration: 4.0,
            deceleration: 4.0,
            walk_speed: 2.0,
            drag_sensitivity: 0.005,
            joystick_turn_rate: 1.5,
            home_position: Vec3::new(0.0, 1.6, 0.0),
            home_yaw: 0.0,
            home_pitch: 0.0,
        }
    }
}

/// Keyboard movement keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKey {
    Forward,
    Backward,
    Left,
    Right,
}

impl MoveKey {
    fn index(self) -> usize {
        match self {
            MoveKey::Forward => 0,
            MoveKey::Backward => 1,
            MoveKey::Left => 2,
            MoveKey::Right => 3,
        }
    }
}

/// Direct user input. Any of these preempts agent motion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UserInput {
    KeyDown(MoveKey),
    KeyUp(MoveKey),
    /// Pointer drag in pixels
    Drag { dx: f32, dy: f32 },
    /// Absolute device orientation in radians
    Orientation { yaw: f32, pitch: f32 },
    /// Joystick deflection in `[-1, 1]`. `(0, 0)` releases it.
    Joystick { x: f32, y: f32 },
}

/// Agent command waiting for the user to go idle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AgentCommand {
    Look { yaw: f32, pitch: f32 },
    Move { distance: f32 },
    Reset,
}

/// Collision query for camera moves.
pub trait CollisionProbe: Send {
    /// Furthest point on the segment `from → to` the camera may occupy.
    fn clamp_step(&self, from: Vec3, to: Vec3) -> Vec3;
}

/// Probe for open scenes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCollision;

impl CollisionProbe for NoCollision {
    fn clamp_step(&self, _from: Vec3, to: Vec3) -> Vec3 {
        to
    }
}

#[derive(Debug, Clone, Copy)]
struct LookAnimation {
    yaw: f32,
    pitch: f32,
}

#[derive(Debug, Clone, Copy)]
struct MoveAnimation {
    direction: Vec3,
    remaining: f32,
    speed: f32,
}

// =============================================================================
// Control Surface
// =============================================================================

/// Camera state plus arbitration between user input and agent commands.
///
/// Agent commands animate over time in [`update`](Self::update). User
/// input cancels them on arrival. A command issued while the user is
/// active is held and starts once input has been idle for a short grace
/// period. Held looks and moves queue separately; a newer command of the
/// same kind replaces the held one, and a reset drops everything held
/// before it.
pub struct CameraControlSurface {
    config: CameraConfig,
    position: Vec3,
    yaw: f32,
    pitch: f32,
    look: Option<LookAnimation>,
    motion: Option<MoveAnimation>,
    pending: Vec<AgentCommand>,
    keys: [bool; 4],
    joystick: Vec2,
    idle_secs: f32,
    collision: Box<dyn CollisionProbe>,
}

impl CameraControlSurface {
    pub fn new(config: CameraConfig) -> Self {
        Self::with_collision(config, Box::new(NoCollision))
    }

    pub fn with_collision(config: CameraConfig, collision: Box<dyn CollisionProbe>) -> Self {
        Self {
            position: config.home_position,
            yaw: config.home_yaw,
            pitch: config.home_pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT),
            config,
            look: None,
            motion: None,
            pending: Vec::new(),
            keys: [false; 4],
            joystick: Vec2::ZERO,
            idle_secs: f32::INFINITY,
            collision,
        }
    }

    pub fn state(&self) -> CameraState {
        CameraState {
            position: self.position,
            target: self.position + self.view_direction() * LOOK_DISTANCE,
        }
    }

    pub fn view_direction(&self) -> Vec3 {
        direction_from_angles(self.yaw, self.pitch)
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn is_looking(&self) -> bool {
        self.look.is_some()
    }

    pub fn is_moving(&self) -> bool {
        self.motion.is_some()
    }

    /// Distance left in the current agent move, if any.
    pub fn remaining_move(&self) -> Option<f32> {
        self.motion.map(|m| m.remaining)
    }

    /// Commands held until the user goes idle, in start order.
    pub fn pending_commands(&self) -> &[AgentCommand] {
        &self.pending
    }

    pub fn user_active(&self) -> bool {
        self.keys.iter().any(|&k| k)
            || self.joystick != Vec2::ZERO
            || self.idle_secs < USER_IDLE_GRACE_SECS
    }

    // -------------------------------------------------------------------------
    // Agent commands
    // -------------------------------------------------------------------------

    /// Turn toward a panorama coordinate.
    pub fn look_at(&mut self, u: f32, v: f32) -> CameraResult<CommandStatus> {
        if !u.is_finite() || !v.is_finite() {
            return Err(CameraError::InvalidArgument(
                "u and v must be finite numbers".to_string(),
            ));
        }
        let (yaw, pitch) = angles_from_direction(uv_to_direction(u, v));
        Ok(self.issue(AgentCommand::Look { yaw, pitch }))
    }

    /// Move along the horizontal view direction. Negative moves backward.
    pub fn move_by(&mut self, distance: f32) -> CameraResult<CommandStatus> {
        if !distance.is_finite() {
            return Err(CameraError::InvalidArgument(
                "distance must be a finite number".to_string(),
            ));
        }
        if distance.abs() < MOVE_EPSILON {
            return Err(CameraError::InvalidArgument(
                "distance must be non-zero".to_string(),
            ));
        }
        Ok(self.issue(AgentCommand::Move { distance }))
    }

    /// Return to the home position and orientation.
    pub fn reset(&mut self) -> CommandStatus {
        self.issue(AgentCommand::Reset)
    }

    /// Halt every agent animation and drop any held command.
    pub fn stop(&mut self) {
        self.look = None;
        self.motion = None;
        self.pending.clear();
    }

    fn issue(&mut self, command: AgentCommand) -> CommandStatus {
        if self.user_active() {
            tracing::debug!(?command, "User active, deferring camera command");
            self.hold(command);
            CommandStatus::Deferred
        } else {
            self.start(command);
            CommandStatus::Started
        }
    }

    fn hold(&mut self, command: AgentCommand) {
        let superseded: Vec<AgentCommand> = if command == AgentCommand::Reset {
            self.pending.drain(..).collect()
        } else {
            let kind = std::mem::discriminant(&command);
            let (replaced, kept): (Vec<_>, Vec<_>) = self
                .pending
                .drain(..)
                .partition(|held| std::mem::discriminant(held) == kind);
            self.pending = kept;
            replaced
        };
        for held in superseded {
            tracing::debug!(?held, ?command, "Deferred camera command superseded");
        }
        self.pending.push(command);
    }

    fn start(&mut self, command: AgentCommand) {
        match command {
            AgentCommand::Look { yaw, pitch } => {
                self.look = Some(LookAnimation { yaw, pitch });
            }
            AgentCommand::Move { distance } => {
                let forward = self.horizontal_forward();
                self.motion = Some(MoveAnimation {
                    direction: forward * distance.signum(),
                    remaining: distance.abs(),
                    speed: 0.0,
                });
            }
            AgentCommand::Reset => {
                self.look = None;
                self.motion = None;
                self.position = self.config.home_position;
                self.yaw = self.config.home_yaw;
                self.pitch = self.config.home_pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);
            }
        }
    }

    // -------------------------------------------------------------------------
    // User input
    // -------------------------------------------------------------------------

    pub fn handle_input(&mut self, input: UserInput) {
        if self.look.is_some() || self.motion.is_some() {
            tracing::debug!(?input, "User input preempted agent camera motion");
        }
        self.look = None;
        self.motion = None;

        match input {
            UserInput::KeyDown(key) => self.keys[key.index()] = true,
            UserInput::KeyUp(key) => self.keys[key.index()] = false,
            UserInput::Drag { dx, dy } => {
                self.yaw = wrap_angle(self.yaw - dx * self.config.drag_sensitivity);
                self.pitch = (self.pitch + dy * self.config.drag_sensitivity)
                    .clamp(-PITCH_LIMIT, PITCH_LIMIT);
            }
            UserInput::Orientation { yaw, pitch } => {
                self.yaw = wrap_angle(yaw);
                self.pitch = pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT);
            }
            UserInput::Joystick { x, y } => {
                self.joystick = Vec2::new(x.clamp(-1.0, 1.0), y.clamp(-1.0, 1.0));
            }
        }
        self.idle_secs = 0.0;
    }

    // -------------------------------------------------------------------------
    // Per-frame update
    // -------------------------------------------------------------------------

    /// Advance one frame of `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        if !dt.is_finite() || dt <= 0.0 {
            return;
        }

        let held = self.keys.iter().any(|&k| k) || self.joystick != Vec2::ZERO;
        if held {
            self.idle_secs = 0.0;
            self.apply_user_motion(dt);
        } else {
            self.idle_secs += dt;
        }

        if !self.user_active() && !self.pending.is_empty() {
            for command in std::mem::take(&mut self.pending) {
                tracing::debug!(?command, "User idle, starting deferred camera command");
                self.start(command);
            }
        }

        self.step_look(dt);
        self.step_move(dt);
    }

    fn apply_user_motion(&mut self, dt: f32) {
        if self.joystick.x != 0.0 {
            self.yaw =
                wrap_angle(self.yaw - self.joystick.x * self.config.joystick_turn_rate * dt);
        }

        let forward = self.horizontal_forward();
        let right = forward.cross(Vec3::Y);
        let mut wish = Vec3::ZERO;
        if self.keys[MoveKey::Forward.index()] {
            wish += forward;
        }
        if self.keys[MoveKey::Backward.index()] {
            wish -= forward;
        }
        if self.keys[MoveKey::Right.index()] {
            wish += right;
        }
        if self.keys[MoveKey::Left.index()] {
            wish -= right;
        }
        wish += forward * self.joystick.y;

        let wish = wish.clamp_length_max(1.0);
        if wish != Vec3::ZERO {
            let desired = self.position + wish * self.config.walk_speed * dt;
            self.position = self.collision.clamp_step(self.position, desired);
        }
    }

    fn step_look(&mut self, dt: f32) {
        let Some(look) = self.look else {
            return;
        };
        let alpha = 1.0 - (-self.config.look_rate * dt).exp();
        let yaw_error = wrap_angle(look.yaw - self.yaw);
        let pitch_error = look.pitch - self.pitch;

        if yaw_error.abs() < LOOK_EPSILON && pitch_error.abs() < LOOK_EPSILON {
            self.yaw = look.yaw;
            self.pitch = look.pitch;
            self.look = None;
            return;
        }
        self.yaw = wrap_angle(self.yaw + yaw_error * alpha);
        self.pitch = (self.pitch + pitch_error * alpha).clamp(-PITCH_LIMIT, PITCH_LIMIT);
    }

    fn step_move(&mut self, dt: f32) {
        let Some(mut motion) = self.motion else {
            return;
        };
        let cfg = &self.config;

        let profile = (2.0 * cfg.deceleration * motion.remaining)
            .sqrt()
            .min(cfg.max_speed)
            .max(cfg.min_speed);
        motion.speed = if motion.speed < profile {
            (motion.speed + cfg.acceleration * dt).min(profile)
        } else {
            profile
        };

        let step = (motion.speed * dt).min(motion.remaining);
        let desired = self.position + motion.direction * step;
        let allowed = self.collision.clamp_step(self.position, desired);
        self.position = allowed;

        if allowed.distance(desired) > COLLISION_TOLERANCE {
            tracing::debug!(remaining = motion.remaining, "Camera move blocked by collision");
            motion.remaining = 0.0;
        } else {
            motion.remaining -= step;
        }

        if motion.remaining < MOVE_EPSILON {
            motion.remaining = 0.0;
            self.motion = None;
        } else {
            self.motion = Some(motion);
        }
    }

    fn horizontal_forward(&self) -> Vec3 {
        Vec3::new(-self.yaw.sin(), 0.0, -self.yaw.cos())
    }
}

impl CameraCapabilities for CameraControlSurface {
    fn look_at(&mut self, u: f32, v: f32) -> CameraResult<CommandStatus> {
        CameraControlSurface::look_at(self, u, v)
    }

    fn reset_view(&mut self) -> CameraResult<CommandStatus> {
        Ok(self.reset())
    }

    fn move_by(&mut self, distance: f32) -> CameraResult<CommandStatus> {
        CameraControlSurface::move_by(self, distance)
    }

    fn stop(&mut self) {
        CameraControlSurface::stop(self)
    }
}
