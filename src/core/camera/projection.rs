//! Mapping between panorama coordinates and view directions.
//!
//! The camera looks down -Z at zero yaw and pitch, with +Y up. Panorama
//! coordinates are equirectangular: `u` runs linearly over longitude and
//! `v` over latitude, with `(0.5, 0.5)` at the image center.

use std::f32::consts::{FRAC_PI_2, PI, TAU};

use glam::{Quat, Vec3};

/// Yaw between the panorama's center column and the scene's forward axis.
pub const SCENE_YAW_OFFSET: f32 = -FRAC_PI_2;

/// Pitch stays just short of the poles so yaw remains defined.
pub const PITCH_LIMIT: f32 = FRAC_PI_2 - 0.01;

/// Fixed rotation from panorama space into scene space.
pub fn scene_alignment() -> Quat {
    Quat::from_rotation_y(SCENE_YAW_OFFSET)
}

/// Unit view direction for a panorama coordinate, in scene space.
///
/// Coordinates outside `[0, 1]` are clamped.
pub fn uv_to_direction(u: f32, v: f32) -> Vec3 {
    let u = u.clamp(0.0, 1.0);
    let v = v.clamp(0.0, 1.0);
    let lon = (u - 0.5) * TAU;
    let lat = (0.5 - v) * PI;

    let panorama = Vec3::new(lat.cos() * lon.sin(), lat.sin(), -lat.cos() * lon.cos());
    (scene_alignment() * panorama).normalize()
}

/// View direction for a yaw/pitch pair.
pub fn direction_from_angles(yaw: f32, pitch: f32) -> Vec3 {
    Vec3::new(
        -yaw.sin() * pitch.cos(),
        pitch.sin(),
        -yaw.cos() * pitch.cos(),
    )
}

/// Yaw/pitch pair for a view direction. Pitch is clamped to [`PITCH_LIMIT`].
pub fn angles_from_direction(direction: Vec3) -> (f32, f32) {
    let d = direction.normalize_or_zero();
    if d == Vec3::ZERO {
        return (0.0, 0.0);
    }
    let yaw = (-d.x).atan2(-d.z);
    let pitch = d.y.clamp(-1.0, 1.0).asin().clamp(-PITCH_LIMIT, PITCH_LIMIT);
    (yaw, pitch)
}

/// Wrap an angle into `(-PI, PI]`.
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped <= -PI { wrapped + TAU } else { wrapped }
}
