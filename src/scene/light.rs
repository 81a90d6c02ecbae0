//! Light types seen by shadow nodes

use glam::Vec3;

/// Light type with its type-specific parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    /// Infinitely far light (like the sun)
    Directional,
    Point,
    Spot {
        inner_angle: f32, // radians
        outer_angle: f32, // radians
    },
}

/// A light as reported by the scene
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub position: Vec3,
    pub direction: Vec3,
    pub radius: f32,
    pub casts_shadows: bool,
    /// ANDed with the visibility mask of a shadow node's render_scene passes
    pub visibility_flags: u32,
}

impl Light {
    pub fn directional(direction: Vec3) -> Self {
        Self {
            kind: LightKind::Directional,
            position: Vec3::ZERO,
            direction: direction.normalize_or_zero(),
            radius: f32::INFINITY,
            casts_shadows: true,
            visibility_flags: u32::MAX,
        }
    }

    pub fn point(position: Vec3, radius: f32) -> Self {
        Self {
            kind: LightKind::Point,
            position,
            direction: -Vec3::Y,
            radius,
            casts_shadows: true,
            visibility_flags: u32::MAX,
        }
    }

    pub fn spot(
        position: Vec3,
        direction: Vec3,
        radius: f32,
        inner_angle: f32,
        outer_angle: f32,
    ) -> Self {
        Self {
            kind: LightKind::Spot {
                inner_angle,
                outer_angle,
            },
            position,
            direction: direction.normalize_or_zero(),
            radius,
            casts_shadows: true,
            visibility_flags: u32::MAX,
        }
    }

    pub fn with_shadows(mut self, casts_shadows: bool) -> Self {
        self.casts_shadows = casts_shadows;
        self
    }

    pub fn with_visibility_flags(mut self, flags: u32) -> Self {
        self.visibility_flags = flags;
        self
    }

    /// Distance from `point` to the light's bounding sphere.
    ///
    /// Directional lights are always closest.
    pub fn distance_to(&self, point: Vec3) -> f32 {
        match self.kind {
            LightKind::Directional => f32::NEG_INFINITY,
            LightKind::Point | LightKind::Spot { .. } => point.distance(self.position) - self.radius,
        }
    }
}
