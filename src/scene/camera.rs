//! Cameras and view comparison

use glam::{Mat4, Vec3};

/// Camera projection type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        bottom: f32,
        top: f32,
        near: f32,
        far: f32,
    },
}

impl Default for Projection {
    fn default() -> Self {
        Projection::Perspective {
            fov_y: std::f32::consts::FRAC_PI_4, // 45 degrees
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Projection {
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Projection::Perspective {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    pub fn orthographic(width: f32, height: f32, near: f32, far: f32) -> Self {
        let half_w = width / 2.0;
        let half_h = height / 2.0;
        Projection::Orthographic {
            left: -half_w,
            right: half_w,
            bottom: -half_h,
            top: half_h,
            near,
            far,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        match *self {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => Mat4::perspective_rh(fov_y, aspect, near, far),
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                near,
                far,
            } => Mat4::orthographic_rh(left, right, bottom, top, near, far),
        }
    }

    pub fn near(&self) -> f32 {
        match self {
            Projection::Perspective { near, .. } => *near,
            Projection::Orthographic { near, .. } => *near,
        }
    }

    pub fn far(&self) -> f32 {
        match self {
            Projection::Perspective { far, .. } => *far,
            Projection::Orthographic { far, .. } => *far,
        }
    }

    /// Half width and half height of the view volume at `depth` along the view direction.
    pub fn half_extents_at(&self, depth: f32) -> (f32, f32) {
        match *self {
            Projection::Perspective { fov_y, aspect, .. } => {
                let half_h = depth * (fov_y * 0.5).tan();
                (half_h * aspect, half_h)
            }
            Projection::Orthographic {
                left,
                right,
                bottom,
                top,
                ..
            } => ((right - left) * 0.5, (top - bottom) * 0.5),
        }
    }

    /// Largest relative difference between the parameters of two projections.
    ///
    /// Projections of different types are infinitely apart.
    fn relative_difference(&self, other: &Projection) -> f32 {
        fn rel(a: f32, b: f32) -> f32 {
            (a - b).abs() / a.abs().max(b.abs()).max(f32::EPSILON)
        }
        match (*self, *other) {
            (
                Projection::Perspective {
                    fov_y: f0,
                    aspect: a0,
                    near: n0,
                    far: x0,
                },
                Projection::Perspective {
                    fov_y: f1,
                    aspect: a1,
                    near: n1,
                    far: x1,
                },
            ) => rel(f0, f1).max(rel(a0, a1)).max(rel(n0, n1)).max(rel(x0, x1)),
            (
                Projection::Orthographic {
                    left: l0,
                    right: r0,
                    bottom: b0,
                    top: t0,
                    near: n0,
                    far: x0,
                },
                Projection::Orthographic {
                    left: l1,
                    right: r1,
                    bottom: b1,
                    top: t1,
                    near: n1,
                    far: x1,
                },
            ) => rel(l0, l1)
                .max(rel(r0, r1))
                .max(rel(b0, b1))
                .max(rel(t0, t1))
                .max(rel(n0, n1))
                .max(rel(x0, x1)),
            _ => f32::INFINITY,
        }
    }
}

/// How close two cameras must be for shadow maps rendered for one to be
/// reused for the other.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTolerance {
    /// Maximum eye position distance, in world units
    pub position: f32,
    /// Maximum angle between view directions (and between up vectors), in radians
    pub angle: f32,
    /// Maximum relative difference of any projection parameter
    pub projection_relative: f32,
}

impl Default for ViewTolerance {
    fn default() -> Self {
        Self {
            position: 1e-4,
            angle: 1e-4,
            projection_relative: 1e-5,
        }
    }
}

impl ViewTolerance {
    /// Only bit-identical views match.
    pub const EXACT: Self = Self {
        position: 0.0,
        angle: 0.0,
        projection_relative: 0.0,
    };
}

/// Camera for viewing the scene
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub projection: Projection,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn look_at(&mut self, target: Vec3) {
        self.target = target;
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Get the view matrix
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Get the projection matrix
    pub fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }

    /// Get combined view-projection matrix
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Get the forward direction
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    /// Get the right direction
    pub fn right(&self) -> Vec3 {
        self.forward().cross(self.up).normalize_or_zero()
    }

    /// World-space corners of the view volume between two depths.
    ///
    /// The first four corners lie on the `near` plane, the last four on `far`.
    pub fn frustum_corners(&self, near: f32, far: f32) -> [Vec3; 8] {
        let forward = self.forward();
        let right = self.right();
        let up = right.cross(forward);
        let mut corners = [Vec3::ZERO; 8];
        for (plane, depth) in [near, far].into_iter().enumerate() {
            let (half_w, half_h) = self.projection.half_extents_at(depth);
            let center = self.position + forward * depth;
            for (i, (sx, sy)) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)]
                .into_iter()
                .enumerate()
            {
                corners[plane * 4 + i] = center + right * (half_w * sx) + up * (half_h * sy);
            }
        }
        corners
    }

    /// Whether two cameras see the same view within `tolerance`.
    pub fn approx_eq(&self, other: &Camera, tolerance: &ViewTolerance) -> bool {
        if self == other {
            return true;
        }
        if self.position.distance(other.position) > tolerance.position {
            return false;
        }
        // atan2 keeps small angles exact; acos of a rounded dot product does not
        let angle = |a: Vec3, b: Vec3| a.cross(b).length().atan2(a.dot(b));
        if angle(self.forward(), other.forward()) > tolerance.angle {
            return false;
        }
        if angle(self.up.normalize_or_zero(), other.up.normalize_or_zero()) > tolerance.angle {
            return false;
        }
        self.projection.relative_difference(&other.projection) <= tolerance.projection_relative
    }
}
