//! Horizontal-plane geometry
//!
//! The world is y-up. Zone checks and circle placement only look at the
//! horizontal plane (x, z); altitude never matters for being "in the zone".

use glam::{Vec2, Vec3};
use rand::Rng;
use std::f32::consts::TAU;

/// Project a world position onto the horizontal plane
pub fn flatten(pos: Vec3) -> Vec2 {
    Vec2::new(pos.x, pos.z)
}

/// Distance between two points ignoring vertical offset
pub fn horizontal_distance(a: Vec3, b: Vec3) -> f32 {
    flatten(a).distance(flatten(b))
}

/// Unit vector on the horizontal plane for `angle` radians
pub fn horizontal_direction(angle: f32) -> Vec3 {
    Vec3::new(angle.cos(), 0.0, angle.sin())
}

/// A circle on the horizontal plane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: Vec3,
    pub radius: f32,
}

impl Circle {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self {
            center,
            radius: radius.max(0.0),
        }
    }

    /// Whether `pos` lies inside or on the circle (2D check)
    pub fn contains(&self, pos: Vec3) -> bool {
        horizontal_distance(pos, self.center) <= self.radius
    }

    /// Whether `other` fits entirely inside this circle
    pub fn encloses(&self, other: &Circle) -> bool {
        horizontal_distance(self.center, other.center) + other.radius <= self.radius
    }

    /// Linear interpolation of both centre and radius
    pub fn lerp(&self, target: &Circle, t: f32) -> Circle {
        let t = t.clamp(0.0, 1.0);
        Circle {
            center: self.center.lerp(target.center, t),
            radius: self.radius + (target.radius - self.radius) * t,
        }
    }
}

/// Uniformly distributed point inside a circle, at the circle's height
pub fn random_point_in_circle<R: Rng + ?Sized>(rng: &mut R, circle: &Circle) -> Vec3 {
    let angle = rng.gen_range(0.0..TAU);
    // sqrt keeps the density uniform over the area
    let distance = circle.radius * rng.gen::<f32>().sqrt();
    circle.center + horizontal_direction(angle) * distance
}

/// Spread `count` positions in a ring around `origin`, jittered so drops don't stack
pub fn scatter_around<R: Rng + ?Sized>(
    rng: &mut R,
    origin: Vec3,
    radius: f32,
    count: usize,
) -> Vec<Vec3> {
    if count == 0 {
        return Vec::new();
    }

    let step = TAU / count as f32;
    let start = rng.gen_range(0.0..TAU);
    (0..count)
        .map(|i| {
            let angle = start + step * i as f32 + rng.gen_range(-0.25..0.25) * step;
            let distance = radius * rng.gen_range(0.5..=1.0);
            origin + horizontal_direction(angle) * distance
        })
        .collect()
}
