//! Frame geometry
//!
//! Sizes and 2D affine transforms used for track orientation and
//! transition layer alignment.

use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }

    pub fn swapped(&self) -> Self {
        Self::new(self.height, self.width)
    }
}

/// Affine transform mapping `(x, y)` to `(a*x + c*y + tx, b*x + d*y + ty)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn rotation(radians: f64) -> Self {
        let (sin, cos) = radians.sin_cos();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    pub fn translation(tx: f64, ty: f64) -> Self {
        Self {
            tx,
            ty,
            ..Self::IDENTITY
        }
    }

    /// Apply `self` first, then `other`
    pub fn then(&self, other: &Transform) -> Transform {
        Transform {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            tx: self.tx * other.a + self.ty * other.c + other.tx,
            ty: self.tx * other.b + self.ty * other.d + other.ty,
        }
    }

    /// Rotation angle in radians, in `(-pi, pi]`
    pub fn angle(&self) -> f64 {
        self.b.atan2(self.a)
    }

    /// Rotation snapped to quarter turns, in `0..4`
    pub fn quarter_turns(&self) -> u8 {
        let turns = (self.angle() / FRAC_PI_2).round() as i64;
        turns.rem_euclid(4) as u8
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Bounding size of `size` after this transform
    pub fn apply_to_size(&self, size: Size) -> Size {
        Size::new(
            (self.a * size.width + self.c * size.height).abs(),
            (self.b * size.width + self.d * size.height).abs(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_rotation_angle_and_turns() {
        let t = Transform::rotation(FRAC_PI_2);
        assert!((t.angle() - FRAC_PI_2).abs() < 1e-9);
        assert_eq!(t.quarter_turns(), 1);
        assert_eq!(Transform::rotation(-FRAC_PI_2).quarter_turns(), 3);
        assert_eq!(Transform::rotation(PI).quarter_turns(), 2);
        assert_eq!(Transform::IDENTITY.quarter_turns(), 0);
    }

    #[test]
    fn test_portrait_rotation_swaps_size() {
        let size = Transform::rotation(FRAC_PI_2).apply_to_size(Size::new(1920.0, 1080.0));
        assert!((size.width - 1080.0).abs() < 1e-6);
        assert!((size.height - 1920.0).abs() < 1e-6);
    }

    #[test]
    fn test_then_applies_translation_last() {
        let t = Transform::rotation(FRAC_PI_2).then(&Transform::translation(1080.0, 0.0));
        assert!((t.tx - 1080.0).abs() < 1e-9);
        assert_eq!(t.quarter_turns(), 1);
    }
}
