//! Math utilities and types
//!
//! Matrix and vector aliases over nalgebra, plus the 16.16 fixed-point
//! coordinates the engine uses for world positions.

pub use nalgebra::{Matrix4, Vector3, Vector4};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type (column-major storage)
pub type Mat4 = Matrix4<f32>;

/// 16.16 fixed-point scalar
pub type Fixed = i32;

/// Number of fractional bits in a [`Fixed`] value
pub const FRACBITS: u32 = 16;

/// The fixed-point representation of 1.0
pub const FRACUNIT: Fixed = 1 << FRACBITS;

/// Convert a fixed-point value to floating point
#[inline]
pub fn fixed_to_float(value: Fixed) -> f32 {
    value as f32 / FRACUNIT as f32
}

/// Convert a floating-point value to fixed point, truncating toward zero
#[inline]
pub fn float_to_fixed(value: f32) -> Fixed {
    (value * FRACUNIT as f32) as Fixed
}

/// World-space position in fixed-point coordinates (Z is up)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixedVec3 {
    /// World X
    pub x: Fixed,
    /// World Y
    pub y: Fixed,
    /// World Z (height)
    pub z: Fixed,
}

impl FixedVec3 {
    /// Create a position from raw fixed-point components
    pub const fn new(x: Fixed, y: Fixed, z: Fixed) -> Self {
        Self { x, y, z }
    }

    /// Create a position from floating-point world units
    pub fn from_units(x: f32, y: f32, z: f32) -> Self {
        Self::new(float_to_fixed(x), float_to_fixed(y), float_to_fixed(z))
    }

    /// Floating-point position in shader order: height goes in slot 1,
    /// world Y in slot 2.
    pub fn to_shader_order(self) -> Vec3 {
        Vec3::new(
            fixed_to_float(self.x),
            fixed_to_float(self.z),
            fixed_to_float(self.y),
        )
    }
}
