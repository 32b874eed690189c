//! Rendering state shared across shader programs
//!
//! - [`colormap`]: fixed colormap selectors and the override policy
//! - [`frame_state`]: the per-frame uniform block and its GPU buffer

pub mod colormap;
pub mod frame_state;

pub use colormap::{
    resolve_fixed_colormap, ColormapOverride, FixedColormap, FixedColormapMode,
    SpecialColormap, SpecialColormapTable,
};
pub use frame_state::{
    FrameStateBuffer, FrameStateData, FrameStateError, FrameStateResult, SceneContext,
    TransformProvider, ViewTransforms,
};
