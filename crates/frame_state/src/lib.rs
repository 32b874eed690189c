//! # Frame State
//!
//! The per-frame uniform block every shader program reads: view and
//! projection matrices, light and fog mode, camera position and the fixed
//! colormap override used for powerup and visor effects.
//!
//! ## Features
//!
//! - **Single shared buffer**: one fixed-size uniform buffer bound at a
//!   well-known slot, overwritten in place
//! - **Pass layering**: scene, overlay and HUD weapon passes each get the
//!   right subset of state without stale values leaking between them
//! - **Partial updates**: view matrix refreshes and per-draw colormap
//!   overrides transfer only the bytes that changed
//! - **Two update paths**: direct writes by handle, or bind-then-update,
//!   picked once per device
//!
//! ## Quick Start
//!
//! ```rust
//! use frame_state::prelude::*;
//!
//! fn main() -> Result<(), FrameStateError> {
//!     let transforms = ViewTransforms::default();
//!     let settings = RenderSettings::default();
//!     let colormaps = SpecialColormapTable::standard();
//!
//!     let mut frame_state = FrameStateBuffer::new(
//!         RecordingDevice::new(true),
//!         &FrameStateConfig::default(),
//!         &transforms,
//!     )?;
//!
//!     frame_state.enter_scene_mode(&SceneContext {
//!         transforms: &transforms,
//!         settings: &settings,
//!         camera: FixedVec3::from_units(0.0, 0.0, 41.0),
//!         fixed_colormap: CM_LITE,
//!         colormaps: &colormaps,
//!     })?;
//!     assert_eq!(frame_state.data().fixed_colormap_mode(), Some(FixedColormapMode::Color));
//!
//!     frame_state.enter_overlay_mode(&transforms, true)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod foundation;
pub mod config;
pub mod backend;
pub mod render;

/// Common imports for frame state users
pub mod prelude {
    pub use crate::{
        backend::{GpuBufferDevice, RecordingDevice, UpdatePath, VulkanUniformDevice},
        config::{Config, FrameStateConfig, RenderSettings},
        foundation::math::{FixedVec3, Mat4},
        render::{
            colormap::{CM_DEFAULT, CM_LITE, CM_TORCH},
            FixedColormapMode, FrameStateBuffer, FrameStateData, FrameStateError,
            SceneContext, SpecialColormap, SpecialColormapTable, TransformProvider,
            ViewTransforms,
        },
    };
}
