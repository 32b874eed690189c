//! Fixed colormap selection
//!
//! A fixed colormap replaces normal sector lighting with a uniform color
//! transform for the whole view: light amplification visors, torches,
//! invulnerability and similar powerups. The renderer carries the active
//! effect as a raw integer selector; this module decodes that selector and
//! turns it into the override the shaders consume.

use serde::{Deserialize, Serialize};

/// Selector value for normal lighting
pub const CM_DEFAULT: i32 = 0;
/// First selector value that indexes the special colormap table
pub const CM_FIRSTSPECIALCOLORMAP: i32 = 1;
/// Selector value for the light amplification visor
pub const CM_LITE: i32 = 0x2000_0000;
/// Base selector value for torch light; values above it carry the flicker
pub const CM_TORCH: i32 = 0x2000_0010;

/// Fixed colormap tag as the shaders see it
#[repr(i32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FixedColormapMode {
    /// Normal lighting
    #[default]
    Default = 0,
    /// Solid color from the colormap start color
    Color = 1,
    /// Blend between the start color and start + range
    ColorRange = 2,
    /// Fog layer over a subtractively blended sprite
    FogLayer = 3,
}

impl FixedColormapMode {
    /// Raw value written into the frame state record
    pub const fn as_raw(self) -> i32 {
        self as i32
    }
}

/// Start and end color of a range-based colormap
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpecialColormap {
    /// Color for the darkest input
    pub start: [f32; 3],
    /// Color for the brightest input
    pub end: [f32; 3],
}

impl SpecialColormap {
    /// Create a colormap from its start and end colors
    pub const fn new(start: [f32; 3], end: [f32; 3]) -> Self {
        Self { start, end }
    }

    /// Per-channel `end - start`
    pub fn range(&self) -> [f32; 3] {
        [
            self.end[0] - self.start[0],
            self.end[1] - self.start[1],
            self.end[2] - self.start[2],
        ]
    }
}

/// Special colormaps indexed by `selector - CM_FIRSTSPECIALCOLORMAP`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpecialColormapTable {
    entries: Vec<SpecialColormap>,
}

impl SpecialColormapTable {
    /// Build a table from its entries
    pub fn new(entries: Vec<SpecialColormap>) -> Self {
        Self { entries }
    }

    /// The built-in colormaps: inverse (invulnerability), gold, red,
    /// green-white and blue.
    pub fn standard() -> Self {
        Self::new(vec![
            SpecialColormap::new([1.0, 1.0, 1.0], [0.0, 0.0, 0.0]),
            SpecialColormap::new([0.0, 0.0, 0.0], [1.5, 0.75, 0.0]),
            SpecialColormap::new([0.0, 0.0, 0.0], [1.5, 0.0, 0.0]),
            SpecialColormap::new([0.0, 0.0, 0.0], [1.25, 1.5, 1.0]),
            SpecialColormap::new([0.0, 0.0, 0.0], [0.0, 0.0, 1.5]),
        ])
    }

    /// Append an entry and return the selector that activates it
    pub fn push(&mut self, colormap: SpecialColormap) -> i32 {
        self.entries.push(colormap);
        self.max_selector() - 1
    }

    /// Entry at `index`
    pub fn get(&self, index: usize) -> Option<&SpecialColormap> {
        self.entries.get(index)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One past the last selector value that maps into this table.
    /// Saturates rather than wrapping for tables too large to address.
    pub fn max_selector(&self) -> i32 {
        i32::try_from(self.entries.len())
            .map_or(i32::MAX, |len| len.saturating_add(CM_FIRSTSPECIALCOLORMAP))
    }
}

/// Decoded fixed colormap selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedColormap {
    /// Normal lighting
    Default,
    /// Entry of the special colormap table
    Special(usize),
    /// Light amplification visor
    Lite,
    /// Torch light with its current flicker step
    Torch {
        /// Flicker step; 7 is the darkest
        flicker: i32,
    },
}

impl FixedColormap {
    /// Decode a raw selector against a special colormap table.
    /// Torch takes precedence over lite, lite over the table.
    pub fn from_selector(selector: i32, table: &SpecialColormapTable) -> Self {
        if selector > CM_TORCH {
            Self::Torch { flicker: selector - CM_TORCH }
        } else if selector == CM_LITE {
            Self::Lite
        } else if (CM_FIRSTSPECIALCOLORMAP..table.max_selector()).contains(&selector) {
            usize::try_from(selector - CM_FIRSTSPECIALCOLORMAP).map_or(Self::Default, Self::Special)
        } else {
            Self::Default
        }
    }
}

/// What a scene pass writes into the fixed colormap fields
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ColormapOverride {
    /// No override; the colors are left as they were
    None,
    /// Solid color written into the start color
    Solid([f32; 3]),
    /// Color range from a special colormap
    Range(SpecialColormap),
}

impl ColormapOverride {
    /// Shader tag for this override
    pub const fn mode(&self) -> FixedColormapMode {
        match self {
            Self::None => FixedColormapMode::Default,
            Self::Solid(_) => FixedColormapMode::Color,
            Self::Range(_) => FixedColormapMode::ColorRange,
        }
    }
}

/// Resolve the override for a scene pass.
///
/// Recomputed from scratch on every call; nothing carries over between
/// passes.
pub fn resolve_fixed_colormap(
    selector: FixedColormap,
    enhanced_nightvision: bool,
    table: &SpecialColormapTable,
) -> ColormapOverride {
    match selector {
        FixedColormap::Torch { flicker } => {
            let level = (0.8 + (7 - flicker) as f32 / 70.0).min(1.0);
            let mut color = [level; 3];
            if enhanced_nightvision {
                color[2] *= 0.75;
            }
            ColormapOverride::Solid(color)
        }
        FixedColormap::Lite if enhanced_nightvision => ColormapOverride::Solid([0.375, 1.0, 0.375]),
        FixedColormap::Lite => ColormapOverride::Solid([1.0, 1.0, 1.0]),
        FixedColormap::Special(index) => table
            .get(index)
            .map_or(ColormapOverride::None, |colormap| ColormapOverride::Range(*colormap)),
        FixedColormap::Default => ColormapOverride::None,
    }
}
