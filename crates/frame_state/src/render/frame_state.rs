//! Per-frame uniform state
//!
//! Everything every shader needs for the current pass (view and projection
//! matrices, light and fog mode, camera position, fixed colormap override)
//! lives in one uniform block shared by all programs. [`FrameStateBuffer`]
//! keeps a CPU copy of that block and pushes it, or parts of it, to the GPU
//! when the renderer switches between scene, overlay and HUD weapon passes.

use std::mem::{offset_of, size_of};

use bytemuck::{Pod, Zeroable};

use crate::backend::{DeviceError, GpuBufferDevice, UpdatePath};
use crate::config::{FrameStateConfig, RenderSettings};
use crate::foundation::math::{FixedVec3, Mat4};
use crate::render::colormap::{
    resolve_fixed_colormap, ColormapOverride, FixedColormap, FixedColormapMode,
    SpecialColormap, SpecialColormapTable,
};

/// Frame state errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameStateError {
    /// The GPU device rejected a buffer operation
    #[error("GPU buffer operation failed: {0}")]
    Device(#[from] DeviceError),
}

/// Result type for frame state operations
pub type FrameStateResult<T> = Result<T, FrameStateError>;

/// The uniform block as laid out on the GPU (std140 compatible)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameStateData {
    /// View matrix, column-major
    pub view_matrix: [f32; 16],
    /// Projection matrix, column-major
    pub projection_matrix: [f32; 16],
    /// Camera position in shader order; w is unused
    pub camera_pos: [f32; 4],
    /// Fixed colormap start color; alpha is always 1
    pub fixed_colormap_start: [f32; 4],
    /// Fixed colormap end minus start; alpha is always 1
    pub fixed_colormap_range: [f32; 4],
    /// Portal clip plane height
    pub clip_height: f32,
    /// Lighting algorithm selector
    pub light_mode: i32,
    /// Fog algorithm selector
    pub fog_mode: i32,
    /// [`FixedColormapMode`] tag
    pub fixed_colormap: i32,
}

const _: () = assert!(size_of::<FrameStateData>() == 192);

impl FrameStateData {
    /// Size of the record in bytes
    pub const SIZE: usize = size_of::<Self>();

    /// Byte offset of the view matrix
    pub const VIEW_MATRIX_OFFSET: usize = offset_of!(Self, view_matrix);

    /// Byte length of the view matrix
    pub const VIEW_MATRIX_SIZE: usize = size_of::<[f32; 16]>();

    /// Byte offset of the fixed colormap tag
    pub const FIXED_COLORMAP_OFFSET: usize = offset_of!(Self, fixed_colormap);

    /// A zeroed record with both colormap alpha channels set to 1
    pub fn new() -> Self {
        let mut data = Self::zeroed();
        data.fixed_colormap_start[3] = 1.0;
        data.fixed_colormap_range[3] = 1.0;
        data
    }

    /// Current fixed colormap tag, if it is one the shaders know
    pub fn fixed_colormap_mode(&self) -> Option<FixedColormapMode> {
        match self.fixed_colormap {
            0 => Some(FixedColormapMode::Default),
            1 => Some(FixedColormapMode::Color),
            2 => Some(FixedColormapMode::ColorRange),
            3 => Some(FixedColormapMode::FogLayer),
            _ => None,
        }
    }

    fn set_matrices(&mut self, transforms: &dyn TransformProvider) {
        self.view_matrix.copy_from_slice(transforms.view_matrix().as_slice());
        self.projection_matrix.copy_from_slice(transforms.projection_matrix().as_slice());
    }
}

impl Default for FrameStateData {
    fn default() -> Self {
        Self::new()
    }
}

/// Source of the current view and projection matrices
pub trait TransformProvider {
    /// Current view matrix
    fn view_matrix(&self) -> Mat4;
    /// Current projection matrix
    fn projection_matrix(&self) -> Mat4;
}

/// A fixed pair of matrices
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransforms {
    /// View matrix
    pub view: Mat4,
    /// Projection matrix
    pub projection: Mat4,
}

impl ViewTransforms {
    /// Create a transform pair
    pub const fn new(view: Mat4, projection: Mat4) -> Self {
        Self { view, projection }
    }
}

impl Default for ViewTransforms {
    fn default() -> Self {
        Self::new(Mat4::identity(), Mat4::identity())
    }
}

impl TransformProvider for ViewTransforms {
    fn view_matrix(&self) -> Mat4 {
        self.view
    }

    fn projection_matrix(&self) -> Mat4 {
        self.projection
    }
}

/// Everything a scene pass reads from the rest of the renderer
#[derive(Clone, Copy)]
pub struct SceneContext<'a> {
    /// Matrix source
    pub transforms: &'a dyn TransformProvider,
    /// Light/fog mode and night vision flag
    pub settings: &'a RenderSettings,
    /// Eye position in world space
    pub camera: FixedVec3,
    /// Raw fixed colormap selector
    pub fixed_colormap: i32,
    /// Table the selector indexes into
    pub colormaps: &'a SpecialColormapTable,
}

/// Owner of the shared per-frame uniform buffer
pub struct FrameStateBuffer<D: GpuBufferDevice> {
    device: D,
    buffer: D::Handle,
    binding: u32,
    update_path: UpdatePath,
    data: FrameStateData,
}

impl<D: GpuBufferDevice> FrameStateBuffer<D> {
    /// Allocate the buffer, bind it and upload an initial overlay state.
    pub fn new(
        mut device: D,
        config: &FrameStateConfig,
        transforms: &dyn TransformProvider,
    ) -> FrameStateResult<Self> {
        let update_path = UpdatePath::select(device.supports_direct_update(), config.prefer_direct_update);

        log::debug!(
            "Creating frame state buffer ({} bytes, binding {}, {:?})",
            FrameStateData::SIZE,
            config.uniform_binding,
            update_path
        );

        let buffer = device.create_uniform_buffer(FrameStateData::SIZE)?;
        if let Err(e) = device.bind_buffer_base(config.uniform_binding, buffer) {
            device.destroy_buffer(buffer);
            return Err(e.into());
        }

        let mut frame_state = Self {
            device,
            buffer,
            binding: config.uniform_binding,
            update_path,
            data: FrameStateData::new(),
        };
        frame_state.enter_overlay_mode(transforms, false)?;
        Ok(frame_state)
    }

    /// Gather the state for a 3D scene pass and upload the whole record.
    pub fn enter_scene_mode(&mut self, ctx: &SceneContext<'_>) -> FrameStateResult<()> {
        self.data.set_matrices(ctx.transforms);
        self.data.light_mode = ctx.settings.light_mode;
        self.data.fog_mode = ctx.settings.fog_mode;

        let camera = ctx.camera.to_shader_order();
        self.data.camera_pos[..3].copy_from_slice(camera.as_slice());
        // clip_height belongs to the portal code

        let selector = FixedColormap::from_selector(ctx.fixed_colormap, ctx.colormaps);
        match resolve_fixed_colormap(selector, ctx.settings.enhanced_nightvision, ctx.colormaps) {
            ColormapOverride::Solid(color) => {
                self.data.fixed_colormap = FixedColormapMode::Color.as_raw();
                self.data.fixed_colormap_start[..3].copy_from_slice(&color);
            }
            ColormapOverride::Range(colormap) => self.apply_color_range_override(&colormap),
            ColormapOverride::None => {
                self.data.fixed_colormap = FixedColormapMode::Default.as_raw();
            }
        }

        log::trace!("Scene frame state: fixed colormap {:?}", selector);
        self.upload_all()
    }

    /// Set up the record for a 2D pass and upload it.
    ///
    /// Lighting, fog, camera and clip height are cleared. The fixed colormap
    /// is cleared too unless this is the HUD weapon pass, which keeps the
    /// override of the scene it is drawn over.
    pub fn enter_overlay_mode(&mut self, transforms: &dyn TransformProvider, weapon: bool) -> FrameStateResult<()> {
        self.data.set_matrices(transforms);
        self.data.light_mode = 0;
        self.data.fog_mode = 0;
        self.data.camera_pos = [0.0; 4];
        self.data.clip_height = 0.0;

        if !weapon {
            self.data.fixed_colormap = FixedColormapMode::Default.as_raw();
        }

        log::trace!("Overlay frame state (weapon: {})", weapon);
        self.upload_all()
    }

    /// Re-read the view matrix and upload only its bytes.
    pub fn refresh_view_matrix_only(&mut self, transforms: &dyn TransformProvider) -> FrameStateResult<()> {
        self.data.view_matrix.copy_from_slice(transforms.view_matrix().as_slice());

        let bytes = bytemuck::bytes_of(&self.data.view_matrix);
        Self::write_range(&mut self.device, self.buffer, self.update_path, FrameStateData::VIEW_MATRIX_OFFSET, bytes)
    }

    /// Replace the fixed colormap tag on the GPU for the next draw calls.
    ///
    /// Used for inverted sprites and for fog layers over subtractive
    /// sprites. The CPU copy is not touched; the caller restores the
    /// previous tag when done.
    pub fn override_colormap_for_draw_call(&mut self, mode: FixedColormapMode) -> FrameStateResult<()> {
        let raw = mode.as_raw();
        Self::write_range(
            &mut self.device,
            self.buffer,
            self.update_path,
            FrameStateData::FIXED_COLORMAP_OFFSET,
            bytemuck::bytes_of(&raw),
        )
    }

    /// Switch the CPU copy to a color range override. Nothing is uploaded.
    pub fn apply_color_range_override(&mut self, colormap: &SpecialColormap) {
        self.data.fixed_colormap = FixedColormapMode::ColorRange.as_raw();
        self.data.fixed_colormap_start[..3].copy_from_slice(&colormap.start);
        self.data.fixed_colormap_range[..3].copy_from_slice(&colormap.range());
    }

    /// Set the portal clip height; uploaded with the next scene pass.
    pub fn set_clip_height(&mut self, height: f32) {
        self.data.clip_height = height;
    }

    /// CPU copy of the record
    pub fn data(&self) -> &FrameStateData {
        &self.data
    }

    /// Update path chosen at construction
    pub fn update_path(&self) -> UpdatePath {
        self.update_path
    }

    /// GPU buffer handle
    pub fn buffer(&self) -> D::Handle {
        self.buffer
    }

    /// Binding slot the buffer is attached to
    pub fn binding(&self) -> u32 {
        self.binding
    }

    /// Device the buffer lives on
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutable access to the device, e.g. to attach a command buffer
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    fn upload_all(&mut self) -> FrameStateResult<()> {
        Self::write_range(&mut self.device, self.buffer, self.update_path, 0, bytemuck::bytes_of(&self.data))
    }

    fn write_range(
        device: &mut D,
        buffer: D::Handle,
        path: UpdatePath,
        offset: usize,
        bytes: &[u8],
    ) -> FrameStateResult<()> {
        match path {
            UpdatePath::DirectUpdate => device.write_buffer_range(buffer, offset, bytes)?,
            UpdatePath::BindThenUpdate => {
                device.bind_uniform_target(buffer)?;
                device.write_bound_range(offset, bytes)?;
            }
        }
        Ok(())
    }
}

impl<D: GpuBufferDevice> Drop for FrameStateBuffer<D> {
    fn drop(&mut self) {
        log::debug!("Destroying frame state buffer {:?}", self.buffer);
        self.device.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BufferId, DeviceCall, RecordingDevice};
    use crate::foundation::math::{Vec3, FRACUNIT};
    use crate::render::colormap::{CM_DEFAULT, CM_LITE, CM_TORCH};
    use approx::assert_relative_eq;

    fn scene_transforms() -> ViewTransforms {
        ViewTransforms::new(
            Mat4::new_translation(&Vec3::new(-10.0, -20.0, -30.0)),
            Mat4::new_perspective(16.0 / 9.0, 1.2, 5.0, 65536.0),
        )
    }

    fn hud_transforms() -> ViewTransforms {
        ViewTransforms::new(
            Mat4::identity(),
            Mat4::new_orthographic(0.0, 320.0, 200.0, 0.0, -1.0, 1.0),
        )
    }

    struct Scene {
        transforms: ViewTransforms,
        settings: RenderSettings,
        colormaps: SpecialColormapTable,
        camera: FixedVec3,
        fixed_colormap: i32,
    }

    impl Scene {
        fn new() -> Self {
            Self {
                transforms: scene_transforms(),
                settings: RenderSettings { light_mode: 2, fog_mode: 1, enhanced_nightvision: false },
                colormaps: SpecialColormapTable::standard(),
                camera: FixedVec3::new(64 * FRACUNIT, -32 * FRACUNIT, 41 * FRACUNIT),
                fixed_colormap: CM_DEFAULT,
            }
        }

        fn ctx(&self) -> SceneContext<'_> {
            SceneContext {
                transforms: &self.transforms,
                settings: &self.settings,
                camera: self.camera,
                fixed_colormap: self.fixed_colormap,
                colormaps: &self.colormaps,
            }
        }
    }

    fn gpu_record(device: &RecordingDevice, buffer: BufferId) -> FrameStateData {
        bytemuck::pod_read_unaligned(device.contents(buffer).unwrap())
    }

    fn assert_alpha_fixed(data: &FrameStateData) {
        assert_eq!(data.fixed_colormap_start[3], 1.0);
        assert_eq!(data.fixed_colormap_range[3], 1.0);
    }

    #[test]
    fn test_record_layout() {
        assert_eq!(FrameStateData::SIZE, 192);
        assert_eq!(FrameStateData::VIEW_MATRIX_OFFSET, 0);
        assert_eq!(FrameStateData::VIEW_MATRIX_SIZE, 64);
        assert_eq!(offset_of!(FrameStateData, projection_matrix), 64);
        assert_eq!(offset_of!(FrameStateData, camera_pos), 128);
        assert_eq!(offset_of!(FrameStateData, fixed_colormap_start), 144);
        assert_eq!(offset_of!(FrameStateData, fixed_colormap_range), 160);
        assert_eq!(offset_of!(FrameStateData, clip_height), 176);
        assert_eq!(FrameStateData::FIXED_COLORMAP_OFFSET, 188);
    }

    #[test]
    fn test_construction_allocates_binds_and_uploads() {
        crate::foundation::logging::init_for_tests();
        let mut device = RecordingDevice::new(true);
        let config = FrameStateConfig { uniform_binding: 3, ..FrameStateConfig::default() };
        let hud = hud_transforms();

        let frame_state = FrameStateBuffer::new(&mut device, &config, &hud).unwrap();
        let buffer = frame_state.buffer();

        assert_eq!(frame_state.binding(), 3);
        assert_eq!(frame_state.update_path(), UpdatePath::DirectUpdate);
        assert_eq!(
            frame_state.device().calls(),
            &[
                DeviceCall::Create { buffer, size: 192 },
                DeviceCall::BindBase { slot: 3, buffer },
                DeviceCall::WriteDirect { buffer, offset: 0, len: 192 },
            ]
        );

        let data = *frame_state.data();
        assert_eq!(data.projection_matrix[..], *hud.projection.as_slice());
        assert_eq!(data.fixed_colormap, 0);
        assert_eq!(data.fixed_colormap_start, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(data.fixed_colormap_range, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(gpu_record(frame_state.device(), buffer), data);
    }

    #[test]
    fn test_buffer_is_destroyed_exactly_once() {
        let mut device = RecordingDevice::new(false);
        let buffer = {
            let frame_state =
                FrameStateBuffer::new(&mut device, &FrameStateConfig::default(), &hud_transforms()).unwrap();
            frame_state.buffer()
        };

        let destroys = device
            .calls()
            .iter()
            .filter(|call| matches!(call, DeviceCall::Destroy { .. }))
            .count();
        assert_eq!(destroys, 1);
        assert_eq!(device.calls().last(), Some(&DeviceCall::Destroy { buffer }));
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_failed_bind_releases_new_buffer() {
        let mut device = RecordingDevice::new(true);
        device.fail_next_bind();

        let failed = matches!(
            FrameStateBuffer::new(&mut device, &FrameStateConfig::default(), &hud_transforms()),
            Err(FrameStateError::Device(DeviceError::Api(_)))
        );

        assert!(failed);
        assert_eq!(device.live_buffers(), 0);
        assert!(matches!(device.calls(), [DeviceCall::Create { .. }, DeviceCall::Destroy { .. }]));
    }

    #[test]
    fn test_preference_forces_bind_then_update() {
        let config = FrameStateConfig { prefer_direct_update: false, ..FrameStateConfig::default() };
        let frame_state =
            FrameStateBuffer::new(RecordingDevice::new(true), &config, &hud_transforms()).unwrap();

        assert_eq!(frame_state.update_path(), UpdatePath::BindThenUpdate);
    }

    #[test]
    fn test_scene_mode_copies_collaborator_state() {
        let scene = Scene::new();
        let mut frame_state =
            FrameStateBuffer::new(RecordingDevice::new(true), &FrameStateConfig::default(), &hud_transforms()).unwrap();

        frame_state.enter_scene_mode(&scene.ctx()).unwrap();
        let data = *frame_state.data();

        assert_eq!(data.view_matrix[..], *scene.transforms.view.as_slice());
        assert_eq!(data.projection_matrix[..], *scene.transforms.projection.as_slice());
        assert_eq!(data.light_mode, 2);
        assert_eq!(data.fog_mode, 1);
        assert_eq!(data.camera_pos, [64.0, 41.0, -32.0, 0.0]);
        assert_eq!(data.fixed_colormap_mode(), Some(FixedColormapMode::Default));
        assert_eq!(gpu_record(frame_state.device(), frame_state.buffer()), data);
    }

    #[test]
    fn test_scene_mode_keeps_clip_height() {
        let scene = Scene::new();
        let mut frame_state =
            FrameStateBuffer::new(RecordingDevice::new(true), &FrameStateConfig::default(), &hud_transforms()).unwrap();

        frame_state.set_clip_height(128.0);
        frame_state.enter_scene_mode(&scene.ctx()).unwrap();

        assert_eq!(frame_state.data().clip_height, 128.0);
        assert_eq!(gpu_record(frame_state.device(), frame_state.buffer()).clip_height, 128.0);
    }

    #[test]
    fn test_scene_mode_lite_with_nightvision() {
        let mut scene = Scene::new();
        scene.fixed_colormap = CM_LITE;
        scene.settings.enhanced_nightvision = true;
        let mut frame_state =
            FrameStateBuffer::new(RecordingDevice::new(true), &FrameStateConfig::default(), &hud_transforms()).unwrap();

        frame_state.enter_scene_mode(&scene.ctx()).unwrap();
        let data = frame_state.data();

        assert_eq!(data.fixed_colormap_mode(), Some(FixedColormapMode::Color));
        assert_eq!(data.fixed_colormap_start, [0.375, 1.0, 0.375, 1.0]);
    }

    #[test]
    fn test_scene_mode_torch_flicker() {
        let mut scene = Scene::new();
        scene.fixed_colormap = CM_TORCH + 7;
        let mut frame_state =
            FrameStateBuffer::new(RecordingDevice::new(true), &FrameStateConfig::default(), &hud_transforms()).unwrap();

        frame_state.enter_scene_mode(&scene.ctx()).unwrap();
        let data = frame_state.data();

        assert_eq!(data.fixed_colormap_mode(), Some(FixedColormapMode::Color));
        for channel in &data.fixed_colormap_start[..3] {
            assert_relative_eq!(*channel, 0.8, epsilon = 1e-6);
        }
        assert_alpha_fixed(data);
    }

    #[test]
    fn test_scene_mode_special_colormap_range() {
        let mut scene = Scene::new();
        scene.colormaps = SpecialColormapTable::default();
        scene.fixed_colormap = scene.colormaps.push(SpecialColormap::new([0.2, 0.2, 0.2], [0.8, 0.2, 0.2]));
        let mut frame_state =
            FrameStateBuffer::new(RecordingDevice::new(false), &FrameStateConfig::default(), &hud_transforms()).unwrap();

        frame_state.enter_scene_mode(&scene.ctx()).unwrap();
        let data = *frame_state.data();

        assert_eq!(data.fixed_colormap_mode(), Some(FixedColormapMode::ColorRange));
        assert_eq!(data.fixed_colormap_start, [0.2, 0.2, 0.2, 1.0]);
        assert_relative_eq!(data.fixed_colormap_range[0], 0.6, epsilon = 1e-6);
        assert_eq!(data.fixed_colormap_range[1], 0.0);
        assert_eq!(data.fixed_colormap_range[2], 0.0);
        assert_eq!(data.fixed_colormap_range[3], 1.0);
        assert_eq!(gpu_record(frame_state.device(), frame_state.buffer()), data);
    }

    #[test]
    fn test_solid_override_keeps_previous_range() {
        let mut scene = Scene::new();
        scene.colormaps = SpecialColormapTable::default();
        let gold = scene.colormaps.push(SpecialColormap::new([0.0, 0.0, 0.0], [1.5, 0.75, 0.0]));
        let mut frame_state =
            FrameStateBuffer::new(RecordingDevice::new(true), &FrameStateConfig::default(), &hud_transforms()).unwrap();

        scene.fixed_colormap = gold;
        frame_state.enter_scene_mode(&scene.ctx()).unwrap();
        let range = frame_state.data().fixed_colormap_range;
        assert_eq!(range, [1.5, 0.75, 0.0, 1.0]);

        for selector in [CM_LITE, CM_TORCH + 4] {
            scene.fixed_colormap = selector;
            frame_state.enter_scene_mode(&scene.ctx()).unwrap();

            let data = *frame_state.data();
            assert_eq!(data.fixed_colormap_mode(), Some(FixedColormapMode::Color));
            assert_eq!(data.fixed_colormap_range, range);
            assert_eq!(gpu_record(frame_state.device(), frame_state.buffer()).fixed_colormap_range, range);
        }
    }

    #[test]
    fn test_apply_color_range_override_does_not_upload() {
        let mut device = RecordingDevice::new(true);
        let mut frame_state =
            FrameStateBuffer::new(&mut device, &FrameStateConfig::default(), &hud_transforms()).unwrap();
        let before = gpu_record(frame_state.device(), frame_state.buffer());
        let calls = frame_state.device().calls().len();

        frame_state.apply_color_range_override(&SpecialColormap::new([1.0, 1.0, 1.0], [0.0, 0.0, 0.0]));

        let data = frame_state.data();
        assert_eq!(data.fixed_colormap_mode(), Some(FixedColormapMode::ColorRange));
        assert_eq!(data.fixed_colormap_start, [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(data.fixed_colormap_range, [-1.0, -1.0, -1.0, 1.0]);
        assert_eq!(frame_state.device().calls().len(), calls);
        assert_eq!(gpu_record(frame_state.device(), frame_state.buffer()), before);
    }

    #[test]
    fn test_overlay_mode_clears_scene_state() {
        let mut scene = Scene::new();
        scene.fixed_colormap = CM_LITE;
        let mut frame_state =
            FrameStateBuffer::new(RecordingDevice::new(true), &FrameStateConfig::default(), &hud_transforms()).unwrap();
        frame_state.set_clip_height(-48.0);
        frame_state.enter_scene_mode(&scene.ctx()).unwrap();

        frame_state.enter_overlay_mode(&hud_transforms(), false).unwrap();
        let data = *frame_state.data();

        assert_eq!(data.fixed_colormap_mode(), Some(FixedColormapMode::Default));
        assert_eq!(data.light_mode, 0);
        assert_eq!(data.fog_mode, 0);
        assert_eq!(data.camera_pos, [0.0; 4]);
        assert_eq!(data.clip_height, 0.0);
        assert_eq!(gpu_record(frame_state.device(), frame_state.buffer()), data);
    }

    #[test]
    fn test_weapon_overlay_inherits_scene_colormap() {
        let mut scene = Scene::new();
        scene.fixed_colormap = 1;
        let mut frame_state =
            FrameStateBuffer::new(RecordingDevice::new(true), &FrameStateConfig::default(), &hud_transforms()).unwrap();
        frame_state.enter_scene_mode(&scene.ctx()).unwrap();
        let scene_data = *frame_state.data();

        frame_state.enter_overlay_mode(&hud_transforms(), true).unwrap();
        let data = *frame_state.data();

        assert_eq!(data.fixed_colormap, scene_data.fixed_colormap);
        assert_eq!(data.fixed_colormap_mode(), Some(FixedColormapMode::ColorRange));
        assert_eq!(data.fixed_colormap_start, scene_data.fixed_colormap_start);
        assert_eq!(data.fixed_colormap_range, scene_data.fixed_colormap_range);
        assert_eq!(data.light_mode, 0);
        assert_eq!(data.fog_mode, 0);
        assert_eq!(data.camera_pos, [0.0; 4]);
        assert_eq!(data.clip_height, 0.0);
    }

    #[test]
    fn test_weapon_overlay_after_plain_overlay_sees_no_override() {
        let mut scene = Scene::new();
        scene.fixed_colormap = CM_LITE;
        let mut frame_state =
            FrameStateBuffer::new(RecordingDevice::new(true), &FrameStateConfig::default(), &hud_transforms()).unwrap();

        frame_state.enter_scene_mode(&scene.ctx()).unwrap();
        frame_state.enter_overlay_mode(&hud_transforms(), false).unwrap();
        frame_state.enter_overlay_mode(&hud_transforms(), true).unwrap();

        assert_eq!(frame_state.data().fixed_colormap_mode(), Some(FixedColormapMode::Default));

        // A new scene pass re-resolves the override for the weapon
        frame_state.enter_scene_mode(&scene.ctx()).unwrap();
        frame_state.enter_overlay_mode(&hud_transforms(), true).unwrap();
        assert_eq!(frame_state.data().fixed_colormap_mode(), Some(FixedColormapMode::Color));
    }

    #[test]
    fn test_alpha_stays_fixed_across_passes() {
        let mut scene = Scene::new();
        let mut frame_state =
            FrameStateBuffer::new(RecordingDevice::new(true), &FrameStateConfig::default(), &hud_transforms()).unwrap();
        let selectors = [CM_LITE, 1, CM_TORCH + 2, 4, CM_DEFAULT, 5, CM_TORCH + 9];

        for (i, selector) in selectors.into_iter().enumerate() {
            scene.fixed_colormap = selector;
            scene.settings.enhanced_nightvision = i % 2 == 0;
            frame_state.enter_scene_mode(&scene.ctx()).unwrap();
            assert_alpha_fixed(frame_state.data());
            frame_state.enter_overlay_mode(&hud_transforms(), i % 3 == 0).unwrap();
            assert_alpha_fixed(frame_state.data());
        }
        assert_alpha_fixed(&gpu_record(frame_state.device(), frame_state.buffer()));
    }

    #[test]
    fn test_refresh_view_matrix_only_touches_view_bytes() {
        let mut scene = Scene::new();
        scene.fixed_colormap = 2;
        let mut device = RecordingDevice::new(true);
        let mut frame_state =
            FrameStateBuffer::new(&mut device, &FrameStateConfig::default(), &hud_transforms()).unwrap();
        frame_state.enter_scene_mode(&scene.ctx()).unwrap();
        let buffer = frame_state.buffer();
        let before_gpu = frame_state.device().contents(buffer).unwrap().to_vec();
        let before_cpu = *frame_state.data();

        let mirrored = ViewTransforms::new(
            Mat4::new_nonuniform_scaling(&Vec3::new(-1.0, 1.0, 1.0)) * scene.transforms.view,
            Mat4::identity(),
        );
        frame_state.device.clear_calls();
        frame_state.refresh_view_matrix_only(&mirrored).unwrap();

        assert_eq!(
            frame_state.device().calls(),
            &[DeviceCall::WriteDirect { buffer, offset: 0, len: 64 }]
        );

        let after_gpu = frame_state.device().contents(buffer).unwrap();
        assert_eq!(after_gpu[64..], before_gpu[64..]);
        assert_ne!(after_gpu[..64], before_gpu[..64]);

        let after_cpu = frame_state.data();
        assert_eq!(after_cpu.view_matrix[..], *mirrored.view.as_slice());
        assert_eq!(after_cpu.projection_matrix, before_cpu.projection_matrix);
        assert_eq!(bytemuck::bytes_of(after_cpu)[64..], bytemuck::bytes_of(&before_cpu)[64..]);
    }

    #[test]
    fn test_draw_call_override_writes_only_the_tag() {
        let mut scene = Scene::new();
        scene.fixed_colormap = 1;
        let mut device = RecordingDevice::new(false);
        let mut frame_state =
            FrameStateBuffer::new(&mut device, &FrameStateConfig::default(), &hud_transforms()).unwrap();
        frame_state.enter_scene_mode(&scene.ctx()).unwrap();
        let buffer = frame_state.buffer();
        let before_gpu = frame_state.device().contents(buffer).unwrap().to_vec();
        let before_cpu = *frame_state.data();

        frame_state.device.clear_calls();
        frame_state.override_colormap_for_draw_call(FixedColormapMode::FogLayer).unwrap();

        assert_eq!(
            frame_state.device().calls(),
            &[
                DeviceCall::BindTarget { buffer },
                DeviceCall::WriteBound { offset: 188, len: 4 },
            ]
        );
        assert_eq!(*frame_state.data(), before_cpu);

        let gpu = gpu_record(frame_state.device(), buffer);
        assert_eq!(gpu.fixed_colormap_mode(), Some(FixedColormapMode::FogLayer));
        assert_eq!(frame_state.device().contents(buffer).unwrap()[..188], before_gpu[..188]);

        // Restoring is the caller's job
        frame_state.override_colormap_for_draw_call(FixedColormapMode::ColorRange).unwrap();
        assert_eq!(frame_state.device().contents(buffer).unwrap(), &before_gpu[..]);
    }

    #[derive(Clone, Copy)]
    enum Step {
        Scene,
        RefreshView,
        DrawCallOverride,
        WeaponOverlay,
        Overlay,
    }

    impl Step {
        const ALL: [Self; 5] = [
            Self::Scene,
            Self::RefreshView,
            Self::DrawCallOverride,
            Self::WeaponOverlay,
            Self::Overlay,
        ];

        fn apply(self, frame_state: &mut FrameStateBuffer<&mut RecordingDevice>, scene: &Scene) {
            let result = match self {
                Self::Scene => frame_state.enter_scene_mode(&scene.ctx()),
                Self::RefreshView => frame_state.refresh_view_matrix_only(&ViewTransforms::new(
                    Mat4::identity() * 2.0,
                    Mat4::identity(),
                )),
                Self::DrawCallOverride => frame_state.override_colormap_for_draw_call(FixedColormapMode::FogLayer),
                Self::WeaponOverlay => frame_state.enter_overlay_mode(&hud_transforms(), true),
                Self::Overlay => frame_state.enter_overlay_mode(&hud_transforms(), false),
            };
            result.unwrap();
        }
    }

    #[test]
    fn test_update_paths_produce_identical_bytes() {
        let mut scene = Scene::new();
        let mut direct = RecordingDevice::new(true);
        let mut bound = RecordingDevice::new(false);
        let config = FrameStateConfig::default();

        let mut a = FrameStateBuffer::new(&mut direct, &config, &hud_transforms()).unwrap();
        let mut b = FrameStateBuffer::new(&mut bound, &config, &hud_transforms()).unwrap();
        assert_eq!(a.update_path(), UpdatePath::DirectUpdate);
        assert_eq!(b.update_path(), UpdatePath::BindThenUpdate);

        for selector in [CM_TORCH + 1, CM_LITE, 3] {
            scene.fixed_colormap = selector;
            for step in Step::ALL {
                step.apply(&mut a, &scene);
                step.apply(&mut b, &scene);
                assert_eq!(
                    a.device().contents(a.buffer()),
                    b.device().contents(b.buffer())
                );
            }
        }

        assert!(b.device().calls().iter().all(|call| !matches!(call, DeviceCall::WriteDirect { .. })));
        assert!(a.device().calls().iter().all(|call| !matches!(call, DeviceCall::WriteBound { .. })));
    }
}
