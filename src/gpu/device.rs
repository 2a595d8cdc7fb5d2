use crate::foundation::{
    core::{Bitmap, FrameRGBA, OutputSize},
    error::{CompositorError, CompositorResult},
    math::Mat4,
};

/// Handle to a compiled program owned by a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

/// Handle to a texture owned by a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// Resolved attribute or uniform slot inside one program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Location {
    Attribute(u32),
    Uniform(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniformKind {
    /// Texture unit index bound to a sampled texture.
    Sampler,
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4(Mat4),
}

impl UniformValue {
    /// Whether this value may be written to a uniform declared as `kind`.
    pub fn fits(&self, kind: UniformKind) -> bool {
        matches!(
            (self, kind),
            (Self::Int(_), UniformKind::Sampler)
                | (Self::Float(_), UniformKind::Float)
                | (Self::Vec2(_), UniformKind::Vec2)
                | (Self::Vec3(_), UniformKind::Vec3)
                | (Self::Vec4(_), UniformKind::Vec4)
                | (Self::Mat4(_), UniformKind::Mat4)
        )
    }

    /// Components padded to a vec4; matrices are not representable here.
    #[cfg(feature = "gpu")]
    pub(crate) fn as_vec4(&self) -> Option<[f32; 4]> {
        match *self {
            Self::Int(v) => Some([v as f32, 0.0, 0.0, 0.0]),
            Self::Float(v) => Some([v, 0.0, 0.0, 0.0]),
            Self::Vec2([x, y]) => Some([x, y, 0.0, 0.0]),
            Self::Vec3([x, y, z]) => Some([x, y, z, 0.0]),
            Self::Vec4(v) => Some(v),
            Self::Mat4(_) => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniformDecl {
    pub name: &'static str,
    pub kind: UniformKind,
}

/// Which software kernel evaluates a program on the CPU device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelKind {
    Passthrough,
    Matting,
    Sprite,
    Parallax,
}

/// Static description of a vertex+fragment program.
///
/// Attributes map to `@location(i)` vertex inputs in declaration order.
/// Non-sampler uniforms are packed into one uniform block in declaration order,
/// each occupying a 16-byte slot (64 bytes for matrices). Sampler uniforms map
/// to texture bindings in declaration order.
#[derive(Debug)]
pub struct ProgramDesc {
    pub label: &'static str,
    pub wgsl: &'static str,
    pub vertex_entry: &'static str,
    pub fragment_entry: &'static str,
    pub kernel: KernelKind,
    pub attributes: &'static [&'static str],
    pub uniforms: &'static [UniformDecl],
}

impl ProgramDesc {
    pub fn attribute_index(&self, name: &str) -> Option<u32> {
        self.attributes
            .iter()
            .position(|a| *a == name)
            .map(|i| i as u32)
    }

    pub fn uniform_index(&self, name: &str) -> Option<u32> {
        self.uniforms
            .iter()
            .position(|u| u.name == name)
            .map(|i| i as u32)
    }

    /// Structural checks shared by every backend before compiling.
    pub fn validate(&self) -> CompositorResult<()> {
        if self.attributes.is_empty() {
            return Err(CompositorError::shader(format!(
                "program '{}' declares no vertex attributes",
                self.label
            )));
        }
        for entry in [self.vertex_entry, self.fragment_entry] {
            if !self.wgsl.contains(&format!("fn {entry}(")) {
                return Err(CompositorError::shader(format!(
                    "program '{}' has no entry point '{entry}'",
                    self.label
                )));
            }
        }
        Ok(())
    }
}

/// Blend equations available while drawing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendFunc {
    /// `dst = src + dst * (1 - src.a)`, premultiplied over.
    OneOneMinusSrcAlpha,
}

/// Per-vertex data for one attribute of a 4-vertex triangle strip.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuadAttrib {
    pub location: u32,
    pub data: [[f32; 2]; 4],
}

/// The graphics API as seen by filter stages.
///
/// Only the render thread holds a device. Everything else talks to compositors
/// through their command queues.
pub trait GpuDevice: Send {
    fn kind(&self) -> BackendKind;

    fn compile_program(&mut self, desc: &'static ProgramDesc) -> CompositorResult<ProgramId>;

    fn delete_program(&mut self, program: ProgramId);

    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<u32>;

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<u32>;

    fn use_program(&mut self, program: ProgramId);

    fn set_uniform(&mut self, program: ProgramId, location: u32, value: UniformValue);

    fn upload_texture(&mut self, bitmap: &Bitmap) -> CompositorResult<TextureId>;

    /// Deleting an unknown texture is a no-op.
    fn delete_texture(&mut self, texture: TextureId);

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>);

    fn set_blend(&mut self, blend: Option<BlendFunc>);

    /// Draw one triangle strip with the current program, textures and blend state.
    fn draw_quad(&mut self, attribs: &[QuadAttrib]) -> CompositorResult<()>;

    fn target_size(&self) -> OutputSize;

    fn resize_target(&mut self, size: OutputSize) -> CompositorResult<()>;

    fn clear(&mut self, rgba: [u8; 4]);

    fn read_frame(&mut self) -> CompositorResult<FrameRGBA>;
}

/// Number of texture units every device exposes.
pub const MAX_TEXTURE_UNITS: usize = 8;

/// Available device kinds.
///
/// - `Cpu` is always available.
/// - `Gpu` requires the `gpu` feature and a wgpu adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Cpu,
    Gpu,
}

/// Backend-agnostic device settings.
#[derive(Clone, Debug)]
pub struct DeviceSettings {
    pub size: OutputSize,
    /// If set, the target is cleared to this RGBA8 color at the start of every frame.
    pub clear_rgba: Option<[u8; 4]>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            size: OutputSize::new(1, 1),
            clear_rgba: Some([0, 0, 0, 255]),
        }
    }
}

/// Create a device implementation.
pub fn create_device(
    kind: BackendKind,
    settings: &DeviceSettings,
) -> CompositorResult<Box<dyn GpuDevice>> {
    match kind {
        BackendKind::Cpu => Ok(Box::new(crate::gpu::cpu::CpuDevice::new(settings.size))),
        #[cfg(feature = "gpu")]
        BackendKind::Gpu => Ok(Box::new(crate::gpu::wgpu_backend::WgpuDevice::new(settings.size)?)),
        #[allow(unreachable_patterns)]
        _ => Err(CompositorError::device(
            "requested backend is not available (build with --features gpu)",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static DESC: ProgramDesc = ProgramDesc {
        label: "probe",
        wgsl: "fn vs() {} fn fs() {}",
        vertex_entry: "vs",
        fragment_entry: "fs",
        kernel: KernelKind::Passthrough,
        attributes: &["position", "uv"],
        uniforms: &[
            UniformDecl {
                name: "tex",
                kind: UniformKind::Sampler,
            },
            UniformDecl {
                name: "amount",
                kind: UniformKind::Float,
            },
        ],
    };

    #[test]
    fn lookups_follow_declaration_order() {
        assert_eq!(DESC.attribute_index("uv"), Some(1));
        assert_eq!(DESC.uniform_index("amount"), Some(1));
        assert_eq!(DESC.uniform_index("missing"), None);
        DESC.validate().unwrap();
    }

    #[test]
    fn value_kinds_must_match_declarations() {
        assert!(UniformValue::Int(0).fits(UniformKind::Sampler));
        assert!(UniformValue::Float(1.0).fits(UniformKind::Float));
        assert!(!UniformValue::Float(1.0).fits(UniformKind::Vec2));
        assert!(UniformValue::Mat4(Mat4::IDENTITY).fits(UniformKind::Mat4));
    }

    #[test]
    fn requesting_unbuilt_backend_reports_error() {
        #[cfg(not(feature = "gpu"))]
        {
            let err = create_device(BackendKind::Gpu, &DeviceSettings::default())
                .err()
                .unwrap();
            assert!(err.to_string().contains("not available"));
        }
        let cpu = create_device(BackendKind::Cpu, &DeviceSettings::default()).unwrap();
        assert_eq!(cpu.kind(), BackendKind::Cpu);
    }
}
