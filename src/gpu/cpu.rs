use std::collections::HashMap;

use crate::{
    foundation::{
        core::{Bitmap, FrameRGBA, OutputSize},
        error::{CompositorError, CompositorResult},
        math::Mat4,
    },
    gpu::{
        device::{
            BackendKind, BlendFunc, GpuDevice, KernelKind, MAX_TEXTURE_UNITS, ProgramDesc,
            ProgramId, QuadAttrib, TextureId, UniformKind, UniformValue,
        },
        shaders::{PARALLAX_BACKGROUND_SHIFT, PARALLAX_FOREGROUND_SHIFT},
    },
    gpu::composite::{over, to_rgba8},
};

/// One device interaction, recorded when [`CpuDevice::with_recording`] is enabled.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCall {
    CompileProgram {
        label: &'static str,
        ok: bool,
    },
    DeleteProgram(ProgramId),
    SetUniform {
        program: ProgramId,
        name: &'static str,
        value: UniformValue,
    },
    UploadTexture(TextureId),
    DeleteTexture(TextureId),
    BindTexture {
        unit: u32,
        texture: Option<TextureId>,
    },
    SetBlend(Option<BlendFunc>),
    /// A draw with the textures each sampler resolved to, in declaration order.
    Draw {
        program: ProgramId,
        textures: Vec<Option<TextureId>>,
    },
    Clear([u8; 4]),
}

struct CpuProgram {
    desc: &'static ProgramDesc,
    values: Vec<Option<UniformValue>>,
}

impl CpuProgram {
    fn value(&self, name: &str) -> Option<UniformValue> {
        let idx = self.desc.uniform_index(name)? as usize;
        self.values[idx]
    }

    fn mat4(&self, name: &str) -> Mat4 {
        match self.value(name) {
            Some(UniformValue::Mat4(m)) => m,
            _ => Mat4::IDENTITY,
        }
    }

    fn float(&self, name: &str) -> f32 {
        match self.value(name) {
            Some(UniformValue::Float(v)) => v,
            _ => 0.0,
        }
    }

    fn vec2(&self, name: &str) -> [f32; 2] {
        match self.value(name) {
            Some(UniformValue::Vec2(v)) => v,
            _ => [0.0, 0.0],
        }
    }

    /// Unset samplers read from unit 0.
    fn unit(&self, name: &str) -> usize {
        match self.value(name) {
            Some(UniformValue::Int(u)) if u >= 0 => u as usize,
            _ => 0,
        }
    }

    fn samplers(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.desc
            .uniforms
            .iter()
            .filter(|u| u.kind == UniformKind::Sampler)
            .map(|u| u.name)
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct Varyings {
    uv: [f32; 2],
    uv2: [f32; 2],
}

#[derive(Clone, Copy, Debug)]
struct Vertex {
    clip: [f32; 2],
    vary: Varyings,
}

/// Software rasterizer implementing [`GpuDevice`].
///
/// Programs run through Rust kernels selected by [`ProgramDesc::kernel`]. Sampling
/// is nearest with clamp-to-edge; the target is premultiplied RGBA8.
pub struct CpuDevice {
    size: OutputSize,
    pixels: Vec<u8>,
    programs: HashMap<ProgramId, CpuProgram>,
    textures: HashMap<TextureId, Bitmap>,
    units: [Option<TextureId>; MAX_TEXTURE_UNITS],
    current: Option<ProgramId>,
    blend: Option<BlendFunc>,
    next_id: u32,
    recording: bool,
    calls: Vec<DeviceCall>,
    rejected: Vec<&'static str>,
}

impl CpuDevice {
    pub fn new(size: OutputSize) -> Self {
        Self {
            size,
            pixels: vec![0; pixel_len(size)],
            programs: HashMap::new(),
            textures: HashMap::new(),
            units: [None; MAX_TEXTURE_UNITS],
            current: None,
            blend: None,
            next_id: 1,
            recording: false,
            calls: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// Record every device call for later inspection.
    pub fn with_recording(mut self) -> Self {
        self.recording = true;
        self
    }

    /// Make compilation of the program labelled `label` fail.
    pub fn reject_program(&mut self, label: &'static str) {
        self.rejected.push(label);
    }

    pub fn calls(&self) -> &[DeviceCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<DeviceCall> {
        std::mem::take(&mut self.calls)
    }

    pub fn uniform(&self, program: ProgramId, name: &str) -> Option<UniformValue> {
        self.programs.get(&program)?.value(name)
    }

    pub fn texture(&self, texture: TextureId) -> Option<&Bitmap> {
        self.textures.get(&texture)
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    fn record(&mut self, call: DeviceCall) {
        if self.recording {
            self.calls.push(call);
        }
    }

    fn next_handle(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl GpuDevice for CpuDevice {
    fn kind(&self) -> BackendKind {
        BackendKind::Cpu
    }

    fn compile_program(&mut self, desc: &'static ProgramDesc) -> CompositorResult<ProgramId> {
        let result = if self.rejected.contains(&desc.label) {
            Err(CompositorError::shader(format!(
                "program '{}' failed to link",
                desc.label
            )))
        } else {
            desc.validate()
        };
        self.record(DeviceCall::CompileProgram {
            label: desc.label,
            ok: result.is_ok(),
        });
        result?;

        let id = ProgramId(self.next_handle());
        self.programs.insert(
            id,
            CpuProgram {
                desc,
                values: vec![None; desc.uniforms.len()],
            },
        );
        Ok(id)
    }

    fn delete_program(&mut self, program: ProgramId) {
        if self.programs.remove(&program).is_some() {
            if self.current == Some(program) {
                self.current = None;
            }
            self.record(DeviceCall::DeleteProgram(program));
        }
    }

    fn attrib_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.programs.get(&program)?.desc.attribute_index(name)
    }

    fn uniform_location(&self, program: ProgramId, name: &str) -> Option<u32> {
        self.programs.get(&program)?.desc.uniform_index(name)
    }

    fn use_program(&mut self, program: ProgramId) {
        self.current = self.programs.contains_key(&program).then_some(program);
    }

    fn set_uniform(&mut self, program: ProgramId, location: u32, value: UniformValue) {
        let Some(p) = self.programs.get_mut(&program) else {
            return;
        };
        let Some(decl) = p.desc.uniforms.get(location as usize) else {
            tracing::warn!(program = p.desc.label, location, "uniform location out of range");
            return;
        };
        if !value.fits(decl.kind) {
            tracing::warn!(
                program = p.desc.label,
                uniform = decl.name,
                "uniform value does not match declared kind"
            );
            return;
        }
        p.values[location as usize] = Some(value);
        let name = decl.name;
        self.record(DeviceCall::SetUniform {
            program,
            name,
            value,
        });
    }

    fn upload_texture(&mut self, bitmap: &Bitmap) -> CompositorResult<TextureId> {
        if !bitmap.is_valid() {
            return Err(CompositorError::asset("cannot upload an invalid bitmap"));
        }
        let id = TextureId(self.next_handle());
        self.textures.insert(id, bitmap.clone());
        self.record(DeviceCall::UploadTexture(id));
        Ok(id)
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_some() {
            for unit in self.units.iter_mut() {
                if *unit == Some(texture) {
                    *unit = None;
                }
            }
            self.record(DeviceCall::DeleteTexture(texture));
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>) {
        let Some(slot) = self.units.get_mut(unit as usize) else {
            tracing::warn!(unit, "texture unit out of range");
            return;
        };
        *slot = texture;
        self.record(DeviceCall::BindTexture { unit, texture });
    }

    fn set_blend(&mut self, blend: Option<BlendFunc>) {
        self.blend = blend;
        self.record(DeviceCall::SetBlend(blend));
    }

    fn draw_quad(&mut self, attribs: &[QuadAttrib]) -> CompositorResult<()> {
        let program_id = self
            .current
            .ok_or_else(|| CompositorError::device("draw without a current program"))?;
        let program = self
            .programs
            .get(&program_id)
            .ok_or_else(|| CompositorError::device("current program was deleted"))?;

        let attr = |name: &str| -> [[f32; 2]; 4] {
            program
                .desc
                .attribute_index(name)
                .and_then(|loc| attribs.iter().find(|a| a.location == loc))
                .map(|a| a.data)
                .unwrap_or([[0.0; 2]; 4])
        };
        let vertices = shade_vertices(program, &attr);

        let units = &self.units;
        let textures = &self.textures;
        let resolve = |name: &str| {
            units
                .get(program.unit(name))
                .copied()
                .flatten()
                .and_then(|t| textures.get(&t))
        };
        let bound: Vec<Option<TextureId>> = program
            .samplers()
            .map(|s| {
                units
                    .get(program.unit(s))
                    .copied()
                    .flatten()
                    .filter(|t| textures.contains_key(t))
            })
            .collect();

        let mut out = std::mem::take(&mut self.pixels);
        rasterize_strip(&mut out, self.size, &vertices, self.blend, &|v| {
            shade_fragment(program, &resolve, v)
        });
        self.pixels = out;

        self.record(DeviceCall::Draw {
            program: program_id,
            textures: bound,
        });
        Ok(())
    }

    fn target_size(&self) -> OutputSize {
        self.size
    }

    fn resize_target(&mut self, size: OutputSize) -> CompositorResult<()> {
        if size.is_degenerate() {
            return Err(CompositorError::validation(
                "render target must be non-empty",
            ));
        }
        if size != self.size {
            self.size = size;
            self.pixels = vec![0; pixel_len(size)];
        }
        Ok(())
    }

    fn clear(&mut self, rgba: [u8; 4]) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        self.record(DeviceCall::Clear(rgba));
    }

    fn read_frame(&mut self) -> CompositorResult<FrameRGBA> {
        Ok(FrameRGBA {
            width: self.size.width,
            height: self.size.height,
            data: self.pixels.clone(),
            premultiplied: true,
        })
    }
}

fn pixel_len(size: OutputSize) -> usize {
    (size.width as usize) * (size.height as usize) * 4
}

fn shade_vertices(program: &CpuProgram, attr: &dyn Fn(&str) -> [[f32; 2]; 4]) -> [Vertex; 4] {
    let position = attr("position");
    let uv = attr("inputTextureCoordinate");
    let uv2 = attr("inputTextureCoordinate2");
    let tex_matrix = program.mat4("uMVPMatrix");
    let sprite_matrix = program
        .mat4("orthographicMatrix")
        .mul(&program.mat4("transformMatrix"));

    std::array::from_fn(|i| match program.desc.kernel {
        KernelKind::Sprite => {
            let v = sprite_matrix.transform([position[i][0], position[i][1], 0.0, 1.0]);
            let w = if v[3] != 0.0 { v[3] } else { 1.0 };
            Vertex {
                clip: [v[0] / w, v[1] / w],
                vary: Varyings {
                    uv: uv[i],
                    uv2: [0.0; 2],
                },
            }
        }
        KernelKind::Matting => Vertex {
            clip: position[i],
            vary: Varyings {
                uv: uv[i],
                uv2: tex_matrix.transform_point2(uv2[i]),
            },
        },
        KernelKind::Passthrough | KernelKind::Parallax => Vertex {
            clip: position[i],
            vary: Varyings {
                uv: uv[i],
                uv2: [0.0; 2],
            },
        },
    })
}

fn shade_fragment<'a>(
    program: &CpuProgram,
    resolve: &dyn Fn(&str) -> Option<&'a Bitmap>,
    v: &Varyings,
) -> [f32; 4] {
    let sample = |name: &str, uv: [f32; 2]| -> [f32; 4] {
        resolve(name)
            .map(|bmp| sample_nearest(bmp, uv))
            .unwrap_or([0.0; 4])
    };

    match program.desc.kernel {
        KernelKind::Passthrough | KernelKind::Sprite => sample("inputImageTexture", v.uv),
        KernelKind::Matting => {
            let fg = sample("inputImageTexture", v.uv);
            let bg = sample("inputImageTexture2", v.uv2);
            let straight = if fg[3] > 0.0 {
                [fg[0] / fg[3], fg[1] / fg[3], fg[2] / fg[3]]
            } else {
                [0.0; 3]
            };
            let key = [
                program.float("keyColorR"),
                program.float("keyColorG"),
                program.float("keyColorB"),
            ];
            let d = distance(chroma(straight), chroma(key));
            let lo = program.float("similarity");
            let hi = lo + program.float("smoothness");
            let mask = if hi > lo {
                smoothstep(lo, hi, d)
            } else if d >= lo {
                1.0
            } else {
                0.0
            };
            std::array::from_fn(|i| bg[i] + (fg[i] - bg[i]) * mask)
        }
        KernelKind::Parallax => {
            let res = program.vec2("u_resolution");
            let aspect = if res[0] > 0.0 && res[1] > 0.0 {
                [res[1] / res[0], 1.0]
            } else {
                [1.0, 1.0]
            };
            let factor = program.vec2("u_factor");
            let shift = [factor[0] * aspect[0], factor[1] * aspect[1]];
            let d = sample("u_depth", v.uv)[0];
            let bg_k = PARALLAX_BACKGROUND_SHIFT * (1.0 - d);
            let fg_k = PARALLAX_FOREGROUND_SHIFT * d;
            let bg = sample(
                "u_bg",
                [v.uv[0] + shift[0] * bg_k, v.uv[1] + shift[1] * bg_k],
            );
            let fg = sample(
                "u_front",
                [v.uv[0] + shift[0] * fg_k, v.uv[1] + shift[1] * fg_k],
            );
            std::array::from_fn(|i| fg[i] + bg[i] * (1.0 - fg[3]))
        }
    }
}

fn sample_nearest(bmp: &Bitmap, uv: [f32; 2]) -> [f32; 4] {
    let texel = |t: f32, n: u32| -> u32 {
        let max = n.saturating_sub(1) as f32;
        (t * n as f32).floor().clamp(0.0, max) as u32
    };
    let px = bmp.pixel(texel(uv[0], bmp.width), texel(uv[1], bmp.height));
    px.map(|c| f32::from(c) / 255.0)
}

fn chroma(rgb: [f32; 3]) -> [f32; 2] {
    let cb = 0.5 - 0.168736 * rgb[0] - 0.331264 * rgb[1] + 0.5 * rgb[2];
    let cr = 0.5 + 0.5 * rgb[0] - 0.418688 * rgb[1] - 0.081312 * rgb[2];
    [cb, cr]
}

fn distance(a: [f32; 2], b: [f32; 2]) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

fn smoothstep(lo: f32, hi: f32, x: f32) -> f32 {
    let t = ((x - lo) / (hi - lo)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn edge(a: [f32; 2], b: [f32; 2], p: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (p[1] - a[1]) - (b[1] - a[1]) * (p[0] - a[0])
}

fn barycentric(p: [f32; 2], a: [f32; 2], b: [f32; 2], c: [f32; 2]) -> Option<[f32; 3]> {
    let area = edge(a, b, c);
    if area.abs() < 1e-9 {
        return None;
    }
    let w = [edge(b, c, p) / area, edge(c, a, p) / area, edge(a, b, p) / area];
    w.iter().all(|&x| x >= -1e-5).then_some(w)
}

/// Rasterize a 4-vertex triangle strip, shading each covered pixel center once.
fn rasterize_strip(
    pixels: &mut [u8],
    size: OutputSize,
    vertices: &[Vertex; 4],
    blend: Option<BlendFunc>,
    shade: &dyn Fn(&Varyings) -> [f32; 4],
) {
    if size.is_degenerate() {
        return;
    }
    let (w, h) = (size.width as f32, size.height as f32);
    let screen = vertices.map(|v| [(v.clip[0] + 1.0) * 0.5 * w, (1.0 - v.clip[1]) * 0.5 * h]);

    let (mut min_x, mut min_y, mut max_x, mut max_y) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
    for p in &screen {
        min_x = min_x.min(p[0]);
        min_y = min_y.min(p[1]);
        max_x = max_x.max(p[0]);
        max_y = max_y.max(p[1]);
    }
    if !(min_x.is_finite() && min_y.is_finite() && max_x.is_finite() && max_y.is_finite()) {
        return;
    }
    let x0 = min_x.floor().max(0.0) as u32;
    let y0 = min_y.floor().max(0.0) as u32;
    let x1 = (max_x.ceil().max(0.0) as u32).min(size.width);
    let y1 = (max_y.ceil().max(0.0) as u32).min(size.height);

    const TRIANGLES: [[usize; 3]; 2] = [[0, 1, 2], [2, 1, 3]];

    for py in y0..y1 {
        for px in x0..x1 {
            let p = [px as f32 + 0.5, py as f32 + 0.5];
            let covered = TRIANGLES.iter().find_map(|&[a, b, c]| {
                barycentric(p, screen[a], screen[b], screen[c]).map(|wts| (wts, [a, b, c]))
            });
            let Some((wts, idx)) = covered else {
                continue;
            };
            let lerp = |f: fn(&Varyings) -> [f32; 2]| -> [f32; 2] {
                let mut out = [0.0; 2];
                for (k, &vi) in idx.iter().enumerate() {
                    let val = f(&vertices[vi].vary);
                    out[0] += val[0] * wts[k];
                    out[1] += val[1] * wts[k];
                }
                out
            };
            let vary = Varyings {
                uv: lerp(|v| v.uv),
                uv2: lerp(|v| v.uv2),
            };
            let src = to_rgba8(shade(&vary));
            let i = ((py as usize) * (size.width as usize) + px as usize) * 4;
            let dst = [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]];
            let out = match blend {
                None => src,
                Some(BlendFunc::OneOneMinusSrcAlpha) => over(dst, src, 1.0),
            };
            pixels[i..i + 4].copy_from_slice(&out);
        }
    }
}
