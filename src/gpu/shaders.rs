//! WGSL sources and program layouts for every stage.
//!
//! The CPU device evaluates the same programs through Rust kernels in
//! [`crate::gpu::cpu`]; constants shared by both live here.

use crate::gpu::device::{KernelKind, ProgramDesc, UniformDecl, UniformKind};

/// Parallax shift applied to the background, scaled by `1 - depth`.
pub const PARALLAX_BACKGROUND_SHIFT: f32 = 0.02;
/// Parallax shift applied to the foreground cut-out, scaled by `depth`.
pub const PARALLAX_FOREGROUND_SHIFT: f32 = 0.05;

const fn uniform(name: &'static str, kind: UniformKind) -> UniformDecl {
    UniformDecl { name, kind }
}

pub static PASSTHROUGH: ProgramDesc = ProgramDesc {
    label: "passthrough",
    wgsl: PASSTHROUGH_WGSL,
    vertex_entry: "vs",
    fragment_entry: "fs",
    kernel: KernelKind::Passthrough,
    attributes: &["position", "inputTextureCoordinate"],
    uniforms: &[uniform("inputImageTexture", UniformKind::Sampler)],
};

pub static MATTING: ProgramDesc = ProgramDesc {
    label: "matting",
    wgsl: MATTING_WGSL,
    vertex_entry: "vs",
    fragment_entry: "fs",
    kernel: KernelKind::Matting,
    attributes: &[
        "position",
        "inputTextureCoordinate",
        "inputTextureCoordinate2",
    ],
    uniforms: &[
        uniform("uMVPMatrix", UniformKind::Mat4),
        uniform("keyColorR", UniformKind::Float),
        uniform("keyColorG", UniformKind::Float),
        uniform("keyColorB", UniformKind::Float),
        uniform("similarity", UniformKind::Float),
        uniform("smoothness", UniformKind::Float),
        uniform("inputImageTexture", UniformKind::Sampler),
        uniform("inputImageTexture2", UniformKind::Sampler),
    ],
};

pub static SPRITE: ProgramDesc = ProgramDesc {
    label: "sprite",
    wgsl: SPRITE_WGSL,
    vertex_entry: "vs",
    fragment_entry: "fs",
    kernel: KernelKind::Sprite,
    attributes: &["position", "inputTextureCoordinate"],
    uniforms: &[
        uniform("transformMatrix", UniformKind::Mat4),
        uniform("orthographicMatrix", UniformKind::Mat4),
        uniform("inputImageTexture", UniformKind::Sampler),
    ],
};

pub static PARALLAX: ProgramDesc = ProgramDesc {
    label: "parallax",
    wgsl: PARALLAX_WGSL,
    vertex_entry: "vs",
    fragment_entry: "fs",
    kernel: KernelKind::Parallax,
    attributes: &["position", "inputTextureCoordinate"],
    uniforms: &[
        uniform("u_factor", UniformKind::Vec2),
        uniform("u_resolution", UniformKind::Vec2),
        uniform("u_bg", UniformKind::Sampler),
        uniform("u_depth", UniformKind::Sampler),
        uniform("u_front", UniformKind::Sampler),
    ],
};

const PASSTHROUGH_WGSL: &str = r#"
struct VsOut {
  @builtin(position) pos: vec4<f32>,
  @location(0) uv: vec2<f32>,
};

@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var inputImageTexture: texture_2d<f32>;

@vertex
fn vs(@location(0) position: vec2<f32>, @location(1) inputTextureCoordinate: vec2<f32>) -> VsOut {
  var o: VsOut;
  o.pos = vec4<f32>(position, 0.0, 1.0);
  o.uv = inputTextureCoordinate;
  return o;
}

@fragment
fn fs(in: VsOut) -> @location(0) vec4<f32> {
  return textureSample(inputImageTexture, s_src, in.uv);
}
"#;

const MATTING_WGSL: &str = r#"
struct Params {
  uMVPMatrix: mat4x4<f32>,
  keyColorR: vec4<f32>,
  keyColorG: vec4<f32>,
  keyColorB: vec4<f32>,
  similarity: vec4<f32>,
  smoothness: vec4<f32>,
};

struct VsOut {
  @builtin(position) pos: vec4<f32>,
  @location(0) uv: vec2<f32>,
  @location(1) uv2: vec2<f32>,
};

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var inputImageTexture: texture_2d<f32>;
@group(0) @binding(3) var inputImageTexture2: texture_2d<f32>;

@vertex
fn vs(
  @location(0) position: vec2<f32>,
  @location(1) inputTextureCoordinate: vec2<f32>,
  @location(2) inputTextureCoordinate2: vec2<f32>,
) -> VsOut {
  var o: VsOut;
  o.pos = vec4<f32>(position, 0.0, 1.0);
  o.uv = inputTextureCoordinate;
  o.uv2 = (params.uMVPMatrix * vec4<f32>(inputTextureCoordinate2, 0.0, 1.0)).xy;
  return o;
}

fn chroma(rgb: vec3<f32>) -> vec2<f32> {
  let cb = 0.5 - 0.168736 * rgb.r - 0.331264 * rgb.g + 0.5 * rgb.b;
  let cr = 0.5 + 0.5 * rgb.r - 0.418688 * rgb.g - 0.081312 * rgb.b;
  return vec2<f32>(cb, cr);
}

@fragment
fn fs(in: VsOut) -> @location(0) vec4<f32> {
  let fg = textureSample(inputImageTexture, s_src, in.uv);
  let bg = textureSample(inputImageTexture2, s_src, in.uv2);
  var straight = vec3<f32>(0.0);
  if (fg.a > 0.0) {
    straight = fg.rgb / fg.a;
  }
  let key = vec3<f32>(params.keyColorR.x, params.keyColorG.x, params.keyColorB.x);
  let d = distance(chroma(straight), chroma(key));
  let lo = params.similarity.x;
  let hi = lo + params.smoothness.x;
  var mask = step(lo, d);
  if (hi > lo) {
    mask = smoothstep(lo, hi, d);
  }
  return mix(bg, fg, mask);
}
"#;

const SPRITE_WGSL: &str = r#"
struct Params {
  transformMatrix: mat4x4<f32>,
  orthographicMatrix: mat4x4<f32>,
};

struct VsOut {
  @builtin(position) pos: vec4<f32>,
  @location(0) uv: vec2<f32>,
};

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var inputImageTexture: texture_2d<f32>;

@vertex
fn vs(@location(0) position: vec2<f32>, @location(1) inputTextureCoordinate: vec2<f32>) -> VsOut {
  var o: VsOut;
  o.pos = params.orthographicMatrix * params.transformMatrix * vec4<f32>(position, 0.0, 1.0);
  o.uv = inputTextureCoordinate;
  return o;
}

@fragment
fn fs(in: VsOut) -> @location(0) vec4<f32> {
  return textureSample(inputImageTexture, s_src, in.uv);
}
"#;

const PARALLAX_WGSL: &str = r#"
struct Params {
  u_factor: vec4<f32>,
  u_resolution: vec4<f32>,
};

struct VsOut {
  @builtin(position) pos: vec4<f32>,
  @location(0) uv: vec2<f32>,
};

const BG_SHIFT: f32 = 0.02;
const FRONT_SHIFT: f32 = 0.05;

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var s_src: sampler;
@group(0) @binding(2) var u_bg: texture_2d<f32>;
@group(0) @binding(3) var u_depth: texture_2d<f32>;
@group(0) @binding(4) var u_front: texture_2d<f32>;

@vertex
fn vs(@location(0) position: vec2<f32>, @location(1) inputTextureCoordinate: vec2<f32>) -> VsOut {
  var o: VsOut;
  o.pos = vec4<f32>(position, 0.0, 1.0);
  o.uv = inputTextureCoordinate;
  return o;
}

@fragment
fn fs(in: VsOut) -> @location(0) vec4<f32> {
  var aspect = vec2<f32>(1.0, 1.0);
  if (params.u_resolution.x > 0.0 && params.u_resolution.y > 0.0) {
    aspect = vec2<f32>(params.u_resolution.y / params.u_resolution.x, 1.0);
  }
  let shift = params.u_factor.xy * aspect;
  let d = textureSample(u_depth, s_src, in.uv).r;
  let bg = textureSample(u_bg, s_src, in.uv + shift * (BG_SHIFT * (1.0 - d)));
  let fg = textureSample(u_front, s_src, in.uv + shift * (FRONT_SHIFT * d));
  return fg + bg * (1.0 - fg.a);
}
"#;
