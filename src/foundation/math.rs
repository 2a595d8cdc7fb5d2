use crate::foundation::core::OutputSize;

/// Full-screen triangle strip in clip space: left-bottom, right-bottom, left-top, right-top.
pub const FULLSCREEN_QUAD: [[f32; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0], [1.0, 1.0]];

/// Texture coordinates matching [`FULLSCREEN_QUAD`] with `v = 0` at the top image row.
pub const TEXCOORDS_NO_ROTATION: [[f32; 2]; 4] = [[0.0, 1.0], [1.0, 1.0], [0.0, 0.0], [1.0, 0.0]];

/// Column-major 4x4 matrix, laid out the way the shaders consume it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mat4(pub [f32; 16]);

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mat4 {
    pub const IDENTITY: Self = Self([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    pub fn translation(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.0[12] = x;
        m.0[13] = y;
        m.0[14] = z;
        m
    }

    pub fn scale(x: f32, y: f32, z: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.0[0] = x;
        m.0[5] = y;
        m.0[10] = z;
        m
    }

    /// Orthographic projection with the usual GL clip conventions.
    pub fn ortho(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Self {
        let mut m = Self::IDENTITY;
        m.0[0] = 2.0 / (right - left);
        m.0[5] = 2.0 / (top - bottom);
        m.0[10] = -2.0 / (far - near);
        m.0[12] = -(right + left) / (right - left);
        m.0[13] = -(top + bottom) / (top - bottom);
        m.0[14] = -(far + near) / (far - near);
        m
    }

    /// `self * rhs`; `rhs` is applied to a vector first.
    pub fn mul(&self, rhs: &Self) -> Self {
        let mut out = [0.0f32; 16];
        for col in 0..4 {
            for row in 0..4 {
                let mut acc = 0.0;
                for k in 0..4 {
                    acc += self.0[k * 4 + row] * rhs.0[col * 4 + k];
                }
                out[col * 4 + row] = acc;
            }
        }
        Self(out)
    }

    pub fn transform(&self, v: [f32; 4]) -> [f32; 4] {
        let mut out = [0.0f32; 4];
        for (row, o) in out.iter_mut().enumerate() {
            *o = (0..4).map(|col| self.0[col * 4 + row] * v[col]).sum();
        }
        out
    }

    /// Transform a 2D point as `(x, y, 0, 1)` and return `xy`.
    pub fn transform_point2(&self, p: [f32; 2]) -> [f32; 2] {
        let v = self.transform([p[0], p[1], 0.0, 1.0]);
        [v[0], v[1]]
    }
}

/// Symmetric center-crop of a source image into an output region.
///
/// Exactly one axis is scaled below 1; the translation re-centers the sampled
/// window so the long axis is cropped equally on both sides.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CenterCrop {
    pub scale: [f32; 2],
    pub translate: [f32; 2],
}

impl CenterCrop {
    /// `None` when either size is degenerate.
    pub fn compute(source: OutputSize, output: OutputSize) -> Option<Self> {
        let tex_ratio = source.aspect()?;
        let out_ratio = output.aspect()?;
        if tex_ratio > out_ratio {
            let s = out_ratio / tex_ratio;
            Some(Self {
                scale: [s, 1.0],
                translate: [(1.0 - s) / 2.0, 0.0],
            })
        } else {
            let s = tex_ratio / out_ratio;
            Some(Self {
                scale: [1.0, s],
                translate: [0.0, (1.0 - s) / 2.0],
            })
        }
    }

    /// Texture matrix `T * S`: coordinates are scaled, then translated.
    pub fn tex_matrix(&self) -> Mat4 {
        Mat4::translation(self.translate[0], self.translate[1], 0.0).mul(&Mat4::scale(
            self.scale[0],
            self.scale[1],
            1.0,
        ))
    }

    pub fn apply(&self, uv: [f32; 2]) -> [f32; 2] {
        [
            uv[0] * self.scale[0] + self.translate[0],
            uv[1] * self.scale[1] + self.translate[1],
        ]
    }
}

/// Quarter-turn orientations for texture-coordinate sets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rotation {
    Normal,
    Rotation90,
    Rotation180,
    Rotation270,
}

/// Texture coordinates for [`FULLSCREEN_QUAD`] rotated and optionally flipped.
pub fn rotated_texcoords(rotation: Rotation, flip_h: bool, flip_v: bool) -> [[f32; 2]; 4] {
    let base = match rotation {
        Rotation::Normal => TEXCOORDS_NO_ROTATION,
        Rotation::Rotation90 => [[1.0, 1.0], [1.0, 0.0], [0.0, 1.0], [0.0, 0.0]],
        Rotation::Rotation180 => [[1.0, 0.0], [0.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
        Rotation::Rotation270 => [[0.0, 0.0], [0.0, 1.0], [1.0, 0.0], [1.0, 1.0]],
    };
    base.map(|[u, v]| {
        [
            if flip_h { 1.0 - u } else { u },
            if flip_v { 1.0 - v } else { v },
        ]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn wide_texture_crops_u_symmetrically() {
        let crop = CenterCrop::compute(OutputSize::new(200, 100), OutputSize::new(100, 100))
            .unwrap();
        assert!(approx(crop.scale[0], 0.5));
        assert!(approx(crop.translate[0], 0.25));
        assert_eq!(crop.scale[1], 1.0);
        assert_eq!(crop.translate[1], 0.0);

        let m = crop.tex_matrix();
        let lo = m.transform_point2([0.0, 0.0]);
        let hi = m.transform_point2([1.0, 1.0]);
        assert!(approx(lo[0], 0.25) && approx(hi[0], 0.75));
        assert!(approx(lo[1], 0.0) && approx(hi[1], 1.0));
    }

    #[test]
    fn tall_texture_crops_v() {
        let crop = CenterCrop::compute(OutputSize::new(100, 400), OutputSize::new(100, 100))
            .unwrap();
        assert!(approx(crop.scale[1], 0.25));
        assert!(approx(crop.translate[1], 0.375));
        assert_eq!(crop.apply([0.5, 0.5]), [0.5, 0.5]);
    }

    #[test]
    fn degenerate_sizes_skip_crop() {
        assert!(CenterCrop::compute(OutputSize::new(0, 1), OutputSize::new(1, 1)).is_none());
        assert!(CenterCrop::compute(OutputSize::new(1, 1), OutputSize::new(1, 0)).is_none());
    }

    #[test]
    fn matrix_and_apply_agree() {
        let crop = CenterCrop::compute(OutputSize::new(1920, 1080), OutputSize::new(1080, 1920))
            .unwrap();
        let m = crop.tex_matrix();
        for uv in [[0.0, 0.0], [0.3, 0.9], [1.0, 1.0]] {
            let a = m.transform_point2(uv);
            let b = crop.apply(uv);
            assert!(approx(a[0], b[0]) && approx(a[1], b[1]));
        }
    }

    #[test]
    fn ortho_maps_bounds_to_clip() {
        let m = Mat4::ortho(-1.0, 1.0, -2.0, 2.0, -1.0, 1.0);
        assert_eq!(m.transform_point2([1.0, 2.0]), [1.0, 1.0]);
        assert_eq!(m.transform_point2([-1.0, -2.0]), [-1.0, -1.0]);
    }

    #[test]
    fn rotation_90_with_vertical_flip() {
        let t = rotated_texcoords(Rotation::Rotation90, false, true);
        assert_eq!(t, [[1.0, 0.0], [1.0, 1.0], [0.0, 0.0], [0.0, 1.0]]);
    }
}
