pub type PremulRgba8 = [u8; 4];

/// Premultiplied source-over: `dst = src * opacity + dst * (1 - src.a * opacity)`.
pub fn over(dst: PremulRgba8, src: PremulRgba8, opacity: f32) -> PremulRgba8 {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || (src[3] == 0 && src[..3].iter().all(|&c| c == 0)) {
        return dst;
    }

    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let sa = mul_div255(u16::from(src[3]), op);
    let inv = 255u16 - u16::from(sa);

    let mut out = [0u8; 4];
    out[3] = add_sat_u8(sa, mul_div255(u16::from(dst[3]), inv));

    for i in 0..3 {
        let sc = mul_div255(u16::from(src[i]), op);
        let dc = mul_div255(u16::from(dst[i]), inv);
        out[i] = add_sat_u8(sc, dc);
    }
    out
}

/// Quantize a premultiplied float color in `[0, 1]` to RGBA8.
pub fn to_rgba8(c: [f32; 4]) -> PremulRgba8 {
    c.map(|v| ((v.clamp(0.0, 1.0) * 255.0).round()) as u8)
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}

fn add_sat_u8(a: u8, b: u8) -> u8 {
    a.saturating_add(b)
}
