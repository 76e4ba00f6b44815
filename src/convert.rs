// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Pixel conversion routines used by the camera SDK's `convertFrame`.
//!
//! Covers unpacking of GigE Vision 10/12-bit packed encodings, bit-depth
//! reduction, BGR and YUV 4:2:2 to RGB, and a nearest-neighbour Bayer GB
//! demosaic. Color fidelity is not a goal; these routines only change the
//! representation so the host receives the layout it asked for.

use crate::format::PixelFormat;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("{format} buffer for {width}x{height} must be {expected} bytes, got {actual}")]
    SizeMismatch {
        format: PixelFormat,
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("no conversion from {from} to {to}")]
    Unsupported { from: PixelFormat, to: PixelFormat },

    #[error("{format} cannot represent {width}x{height}")]
    InvalidGeometry {
        format: PixelFormat,
        width: u32,
        height: u32,
    },
}

fn check_len(format: PixelFormat, buf: &[u8], width: u32, height: u32) -> Result<(), ConvertError> {
    let expected = format
        .buffer_len(width, height)
        .ok_or(ConvertError::InvalidGeometry {
            format,
            width,
            height,
        })?;
    if buf.len() != expected {
        return Err(ConvertError::SizeMismatch {
            format,
            width,
            height,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Decodes a single-channel (mono or Bayer) buffer into one sample per pixel.
fn decode_samples(format: PixelFormat, src: &[u8]) -> Result<Vec<u16>, ConvertError> {
    let samples = match format {
        PixelFormat::Mono8 | PixelFormat::BayerGB8 => src.iter().map(|&b| b as u16).collect(),
        PixelFormat::Mono10
        | PixelFormat::Mono12
        | PixelFormat::Mono16
        | PixelFormat::BayerGB10
        | PixelFormat::BayerGB12
        | PixelFormat::BayerGB16 => src
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect(),
        PixelFormat::Mono12Packed | PixelFormat::BayerGB12Packed => {
            let mut out = Vec::with_capacity(src.len() / 3 * 2);
            for c in src.chunks_exact(3) {
                out.push(((c[0] as u16) << 4) | (c[1] as u16 & 0x0F));
                out.push(((c[2] as u16) << 4) | (c[1] as u16 >> 4));
            }
            out
        }
        PixelFormat::Mono10Packed | PixelFormat::BayerGB10Packed => {
            let mut out = Vec::with_capacity(src.len() / 3 * 2);
            for c in src.chunks_exact(3) {
                out.push(((c[0] as u16) << 2) | (c[1] as u16 & 0x03));
                out.push(((c[2] as u16) << 2) | ((c[1] as u16 >> 4) & 0x03));
            }
            out
        }
        other => {
            return Err(ConvertError::Unsupported {
                from: other,
                to: PixelFormat::Mono16,
            })
        }
    };
    Ok(samples)
}

/// Encodes one sample per pixel into a single-channel buffer. Used by the
/// simulated camera to synthesize native frames.
pub fn encode_samples(
    format: PixelFormat,
    samples: &[u16],
    dst: &mut [u8],
) -> Result<(), ConvertError> {
    let mask = ((1u32 << format.bit_depth()) - 1) as u16;
    match format {
        PixelFormat::Mono8 | PixelFormat::BayerGB8 => {
            for (d, s) in dst.iter_mut().zip(samples) {
                *d = (*s & mask) as u8;
            }
        }
        PixelFormat::Mono10
        | PixelFormat::Mono12
        | PixelFormat::Mono16
        | PixelFormat::BayerGB10
        | PixelFormat::BayerGB12
        | PixelFormat::BayerGB16 => {
            for (d, s) in dst.chunks_exact_mut(2).zip(samples) {
                d.copy_from_slice(&(*s & mask).to_le_bytes());
            }
        }
        PixelFormat::Mono12Packed | PixelFormat::BayerGB12Packed => {
            for (d, s) in dst.chunks_exact_mut(3).zip(samples.chunks_exact(2)) {
                let (p0, p1) = (s[0] & mask, s[1] & mask);
                d[0] = (p0 >> 4) as u8;
                d[1] = ((p0 & 0x0F) | ((p1 & 0x0F) << 4)) as u8;
                d[2] = (p1 >> 4) as u8;
            }
        }
        PixelFormat::Mono10Packed | PixelFormat::BayerGB10Packed => {
            for (d, s) in dst.chunks_exact_mut(3).zip(samples.chunks_exact(2)) {
                let (p0, p1) = (s[0] & mask, s[1] & mask);
                d[0] = (p0 >> 2) as u8;
                d[1] = ((p0 & 0x03) | ((p1 & 0x03) << 4)) as u8;
                d[2] = (p1 >> 2) as u8;
            }
        }
        other => {
            return Err(ConvertError::Unsupported {
                from: PixelFormat::Mono16,
                to: other,
            })
        }
    }
    Ok(())
}

/// Writes samples of `bits` significant bits into an 8- or 16-bit container.
fn write_samples(samples: impl Iterator<Item = u16>, bits: u32, wide: bool, dst: &mut [u8]) {
    if wide {
        for (d, s) in dst.chunks_exact_mut(2).zip(samples) {
            d.copy_from_slice(&s.to_le_bytes());
        }
    } else {
        let shift = bits.saturating_sub(8);
        for (d, s) in dst.iter_mut().zip(samples) {
            *d = (s >> shift) as u8;
        }
    }
}

fn is_single_channel(format: PixelFormat) -> bool {
    !matches!(
        format,
        PixelFormat::Rgb8 | PixelFormat::Bgr8 | PixelFormat::Yuv422 | PixelFormat::Rgb16
    )
}

fn is_bayer(format: PixelFormat) -> bool {
    matches!(
        format,
        PixelFormat::BayerGB8
            | PixelFormat::BayerGB10
            | PixelFormat::BayerGB10Packed
            | PixelFormat::BayerGB12
            | PixelFormat::BayerGB12Packed
            | PixelFormat::BayerGB16
    )
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Converts `src` in format `from` into `dst` in format `to`.
pub fn convert(
    from: PixelFormat,
    src: &[u8],
    to: PixelFormat,
    dst: &mut [u8],
    width: u32,
    height: u32,
) -> Result<(), ConvertError> {
    check_len(from, src, width, height)?;
    check_len(to, dst, width, height)?;
    let unsupported = ConvertError::Unsupported { from, to };

    match (from, to) {
        (PixelFormat::Bgr8, PixelFormat::Rgb8) => {
            for (d, s) in dst.chunks_exact_mut(3).zip(src.chunks_exact(3)) {
                d[0] = s[2];
                d[1] = s[1];
                d[2] = s[0];
            }
            Ok(())
        }
        (PixelFormat::Yuv422, PixelFormat::Rgb8) => {
            // UYVY: one U/V pair shared by two luma samples.
            for (d, s) in dst.chunks_exact_mut(6).zip(src.chunks_exact(4)) {
                let u = s[0] as i32 - 128;
                let v = s[2] as i32 - 128;
                for (i, y) in [s[1] as i32, s[3] as i32].into_iter().enumerate() {
                    d[i * 3] = clamp_u8(y + ((359 * v) >> 8));
                    d[i * 3 + 1] = clamp_u8(y - ((88 * u + 183 * v) >> 8));
                    d[i * 3 + 2] = clamp_u8(y + ((454 * u) >> 8));
                }
            }
            Ok(())
        }
        (f, PixelFormat::Rgb8 | PixelFormat::Rgb16) if is_bayer(f) => {
            if width % 2 != 0 || height % 2 != 0 {
                return Err(ConvertError::InvalidGeometry {
                    format: f,
                    width,
                    height,
                });
            }
            let samples = decode_samples(f, src)?;
            let rgb = demosaic_gb(&samples, width as usize, height as usize);
            write_samples(rgb.into_iter(), f.bit_depth(), to == PixelFormat::Rgb16, dst);
            Ok(())
        }
        (f, t) if is_single_channel(f) && is_single_channel(t) && is_bayer(f) == is_bayer(t) => {
            if t.is_packed() || (t.bit_depth() != 8 && t.bit_depth() != 16) {
                return Err(unsupported);
            }
            let samples = decode_samples(f, src)?;
            write_samples(samples.into_iter(), f.bit_depth(), t.bit_depth() == 16, dst);
            Ok(())
        }
        _ => Err(unsupported),
    }
}

/// Nearest-neighbour demosaic of a GB-ordered mosaic (row 0: G B, row 1:
/// R G). Each 2x2 cell yields one RGB triple shared by its four pixels.
fn demosaic_gb(samples: &[u16], width: usize, height: usize) -> Vec<u16> {
    let mut rgb = vec![0u16; width * height * 3];
    for y in (0..height).step_by(2) {
        for x in (0..width).step_by(2) {
            let g1 = samples[y * width + x] as u32;
            let b = samples[y * width + x + 1];
            let r = samples[(y + 1) * width + x];
            let g2 = samples[(y + 1) * width + x + 1] as u32;
            let g = ((g1 + g2) / 2) as u16;
            for (dy, dx) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                let i = ((y + dy) * width + x + dx) * 3;
                rgb[i] = r;
                rgb[i + 1] = g;
                rgb[i + 2] = b;
            }
        }
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack_mono12_packed() {
        // p0 = 0xABC, p1 = 0x123
        let src = [0xAB, 0x3C, 0x12];
        let mut dst = [0u8; 4];
        convert(PixelFormat::Mono12Packed, &src, PixelFormat::Mono16, &mut dst, 2, 1).unwrap();
        assert_eq!(u16::from_le_bytes([dst[0], dst[1]]), 0xABC);
        assert_eq!(u16::from_le_bytes([dst[2], dst[3]]), 0x123);
    }

    #[test]
    fn test_unpack_mono10_packed_to_8bit() {
        let samples = [0x3FF, 0x100];
        let mut packed = [0u8; 3];
        encode_samples(PixelFormat::Mono10Packed, &samples, &mut packed).unwrap();
        let mut wide = [0u8; 4];
        convert(PixelFormat::Mono10Packed, &packed, PixelFormat::Mono16, &mut wide, 2, 1).unwrap();
        assert_eq!(u16::from_le_bytes([wide[0], wide[1]]), 0x3FF);
        assert_eq!(u16::from_le_bytes([wide[2], wide[3]]), 0x100);

        let mut narrow = [0u8; 2];
        convert(PixelFormat::Mono10Packed, &packed, PixelFormat::Mono8, &mut narrow, 2, 1).unwrap();
        assert_eq!(narrow, [0xFF, 0x40]);
    }

    #[test]
    fn test_mono12_to_mono8() {
        let mut src = [0u8; 4];
        encode_samples(PixelFormat::Mono12, &[0xFFF, 0x800], &mut src).unwrap();
        let mut dst = [0u8; 2];
        convert(PixelFormat::Mono12, &src, PixelFormat::Mono8, &mut dst, 2, 1).unwrap();
        assert_eq!(dst, [0xFF, 0x80]);
    }

    #[test]
    fn test_bgr_to_rgb() {
        let src = [1, 2, 3, 4, 5, 6];
        let mut dst = [0u8; 6];
        convert(PixelFormat::Bgr8, &src, PixelFormat::Rgb8, &mut dst, 2, 1).unwrap();
        assert_eq!(dst, [3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn test_yuv_gray_maps_to_gray() {
        let src = [128, 50, 128, 200];
        let mut dst = [0u8; 6];
        convert(PixelFormat::Yuv422, &src, PixelFormat::Rgb8, &mut dst, 2, 1).unwrap();
        assert_eq!(dst, [50, 50, 50, 200, 200, 200]);
    }

    #[test]
    fn test_demosaic_gb() {
        // G B / R G
        let src = [10, 30, 20, 50];
        let mut dst = [0u8; 12];
        convert(PixelFormat::BayerGB8, &src, PixelFormat::Rgb8, &mut dst, 2, 2).unwrap();
        for px in dst.chunks_exact(3) {
            assert_eq!(px, [20, 30, 30]);
        }

        let mut dst = [0u8; 24];
        convert(PixelFormat::BayerGB8, &src, PixelFormat::Rgb16, &mut dst, 2, 2).unwrap();
        assert_eq!(u16::from_le_bytes([dst[0], dst[1]]), 20);
    }

    #[test]
    fn test_size_errors() {
        let src = [0u8; 5];
        let mut dst = [0u8; 4];
        assert!(matches!(
            convert(PixelFormat::Mono12Packed, &src, PixelFormat::Mono16, &mut dst, 2, 1),
            Err(ConvertError::SizeMismatch { .. })
        ));

        let src = [0u8; 6];
        let mut dst = [0u8; 18];
        assert!(matches!(
            convert(PixelFormat::BayerGB8, &src, PixelFormat::Rgb8, &mut dst, 3, 2),
            Err(ConvertError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn test_unsupported_pairs() {
        let src = [0u8; 2];
        let mut dst = [0u8; 6];
        assert!(matches!(
            convert(PixelFormat::Mono8, &src, PixelFormat::Rgb8, &mut dst, 2, 1),
            Err(ConvertError::Unsupported { .. })
        ));
        let mut dst = [0u8; 2];
        assert!(matches!(
            convert(PixelFormat::BayerGB8, &src, PixelFormat::Mono8, &mut dst, 2, 1),
            Err(ConvertError::Unsupported { .. })
        ));
    }
}
