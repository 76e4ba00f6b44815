// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Pixel format negotiation.
//!
//! Maps a requested (color mode, data type, pixel index) triple onto one of
//! the camera's native pixel encodings and decides which conversion the
//! camera SDK must run before the frame can be handed to the host. Lookup is
//! an exact match against static per-color tables; anything not listed is an
//! [`NegotiationError::UnsupportedCombination`].

use crate::error::NegotiationError;
use std::fmt;

/// Color representation requested by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorMode {
    Mono,
    Rgb,
    Bayer,
}

impl ColorMode {
    /// Samples per pixel in the host representation.
    pub fn channels(&self) -> usize {
        match self {
            ColorMode::Mono | ColorMode::Bayer => 1,
            ColorMode::Rgb => 3,
        }
    }
}

/// Host sample type; implies the requested bit depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    UInt8,
    UInt16,
}

impl DataType {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            DataType::UInt8 => 1,
            DataType::UInt16 => 2,
        }
    }
}

/// Conversion the camera SDK must perform between capture and publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionMode {
    None,
    BitDepthOnly,
    ColorOnly,
    Both,
}

impl ConversionMode {
    fn from_flags(depth: bool, color: bool) -> Self {
        match (depth, color) {
            (false, false) => ConversionMode::None,
            (true, false) => ConversionMode::BitDepthOnly,
            (false, true) => ConversionMode::ColorOnly,
            (true, true) => ConversionMode::Both,
        }
    }

    /// Whether a second (conversion target) buffer is needed.
    pub fn needs_buffer(&self) -> bool {
        *self != ConversionMode::None
    }
}

/// Device pixel encodings, identified on the wire by their GigE Vision
/// pixel format code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Mono8,
    Mono10,
    Mono10Packed,
    Mono12,
    Mono12Packed,
    Mono16,
    BayerGB8,
    BayerGB10,
    BayerGB10Packed,
    BayerGB12,
    BayerGB12Packed,
    BayerGB16,
    Rgb8,
    Bgr8,
    Yuv422,
    Rgb16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    Mono,
    Bayer,
    Rgb,
    Bgr,
    Yuv,
}

impl PixelFormat {
    /// GigE Vision pixel format code written to the `PixelFormat` register.
    pub fn code(&self) -> u32 {
        match self {
            PixelFormat::Mono8 => 0x0108_0001,
            PixelFormat::Mono10 => 0x0110_0003,
            PixelFormat::Mono10Packed => 0x010C_0004,
            PixelFormat::Mono12 => 0x0110_0005,
            PixelFormat::Mono12Packed => 0x010C_0006,
            PixelFormat::Mono16 => 0x0110_0007,
            PixelFormat::BayerGB8 => 0x0108_000A,
            PixelFormat::BayerGB10 => 0x0110_000E,
            PixelFormat::BayerGB10Packed => 0x010C_0028,
            PixelFormat::BayerGB12 => 0x0110_0012,
            PixelFormat::BayerGB12Packed => 0x010C_002C,
            PixelFormat::BayerGB16 => 0x0110_0030,
            PixelFormat::Rgb8 => 0x0218_0014,
            PixelFormat::Bgr8 => 0x0218_0015,
            PixelFormat::Yuv422 => 0x0210_001F,
            PixelFormat::Rgb16 => 0x0230_0033,
        }
    }

    /// Significant bits per sample.
    pub fn bit_depth(&self) -> u32 {
        match self {
            PixelFormat::Mono8
            | PixelFormat::BayerGB8
            | PixelFormat::Rgb8
            | PixelFormat::Bgr8
            | PixelFormat::Yuv422 => 8,
            PixelFormat::Mono10
            | PixelFormat::Mono10Packed
            | PixelFormat::BayerGB10
            | PixelFormat::BayerGB10Packed => 10,
            PixelFormat::Mono12
            | PixelFormat::Mono12Packed
            | PixelFormat::BayerGB12
            | PixelFormat::BayerGB12Packed => 12,
            PixelFormat::Mono16 | PixelFormat::BayerGB16 | PixelFormat::Rgb16 => 16,
        }
    }

    /// Two pixels share three bytes; host consumers always need these unpacked.
    pub fn is_packed(&self) -> bool {
        matches!(
            self,
            PixelFormat::Mono10Packed
                | PixelFormat::Mono12Packed
                | PixelFormat::BayerGB10Packed
                | PixelFormat::BayerGB12Packed
        )
    }

    fn family(&self) -> Family {
        match self {
            PixelFormat::Mono8
            | PixelFormat::Mono10
            | PixelFormat::Mono10Packed
            | PixelFormat::Mono12
            | PixelFormat::Mono12Packed
            | PixelFormat::Mono16 => Family::Mono,
            PixelFormat::BayerGB8
            | PixelFormat::BayerGB10
            | PixelFormat::BayerGB10Packed
            | PixelFormat::BayerGB12
            | PixelFormat::BayerGB12Packed
            | PixelFormat::BayerGB16 => Family::Bayer,
            PixelFormat::Rgb8 | PixelFormat::Rgb16 => Family::Rgb,
            PixelFormat::Bgr8 => Family::Bgr,
            PixelFormat::Yuv422 => Family::Yuv,
        }
    }

    /// Bytes needed to hold one `width` x `height` frame, or `None` when the
    /// geometry cannot be represented in this encoding.
    pub fn buffer_len(&self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize).checked_mul(height as usize)?;
        if pixels == 0 {
            return None;
        }
        match self {
            PixelFormat::Mono8 | PixelFormat::BayerGB8 => Some(pixels),
            PixelFormat::Mono10
            | PixelFormat::Mono12
            | PixelFormat::Mono16
            | PixelFormat::BayerGB10
            | PixelFormat::BayerGB12
            | PixelFormat::BayerGB16 => pixels.checked_mul(2),
            PixelFormat::Mono10Packed
            | PixelFormat::Mono12Packed
            | PixelFormat::BayerGB10Packed
            | PixelFormat::BayerGB12Packed => {
                if pixels % 2 != 0 {
                    return None;
                }
                pixels.checked_mul(3).map(|n| n / 2)
            }
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => pixels.checked_mul(3),
            PixelFormat::Yuv422 => {
                if width % 2 != 0 {
                    return None;
                }
                pixels.checked_mul(2)
            }
            PixelFormat::Rgb16 => pixels.checked_mul(6),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

const MONO_FORMATS: &[PixelFormat] = &[
    PixelFormat::Mono8,
    PixelFormat::Mono10,
    PixelFormat::Mono10Packed,
    PixelFormat::Mono12,
    PixelFormat::Mono12Packed,
];

const BAYER_FORMATS: &[PixelFormat] = &[
    PixelFormat::BayerGB8,
    PixelFormat::BayerGB10,
    PixelFormat::BayerGB10Packed,
    PixelFormat::BayerGB12,
    PixelFormat::BayerGB12Packed,
];

const RGB_FORMATS: &[PixelFormat] = &[
    PixelFormat::Rgb8,
    PixelFormat::Bgr8,
    PixelFormat::Yuv422,
    PixelFormat::BayerGB8,
    PixelFormat::BayerGB12,
    PixelFormat::BayerGB12Packed,
];

/// Native encodings selectable for `color`, indexed by the vendor pixel index.
pub fn native_formats(color: ColorMode) -> &'static [PixelFormat] {
    match color {
        ColorMode::Mono => MONO_FORMATS,
        ColorMode::Bayer => BAYER_FORMATS,
        ColorMode::Rgb => RGB_FORMATS,
    }
}

/// Host-side encoding published for a requested color mode and data type.
pub fn output_format(color: ColorMode, dtype: DataType) -> PixelFormat {
    match (color, dtype) {
        (ColorMode::Mono, DataType::UInt8) => PixelFormat::Mono8,
        (ColorMode::Mono, DataType::UInt16) => PixelFormat::Mono16,
        (ColorMode::Bayer, DataType::UInt8) => PixelFormat::BayerGB8,
        (ColorMode::Bayer, DataType::UInt16) => PixelFormat::BayerGB16,
        (ColorMode::Rgb, DataType::UInt8) => PixelFormat::Rgb8,
        (ColorMode::Rgb, DataType::UInt16) => PixelFormat::Rgb16,
    }
}

/// Outcome of a successful negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    /// Encoding the device captures in.
    pub native: PixelFormat,
    /// Encoding of the published bytes.
    pub output: PixelFormat,
    pub conversion: ConversionMode,
}

/// Selects the native pixel format and conversion for a request.
///
/// 8-bit native encodings cannot serve a 16-bit request. Deeper encodings
/// serving an 8-bit request, and every packed encoding, need a bit-depth
/// conversion. A native color family different from the requested color mode
/// (BGR, YUV, or Bayer served as RGB) needs a color conversion.
pub fn negotiate(
    color: ColorMode,
    dtype: DataType,
    pixel_index: u32,
) -> Result<Negotiated, NegotiationError> {
    let unsupported = NegotiationError::UnsupportedCombination {
        color,
        dtype,
        pixel_index,
    };
    let native = *native_formats(color)
        .get(pixel_index as usize)
        .ok_or_else(|| unsupported.clone())?;

    if native.bit_depth() == 8 && dtype == DataType::UInt16 {
        return Err(unsupported);
    }

    let depth = native.is_packed() || (native.bit_depth() > 8 && dtype == DataType::UInt8);
    let color_conversion = match (color, native.family()) {
        (ColorMode::Mono, Family::Mono) => false,
        (ColorMode::Bayer, Family::Bayer) => false,
        (ColorMode::Rgb, Family::Rgb) => false,
        (ColorMode::Rgb, Family::Bgr | Family::Yuv | Family::Bayer) => true,
        _ => return Err(unsupported),
    };

    Ok(Negotiated {
        native,
        output: output_format(color, dtype),
        conversion: ConversionMode::from_flags(depth, color_conversion),
    })
}

/// Ownership of a frame buffer's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Mapped into device-managed memory; released only through the SDK.
    ZeroCopy,
    /// Allocated by the SDK on the host for conversion output.
    Owned,
}

/// Immutable description of one buffer for one acquisition cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub kind: BufferKind,
    pub conversion: ConversionMode,
}

impl FrameDescriptor {
    /// Builds the raw capture descriptor and, when conversion is required,
    /// the conversion target descriptor.
    pub fn for_cycle(
        negotiated: &Negotiated,
        width: u32,
        height: u32,
    ) -> Result<(FrameDescriptor, Option<FrameDescriptor>), NegotiationError> {
        let invalid = NegotiationError::InvalidSize { width, height };
        negotiated
            .native
            .buffer_len(width, height)
            .ok_or_else(|| invalid.clone())?;

        let raw = FrameDescriptor {
            width,
            height,
            format: negotiated.native,
            kind: BufferKind::ZeroCopy,
            conversion: negotiated.conversion,
        };
        if !negotiated.conversion.needs_buffer() {
            return Ok((raw, None));
        }

        negotiated
            .output
            .buffer_len(width, height)
            .ok_or(invalid.clone())?;
        if negotiated.native.family() == Family::Bayer
            && negotiated.output.family() == Family::Rgb
            && (width % 2 != 0 || height % 2 != 0)
        {
            return Err(invalid);
        }
        let converted = FrameDescriptor {
            format: negotiated.output,
            kind: BufferKind::Owned,
            ..raw
        };
        Ok((raw, Some(converted)))
    }

    /// Size of this descriptor's buffer in bytes.
    pub fn len(&self) -> usize {
        self.format.buffer_len(self.width, self.height).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
