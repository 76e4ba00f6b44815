// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use crate::format::{output_format, ColorMode, DataType, PixelFormat};
use core::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Width and height of a host image in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

const fn image_size(width: u32, height: u32, channels: usize, bytes_per_sample: usize) -> usize {
    width as usize * height as usize * channels * bytes_per_sample
}

/// Host-owned image buffer handed to the output sink.
///
/// Sized from the *requested* color mode and data type, never from the
/// device's native encoding. A fresh buffer is allocated for every frame so
/// consumers can hold on to published buffers without coordinating reuse.
///
/// # Example
///
/// ```
/// use emergent_camera::format::{ColorMode, DataType};
/// use emergent_camera::image::{Dimensions, OutputBuffer};
///
/// let img = OutputBuffer::new(Dimensions::new(640, 480), ColorMode::Rgb, DataType::UInt16);
/// assert_eq!(img.size(), 640 * 480 * 3 * 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBuffer {
    dims: Dimensions,
    color: ColorMode,
    dtype: DataType,
    data: Vec<u8>,
    sequence_id: u64,
    timestamp_ns: u64,
}

impl OutputBuffer {
    pub fn new(dims: Dimensions, color: ColorMode, dtype: DataType) -> Self {
        let size = image_size(
            dims.width,
            dims.height,
            color.channels(),
            dtype.bytes_per_sample(),
        );
        Self {
            dims,
            color,
            dtype,
            data: vec![0; size],
            sequence_id: 0,
            timestamp_ns: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.dims.width
    }

    pub fn height(&self) -> u32 {
        self.dims.height
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dims
    }

    /// Color mode attribute attached to the frame.
    pub fn color_mode(&self) -> ColorMode {
        self.color
    }

    pub fn data_type(&self) -> DataType {
        self.dtype
    }

    /// Pixel encoding of the buffer contents.
    pub fn format(&self) -> PixelFormat {
        output_format(self.color, self.dtype)
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        image_size(self.dims.width, 1, self.color.channels(), self.dtype.bytes_per_sample())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    /// Capture time in nanoseconds since the UNIX epoch.
    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    pub fn timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.timestamp_ns)
    }

    pub(crate) fn stamp(&mut self, sequence_id: u64, timestamp_ns: u64) {
        self.sequence_id = sequence_id;
        self.timestamp_ns = timestamp_ns;
    }
}

impl fmt::Display for OutputBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}x{} {} seq:{} ts:{}",
            self.dims.width,
            self.dims.height,
            self.format(),
            self.sequence_id,
            self.timestamp_ns
        )
    }
}
