// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Output sink capability consumed by the frame pump.

use crate::error::{PipelineError, Result};
use crate::format::{ColorMode, DataType};
use crate::image::{Dimensions, OutputBuffer};
use parking_lot::RwLock;
use tracing::trace;

/// How many frames an acquisition run produces before stopping on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageMode {
    /// One frame, then Idle.
    Single,
    /// A fixed number of frames, then Idle.
    Multiple(u32),
    /// Until stopped.
    #[default]
    Continuous,
}

impl ImageMode {
    /// True once `published` frames satisfy the mode.
    pub fn is_complete(&self, published: u64) -> bool {
        match self {
            ImageMode::Single => published >= 1,
            ImageMode::Multiple(n) => published >= u64::from(*n),
            ImageMode::Continuous => false,
        }
    }

    /// Value for the camera's `AcquisitionFrameCount` register.
    pub fn frame_count(&self) -> Option<u32> {
        match self {
            ImageMode::Single => Some(1),
            ImageMode::Multiple(n) => Some((*n).max(1)),
            ImageMode::Continuous => None,
        }
    }
}

/// Format the host currently requests. Polled at the top of every cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestedFormat {
    pub color: ColorMode,
    pub dtype: DataType,
    pub dims: Dimensions,
    pub image_mode: ImageMode,
}

impl Default for RequestedFormat {
    fn default() -> Self {
        Self {
            color: ColorMode::Mono,
            dtype: DataType::UInt8,
            dims: Dimensions::new(640, 480),
            image_mode: ImageMode::Continuous,
        }
    }
}

/// Host imaging framework as seen by the pipeline.
pub trait OutputSink: Send + Sync + 'static {
    fn requested_format(&self) -> RequestedFormat;

    /// Allocates a fresh output buffer. Never reused across frames.
    fn allocate(&self, dims: Dimensions, color: ColorMode, dtype: DataType)
        -> Result<OutputBuffer>;

    /// Takes ownership of a filled buffer.
    fn publish(&self, buffer: OutputBuffer, sequence_id: u64, timestamp_ns: u64) -> Result<()>;
}

/// Sink that forwards published frames over a bounded `kanal` channel.
///
/// A full channel drops the frame rather than blocking the frame pump.
pub struct ChannelSink {
    format: RwLock<RequestedFormat>,
    tx: kanal::Sender<OutputBuffer>,
}

impl ChannelSink {
    pub fn new(format: RequestedFormat, capacity: usize) -> (Self, kanal::Receiver<OutputBuffer>) {
        let (tx, rx) = kanal::bounded(capacity);
        let sink = Self {
            format: RwLock::new(format),
            tx,
        };
        (sink, rx)
    }

    pub fn set_format(&self, format: RequestedFormat) {
        *self.format.write() = format;
    }

    pub fn update_format(&self, f: impl FnOnce(&mut RequestedFormat)) {
        f(&mut self.format.write());
    }
}

impl OutputSink for ChannelSink {
    fn requested_format(&self) -> RequestedFormat {
        *self.format.read()
    }

    fn allocate(
        &self,
        dims: Dimensions,
        color: ColorMode,
        dtype: DataType,
    ) -> Result<OutputBuffer> {
        Ok(OutputBuffer::new(dims, color, dtype))
    }

    fn publish(&self, buffer: OutputBuffer, sequence_id: u64, timestamp_ns: u64) -> Result<()> {
        trace!(sequence_id, timestamp_ns, size = buffer.size(), "publish");
        match self.tx.try_send(buffer) {
            Ok(true) => Ok(()),
            Ok(false) => Err(PipelineError::Publish("output channel full".to_string())),
            Err(e) => Err(PipelineError::Publish(e.to_string())),
        }
    }
}
