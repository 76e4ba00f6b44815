// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Frame buffer lifecycle.
//!
//! [`FrameBuffers`] holds the raw capture buffer and the optional conversion
//! target for one acquisition cycle. Both are returned to the SDK exactly
//! once: explicitly through [`FrameBuffers::release`] or, on any early
//! return, when the set is dropped.

use crate::error::{classify, sdk_call, ErrorClass, PipelineError, Result};
use crate::format::FrameDescriptor;
use crate::sdk::{Camera, FrameBuffer};
use tracing::{trace, warn};

pub struct FrameBuffers<'a, C: Camera> {
    camera: &'a C,
    raw: Option<FrameBuffer>,
    converted: Option<FrameBuffer>,
}

/// Allocates the raw buffer and, when `converted` is given, the conversion
/// target. A failed second allocation releases the first before returning.
pub fn acquire_buffers<'a, C: Camera>(
    camera: &'a C,
    raw: &FrameDescriptor,
    converted: Option<&FrameDescriptor>,
) -> Result<FrameBuffers<'a, C>> {
    let raw = sdk_call(
        "allocateFrameBuffer",
        ErrorClass::Allocation,
        camera.allocate_frame_buffer(raw),
    )?;
    let mut buffers = FrameBuffers {
        camera,
        raw: Some(raw),
        converted: None,
    };
    if let Some(desc) = converted {
        let buf = sdk_call(
            "allocateFrameBuffer",
            ErrorClass::Allocation,
            camera.allocate_frame_buffer(desc),
        )?;
        buffers.converted = Some(buf);
    }
    trace!(
        raw = buffers.raw.as_ref().map(FrameBuffer::id),
        converted = buffers.converted.as_ref().map(FrameBuffer::id),
        "frame buffers allocated"
    );
    Ok(buffers)
}

impl<C: Camera> FrameBuffers<'_, C> {
    pub fn raw_mut(&mut self) -> Option<&mut FrameBuffer> {
        self.raw.as_mut()
    }

    pub fn has_conversion_target(&self) -> bool {
        self.converted.is_some()
    }

    /// Raw buffer and conversion target, borrowed together for conversion.
    pub fn split_mut(&mut self) -> (Option<&FrameBuffer>, Option<&mut FrameBuffer>) {
        (self.raw.as_ref(), self.converted.as_mut())
    }

    /// Buffer holding the bytes to publish: the conversion target when one
    /// was allocated, otherwise the raw capture.
    pub fn output(&self) -> Option<&FrameBuffer> {
        self.converted.as_ref().or(self.raw.as_ref())
    }

    /// Returns both buffers to the SDK. Reports the first failure after
    /// attempting every release.
    pub fn release(mut self) -> Result<()> {
        self.release_all()
    }

    fn release_all(&mut self) -> Result<()> {
        let mut first: Option<PipelineError> = None;
        for buf in [self.converted.take(), self.raw.take()].into_iter().flatten() {
            let id = buf.id();
            if let Err(status) = self.camera.release_frame_buffer(buf) {
                let err = classify("releaseFrameBuffer", ErrorClass::Allocation, status);
                first.get_or_insert(err);
            } else {
                trace!(id, "frame buffer released");
            }
        }
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<C: Camera> Drop for FrameBuffers<'_, C> {
    fn drop(&mut self) {
        if self.raw.is_none() && self.converted.is_none() {
            return;
        }
        if let Err(e) = self.release_all() {
            warn!("frame buffer release on drop failed: {e}");
        }
    }
}
