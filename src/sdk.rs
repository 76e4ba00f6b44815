// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Camera SDK boundary.
//!
//! The vendor SDK and its network protocol are opaque. The pipeline only
//! consumes the operations declared here: device enumeration, stream
//! control, GenICam-style parameters, frame buffer allocation, capture and
//! conversion. Every call reports an [`SdkStatus`] on failure which the
//! caller classifies through [`crate::error::sdk_call`].

use crate::error::SdkResult;
use crate::format::{ConversionMode, FrameDescriptor};
use std::{fmt, ptr::NonNull, slice, time::Duration};

/// Maximum number of cameras enumerated during connect.
pub const MAX_CAMERAS: usize = 10;

/// Register and command names understood by the camera.
pub mod names {
    pub const WIDTH: &str = "Width";
    pub const HEIGHT: &str = "Height";
    pub const OFFSET_X: &str = "OffsetX";
    pub const OFFSET_Y: &str = "OffsetY";
    pub const PIXEL_FORMAT: &str = "PixelFormat";
    pub const EXPOSURE: &str = "Exposure";
    pub const GAIN: &str = "Gain";
    pub const FRAME_RATE: &str = "FrameRate";
    pub const PACKET_SIZE: &str = "GevSCPSPacketSize";
    pub const LUT_ENABLE: &str = "LUTEnable";
    pub const AUTO_GAIN: &str = "AutoGain";
    pub const TRIGGER_MODE: &str = "TriggerMode";
    pub const TRIGGER_SOFTWARE_SOURCE: &str = "TriggerSourceSoftware";
    pub const ACQUISITION_FRAME_COUNT: &str = "AcquisitionFrameCount";
    pub const BUFFER_MODE: &str = "BufferMode";

    pub const ACQUISITION_START: &str = "AcquisitionStart";
    pub const ACQUISITION_STOP: &str = "AcquisitionStop";
    pub const TRIGGER_SOFTWARE: &str = "TriggerSoftware";
}

/// Unsigned camera parameters exposed to the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UIntParam {
    Exposure,
    Gain,
    FrameRate,
    OffsetX,
    OffsetY,
    Width,
    Height,
    PacketSize,
}

impl UIntParam {
    pub fn name(&self) -> &'static str {
        match self {
            UIntParam::Exposure => names::EXPOSURE,
            UIntParam::Gain => names::GAIN,
            UIntParam::FrameRate => names::FRAME_RATE,
            UIntParam::OffsetX => names::OFFSET_X,
            UIntParam::OffsetY => names::OFFSET_Y,
            UIntParam::Width => names::WIDTH,
            UIntParam::Height => names::HEIGHT,
            UIntParam::PacketSize => names::PACKET_SIZE,
        }
    }
}

/// Boolean camera parameters exposed to the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoolParam {
    LutEnable,
    AutoGain,
}

impl BoolParam {
    pub fn name(&self) -> &'static str {
        match self {
            BoolParam::LutEnable => names::LUT_ENABLE,
            BoolParam::AutoGain => names::AUTO_GAIN,
        }
    }
}

/// Limits reported for an unsigned parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamRange {
    pub min: u32,
    pub max: u32,
    pub inc: u32,
}

impl ParamRange {
    pub fn contains(&self, value: u32) -> bool {
        let inc = self.inc.max(1);
        value >= self.min && value <= self.max && (value - self.min) % inc == 0
    }
}

/// GigE Vision discovery record for one camera.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub spec_version_major: u32,
    pub spec_version_minor: u32,
    pub device_mode: u32,
    pub device_version: String,
    pub manufacturer_name: String,
    pub model_name: String,
    pub current_ip: String,
    pub current_subnet_mask: String,
    pub mac_address: String,
    pub serial_number: String,
    pub user_defined_name: String,
    pub manufacturer_specific_info: String,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {} serial:{} version:{} ip:{} mac:{}",
            self.manufacturer_name,
            self.model_name,
            self.serial_number,
            self.device_version,
            self.current_ip,
            self.mac_address
        )
    }
}

/// Metadata the device attaches to a delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Device frame counter.
    pub frame_id: u64,
    /// Device timestamp in nanoseconds.
    pub timestamp_ns: u64,
}

/// Frame memory owned by the camera SDK.
///
/// The host never frees this memory: a `FrameBuffer` is returned to the SDK
/// with [`Camera::release_frame_buffer`], which consumes it. Dropping one
/// without releasing leaks the region instead of double-freeing it.
pub struct FrameBuffer {
    id: u64,
    descriptor: FrameDescriptor,
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the region is exclusively referenced by this value until it is
// handed back to the SDK through `into_raw_parts`.
unsafe impl Send for FrameBuffer {}

impl FrameBuffer {
    /// Wraps an SDK-owned region.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes until the
    /// buffer is released, and must not be aliased by any other live
    /// `FrameBuffer`.
    pub unsafe fn from_raw_parts(
        id: u64,
        descriptor: FrameDescriptor,
        ptr: NonNull<u8>,
        len: usize,
    ) -> Self {
        Self {
            id,
            descriptor,
            ptr,
            len,
        }
    }

    /// Gives the region back to the SDK implementation that created it.
    pub fn into_raw_parts(self) -> (u64, NonNull<u8>, usize) {
        (self.id, self.ptr, self.len)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn descriptor(&self) -> &FrameDescriptor {
        &self.descriptor
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: guaranteed valid for `len` bytes by `from_raw_parts`.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: guaranteed valid and unaliased by `from_raw_parts`.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .field("len", &self.len)
            .finish()
    }
}

/// Entry point of the vendor SDK.
pub trait CameraSdk: Send + Sync + 'static {
    type Camera: Camera;

    /// SDK version string.
    fn version(&self) -> String;

    /// Enumerates at most `max` cameras reachable on the network.
    fn list_devices(&self, max: usize) -> SdkResult<Vec<DeviceInfo>>;

    fn open_device(&self, info: &DeviceInfo) -> SdkResult<Self::Camera>;

    fn close_device(&self, camera: &Self::Camera) -> SdkResult<()>;
}

/// One open camera. Calls may come from the control context and the frame
/// pump worker concurrently, so implementations synchronize internally.
pub trait Camera: Send + Sync + 'static {
    fn open_stream(&self, buffers: u32) -> SdkResult<()>;

    fn close_stream(&self) -> SdkResult<()>;

    fn execute_command(&self, name: &str) -> SdkResult<()>;

    fn get_u32(&self, name: &str) -> SdkResult<u32>;

    fn set_u32(&self, name: &str, value: u32) -> SdkResult<()>;

    fn u32_range(&self, name: &str) -> SdkResult<ParamRange>;

    fn get_bool(&self, name: &str) -> SdkResult<bool>;

    fn set_bool(&self, name: &str, value: bool) -> SdkResult<()>;

    fn allocate_frame_buffer(&self, descriptor: &FrameDescriptor) -> SdkResult<FrameBuffer>;

    /// Submits `buffer` for the next capture.
    fn queue_frame(&self, buffer: &mut FrameBuffer) -> SdkResult<()>;

    /// Blocks until the device has written a frame into `buffer`. `None`
    /// waits indefinitely.
    fn get_frame(&self, buffer: &mut FrameBuffer, timeout: Option<Duration>)
        -> SdkResult<FrameInfo>;

    fn release_frame_buffer(&self, buffer: FrameBuffer) -> SdkResult<()>;

    fn convert_frame(
        &self,
        src: &FrameBuffer,
        dst: &mut FrameBuffer,
        mode: ConversionMode,
    ) -> SdkResult<()>;
}
