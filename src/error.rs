// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Error types for the acquisition pipeline.
//!
//! Vendor SDK calls return an [`SdkStatus`]. Before the pipeline decides
//! whether to retry, drop a frame or stop the stream, every status is
//! classified into a [`PipelineError`] carrying the name of the operation
//! that produced it.

use crate::format::{ColorMode, DataType, PixelFormat};
use thiserror::Error;
use tracing::error;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type returned by the vendor SDK surface.
pub type SdkResult<T> = std::result::Result<T, SdkStatus>;

/// Non-success status codes reported by the camera SDK.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdkStatus {
    #[error("no such device or entry (1)")]
    Search,
    #[error("invalid argument (2)")]
    InvalidArgument,
    #[error("input/output error (3)")]
    Io,
    #[error("out of memory (4)")]
    NoMemory,
    #[error("resource temporarily unavailable (5)")]
    Again,
    #[error("operation not supported (6)")]
    NotSupported,
    #[error("operation timed out (7)")]
    Timeout,
    #[error("device not connected (8)")]
    DeviceNotConnected,
    #[error("device lost connection (9)")]
    DeviceLostConnection,
    #[error("device already connected (10)")]
    DeviceAlreadyConnected,
    #[error("GenICam error (11)")]
    Genicam,
    #[error("unknown SDK status ({0})")]
    Unknown(i32),
}

impl SdkStatus {
    /// Success code of the vendor API.
    pub const SUCCESS: i32 = 0;

    /// Converts a raw vendor status code into a result.
    pub fn check(code: i32) -> SdkResult<()> {
        match code {
            Self::SUCCESS => Ok(()),
            1 => Err(Self::Search),
            2 => Err(Self::InvalidArgument),
            3 => Err(Self::Io),
            4 => Err(Self::NoMemory),
            5 => Err(Self::Again),
            6 => Err(Self::NotSupported),
            7 => Err(Self::Timeout),
            8 => Err(Self::DeviceNotConnected),
            9 => Err(Self::DeviceLostConnection),
            10 => Err(Self::DeviceAlreadyConnected),
            11 => Err(Self::Genicam),
            other => Err(Self::Unknown(other)),
        }
    }

    /// Raw vendor status code.
    pub fn code(&self) -> i32 {
        match self {
            Self::Search => 1,
            Self::InvalidArgument => 2,
            Self::Io => 3,
            Self::NoMemory => 4,
            Self::Again => 5,
            Self::NotSupported => 6,
            Self::Timeout => 7,
            Self::DeviceNotConnected => 8,
            Self::DeviceLostConnection => 9,
            Self::DeviceAlreadyConnected => 10,
            Self::Genicam => 11,
            Self::Unknown(code) => *code,
        }
    }
}

/// Coarse error classes. Only [`ErrorClass::Connection`] and
/// [`ErrorClass::Capture`] change the acquisition state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Connection,
    State,
    Negotiation,
    Allocation,
    Setup,
    Capture,
    Conversion,
    Publish,
    Parameter,
}

/// Reasons a requested format cannot be served by the device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("unsupported combination: color {color:?} dtype {dtype:?} pixel index {pixel_index}")]
    UnsupportedCombination {
        color: ColorMode,
        dtype: DataType,
        pixel_index: u32,
    },

    #[error("requested geometry {requested:?} differs from streaming geometry {streaming:?}")]
    GeometryMismatch {
        requested: (u32, u32),
        streaming: (u32, u32),
    },

    #[error("requested encoding {requested} differs from streaming encoding {streaming}")]
    FormatMismatch {
        requested: PixelFormat,
        streaming: PixelFormat,
    },

    #[error("invalid image size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
}

/// Errors raised by the acquisition pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Enumeration, lookup or open failure while connecting.
    #[error("connection failed in {op}: {reason}")]
    Connection { op: &'static str, reason: String },

    /// An operation required a connected camera.
    #[error("camera is not connected")]
    NotConnected,

    /// Lifecycle request not valid in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("format negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("buffer allocation failed in {op}: {status}")]
    Allocation { op: &'static str, status: SdkStatus },

    /// Stream setup failed during start; the stream has been closed again.
    #[error("stream setup failed in {op}: {status}")]
    Setup { op: &'static str, status: SdkStatus },

    /// Queue or get-frame failure. Fatal to the stream.
    #[error("capture failed in {op}: {status}")]
    Capture { op: &'static str, status: SdkStatus },

    /// The frame pump did not exit within the stop bound.
    #[error("frame pump did not stop within {0:?}")]
    StopTimeout(std::time::Duration),

    #[error("conversion failed in {op}: {reason}")]
    Conversion { op: &'static str, reason: String },

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("parameter {name} failed: {status}")]
    Parameter { name: &'static str, status: SdkStatus },

    #[error("parameter {name} value {value} outside [{min}, {max}] step {inc}")]
    OutOfRange {
        name: &'static str,
        value: u32,
        min: u32,
        max: u32,
        inc: u32,
    },
}

impl PipelineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Connection { .. } => ErrorClass::Connection,
            Self::NotConnected | Self::InvalidState(_) => ErrorClass::State,
            Self::Negotiation(_) => ErrorClass::Negotiation,
            Self::Allocation { .. } => ErrorClass::Allocation,
            Self::Setup { .. } => ErrorClass::Setup,
            Self::Capture { .. } | Self::StopTimeout(_) => ErrorClass::Capture,
            Self::Conversion { .. } => ErrorClass::Conversion,
            Self::Publish(_) => ErrorClass::Publish,
            Self::Parameter { .. } | Self::OutOfRange { .. } => ErrorClass::Parameter,
        }
    }

    /// True when the error forces a transition of the acquisition state.
    pub fn changes_state(&self) -> bool {
        matches!(self.class(), ErrorClass::Connection | ErrorClass::Capture)
    }
}

/// Maps a vendor status into the pipeline taxonomy and logs it with the
/// originating operation name.
pub fn classify(op: &'static str, class: ErrorClass, status: SdkStatus) -> PipelineError {
    error!(op, code = status.code(), ?class, "EVT error: {status}");
    match class {
        ErrorClass::Connection => PipelineError::Connection {
            op,
            reason: status.to_string(),
        },
        ErrorClass::Allocation => PipelineError::Allocation { op, status },
        ErrorClass::Capture => PipelineError::Capture { op, status },
        ErrorClass::Conversion => PipelineError::Conversion {
            op,
            reason: status.to_string(),
        },
        ErrorClass::Parameter => PipelineError::Parameter { name: op, status },
        ErrorClass::Publish => PipelineError::Publish(format!("{op}: {status}")),
        ErrorClass::State | ErrorClass::Negotiation | ErrorClass::Setup => {
            PipelineError::Setup { op, status }
        }
    }
}

/// Wraps an SDK call result, classifying any failure.
pub fn sdk_call<T>(op: &'static str, class: ErrorClass, result: SdkResult<T>) -> Result<T> {
    result.map_err(|status| classify(op, class, status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(SdkStatus::check(0), Ok(()));
        assert_eq!(SdkStatus::check(7), Err(SdkStatus::Timeout));
        assert_eq!(SdkStatus::check(42), Err(SdkStatus::Unknown(42)));
        for code in 1..=11 {
            let status = SdkStatus::check(code).unwrap_err();
            assert_eq!(status.code(), code);
        }
    }

    #[test]
    fn test_only_connection_and_capture_change_state() {
        let capture = classify("getFrame", ErrorClass::Capture, SdkStatus::DeviceLostConnection);
        assert!(capture.changes_state());

        let alloc = classify("allocateFrameBuffer", ErrorClass::Allocation, SdkStatus::NoMemory);
        assert_eq!(alloc.class(), ErrorClass::Allocation);
        assert!(!alloc.changes_state());

        let convert = classify("convertFrame", ErrorClass::Conversion, SdkStatus::Io);
        assert!(!convert.changes_state());

        let open = classify("openDevice", ErrorClass::Connection, SdkStatus::Search);
        assert!(open.changes_state());
    }

    #[test]
    fn test_sdk_call_keeps_operation_name() {
        let err = sdk_call::<()>("queueFrame", ErrorClass::Capture, Err(SdkStatus::Io))
            .unwrap_err();
        assert_eq!(
            err,
            PipelineError::Capture {
                op: "queueFrame",
                status: SdkStatus::Io
            }
        );
        assert!(err.to_string().contains("queueFrame"));
    }
}
