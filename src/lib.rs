// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # Emergent Camera Acquisition Library
//!
//! Frame acquisition and format conversion pipeline for Emergent Vision
//! GigE cameras. The library drives the device stream lifecycle
//! (open, acquire, capture, release, close), negotiates the device's native
//! pixel encoding against the format the host requests, and hands every
//! converted frame to an [`OutputSink`](sink::OutputSink) in a freshly
//! allocated buffer.
//!
//! ## Components
//!
//! - **Format negotiation** ([`format`]): maps a requested color mode and
//!   sample type to a native pixel format and conversion directive.
//! - **Buffer lifecycle** ([`buffers`]): SDK-owned frame buffers released
//!   exactly once on every path.
//! - **Frame pump** ([`pump`]): the per-frame capture, convert and publish
//!   cycle running on a dedicated worker.
//! - **Acquisition controller** ([`controller`]): connection, Idle/Streaming
//!   state machine and camera parameters.
//! - **SDK boundary** ([`sdk`]) with an in-process simulation ([`sim`]).
//!
//! ## Example
//!
//! ```no_run
//! use emergent_camera::controller::{AcquisitionController, ControllerConfig};
//! use emergent_camera::sim::{SimConfig, SimSdk};
//! use emergent_camera::sink::{ChannelSink, ImageMode, RequestedFormat};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let format = RequestedFormat {
//!     image_mode: ImageMode::Multiple(10),
//!     ..Default::default()
//! };
//! let (sink, frames) = ChannelSink::new(format, 16);
//! let sdk = Arc::new(SimSdk::new(SimConfig::default()));
//! let ctrl = AcquisitionController::new(sdk, Arc::new(sink), ControllerConfig::default());
//!
//! ctrl.connect("EVT-SIM-0001")?;
//! ctrl.start()?;
//! while let Ok(frame) = frames.recv() {
//!     println!("{frame}");
//!     if frame.sequence_id() == 10 {
//!         break;
//!     }
//! }
//! ctrl.disconnect()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Safety
//!
//! Zero-copy frame buffers are memory owned by the camera SDK. They are
//! modeled by [`sdk::FrameBuffer`], which can only be handed back through
//! the SDK and is never freed by the host allocator.

pub mod buffers;
pub mod controller;
pub mod convert;
pub mod error;
pub mod format;
pub mod image;
pub mod pump;
pub mod sdk;
pub mod sim;
pub mod sink;
