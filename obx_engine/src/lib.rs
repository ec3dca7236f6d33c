//! # OBX Engine
//!
//! Transport engine for Overbridge-class USB audio/MIDI hardware. The
//! engine drives the vendor alternate setting's four endpoints, converts
//! between the framed big-endian wire format and interleaved f32, schedules
//! MIDI against the device sample clock, and hands everything to the host
//! through lock-free byte rings.
//!
//! The host process owns the rings, the clock, and (optionally) a
//! clock-recovery filter; it passes them in via [`HostContext`]. The engine
//! owns the USB device, the worker threads, and the wire buffers.
//!
//! # Quick Start
//!
//! ```ignore
//! use obx_engine::{Engine, HostContext};
//!
//! let mut engine = Engine::open(bus, address, 24)?;
//! engine.activate(context)?;
//!
//! // ... audio and MIDI flow through the rings ...
//!
//! engine.stop();
//! engine.wait();
//! ```
//!
//! # Features
//!
//! - `sinc` (default) - sinc fallback stretcher via rubato; without it the
//!   underflow path falls back to linear interpolation

mod audio;
mod midi;
mod resample;
mod state;
mod transfer;

pub mod context;
pub mod device;
pub mod engine;
pub mod error;

pub use context::{ClockRecovery, EngineOptions, HostContext};
pub use device::{DEVICE_TABLE, DeviceDesc};
pub use engine::{DEFAULT_BLOCKS_PER_TRANSFER, Engine};
pub use error::{EngineError, Result};
pub use state::{Latencies, Status};
