//! # OBX Core
//!
//! This crate contains the core mechanisms shared by the workspace:
//! the lock-free byte ring that carries audio and MIDI data between the
//! transport engine and the host audio process, and the monotonic clock
//! backing the host time contract.

pub mod clock;
pub mod ring;

pub use clock::MonotonicClock;
pub use ring::{ByteRing, RingConsumer, RingProducer, RingReader, RingWriter};
