//! # Restream Engine
//!
//! Relays one upstream live byte stream (MPEG-TS or similar) to many local
//! consumers without opening more than one upstream connection.
//!
//! ## Core Types
//!
//! - [`RingBuffer`] - fixed-capacity circular buffer with one writer and many readers
//! - [`RingReader`] - independent read cursor with overrun detection
//! - [`Restreamer`] - bridges an HTTP GET into a ring buffer
//! - [`RestreamRegistry`] - one restreamer per media source

pub mod config;
pub mod error;
pub mod registry;
pub mod restreamer;
pub mod ring_buffer;

pub use config::{DEFAULT_BUFFER_CAPACITY, RestreamConfig, create_client};
pub use error::{RestreamError, Result};
pub use registry::RestreamRegistry;
pub use restreamer::{RestreamReader, Restreamer};
pub use ring_buffer::{RingBuffer, RingReader, RingWriter};
