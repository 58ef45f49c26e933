//! Live audio endpoint access
//!
//! This module provides:
//! - The connection contract the reconciler drives (sessions and master volume)
//! - An in-process mixer for tests and simulations
//! - The PipeWire endpoint (the default `pipewire` feature)

mod memory;
#[cfg(feature = "pipewire")]
mod pipewire;

pub use memory::{MemoryBackend, MemoryConnection};
#[cfg(feature = "pipewire")]
pub use self::pipewire::{PipeWireBackend, PipeWireConnection};

use crate::error::EndpointError;
use crate::models::LiveSession;

/// Backend the command-line front end talks to
#[cfg(feature = "pipewire")]
pub type DefaultBackend = PipeWireBackend;
#[cfg(not(feature = "pipewire"))]
pub type DefaultBackend = Unsupported;

/// Something that can open a connection to the audio subsystem
pub trait AudioBackend {
    type Connection: AudioConnection;

    /// Open a connection; it is released when dropped
    fn connect(&self) -> Result<Self::Connection, EndpointError>;
}

/// An open connection to the default output device and its sessions
pub trait AudioConnection {
    /// Enumerate the output sessions that exist right now
    fn sessions(&mut self) -> Result<Vec<LiveSession>, EndpointError>;

    /// Set one session's volume scalar (0.0-1.0)
    fn set_session_volume(&mut self, id: u32, volume: f32) -> Result<(), EndpointError>;

    /// Master volume scalar of the default output device
    fn master_volume(&mut self) -> Result<f32, EndpointError>;

    fn set_master_volume(&mut self, volume: f32) -> Result<(), EndpointError>;
}

/// Backend for `--no-default-features` builds; every connection fails
#[derive(Debug, Clone, Copy, Default)]
pub struct Unsupported;

impl AudioBackend for Unsupported {
    type Connection = MemoryConnection;

    fn connect(&self) -> Result<Self::Connection, EndpointError> {
        log::warn!("Built without a live audio endpoint (enable the `pipewire` feature)");
        Err(EndpointError::DeviceUnavailable)
    }
}

/// Convert a linear channel gain into the perceptual scalar desktop mixers show
pub fn scalar_from_linear(linear: f32) -> f32 {
    crate::models::clamp_volume(linear.max(0.0).cbrt())
}

/// Convert a perceptual volume scalar into a linear channel gain
pub fn linear_from_scalar(scalar: f32) -> f32 {
    let scalar = crate::models::clamp_volume(scalar);
    scalar * scalar * scalar
}
