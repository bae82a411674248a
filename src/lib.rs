//! Real-time camera frame hand-off.
//!
//! A [`CameraStream`] delivers frames one at a time on a serial capture
//! context, dropping stale frames rather than queueing them. Each frame is
//! handed synchronously to a [`Processor`] through a [`Bridge`], which
//! publishes the result into double-buffered shared state and raises a
//! [`RenderTrigger`]. A render context draws the latest published state once
//! per pending trigger, and never otherwise.
//!
//! [`Session`] wires these together and owns their startup and teardown
//! order.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod frame;
pub mod types;

#[cfg(feature = "std")]
pub mod backpressure;
#[cfg(feature = "std")]
pub mod boundary;
#[cfg(feature = "std")]
pub mod bridge;
#[cfg(feature = "std")]
pub mod device;
#[cfg(feature = "std")]
pub mod error;
#[cfg(feature = "std")]
pub mod platform;
#[cfg(feature = "std")]
pub mod render;
#[cfg(feature = "std")]
pub mod session;
#[cfg(feature = "std")]
pub mod shared;
#[cfg(feature = "std")]
pub mod stats;
#[cfg(feature = "std")]
pub mod stream;
#[cfg(feature = "std")]
pub mod trigger;

// Re-exports
pub use frame::*;
pub use types::*;

#[cfg(feature = "std")]
pub use boundary::*;
#[cfg(feature = "std")]
pub use bridge::Bridge;
#[cfg(feature = "std")]
pub use device::*;
#[cfg(feature = "std")]
pub use error::*;
#[cfg(feature = "std")]
pub use render::{RenderDriver, RenderLoop};
#[cfg(feature = "std")]
pub use session::Session;
#[cfg(feature = "std")]
pub use shared::{Processed, StateReader, StateWriter, shared_state};
#[cfg(feature = "std")]
pub use stats::{PipelineStats, StatsSnapshot};
#[cfg(feature = "std")]
pub use stream::*;
#[cfg(feature = "std")]
pub use trigger::{RenderTrigger, TriggerState};
