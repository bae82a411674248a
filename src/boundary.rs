//! Capability interfaces for the two opaque collaborators: the processing
//! boundary that turns frames into processed state, and the render stage
//! that draws it.

use crate::frame::FrameContract;
use crate::shared::Processed;
use crate::types::Size;

/// The processing boundary.
///
/// [`initialize`](Processor::initialize) is called exactly once per session,
/// before any frame. [`process`](Processor::process) runs synchronously on
/// the capture context and must be done with the frame when it returns.
pub trait Processor: Send + 'static {
    /// The shared processed state (a texture upload buffer, an edge map...).
    type State: Clone + Send + Sync + 'static;
    type Error: core::error::Error + Send + Sync + 'static;

    /// Set up internal resources for frames of `size` and return the initial
    /// processed state.
    fn initialize(&mut self, size: Size) -> Result<Self::State, Self::Error>;

    /// Transform `frame` into `state`. `state` is a back buffer the render
    /// stage cannot see until this call returns.
    fn process(&mut self, frame: &FrameContract<'_>, state: &mut Self::State);
}

/// The render stage. Runs on the render context only.
pub trait Renderer<S>: Send + 'static {
    type Error: core::error::Error + Send + Sync + 'static;

    /// Called once when the render surface becomes available.
    fn initialize_surface(&mut self) -> Result<(), Self::Error>;

    /// Called once per satisfied render request with the latest fully
    /// published state.
    fn draw(&mut self, state: &Processed<S>);

    /// Called once at teardown, after the last draw has returned.
    fn release_surface(&mut self) {}
}
