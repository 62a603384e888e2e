// Frameview - real-time video frame presentation pipeline
// Main library entry point
//
// Receives decoded frames from a producer thread, hands them to the UI
// thread through a latest-wins relay, and composites them to an on-screen
// surface - GPU textures via wgpu, or a CPU pixel buffer fallback, chosen
// once at startup.

pub mod frame;
pub mod presenter;
pub mod relay;
pub mod renderer;

pub use frame::{DeviceSurface, FrameData, FrameError, PixelFormat, Plane, VideoFrame};
pub use presenter::{Presenter, ViewerConfig, ViewerEvent, ViewerHandle, ViewerWindow};
pub use relay::{FrameRelay, FrameSink, RenderScheduler};
pub use renderer::{BackendKind, DestRect, RenderConfig, RenderSurface, RendererError};
