// Render surface module
// Dual-backend presentation: GPU textures via wgpu, or a CPU pixel buffer

pub mod cpu;
pub mod gpu;
pub mod texture;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use winit::window::Window;

use crate::frame::VideoFrame;

pub use cpu::CpuSurface;
pub use gpu::{ArrayTextureSurface, GpuSurface};
pub use texture::TextureCache;

#[derive(Error, Debug)]
pub enum RendererError {
    #[error("Failed to initialize renderer: {0}")]
    InitError(String),
    #[error("Render failed: {0}")]
    RenderError(String),
    #[error("Window error: {0}")]
    WindowError(String),
    #[error("GPU not available: {0}")]
    GpuNotAvailable(String),
    #[error("Texture allocation failed: {0}")]
    AllocError(String),
}

/// Rendering backend, decided once at startup and never re-evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Gpu,
    Cpu,
}

/// Render surface configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RenderConfig {
    pub backend: BackendKind,
    /// Preferred adapter device id. A missing or unknown id falls back to
    /// the default hardware adapter.
    pub adapter_id: Option<u32>,
}

/// Destination rectangle in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl DestRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Current surface size, updated only on explicit resize events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A resize to the current dimensions is a no-op.
    pub fn should_resize(&self, width: u32, height: u32) -> bool {
        self.width != width || self.height != height
    }
}

/// One render-surface interface over the two backends. The variant is fixed
/// at construction by `RenderConfig::backend`.
pub enum RenderSurface {
    Gpu(GpuSurface),
    Cpu(CpuSurface),
}

impl RenderSurface {
    pub fn create(window: Arc<Window>, config: &RenderConfig) -> Result<Self, RendererError> {
        match config.backend {
            BackendKind::Gpu => Ok(Self::Gpu(GpuSurface::create(window, config.adapter_id)?)),
            BackendKind::Cpu => Ok(Self::Cpu(CpuSurface::create(window)?)),
        }
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        match self {
            Self::Gpu(surface) => surface.resize(width, height),
            Self::Cpu(surface) => surface.resize(width, height),
        }
    }

    /// Upload/convert `frame` and present it filling the surface.
    pub fn render_frame(&mut self, frame: &VideoFrame) -> Result<(), RendererError> {
        match self {
            Self::Gpu(surface) => surface.render_frame(frame),
            Self::Cpu(surface) => surface.render_frame(frame),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_is_idempotent() {
        let extent = Extent::new(1280, 720);
        assert!(!extent.should_resize(1280, 720));
        assert!(!extent.should_resize(1280, 720));
        assert!(extent.should_resize(1920, 1080));
        assert!(extent.should_resize(1280, 721));
    }

    #[test]
    fn test_backend_default_is_gpu() {
        assert_eq!(RenderConfig::default().backend, BackendKind::Gpu);
    }

    #[test]
    fn test_full_dest_rect() {
        let rect = DestRect::full(640, 480);
        assert_eq!(rect.x, 0);
        assert_eq!(rect.y, 0);
        assert_eq!(rect.width, 640);
        assert_eq!(rect.height, 480);
    }
}
