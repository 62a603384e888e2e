// Frame data model
// Decoded frames shared between the producer thread and the presenter

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Surface bind failed: {0}")]
    BindFailed(String),
    #[error("Surface readback failed: {0}")]
    ReadbackFailed(String),
}

/// Pixel-format families the presenter understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Planar 4:2:0 - three separate planes, chroma at half resolution
    I420,
    /// Semi-planar 4:2:0 - luma plane plus one interleaved two-channel chroma plane
    Nv12,
    /// Packed 32-bit RGB
    Bgra,
    /// Opaque hardware-resident surface referenced by handle + array index
    Surface,
}

/// One plane of a software frame.
///
/// `stride` is the row pitch in bytes and may exceed the tight row width;
/// consumers must honor it and never read past `stride` bytes per row.
#[derive(Debug, Clone)]
pub struct Plane {
    pub data: Vec<u8>,
    pub stride: usize,
}

impl Plane {
    pub fn new(data: Vec<u8>, stride: usize) -> Self {
        Self { data, stride }
    }
}

/// Shader-readable views over a bound hardware surface (luma + chroma).
pub struct SurfaceViews {
    pub luma: wgpu::TextureView,
    pub chroma: wgpu::TextureView,
}

/// A decoded image still resident in device memory.
///
/// `bind_views` and `read_back` are kept as two separate operations: the
/// renderer first attempts the zero-copy bind and only then falls back to a
/// CPU readback through the normal plane-upload path.
pub trait DeviceSurface: Send + Sync {
    /// Attempt a zero-copy bind of the surface at `index` as shader-readable
    /// plane views. Fails on devices that reject arbitrary slice binds.
    fn bind_views(&self, index: u32) -> Result<SurfaceViews, FrameError>;

    /// Read the surface at `index` back into a software frame.
    fn read_back(&self, index: u32) -> Result<VideoFrame, FrameError>;
}

/// Frame payload - per-plane buffers for software frames, or an opaque
/// device-surface handle for hardware frames.
pub enum FrameData {
    I420 { y: Plane, u: Plane, v: Plane },
    Nv12 { y: Plane, uv: Plane },
    Bgra { data: Plane },
    Surface { surface: Arc<dyn DeviceSurface>, index: u32 },
}

impl fmt::Debug for FrameData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameData::I420 { .. } => f.write_str("I420"),
            FrameData::Nv12 { .. } => f.write_str("Nv12"),
            FrameData::Bgra { .. } => f.write_str("Bgra"),
            FrameData::Surface { index, .. } => write!(f, "Surface(index={})", index),
        }
    }
}

/// A decoded video frame.
///
/// Immutable once produced; shared as `Arc<VideoFrame>` between the producer
/// and the relay until the last reference drops.
#[derive(Debug)]
pub struct VideoFrame {
    width: u32,
    height: u32,
    /// Presentation timestamp in microseconds. Carried for the host, not
    /// consumed by the relay (latest-wins, no timestamp pacing).
    pts: Option<i64>,
    data: FrameData,
}

impl VideoFrame {
    /// Create a planar 4:2:0 frame from three planes.
    pub fn i420(width: u32, height: u32, pts: Option<i64>, y: Plane, u: Plane, v: Plane) -> Self {
        Self {
            width,
            height,
            pts,
            data: FrameData::I420 { y, u, v },
        }
    }

    /// Create a semi-planar 4:2:0 frame from a luma plane and an interleaved
    /// chroma plane.
    pub fn nv12(width: u32, height: u32, pts: Option<i64>, y: Plane, uv: Plane) -> Self {
        Self {
            width,
            height,
            pts,
            data: FrameData::Nv12 { y, uv },
        }
    }

    /// Create a packed BGRA frame.
    pub fn bgra(width: u32, height: u32, pts: Option<i64>, data: Plane) -> Self {
        Self {
            width,
            height,
            pts,
            data: FrameData::Bgra { data },
        }
    }

    /// Create a frame referencing a hardware-resident surface.
    pub fn hardware(
        width: u32,
        height: u32,
        pts: Option<i64>,
        surface: Arc<dyn DeviceSurface>,
        index: u32,
    ) -> Self {
        Self {
            width,
            height,
            pts,
            data: FrameData::Surface { surface, index },
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    pub fn data(&self) -> &FrameData {
        &self.data
    }

    pub fn format(&self) -> PixelFormat {
        match self.data {
            FrameData::I420 { .. } => PixelFormat::I420,
            FrameData::Nv12 { .. } => PixelFormat::Nv12,
            FrameData::Bgra { .. } => PixelFormat::Bgra,
            FrameData::Surface { .. } => PixelFormat::Surface,
        }
    }

    /// A degenerate frame has a zero dimension or an empty required plane.
    /// The relay treats such a push as a no-op.
    pub fn is_degenerate(&self) -> bool {
        if self.width == 0 || self.height == 0 {
            return true;
        }
        match &self.data {
            FrameData::I420 { y, u, v } => {
                y.data.is_empty() || u.data.is_empty() || v.data.is_empty()
            }
            FrameData::Nv12 { y, uv } => y.data.is_empty() || uv.data.is_empty(),
            FrameData::Bgra { data } => data.data.is_empty(),
            FrameData::Surface { .. } => false,
        }
    }
}

/// Chroma plane dimensions for a 4:2:0 frame (half width, half height,
/// rounded up for odd sizes).
pub fn chroma_dimensions(width: u32, height: u32) -> (u32, u32) {
    ((width + 1) / 2, (height + 1) / 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_plane(w: usize, h: usize, value: u8) -> Plane {
        Plane::new(vec![value; w * h], w)
    }

    #[test]
    fn test_format_tags() {
        let frame = VideoFrame::i420(
            4,
            4,
            None,
            solid_plane(4, 4, 0),
            solid_plane(2, 2, 0),
            solid_plane(2, 2, 0),
        );
        assert_eq!(frame.format(), PixelFormat::I420);

        let frame = VideoFrame::nv12(4, 4, None, solid_plane(4, 4, 0), solid_plane(4, 2, 0));
        assert_eq!(frame.format(), PixelFormat::Nv12);

        let frame = VideoFrame::bgra(2, 2, None, Plane::new(vec![0; 16], 8));
        assert_eq!(frame.format(), PixelFormat::Bgra);
    }

    #[test]
    fn test_degenerate_frames() {
        let frame = VideoFrame::bgra(0, 2, None, Plane::new(vec![0; 16], 8));
        assert!(frame.is_degenerate());

        let frame = VideoFrame::bgra(2, 2, None, Plane::new(vec![], 8));
        assert!(frame.is_degenerate());

        let frame = VideoFrame::bgra(2, 2, None, Plane::new(vec![0; 16], 8));
        assert!(!frame.is_degenerate());
    }

    #[test]
    fn test_chroma_dimensions() {
        assert_eq!(chroma_dimensions(1920, 1080), (960, 540));
        assert_eq!(chroma_dimensions(1919, 1079), (960, 540));
        assert_eq!(chroma_dimensions(2, 2), (1, 1));
    }
}
