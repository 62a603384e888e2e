// CPU render surface
// Software fallback: one-pass scale+convert into a window-sized pixel
// buffer, then a block blit to the window

use std::num::NonZeroU32;
use std::sync::Arc;

use winit::window::Window;

use crate::frame::{chroma_dimensions, FrameData, Plane, VideoFrame};

use super::{Extent, RendererError};

/// Convert a full-range BT.601 YUV triple to a packed 0RGB pixel.
/// Coefficients match the GPU conversion passes.
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> u32 {
    let yf = y as f32 / 255.0;
    let uf = u as f32 / 255.0 - 0.5;
    let vf = v as f32 / 255.0 - 0.5;

    let r = yf + 1.402 * vf;
    let g = yf - 0.344 * uf - 0.714 * vf;
    let b = yf + 1.772 * uf;

    let r = (r.clamp(0.0, 1.0) * 255.0) as u32;
    let g = (g.clamp(0.0, 1.0) * 255.0) as u32;
    let b = (b.clamp(0.0, 1.0) * 255.0) as u32;
    (r << 16) | (g << 8) | b
}

/// Reject frames whose plane buffers cannot cover the declared geometry
/// before the per-pixel sweep starts.
fn validate_planes(frame: &VideoFrame) -> Result<(), RendererError> {
    let w = frame.width() as usize;
    let h = frame.height() as usize;
    let (chroma_w, chroma_h) = chroma_dimensions(frame.width(), frame.height());
    let (cw, ch) = (chroma_w as usize, chroma_h as usize);

    fn plane_ok(plane: &Plane, width_bytes: usize, rows: usize) -> bool {
        plane.stride >= width_bytes
            && plane.data.len() >= plane.stride * (rows - 1) + width_bytes
    }

    let ok = match frame.data() {
        FrameData::I420 { y, u, v } => {
            plane_ok(y, w, h) && plane_ok(u, cw, ch) && plane_ok(v, cw, ch)
        }
        FrameData::Nv12 { y, uv } => plane_ok(y, w, h) && plane_ok(uv, cw * 2, ch),
        FrameData::Bgra { data } => plane_ok(data, w * 4, h),
        FrameData::Surface { .. } => {
            return Err(RendererError::RenderError(
                "hardware surface must be read back before CPU conversion".into(),
            ));
        }
    };
    if ok {
        Ok(())
    } else {
        Err(RendererError::RenderError(
            "plane buffer too small for declared size".into(),
        ))
    }
}

/// Sample the source frame at pixel (sx, sy), honoring plane strides.
fn sample_pixel(frame: &VideoFrame, sx: u32, sy: u32) -> Result<u32, RendererError> {
    let sx = sx as usize;
    let sy = sy as usize;
    match frame.data() {
        FrameData::I420 { y, u, v } => {
            let luma = y.data[sy * y.stride + sx];
            let cb = u.data[(sy / 2) * u.stride + sx / 2];
            let cr = v.data[(sy / 2) * v.stride + sx / 2];
            Ok(yuv_to_rgb(luma, cb, cr))
        }
        FrameData::Nv12 { y, uv } => {
            let luma = y.data[sy * y.stride + sx];
            let chroma = (sy / 2) * uv.stride + (sx / 2) * 2;
            Ok(yuv_to_rgb(luma, uv.data[chroma], uv.data[chroma + 1]))
        }
        FrameData::Bgra { data } => {
            let px = sy * data.stride + sx * 4;
            let b = data.data[px] as u32;
            let g = data.data[px + 1] as u32;
            let r = data.data[px + 2] as u32;
            Ok((r << 16) | (g << 8) | b)
        }
        FrameData::Surface { .. } => Err(RendererError::RenderError(
            "hardware surface must be read back before CPU conversion".into(),
        )),
    }
}

/// Transform the source frame (any pixel format, any size) directly into
/// the destination buffer at destination size and format in one pass -
/// nearest-neighbor scale and color conversion combined, bounding per-frame
/// cost to a single sweep over the destination.
pub fn scale_convert(
    frame: &VideoFrame,
    dst: &mut [u32],
    dst_width: u32,
    dst_height: u32,
) -> Result<(), RendererError> {
    let src_w = frame.width();
    let src_h = frame.height();
    if src_w == 0 || src_h == 0 {
        return Err(RendererError::RenderError("degenerate source frame".into()));
    }
    if dst.len() < (dst_width * dst_height) as usize {
        return Err(RendererError::RenderError("destination buffer too small".into()));
    }
    validate_planes(frame)?;

    for dy in 0..dst_height {
        let sy = (dy * src_h / dst_height).min(src_h - 1);
        let row = (dy * dst_width) as usize;
        for dx in 0..dst_width {
            let sx = (dx * src_w / dst_width).min(src_w - 1);
            dst[row + dx as usize] = sample_pixel(frame, sx, sy)?;
        }
    }
    Ok(())
}

/// CPU render surface: a softbuffer pixel buffer sized to the window.
pub struct CpuSurface {
    surface: softbuffer::Surface<Arc<Window>, Arc<Window>>,
    extent: Extent,
}

impl CpuSurface {
    pub fn create(window: Arc<Window>) -> Result<Self, RendererError> {
        let size = window.inner_size();
        let context = softbuffer::Context::new(window.clone())
            .map_err(|e| RendererError::InitError(format!("Failed to create context: {}", e)))?;
        let mut surface = softbuffer::Surface::new(&context, window)
            .map_err(|e| RendererError::InitError(format!("Failed to create surface: {}", e)))?;

        let extent = Extent::new(size.width.max(1), size.height.max(1));
        let (w, h) = nonzero_extent(extent)?;
        surface
            .resize(w, h)
            .map_err(|e| RendererError::InitError(format!("Failed to size buffer: {}", e)))?;

        log::info!("CPU surface initialized at {}x{}", extent.width, extent.height);
        Ok(Self { surface, extent })
    }

    /// Resize the pixel buffer to the window. No-op for unchanged dimensions.
    pub fn resize(&mut self, width: u32, height: u32) {
        if !self.extent.should_resize(width, height) {
            return;
        }
        let extent = Extent::new(width.max(1), height.max(1));
        match nonzero_extent(extent) {
            Ok((w, h)) => {
                if let Err(e) = self.surface.resize(w, h) {
                    log::error!("Failed to resize CPU surface: {}", e);
                    return;
                }
                self.extent = extent;
            }
            Err(e) => log::error!("Failed to resize CPU surface: {}", e),
        }
    }

    /// Convert `frame` into the pixel buffer and blit it to the window.
    /// Hardware-resident frames are read back into a software frame first.
    pub fn render_frame(&mut self, frame: &VideoFrame) -> Result<(), RendererError> {
        let resolved;
        let frame = match frame.data() {
            FrameData::Surface { surface, index } => {
                resolved = surface
                    .read_back(*index)
                    .map_err(|e| RendererError::RenderError(e.to_string()))?;
                &resolved
            }
            _ => frame,
        };

        let mut buffer = self
            .surface
            .buffer_mut()
            .map_err(|e| RendererError::RenderError(format!("Failed to map buffer: {}", e)))?;
        scale_convert(frame, &mut buffer, self.extent.width, self.extent.height)?;
        buffer
            .present()
            .map_err(|e| RendererError::RenderError(format!("Failed to present: {}", e)))?;
        Ok(())
    }
}

fn nonzero_extent(extent: Extent) -> Result<(NonZeroU32, NonZeroU32), RendererError> {
    let w = NonZeroU32::new(extent.width)
        .ok_or_else(|| RendererError::WindowError("zero-width surface".into()))?;
    let h = NonZeroU32::new(extent.height)
        .ok_or_else(|| RendererError::WindowError("zero-height surface".into()))?;
    Ok((w, h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{DeviceSurface, FrameError, Plane, SurfaceViews};

    fn rgb(pixel: u32) -> (u32, u32, u32) {
        ((pixel >> 16) & 0xff, (pixel >> 8) & 0xff, pixel & 0xff)
    }

    #[test]
    fn test_bgra_passthrough() {
        // 2x2 solid red, tight stride
        let data: Vec<u8> = [0u8, 0, 255, 255].repeat(4);
        let frame = VideoFrame::bgra(2, 2, None, Plane::new(data, 8));

        let mut dst = vec![0u32; 4];
        scale_convert(&frame, &mut dst, 2, 2).unwrap();
        assert!(dst.iter().all(|&p| p == 0x00FF0000));
    }

    #[test]
    fn test_bgra_honors_stride() {
        // 2x2 frame with 4 bytes of row padding; padding is never read.
        let stride = 12;
        let mut data = vec![0xEEu8; stride * 2];
        for row in 0..2 {
            for col in 0..2 {
                let px = row * stride + col * 4;
                data[px] = 255; // blue
                data[px + 1] = 0;
                data[px + 2] = 0;
                data[px + 3] = 255;
            }
        }
        let frame = VideoFrame::bgra(2, 2, None, Plane::new(data, stride));

        let mut dst = vec![0u32; 4];
        scale_convert(&frame, &mut dst, 2, 2).unwrap();
        assert!(dst.iter().all(|&p| p == 0x000000FF));
    }

    #[test]
    fn test_i420_solid_red() {
        // Full-range BT.601 red: Y=76, U=85, V=255
        let frame = VideoFrame::i420(
            2,
            2,
            None,
            Plane::new(vec![76; 4], 2),
            Plane::new(vec![85; 1], 1),
            Plane::new(vec![255; 1], 1),
        );

        let mut dst = vec![0u32; 4];
        scale_convert(&frame, &mut dst, 2, 2).unwrap();
        let (r, g, b) = rgb(dst[0]);
        assert!(r > 250, "r = {}", r);
        assert!(g < 5, "g = {}", g);
        assert!(b < 5, "b = {}", b);
    }

    #[test]
    fn test_nv12_mid_gray() {
        let frame = VideoFrame::nv12(
            2,
            2,
            None,
            Plane::new(vec![128; 4], 2),
            Plane::new(vec![128; 2], 2),
        );

        let mut dst = vec![0u32; 4];
        scale_convert(&frame, &mut dst, 2, 2).unwrap();
        // Neutral chroma sits at 127.5 in full range, so channels land on
        // 127 or 128 depending on rounding.
        let (r, g, b) = rgb(dst[0]);
        for channel in [r, g, b] {
            assert!((127..=128).contains(&channel), "channel = {}", channel);
        }
    }

    #[test]
    fn test_upscale_is_single_pass_nearest() {
        // 2x2 checkerboard upscaled to 4x4: each source pixel covers a 2x2
        // destination block.
        let mut data = vec![0u8; 16];
        for (i, px) in [(0usize, 255u8), (1, 0), (2, 0), (3, 255)] {
            data[i * 4] = px;
            data[i * 4 + 1] = px;
            data[i * 4 + 2] = px;
            data[i * 4 + 3] = 255;
        }
        let frame = VideoFrame::bgra(2, 2, None, Plane::new(data, 8));

        let mut dst = vec![0u32; 16];
        scale_convert(&frame, &mut dst, 4, 4).unwrap();
        assert_eq!(dst[0], 0x00FFFFFF);
        assert_eq!(dst[3], 0x00000000);
        assert_eq!(dst[12], 0x00000000);
        assert_eq!(dst[15], 0x00FFFFFF);
    }

    /// Surface stub standing in for a device that rejects slice binds.
    struct RejectingSurface;

    impl DeviceSurface for RejectingSurface {
        fn bind_views(&self, _index: u32) -> Result<SurfaceViews, FrameError> {
            Err(FrameError::BindFailed("arbitrary slice binds rejected".into()))
        }

        fn read_back(&self, _index: u32) -> Result<VideoFrame, FrameError> {
            // 2x2 solid red
            let data: Vec<u8> = [0u8, 0, 255, 255].repeat(4);
            Ok(VideoFrame::bgra(2, 2, None, Plane::new(data, 8)))
        }
    }

    #[test]
    fn test_bind_failure_falls_back_to_readback() {
        let surface: std::sync::Arc<dyn DeviceSurface> = std::sync::Arc::new(RejectingSurface);
        let frame = VideoFrame::hardware(2, 2, None, surface.clone(), 0);

        // The zero-copy bind deterministically fails...
        assert!(surface.bind_views(0).is_err());

        // ...and the readback fallback still produces the correct image
        // through the normal conversion path.
        let FrameData::Surface { surface, index } = frame.data() else {
            panic!("expected a hardware frame");
        };
        let software = surface.read_back(*index).unwrap();
        let mut dst = vec![0u32; 16];
        scale_convert(&software, &mut dst, 4, 4).unwrap();
        assert!(dst.iter().all(|&p| p == 0x00FF0000));
    }
}
