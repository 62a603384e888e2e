// Texture cache
// GPU-resident per-plane textures, lazily (re)allocated on format/size change

use crate::frame::{chroma_dimensions, FrameData, PixelFormat, Plane, VideoFrame};

use super::RendererError;

/// Identity of the current allocation. Any mismatch with an incoming frame
/// invalidates the whole set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TexKey {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

/// Reallocation decision for an `ensure` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsurePlan {
    Keep,
    Recreate,
}

impl EnsurePlan {
    pub fn for_key(current: Option<TexKey>, requested: TexKey) -> Self {
        match current {
            Some(key) if key == requested => EnsurePlan::Keep,
            _ => EnsurePlan::Recreate,
        }
    }
}

/// Row-by-row plane copy honoring source stride and destination pitch
/// independently. Copies exactly `rows` rows of `width_bytes` bytes each and
/// never reads beyond the declared source stride.
pub fn copy_plane(
    dst: &mut [u8],
    dst_pitch: usize,
    src: &[u8],
    src_stride: usize,
    width_bytes: usize,
    rows: usize,
) {
    for row in 0..rows {
        let src_off = row * src_stride;
        let dst_off = row * dst_pitch;
        dst[dst_off..dst_off + width_bytes]
            .copy_from_slice(&src[src_off..src_off + width_bytes]);
    }
}

/// Owns the GPU-resident plane textures and their shader-readable views for
/// the frame most recently uploaded.
///
/// One texture per plane, except for semi-planar frames on devices that
/// support the combined NV12 format, where a single texture exposes a luma
/// view and a two-channel chroma view.
pub struct TextureCache {
    key: Option<TexKey>,
    textures: Vec<wgpu::Texture>,
    views: Vec<wgpu::TextureView>,
    bind_group: Option<wgpu::BindGroup>,
    /// Semi-planar planes live in one NV12 texture rather than two.
    combined_chroma: bool,
    /// Repack buffer for planes whose stride is not tight.
    scratch: Vec<u8>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self {
            key: None,
            textures: Vec::new(),
            views: Vec::new(),
            bind_group: None,
            combined_chroma: false,
            scratch: Vec::new(),
        }
    }

    pub fn key(&self) -> Option<TexKey> {
        self.key
    }

    pub fn bind_group(&self) -> Option<&wgpu::BindGroup> {
        self.bind_group.as_ref()
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn plan(&self, format: PixelFormat, width: u32, height: u32) -> EnsurePlan {
        EnsurePlan::for_key(
            self.key,
            TexKey {
                format,
                width,
                height,
            },
        )
    }

    /// Full release. The set is never left half-updated: the key is cleared
    /// first and only restored once every plane resource exists again.
    fn clear(&mut self) {
        self.key = None;
        self.bind_group = None;
        self.views.clear();
        self.textures.clear();
        self.combined_chroma = false;
    }

    /// Make the cached allocation match `(format, width, height)`. No-op if
    /// it already does; otherwise releases all plane resources and allocates
    /// a fresh set.
    pub fn ensure(
        &mut self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        sampler: &wgpu::Sampler,
        format: PixelFormat,
        width: u32,
        height: u32,
    ) -> Result<(), RendererError> {
        if width == 0 || height == 0 {
            return Err(RendererError::AllocError(format!(
                "degenerate texture size {}x{}",
                width, height
            )));
        }
        if self.plan(format, width, height) == EnsurePlan::Keep {
            return Ok(());
        }
        self.clear();

        let (chroma_w, chroma_h) = chroma_dimensions(width, height);
        match format {
            PixelFormat::I420 => {
                // Full-resolution luma, half-size chroma planes.
                for (label, w, h) in [
                    ("Y Plane", width, height),
                    ("U Plane", chroma_w, chroma_h),
                    ("V Plane", chroma_w, chroma_h),
                ] {
                    let texture =
                        create_plane_texture(device, label, w, h, wgpu::TextureFormat::R8Unorm);
                    self.views
                        .push(texture.create_view(&wgpu::TextureViewDescriptor::default()));
                    self.textures.push(texture);
                }
            }
            PixelFormat::Nv12 => {
                // Combined texture first; split textures are the mandatory
                // fallback, attempted before any allocation failure is
                // surfaced.
                let combined = device
                    .features()
                    .contains(wgpu::Features::TEXTURE_FORMAT_NV12)
                    && width % 2 == 0
                    && height % 2 == 0;
                if combined {
                    let texture = device.create_texture(&wgpu::TextureDescriptor {
                        label: Some("NV12 Texture"),
                        size: wgpu::Extent3d {
                            width,
                            height,
                            depth_or_array_layers: 1,
                        },
                        mip_level_count: 1,
                        sample_count: 1,
                        dimension: wgpu::TextureDimension::D2,
                        format: wgpu::TextureFormat::NV12,
                        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                        view_formats: &[
                            wgpu::TextureFormat::R8Unorm,
                            wgpu::TextureFormat::Rg8Unorm,
                        ],
                    });
                    self.views.push(texture.create_view(&wgpu::TextureViewDescriptor {
                        label: Some("NV12 Luma View"),
                        format: Some(wgpu::TextureFormat::R8Unorm),
                        aspect: wgpu::TextureAspect::Plane0,
                        ..Default::default()
                    }));
                    self.views.push(texture.create_view(&wgpu::TextureViewDescriptor {
                        label: Some("NV12 Chroma View"),
                        format: Some(wgpu::TextureFormat::Rg8Unorm),
                        aspect: wgpu::TextureAspect::Plane1,
                        ..Default::default()
                    }));
                    self.textures.push(texture);
                    self.combined_chroma = true;
                } else {
                    log::debug!("Combined NV12 texture unavailable, using split planes");
                    for (label, w, h, fmt) in [
                        ("Y Plane", width, height, wgpu::TextureFormat::R8Unorm),
                        ("UV Plane", chroma_w, chroma_h, wgpu::TextureFormat::Rg8Unorm),
                    ] {
                        let texture = create_plane_texture(device, label, w, h, fmt);
                        self.views
                            .push(texture.create_view(&wgpu::TextureViewDescriptor::default()));
                        self.textures.push(texture);
                    }
                }
            }
            PixelFormat::Bgra => {
                let texture = create_plane_texture(
                    device,
                    "BGRA Frame",
                    width,
                    height,
                    wgpu::TextureFormat::Bgra8UnormSrgb,
                );
                self.views
                    .push(texture.create_view(&wgpu::TextureViewDescriptor::default()));
                self.textures.push(texture);
            }
            PixelFormat::Surface => {
                return Err(RendererError::AllocError(
                    "hardware surfaces are bound directly, not cached".into(),
                ));
            }
        }

        let mut entries: Vec<wgpu::BindGroupEntry> = self
            .views
            .iter()
            .enumerate()
            .map(|(i, view)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: wgpu::BindingResource::TextureView(view),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: self.views.len() as u32,
            resource: wgpu::BindingResource::Sampler(sampler),
        });
        self.bind_group = Some(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Frame Bind Group"),
            layout,
            entries: &entries,
        }));

        self.key = Some(TexKey {
            format,
            width,
            height,
        });
        Ok(())
    }

    /// Upload `frame`'s planes into the cached textures, honoring each
    /// plane's source stride independently of the destination pitch.
    pub fn update(&mut self, queue: &wgpu::Queue, frame: &VideoFrame) -> Result<(), RendererError> {
        let key = self
            .key
            .ok_or_else(|| RendererError::RenderError("no texture set allocated".into()))?;
        let (chroma_w, chroma_h) = chroma_dimensions(key.width, key.height);

        match frame.data() {
            FrameData::I420 { y, u, v } => {
                self.write_plane(queue, 0, wgpu::TextureAspect::All, key.width, key.height, 1, y)?;
                self.write_plane(queue, 1, wgpu::TextureAspect::All, chroma_w, chroma_h, 1, u)?;
                self.write_plane(queue, 2, wgpu::TextureAspect::All, chroma_w, chroma_h, 1, v)?;
            }
            FrameData::Nv12 { y, uv } => {
                if self.combined_chroma {
                    self.write_plane(
                        queue,
                        0,
                        wgpu::TextureAspect::Plane0,
                        key.width,
                        key.height,
                        1,
                        y,
                    )?;
                    self.write_plane(
                        queue,
                        0,
                        wgpu::TextureAspect::Plane1,
                        chroma_w,
                        chroma_h,
                        2,
                        uv,
                    )?;
                } else {
                    self.write_plane(queue, 0, wgpu::TextureAspect::All, key.width, key.height, 1, y)?;
                    self.write_plane(queue, 1, wgpu::TextureAspect::All, chroma_w, chroma_h, 2, uv)?;
                }
            }
            FrameData::Bgra { data } => {
                self.write_plane(queue, 0, wgpu::TextureAspect::All, key.width, key.height, 4, data)?;
            }
            FrameData::Surface { .. } => {
                return Err(RendererError::RenderError(
                    "hardware surface frames bypass the texture cache".into(),
                ));
            }
        }
        Ok(())
    }

    fn write_plane(
        &mut self,
        queue: &wgpu::Queue,
        texture_index: usize,
        aspect: wgpu::TextureAspect,
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
        plane: &Plane,
    ) -> Result<(), RendererError> {
        let texture = self
            .textures
            .get(texture_index)
            .ok_or_else(|| RendererError::RenderError("missing plane texture".into()))?;

        let tight = (width * bytes_per_pixel) as usize;
        let rows = height as usize;
        let required = plane.stride * (rows - 1) + tight;
        if plane.stride < tight || plane.data.len() < required {
            return Err(RendererError::RenderError(format!(
                "plane buffer too small: stride {} len {} for {}x{}",
                plane.stride,
                plane.data.len(),
                width,
                height
            )));
        }

        let (data, bytes_per_row) = if plane.stride == tight {
            (&plane.data[..tight * rows], tight as u32)
        } else {
            // Repack a padded-stride plane tightly; the declared stride is
            // honored row by row.
            self.scratch.resize(tight * rows, 0);
            copy_plane(&mut self.scratch, tight, &plane.data, plane.stride, tight, rows);
            (&self.scratch[..], tight as u32)
        };

        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }
}

impl Default for TextureCache {
    fn default() -> Self {
        Self::new()
    }
}

fn create_plane_texture(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_plan_keeps_matching_key() {
        let key = TexKey {
            format: PixelFormat::I420,
            width: 1920,
            height: 1080,
        };
        assert_eq!(EnsurePlan::for_key(None, key), EnsurePlan::Recreate);
        assert_eq!(EnsurePlan::for_key(Some(key), key), EnsurePlan::Keep);
        // Identical arguments twice in a row: still Keep, zero reallocation.
        assert_eq!(EnsurePlan::for_key(Some(key), key), EnsurePlan::Keep);
    }

    #[test]
    fn test_ensure_plan_recreates_on_any_mismatch() {
        let key = TexKey {
            format: PixelFormat::Nv12,
            width: 1280,
            height: 720,
        };
        let resized = TexKey { width: 1920, ..key };
        let reformatted = TexKey {
            format: PixelFormat::I420,
            ..key
        };
        assert_eq!(EnsurePlan::for_key(Some(key), resized), EnsurePlan::Recreate);
        assert_eq!(
            EnsurePlan::for_key(Some(key), reformatted),
            EnsurePlan::Recreate
        );
    }

    #[test]
    fn test_copy_plane_honors_stride() {
        let width_bytes = 4;
        let rows = 3;
        let src_stride = 7;
        // No padding after the final row: reading past the declared width
        // on the last row would panic.
        let mut src = vec![0xAAu8; src_stride * (rows - 1) + width_bytes];
        for row in 0..rows {
            for col in 0..width_bytes {
                src[row * src_stride + col] = (row * 10 + col) as u8;
            }
        }

        let dst_pitch = 5;
        let mut dst = vec![0u8; dst_pitch * rows];
        copy_plane(&mut dst, dst_pitch, &src, src_stride, width_bytes, rows);

        for row in 0..rows {
            for col in 0..width_bytes {
                assert_eq!(dst[row * dst_pitch + col], (row * 10 + col) as u8);
            }
            // Destination padding is untouched.
            assert_eq!(dst[row * dst_pitch + width_bytes], 0);
        }
    }

    #[test]
    fn test_copy_plane_tight_roundtrip() {
        let src: Vec<u8> = (0..12).collect();
        let mut dst = vec![0u8; 12];
        copy_plane(&mut dst, 4, &src, 4, 4, 3);
        assert_eq!(dst, src);
    }
}
