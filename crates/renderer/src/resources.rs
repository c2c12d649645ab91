//! Backend-neutral resource handles and descriptors.

use std::fmt;

/// Opaque handle to a texture owned by a [`RenderBackend`](crate::backend::RenderBackend).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(u32);

impl TextureHandle {
    pub fn from_raw(id: u32) -> Self {
        Self(id)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TextureHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "texture#{}", self.0)
    }
}

/// Opaque handle to uploaded mesh geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshHandle(u32);

impl MeshHandle {
    pub fn from_raw(id: u32) -> Self {
        Self(id)
    }

    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// Render target formats used by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    Rgba16Float,
    Rgba8Unorm,
    Depth32Float,
}

impl TargetFormat {
    pub fn to_wgpu(self) -> wgpu::TextureFormat {
        match self {
            TargetFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TargetFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TargetFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }

    pub fn bytes_per_texel(self) -> u64 {
        match self {
            TargetFormat::Rgba16Float => 8,
            TargetFormat::Rgba8Unorm | TargetFormat::Depth32Float => 4,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(self, TargetFormat::Depth32Float)
    }
}

/// Declared shape of a render target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: String,
    pub width: u32,
    pub height: u32,
    /// Array layers (1 for plain targets).
    pub layers: u32,
    /// Bound as a texture array even when only one layer exists.
    pub array: bool,
    pub format: TargetFormat,
}

impl TextureDesc {
    pub fn target(label: impl Into<String>, width: u32, height: u32, format: TargetFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            layers: 1,
            array: false,
            format,
        }
    }

    pub fn view_dimension(&self) -> wgpu::TextureViewDimension {
        if self.array || self.layers > 1 {
            wgpu::TextureViewDimension::D2Array
        } else {
            wgpu::TextureViewDimension::D2
        }
    }

    pub fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.layers as u64 * self.format.bytes_per_texel()
    }
}

/// Color space of uploaded 8-bit texture data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    /// Colour data (albedo, emission) stored gamma-encoded.
    Srgb,
    /// Data maps (normal, metallic, roughness, occlusion).
    Linear,
}

/// Tightly packed RGBA8 pixels for material textures.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub color_space: ColorSpace,
}

impl TextureData {
    pub fn solid(label: impl Into<String>, rgba: [u8; 4], color_space: ColorSpace) -> Self {
        Self {
            label: label.into(),
            width: 1,
            height: 1,
            pixels: rgba.to_vec(),
            color_space,
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() == self.width as usize * self.height as usize * 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_targets_use_2d_views_and_arrays_stay_arrays() {
        let target = TextureDesc::target("hdr", 64, 32, TargetFormat::Rgba16Float);
        assert_eq!(target.view_dimension(), wgpu::TextureViewDimension::D2);

        let single_layer_array = TextureDesc {
            array: true,
            ..TextureDesc::target("atlas", 16, 16, TargetFormat::Depth32Float)
        };
        assert_eq!(single_layer_array.view_dimension(), wgpu::TextureViewDimension::D2Array);
        assert_eq!(single_layer_array.byte_size(), 16 * 16 * 4);
    }
}
