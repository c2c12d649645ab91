//! Size-dependent render targets.
//!
//! A [`FramebufferSet`] is created whole or not at all: if any attachment
//! fails, the ones already made are destroyed before the error is returned.
//! The shadow atlas is not part of the set because it never depends on the
//! framebuffer size.

use crate::backend::RenderBackend;
use crate::error::{RenderError, RenderResult};
use crate::resources::{TargetFormat, TextureDesc, TextureHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attachment {
    /// World position, w = coverage.
    Position,
    /// World normal, w = roughness.
    Normal,
    AlbedoMetallic,
    EmissionAo,
    Depth,
    /// Linear lit radiance.
    Hdr,
    PostA,
    PostB,
    BlurA,
    BlurB,
}

impl Attachment {
    pub const ALL: [Attachment; 10] = [
        Attachment::Position,
        Attachment::Normal,
        Attachment::AlbedoMetallic,
        Attachment::EmissionAo,
        Attachment::Depth,
        Attachment::Hdr,
        Attachment::PostA,
        Attachment::PostB,
        Attachment::BlurA,
        Attachment::BlurB,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Attachment::Position => "G-Buffer Position",
            Attachment::Normal => "G-Buffer Normal",
            Attachment::AlbedoMetallic => "G-Buffer Albedo Metallic",
            Attachment::EmissionAo => "G-Buffer Emission AO",
            Attachment::Depth => "G-Buffer Depth",
            Attachment::Hdr => "HDR Color",
            Attachment::PostA => "Post A",
            Attachment::PostB => "Post B",
            Attachment::BlurA => "Blur A",
            Attachment::BlurB => "Blur B",
        }
    }

    pub fn format(self) -> TargetFormat {
        match self {
            Attachment::AlbedoMetallic => TargetFormat::Rgba8Unorm,
            Attachment::Depth => TargetFormat::Depth32Float,
            _ => TargetFormat::Rgba16Float,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Descriptors for every attachment at one size.
pub fn attachment_descs(width: u32, height: u32) -> Vec<(Attachment, TextureDesc)> {
    Attachment::ALL
        .iter()
        .map(|&a| (a, TextureDesc::target(a.label(), width, height, a.format())))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramebufferSet {
    width: u32,
    height: u32,
    handles: [TextureHandle; 10],
}

impl FramebufferSet {
    /// Allocate every attachment, or nothing.
    pub fn create<B: RenderBackend + ?Sized>(backend: &mut B, width: u32, height: u32) -> RenderResult<Self> {
        if width == 0 || height == 0 {
            return Err(RenderError::allocation(
                "framebuffer set",
                format!("{width}x{height} has a zero dimension"),
            ));
        }
        let mut created: Vec<TextureHandle> = Vec::with_capacity(Attachment::ALL.len());
        for (attachment, desc) in attachment_descs(width, height) {
            match backend.create_texture(&desc) {
                Ok(handle) => created.push(handle),
                Err(err) => {
                    log::debug!(
                        "{} failed; releasing {} attachments created so far",
                        attachment.label(),
                        created.len()
                    );
                    for handle in created {
                        backend.destroy_texture(handle);
                    }
                    return Err(err);
                }
            }
        }
        let handles: [TextureHandle; 10] = created
            .try_into()
            .map_err(|_| RenderError::allocation("framebuffer set", "attachment count mismatch"))?;
        let set = Self { width, height, handles };
        set.validate(backend)?;
        Ok(set)
    }

    /// Destroy every attachment.
    pub fn release<B: RenderBackend + ?Sized>(self, backend: &mut B) {
        for handle in self.handles {
            backend.destroy_texture(handle);
        }
    }

    /// Every attachment exists and matches the set's size.
    pub fn validate<B: RenderBackend + ?Sized>(&self, backend: &B) -> RenderResult<()> {
        for attachment in Attachment::ALL {
            let handle = self.get(attachment);
            match backend.texture_desc(handle) {
                Some(desc) if desc.width == self.width && desc.height == self.height => {}
                Some(desc) => {
                    return Err(RenderError::initialization(
                        "framebuffer",
                        format!(
                            "{} is {}x{}, expected {}x{}",
                            attachment.label(),
                            desc.width,
                            desc.height,
                            self.width,
                            self.height
                        ),
                    ))
                }
                None => {
                    return Err(RenderError::initialization(
                        "framebuffer",
                        format!("{} ({handle}) is missing", attachment.label()),
                    ))
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, attachment: Attachment) -> TextureHandle {
        self.handles[attachment.index()]
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn handles(&self) -> &[TextureHandle] {
        &self.handles
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SoftwareBackend, SoftwareLimits};

    fn backend(budget: u64) -> SoftwareBackend {
        SoftwareBackend::new(
            SoftwareLimits {
                max_texture_dimension: 4096,
                memory_budget_bytes: budget,
                ..SoftwareLimits::default()
            },
            1,
        )
    }

    #[test]
    fn creates_every_attachment_at_the_requested_size() {
        let mut backend = backend(u64::MAX);
        let set = FramebufferSet::create(&mut backend, 32, 16).unwrap();
        assert_eq!(set.size(), (32, 16));
        assert_eq!(backend.live_texture_count(), Attachment::ALL.len());
        let depth = backend.texture_desc(set.get(Attachment::Depth)).unwrap();
        assert_eq!(depth.format, TargetFormat::Depth32Float);
        set.release(&mut backend);
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn partial_failure_releases_what_was_created() {
        // Room for the four G-buffer colour targets but not the rest.
        let mut backend = backend(8 * 8 * (8 + 8 + 4 + 8));
        assert!(FramebufferSet::create(&mut backend, 8, 8).is_err());
        assert_eq!(backend.live_texture_count(), 0);
        assert_eq!(backend.used_bytes(), 0);
    }

    #[test]
    fn zero_dimension_is_an_allocation_error() {
        let mut backend = backend(u64::MAX);
        assert!(matches!(
            FramebufferSet::create(&mut backend, 0, 10),
            Err(RenderError::Allocation { .. })
        ));
    }

    #[test]
    fn validation_notices_a_destroyed_attachment() {
        let mut backend = backend(u64::MAX);
        let set = FramebufferSet::create(&mut backend, 4, 4).unwrap();
        backend.destroy_texture(set.get(Attachment::Hdr));
        assert!(set.validate(&backend).is_err());
    }
}
