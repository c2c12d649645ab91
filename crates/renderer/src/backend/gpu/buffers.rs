//! Growable GPU buffers for per-draw uniforms and light lists.

use crate::uniforms::DYNAMIC_STRIDE;
use bytemuck::Pod;
use std::num::NonZeroU64;

/// Byte image of `items` laid out at [`DYNAMIC_STRIDE`] intervals.
pub fn pack_dynamic<T: Pod>(items: &[T]) -> Vec<u8> {
    let mut bytes = vec![0u8; items.len() * DYNAMIC_STRIDE as usize];
    for (i, item) in items.iter().enumerate() {
        let src = bytemuck::bytes_of(item);
        let start = i * DYNAMIC_STRIDE as usize;
        bytes[start..start + src.len()].copy_from_slice(src);
    }
    bytes
}

/// Offset of element `index` in a dynamic uniform buffer.
pub fn dynamic_offset(index: usize) -> u32 {
    (index as u64 * DYNAMIC_STRIDE) as u32
}

/// Uniform buffer holding one `T` per draw, bound with a dynamic offset.
pub struct DynamicUniforms<T: Pod> {
    label: &'static str,
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    capacity: usize,
    _marker: std::marker::PhantomData<T>,
}

impl<T: Pod> DynamicUniforms<T> {
    pub fn new(device: &wgpu::Device, layout: &wgpu::BindGroupLayout, label: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (buffer, bind_group) = Self::allocate(device, layout, label, capacity);
        Self {
            label,
            buffer,
            bind_group,
            capacity,
            _marker: std::marker::PhantomData,
        }
    }

    fn allocate(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        label: &'static str,
        capacity: usize,
    ) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: capacity as u64 * DYNAMIC_STRIDE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: NonZeroU64::new(std::mem::size_of::<T>() as u64),
                }),
            }],
        });
        (buffer, bind_group)
    }

    /// Upload `items`, doubling the buffer first if they do not fit.
    pub fn write(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, layout: &wgpu::BindGroupLayout, items: &[T]) {
        if items.is_empty() {
            return;
        }
        if items.len() > self.capacity {
            let capacity = items.len().next_power_of_two();
            log::debug!("growing {} to {capacity} entries", self.label);
            let (buffer, bind_group) = Self::allocate(device, layout, self.label, capacity);
            self.buffer = buffer;
            self.bind_group = bind_group;
            self.capacity = capacity;
        }
        queue.write_buffer(&self.buffer, 0, &pack_dynamic(items));
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }
}

/// Read-only storage buffer that is recreated when its contents outgrow it.
pub struct StorageBuffer {
    label: &'static str,
    buffer: wgpu::Buffer,
}

impl StorageBuffer {
    pub fn new(device: &wgpu::Device, label: &'static str, size: u64) -> Self {
        Self {
            label,
            buffer: Self::allocate(device, label, size),
        }
    }

    fn allocate(device: &wgpu::Device, label: &'static str, size: u64) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: size.max(16),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    pub fn write(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, bytes: &[u8]) {
        if bytes.len() as u64 > self.buffer.size() {
            log::debug!("growing {} to {} bytes", self.label, bytes.len());
            self.buffer = Self::allocate(device, self.label, (bytes.len() as u64).next_power_of_two());
        }
        if !bytes.is_empty() {
            queue.write_buffer(&self.buffer, 0, bytes);
        }
    }

    pub fn binding(&self) -> wgpu::BindingResource<'_> {
        self.buffer.as_entire_binding()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_packing_places_items_on_the_stride() {
        let bytes = pack_dynamic(&[[1.0f32; 4], [2.0f32; 4]]);
        assert_eq!(bytes.len(), 2 * DYNAMIC_STRIDE as usize);
        let second: [f32; 4] = bytemuck::pod_read_unaligned(&bytes[256..272]);
        assert_eq!(second, [2.0; 4]);
        assert!(bytes[16..256].iter().all(|&b| b == 0));
        assert_eq!(dynamic_offset(3), 768);
    }
}
