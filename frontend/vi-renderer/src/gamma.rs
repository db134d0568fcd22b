//! Gamma lookup table for the scale stage.
//!
//! The original hardware's gamma boost is a square root over the 8-bit channel range,
//! applied after filtering. Precomputing the 256-entry table on the CPU keeps the shader
//! free of per-pixel `sqrt` calls and pins down the exact quantization.

use wgpu::util::DeviceExt;

pub(crate) const GAMMA_TABLE_LEN: usize = 256;

pub(crate) fn build_gamma_table() -> [f32; GAMMA_TABLE_LEN] {
    let mut table = [0.0_f32; GAMMA_TABLE_LEN];
    for (i, entry) in table.iter_mut().enumerate() {
        *entry = (i as f32 / 255.0).sqrt();
    }
    table
}

pub(crate) fn create_gamma_buffer(device: &wgpu::Device) -> wgpu::Buffer {
    let table = build_gamma_table();
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: "gamma_table_buffer".into(),
        contents: bytemuck::cast_slice(&table),
        usage: wgpu::BufferUsages::STORAGE,
    })
}
