//! Writers for uniform and push-constant blocks.
//!
//! A pass stages its uniform block and push-constant block in CPU memory
//! every frame. [`BlockWriter`] writes each value at the offsets reflection
//! found, once per block the value lives in, and does nothing for values the
//! shader doesn't declare.

use crate::reflection::UniformLocation;

/// Identity 4x4 matrix, column-major.
pub const IDENTITY_MVP: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// `(width, height, 1/width, 1/height)`.
pub fn size_vec4(width: u32, height: u32) -> [f32; 4] {
    let w = width as f32;
    let h = height as f32;
    [w, h, 1.0 / w, 1.0 / h]
}

/// Writes values into a staged uniform block and push-constant block.
#[derive(Debug)]
pub struct BlockWriter<'a> {
    ubo: &'a mut [u8],
    push: &'a mut [u8],
}

impl<'a> BlockWriter<'a> {
    /// Wrap the staged blocks. Either may be empty.
    pub fn new(ubo: &'a mut [u8], push: &'a mut [u8]) -> Self {
        Self { ubo, push }
    }

    /// Write raw bytes at every offset of `location`.
    pub fn write_bytes(&mut self, location: UniformLocation, bytes: &[u8]) {
        if let Some(offset) = location.ubo_offset {
            write_into(self.ubo, offset, bytes, "uniform block");
        }
        if let Some(offset) = location.push_offset {
            write_into(self.push, offset, bytes, "push constant block");
        }
    }

    /// Write a 4x4 matrix.
    pub fn write_mat4(&mut self, location: UniformLocation, value: &[f32; 16]) {
        self.write_bytes(location, bytemuck::cast_slice(value));
    }

    /// Write a size as `(width, height, 1/width, 1/height)`.
    pub fn write_size(&mut self, location: UniformLocation, width: u32, height: u32) {
        self.write_bytes(location, bytemuck::cast_slice(&size_vec4(width, height)));
    }

    /// Write an unsigned integer.
    pub fn write_u32(&mut self, location: UniformLocation, value: u32) {
        self.write_bytes(location, bytemuck::bytes_of(&value));
    }

    /// Write a signed integer.
    pub fn write_i32(&mut self, location: UniformLocation, value: i32) {
        self.write_bytes(location, bytemuck::bytes_of(&value));
    }

    /// Write a float.
    pub fn write_f32(&mut self, location: UniformLocation, value: f32) {
        self.write_bytes(location, bytemuck::bytes_of(&value));
    }
}

fn write_into(block: &mut [u8], offset: u32, bytes: &[u8], what: &str) {
    let start = offset as usize;
    let end = start + bytes.len();
    match block.get_mut(start..end) {
        Some(dst) => dst.copy_from_slice(bytes),
        None => log::error!(
            "Write of {} bytes at {} overflows {} of {} bytes",
            bytes.len(),
            start,
            what,
            block.len()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(ubo: Option<u32>, push: Option<u32>) -> UniformLocation {
        UniformLocation {
            ubo_offset: ubo,
            push_offset: push,
        }
    }

    #[test]
    fn test_writes_both_blocks() {
        let mut ubo = vec![0u8; 32];
        let mut push = vec![0u8; 16];
        let mut writer = BlockWriter::new(&mut ubo, &mut push);
        writer.write_size(location(Some(16), Some(0)), 4, 2);

        let ubo_floats: Vec<f32> = bytemuck::pod_collect_to_vec(&ubo[16..]);
        let push_floats: Vec<f32> = bytemuck::pod_collect_to_vec(&push);
        assert_eq!(ubo_floats, vec![4.0, 2.0, 0.25, 0.5]);
        assert_eq!(push_floats, ubo_floats);
    }

    #[test]
    fn test_absent_location_is_noop() {
        let mut ubo = vec![0u8; 16];
        let mut push = Vec::new();
        let mut writer = BlockWriter::new(&mut ubo, &mut push);
        writer.write_u32(UniformLocation::default(), 7);
        assert!(ubo.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_out_of_bounds_is_dropped() {
        let mut ubo = vec![0u8; 8];
        let mut push = Vec::new();
        let mut writer = BlockWriter::new(&mut ubo, &mut push);
        writer.write_mat4(location(Some(0), None), &IDENTITY_MVP);
        writer.write_i32(location(Some(4), None), -1);
        assert_eq!(bytemuck::pod_read_unaligned::<i32>(&ubo[4..8]), -1);
        assert_eq!(&ubo[0..4], &[0, 0, 0, 0]);
    }
}
