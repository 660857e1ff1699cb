//! Accessor pairs for reading and writing scalar fields of object images.
//!
//! Resolver callbacks and schema authors use these instead of hand-written
//! slicing; all scalars are little-endian in the image, matching the wire.

/// Read a `u8` field at `offset`.
pub fn get_u8(image: &[u8], offset: usize) -> u8 {
    image[offset]
}

/// Write a `u8` field at `offset`.
pub fn put_u8(image: &mut [u8], offset: usize, value: u8) {
    image[offset] = value;
}

/// Read a little-endian `u16` field at `offset`.
pub fn get_u16(image: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(image[offset..offset + 2].try_into().unwrap())
}

/// Write a little-endian `u16` field at `offset`.
pub fn put_u16(image: &mut [u8], offset: usize, value: u16) {
    image[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Read a little-endian `u32` field at `offset`.
pub fn get_u32(image: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(image[offset..offset + 4].try_into().unwrap())
}

/// Write a little-endian `u32` field at `offset`.
pub fn put_u32(image: &mut [u8], offset: usize, value: u32) {
    image[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
