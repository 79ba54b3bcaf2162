use alloc::string::String;

/// Read-only sector access. The one non-negotiable contract: a read
/// always writes a full block into the buffer, so callers size buffers
/// in whole blocks even when the tail goes unused.
pub trait BlockDevice: Send + Sync {
    fn block_size(&self) -> usize;
    /// Addressable blocks; 0 when the device could not be identified.
    fn block_count(&self) -> u64;
    fn read_block(&self, buf: &mut [u8], lba: u32) -> Result<(), String>;
}
