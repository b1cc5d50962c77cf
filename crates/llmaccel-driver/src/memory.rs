//! DMA regions handed to the device session
//!
//! Allocation and pinning belong to the platform's memory manager. The
//! session only needs, per region, the bus address the device sees and a
//! host view of the contents.

use crate::config::EngineConfig;

/// Simulated bus address of the prompt buffer.
pub const SIM_INPUT_ADDR: u64 = 0x1000_0000;
/// Simulated bus address of the output buffer.
pub const SIM_OUTPUT_ADDR: u64 = 0x2000_0000;
/// Simulated bus address of the key/value cache.
pub const SIM_KV_CACHE_ADDR: u64 = 0x3000_0000;

/// One device-visible buffer of 32-bit words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmaRegion {
    phys_addr: u64,
    words: Vec<u32>,
}

impl DmaRegion {
    /// Zero-filled region of `len` words at bus address `phys_addr`.
    pub fn zeroed(phys_addr: u64, len: usize) -> Self {
        Self {
            phys_addr,
            words: vec![0; len],
        }
    }

    /// Bus address the device uses.
    pub const fn phys_addr(&self) -> u64 {
        self.phys_addr
    }

    /// Capacity in words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Zero-length region.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Host view.
    pub fn as_slice(&self) -> &[u32] {
        &self.words
    }

    /// Mutable host view.
    pub fn as_mut_slice(&mut self) -> &mut [u32] {
        &mut self.words
    }

    /// Copy as much of `src` as fits, returning the number of words written.
    pub fn fill_from(&mut self, src: &[u32]) -> usize {
        let n = src.len().min(self.words.len());
        self.words[..n].copy_from_slice(&src[..n]);
        n
    }

    /// Zero every word.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }
}

/// The three regions a generation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryLayout {
    /// Prompt tokens
    pub input: DmaRegion,
    /// Generated tokens
    pub output: DmaRegion,
    /// Attention key/value state
    pub kv_cache: DmaRegion,
}

impl MemoryLayout {
    /// Regions at the fixed simulation addresses, sized from `cfg`.
    pub fn simulated(cfg: &EngineConfig) -> Self {
        Self {
            input: DmaRegion::zeroed(SIM_INPUT_ADDR, cfg.input_words),
            output: DmaRegion::zeroed(SIM_OUTPUT_ADDR, cfg.output_words),
            kv_cache: DmaRegion::zeroed(SIM_KV_CACHE_ADDR, cfg.kv_cache_words),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_truncates_to_capacity() {
        let mut r = DmaRegion::zeroed(0, 4);
        assert_eq!(r.fill_from(&[1, 2, 3, 4, 5, 6]), 4);
        assert_eq!(r.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn short_fill_leaves_tail() {
        let mut r = DmaRegion::zeroed(0, 4);
        r.as_mut_slice().fill(9);
        assert_eq!(r.fill_from(&[1]), 1);
        assert_eq!(r.as_slice(), &[1, 9, 9, 9]);
    }

    #[test]
    fn simulated_layout_uses_config_sizes() {
        let layout = MemoryLayout::simulated(&EngineConfig::default());
        assert_eq!(layout.input.len(), 4096);
        assert_eq!(layout.output.len(), 1024);
        assert_eq!(layout.kv_cache.len(), 65_536);
        assert_eq!(layout.kv_cache.phys_addr(), SIM_KV_CACHE_ADDR);
    }
}
