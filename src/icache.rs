use crate::mem::{Access, Memory, MemoryFault};

const SLOTS: usize = 64;

#[derive(Clone, Copy, Debug)]
struct Slot {
    address: u64,
    word: u32,
}

/// Supplies the raw 32-bit instruction word for a fetch address.
///
/// A small direct-mapped cache keyed by the program counter; misses read
/// the word through the guest memory path. Lines are never invalidated by
/// stores: guest code is treated as immutable for the duration of a run.
#[derive(Debug)]
pub struct InstructionCache {
    slots: [Option<Slot>; SLOTS],
    hits: u64,
    misses: u64,
}

impl InstructionCache {
    pub fn new() -> Self {
        Self {
            slots: [None; SLOTS],
            hits: 0,
            misses: 0,
        }
    }

    /// Returns the little-endian word at `address`.
    ///
    /// The caller guarantees `address` is 4-byte aligned and not the stop
    /// sentinel; an address outside the guest address space is a fetch
    /// fault.
    pub fn fetch(
        &mut self,
        memory: &dyn Memory,
        address: u64,
    ) -> Result<u32, MemoryFault> {
        let index = (address >> 2) as usize % SLOTS;
        if let Some(slot) = self.slots[index] {
            if slot.address == address {
                self.hits += 1;
                return Ok(slot.word);
            }
        }
        let word = memory.load_u32(address).map_err(|fault| MemoryFault {
            access: Access::Fetch,
            ..fault
        })?;
        self.slots[index] = Some(Slot { address, word });
        self.misses += 1;
        Ok(word)
    }

    /// Drops every cached line and resets the hit/miss counters.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

impl Default for InstructionCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::FlatMemory;

    #[test]
    fn hit_and_miss_return_the_same_word() {
        let image = 0xdead_beefu32.to_le_bytes().to_vec();
        let memory = FlatMemory::new(image, 0x1000);
        let mut cache = InstructionCache::new();

        assert_eq!(cache.fetch(&memory, 0x1000).unwrap(), 0xdead_beef);
        assert_eq!(cache.fetch(&memory, 0x1000).unwrap(), 0xdead_beef);
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn colliding_addresses_evict_and_refill() {
        // two addresses 64 words apart map to the same slot
        let stride = (SLOTS * 4) as u64;
        let mut image = vec![0; stride as usize + 4];
        image[..4].copy_from_slice(&0x11u32.to_le_bytes());
        image[stride as usize..].copy_from_slice(&0x22u32.to_le_bytes());
        let memory = FlatMemory::new(image, 0x1000);
        let mut cache = InstructionCache::new();

        assert_eq!(cache.fetch(&memory, 0x1000).unwrap(), 0x11);
        assert_eq!(cache.fetch(&memory, 0x1000 + stride).unwrap(), 0x22);
        assert_eq!(cache.fetch(&memory, 0x1000).unwrap(), 0x11);
        assert_eq!(cache.misses(), 3);
        assert_eq!(cache.hits(), 0);
    }

    #[test]
    fn unmapped_fetch_is_a_fetch_fault() {
        let memory = FlatMemory::new(vec![], 0x1000);
        let fault = InstructionCache::new()
            .fetch(&memory, 0x4000)
            .unwrap_err();
        assert_eq!(fault.access, Access::Fetch);
        assert_eq!(fault.address, 0x4000);
    }
}
