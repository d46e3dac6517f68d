use std::fmt;

use thiserror::Error;

/// Size of the guest stack region in bytes.
pub const STACK_SIZE: usize = 0x10000;

/// One-past-the-end address of the stack region; the stack grows downward
/// from here.
const STACK_TOP: u64 = 0x8000_0000;

/// The kind of access that faulted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Load,
    Store,
    Fetch,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Access::Load => "load",
            Access::Store => "store",
            Access::Fetch => "fetch",
        })
    }
}

/// A guest memory access that landed outside the guest address space.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("{access} at {address:#x} is outside the guest address space")]
pub struct MemoryFault {
    pub address: u64,
    pub access: Access,
}

/// Byte-addressed, bounds-checked access to the guest address space.
///
/// Multi-byte accessors compose little-endian words from the byte ops, so
/// implementors only provide [`Memory::load_u8`] and [`Memory::store_u8`].
/// An access that straddles the edge of a mapped region faults on the first
/// byte outside it.
pub trait Memory {
    /// Loads the byte at the given guest address.
    fn load_u8(&self, address: u64) -> Result<u8, MemoryFault>;
    /// Stores a byte at the given guest address.
    fn store_u8(&mut self, address: u64, value: u8) -> Result<(), MemoryFault>;

    /// Loads a little-endian [`u32`] at the given guest address.
    fn load_u32(&self, address: u64) -> Result<u32, MemoryFault> {
        let mut bytes = [0; 4];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.load_u8(address.wrapping_add(i as u64))?;
        }
        Ok(u32::from_le_bytes(bytes))
    }
    /// Loads a little-endian [`u64`] at the given guest address.
    fn load_u64(&self, address: u64) -> Result<u64, MemoryFault> {
        let mut bytes = [0; 8];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = self.load_u8(address.wrapping_add(i as u64))?;
        }
        Ok(u64::from_le_bytes(bytes))
    }
    /// Stores a little-endian [`u32`] at the given guest address.
    fn store_u32(&mut self, address: u64, value: u32) -> Result<(), MemoryFault> {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.store_u8(address.wrapping_add(i as u64), byte)?;
        }
        Ok(())
    }
    /// Stores a little-endian [`u64`] at the given guest address.
    fn store_u64(&mut self, address: u64, value: u64) -> Result<(), MemoryFault> {
        for (i, byte) in value.to_le_bytes().into_iter().enumerate() {
            self.store_u8(address.wrapping_add(i as u64), byte)?;
        }
        Ok(())
    }
}

/// The flat guest address space: a code/data image loaded at `image_base`
/// plus a zeroed [`STACK_SIZE`]-byte stack region ending at a fixed top.
/// Anything outside those two regions faults.
///
/// See the [`Memory`] trait.
pub struct FlatMemory {
    image: Vec<u8>,
    image_base: u64,
    stack: Vec<u8>,
    stack_base: u64,
}

impl FlatMemory {
    /// Maps `image` at `image_base` and places the zeroed stack just below
    /// [`FlatMemory::stack_top`]. The image must end below the stack region.
    pub fn new(image: Vec<u8>, image_base: u64) -> Self {
        let stack_base = STACK_TOP - STACK_SIZE as u64;
        debug_assert!(image_base + image.len() as u64 <= stack_base);
        Self {
            image,
            image_base,
            stack: vec![0; STACK_SIZE],
            stack_base,
        }
    }

    /// One-past-the-end address of the stack region, where SP starts.
    pub fn stack_top(&self) -> u64 {
        self.stack_base + self.stack.len() as u64
    }

    fn byte(&self, address: u64) -> Option<&u8> {
        if let Some(offset) = address.checked_sub(self.stack_base) {
            if let Some(byte) = self.stack.get(offset as usize) {
                return Some(byte);
            }
        }
        let offset = address.checked_sub(self.image_base)?;
        self.image.get(offset as usize)
    }

    fn byte_mut(&mut self, address: u64) -> Option<&mut u8> {
        if let Some(offset) = address.checked_sub(self.stack_base) {
            if offset < self.stack.len() as u64 {
                return self.stack.get_mut(offset as usize);
            }
        }
        let offset = address.checked_sub(self.image_base)?;
        self.image.get_mut(offset as usize)
    }
}

impl Memory for FlatMemory {
    fn load_u8(&self, address: u64) -> Result<u8, MemoryFault> {
        self.byte(address).copied().ok_or(MemoryFault {
            address,
            access: Access::Load,
        })
    }

    fn store_u8(&mut self, address: u64, value: u8) -> Result<(), MemoryFault> {
        match self.byte_mut(address) {
            Some(byte) => {
                *byte = value;
                Ok(())
            }
            None => Err(MemoryFault {
                address,
                access: Access::Store,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_roundtrips_a_doubleword() {
        let mut memory = FlatMemory::new(vec![], 0x1000);
        let address = memory.stack_top() - 8;
        memory.store_u64(address, 0xdead_beef_cafe_f00d).unwrap();
        assert_eq!(memory.load_u64(address).unwrap(), 0xdead_beef_cafe_f00d);
    }

    #[test]
    fn image_bytes_are_readable_at_their_base() {
        let memory = FlatMemory::new(vec![0x13, 0x00, 0x00, 0x00], 0x1000);
        assert_eq!(memory.load_u32(0x1000).unwrap(), 0x13);
        assert_eq!(memory.load_u8(0x1003).unwrap(), 0);
    }

    #[test]
    fn unmapped_addresses_fault_with_the_address() {
        let memory = FlatMemory::new(vec![0; 4], 0x1000);
        let fault = memory.load_u8(0x2000).unwrap_err();
        assert_eq!(fault.address, 0x2000);
        assert_eq!(fault.access, Access::Load);
    }

    #[test]
    fn access_straddling_the_stack_end_faults() {
        let mut memory = FlatMemory::new(vec![], 0x1000);
        let top = memory.stack_top();
        assert!(memory.store_u64(top - 4, 0).is_err());
        assert!(memory.load_u32(top - 2).is_err());
    }

    #[test]
    fn stack_starts_zeroed() {
        let memory = FlatMemory::new(vec![], 0x1000);
        assert_eq!(memory.load_u64(memory.stack_top() - 8).unwrap(), 0);
    }
}
