use thiserror::Error;

use crate::mem::MemoryFault;

/// Represents an error during emulation.
///
/// Every variant is terminal for the current run: once one is returned the
/// machine's registers and program counter are no longer meaningful.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum EmulationError {
    /// The low 7 bits of the fetched word name no supported format.
    #[error("unsupported opcode {value:#09b}")]
    UnsupportedOpcode { value: u32 },
    /// A known format carried a (funct3, funct7) combination outside the
    /// supported set. `field` names the offending field.
    #[error("unsupported {field} {value:#x}")]
    UnsupportedFunction { field: &'static str, value: u32 },
    /// A load, store or fetch left the guest address space.
    #[error(transparent)]
    MemoryFault(#[from] MemoryFault),
}
