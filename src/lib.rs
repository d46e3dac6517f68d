//! A user-space simulator for a 64-bit RISC-V integer subset (RV64I plus
//! the M-extension multiply).
//!
//! The [`RV64`] machine fetches, decodes and executes instructions against
//! an in-memory register/stack model, producing the simulated routine's
//! return value and an instruction-mix [`Analysis`].
//!
//! ### Execution
//! Build a [`FlatMemory`] holding the guest image, initialize a machine
//! with [`RV64::init`], then drive it with [`RV64::emulate`] (or one
//! instruction at a time with [`RV64::step`]). The run ends when a final
//! `ret` lands the [`STOP`] sentinel in the program counter; any
//! unsupported encoding or out-of-range access ends it early with an
//! [`EmulationError`].

use std::fmt::Debug;

use log::{debug, trace};

pub mod analysis;
pub mod bits;
pub mod exec;
pub mod icache;
pub mod instruction;
pub mod mem;

pub use analysis::Analysis;
pub use exec::EmulationError;
pub use icache::InstructionCache;
pub use mem::{FlatMemory, Memory, MemoryFault, STACK_SIZE};

use instruction::{
    BType, BranchCondition, IType, ImmediateOp, JType, MemWidth, Opcode,
    RType, RegisterOp, SType,
};

/// Program-counter value that terminates emulation.
///
/// Seeded into the return-address register at init, so a routine returning
/// normally through `ret` ends the run. Never a valid code address.
pub const STOP: u64 = 0xffff_ffff_ffff_fffc;

/// ABI names for the register indices the simulator touches by name.
pub mod reg {
    /// x0, hard-wired to zero.
    pub const ZERO: u8 = 0;
    /// x1, the return-address register.
    pub const RA: u8 = 1;
    /// x2, the stack pointer.
    pub const SP: u8 = 2;
    /// x10-x13, the first four argument registers; x10 also carries the
    /// return value.
    pub const A0: u8 = 10;
    pub const A1: u8 = 11;
    pub const A2: u8 = 12;
    pub const A3: u8 = 13;
}

/// A general-purpose register.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Register {
    pub value: u64,
}

impl Register {
    /// Adds the given amount to this register. Useful for things like the
    /// program counter.
    pub fn add(&mut self, count: u64) {
        self.value = self.value.wrapping_add(count);
    }
    pub fn get(&self) -> u64 {
        self.value
    }
    pub fn get_signed(&self) -> i64 {
        self.get() as i64
    }
    pub fn set(&mut self, new_value: u64) {
        self.value = new_value;
    }
    pub fn set_signed(&mut self, new_value: i64) {
        self.set(new_value as u64);
    }
}

impl Debug for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{0x{:016x}}}", self.value)
    }
}

/// A 64-bit RISC-V hart simulating the RV64I integer subset plus multiply.
///
/// One machine is exclusively owned by one run: every executor reads and
/// writes the register file and program counter in place, so a machine must
/// not be shared across concurrent runs.
#[derive(Debug)]
pub struct RV64 {
    registers: [Register; 31], // x0 is hard-wired and stored nowhere
    pub pc: Register,
    pub analysis: Analysis,
    icache: InstructionCache,
}

impl RV64 {
    /// Builds a machine ready to run the routine at `target`.
    ///
    /// All registers start at zero except A0-A3 (seeded from `args`), the
    /// return-address register (seeded with [`STOP`] so a final `ret`
    /// terminates the run) and the stack pointer (seeded with `stack_top`,
    /// one past the end of the guest stack — see
    /// [`FlatMemory::stack_top`]). Analysis counters and the instruction
    /// cache start empty.
    pub fn init(target: u64, args: [u64; 4], stack_top: u64) -> Self {
        let mut machine = Self {
            registers: [Register::default(); 31],
            pc: Register { value: target },
            analysis: Analysis::default(),
            icache: InstructionCache::new(),
        };
        for (i, value) in args.into_iter().enumerate() {
            machine.set_register(reg::A0 + i as u8, value);
        }
        machine.set_register(reg::RA, STOP);
        machine.set_register(reg::SP, stack_top);
        machine
    }

    /// Gets a register's value.
    ///
    /// This should be used instead of indexing directly into `registers`,
    /// as this function will properly manage `x0`.
    pub fn get_register(&self, index: u8) -> u64 {
        let index = (index & 0x1f) as usize;
        if index == 0 {
            0
        } else {
            self.registers[index - 1].get()
        }
    }

    /// Sets a register's value. Writes to `x0` are discarded.
    pub fn set_register(&mut self, index: u8, value: u64) {
        let index = (index & 0x1f) as usize;
        if index != 0 {
            self.registers[index - 1].set(value);
        }
    }

    /// Gets the signed value of a register.
    pub fn get_register_signed(&self, index: u8) -> i64 {
        self.get_register(index) as i64
    }

    /// Sets a register to a signed value. Writes to `x0` are discarded.
    pub fn set_register_signed(&mut self, index: u8, value: i64) {
        self.set_register(index, value as u64);
    }

    /// The instruction cache backing fetches, for hit/miss inspection.
    pub fn icache(&self) -> &InstructionCache {
        &self.icache
    }

    /// Fetches, decodes and executes the next instruction.
    ///
    /// The executor alone advances or redirects the program counter; the
    /// dispatch here does no PC arithmetic.
    pub fn step(
        &mut self,
        memory: &mut dyn Memory,
    ) -> Result<(), EmulationError> {
        let word = self.icache.fetch(memory, self.pc.get())?;
        trace!("pc 0x{:016x}: iw 0x{:08x}", self.pc.get(), word);
        match Opcode::try_from(word)? {
            Opcode::Register => self.exec_register(RType::from(word), false),
            Opcode::RegisterWord => {
                self.exec_register(RType::from(word), true)
            }
            Opcode::ImmediateArith => self.exec_immediate(IType::from(word)),
            Opcode::Load => self.exec_load(IType::from(word), memory),
            Opcode::Store => self.exec_store(SType::from(word), memory),
            Opcode::Branch => self.exec_branch(BType::from(word)),
            Opcode::Jal => self.exec_jal(JType::from(word)),
            Opcode::Jalr => self.exec_jalr(IType::from(word)),
        }
    }

    /// Runs the dispatch loop until the program counter reaches [`STOP`],
    /// then returns A0, the guest's conventional return-value register.
    ///
    /// The instruction at the sentinel address is never executed. A guest
    /// that never reaches the sentinel runs forever. On error the machine
    /// state is no longer meaningful and must not be reused.
    pub fn emulate(
        &mut self,
        memory: &mut dyn Memory,
    ) -> Result<u64, EmulationError> {
        while self.pc.get() != STOP {
            self.step(memory)?;
        }
        debug!(
            "guest returned after {} instructions",
            self.analysis.i_count
        );
        Ok(self.get_register(reg::A0))
    }

    fn exec_register(
        &mut self,
        inst: RType,
        word_variant: bool,
    ) -> Result<(), EmulationError> {
        let lhs = self.get_register(inst.source_1());
        let rhs = self.get_register(inst.source_2());
        let value = match inst.operation()? {
            RegisterOp::Add => lhs.wrapping_add(rhs),
            RegisterOp::Sub => lhs.wrapping_sub(rhs),
            RegisterOp::Mul => lhs.wrapping_mul(rhs),
            RegisterOp::And => lhs & rhs,
            RegisterOp::ShiftLeft => {
                if word_variant {
                    (lhs as i32).unbounded_shl(rhs as u32) as i64 as u64
                } else {
                    lhs.unbounded_shl(rhs as u32)
                }
            }
            RegisterOp::ShiftRightLogical => lhs.unbounded_shr(rhs as u32),
            RegisterOp::ShiftRightArith => {
                if word_variant {
                    (lhs as i32).unbounded_shr(rhs as u32) as i64 as u64
                } else {
                    (lhs as i64).unbounded_shr(rhs as u32) as u64
                }
            }
        };
        self.set_register(inst.destination(), value);
        self.pc.add(4);
        self.analysis.count_ir();
        Ok(())
    }

    fn exec_immediate(&mut self, inst: IType) -> Result<(), EmulationError> {
        let lhs = self.get_register(inst.source());
        let value = match inst.operation()? {
            ImmediateOp::Add => {
                lhs.wrapping_add_signed(inst.sign_extended_immediate())
            }
            ImmediateOp::ShiftRightLogical => {
                lhs.unbounded_shr(inst.immediate() as u32)
            }
        };
        self.set_register(inst.destination(), value);
        self.pc.add(4);
        self.analysis.count_ir();
        Ok(())
    }

    fn exec_load(
        &mut self,
        inst: IType,
        memory: &dyn Memory,
    ) -> Result<(), EmulationError> {
        let address = self
            .get_register(inst.source())
            .wrapping_add_signed(inst.sign_extended_immediate());
        let value = match inst.width()? {
            MemWidth::Byte => memory.load_u8(address)? as u64,
            MemWidth::Word => memory.load_u32(address)? as u64,
            MemWidth::Double => memory.load_u64(address)?,
        };
        self.set_register(inst.destination(), value);
        self.pc.add(4);
        self.analysis.count_load();
        Ok(())
    }

    fn exec_store(
        &mut self,
        inst: SType,
        memory: &mut dyn Memory,
    ) -> Result<(), EmulationError> {
        let address = self
            .get_register(inst.source_1())
            .wrapping_add_signed(inst.sign_extended_immediate());
        let value = self.get_register(inst.source_2());
        match inst.width()? {
            MemWidth::Byte => memory.store_u8(address, value as u8)?,
            MemWidth::Word => memory.store_u32(address, value as u32)?,
            MemWidth::Double => memory.store_u64(address, value)?,
        }
        self.pc.add(4);
        self.analysis.count_store();
        Ok(())
    }

    fn exec_branch(&mut self, inst: BType) -> Result<(), EmulationError> {
        let lhs = self.get_register_signed(inst.source_1());
        let rhs = self.get_register_signed(inst.source_2());
        let taken = match inst.condition()? {
            BranchCondition::Equal => lhs == rhs,
            BranchCondition::NotEqual => lhs != rhs,
            BranchCondition::LessThan => lhs < rhs,
            BranchCondition::GreaterOrEqual => lhs >= rhs,
        };
        if taken {
            self.pc.set(self.pc.get().wrapping_add_signed(inst.offset()));
        } else {
            self.pc.add(4);
        }
        self.analysis.count_branch(taken);
        Ok(())
    }

    fn exec_jal(&mut self, inst: JType) -> Result<(), EmulationError> {
        self.set_register(inst.destination(), self.pc.get().wrapping_add(4));
        self.pc.set(self.pc.get().wrapping_add_signed(inst.offset()));
        self.analysis.count_jump();
        Ok(())
    }

    fn exec_jalr(&mut self, inst: IType) -> Result<(), EmulationError> {
        // The link address goes to the architectural return-address
        // register, not rd. Termination depends on it: RA holds the stop
        // sentinel until a linking JALR overwrites it, and the final `ret`
        // (rd = x0) jumps through whatever RA holds.
        if inst.destination() != reg::ZERO {
            self.set_register(reg::RA, self.pc.get().wrapping_add(4));
        }
        self.pc.set(
            self.get_register(inst.source())
                .wrapping_add_signed(inst.sign_extended_immediate()),
        );
        self.analysis.count_jump();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_seeds_the_abi_registers() {
        let machine = RV64::init(0x1000, [1, 2, 3, 4], 0x7fff_0000);
        assert_eq!(machine.pc.get(), 0x1000);
        assert_eq!(machine.get_register(reg::A0), 1);
        assert_eq!(machine.get_register(reg::A3), 4);
        assert_eq!(machine.get_register(reg::RA), STOP);
        assert_eq!(machine.get_register(reg::SP), 0x7fff_0000);
        assert_eq!(machine.analysis, Analysis::default());
    }

    #[test]
    fn x0_reads_zero_regardless_of_writes() {
        let mut machine = RV64::init(0, [0; 4], 0);
        machine.set_register(reg::ZERO, 0xffff);
        assert_eq!(machine.get_register(reg::ZERO), 0);
    }

    #[test]
    fn untouched_registers_start_at_zero() {
        let machine = RV64::init(0, [0; 4], 0);
        for index in [3u8, 9, 14, 31] {
            assert_eq!(machine.get_register(index), 0);
        }
    }
}
