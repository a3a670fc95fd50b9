mod flags;


use log::{debug, info, trace, warn};
use std::collections::HashSet;
use std::time::Duration;

use crate::decode::{decode, Op, Ptr, PtrMode};
use crate::mem::{IoReader, IoWriter, BindError, LoadError, Memory,
                 IO_BASE, REG_FILE_BASE, SPH_ADDR, SPL_ADDR, SREG_ADDR};
use crate::signal::{SignalBus, SIG_BREAKPOINT, SIG_BUS_ERROR, SIG_ILL_OPCODE};
use crate::sreg::StatusRegister;

/// Program counter width, which fixes the return-address width CALL-type
/// instructions push and RET-type instructions pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcWidth {
    Bits16,
    Bits22,
}

impl PcWidth {
    fn return_bytes(self) -> u16 {
        match self {
            PcWidth::Bits16 => 2,
            PcWidth::Bits22 => 3,
        }
    }
}

/// Fixed parameters of a machine, chosen once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineConfig {
    pub pc_width: PcWidth,
    /// Flash size in bytes.
    pub flash_size: usize,
    /// Data space size in bytes, register file and I/O window included.
    pub data_size: usize,
    /// Simulated clock frequency, used to convert run durations to cycles.
    pub clock_hz: u64,
}

impl Default for MachineConfig {
    /// An ATmega128-class part: 128 KiB flash, 4 KiB of SRAM above the
    /// 0x100 byte mapped low region, 22-bit program counter, 8 MHz.
    fn default() -> Self {
        MachineConfig {
            pc_width: PcWidth::Bits22,
            flash_size: 0x20000,
            data_size: 0x1100,
            clock_hz: 8_000_000,
        }
    }
}

/// Point-in-time copy of the whole core state.
struct Snapshot {
    contents: crate::mem::MemoryContents,
    sreg: StatusRegister,
    current_pc: u32,
    next_pc: u32,
    sp: u16,
    signals: u32,
    instruction_count: u64,
    cycle_count: u64,
}

/// The simulated microcontroller core.
///
/// The register file lives at the bottom of data space, the stack pointer
/// is memory-mapped at SPL/SPH, and the status register at SREG; the
/// shadow fields here are kept in sync with the mapped bytes after every
/// retire. The program counter is a current/next pair of word addresses:
/// sequential instructions simply leave the precomputed `next`, while
/// branches overwrite it.
pub struct Machine {
    config: MachineConfig,
    mem: Memory,
    sreg: StatusRegister,
    current_pc: u32,
    next_pc: u32,
    sp: u16,
    signals: SignalBus,
    instruction_count: u64,
    cycle_count: u64,
    breakpoints: HashSet<u32>,
    snapshot: Option<Snapshot>,
}

impl Machine {
    pub fn new(config: MachineConfig) -> Self {
        let signals = SignalBus::new();
        let mem = Memory::new(config.flash_size, config.data_size, signals.clone());
        let mut machine = Machine {
            config,
            mem,
            sreg: StatusRegister::new(),
            current_pc: 0,
            next_pc: 0,
            sp: (config.data_size - 1) as u16,
            signals,
            instruction_count: 0,
            cycle_count: 0,
            breakpoints: HashSet::new(),
            snapshot: None,
        };
        machine.sync_status();
        machine
    }

    /// Reset registers, flags, PC, SP, signal bus, and counters. Memory
    /// contents and peripheral bindings are left alone.
    pub fn reset(&mut self) {
        info!("Machine reset.");
        for i in 0..32 {
            self.mem.poke(REG_FILE_BASE + i, 0);
        }
        self.sreg = StatusRegister::new();
        self.current_pc = 0;
        self.next_pc = 0;
        self.sp = (self.config.data_size - 1) as u16;
        self.signals.set(0);
        self.instruction_count = 0;
        self.cycle_count = 0;
        self.sync_status();
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn signals(&self) -> &SignalBus {
        &self.signals
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Load a raw little-endian image into flash at offset zero.
    pub fn load_flash_image(&mut self, image: &[u8]) -> Result<(), LoadError> {
        self.mem.load_image(image)
    }

    /// Bind a peripheral's callbacks to one I/O address.
    pub fn register_io_handler(&mut self,
                               address: u16,
                               reader: Option<IoReader>,
                               writer: Option<IoWriter>,
                               name: &str) -> Result<(), BindError> {
        self.mem.register_io_handler(address, reader, writer, name)
    }

    // -- Inspection interface --

    pub fn register_get(&self, index: u8) -> u8 {
        self.mem.peek(REG_FILE_BASE + (index & 0x1F) as u16)
    }

    pub fn register_set(&mut self, index: u8, value: u8) {
        self.mem.poke(REG_FILE_BASE + (index & 0x1F) as u16, value);
    }

    pub fn status(&self) -> StatusRegister {
        self.sreg
    }

    pub fn set_status(&mut self, sreg: StatusRegister) {
        self.sreg = sreg;
        self.sync_status();
    }

    /// Word address of the most recently retired instruction.
    pub fn get_pc(&self) -> u32 {
        self.current_pc
    }

    /// Word address the next fetch will use.
    pub fn get_pc_next(&self) -> u32 {
        self.next_pc
    }

    /// Override where execution continues, as a loader or debugger does.
    pub fn set_pc_next(&mut self, word_address: u32) {
        self.next_pc = word_address;
    }

    pub fn get_sp(&self) -> u16 {
        self.sp
    }

    pub fn set_sp(&mut self, value: u16) {
        self.sp = value;
        self.sync_status();
    }

    pub fn add_breakpoint(&mut self, word_address: u32) {
        debug!("Breakpoint added at {:#x}.", word_address);
        self.breakpoints.insert(word_address);
    }

    pub fn remove_breakpoint(&mut self, word_address: u32) {
        self.breakpoints.remove(&word_address);
    }

    // -- Memory interface --
    //
    // These wrap the raw memory views with the interception the mapped
    // registers need: a write that lands on SREG/SPL/SPH must update the
    // live flags or stack pointer, whichever view it arrives through.

    pub fn fetch_code_byte(&self, byte_address: u32) -> u8 {
        self.mem.fetch_code_byte(byte_address)
    }

    pub fn fetch_code_word(&self, byte_address: u32) -> u16 {
        self.mem.fetch_code_word(byte_address)
    }

    pub fn read_data_byte(&mut self, address: u16) -> u8 {
        self.mem.read_data_byte(address)
    }

    pub fn write_data_byte(&mut self, address: u16, value: u8) {
        self.mem.write_data_byte(address, value);
        self.note_mapped_write(address, value);
    }

    pub fn read_data_word(&mut self, address: u16) -> u16 {
        self.mem.read_data_word(address)
    }

    pub fn write_data_word(&mut self, address: u16, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write_data_byte(address, lo);
        self.write_data_byte(address.wrapping_add(1), hi);
    }

    pub fn read_io_byte(&mut self, address: u16) -> u8 {
        self.mem.read_io_byte(address)
    }

    pub fn write_io_byte(&mut self, address: u16, value: u8) {
        self.mem.write_io_byte(address, value);
        if address < crate::mem::IO_SPACE_SIZE {
            self.note_mapped_write(IO_BASE + address, value);
        }
    }

    fn note_mapped_write(&mut self, address: u16, value: u8) {
        match address {
            SREG_ADDR => self.sreg = StatusRegister::from_byte(value),
            SPL_ADDR => self.sp = (self.sp & 0xFF00) | value as u16,
            SPH_ADDR => self.sp = (self.sp & 0x00FF) | ((value as u16) << 8),
            _ => {}
        }
    }

    /// Mirror the status register and stack pointer into their mapped
    /// data-space bytes.
    fn sync_status(&mut self) {
        self.mem.poke(SREG_ADDR, self.sreg.as_byte());
        let [spl, sph] = self.sp.to_le_bytes();
        self.mem.poke(SPL_ADDR, spl);
        self.mem.poke(SPH_ADDR, sph);
    }

    // -- Snapshot interface --

    /// Capture the entire core state for later rollback.
    pub fn state_save(&mut self) {
        debug!("Saving snapshot at PC {:#x}.", self.next_pc);
        self.snapshot = Some(Snapshot {
            contents: self.mem.save_contents(),
            sreg: self.sreg,
            current_pc: self.current_pc,
            next_pc: self.next_pc,
            sp: self.sp,
            signals: self.signals.get(),
            instruction_count: self.instruction_count,
            cycle_count: self.cycle_count,
        });
    }

    /// Roll back to the last saved snapshot. Returns false when no
    /// snapshot has been taken.
    pub fn state_restore(&mut self) -> bool {
        let snapshot = match &self.snapshot {
            Some(snapshot) => snapshot,
            None => {
                warn!("State restore requested with no snapshot saved.");
                return false;
            }
        };
        self.mem.restore_contents(&snapshot.contents);
        self.sreg = snapshot.sreg;
        self.current_pc = snapshot.current_pc;
        self.next_pc = snapshot.next_pc;
        self.sp = snapshot.sp;
        self.signals.set(snapshot.signals);
        self.instruction_count = snapshot.instruction_count;
        self.cycle_count = snapshot.cycle_count;
        debug!("Restored snapshot; PC back at {:#x}.", self.next_pc);
        true
    }

    // -- Execution --

    /// Retire exactly one instruction: fetch at `next_pc`, decode,
    /// execute, update the counters. An illegal opcode or a fetch past
    /// the end of flash raises a signal and leaves all state untouched.
    pub fn step(&mut self) {
        let pc = self.next_pc;
        if (pc as usize) * 2 + 1 >= self.mem.flash_size() {
            // Raises the bus-error signal.
            self.mem.fetch_code_word(pc * 2);
            return;
        }
        let word = self.mem.fetch_code_word(pc * 2);
        let second = self.mem.peek_code_word(pc + 1);
        let op = match decode(word, second) {
            Some(op) => op,
            None => {
                info!("Illegal opcode {:#06x} at PC {:#x}.", word, pc);
                self.signals.add(SIG_ILL_OPCODE);
                return;
            }
        };
        trace!("[{:#06x}] {} ({:?})", pc, op.mnemonic(), op);
        self.current_pc = pc;
        self.next_pc = pc + op.words();
        let cycles = self.execute(op);
        self.cycle_count += cycles as u64;
        self.instruction_count += 1;
        self.sync_status();
    }

    /// Run until any signal bit is raised; returns the signal mask.
    /// A breakpoint at the resume address does not re-trigger.
    pub fn run(&mut self) -> u32 {
        info!("Running from PC {:#x}.", self.next_pc);
        let mut first = true;
        loop {
            if !self.signals.is_clear() {
                break;
            }
            if !first && self.breakpoints.contains(&self.next_pc) {
                debug!("Breakpoint hit at PC {:#x}.", self.next_pc);
                self.signals.add(SIG_BREAKPOINT);
                break;
            }
            self.step();
            first = false;
        }
        info!("Stopped at PC {:#x} after {} instructions ({}).",
              self.next_pc, self.instruction_count, self.signals.describe());
        self.signals.get()
    }

    /// Retire exactly `n` instructions, stopping early on any signal.
    pub fn run_steps(&mut self, n: u64) -> u32 {
        let target = self.instruction_count.saturating_add(n);
        while self.instruction_count < target && self.signals.is_clear() {
            self.step();
        }
        self.signals.get()
    }

    /// Run until the cycle counter reaches `target_cycle` (or a signal).
    pub fn run_until_cycle(&mut self, target_cycle: u64) -> u32 {
        while self.cycle_count < target_cycle && self.signals.is_clear() {
            self.step();
        }
        self.signals.get()
    }

    /// Run for the given simulated duration at the configured clock.
    pub fn run_for(&mut self, duration: Duration) -> u32 {
        let cycles = duration.as_nanos()
            .saturating_mul(self.config.clock_hz as u128) / 1_000_000_000;
        let target = self.cycle_count.saturating_add(cycles as u64);
        self.run_until_cycle(target)
    }

    // -- Register helpers --

    fn reg(&self, index: u8) -> u8 {
        self.mem.peek(REG_FILE_BASE + index as u16)
    }

    fn set_reg(&mut self, index: u8, value: u8) {
        self.mem.poke(REG_FILE_BASE + index as u16, value);
    }

    fn pair(&self, low: u8) -> u16 {
        u16::from_le_bytes([self.reg(low), self.reg(low + 1)])
    }

    fn set_pair(&mut self, low: u8, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.set_reg(low, lo);
        self.set_reg(low + 1, hi);
    }

    fn ptr(&self, ptr: Ptr) -> u16 {
        self.pair(ptr.low_reg())
    }

    fn set_ptr(&mut self, ptr: Ptr, value: u16) {
        self.set_pair(ptr.low_reg(), value);
    }

    // -- Stack helpers --

    fn push_byte(&mut self, value: u8) {
        self.mem.poke(self.sp, value);
        self.sp = self.sp.wrapping_sub(1);
    }

    fn pop_byte(&mut self) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        if self.sp as usize >= self.mem.data_size() {
            warn!("Stack pop beyond RAM: SP {:#x}.", self.sp);
            self.signals.add(SIG_BUS_ERROR);
            return 0;
        }
        self.mem.peek(self.sp)
    }

    /// Push `next_pc` as a return address, most significant byte at the
    /// highest stack address.
    fn push_return_address(&mut self) {
        let pc = self.next_pc;
        if self.config.pc_width == PcWidth::Bits22 {
            self.push_byte((pc >> 16) as u8);
        }
        self.push_byte((pc >> 8) as u8);
        self.push_byte(pc as u8);
    }

    fn pop_return_address(&mut self) -> u32 {
        let lo = self.pop_byte() as u32;
        let mid = self.pop_byte() as u32;
        let hi = if self.config.pc_width == PcWidth::Bits22 {
            self.pop_byte() as u32
        } else {
            0
        };
        (hi << 16) | (mid << 8) | lo
    }

    /// Extra cycle taken by call/return instructions on a 3-byte PC.
    fn wide_pc_cost(&self) -> u8 {
        match self.config.pc_width {
            PcWidth::Bits16 => 0,
            PcWidth::Bits22 => 1,
        }
    }

    // -- Control-flow helpers --

    /// Displace `next_pc`, which already points past this instruction.
    fn branch(&mut self, k: i32) {
        self.next_pc = (self.next_pc as i64 + k as i64) as u32;
    }

    /// Skip the following instruction, whether one or two words.
    fn skip_next(&mut self) {
        let word = self.mem.peek_code_word(self.next_pc);
        let second = self.mem.peek_code_word(self.next_pc + 1);
        let words = decode(word, second).map(|op| op.words()).unwrap_or(1);
        self.next_pc += words;
    }

    fn mul_result(&mut self, result: u16, carry: bool) {
        self.set_pair(0, result);
        self.sreg.set_c(carry);
        self.sreg.set_z(result == 0);
    }

    /// Execute one decoded instruction, returning its cycle cost.
    fn execute(&mut self, op: Op) -> u8 {
        match op {
            Op::Nop => 1,

            // -- Register transfer --
            Op::Mov { d, r } => {
                let value = self.reg(r);
                self.set_reg(d, value);
                1
            }
            Op::Movw { d, r } => {
                let value = self.pair(r);
                self.set_pair(d, value);
                1
            }
            Op::Ldi { d, k } => {
                self.set_reg(d, k);
                1
            }

            // -- Arithmetic --
            Op::Add { d, r } => {
                let (rd, rr) = (self.reg(d), self.reg(r));
                let res = rd.wrapping_add(rr);
                self.set_reg(d, res);
                flags::add8(&mut self.sreg, rd, rr, res);
                1
            }
            Op::Adc { d, r } => {
                let (rd, rr) = (self.reg(d), self.reg(r));
                let res = rd.wrapping_add(rr).wrapping_add(self.sreg.c() as u8);
                self.set_reg(d, res);
                flags::add8(&mut self.sreg, rd, rr, res);
                1
            }
            Op::Sub { d, r } => {
                let (rd, rr) = (self.reg(d), self.reg(r));
                let res = rd.wrapping_sub(rr);
                self.set_reg(d, res);
                flags::sub8(&mut self.sreg, rd, rr, res, true);
                1
            }
            Op::Subi { d, k } => {
                let rd = self.reg(d);
                let res = rd.wrapping_sub(k);
                self.set_reg(d, res);
                flags::sub8(&mut self.sreg, rd, k, res, true);
                1
            }
            Op::Sbc { d, r } => {
                let (rd, rr) = (self.reg(d), self.reg(r));
                // The result takes the carry; the flag formulas take the
                // original operands.
                let res = rd.wrapping_sub(rr).wrapping_sub(self.sreg.c() as u8);
                self.set_reg(d, res);
                flags::sub8(&mut self.sreg, rd, rr, res, false);
                1
            }
            Op::Sbci { d, k } => {
                let rd = self.reg(d);
                let res = rd.wrapping_sub(k).wrapping_sub(self.sreg.c() as u8);
                self.set_reg(d, res);
                flags::sub8(&mut self.sreg, rd, k, res, false);
                1
            }
            Op::Inc { d } => {
                let rd = self.reg(d);
                let res = rd.wrapping_add(1);
                self.set_reg(d, res);
                self.sreg.set_nv(res & 0x80 != 0, rd == 0x7F);
                self.sreg.set_z(res == 0);
                1
            }
            Op::Dec { d } => {
                let rd = self.reg(d);
                let res = rd.wrapping_sub(1);
                self.set_reg(d, res);
                self.sreg.set_nv(res & 0x80 != 0, rd == 0x80);
                self.sreg.set_z(res == 0);
                1
            }
            Op::Com { d } => {
                let res = !self.reg(d);
                self.set_reg(d, res);
                flags::logic8(&mut self.sreg, res);
                self.sreg.set_c(true);
                1
            }
            Op::Neg { d } => {
                let rd = self.reg(d);
                let res = 0u8.wrapping_sub(rd);
                self.set_reg(d, res);
                flags::sub8(&mut self.sreg, 0, rd, res, true);
                1
            }
            Op::Adiw { d, k } => {
                let old = self.pair(d);
                let res = old.wrapping_add(k as u16);
                self.set_pair(d, res);
                flags::adiw16(&mut self.sreg, old, res);
                2
            }
            Op::Sbiw { d, k } => {
                let old = self.pair(d);
                let res = old.wrapping_sub(k as u16);
                self.set_pair(d, res);
                flags::sbiw16(&mut self.sreg, old, res);
                2
            }

            // -- Multiply --
            Op::Mul { d, r } => {
                let res = self.reg(d) as u16 * self.reg(r) as u16;
                self.mul_result(res, res & 0x8000 != 0);
                2
            }
            Op::Muls { d, r } => {
                let res = (self.reg(d) as i8 as i16 * self.reg(r) as i8 as i16) as u16;
                self.mul_result(res, res & 0x8000 != 0);
                2
            }
            Op::Mulsu { d, r } => {
                let res = (self.reg(d) as i8 as i16 * self.reg(r) as i16) as u16;
                self.mul_result(res, res & 0x8000 != 0);
                2
            }
            Op::Fmul { d, r } => {
                let prod = self.reg(d) as u16 * self.reg(r) as u16;
                self.mul_result(prod << 1, prod & 0x8000 != 0);
                2
            }
            Op::Fmuls { d, r } => {
                let prod = (self.reg(d) as i8 as i16 * self.reg(r) as i8 as i16) as u16;
                self.mul_result(prod << 1, prod & 0x8000 != 0);
                2
            }
            Op::Fmulsu { d, r } => {
                let prod = (self.reg(d) as i8 as i16 * self.reg(r) as i16) as u16;
                self.mul_result(prod << 1, prod & 0x8000 != 0);
                2
            }

            // -- Logic --
            Op::And { d, r } => {
                let res = self.reg(d) & self.reg(r);
                self.set_reg(d, res);
                flags::logic8(&mut self.sreg, res);
                1
            }
            Op::Andi { d, k } => {
                let res = self.reg(d) & k;
                self.set_reg(d, res);
                flags::logic8(&mut self.sreg, res);
                1
            }
            Op::Or { d, r } => {
                let res = self.reg(d) | self.reg(r);
                self.set_reg(d, res);
                flags::logic8(&mut self.sreg, res);
                1
            }
            Op::Ori { d, k } => {
                let res = self.reg(d) | k;
                self.set_reg(d, res);
                flags::logic8(&mut self.sreg, res);
                1
            }
            Op::Eor { d, r } => {
                let res = self.reg(d) ^ self.reg(r);
                self.set_reg(d, res);
                flags::logic8(&mut self.sreg, res);
                1
            }

            // -- Compare --
            Op::Cp { d, r } => {
                let (rd, rr) = (self.reg(d), self.reg(r));
                flags::sub8(&mut self.sreg, rd, rr, rd.wrapping_sub(rr), true);
                1
            }
            Op::Cpc { d, r } => {
                let (rd, rr) = (self.reg(d), self.reg(r));
                let res = rd.wrapping_sub(rr).wrapping_sub(self.sreg.c() as u8);
                flags::sub8(&mut self.sreg, rd, rr, res, false);
                1
            }
            Op::Cpi { d, k } => {
                let rd = self.reg(d);
                flags::sub8(&mut self.sreg, rd, k, rd.wrapping_sub(k), true);
                1
            }

            // -- Shift and bit manipulation --
            Op::Lsr { d } => {
                let rd = self.reg(d);
                let res = rd >> 1;
                self.set_reg(d, res);
                let c = rd & 1 != 0;
                self.sreg.set_c(c);
                self.sreg.set_nv(false, c);
                self.sreg.set_z(res == 0);
                1
            }
            Op::Asr { d } => {
                let rd = self.reg(d);
                let res = ((rd as i8) >> 1) as u8;
                self.set_reg(d, res);
                let c = rd & 1 != 0;
                let n = res & 0x80 != 0;
                self.sreg.set_c(c);
                self.sreg.set_nv(n, n ^ c);
                self.sreg.set_z(res == 0);
                1
            }
            Op::Ror { d } => {
                let rd = self.reg(d);
                let res = (rd >> 1) | ((self.sreg.c() as u8) << 7);
                self.set_reg(d, res);
                let c = rd & 1 != 0;
                let n = res & 0x80 != 0;
                self.sreg.set_c(c);
                self.sreg.set_nv(n, n ^ c);
                self.sreg.set_z(res == 0);
                1
            }
            Op::Swap { d } => {
                let rd = self.reg(d);
                self.set_reg(d, (rd >> 4) | (rd << 4));
                1
            }
            Op::Bset { s } => {
                self.sreg.put_bit(s, true);
                1
            }
            Op::Bclr { s } => {
                self.sreg.put_bit(s, false);
                1
            }
            Op::Bst { d, b } => {
                let bit = self.reg(d) & (1 << b) != 0;
                self.sreg.set_t(bit);
                1
            }
            Op::Bld { d, b } => {
                let mut rd = self.reg(d);
                if self.sreg.t() {
                    rd |= 1 << b;
                } else {
                    rd &= !(1 << b);
                }
                self.set_reg(d, rd);
                1
            }

            // -- Data memory --
            Op::Lds { d, k } => {
                let value = self.read_data_byte(k);
                self.set_reg(d, value);
                2
            }
            Op::Sts { k, r } => {
                let value = self.reg(r);
                self.write_data_byte(k, value);
                2
            }
            Op::Ld { d, ptr, mode } => {
                let address = match mode {
                    PtrMode::Plain => self.ptr(ptr),
                    PtrMode::PostInc => {
                        let a = self.ptr(ptr);
                        self.set_ptr(ptr, a.wrapping_add(1));
                        a
                    }
                    PtrMode::PreDec => {
                        let a = self.ptr(ptr).wrapping_sub(1);
                        self.set_ptr(ptr, a);
                        a
                    }
                };
                let value = self.read_data_byte(address);
                self.set_reg(d, value);
                2
            }
            Op::St { r, ptr, mode } => {
                let address = match mode {
                    PtrMode::Plain => self.ptr(ptr),
                    PtrMode::PostInc => {
                        let a = self.ptr(ptr);
                        self.set_ptr(ptr, a.wrapping_add(1));
                        a
                    }
                    PtrMode::PreDec => {
                        let a = self.ptr(ptr).wrapping_sub(1);
                        self.set_ptr(ptr, a);
                        a
                    }
                };
                let value = self.reg(r);
                self.write_data_byte(address, value);
                2
            }
            Op::Ldd { d, ptr, q } => {
                let address = self.ptr(ptr).wrapping_add(q as u16);
                let value = self.read_data_byte(address);
                self.set_reg(d, value);
                2
            }
            Op::Std { r, ptr, q } => {
                let address = self.ptr(ptr).wrapping_add(q as u16);
                let value = self.reg(r);
                self.write_data_byte(address, value);
                2
            }
            Op::Lpm { d, post_inc } => {
                let z = self.ptr(Ptr::Z);
                let value = self.mem.fetch_code_byte(z as u32);
                self.set_reg(d, value);
                if post_inc {
                    self.set_ptr(Ptr::Z, z.wrapping_add(1));
                }
                3
            }
            Op::Push { r } => {
                let value = self.reg(r);
                self.push_byte(value);
                2
            }
            Op::Pop { d } => {
                let value = self.pop_byte();
                self.set_reg(d, value);
                2
            }

            // -- I/O --
            Op::In { d, a } => {
                let value = self.read_io_byte(a as u16);
                self.set_reg(d, value);
                1
            }
            Op::Out { a, r } => {
                let value = self.reg(r);
                self.write_io_byte(a as u16, value);
                1
            }
            Op::Sbi { a, b } => {
                let value = self.read_io_byte(a as u16) | (1 << b);
                self.write_io_byte(a as u16, value);
                2
            }
            Op::Cbi { a, b } => {
                let value = self.read_io_byte(a as u16) & !(1 << b);
                self.write_io_byte(a as u16, value);
                2
            }
            Op::Sbic { a, b } => {
                if self.read_io_byte(a as u16) & (1 << b) == 0 {
                    self.skip_next();
                    2
                } else {
                    1
                }
            }
            Op::Sbis { a, b } => {
                if self.read_io_byte(a as u16) & (1 << b) != 0 {
                    self.skip_next();
                    2
                } else {
                    1
                }
            }

            // -- Control flow --
            Op::Rjmp { k } => {
                self.branch(k as i32);
                2
            }
            Op::Rcall { k } => {
                self.push_return_address();
                self.branch(k as i32);
                3 + self.wide_pc_cost()
            }
            Op::Jmp { k } => {
                self.next_pc = k >> 1;
                3
            }
            Op::Call { k } => {
                self.push_return_address();
                self.next_pc = k >> 1;
                4 + self.wide_pc_cost()
            }
            Op::Ijmp => {
                self.next_pc = self.ptr(Ptr::Z) as u32;
                2
            }
            Op::Icall => {
                self.push_return_address();
                self.next_pc = self.ptr(Ptr::Z) as u32;
                3 + self.wide_pc_cost()
            }
            Op::Ret => {
                self.next_pc = self.pop_return_address();
                4 + self.wide_pc_cost()
            }
            Op::Reti => {
                self.next_pc = self.pop_return_address();
                self.sreg.set_i(true);
                4 + self.wide_pc_cost()
            }
            Op::Brbs { s, k } => {
                if self.sreg.get_bit(s) {
                    self.branch(k as i32);
                    2
                } else {
                    1
                }
            }
            Op::Brbc { s, k } => {
                if !self.sreg.get_bit(s) {
                    self.branch(k as i32);
                    2
                } else {
                    1
                }
            }
            Op::Cpse { d, r } => {
                if self.reg(d) == self.reg(r) {
                    self.skip_next();
                    2
                } else {
                    1
                }
            }
            Op::Sbrc { r, b } => {
                if self.reg(r) & (1 << b) == 0 {
                    self.skip_next();
                    2
                } else {
                    1
                }
            }
            Op::Sbrs { r, b } => {
                if self.reg(r) & (1 << b) != 0 {
                    self.skip_next();
                    2
                } else {
                    1
                }
            }

            // -- Misc --
            Op::Sleep => 1,
            Op::Wdr => 1,
            Op::Break => {
                debug!("BREAK at PC {:#x}.", self.current_pc);
                self.signals.add(SIG_BREAKPOINT);
                1
            }
        }
    }

    /// Render the register file, PC, SP, SREG, and counters.
    pub fn register_dump(&self) -> String {
        let mut out = String::new();
        for row in 0..4 {
            for col in 0..8 {
                let index = row * 8 + col;
                out.push_str(&format!("r{:<2}={:02x} ", index,
                                      self.reg(index as u8)));
            }
            out.push('\n');
        }
        out.push_str(&format!("PC={:#07x} SP={:#06x} SREG={} [{}]\n",
                              self.next_pc, self.sp,
                              self.sreg.display(), self.sreg.as_byte()));
        out.push_str(&format!("instructions={} cycles={} signals={}\n",
                              self.instruction_count, self.cycle_count,
                              self.signals.describe()));
        out
    }
}
