use log::{debug, trace, warn};
use std::fmt;

use crate::signal::{SignalBus, SIG_BUS_ERROR};

// Data-space layout.
pub const REG_FILE_BASE: u16 = 0x0000;
pub const IO_BASE: u16 = 0x0020;
pub const IO_SPACE_SIZE: u16 = 0x00A0;
pub const SPL_ADDR: u16 = 0x005D;
pub const SPH_ADDR: u16 = 0x005E;
pub const SREG_ADDR: u16 = 0x005F;

pub type IoReader = Box<dyn FnMut() -> u8>;
pub type IoWriter = Box<dyn FnMut(u8)>;

/// A peripheral bound to one I/O address.
struct IoBinding {
    name: String,
    reader: Option<IoReader>,
    writer: Option<IoWriter>,
}

/// Error from loading a flash image.
#[derive(Debug, PartialEq, Eq)]
pub enum LoadError {
    TooLarge { size: usize, max: usize },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::TooLarge { size, max } => {
                write!(f, "image of {} bytes exceeds the {} byte flash", size, max)
            }
        }
    }
}

/// Error from binding a peripheral outside the I/O address range.
#[derive(Debug, PartialEq, Eq)]
pub struct BindError {
    pub address: u16,
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I/O address {:#04x} is outside 0x00..=0x9F", self.address)
    }
}

/// The three memory views: flash (code), data space, and the I/O space.
///
/// I/O address `a` and data address `a + 0x20` are the same physical byte;
/// the I/O view additionally consults per-address peripheral bindings.
/// Accesses outside any mapped range raise `SIG_BUS_ERROR` on the signal
/// bus and read back as zero; they never fail the call itself.
pub struct Memory {
    flash: Vec<u8>,
    data: Vec<u8>,
    bindings: Vec<Option<IoBinding>>,
    signals: SignalBus,
}

impl Memory {
    pub fn new(flash_size: usize, data_size: usize, signals: SignalBus) -> Self {
        let mut bindings = Vec::with_capacity(IO_SPACE_SIZE as usize);
        bindings.resize_with(IO_SPACE_SIZE as usize, || None);
        Memory {
            flash: vec![0; flash_size],
            data: vec![0; data_size],
            bindings,
            signals,
        }
    }

    pub fn flash_size(&self) -> usize {
        self.flash.len()
    }

    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    /// Load a raw little-endian image into flash at offset zero.
    pub fn load_image(&mut self, image: &[u8]) -> Result<(), LoadError> {
        if image.len() > self.flash.len() {
            return Err(LoadError::TooLarge {
                size: image.len(),
                max: self.flash.len(),
            });
        }
        self.flash[..image.len()].copy_from_slice(image);
        debug!("Loaded {} byte flash image.", image.len());
        Ok(())
    }

    /// Bind a peripheral's read/write callbacks to one I/O address.
    pub fn register_io_handler(&mut self,
                               address: u16,
                               reader: Option<IoReader>,
                               writer: Option<IoWriter>,
                               name: &str) -> Result<(), BindError> {
        if address >= IO_SPACE_SIZE {
            return Err(BindError { address });
        }
        debug!("Binding '{}' to I/O address {:#04x}.", name, address);
        self.bindings[address as usize] = Some(IoBinding {
            name: name.to_string(),
            reader,
            writer,
        });
        Ok(())
    }

    /// Name of the peripheral bound at the given I/O address, if any.
    pub fn io_binding_name(&self, address: u16) -> Option<&str> {
        self.bindings.get(address as usize)
            .and_then(|b| b.as_ref())
            .map(|b| b.name.as_str())
    }

    // -- Code space --

    pub fn fetch_code_byte(&self, byte_address: u32) -> u8 {
        match self.flash.get(byte_address as usize) {
            Some(byte) => *byte,
            None => {
                warn!("Code fetch beyond flash: {:#x}.", byte_address);
                self.signals.add(SIG_BUS_ERROR);
                0
            }
        }
    }

    pub fn fetch_code_word(&self, byte_address: u32) -> u16 {
        let lo = self.fetch_code_byte(byte_address);
        let hi = self.fetch_code_byte(byte_address + 1);
        u16::from_le_bytes([lo, hi])
    }

    /// Speculative word read at a word address; out-of-range reads as zero
    /// without raising a signal. Used for second-word operands and skip
    /// length detection, where the word may never be executed.
    pub fn peek_code_word(&self, word_address: u32) -> u16 {
        let base = (word_address as usize) * 2;
        if base + 1 < self.flash.len() {
            u16::from_le_bytes([self.flash[base], self.flash[base + 1]])
        } else {
            0
        }
    }

    // -- Data space --

    pub fn read_data_byte(&mut self, address: u16) -> u8 {
        if (IO_BASE..IO_BASE + IO_SPACE_SIZE).contains(&address) {
            return self.read_io_byte(address - IO_BASE);
        }
        match self.data.get(address as usize) {
            Some(byte) => *byte,
            None => {
                warn!("Data read beyond RAM: {:#x}.", address);
                self.signals.add(SIG_BUS_ERROR);
                0
            }
        }
    }

    pub fn write_data_byte(&mut self, address: u16, value: u8) {
        if (IO_BASE..IO_BASE + IO_SPACE_SIZE).contains(&address) {
            self.write_io_byte(address - IO_BASE, value);
            return;
        }
        match self.data.get_mut(address as usize) {
            Some(byte) => *byte = value,
            None => {
                warn!("Data write beyond RAM: {:#x}.", address);
                self.signals.add(SIG_BUS_ERROR);
            }
        }
    }

    /// Little-endian word read from data space.
    pub fn read_data_word(&mut self, address: u16) -> u16 {
        let lo = self.read_data_byte(address);
        let hi = self.read_data_byte(address.wrapping_add(1));
        u16::from_le_bytes([lo, hi])
    }

    /// Little-endian word write to data space.
    pub fn write_data_word(&mut self, address: u16, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.write_data_byte(address, lo);
        self.write_data_byte(address.wrapping_add(1), hi);
    }

    // -- I/O space --

    pub fn read_io_byte(&mut self, address: u16) -> u8 {
        if address >= IO_SPACE_SIZE {
            warn!("I/O read outside the I/O space: {:#04x}.", address);
            self.signals.add(SIG_BUS_ERROR);
            return 0;
        }
        if let Some(binding) = &mut self.bindings[address as usize] {
            if let Some(reader) = &mut binding.reader {
                let value = reader();
                trace!("I/O read {:#04x} ({}) -> {:#04x}",
                       address, binding.name, value);
                return value;
            }
        }
        self.data[(IO_BASE + address) as usize]
    }

    pub fn write_io_byte(&mut self, address: u16, value: u8) {
        if address >= IO_SPACE_SIZE {
            warn!("I/O write outside the I/O space: {:#04x}.", address);
            self.signals.add(SIG_BUS_ERROR);
            return;
        }
        if let Some(binding) = &mut self.bindings[address as usize] {
            if let Some(writer) = &mut binding.writer {
                trace!("I/O write {:#04x} ({}) <- {:#04x}",
                       address, binding.name, value);
                writer(value);
                return;
            }
        }
        self.data[(IO_BASE + address) as usize] = value;
    }

    // -- Raw access --

    /// Read the backing storage directly, bypassing peripheral bindings.
    /// Stack traffic and flag/stack-pointer mirroring go through here.
    pub fn peek(&self, address: u16) -> u8 {
        self.data.get(address as usize).copied().unwrap_or(0)
    }

    /// Write the backing storage directly, bypassing peripheral bindings.
    pub fn poke(&mut self, address: u16, value: u8) {
        if let Some(byte) = self.data.get_mut(address as usize) {
            *byte = value;
        } else {
            warn!("Raw write beyond RAM: {:#x}.", address);
            self.signals.add(SIG_BUS_ERROR);
        }
    }

    // -- Snapshot support --

    pub(crate) fn save_contents(&self) -> MemoryContents {
        MemoryContents {
            flash: self.flash.clone(),
            data: self.data.clone(),
        }
    }

    pub(crate) fn restore_contents(&mut self, contents: &MemoryContents) {
        self.flash.copy_from_slice(&contents.flash);
        self.data.copy_from_slice(&contents.data);
    }
}

/// Point-in-time copy of both storage arrays. Peripheral bindings are
/// deliberately not part of a snapshot; they are wiring, not state.
#[derive(Clone)]
pub(crate) struct MemoryContents {
    flash: Vec<u8>,
    data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    use ntest::timeout;
    use rand::{Rng, SeedableRng};
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::init_test_logging;
    use crate::signal::SIG_BUS_ERROR;

    const FLASH_SIZE: usize = 0x1000;
    const DATA_SIZE: usize = 0x500;

    fn fixture() -> (Memory, SignalBus) {
        init_test_logging();
        let signals = SignalBus::new();
        (Memory::new(FLASH_SIZE, DATA_SIZE, signals.clone()), signals)
    }

    #[test]
    fn test_data_roundtrip_little_endian() {
        let (mut mem, signals) = fixture();
        mem.write_data_byte(0x0100, 0xAB);
        assert_eq!(mem.read_data_byte(0x0100), 0xAB);
        mem.write_data_word(0x0200, 0x1234);
        assert_eq!(mem.read_data_byte(0x0200), 0x34);
        assert_eq!(mem.read_data_byte(0x0201), 0x12);
        assert_eq!(mem.read_data_word(0x0200), 0x1234);
        assert!(signals.is_clear());
    }

    #[test]
    fn test_io_aliases_data_space() {
        let (mut mem, signals) = fixture();
        // Through the I/O view, visible through the data view.
        mem.write_io_byte(0x10, 0x55);
        assert_eq!(mem.read_data_byte(IO_BASE + 0x10), 0x55);
        // And the other way round.
        mem.write_data_byte(IO_BASE + 0x3F, 0xA1);
        assert_eq!(mem.read_io_byte(0x3F), 0xA1);
        assert!(signals.is_clear());
    }

    #[test]
    fn test_bus_error_reads_zero_and_signals() {
        let (mut mem, signals) = fixture();
        assert_eq!(mem.read_data_byte(DATA_SIZE as u16), 0);
        assert_eq!(signals.get(), SIG_BUS_ERROR);
        signals.set(0);
        mem.write_data_byte(0xFFFF, 1);
        assert_eq!(signals.get(), SIG_BUS_ERROR);
        signals.set(0);
        assert_eq!(mem.read_io_byte(IO_SPACE_SIZE), 0);
        assert_eq!(signals.get(), SIG_BUS_ERROR);
        signals.set(0);
        assert_eq!(mem.fetch_code_byte(FLASH_SIZE as u32), 0);
        assert_eq!(signals.get(), SIG_BUS_ERROR);
    }

    #[test]
    fn test_peek_code_word_never_signals() {
        let (mem, signals) = fixture();
        assert_eq!(mem.peek_code_word(FLASH_SIZE as u32), 0);
        assert!(signals.is_clear());
    }

    #[test]
    fn test_image_loading() {
        let (mut mem, _) = fixture();
        mem.load_image(&[0x0C, 0x94, 0x66, 0x00]).unwrap();
        assert_eq!(mem.fetch_code_word(0), 0x940C);
        assert_eq!(mem.fetch_code_word(2), 0x0066);
        assert_eq!(mem.peek_code_word(1), 0x0066);

        let oversized = vec![0; FLASH_SIZE + 1];
        assert_eq!(mem.load_image(&oversized),
                   Err(LoadError::TooLarge { size: FLASH_SIZE + 1, max: FLASH_SIZE }));
    }

    #[test]
    fn test_io_handler_binding() {
        let (mut mem, signals) = fixture();

        let reads = Rc::new(Cell::new(0u32));
        let written = Rc::new(Cell::new(0u8));
        let reads_handle = reads.clone();
        let written_handle = written.clone();
        mem.register_io_handler(
            0x16,
            Some(Box::new(move || {
                reads_handle.set(reads_handle.get() + 1);
                0x42
            })),
            Some(Box::new(move |v| written_handle.set(v))),
            "PINB",
        ).unwrap();

        assert_eq!(mem.io_binding_name(0x16), Some("PINB"));
        assert_eq!(mem.read_io_byte(0x16), 0x42);
        assert_eq!(reads.get(), 1);
        mem.write_io_byte(0x16, 0x99);
        assert_eq!(written.get(), 0x99);

        // The aliased data-space address routes to the same binding.
        assert_eq!(mem.read_data_byte(IO_BASE + 0x16), 0x42);
        assert_eq!(reads.get(), 2);

        // Unbound addresses fall through to storage.
        mem.write_io_byte(0x17, 0x11);
        assert_eq!(mem.read_io_byte(0x17), 0x11);

        // Out-of-range binding is rejected.
        assert_eq!(mem.register_io_handler(IO_SPACE_SIZE, None, None, "nope"),
                   Err(BindError { address: IO_SPACE_SIZE }));
        assert!(signals.is_clear());
    }

    #[test]
    #[timeout(100)]
    fn test_random_sweep() {
        let (mut mem, signals) = fixture();
        let mut rng = rand::rngs::StdRng::seed_from_u64(0x1B9A6D2C4E8F0357);

        let mut expected = vec![0u8; DATA_SIZE];
        for _ in 0..2000 {
            let addr = rng.gen_range(0..DATA_SIZE as u16);
            let value = rng.gen::<u8>();
            mem.write_data_byte(addr, value);
            expected[addr as usize] = value;
        }
        for addr in 0..DATA_SIZE as u16 {
            assert_eq!(mem.read_data_byte(addr), expected[addr as usize],
                       "mismatch at {:#x}", addr);
        }
        assert!(signals.is_clear());
    }
}
