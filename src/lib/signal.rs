use std::cell::Cell;
use std::rc::Rc;

// Signal bits.
pub const SIG_ILL_OPCODE: u32 = 1 << 0;
pub const SIG_BUS_ERROR: u32 = 1 << 1;
pub const SIG_BREAKPOINT: u32 = 1 << 2;
pub const SIG_HOST_STOP: u32 = 1 << 3;
pub const SIG_IO_PENDING: u32 = 1 << 4;

/// The shared stop-condition bitmask.
///
/// Handlers and memory accessors raise bits from deep inside the execute
/// path; the run loops and external tooling read and selectively clear
/// them. Cloning yields another handle onto the same underlying bits.
#[derive(Clone)]
pub struct SignalBus {
    bits: Rc<Cell<u32>>,
}

impl SignalBus {
    pub fn new() -> Self {
        SignalBus { bits: Rc::new(Cell::new(0)) }
    }

    pub fn get(&self) -> u32 {
        self.bits.get()
    }

    /// Overwrite the whole bitmask.
    pub fn set(&self, mask: u32) {
        self.bits.set(mask);
    }

    pub fn add(&self, mask: u32) {
        self.bits.set(self.bits.get() | mask);
    }

    pub fn remove(&self, mask: u32) {
        self.bits.set(self.bits.get() & !mask);
    }

    pub fn is_clear(&self) -> bool {
        self.bits.get() == 0
    }

    /// Human-readable list of the currently raised bits.
    pub fn describe(&self) -> String {
        let bits = self.bits.get();
        if bits == 0 {
            return "none".to_string();
        }
        let mut names = Vec::new();
        if bits & SIG_ILL_OPCODE != 0 {
            names.push("illegal-opcode");
        }
        if bits & SIG_BUS_ERROR != 0 {
            names.push("bus-error");
        }
        if bits & SIG_BREAKPOINT != 0 {
            names.push("breakpoint");
        }
        if bits & SIG_HOST_STOP != 0 {
            names.push("host-stop");
        }
        if bits & SIG_IO_PENDING != 0 {
            names.push("io-pending");
        }
        let unknown = bits & !(SIG_ILL_OPCODE | SIG_BUS_ERROR | SIG_BREAKPOINT
                               | SIG_HOST_STOP | SIG_IO_PENDING);
        let mut text = names.join(",");
        if unknown != 0 {
            text.push_str(&format!(",{:#x}", unknown));
        }
        text
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_share_bits() {
        let bus = SignalBus::new();
        let other = bus.clone();
        assert!(bus.is_clear());
        other.add(SIG_ILL_OPCODE);
        assert_eq!(bus.get(), SIG_ILL_OPCODE);
        bus.add(SIG_BREAKPOINT);
        assert_eq!(other.get(), SIG_ILL_OPCODE | SIG_BREAKPOINT);
        other.remove(SIG_ILL_OPCODE);
        assert_eq!(bus.get(), SIG_BREAKPOINT);
        bus.set(0);
        assert!(other.is_clear());
    }

    #[test]
    fn test_describe() {
        let bus = SignalBus::new();
        assert_eq!(bus.describe(), "none");
        bus.add(SIG_ILL_OPCODE | SIG_BUS_ERROR);
        assert_eq!(bus.describe(), "illegal-opcode,bus-error");
    }
}
