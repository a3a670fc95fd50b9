mod cpu;
mod decode;
mod mem;
mod signal;
mod sreg;

pub use crate::cpu::{Machine, MachineConfig, PcWidth};
pub use crate::decode::{decode, Op, Ptr, PtrMode};
pub use crate::mem::{BindError, IoReader, IoWriter, LoadError, Memory,
                     IO_BASE, IO_SPACE_SIZE, SPH_ADDR, SPL_ADDR, SREG_ADDR};
pub use crate::signal::{SignalBus, SIG_BREAKPOINT, SIG_BUS_ERROR,
                        SIG_HOST_STOP, SIG_ILL_OPCODE, SIG_IO_PENDING};
pub use crate::sreg::StatusRegister;

/// Build a machine, load the given flash image, and run it: either a
/// fixed number of instructions, or until a signal is raised.
pub fn run(image: &[u8],
           config: MachineConfig,
           steps: Option<u64>) -> Result<Machine, LoadError> {
    let mut machine = Machine::new(config);
    machine.load_flash_image(image)?;
    match steps {
        Some(n) => machine.run_steps(n),
        None => machine.run(),
    };
    Ok(machine)
}

#[cfg(test)]
pub fn init_test_logging() {
    use simplelog::{Config, LevelFilter, TestLogger};
    // Ignore the error caused by multiple tests initialising.
    let _ = TestLogger::init(LevelFilter::Trace, Config::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    #[test]
    fn test_run_image_from_file() {
        init_test_logging();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        // ldi r16, 0x2A; break.
        file.write_all(&[0x0A, 0xE2, 0x98, 0x95]).unwrap();
        let image = std::fs::read(file.path()).unwrap();

        let machine = run(&image, MachineConfig::default(), None).unwrap();
        assert_eq!(machine.register_get(16), 0x2A);
        assert_eq!(machine.signals().get(), SIG_BREAKPOINT);
        assert_eq!(machine.instruction_count(), 2);
    }

    #[test]
    fn test_run_fixed_steps() {
        init_test_logging();
        let image = [0x0A, 0xE2, 0x98, 0x95];
        let machine = run(&image, MachineConfig::default(), Some(1)).unwrap();
        assert_eq!(machine.instruction_count(), 1);
        assert!(machine.signals().is_clear());
    }

    #[test]
    fn test_run_rejects_oversized_image() {
        init_test_logging();
        let config = MachineConfig {
            flash_size: 4,
            ..MachineConfig::default()
        };
        assert!(run(&[0; 8], config, None).is_err());
    }
}
