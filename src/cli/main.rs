use clap::{Parser, ValueEnum};
use simplelog::{ConfigBuilder, LevelFilter, LevelPadding, WriteLogger};
use std::fs::{self, File};
use std::path::PathBuf;

use megasim::{Machine, MachineConfig, PcWidth};

/// Possible log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Trace,
    Debug,
    Info,
}

/// Program counter widths selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PcWidthArg {
    #[value(name = "16")]
    Bits16,
    #[value(name = "22")]
    Bits22,
}

#[derive(Debug, Parser)]
#[command(author, version, about, max_term_width = 100,
          after_help = "\
Loads the given flash image into a simulated microcontroller core and runs \
it until a stop signal is raised (or for a fixed number of instructions with \
--steps). On exit, the final register file and counters are printed.")]
struct Args {
    /// The path to the raw flash image to execute.
    image: PathBuf,

    /// Stop after exactly this many instructions.
    #[arg(short, long)]
    steps: Option<u64>,

    /// Program counter width in bits; selects 2 or 3 byte return addresses.
    #[arg(long, default_value = "22")]
    pc_width: PcWidthArg,

    /// If set, a debug log will be written to the given path.
    #[arg(short = 'l', long = "log")]
    log_path: Option<PathBuf>,

    /// Set the log level. Has no effect without specifying --log as well.
    #[arg(short = 'L', long, default_value = "trace")]
    log_level: LogLevel,
}

/// Initialise logging to the given file.
fn init_logging(logfile: File, level: LevelFilter) {
    let config = ConfigBuilder::new()
        .set_level_padding(LevelPadding::Right)
        .set_location_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .build();

    // Failure here means logging was already initialised; keep going.
    let _ = WriteLogger::init(level, config, logfile);
}

/// Main run function; returns an exit code.
fn run(args: Args) -> u8 {
    return match _run(args) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };

    fn _run(args: Args) -> Result<(), String> {
        // Initialise logging if configured.
        if let Some(log_path) = &args.log_path {
            let logfile = File::create(log_path)
                .map_err(|e| format!("Failed to create log file: {}", e))?;
            let level = match args.log_level {
                LogLevel::Trace => LevelFilter::Trace,
                LogLevel::Debug => LevelFilter::Debug,
                LogLevel::Info => LevelFilter::Info,
            };
            init_logging(logfile, level);
        }

        // Load the flash image.
        let image = fs::read(&args.image)
            .map_err(|e| format!("Failed to open flash image: {}", e))?;

        let config = MachineConfig {
            pc_width: match args.pc_width {
                PcWidthArg::Bits16 => PcWidth::Bits16,
                PcWidthArg::Bits22 => PcWidth::Bits22,
            },
            ..MachineConfig::default()
        };
        let mut machine = Machine::new(config);
        machine.load_flash_image(&image)
            .map_err(|e| format!("Failed to load flash image: {}", e))?;

        match args.steps {
            Some(n) => machine.run_steps(n),
            None => machine.run(),
        };

        println!("Stopped after {} instructions ({} cycles); signals: {}.",
                 machine.instruction_count(),
                 machine.cycle_count(),
                 machine.signals().describe());
        print!("{}", machine.register_dump());

        Ok(())
    }
}

fn main() {
    let args = Args::parse();
    std::process::exit(run(args).into());
}
