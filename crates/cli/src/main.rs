// Thumbem - ARM Thumb Functional Emulator
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

use thumbem_core::{render_line, Machine};

const EXIT_HALT: u8 = 0;
const EXIT_INVALID: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

#[derive(Parser, Debug)]
#[command(author, version, about = "Thumbem ARM Thumb emulator", long_about = None)]
struct Cli {
    /// Enable instruction-level execution tracing
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a firmware image and run it until it halts.
    Run(RunArgs),

    /// Print the decoded listing of a firmware image.
    Disasm(DisasmArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the firmware image (raw binary or ELF)
    #[arg(short, long)]
    firmware: PathBuf,

    /// Path to a platform descriptor (YAML); defaults to the bare platform
    #[arg(short, long)]
    platform: Option<PathBuf>,

    /// Maximum number of steps to execute
    #[arg(long, default_value = "200000")]
    max_steps: usize,

    /// Write a JSON snapshot of the final CPU status
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct DisasmArgs {
    /// Path to the firmware image (raw binary or ELF)
    #[arg(short, long)]
    firmware: PathBuf,

    /// Path to a platform descriptor (YAML); defaults to the bare platform
    #[arg(short, long)]
    platform: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Disasm(args) => disasm(args),
    }
}

fn build_machine(platform: &Option<PathBuf>) -> anyhow::Result<Machine> {
    match platform {
        Some(path) => {
            let desc = thumbem_config::PlatformDescriptor::from_file(path)?;
            thumbem_core::system::build_machine(&desc)
        }
        None => Ok(Machine::bare()),
    }
}

fn load_firmware(machine: &mut Machine, path: &Path) -> anyhow::Result<()> {
    let bytes = std::fs::read(path)
        .map_err(|e| anyhow::anyhow!("Failed to read firmware {:?}: {}", path, e))?;

    if thumbem_loader::is_elf(&bytes) {
        let image = thumbem_loader::load_elf_bytes(&bytes)?;
        machine.load_image(&image);
    } else {
        let base = machine
            .space
            .find_region_by_kind(thumbem_core::RegionKind::Rom)
            .map(|r| r.base_address())
            .ok_or_else(|| anyhow::anyhow!("Platform has no ROM region"))?;
        let image = thumbem_loader::load_bin_bytes(&bytes, base);
        machine.load_image(&image);
    }
    Ok(())
}

fn run(args: RunArgs) -> ExitCode {
    let mut machine = match build_machine(&args.platform) {
        Ok(m) => m,
        Err(e) => {
            error!("Platform configuration failed: {:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    if let Err(e) = load_firmware(&mut machine, &args.firmware) {
        error!("Firmware load failed: {:#}", e);
        return ExitCode::from(EXIT_RUNTIME_ERROR);
    }

    machine.reset();
    info!(
        "Running on platform '{}' from {:#010x}",
        machine.platform_name(),
        machine.get_register(15)
    );

    let mut steps = 0usize;
    while steps < args.max_steps && !machine.halted() {
        machine.step();
        steps += 1;
    }

    let status = machine.get_status();
    print_status(&status, steps);

    if let Some(path) = &args.snapshot {
        match std::fs::File::create(path)
            .map_err(anyhow::Error::from)
            .and_then(|f| serde_json::to_writer_pretty(f, &status).map_err(Into::into))
        {
            Ok(()) => info!("Snapshot written to {:?}", path),
            Err(e) => {
                error!("Snapshot write failed: {:#}", e);
                return ExitCode::from(EXIT_RUNTIME_ERROR);
            }
        }
    }

    if !status.halted {
        error!("Step budget exhausted after {} steps", steps);
        return ExitCode::from(EXIT_RUNTIME_ERROR);
    }
    if status.invalid_instruction {
        return ExitCode::from(EXIT_INVALID);
    }
    ExitCode::from(EXIT_HALT)
}

fn print_status(status: &thumbem_core::CpuStatus, steps: usize) {
    println!("steps: {steps}");
    for row in 0..4usize {
        let mut line = String::new();
        for col in 0..4usize {
            let n = row * 4 + col;
            line.push_str(&format!("R{n:<2} = {:08X}  ", status.registers[n]));
        }
        println!("{}", line.trim_end());
    }
    println!(
        "flags: N={} Z={} C={} V={}",
        status.negative as u8, status.zero as u8, status.carry as u8, status.overflow as u8
    );
    if status.halted {
        println!(
            "halted ({})",
            if status.invalid_instruction {
                "invalid instruction"
            } else {
                "SWI #0"
            }
        );
    }
}

fn disasm(args: DisasmArgs) -> ExitCode {
    let mut machine = match build_machine(&args.platform) {
        Ok(m) => m,
        Err(e) => {
            error!("Platform configuration failed: {:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    if let Err(e) = load_firmware(&mut machine, &args.firmware) {
        error!("Firmware load failed: {:#}", e);
        return ExitCode::from(EXIT_RUNTIME_ERROR);
    }

    for record in machine.disassemble() {
        println!("{}", render_line(&record));
    }
    ExitCode::from(EXIT_HALT)
}
