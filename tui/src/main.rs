use clap::{Parser, ValueEnum};
use fern::colors::{Color, ColoredLevelConfig};
use log::{LevelFilter, info};
use parking_lot::RwLock;

use armvm_core::config::VmConfig;
use armvm_core::cpu::SimpleCore;
use armvm_core::mem::PhysMemory;
use armvm_core::mmu::Mmu;
use armvm_core::mmu::control::VaToPaOp;

use std::sync::Arc;
use std::process;

/// User-specified core model.
#[derive(Clone, Copy, Debug, ValueEnum, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Preset {
    Arm920t,
    Arm926ejs,
    Xscale,
    Arm946es,
    Arm1136jfs,
    Arm1176jzfs,
    CortexA8,
    CortexR4,
    FcseOnly,
}
impl Preset {
    fn config(self) -> VmConfig {
        match self {
            Preset::Arm920t => VmConfig::arm920t(),
            Preset::Arm926ejs => VmConfig::arm926ejs(),
            Preset::Xscale => VmConfig::xscale(),
            Preset::Arm946es => VmConfig::arm946es(),
            Preset::Arm1136jfs => VmConfig::arm1136jfs(),
            Preset::Arm1176jzfs => VmConfig::arm1176jzfs(),
            Preset::CortexA8 => VmConfig::cortex_a8(),
            Preset::CortexR4 => VmConfig::cortex_r4(),
            Preset::FcseOnly => VmConfig::fcse_only(),
        }
    }
}

fn parse_hex(s: &str) -> Result<u32, String> {
    let digits = s.strip_prefix("0x").unwrap_or(s).replace('_', "");
    u32::from_str_radix(&digits, 16).map_err(|e| format!("bad hex value '{s}': {e}"))
}

#[derive(Parser, Debug)]
struct Args {
    /// Core model to build
    #[clap(short, long, default_value_t = Preset::Arm926ejs)]
    preset: Preset,
    /// Raw physical memory image, loaded at address 0
    #[clap(short, long)]
    image: Option<String>,
    /// Size of physical memory in bytes (hex)
    #[clap(long, default_value = "0x0100_0000", value_parser = parse_hex)]
    mem_size: u32,

    /// SCTLR value (hex)
    #[clap(long, value_parser = parse_hex)]
    sctlr: Option<u32>,
    /// TTBR0 value (hex)
    #[clap(long, value_parser = parse_hex)]
    ttbr0: Option<u32>,
    /// TTBR1 value (hex)
    #[clap(long, value_parser = parse_hex)]
    ttbr1: Option<u32>,
    /// TTBCR value (hex)
    #[clap(long, value_parser = parse_hex)]
    ttbcr: Option<u32>,
    /// DACR value (hex)
    #[clap(long, value_parser = parse_hex)]
    dacr: Option<u32>,
    /// CONTEXTIDR value (hex)
    #[clap(long, value_parser = parse_hex)]
    contextidr: Option<u32>,
    /// FCSE PID register value (hex)
    #[clap(long, value_parser = parse_hex)]
    fcse: Option<u32>,

    /// Translate with user permissions
    #[clap(short, long)]
    user: bool,
    /// Translate for write access
    #[clap(short, long)]
    write: bool,
    /// Also read the word at each translated address
    #[clap(short, long)]
    read: bool,
    /// Print the TLB/MPU state after translating
    #[clap(short, long)]
    dump: bool,
    /// Logging level
    #[clap(short, long, default_value = "info")]
    log_level: LevelFilter,

    /// Virtual addresses to translate (hex)
    #[clap(value_parser = parse_hex)]
    addrs: Vec<u32>,
}

fn setup_logging(level: LevelFilter) -> anyhow::Result<()> {
    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Cyan)
        .trace(Color::BrightBlack);
    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!("[{:>5}] [{}] {}",
                colors.color(record.level()), record.target(), message))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging(args.log_level)?;

    let len = args.mem_size as usize;
    let mem = match &args.image {
        Some(path) => PhysMemory::from_image(len, path)?,
        None => PhysMemory::new(len),
    };
    let mem = Arc::new(RwLock::new(mem));

    let cfg = args.preset.config();
    info!(target: "TUI", "building {} with {len:#x} bytes of memory", cfg.name);
    let mut mmu = Mmu::new(cfg, mem);
    let mut core = SimpleCore::new(!args.user);

    if let Some(val) = args.ttbr0 { mmu.write_ttbr0(val); }
    if let Some(val) = args.ttbr1 { mmu.write_ttbr1(val); }
    if let Some(val) = args.ttbcr { mmu.write_ttbcr(val); }
    if let Some(val) = args.dacr { mmu.write_dacr(&core, val); }
    if let Some(val) = args.contextidr { mmu.write_contextidr(val); }
    if let Some(val) = args.fcse { mmu.write_fcse_pid(val); }
    if let Some(val) = args.sctlr { mmu.write_sctlr(val); }

    let op = VaToPaOp { user: args.user, write: args.write };
    let mut failed = false;
    for &va in &args.addrs {
        let par = mmu.translate_va(&mut core, va, op);
        if par & 1 != 0 {
            failed = true;
            println!("{va:08x}: fault fs={:02x} (par={par:08x})", (par >> 1) & 0x3f);
            continue;
        }
        println!("{va:08x}: pa={:08x} (par={par:08x})", (par & 0xffff_f000) | (va & 0xfff));
        if args.read {
            match mmu.read_virt::<u32>(&mut core, va)? {
                Some(val) => println!("  [{va:08x}] = {val:08x}"),
                None => println!("  [{va:08x}] aborted"),
            }
        }
    }

    if args.dump {
        print!("{}", mmu.dump());
    }
    if failed {
        process::exit(1);
    }
    Ok(())
}
