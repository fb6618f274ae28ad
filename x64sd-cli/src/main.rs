use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use x64sd::{Engine, MemoryTrait, OwnedMemory, Permission, Xmm};

mod config;
mod tracer;

use config::Config;
use tracer::InstructionTracer;

const PAGE_MASK: u64 = 0xFFF;

#[derive(Parser)]
#[command(name = "x64sd")]
#[command(about = "Run raw x86-64 scalar-double code and print the final CPU state")]
struct Args {
    /// Path to the configuration file
    #[arg(required_unless_present = "generate_sample")]
    config_file: Option<PathBuf>,

    /// Print each executed instruction
    #[arg(long)]
    trace: bool,

    /// Generate a sample configuration file at the specified path and exit
    #[arg(long, value_name = "PATH")]
    generate_sample: Option<PathBuf>,
}

fn setup_logging() -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("x64sd=info"))?;
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

fn main() -> Result<()> {
    setup_logging()?;

    let args = Args::parse();

    if let Some(sample_path) = &args.generate_sample {
        info!("Generating sample configuration at: {:?}", sample_path);
        Config::create_sample().save_to_file(sample_path)?;
        println!("Sample configuration saved to: {:?}", sample_path);
        return Ok(());
    }

    let config_file = args
        .config_file
        .ok_or_else(|| anyhow!("A configuration file is required"))?;
    let config = Config::load_from_file(&config_file)?;
    let base_dir = config_file.parent().unwrap_or(Path::new("."));

    let mut engine = build_engine(&config, base_dir)?;
    let entry = config.entry.unwrap_or(config.load_address);
    info!("Starting emulation at 0x{:x}", entry);

    let mut tracer = InstructionTracer::new(args.trace);
    let result = engine.emu_start_with_hooks(entry, config.stop_address.unwrap_or(0), 0, &mut tracer);

    println!("{}", engine.cpu);
    info!("Executed {} instructions", engine.instruction_count());

    if let Err(e) = result {
        error!("Emulation failed: {}", e);
        return Err(e.into());
    }
    Ok(())
}

fn build_engine(config: &Config, base_dir: &Path) -> Result<Engine> {
    let mut engine = Engine::with_config(OwnedMemory::new(), config.engine.clone());

    let code_path = base_dir.join(&config.code_path);
    let code = fs::read(&code_path).with_context(|| format!("Failed to read code file {:?}", code_path))?;
    map_pages(&mut engine, config.load_address, code.len() as u64, Permission::READ | Permission::EXEC)?;
    engine.memory.write_code(config.load_address, &code)?;
    info!("Loaded {} bytes of code at 0x{:x}", code.len(), config.load_address);

    for region in &config.regions {
        map_pages(&mut engine, region.address, region.size, region.permission_bits()?)?;
        if let Some(data_path) = &region.data_path {
            let path = base_dir.join(data_path);
            let data = fs::read(&path).with_context(|| format!("Failed to read region data {:?}", path))?;
            if data.len() as u64 > region.size {
                return Err(anyhow!("{:?} does not fit in the region at 0x{:x}", path, region.address));
            }
            engine.memory.write_code(region.address, &data)?;
        }
    }

    for (&reg, &value) in &config.registers {
        engine.reg_write(reg, value);
    }
    for (&reg, &value) in &config.xmm {
        engine.xmm_write(reg, Xmm::from_u128(value));
    }

    Ok(engine)
}

fn map_pages(engine: &mut Engine, address: u64, size: u64, perms: Permission) -> Result<()> {
    let start = address & !PAGE_MASK;
    let end = address
        .checked_add(size.max(1))
        .and_then(|end| end.checked_add(PAGE_MASK))
        .ok_or_else(|| anyhow!("Region at 0x{:x} wraps the address space", address))?
        & !PAGE_MASK;
    engine.memory.map(start, (end - start) as usize, perms)?;
    Ok(())
}
