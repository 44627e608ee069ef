mod cli;
mod flash_state;
mod packet;
mod registers;
mod rsp;
mod server;

use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use bdm_proto::Bdm;
use bdm_transport::RusbTransport;
use clap::Parser;
use log::error;

use cli::{Args, Mode};
use server::RspServer;

const DEFAULT_AGENT_PATH: &str = "flash-agent.elf";

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let agent_path: &Path = args.agent.as_deref().unwrap_or(Path::new(DEFAULT_AGENT_PATH));

    match args.mode() {
        Mode::Erase => {
            let mut transport = RusbTransport::open().context("opening BDM probe")?;
            let mut bdm = Bdm::new(&mut transport);
            bdm_init::initialize(&mut bdm).context("initializing target")?;
            let mut flash = bdm_flash::FlashDriver::from_agent_elf(agent_path).context("loading flash agent")?;
            flash.erase_range(&mut bdm, 0, bdm_flash::SECTOR_SIZE * bdm_flash::SECTOR_COUNT)?;
            Ok(())
        }
        Mode::Program { verify, base } => {
            let mut transport = RusbTransport::open().context("opening BDM probe")?;
            let mut bdm = Bdm::new(&mut transport);
            bdm_init::initialize(&mut bdm).context("initializing target")?;
            let mut flash = bdm_flash::FlashDriver::from_agent_elf(agent_path).context("loading flash agent")?;

            let file = args.program.as_ref().expect("Mode::Program implies --program");
            let image = load_firmware(file, base)?;
            let (base_addr, data) = flatten_image(&image).context("firmware image has no data")?;
            flash.program_binary(&mut bdm, base_addr, &data, verify)?;
            Ok(())
        }
        Mode::Gdb { port } => {
            let mut transport = RusbTransport::open().context("opening BDM probe")?;
            bdm_init::initialize(&mut Bdm::new(&mut transport)).context("initializing target")?;
            let flash = bdm_flash::FlashDriver::from_agent_elf(agent_path).context("loading flash agent")?;
            let mut server = RspServer::new(transport, flash);

            let running = Arc::new(AtomicBool::new(true));
            let handler_flag = running.clone();
            ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst)).context("installing signal handler")?;

            server.run(port, running)
        }
    }
}

/// Loads a firmware file per spec.md §6: ELF by extension sniffing
/// first, then S-Record, falling back to raw binary at `base`.
fn load_firmware(path: &Path, base: Option<u32>) -> anyhow::Result<fw_image::Image> {
    Ok(match path.extension().and_then(|e| e.to_str()) {
        Some("elf") => fw_image::load_elf(path)?,
        Some("s19") | Some("s28") | Some("s37") | Some("srec") => fw_image::load_srecord(path)?,
        _ => {
            let base = base.context("--base is required for raw-binary firmware input")?;
            fw_image::load_raw(path, base)?
        }
    })
}

/// Flattens a loaded image into one contiguous buffer spanning its
/// full segment range, per spec.md §6's "gaps filled by 0xFF".
fn flatten_image(image: &fw_image::Image) -> Option<(u32, Vec<u8>)> {
    let mut segments = image.segments().peekable();
    let start = segments.peek()?.0;
    let end = segments.fold(start, |acc, (addr, data)| acc.max(addr + data.len() as u32));
    Some((start, image.into_contiguous(start..end)))
}
