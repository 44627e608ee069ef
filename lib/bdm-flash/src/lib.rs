//! Host flash driver (C5): uploads the on-target flash agent, marshals
//! parameter blocks, runs operations, and tracks which sectors are
//! known-erased so repeated erase-range calls stay cheap.
//!
//! Like [`bdm_debug::BreakpointEngine`], this does not own a `Bdm`: it
//! takes one by reference per call, so a long-lived driver (the GDB
//! server's flash-write state machine) can coexist with other
//! components that also need the transport between calls.

mod bitmap;

pub use bitmap::SectorBitmap;

use std::thread::sleep;
use std::time::{Duration, Instant};

use agent_abi::{OpCode, ParamBlock, ResultCode, AGENT_CODE_MAX_LEN, AGENT_CODE_OFFSET, PARAM_BLOCK_BASE, PROGRAM_DATA_LEN, PROGRAM_DATA_OFFSET};
use bdm_proto::consts::*;
use bdm_proto::Bdm;
use bdm_transport::Transport;
use zerocopy::{FromBytes, IntoBytes};

/// Erase granularity and chunk size from spec.md §3.
pub const SECTOR_SIZE: u32 = 2048;
pub const SECTOR_COUNT: u32 = 128;
pub const PROGRAM_CHUNK: usize = 1024;

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const TIMEOUT_DEFAULT: Duration = Duration::from_secs(5);
const TIMEOUT_MASS_ERASE: Duration = Duration::from_secs(30);
const TIMEOUT_SECTOR_ERASE: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Init(#[from] bdm_init::Error),
    #[error(transparent)]
    Proto(#[from] bdm_proto::Error),
    #[error(transparent)]
    Image(#[from] fw_image::Error),
    #[error("flash agent image is {0} bytes, exceeds the {AGENT_CODE_MAX_LEN}-byte SRAM budget")]
    AgentTooLarge(usize),
    #[error("flash operation timed out waiting for halt")]
    Timeout,
    #[error("agent reported failure: {0:?}")]
    AgentFailed(ResultCode),
}

/// Driver lifecycle. Any failure tears the driver down to `Uninit` so the
/// "next high-level call re-initializes" rule in spec.md §4.5 is a
/// structural property of the state machine, not a convention callers
/// must remember to honor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DriverState {
    Uninit,
    Ready,
    Busy,
}

pub struct FlashDriver {
    agent_code: Vec<u8>,
    state: DriverState,
    erased_sectors: SectorBitmap,
}

impl FlashDriver {
    /// Extracts the agent's code from a big-endian `EM_68K` ELF (the
    /// output of cross-compiling `flash-agent`) and builds a driver
    /// around it.
    pub fn from_agent_elf(path: &std::path::Path) -> Result<Self, Error> {
        let image = fw_image::load_elf(path)?;
        Self::new(image)
    }

    pub fn new(agent_image: fw_image::Image) -> Result<Self, Error> {
        let base = PARAM_BLOCK_BASE + AGENT_CODE_OFFSET;
        let limit = base + AGENT_CODE_MAX_LEN as u32;
        for (addr, data) in agent_image.segments() {
            if addr < base || addr + data.len() as u32 > limit {
                return Err(Error::AgentTooLarge(data.len()));
            }
        }
        let code = agent_image.into_contiguous(base..limit);
        Ok(FlashDriver {
            agent_code: code,
            state: DriverState::Uninit,
            erased_sectors: SectorBitmap::new(),
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Runs SRAM pre-init, uploads the agent, and marks every sector as
    /// not-yet-erased. Idempotent: callers may call this whenever
    /// `state()` is not `Ready`.
    pub fn init<T: Transport>(&mut self, bdm: &mut Bdm<'_, T>) -> Result<(), Error> {
        self.state = DriverState::Busy;
        bdm_init::initialize(bdm)?;
        bdm.bulk_upload(PARAM_BLOCK_BASE + AGENT_CODE_OFFSET, &self.agent_code)?;
        self.erased_sectors.clear();
        self.state = DriverState::Ready;
        Ok(())
    }

    fn ensure_ready<T: Transport>(&mut self, bdm: &mut Bdm<'_, T>) -> Result<(), Error> {
        if self.state != DriverState::Ready {
            self.init(bdm)?;
        }
        Ok(())
    }

    /// Writes a `ParamBlock`, sets PC/SR for the agent entry point, issues
    /// GO, and polls CSR bit 14 until halted or `timeout` elapses.
    fn run_agent<T: Transport>(
        &mut self,
        bdm: &mut Bdm<'_, T>,
        op: OpCode,
        flash_addr: u32,
        length: u32,
        timeout: Duration,
    ) -> Result<ResultCode, Error> {
        self.state = DriverState::Busy;
        let block = ParamBlock::new(op, flash_addr, length);
        bdm.write_memory(PARAM_BLOCK_BASE, block.as_bytes())?;
        bdm.write_register(REG_PC, PARAM_BLOCK_BASE + AGENT_CODE_OFFSET)?;
        bdm.write_register(REG_SR, 0x2700)?;
        bdm.go()?;

        let halted = self.poll_halt(bdm, timeout)?;

        // Re-enter mode 0xF8 so the probe is ready for the next operation.
        bdm.enter_mode(MODE_F8)?;
        self.state = DriverState::Ready;

        match halted {
            Halted::Yes => {
                let readback = self.read_param_block(bdm)?;
                Ok(result_code_from_u32(readback.result.get()))
            }
            Halted::Timeout => Err(Error::Timeout),
        }
    }

    fn read_param_block<T: Transport>(&mut self, bdm: &mut Bdm<'_, T>) -> Result<ParamBlock, Error> {
        let raw = bdm.block_read(PARAM_BLOCK_BASE, ParamBlock::SIZE as u16)?;
        Ok(ParamBlock::read_from_bytes(&raw).unwrap_or_else(|_| ParamBlock::new(OpCode::Init, 0, 0)))
    }

    fn poll_halt<T: Transport>(&mut self, bdm: &mut Bdm<'_, T>, timeout: Duration) -> Result<Halted, Error> {
        let start = Instant::now();
        loop {
            let csr = bdm.read_cpu_register(WIN_CSR, REG_CSR)?;
            if csr & CSR_BIT_HALTED != 0 {
                return Ok(Halted::Yes);
            }
            if start.elapsed() >= timeout {
                return Ok(Halted::Timeout);
            }
            sleep(POLL_INTERVAL);
        }
    }

    /// Erases sectors covering `[start, start+len)` that aren't already
    /// marked erased, per spec.md §4.5's sector-index math.
    pub fn erase_range<T: Transport>(&mut self, bdm: &mut Bdm<'_, T>, start: u32, len: u32) -> Result<(), Error> {
        self.ensure_ready(bdm)?;
        let sectors = sector_range(start, len);
        let (first, last) = (sectors.start, sectors.end);
        for sector in sectors {
            if self.erased_sectors.is_erased(sector) {
                continue;
            }
            let addr = sector * SECTOR_SIZE;
            let timeout = if first == 0 && last == SECTOR_COUNT { TIMEOUT_MASS_ERASE } else { TIMEOUT_SECTOR_ERASE };
            let op = if first == 0 && last == SECTOR_COUNT { OpCode::MassErase } else { OpCode::SectorErase };
            let result = self.run_agent(bdm, op, addr, SECTOR_SIZE, timeout)?;
            if result != ResultCode::Success {
                return Err(Error::AgentFailed(result));
            }
            self.erased_sectors.mark_erased(sector);
        }
        Ok(())
    }

    /// Programs `data` at `addr`, chunked into `PROGRAM_CHUNK`-byte
    /// pieces uploaded to the agent's data buffer before each `Program`
    /// invocation.
    pub fn program<T: Transport>(&mut self, bdm: &mut Bdm<'_, T>, addr: u32, data: &[u8]) -> Result<(), Error> {
        self.ensure_ready(bdm)?;
        for (i, chunk) in data.chunks(PROGRAM_CHUNK).enumerate() {
            let chunk_addr = addr + (i * PROGRAM_CHUNK) as u32;
            let mut padded = chunk.to_vec();
            while padded.len() % 4 != 0 {
                padded.push(0xFF);
            }
            bdm.bulk_upload(PARAM_BLOCK_BASE + PROGRAM_DATA_OFFSET, &padded)?;
            let result = self.run_agent(bdm, OpCode::Program, chunk_addr, padded.len() as u32, TIMEOUT_DEFAULT)?;
            if result != ResultCode::Success {
                return Err(Error::AgentFailed(result));
            }
        }
        Ok(())
    }

    /// Erase-range then program, with an optional verify pass.
    pub fn program_binary<T: Transport>(
        &mut self,
        bdm: &mut Bdm<'_, T>,
        addr: u32,
        data: &[u8],
        verify: bool,
    ) -> Result<(), Error> {
        self.erase_range(bdm, addr, data.len() as u32)?;
        self.program(bdm, addr, data)?;
        if verify {
            let result = self.run_agent(bdm, OpCode::Verify, addr, data.len() as u32, TIMEOUT_DEFAULT)?;
            if result != ResultCode::Success {
                return Err(Error::AgentFailed(result));
            }
        }
        Ok(())
    }

    pub fn erased_sectors(&self) -> &SectorBitmap {
        &self.erased_sectors
    }
}

enum Halted {
    Yes,
    Timeout,
}

/// Matches the agent's hand-written dispatch in `flash-agent` rather than
/// pulling in `num-traits` for a six-variant lookup on the host side.
fn result_code_from_u32(v: u32) -> ResultCode {
    match v {
        0 => ResultCode::Success,
        1 => ResultCode::AccessError,
        2 => ResultCode::ProtectionViolation,
        3 => ResultCode::NotBlank,
        4 => ResultCode::VerifyMismatch,
        5 => ResultCode::Timeout,
        _ => ResultCode::UnknownOp,
    }
}

/// `[start/2048, ceil((start+len)/2048))`, isolated from transport IO so
/// the boundary math from spec.md §4.5 can be tested directly.
fn sector_range(start: u32, len: u32) -> std::ops::Range<u32> {
    let first = start / SECTOR_SIZE;
    let last = (start + len + SECTOR_SIZE - 1) / SECTOR_SIZE;
    first..last
}

const _: () = assert!(PROGRAM_DATA_LEN >= PROGRAM_CHUNK);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_range_covers_partial_last_sector() {
        assert_eq!(sector_range(0, 1), 0..1);
        assert_eq!(sector_range(0, SECTOR_SIZE), 0..1);
        assert_eq!(sector_range(0, SECTOR_SIZE + 1), 0..2);
        assert_eq!(sector_range(SECTOR_SIZE, SECTOR_SIZE * 3), 1..4);
    }

    #[test]
    fn result_code_round_trips_known_values() {
        assert_eq!(result_code_from_u32(0), ResultCode::Success);
        assert_eq!(result_code_from_u32(4), ResultCode::VerifyMismatch);
        assert_eq!(result_code_from_u32(0xFF), ResultCode::UnknownOp);
        assert_eq!(result_code_from_u32(123), ResultCode::UnknownOp);
    }
}
