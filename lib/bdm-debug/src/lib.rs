//! Breakpoint/watchpoint engine (C6): hardware PC breakpoints, software
//! breakpoints, and a single watchpoint, all driven through the TDR
//! shadow in [`tdr`].

mod tdr;

pub use tdr::TdrShadow;

use bdm_proto::consts::debug_register_write_code;
use bdm_proto::Bdm;
use bdm_transport::Transport;
use tdr::{DRC_ABHR, DRC_ABLR, DRC_PBR, DRC_TDR, TDR_BIT_DRW_ACCESS, TDR_BIT_DRW_READ, TDR_BIT_DRW_WRITE};

const HW_SLOTS: usize = 4;
const SW_SLOTS: usize = 32;

/// Halt instruction used for software breakpoints.
const SW_BREAKPOINT_OPCODE: u16 = 0x4AC8;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Proto(#[from] bdm_proto::Error),
    #[error("all 4 hardware breakpoint slots are in use")]
    HwBreakpointsFull,
    #[error("all 32 software breakpoint slots are in use")]
    SwBreakpointsFull,
    #[error("a watchpoint is already installed")]
    WatchpointAlreadySet,
    #[error("no breakpoint installed at {addr:#x}")]
    NotFound { addr: u32 },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WatchKind {
    Read,
    Write,
    Access,
}

impl WatchKind {
    fn drw_bits(self) -> u32 {
        match self {
            WatchKind::Read => TDR_BIT_DRW_READ,
            WatchKind::Write => TDR_BIT_DRW_WRITE,
            WatchKind::Access => TDR_BIT_DRW_ACCESS,
        }
    }
}

#[derive(Copy, Clone, Debug)]
struct HwBp {
    addr: u32,
}

#[derive(Copy, Clone, Debug)]
struct SwBp {
    addr: u32,
    saved_opcode: u16,
}

#[derive(Copy, Clone, Debug)]
struct Watchpoint {
    start: u32,
    len: u32,
    kind: WatchKind,
}

/// What to report to GDB after a halt.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    Breakpoint,
    Watch(u32),
    Other,
}

pub struct BreakpointEngine {
    tdr: TdrShadow,
    hw: [Option<HwBp>; HW_SLOTS],
    sw: [Option<SwBp>; SW_SLOTS],
    watch: Option<Watchpoint>,
}

impl Default for BreakpointEngine {
    fn default() -> Self {
        BreakpointEngine {
            tdr: TdrShadow::new(),
            hw: [None; HW_SLOTS],
            sw: [None; SW_SLOTS],
            watch: None,
        }
    }
}

impl BreakpointEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn write_tdr<T: Transport>(&self, bdm: &mut Bdm<'_, T>, bits: u32) -> Result<(), Error> {
        bdm.write_register(debug_register_write_code(DRC_TDR), bits)?;
        Ok(())
    }

    /// Arms a hardware PC breakpoint, first-free slot allocation.
    pub fn set_hardware_breakpoint<T: Transport>(&mut self, bdm: &mut Bdm<'_, T>, addr: u32) -> Result<(), Error> {
        let slot = self.hw.iter().position(Option::is_none).ok_or(Error::HwBreakpointsFull)?;
        bdm.write_register(debug_register_write_code(DRC_PBR[slot]), addr)?;
        let bits = self.tdr.set_hw_slot(slot);
        self.write_tdr(bdm, bits)?;
        self.hw[slot] = Some(HwBp { addr });
        Ok(())
    }

    pub fn clear_hardware_breakpoint<T: Transport>(&mut self, bdm: &mut Bdm<'_, T>, addr: u32) -> Result<(), Error> {
        let slot = self
            .hw
            .iter()
            .position(|s| matches!(s, Some(bp) if bp.addr == addr))
            .ok_or(Error::NotFound { addr })?;
        self.hw[slot] = None;
        let any_other = self.hw.iter().any(Option::is_some);
        let bits = self.tdr.clear_hw_slot(slot, any_other, self.watch.is_some());
        self.write_tdr(bdm, bits)
    }

    /// Installs a software breakpoint: saves the original instruction and
    /// writes a HALT opcode in its place, preserving the trailing 16
    /// bits when using the 32-bit write primitive.
    pub fn set_software_breakpoint<T: Transport>(&mut self, bdm: &mut Bdm<'_, T>, addr: u32) -> Result<(), Error> {
        let slot = self.sw.iter().position(Option::is_none).ok_or(Error::SwBreakpointsFull)?;
        let original = bdm.block_read(addr, 4)?;
        let saved_opcode = u16::from_be_bytes([original[0], original[1]]);
        let mut merged = [0u8; 4];
        merged[0..2].copy_from_slice(&SW_BREAKPOINT_OPCODE.to_be_bytes());
        merged[2..4].copy_from_slice(&original[2..4]);
        bdm.write_memory(addr, &merged)?;
        self.sw[slot] = Some(SwBp { addr, saved_opcode });
        Ok(())
    }

    pub fn clear_software_breakpoint<T: Transport>(&mut self, bdm: &mut Bdm<'_, T>, addr: u32) -> Result<(), Error> {
        let slot = self
            .sw
            .iter()
            .position(|s| matches!(s, Some(bp) if bp.addr == addr))
            .ok_or(Error::NotFound { addr })?;
        let bp = self.sw[slot].take().expect("slot checked Some above");
        let trailing = bdm.block_read(addr + 2, 2)?;
        let mut restored = [0u8; 4];
        restored[0..2].copy_from_slice(&bp.saved_opcode.to_be_bytes());
        restored[2..4].copy_from_slice(&trailing[0..2]);
        bdm.write_memory(addr, &restored)?;
        Ok(())
    }

    pub fn set_watchpoint<T: Transport>(
        &mut self,
        bdm: &mut Bdm<'_, T>,
        kind: WatchKind,
        start: u32,
        len: u32,
    ) -> Result<(), Error> {
        if self.watch.is_some() {
            return Err(Error::WatchpointAlreadySet);
        }
        bdm.write_register(debug_register_write_code(DRC_ABLR), start)?;
        bdm.write_register(debug_register_write_code(DRC_ABHR), start + len - 1)?;
        let bits = self.tdr.set_watch(kind.drw_bits());
        self.write_tdr(bdm, bits)?;
        self.watch = Some(Watchpoint { start, len, kind });
        Ok(())
    }

    pub fn clear_watchpoint<T: Transport>(&mut self, bdm: &mut Bdm<'_, T>) -> Result<(), Error> {
        let Some(watch) = self.watch.take() else { return Ok(()) };
        let any_hw = self.hw.iter().any(Option::is_some);
        let bits = self.tdr.clear_watch(watch.kind.drw_bits(), any_hw);
        self.write_tdr(bdm, bits)?;
        bdm.write_register(debug_register_write_code(DRC_ABLR), 0)?;
        bdm.write_register(debug_register_write_code(DRC_ABHR), 0)?;
        Ok(())
    }

    /// Full clear followed by reinstalling every active breakpoint and
    /// watchpoint, for recovering from a suspected shadow/hardware
    /// desync (spec.md §4.6's state-machine invariant).
    pub fn reinstall_all<T: Transport>(&mut self, bdm: &mut Bdm<'_, T>) -> Result<(), Error> {
        self.tdr.reset();
        self.write_tdr(bdm, 0)?;
        for slot in 0..HW_SLOTS {
            if let Some(bp) = self.hw[slot] {
                bdm.write_register(debug_register_write_code(DRC_PBR[slot]), bp.addr)?;
                let bits = self.tdr.set_hw_slot(slot);
                self.write_tdr(bdm, bits)?;
            }
        }
        if let Some(watch) = self.watch {
            bdm.write_register(debug_register_write_code(DRC_ABLR), watch.start)?;
            bdm.write_register(debug_register_write_code(DRC_ABHR), watch.start + watch.len - 1)?;
            let bits = self.tdr.set_watch(watch.kind.drw_bits());
            self.write_tdr(bdm, bits)?;
        }
        Ok(())
    }

    /// Classifies a halt, given the PC the target stopped at.
    pub fn stop_reason(&self, pc: u32) -> StopReason {
        if self.sw.iter().any(|s| matches!(s, Some(bp) if bp.addr == pc)) {
            return StopReason::Breakpoint;
        }
        if self.hw.iter().any(|s| matches!(s, Some(bp) if bp.addr == pc)) {
            return StopReason::Breakpoint;
        }
        if self.tdr.is_watch_active() {
            if let Some(watch) = self.watch {
                return StopReason::Watch(watch.start);
            }
        }
        StopReason::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bdm_transport::FakeTransport;

    fn ok_response() -> Vec<u8> {
        vec![0x99, 0x66, 0x00, 0x03, 0xEE, 0x00, 0x00, 0x00, 0x00]
    }

    #[test]
    fn hw_breakpoint_round_trip_updates_stop_reason() {
        let mut t = FakeTransport::new();
        for _ in 0..2 {
            t.push_response(ok_response());
        }
        let mut bdm = Bdm::new(&mut t);
        let mut engine = BreakpointEngine::new();
        engine.set_hardware_breakpoint(&mut bdm, 0x1000).unwrap();
        assert_eq!(engine.stop_reason(0x1000), StopReason::Breakpoint);
        assert_eq!(engine.stop_reason(0x2000), StopReason::Other);
    }

    #[test]
    fn fourth_hw_breakpoint_is_allowed_fifth_is_full() {
        let mut t = FakeTransport::new();
        for _ in 0..8 {
            t.push_response(ok_response());
        }
        let mut bdm = Bdm::new(&mut t);
        let mut engine = BreakpointEngine::new();
        for addr in [0x100, 0x200, 0x300, 0x400] {
            engine.set_hardware_breakpoint(&mut bdm, addr).unwrap();
        }
        let err = engine.set_hardware_breakpoint(&mut bdm, 0x500).unwrap_err();
        assert!(matches!(err, Error::HwBreakpointsFull));
    }

    #[test]
    fn watchpoint_detected_after_set() {
        let mut t = FakeTransport::new();
        for _ in 0..3 {
            t.push_response(ok_response());
        }
        let mut bdm = Bdm::new(&mut t);
        let mut engine = BreakpointEngine::new();
        engine.set_watchpoint(&mut bdm, WatchKind::Access, 0x2000_1000, 4).unwrap();
        assert_eq!(engine.stop_reason(0xDEAD), StopReason::Watch(0x2000_1000));
    }
}
