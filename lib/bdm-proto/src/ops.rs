use std::thread::sleep;
use std::time::Duration;

use bdm_transport::{Transport, DEFAULT_TIMEOUT, FREEZE_POLL_TIMEOUT};
use log::trace;

use crate::builder::{build_bb_frame, CommandBuilder};
use crate::consts::*;
use crate::response::{self, ResponseKind};
use crate::Error;

/// Inter-chunk gap for single-chunk BB uploads to SRAM.
const BB_CHUNK_SIZE: usize = 1192;
const BB_CHUNK_GAP: Duration = Duration::from_millis(5);
/// Delay after a BB upload before draining its status response.
const BB_STATUS_DELAY: Duration = Duration::from_millis(20);

/// The set of BDM primitive operations from spec.md §4.2, implemented
/// against any [`Transport`]. Every method that expects a response reads
/// exactly one frame into the persistent buffer per spec.md §4.2's
/// discipline note.
pub struct Bdm<'t, T: Transport> {
    transport: &'t mut T,
}

impl<'t, T: Transport> Bdm<'t, T> {
    pub fn new(transport: &'t mut T) -> Self {
        Bdm { transport }
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.transport
    }

    fn send_and_recv(&mut self, command: [u8; 2], build: impl FnOnce(&mut CommandBuilder)) -> Result<ResponseKind, Error> {
        let buf = self.transport.buffer_mut();
        let mut builder = CommandBuilder::new_aa(buf, command);
        build(&mut builder);
        let frame = builder.finish();
        self.transport.send(frame)?;
        let resp = self.transport.recv(DEFAULT_TIMEOUT)?;
        let (kind, _) = response::validate(resp)?;
        Ok(kind)
    }

    fn payload(&self) -> &[u8] {
        self.transport.buffer()
    }

    /// `01 0B` device info query. The probe refuses subsequent commands
    /// until this has been issued twice at session start.
    pub fn device_info(&mut self) -> Result<(), Error> {
        let buf = self.transport.buffer_mut();
        let frame = CommandBuilder::new_aa(buf, CMD_DEVICE_INFO).finish();
        self.transport.send(frame)?;
        let resp = self.transport.recv(DEFAULT_TIMEOUT)?;
        response::validate(resp)?;
        Ok(())
    }

    /// `07 01 [mode]` enter mode (0xFC, 0xF8, 0xF0).
    pub fn enter_mode(&mut self, mode: u8) -> Result<(), Error> {
        let buf = self.transport.buffer_mut();
        let frame = CommandBuilder::new_aa(buf, CMD_ENTER_MODE)
            .write_u8(mode)
            .finish();
        self.transport.send(frame)?;
        let resp = self.transport.recv(DEFAULT_TIMEOUT)?;
        response::validate(resp)?;
        Ok(())
    }

    /// `07 A2 01` mode-entry configure step.
    pub fn config_entry(&mut self) -> Result<(), Error> {
        let buf = self.transport.buffer_mut();
        let frame = CommandBuilder::new_aa(buf, CMD_CONFIG_ENTRY)
            .write_u8(0x01)
            .finish();
        self.transport.send(frame)?;
        let resp = self.transport.recv(DEFAULT_TIMEOUT)?;
        response::validate(resp)?;
        Ok(())
    }

    /// One of the three `04 40 ...` BDM init/config steps.
    pub fn bdm_config(&mut self, arg: u16) -> Result<(), Error> {
        let buf = self.transport.buffer_mut();
        let frame = CommandBuilder::new_aa(buf, CMD_BDM_CONFIG)
            .write_u16(arg)
            .finish();
        self.transport.send(frame)?;
        let resp = self.transport.recv(DEFAULT_TIMEOUT)?;
        response::validate(resp)?;
        Ok(())
    }

    /// `07 0A [param]` enable memory access. Must be issued twice by
    /// the caller (the init sequencer does this, not this primitive).
    pub fn enable_memory_access(&mut self, param: u8) -> Result<(), Error> {
        let buf = self.transport.buffer_mut();
        let frame = CommandBuilder::new_aa(buf, CMD_ENABLE_MEM_ACCESS)
            .write_u8(param)
            .finish();
        self.transport.send(frame)?;
        let resp = self.transport.recv(DEFAULT_TIMEOUT)?;
        response::validate(resp)?;
        Ok(())
    }

    /// `07 12 [pad:16]` BDM HALT / sync.
    pub fn sync(&mut self) -> Result<(), Error> {
        let buf = self.transport.buffer_mut();
        let frame = CommandBuilder::new_aa(buf, CMD_BDM_SYNC)
            .write_u16(0)
            .finish();
        self.transport.send(frame)?;
        let resp = self.transport.recv(DEFAULT_TIMEOUT)?;
        response::validate(resp)?;
        Ok(())
    }

    /// `07 95` freeze-sequence helper.
    pub fn freeze_helper(&mut self) -> Result<(), Error> {
        let buf = self.transport.buffer_mut();
        let frame = CommandBuilder::new_aa(buf, CMD_FREEZE_HELPER).finish();
        self.transport.send(frame)?;
        let resp = self.transport.recv(DEFAULT_TIMEOUT)?;
        response::validate(resp)?;
        Ok(())
    }

    /// `04 7F FE 02`, polled for status: byte `0x01`/`0x00` = halted,
    /// `0x88` = running.
    pub fn freeze_check(&mut self) -> Result<bool, Error> {
        let buf = self.transport.buffer_mut();
        let frame = CommandBuilder::new_aa(buf, CMD_FREEZE_CHECK)
            .write_u16(ARG_FREEZE_CHECK)
            .finish();
        self.transport.send(frame)?;
        let resp = self.transport.recv(FREEZE_POLL_TIMEOUT)?;
        let (_, payload) = response::validate(resp)?;
        let status = payload.first().copied().unwrap_or(0x88);
        Ok(status == 0x01 || status == 0x00)
    }

    /// `07 13 [reg:16]` read a 16/32-bit BDM register.
    pub fn read_bdm_register(&mut self, reg: u16) -> Result<u32, Error> {
        let kind = self.send_and_recv(CMD_READ_BDM_REGISTER, |b| {
            b.write_u16(reg);
        })?;
        debug_assert_eq!(kind, ResponseKind::Standard);
        let buf = self.payload();
        Ok(u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]))
    }

    /// `07 14 [win:32][reg:16][val:32]`. `reg` should be built with
    /// [`debug_register_write_code`] for debug-module registers.
    pub fn write_register(&mut self, reg: u16, val: u32) -> Result<(), Error> {
        self.send_and_recv(CMD_WRITE_REGISTER, |b| {
            b.write_u32(WIN_REGISTER_WRITE).write_u16(reg).write_u32(val);
        })?;
        Ok(())
    }

    /// `07 15` extended configure with variable parameters.
    pub fn configure(&mut self, params: &[u8]) -> Result<(), Error> {
        self.send_and_recv(CMD_CONFIGURE, |b| {
            b.write_bytes(params);
        })?;
        Ok(())
    }

    /// `07 16` write memory.
    pub fn write_memory(&mut self, addr: u32, data: &[u8]) -> Result<(), Error> {
        self.send_and_recv(CMD_WRITE_MEMORY, |b| {
            b.write_u32(addr).write_u16(data.len() as u16).write_bytes(data);
        })?;
        Ok(())
    }

    /// `07 17 [addr:32][len:16]` block read, 6-per-4 decoded.
    pub fn block_read(&mut self, addr: u32, len: u16) -> Result<Vec<u8>, Error> {
        let want = ((len as usize + 3) / 4) * 6;
        let kind = self.send_and_recv(CMD_BLOCK_READ, |b| {
            b.write_u32(addr).write_u16(len);
        })?;
        debug_assert_eq!(kind, ResponseKind::Standard);
        let buf = self.payload();
        let raw = &buf[5..5 + want.min(buf.len() - 5)];
        Ok(response::decode_block_read(raw, len as usize))
    }

    /// `07 19 [0x0004][addr:32][data:32]` single-longword SRAM write.
    pub fn sram_longword_write(&mut self, addr: u32, data: u32) -> Result<(), Error> {
        self.send_and_recv(CMD_SRAM_LONGWORD_WRITE, |b| {
            b.write_u16(0x0004).write_u32(addr).write_u32(data);
        })?;
        Ok(())
    }

    /// `07 1B [addr:32][len:16]` verify-style read; SRAM data is at
    /// non-contiguous offsets 0/7/9/11 of the payload.
    pub fn verify_read_longword(&mut self, addr: u32) -> Result<[u8; 4], Error> {
        let kind = self.send_and_recv(CMD_VERIFY_READ, |b| {
            b.write_u32(addr).write_u16(4);
        })?;
        debug_assert_eq!(kind, ResponseKind::Standard);
        let buf = self.payload();
        Ok(response::decode_sram_longword(&buf[5..]))
    }

    /// `07 1E` CFM init / SRAM write variant (two length-selected forms).
    pub fn cfm_init(&mut self, form_len: u16, payload: &[u8]) -> Result<(), Error> {
        self.send_and_recv(CMD_CFM_INIT, |b| {
            b.write_u16(form_len).write_bytes(payload);
        })?;
        Ok(())
    }

    /// `07 10` memory-window status probe.
    pub fn window_status(&mut self) -> Result<u8, Error> {
        let kind = self.send_and_recv(CMD_WINDOW_STATUS, |_| {})?;
        debug_assert_eq!(kind, ResponseKind::Standard);
        Ok(self.payload()[5])
    }

    /// `07 11 [win:16][regN:2B]` read CPU register via window.
    pub fn read_cpu_register(&mut self, window: u16, reg_n: u16) -> Result<u32, Error> {
        let kind = self.send_and_recv(CMD_READ_CPU_REGISTER, |b| {
            b.write_u16(window).write_u16(reg_n);
        })?;
        debug_assert_eq!(kind, ResponseKind::Standard);
        let buf = self.payload();
        Ok(u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]))
    }

    /// `07 02 FC 0C` BDM GO (resume execution).
    pub fn go(&mut self) -> Result<(), Error> {
        let buf = self.transport.buffer_mut();
        let frame = CommandBuilder::new_aa(buf, CMD_BDM_GO)
            .write_bytes(&GO_TRAILER)
            .finish();
        self.transport.send(frame)?;
        let resp = self.transport.recv(DEFAULT_TIMEOUT)?;
        response::validate(resp)?;
        Ok(())
    }

    /// `BB 66 ...` large upload to a 32-bit destination address. The
    /// short status response must be drained or subsequent reads are
    /// corrupted (spec.md §4.2 discipline).
    pub fn bulk_upload(&mut self, dest_addr: u32, data: &[u8]) -> Result<(), Error> {
        let frame = build_bb_frame(dest_addr, data);
        self.transport.send_bulk(&frame)?;
        sleep(BB_STATUS_DELAY);
        let resp = self.transport.recv(bdm_transport::BULK_TIMEOUT)?;
        if resp.len() < 5 || resp[4] != STATUS_OK {
            return Err(Error::BadStatus {
                status: resp.get(4).copied().unwrap_or(0),
            });
        }
        trace!("drained bulk upload status ({} bytes)", resp.len());
        Ok(())
    }

    /// Single-chunk BB upload to SRAM, chunked at 1192 bytes with a
    /// 5 ms inter-chunk gap per spec.md §4.2.
    pub fn bulk_upload_sram(&mut self, dest_addr: u32, data: &[u8]) -> Result<(), Error> {
        for (i, chunk) in data.chunks(BB_CHUNK_SIZE).enumerate() {
            let addr = dest_addr + (i * BB_CHUNK_SIZE) as u32;
            self.bulk_upload(addr, chunk)?;
            if (i + 1) * BB_CHUNK_SIZE < data.len() {
                sleep(BB_CHUNK_GAP);
            }
        }
        Ok(())
    }
}
