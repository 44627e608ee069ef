// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register-level driver for the ColdFire Flash Module (CFM), run from
//! the agent's own SRAM image. There is no PAC crate for this part, so
//! registers are accessed through named volatile pointers rather than a
//! generated svd binding.

use agent_abi::ResultCode;

/// CFM module register block base (IPSBAR + 0x1D4000 on MCF5223x parts).
const CFM_BASE: u32 = 0x4001_D000;

const CFMMCR: *mut u16 = CFM_BASE as *mut u16;
const CFMCLKD: *mut u8 = (CFM_BASE + 0x02) as *mut u8;
const CFMSEC: *mut u32 = (CFM_BASE + 0x08) as *mut u32;
const CFMPROT: *mut u32 = (CFM_BASE + 0x10) as *mut u32;
const CFMSACC: *mut u32 = (CFM_BASE + 0x14) as *mut u32;
const CFMDACC: *mut u32 = (CFM_BASE + 0x18) as *mut u32;
const CFMUSTAT: *mut u8 = (CFM_BASE + 0x20) as *mut u8;
const CFMCMD: *mut u8 = (CFM_BASE + 0x24) as *mut u8;

/// Write port into the flash array; distinct from the read-mapped array
/// at 0x0000_0000.
const FLASH_BACKDOOR_BASE: u32 = 0x4400_0000;

/// System clock divider for a 60 MHz bus clock, per spec.md §4.4.
const CLOCK_DIVIDER_60MHZ: u8 = 0x66;

const CFMUSTAT_CBEIF: u8 = 0x80;
const CFMUSTAT_CCIF: u8 = 0x40;
const CFMUSTAT_PVIOL: u8 = 0x20;
const CFMUSTAT_ACCERR: u8 = 0x10;
const CFMUSTAT_BLANK: u8 = 0x04;

const CMD_ERASE_VERIFY: u8 = 0x05;
const CMD_PROGRAM: u8 = 0x20;
const CMD_SECTOR_ERASE: u8 = 0x40;
const CMD_MASS_ERASE: u8 = 0x41;

/// Launch-command magic values. The reference captures that this agent
/// was derived from use `0xF4` to launch a mass erase and `0x90` to
/// launch a sector erase or program command; neither value is documented
/// by the part's reference manual, so they are carried verbatim rather
/// than decomposed into named bits (spec.md §9, open questions).
const LAUNCH_MASS_ERASE: u8 = 0xF4;
const LAUNCH_OTHER: u8 = 0x90;

const CCIF_TIMEOUT_ITERS: u32 = 2_000_000;

pub struct Cfm {
    _private: (),
}

impl Cfm {
    pub fn new() -> Self {
        Cfm { _private: () }
    }

    pub fn init(&self) -> (ResultCode, u32) {
        unsafe {
            core::ptr::write_volatile(CFMMCR, 0); // disable CFM
            core::ptr::write_volatile(CFMCLKD, CLOCK_DIVIDER_60MHZ);
            core::ptr::write_volatile(CFMPROT, 0);
            core::ptr::write_volatile(CFMSACC, 0);
            core::ptr::write_volatile(CFMDACC, 0);
            // Clear any sticky PVIOL/ACCERR from a previous operation by
            // writing them back; CFMUSTAT's error bits are w1c.
            core::ptr::write_volatile(
                CFMUSTAT,
                CFMUSTAT_PVIOL | CFMUSTAT_ACCERR,
            );
        }
        (ResultCode::Success, 0)
    }

    pub fn mass_erase(&self) -> (ResultCode, u32) {
        if !self.wait_cbeif() {
            return (ResultCode::Timeout, self.status());
        }
        unsafe {
            core::ptr::write_volatile(FLASH_BACKDOOR_BASE as *mut u32, 0);
            core::ptr::write_volatile(CFMCMD, CMD_MASS_ERASE);
            core::ptr::write_volatile(CFMUSTAT, LAUNCH_MASS_ERASE);
        }
        self.wait_ccif_and_report()
    }

    pub fn sector_erase(&self, sector_addr: u32) -> (ResultCode, u32) {
        if !self.wait_cbeif() {
            return (ResultCode::Timeout, self.status());
        }
        unsafe {
            core::ptr::write_volatile(
                (FLASH_BACKDOOR_BASE + sector_addr) as *mut u32,
                0,
            );
            core::ptr::write_volatile(CFMCMD, CMD_SECTOR_ERASE);
            core::ptr::write_volatile(CFMUSTAT, LAUNCH_OTHER);
        }
        self.wait_ccif_and_report()
    }

    pub fn program(&self, addr: u32, len: u32) -> (ResultCode, u32) {
        let data = unsafe {
            core::slice::from_raw_parts(
                (agent_abi::PARAM_BLOCK_BASE + agent_abi::PROGRAM_DATA_OFFSET)
                    as *const u32,
                (len as usize + 3) / 4,
            )
        };
        let words = (len + 3) / 4;
        for i in 0..words {
            if !self.wait_cbeif() {
                return (ResultCode::Timeout, self.status());
            }
            unsafe {
                core::ptr::write_volatile(
                    (FLASH_BACKDOOR_BASE + addr + i * 4) as *mut u32,
                    data[i as usize],
                );
                core::ptr::write_volatile(CFMCMD, CMD_PROGRAM);
                core::ptr::write_volatile(CFMUSTAT, LAUNCH_OTHER);
            }
            if i + 1 == words && !self.wait_ccif() {
                return (ResultCode::Timeout, self.status());
            }
        }
        self.report(self.status())
    }

    pub fn blank_check(&self) -> (ResultCode, u32) {
        if !self.wait_cbeif() {
            return (ResultCode::Timeout, self.status());
        }
        unsafe {
            core::ptr::write_volatile(FLASH_BACKDOOR_BASE as *mut u32, 0);
            core::ptr::write_volatile(CFMCMD, CMD_ERASE_VERIFY);
            core::ptr::write_volatile(CFMUSTAT, LAUNCH_OTHER);
        }
        if !self.wait_ccif() {
            return (ResultCode::Timeout, self.status());
        }
        let status = self.status();
        if status & CFMUSTAT_BLANK != 0 {
            (ResultCode::Success, status)
        } else {
            (ResultCode::NotBlank, status)
        }
    }

    pub fn verify(&self, addr: u32, len: u32) -> (ResultCode, u32) {
        let flash = unsafe {
            core::slice::from_raw_parts(addr as *const u32, (len as usize + 3) / 4)
        };
        let data = unsafe {
            core::slice::from_raw_parts(
                (agent_abi::PARAM_BLOCK_BASE + agent_abi::PROGRAM_DATA_OFFSET)
                    as *const u32,
                (len as usize + 3) / 4,
            )
        };
        if flash == data {
            (ResultCode::Success, 0)
        } else {
            (ResultCode::VerifyMismatch, 0)
        }
    }

    /// Re-lock flash protection before handing control back to the host;
    /// the probe firmware expects the agent to leave protection exactly
    /// as it found it.
    pub fn reprotect(&self) {
        unsafe {
            core::ptr::write_volatile(CFMPROT, 0xFFFF_FFFF);
        }
    }

    fn status(&self) -> u32 {
        unsafe { core::ptr::read_volatile(CFMUSTAT) as u32 }
    }

    fn wait_cbeif(&self) -> bool {
        for _ in 0..CCIF_TIMEOUT_ITERS {
            if unsafe { core::ptr::read_volatile(CFMUSTAT) } & CFMUSTAT_CBEIF != 0 {
                return true;
            }
        }
        false
    }

    fn wait_ccif(&self) -> bool {
        for _ in 0..CCIF_TIMEOUT_ITERS {
            if unsafe { core::ptr::read_volatile(CFMUSTAT) } & CFMUSTAT_CCIF != 0 {
                return true;
            }
        }
        false
    }

    fn wait_ccif_and_report(&self) -> (ResultCode, u32) {
        if !self.wait_ccif() {
            return (ResultCode::Timeout, self.status());
        }
        self.report(self.status())
    }

    fn report(&self, status: u32) -> (ResultCode, u32) {
        if status as u8 & CFMUSTAT_PVIOL != 0 {
            (ResultCode::ProtectionViolation, status)
        } else if status as u8 & CFMUSTAT_ACCERR != 0 {
            (ResultCode::AccessError, status)
        } else {
            (ResultCode::Success, status)
        }
    }
}
