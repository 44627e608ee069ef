// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! flash-agent
//!
//! This program is injected into MCF5223x SRAM by the host (see
//! `bdm-flash`) and run under BDM control. It reads a `ParamBlock` at
//! `agent_abi::PARAM_BLOCK_BASE`, drives the ColdFire Flash Module (CFM)
//! through the requested operation, writes the result back into the
//! block, re-enables flash protection, and halts. It never returns;
//! the host detects completion by polling the BDM freeze bit.

#![no_std]
#![no_main]

use agent_abi::{OpCode, ParamBlock, ResultCode};
use core::panic::PanicInfo;

mod cfm;

use cfm::Cfm;

#[no_mangle]
pub extern "C" fn _start() -> ! {
    let block = unsafe {
        &mut *(agent_abi::PARAM_BLOCK_BASE as *mut ParamBlock)
    };
    let op = op_from_u32(block.operation.get());

    let cfm = Cfm::new();
    let (result, status) = match op {
        Some(OpCode::Init) => cfm.init(),
        Some(OpCode::MassErase) => cfm.mass_erase(),
        Some(OpCode::SectorErase) => cfm.sector_erase(block.flash_addr.get()),
        Some(OpCode::Program) => {
            cfm.program(block.flash_addr.get(), block.length.get())
        }
        Some(OpCode::BlankCheck) => cfm.blank_check(),
        Some(OpCode::Verify) => {
            cfm.verify(block.flash_addr.get(), block.length.get())
        }
        None => (ResultCode::UnknownOp, 0),
    };

    block.result.set(result as u32);
    block.status.set(status);

    cfm.reprotect();
    halt();
}

/// `agent-abi`'s `OpCode` derives `num_derive::FromPrimitive` for host-side
/// use; pulling `num_traits` in here too would cost code size for a program
/// that has to fit in under 1 KiB, so the agent matches by hand instead.
fn op_from_u32(v: u32) -> Option<OpCode> {
    match v {
        0 => Some(OpCode::Init),
        1 => Some(OpCode::MassErase),
        2 => Some(OpCode::SectorErase),
        3 => Some(OpCode::Program),
        4 => Some(OpCode::BlankCheck),
        5 => Some(OpCode::Verify),
        _ => None,
    }
}

/// Busy-loop in a HALT. The agent cannot trap back to the host's GDB
/// session, unlike `endoscope`'s `bkpt`; BDM halt is what gives control
/// back to the probe.
fn halt() -> ! {
    loop {
        unsafe {
            core::arch::asm!("halt");
        }
    }
}

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    halt()
}
