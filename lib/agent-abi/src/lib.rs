// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! agent-abi
//!
//! This crate documents the interface between the host flash driver and
//! the flash agent program that runs in target SRAM under BDM control.
//!
//! When a flash operation is requested, the host halts the target,
//! injects the agent into SRAM, writes a `ParamBlock` describing the
//! operation, and resumes execution. The agent busy-loops on the CFM
//! controller, writes `result`/`status` back into the same block, and
//! halts. The host polls the BDM freeze state and reads the result.

#![no_std]

use num_derive::FromPrimitive;
use zerocopy::byteorder::big_endian::U32;
use zerocopy::{Immutable, IntoBytes, FromBytes, KnownLayout};

/// Base address of the parameter block in target SRAM.
pub const PARAM_BLOCK_BASE: u32 = 0x2000_0000;

/// Offset of the 1 KiB program-data buffer within SRAM.
pub const PROGRAM_DATA_OFFSET: u32 = 0x100;
/// Maximum number of bytes the program-data buffer holds.
pub const PROGRAM_DATA_LEN: usize = 1024;

/// Offset of the agent's own relocated code within SRAM.
pub const AGENT_CODE_OFFSET: u32 = 0x500;
/// Maximum size of the agent code image.
pub const AGENT_CODE_MAX_LEN: usize = 1024;

/// Offset of the initial stack pointer value read by the agent's reset code.
pub const STACK_POINTER_OFFSET: u32 = 0x7FF0;

#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum OpCode {
    Init = 0,
    MassErase = 1,
    SectorErase = 2,
    Program = 3,
    BlankCheck = 4,
    Verify = 5,
}

#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum ResultCode {
    Success = 0,
    AccessError = 1,
    ProtectionViolation = 2,
    NotBlank = 3,
    VerifyMismatch = 4,
    Timeout = 5,
    UnknownOp = 0xFF,
}

/// The fixed-layout header at `PARAM_BLOCK_BASE`. Shared verbatim between
/// the host (`bdm-flash`) and the agent (`flash-agent`) so the offsets in
/// spec.md §3 are enforced by the type system rather than hand-matched.
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct ParamBlock {
    pub operation: U32,
    pub flash_addr: U32,
    pub length: U32,
    pub result: U32,
    pub status: U32,
    pub _reserved: [u8; 12],
}

impl ParamBlock {
    pub const SIZE: usize = core::mem::size_of::<Self>();

    pub fn new(operation: OpCode, flash_addr: u32, length: u32) -> Self {
        ParamBlock {
            operation: U32::new(operation as u32),
            flash_addr: U32::new(flash_addr),
            length: U32::new(length),
            result: U32::new(0),
            status: U32::new(0),
            _reserved: [0; 12],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::const_assert_eq;

    const_assert_eq!(ParamBlock::SIZE, 0x20);

    #[test]
    fn round_trip_header() {
        let block = ParamBlock::new(OpCode::SectorErase, 0x1000, 0x800);
        let bytes = block.as_bytes();
        let back = ParamBlock::read_from_bytes(bytes).unwrap();
        assert_eq!(back.operation.get(), OpCode::SectorErase as u32);
        assert_eq!(back.flash_addr.get(), 0x1000);
        assert_eq!(back.length.get(), 0x800);
    }
}
