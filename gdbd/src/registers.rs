//! GDB's 18-register core file (D0-D7, A0-A7, SR, PC) and the zero-filled
//! floating-point registers 18-28 that this core never implements.
//!
//! The windowed register-read command (`07 11`) is only given explicit
//! `(window, regN)` pairs for PC and SR in the retrievable capture. D0-D7
//! and A0-A7 extend that same window using the probe's own low-byte
//! numbering scheme (`0x0800+n` / `0x0808+n`) rather than the unrelated
//! Freescale BDM `Rc` register-select codes, since the two given values
//! (`0x080E`, `0x080F`) don't match that official table either -- see
//! DESIGN.md.

use bdm_proto::consts::{REG_PC, REG_SR, WIN_PC, WIN_SR};
use bdm_proto::Bdm;
use bdm_transport::Transport;

/// Register count GDB's `g`/`G` packets exchange for this core.
pub const CORE_REGISTER_COUNT: usize = 18;
pub const D0: usize = 0;
pub const A0: usize = 8;
pub const SR: usize = 16;
pub const PC: usize = 17;

/// Reports 8 extended-double FP data registers (12 bytes each) followed
/// by FPCR/FPSR/FPIAR (4 bytes each), matching the m68k-elf target
/// description's layout for a core with no FPU.
const FP_REGISTER_WIDTHS: [usize; 11] = [12, 12, 12, 12, 12, 12, 12, 12, 4, 4, 4];

fn windowed_reg(n: usize) -> (u16, u16) {
    match n {
        D0..=7 => (WIN_PC, 0x0800 + n as u16),
        A0..=15 => (WIN_PC, 0x0808 + (n - A0) as u16),
        SR => (WIN_SR, REG_SR),
        PC => (WIN_PC, REG_PC),
        _ => unreachable!("register {n} out of range"),
    }
}

pub fn read_register<T: Transport>(bdm: &mut Bdm<'_, T>, n: usize) -> Result<Vec<u8>, bdm_proto::Error> {
    if n < CORE_REGISTER_COUNT {
        let (win, reg) = windowed_reg(n);
        let v = bdm.read_cpu_register(win, reg)?;
        Ok(v.to_be_bytes().to_vec())
    } else {
        let width = FP_REGISTER_WIDTHS
            .get(n - CORE_REGISTER_COUNT)
            .copied()
            .unwrap_or(4);
        Ok(vec![0u8; width])
    }
}

pub fn write_register<T: Transport>(bdm: &mut Bdm<'_, T>, n: usize, value: u32) -> Result<(), bdm_proto::Error> {
    if n < CORE_REGISTER_COUNT {
        let (_win, reg) = windowed_reg(n);
        bdm.write_register(reg, value)?;
    }
    // Writes to FP registers are silently accepted: this core has none.
    Ok(())
}

/// Reads all 18 core registers as one big-endian byte blob, for `g`.
pub fn read_all<T: Transport>(bdm: &mut Bdm<'_, T>) -> Result<Vec<u8>, bdm_proto::Error> {
    let mut out = Vec::with_capacity(CORE_REGISTER_COUNT * 4);
    for n in 0..CORE_REGISTER_COUNT {
        out.extend(read_register(bdm, n)?);
    }
    Ok(out)
}

/// Writes all 18 core registers from one big-endian byte blob, for `G`.
pub fn write_all<T: Transport>(bdm: &mut Bdm<'_, T>, data: &[u8]) -> Result<(), bdm_proto::Error> {
    for (n, chunk) in data.chunks(4).take(CORE_REGISTER_COUNT).enumerate() {
        if chunk.len() == 4 {
            let v = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            write_register(bdm, n, v)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fp_register_widths_use_appropriate_size() {
        assert_eq!(read_fp_width(18), 12);
        assert_eq!(read_fp_width(25), 12);
        assert_eq!(read_fp_width(26), 4);
        assert_eq!(read_fp_width(28), 4);
    }

    fn read_fp_width(n: usize) -> usize {
        FP_REGISTER_WIDTHS[n - CORE_REGISTER_COUNT]
    }

    #[test]
    fn windowed_reg_maps_pc_and_sr_per_capture() {
        assert_eq!(windowed_reg(PC), (WIN_PC, REG_PC));
        assert_eq!(windowed_reg(SR), (WIN_SR, REG_SR));
    }
}
