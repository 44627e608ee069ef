//! CLI surface from spec.md §6: one executable, mode chosen by flags.

use std::path::PathBuf;

use clap::Parser;

/// GDB-to-BDM bridge for the MCF52233/MCF5223x ColdFire family.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Mass-erase the target's flash, then exit.
    #[arg(long, conflicts_with = "program")]
    pub erase: bool,

    /// Erase the covered range, program `<file>`, then exit.
    #[arg(long, value_name = "FILE")]
    pub program: Option<PathBuf>,

    /// Verify after programming (only meaningful with --program).
    #[arg(long, requires = "program")]
    pub verify: bool,

    /// Load address for raw-binary --program input.
    #[arg(long, value_name = "ADDR", value_parser = parse_addr)]
    pub base: Option<u32>,

    /// Run the GDB RSP server (default mode if no other flag is given).
    #[arg(long)]
    pub gdb: bool,

    /// TCP port for the GDB RSP server.
    #[arg(short = 'p', long, default_value_t = 3333)]
    pub port: u16,

    /// Override the flash agent ELF path.
    #[arg(short = 'f', long, value_name = "PATH")]
    pub agent: Option<PathBuf>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Erase,
    Program { verify: bool, base: Option<u32> },
    Gdb { port: u16 },
}

impl Args {
    pub fn mode(&self) -> Mode {
        if self.erase {
            Mode::Erase
        } else if self.program.is_some() {
            Mode::Program {
                verify: self.verify,
                base: self.base,
            }
        } else {
            Mode::Gdb { port: self.port }
        }
    }
}

fn parse_addr(s: &str) -> Result<u32, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        s.parse::<u32>().map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_gdb_mode_with_default_port() {
        let args = Args::parse_from(["gdbd"]);
        assert_eq!(args.mode(), Mode::Gdb { port: 3333 });
    }

    #[test]
    fn erase_flag_selects_erase_mode() {
        let args = Args::parse_from(["gdbd", "--erase"]);
        assert_eq!(args.mode(), Mode::Erase);
    }

    #[test]
    fn program_flag_carries_verify_and_base() {
        let args = Args::parse_from(["gdbd", "--program", "fw.bin", "--verify", "--base", "0x1000"]);
        assert_eq!(
            args.mode(),
            Mode::Program {
                verify: true,
                base: Some(0x1000)
            }
        );
    }

    #[test]
    fn parse_addr_accepts_hex_and_decimal() {
        assert_eq!(parse_addr("0x20000000").unwrap(), 0x2000_0000);
        assert_eq!(parse_addr("4096").unwrap(), 4096);
    }
}
