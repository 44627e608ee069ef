//! RSP command parsing and the handful of text encodings (hex, target
//! description XML) the dispatcher needs. Kept apart from [`crate::server`]
//! so the grammar -- a flat table of single-letter/prefix commands, not
//! worth a parser-combinator crate -- has its own small set of tests.

#[derive(Debug, PartialEq, Eq)]
pub enum BreakKind {
    SoftwareOrHardware,
    Hardware,
    WriteWatch,
    ReadWatch,
    AccessWatch,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    QueryHaltReason,
    ReadAllRegisters,
    WriteAllRegisters(Vec<u8>),
    ReadRegister(usize),
    WriteRegister(usize, u32),
    ReadMemory { addr: u32, len: u32 },
    WriteMemory { addr: u32, data: Vec<u8> },
    Continue(Option<u32>),
    Step(Option<u32>),
    SetThread,
    QSupported,
    QXferFeaturesRead,
    QXferMemoryMapRead,
    QCrc { addr: u32, len: u32 },
    QRcmd(Vec<u8>),
    SetBreak { kind: BreakKind, addr: u32, len: u32 },
    ClearBreak { kind: BreakKind, addr: u32, len: u32 },
    VContQuery,
    VContContinue,
    VContStep,
    VFlashErase { addr: u32, len: u32 },
    VFlashWrite { addr: u32, data: Vec<u8> },
    VFlashDone,
    KillOrDetach,
    Unknown,
}

pub fn parse(payload: &[u8]) -> Command {
    let text = |b: &[u8]| std::str::from_utf8(b).unwrap_or("");
    match payload.first() {
        Some(b'?') => Command::QueryHaltReason,
        Some(b'g') => Command::ReadAllRegisters,
        Some(b'G') => Command::WriteAllRegisters(decode_hex(&payload[1..])),
        Some(b'H') => Command::SetThread,
        Some(b'k') | Some(b'D') => Command::KillOrDetach,
        Some(b'p') => {
            let n = usize::from_str_radix(text(&payload[1..]), 16).unwrap_or(0);
            Command::ReadRegister(n)
        }
        Some(b'P') => {
            let rest = text(&payload[1..]);
            if let Some((n, v)) = rest.split_once('=') {
                let n = usize::from_str_radix(n, 16).unwrap_or(0);
                let v = u32::from_str_radix(v, 16).unwrap_or(0);
                Command::WriteRegister(n, v)
            } else {
                Command::Unknown
            }
        }
        Some(b'm') => parse_addr_len(&payload[1..])
            .map(|(addr, len)| Command::ReadMemory { addr, len })
            .unwrap_or(Command::Unknown),
        Some(b'M') => parse_write_memory(&payload[1..]),
        Some(b'c') => Command::Continue(parse_optional_addr(&payload[1..])),
        Some(b's') => Command::Step(parse_optional_addr(&payload[1..])),
        Some(b'Z') => parse_break(&payload[1..], true),
        Some(b'z') => parse_break(&payload[1..], false),
        Some(b'q') | Some(b'Q') => parse_query(&payload[1..]),
        Some(b'v') => parse_v(&payload[1..]),
        _ => Command::Unknown,
    }
}

fn parse_optional_addr(rest: &[u8]) -> Option<u32> {
    if rest.is_empty() {
        None
    } else {
        u32::from_str_radix(std::str::from_utf8(rest).ok()?, 16).ok()
    }
}

fn parse_addr_len(rest: &[u8]) -> Option<(u32, u32)> {
    let s = std::str::from_utf8(rest).ok()?;
    let (a, l) = s.split_once(',')?;
    Some((u32::from_str_radix(a, 16).ok()?, u32::from_str_radix(l, 16).ok()?))
}

fn parse_write_memory(rest: &[u8]) -> Command {
    let Some(colon) = rest.iter().position(|&b| b == b':') else {
        return Command::Unknown;
    };
    let Some((addr, _len)) = parse_addr_len(&rest[..colon]) else {
        return Command::Unknown;
    };
    Command::WriteMemory {
        addr,
        data: decode_hex(&rest[colon + 1..]),
    }
}

fn parse_break(rest: &[u8], set: bool) -> Command {
    let Ok(s) = std::str::from_utf8(rest) else {
        return Command::Unknown;
    };
    let mut parts = s.splitn(3, ',');
    let (Some(t), Some(addr), Some(len)) = (parts.next(), parts.next(), parts.next()) else {
        return Command::Unknown;
    };
    let (Ok(addr), Ok(len)) = (u32::from_str_radix(addr, 16), u32::from_str_radix(len, 16)) else {
        return Command::Unknown;
    };
    let kind = match t {
        "0" => BreakKind::SoftwareOrHardware,
        "1" => BreakKind::Hardware,
        "2" => BreakKind::WriteWatch,
        "3" => BreakKind::ReadWatch,
        "4" => BreakKind::AccessWatch,
        _ => return Command::Unknown,
    };
    if set {
        Command::SetBreak { kind, addr, len }
    } else {
        Command::ClearBreak { kind, addr, len }
    }
}

fn parse_query(rest: &[u8]) -> Command {
    let s = std::str::from_utf8(rest).unwrap_or("");
    if s.starts_with("Supported") {
        Command::QSupported
    } else if s.starts_with("Xfer:features:read:target.xml") {
        Command::QXferFeaturesRead
    } else if s.starts_with("Xfer:memory-map:read") {
        Command::QXferMemoryMapRead
    } else if let Some(rest) = s.strip_prefix("CRC:") {
        parse_addr_len(rest.as_bytes())
            .map(|(addr, len)| Command::QCrc { addr, len })
            .unwrap_or(Command::Unknown)
    } else if let Some(rest) = s.strip_prefix("Rcmd,") {
        Command::QRcmd(decode_hex(rest.as_bytes()))
    } else {
        Command::Unknown
    }
}

fn parse_v(rest: &[u8]) -> Command {
    let s = std::str::from_utf8(rest).unwrap_or("");
    if s == "Cont?" {
        Command::VContQuery
    } else if s == "Cont;c" {
        Command::VContContinue
    } else if s == "Cont;s" {
        Command::VContStep
    } else if let Some(rest) = s.strip_prefix("FlashErase:") {
        parse_addr_len(rest.as_bytes())
            .map(|(addr, len)| Command::VFlashErase { addr, len })
            .unwrap_or(Command::Unknown)
    } else if let Some(rest) = s.strip_prefix("FlashWrite:") {
        let bytes = rest.as_bytes();
        match bytes.iter().position(|&b| b == b':') {
            Some(colon) => {
                let addr = u32::from_str_radix(std::str::from_utf8(&bytes[..colon]).unwrap_or(""), 16).unwrap_or(0);
                Command::VFlashWrite {
                    addr,
                    data: crate::packet::unescape(&bytes[colon + 1..]),
                }
            }
            None => Command::Unknown,
        }
    } else if s == "FlashDone" {
        Command::VFlashDone
    } else {
        Command::Unknown
    }
}

pub fn decode_hex(s: &[u8]) -> Vec<u8> {
    s.chunks(2)
        .filter(|c| c.len() == 2)
        .filter_map(|c| {
            let hi = (c[0] as char).to_digit(16)?;
            let lo = (c[1] as char).to_digit(16)?;
            Some(((hi << 4) | lo) as u8)
        })
        .collect()
}

pub fn encode_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

/// Minimal m68k target description for `qXfer:features:read:target.xml`.
pub const TARGET_XML: &str = concat!(
    "<?xml version=\"1.0\"?>",
    "<!DOCTYPE target SYSTEM \"gdb-target.dtd\">",
    "<target><architecture>m68k:521x</architecture></target>",
);

/// Memory map per spec.md §4.7: flash `[0,0x40000)` blocksize `0x800`,
/// SRAM `[0x20000000, 0x20008000)`, peripheral `[0x40000000, 0x40200000)`.
pub const MEMORY_MAP_XML: &str = concat!(
    "<?xml version=\"1.0\"?>",
    "<!DOCTYPE memory-map SYSTEM \"memory-map.dtd\">",
    "<memory-map>",
    "<memory type=\"flash\" start=\"0x0\" length=\"0x40000\"><property name=\"blocksize\">0x800</property></memory>",
    "<memory type=\"ram\" start=\"0x20000000\" length=\"0x8000\"/>",
    "<memory type=\"ram\" start=\"0x40000000\" length=\"0x200000\"/>",
    "</memory-map>",
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_memory_read() {
        assert_eq!(parse(b"m20000000,8"), Command::ReadMemory { addr: 0x2000_0000, len: 8 });
    }

    #[test]
    fn parses_memory_write_with_hex_payload() {
        assert_eq!(
            parse(b"M1000,2:aabb"),
            Command::WriteMemory {
                addr: 0x1000,
                data: vec![0xaa, 0xbb]
            }
        );
    }

    #[test]
    fn parses_register_write() {
        assert_eq!(parse(b"P11=00000400"), Command::WriteRegister(0x11, 0x400));
    }

    #[test]
    fn parses_hardware_breakpoint_set() {
        assert_eq!(
            parse(b"Z1,400,2"),
            Command::SetBreak {
                kind: BreakKind::Hardware,
                addr: 0x400,
                len: 2
            }
        );
    }

    #[test]
    fn parses_vflash_commands() {
        assert_eq!(parse(b"vFlashErase:0,800"), Command::VFlashErase { addr: 0, len: 0x800 });
        assert_eq!(parse(b"vFlashDone"), Command::VFlashDone);
    }

    #[test]
    fn hex_round_trips() {
        let bytes = [0x00, 0x01, 0xFE, 0xFF];
        assert_eq!(decode_hex(encode_hex(&bytes).as_bytes()), bytes);
    }
}
