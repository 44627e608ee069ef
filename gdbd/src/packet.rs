//! GDB Remote Serial Protocol framing: packet extraction, the 8-bit sum
//! checksum, `+`/`-` acks, the `0x03` interrupt byte, and RSP's
//! `0x7D`-prefixed binary escaping (used by `vFlashWrite`'s payload).

const ESCAPE: u8 = 0x7D;
const ESCAPE_XOR: u8 = 0x20;
const INTERRUPT: u8 = 0x03;

#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    Ack,
    Nack,
    Interrupt,
    /// A complete packet whose checksum matched. Payload is the raw
    /// bytes between `$` and `#`, still escaped where applicable.
    Packet(Vec<u8>),
    /// A complete packet whose checksum did not match.
    BadChecksum,
}

/// Incremental framer: feed it bytes as they arrive off the socket, get
/// back every complete event the new bytes completed.
#[derive(Default)]
pub struct Framer {
    buf: Vec<u8>,
}

impl Framer {
    pub fn new() -> Self {
        Framer::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Event> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        loop {
            match self.take_one() {
                Some(event) => events.push(event),
                None => break,
            }
        }
        events
    }

    fn take_one(&mut self) -> Option<Event> {
        while let Some(&b) = self.buf.first() {
            match b {
                b'+' => {
                    self.buf.remove(0);
                    return Some(Event::Ack);
                }
                b'-' => {
                    self.buf.remove(0);
                    return Some(Event::Nack);
                }
                INTERRUPT => {
                    self.buf.remove(0);
                    return Some(Event::Interrupt);
                }
                b'$' => break,
                _ => {
                    // Garbage before a packet start; drop it.
                    self.buf.remove(0);
                }
            }
        }
        if self.buf.first() != Some(&b'$') {
            return None;
        }
        let hash = self.buf.iter().position(|&b| b == b'#')?;
        if self.buf.len() < hash + 3 {
            return None;
        }
        let payload = self.buf[1..hash].to_vec();
        let checksum_hex = std::str::from_utf8(&self.buf[hash + 1..hash + 3]).ok()?;
        let want = u8::from_str_radix(checksum_hex, 16).ok()?;
        self.buf.drain(0..hash + 3);
        let got = checksum(&payload);
        if got == want {
            Some(Event::Packet(payload))
        } else {
            Some(Event::BadChecksum)
        }
    }
}

pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Frames a reply payload as `$<payload>#<checksum>`.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(b'$');
    out.extend_from_slice(payload);
    out.push(b'#');
    out.extend(format!("{:02x}", checksum(payload)).into_bytes());
    out
}

/// Reverses RSP binary escaping: `0x7D` followed by `b` decodes to
/// `b ^ 0x20`. Used for `vFlashWrite`'s binary data segment.
pub fn unescape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter().copied();
    while let Some(b) = iter.next() {
        if b == ESCAPE {
            if let Some(next) = iter.next() {
                out.push(next ^ ESCAPE_XOR);
            }
        } else {
            out.push(b);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_and_reparses_a_simple_packet() {
        let framed = frame(b"OK");
        let mut framer = Framer::new();
        let events = framer.feed(&framed);
        assert_eq!(events, vec![Event::Packet(b"OK".to_vec())]);
    }

    #[test]
    fn detects_bad_checksum() {
        let mut framer = Framer::new();
        let events = framer.feed(b"$OK#00");
        assert_eq!(events, vec![Event::BadChecksum]);
    }

    #[test]
    fn splits_ack_nack_and_interrupt_from_packet_bytes() {
        let mut framer = Framer::new();
        let mut bytes = vec![b'+', b'-', INTERRUPT];
        bytes.extend(frame(b"g"));
        let events = framer.feed(&bytes);
        assert_eq!(events, vec![Event::Ack, Event::Nack, Event::Interrupt, Event::Packet(b"g".to_vec())]);
    }

    #[test]
    fn handles_packet_split_across_two_feeds() {
        let framed = frame(b"m0,4");
        let mut framer = Framer::new();
        let (first, second) = framed.split_at(3);
        assert!(framer.feed(first).is_empty());
        let events = framer.feed(second);
        assert_eq!(events, vec![Event::Packet(b"m0,4".to_vec())]);
    }

    #[test]
    fn unescape_reverses_escaped_bytes() {
        let escaped = [0x01, ESCAPE, 0x03 ^ ESCAPE_XOR, 0x7E];
        assert_eq!(unescape(&escaped), vec![0x01, 0x03, 0x7E]);
    }
}
