//! The `vFlashErase`/`vFlashWrite`/`vFlashDone` accumulation state
//! machine (spec.md §4.7): Idle -> Erasing -> Buffering -> Committing
//! -> Idle. The buffer is anchored at the first write's address and
//! grown as later writes extend past its current length; overflowing
//! the flash's total size is fatal to the session.

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    Erasing,
    Buffering,
    Committing,
}

pub struct FlashWriteState {
    state: State,
    base_addr: Option<u32>,
    data: Vec<u8>,
    capacity: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("flash write of {len} bytes at {addr:#x} overflows the {capacity:#x}-byte flash")]
    Overflow { addr: u32, len: usize, capacity: u32 },
}

impl FlashWriteState {
    pub fn new(capacity: u32) -> Self {
        FlashWriteState {
            state: State::Idle,
            base_addr: None,
            data: Vec::new(),
            capacity,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn on_erase(&mut self) {
        self.state = State::Erasing;
    }

    /// Merges a write into the accumulation buffer, growing it (and
    /// relocating existing data if this write starts earlier than the
    /// current anchor) as needed.
    pub fn on_write(&mut self, addr: u32, data: &[u8]) -> Result<(), Error> {
        let base = *self.base_addr.get_or_insert(addr);
        if addr < base {
            let shift = (base - addr) as usize;
            let mut grown = vec![0xFFu8; shift + self.data.len()];
            grown[shift..].copy_from_slice(&self.data);
            self.data = grown;
            self.base_addr = Some(addr);
        }
        let base = self.base_addr.expect("just set above");
        let offset = (addr - base) as usize;
        let end = offset + data.len();
        if end as u32 > self.capacity {
            return Err(Error::Overflow {
                addr,
                len: data.len(),
                capacity: self.capacity,
            });
        }
        if end > self.data.len() {
            self.data.resize(end, 0xFF);
        }
        self.data[offset..end].copy_from_slice(data);
        self.state = State::Buffering;
        Ok(())
    }

    /// Takes the accumulated buffer and its base address for programming,
    /// resetting back to `Idle`.
    pub fn take_for_commit(&mut self) -> Option<(u32, Vec<u8>)> {
        self.state = State::Committing;
        let base = self.base_addr.take()?;
        let data = std::mem::take(&mut self.data);
        self.state = State::Idle;
        Some((base, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_accumulate_in_order() {
        let mut fw = FlashWriteState::new(0x1000);
        fw.on_erase();
        fw.on_write(0x100, &[1, 2, 3, 4]).unwrap();
        fw.on_write(0x104, &[5, 6]).unwrap();
        let (base, data) = fw.take_for_commit().unwrap();
        assert_eq!(base, 0x100);
        assert_eq!(data, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn write_before_anchor_shifts_buffer() {
        let mut fw = FlashWriteState::new(0x1000);
        fw.on_write(0x104, &[5, 6]).unwrap();
        fw.on_write(0x100, &[1, 2, 3, 4]).unwrap();
        let (base, data) = fw.take_for_commit().unwrap();
        assert_eq!(base, 0x100);
        assert_eq!(data, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn overflow_past_capacity_is_an_error() {
        let mut fw = FlashWriteState::new(4);
        let err = fw.on_write(0, &[0, 1, 2, 3, 4]).unwrap_err();
        assert!(matches!(err, Error::Overflow { .. }));
    }

    #[test]
    fn zero_length_write_is_a_no_op_success() {
        let mut fw = FlashWriteState::new(0x1000);
        fw.on_write(0x100, &[]).unwrap();
        assert_eq!(fw.state(), State::Buffering);
    }
}
