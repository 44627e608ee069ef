use std::collections::VecDeque;
use std::time::Duration;

use crate::{Error, Result, Transport, FRAME_LEN};

/// Test double for [`Transport`]. Records every frame sent and replays a
/// queue of canned responses, so `bdm-proto` and above can be exercised
/// without a physical probe.
#[derive(Default)]
pub struct FakeTransport {
    buffer: [u8; FRAME_LEN],
    pub sent: Vec<Vec<u8>>,
    responses: VecDeque<Vec<u8>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        FakeTransport {
            buffer: [0u8; FRAME_LEN],
            sent: Vec::new(),
            responses: VecDeque::new(),
        }
    }

    /// Queue a response to be handed back by the next `recv`.
    pub fn push_response(&mut self, bytes: Vec<u8>) {
        self.responses.push_back(bytes);
    }
}

impl Transport for FakeTransport {
    fn send(&mut self, frame: &[u8; FRAME_LEN]) -> Result<()> {
        self.sent.push(frame.to_vec());
        Ok(())
    }

    fn send_bulk(&mut self, data: &[u8]) -> Result<()> {
        self.sent.push(data.to_vec());
        Ok(())
    }

    fn recv(&mut self, _timeout: Duration) -> Result<&[u8]> {
        let resp = self.responses.pop_front().ok_or(Error::ShortRead {
            expected: FRAME_LEN,
            actual: 0,
        })?;
        let n = resp.len().min(FRAME_LEN);
        self.buffer[..n].copy_from_slice(&resp[..n]);
        Ok(&self.buffer[..n])
    }

    fn buffer_mut(&mut self) -> &mut [u8; FRAME_LEN] {
        &mut self.buffer
    }

    fn buffer(&self) -> &[u8; FRAME_LEN] {
        &self.buffer
    }
}
