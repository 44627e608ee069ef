use std::time::Duration;

use log::trace;
use rusb::{DeviceHandle, GlobalContext};

use crate::{Error, Result, Transport, FRAME_LEN};

/// openlink-coldfire probe identifiers (spec.md §6).
const VENDOR_ID: u16 = 0x1357;
const PRODUCT_ID: u16 = 0x0503;

const ENDPOINT_OUT: u8 = 0x02;
const ENDPOINT_IN: u8 = 0x81;

/// Live USB transport, built on `rusb` (grounded on the pack's
/// `punt-rs` bootloader client, which drives an identical fixed
/// endpoint/bulk-transfer shape).
pub struct RusbTransport {
    handle: DeviceHandle<GlobalContext>,
    buffer: [u8; FRAME_LEN],
}

impl RusbTransport {
    /// Opens the first device matching the probe's VID/PID and claims
    /// interface 0. The persistent buffer is zeroed here, and only
    /// here -- never again for the lifetime of the transport.
    pub fn open() -> Result<Self> {
        let device = rusb::devices()?
            .iter()
            .find(|dev| {
                dev.device_descriptor()
                    .map(|d| {
                        d.vendor_id() == VENDOR_ID && d.product_id() == PRODUCT_ID
                    })
                    .unwrap_or(false)
            })
            .ok_or(Error::DeviceNotFound {
                vid: VENDOR_ID,
                pid: PRODUCT_ID,
            })?;

        let mut handle = device.open()?;
        handle.claim_interface(0)?;

        Ok(RusbTransport {
            handle,
            buffer: [0u8; FRAME_LEN],
        })
    }
}

impl Transport for RusbTransport {
    fn send(&mut self, frame: &[u8; FRAME_LEN]) -> Result<()> {
        trace!("usb OUT {} bytes", frame.len());
        let written = self.handle.write_bulk(
            ENDPOINT_OUT,
            frame,
            crate::DEFAULT_TIMEOUT,
        )?;
        if written != frame.len() {
            return Err(Error::ShortWrite {
                expected: frame.len(),
                actual: written,
            });
        }
        Ok(())
    }

    fn send_bulk(&mut self, data: &[u8]) -> Result<()> {
        trace!("usb bulk OUT {} bytes", data.len());
        let written =
            self.handle
                .write_bulk(ENDPOINT_OUT, data, crate::BULK_TIMEOUT)?;
        if written != data.len() {
            return Err(Error::ShortWrite {
                expected: data.len(),
                actual: written,
            });
        }
        Ok(())
    }

    fn recv(&mut self, timeout: Duration) -> Result<&[u8]> {
        let n = self
            .handle
            .read_bulk(ENDPOINT_IN, &mut self.buffer, timeout)?;
        trace!("usb IN {} bytes", n);
        Ok(&self.buffer[..n])
    }

    fn buffer_mut(&mut self) -> &mut [u8; FRAME_LEN] {
        &mut self.buffer
    }

    fn buffer(&self) -> &[u8; FRAME_LEN] {
        &self.buffer
    }
}
