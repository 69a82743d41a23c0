// storage/io.rs
// Length-prefixed, checksummed frame IO shared by segments

use std::io::Write;

use crate::error::{FerricError, Result};

/// Frame layout: [len: u32 LE][payload][crc32(payload): u32 LE].
pub(super) fn write_frame(writer: &mut impl Write, payload: &[u8]) -> Result<()> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    let crc = hasher.finalize();

    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Parse every frame in a buffer. Unlike the WAL, segment files are
/// written whole at checkpoint time, so any framing or checksum error is
/// corruption rather than a torn tail.
pub(super) fn parse_frames<'a>(data: &'a [u8], source: &str) -> Result<Vec<&'a [u8]>> {
    let mut frames = Vec::new();
    let mut offset = 0usize;

    while offset < data.len() {
        if offset + 4 > data.len() {
            return Err(FerricError::StorageCorruption(format!(
                "{}: truncated frame header at {}",
                source, offset
            )));
        }
        let len = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap()) as usize;
        let payload_start = offset + 4;
        let crc_start = payload_start + len;
        if crc_start + 4 > data.len() {
            return Err(FerricError::StorageCorruption(format!(
                "{}: truncated frame body at {}",
                source, offset
            )));
        }

        let payload = &data[payload_start..crc_start];
        let stored_crc = u32::from_le_bytes(data[crc_start..crc_start + 4].try_into().unwrap());
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(payload);
        if hasher.finalize() != stored_crc {
            return Err(FerricError::StorageCorruption(format!(
                "{}: checksum mismatch at {}",
                source, offset
            )));
        }

        frames.push(payload);
        offset = crc_start + 4;
    }
    Ok(frames)
}
