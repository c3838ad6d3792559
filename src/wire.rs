//! TCP wire framing for the migration channel.
//!
//! A single frame is a 4-byte big-endian length prefix followed by exactly
//! that many bytes of codec text. No trailer, no heartbeat, no checksum —
//! per the Non-goals, this channel has no authentication or integrity
//! protection either; any peer that can reach the port can inject a VM
//! ( open question, left as-is).

use std::io::{Read, Write};
use std::net::TcpStream;

use crate::error::WireError;

/// Write one length-prefixed frame and flush it. The sender only
/// considers the VM migrated once this returns `Ok`.
pub fn send_frame(stream: &mut TcpStream, payload: &str) -> Result<(), WireError> {
    let bytes = payload.as_bytes();
    let len = u32::try_from(bytes.len()).expect("migration frame exceeds u32::MAX bytes");
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(bytes)?;
    stream.flush()?;
    Ok(())
}

/// Read one length-prefixed frame. A connection that closes before the
/// declared length is fully buffered is a `ShortFrame` error — the
/// receiver must discard the partially-received VM.
pub fn recv_frame(stream: &mut TcpStream) -> Result<Vec<u8>, WireError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);

    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).map_err(|source| {
        if source.kind() == std::io::ErrorKind::UnexpectedEof {
            WireError::ShortFrame { expected: len, got: 0 }
        } else {
            WireError::Io(source)
        }
    })?;

    Ok(body)
}
