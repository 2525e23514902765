//! Length-prefixed framing for the TCP channel.
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! sealed payload (see `security`). A clean EOF at a frame boundary ends the
//! peer session; anything else that goes wrong leaves the stream
//! unsynchronised and the connection must be dropped.
//!
//! CHANGELOG:
//! - 10/19/2026 - Body buffer grows with received bytes
//! - 10/19/2026 - Initial implementation

use std::io::{Read, Write};

use crate::error::FrameError;

pub const FRAME_HEADER_LEN: usize = 4;

/// Upper bound on a single frame (fetch/put payloads travel in one frame).
pub const MAX_FRAME_BYTES: usize = 256 * 1024 * 1024;

const INITIAL_BODY_CAPACITY: usize = 64 * 1024;

pub struct FrameReader<R> {
    reader: R,
    max_frame_bytes: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            max_frame_bytes,
        }
    }

    /// Read the next frame. `Ok(None)` means the peer closed cleanly.
    pub fn read_next(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        let mut read = 0usize;
        while read < header.len() {
            let n = match self.reader.read(&mut header[read..]) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                if read == 0 {
                    return Ok(None);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "frame header truncated",
                )
                .into());
            }
            read += n;
        }

        let len = u32::from_be_bytes(header) as usize;
        if len > self.max_frame_bytes {
            return Err(FrameError::TooLarge {
                max_frame_bytes: self.max_frame_bytes,
                got_bytes: len,
            });
        }

        // The header is unauthenticated; grow with the bytes that arrive
        let mut body = Vec::with_capacity(len.min(INITIAL_BODY_CAPACITY));
        (&mut self.reader).take(len as u64).read_to_end(&mut body)?;
        if body.len() < len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "frame body truncated",
            )
            .into());
        }
        Ok(Some(body))
    }
}

pub struct FrameWriter<W> {
    writer: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_frame(&mut self, body: &[u8]) -> Result<(), FrameError> {
        if body.len() > MAX_FRAME_BYTES {
            return Err(FrameError::TooLarge {
                max_frame_bytes: MAX_FRAME_BYTES,
                got_bytes: body.len(),
            });
        }
        let header = (body.len() as u32).to_be_bytes();
        self.writer.write_all(&header)?;
        self.writer.write_all(body)?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_two_frames_then_eof() {
        let mut buf = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buf);
            writer.write_frame(b"first").unwrap();
            writer.write_frame(b"").unwrap();
        }

        let mut reader = FrameReader::new(Cursor::new(buf), MAX_FRAME_BYTES);
        assert_eq!(reader.read_next().unwrap().unwrap(), b"first");
        assert_eq!(reader.read_next().unwrap().unwrap(), b"");
        assert!(reader.read_next().unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut buf = 1024u32.to_be_bytes().to_vec();
        buf.extend_from_slice(&[0u8; 16]);
        let mut reader = FrameReader::new(Cursor::new(buf), 64);
        match reader.read_next() {
            Err(FrameError::TooLarge {
                max_frame_bytes,
                got_bytes,
            }) => {
                assert_eq!(max_frame_bytes, 64);
                assert_eq!(got_bytes, 1024);
            }
            other => panic!("expected TooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_large_header_without_body_is_truncated() {
        let mut buf = (200u32 * 1024 * 1024).to_be_bytes().to_vec();
        buf.extend_from_slice(b"short");
        let mut reader = FrameReader::new(Cursor::new(buf), MAX_FRAME_BYTES);
        match reader.read_next() {
            Err(FrameError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("expected truncated body, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_header() {
        let mut reader = FrameReader::new(Cursor::new(vec![0u8, 0]), MAX_FRAME_BYTES);
        assert!(matches!(reader.read_next(), Err(FrameError::Io(_))));
    }

    #[test]
    fn test_truncated_body() {
        let mut buf = 10u32.to_be_bytes().to_vec();
        buf.extend_from_slice(b"abc");
        let mut reader = FrameReader::new(Cursor::new(buf), MAX_FRAME_BYTES);
        assert!(matches!(reader.read_next(), Err(FrameError::Io(_))));
    }
}
