//! JSON-RPC framing for the language-server socket.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing. [`FrameReader`] and
//! [`FrameWriter`] wrap blocking readers and writers; socket deadlines are
//! the caller's concern.

use std::io::{BufRead, BufReader, Read, Write};

use serde_json::Value;

use crate::error::SourceError;

/// Maximum frame size (4 MiB) to prevent unbounded memory allocation.
const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame. `Ok(None)` on clean EOF between frames.
    pub fn read_frame(&mut self) -> Result<Option<Value>, SourceError> {
        let content_length = match self.read_headers()? {
            Some(len) => len,
            None => return Ok(None),
        };

        if content_length > MAX_FRAME_BYTES {
            return Err(SourceError::Frame(format!(
                "Content-Length {content_length} exceeds maximum {MAX_FRAME_BYTES}"
            )));
        }

        let mut body = vec![0u8; content_length];
        self.reader
            .read_exact(&mut body)
            .map_err(|e| SourceError::Frame(format!("reading frame body: {e}")))?;

        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| SourceError::Frame(format!("parsing JSON-RPC frame: {e}")))
    }

    fn read_headers(&mut self) -> Result<Option<usize>, SourceError> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut saw_any_header_bytes = false;

        loop {
            line.clear();
            let bytes_read = self
                .reader
                .read_line(&mut line)
                .map_err(|e| SourceError::Frame(format!("reading header line: {e}")))?;

            if bytes_read == 0 {
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                return Err(SourceError::Frame(
                    "unexpected EOF while reading headers".to_string(),
                ));
            }
            saw_any_header_bytes = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some((key, value)) = trimmed.split_once(':') {
                if key.eq_ignore_ascii_case("Content-Length") {
                    let len = value.trim().parse::<usize>().map_err(|_| {
                        SourceError::Frame(format!("invalid Content-Length value {value:?}"))
                    })?;
                    content_length = Some(len);
                }
            }
        }

        content_length
            .map(Some)
            .ok_or_else(|| SourceError::Frame("missing Content-Length header".to_string()))
    }
}

pub struct FrameWriter<W> {
    writer: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_frame(&mut self, msg: &Value) -> Result<(), SourceError> {
        let body = serde_json::to_string(msg)
            .map_err(|e| SourceError::Frame(format!("serializing JSON-RPC frame: {e}")))?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer
            .write_all(header.as_bytes())
            .and_then(|()| self.writer.write_all(body.as_bytes()))
            .and_then(|()| self.writer.flush())
            .map_err(|e| SourceError::Frame(format!("writing frame: {e}")))
    }
}
