use std::io::{self, Read, Write};

use thiserror::Error;

use super::{Token, HEADER_LEN, MAX_BODY_LEN};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("frame body of {0} bytes exceeds limit")]
    FrameTooLarge(usize),
    #[error("connection closed")]
    Closed,
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
}

/// Source of complete inbound frames, in arrival order.
pub trait FrameRead: Send {
    fn read_frame(&mut self) -> Result<Vec<u8>, TransportError>;
}

/// Sink for complete outbound frames.
pub trait FrameWrite: Send {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError>;
}

/// Frames over any byte stream: `token (u64 BE) | body length (u32 BE) | body`.
pub struct ProtocolTransport<T> {
    stream: T,
}

impl<T> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> T {
        self.stream
    }
}

impl<T: Read + Send> FrameRead for ProtocolTransport<T> {
    fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut header = [0_u8; HEADER_LEN];
        if let Err(e) = self.stream.read_exact(&mut header) {
            return Err(match e.kind() {
                io::ErrorKind::UnexpectedEof => TransportError::Closed,
                _ => TransportError::Io(e),
            });
        }

        let len = body_len(&header);
        if len > MAX_BODY_LEN {
            return Err(TransportError::FrameTooLarge(len));
        }

        let mut frame = Vec::with_capacity(HEADER_LEN + len);
        frame.extend_from_slice(&header);
        frame.resize(HEADER_LEN + len, 0);
        self.stream.read_exact(&mut frame[HEADER_LEN..])?;
        Ok(frame)
    }
}

impl<T: Write + Send> FrameWrite for ProtocolTransport<T> {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(frame)?;
        self.stream.flush()?;
        Ok(())
    }
}

/// Prefix `body` with the frame header. Bodies the reading side would
/// reject are refused here too.
pub(crate) fn frame(token: Token, body: &[u8]) -> Result<Vec<u8>, TransportError> {
    if body.len() > MAX_BODY_LEN {
        return Err(TransportError::FrameTooLarge(body.len()));
    }

    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(&token.to_be_bytes());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    Ok(out)
}

/// Token of a frame whose header is at least present.
pub fn peek_token(frame: &[u8]) -> Option<Token> {
    let bytes: [u8; 8] = frame.get(..8)?.try_into().ok()?;
    Some(Token::from_be_bytes(bytes))
}

pub(crate) fn body_len(header: &[u8; HEADER_LEN]) -> usize {
    u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize
}
