//! Client side of the query protocol.
//!
//! This module turns encoded [`Term`](crate::Term)s into query frames, reads
//! response frames back, and exposes the results of one query as a
//! [`ResultStream`].
//!
//! # Overview
//!
//! Every query sent over a [`Connection`] carries a token drawn from the
//! connection's [`TokenAllocator`]. Responses carry the same token, so many
//! queries can be in flight at once over a single transport. A query whose
//! results do not fit in one response is continued batch by batch until the
//! server reports the sequence complete or the caller stops it.
//!
//! # Key Components
//!
//! - [`Query`]: one request frame, built from a term and validated [`QueryOptions`].
//! - [`Response`]: one decoded response frame, with payloads kept as [`RawPayload`]s.
//! - [`Connection`]: token allocation plus routing of responses to their query.
//! - [`ResultStream`]: lazy, ordered iteration over one query's results.
//! - [`ProtocolTransport`]: framing over any `Read`/`Write` byte stream.
//!
//! # Binary Format
//!
//! - An 8 byte big-endian token.
//! - A 4 byte big-endian body length.
//! - The body, encoded with `bincode` using big-endian fixed-width integers.
//!
//! Unknown response kinds are rejected. Unknown notes and error types are
//! logged and skipped so newer servers can add them.
use std::sync::{Mutex, MutexGuard, PoisonError};

use bincode::config::{BigEndian, Configuration, Fixint};

pub mod connection;
pub mod options;
pub mod query;
pub mod response;
pub mod stream;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use connection::Connection;
pub use options::{Durability, OptionsError, QueryOptions};
pub use query::{Query, QueryKind, TokenAllocator};
pub use response::{
    DecodeError, ErrorType, Frame, Note, RawPayload, Response, ResponseKind, ServerError,
    ServerErrorKind,
};
pub use stream::{ResultStream, StreamState};
pub use transport::{FrameRead, FrameWrite, ProtocolTransport, TransportError};

/// Correlates a query with its responses.
pub type Token = u64;

pub(crate) const HEADER_LEN: usize = 12;
pub(crate) const MAX_BODY_LEN: usize = 64 * 1024 * 1024;

pub(crate) fn wire_config() -> Configuration<BigEndian, Fixint> {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
}

/// A panicking holder leaves the guarded state consistent for our uses.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Split a complete frame into its token and body.
pub(crate) fn split_frame(bytes: &[u8]) -> Result<(Token, &[u8]), DecodeError> {
    let header: &[u8; HEADER_LEN] = bytes
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or(DecodeError::Truncated {
            expected: HEADER_LEN,
            actual: bytes.len(),
        })?;

    let token = Token::from_be_bytes([
        header[0], header[1], header[2], header[3], header[4], header[5], header[6], header[7],
    ]);
    let len = transport::body_len(header);
    if len > MAX_BODY_LEN {
        return Err(DecodeError::FrameTooLarge(len));
    }

    let expected = HEADER_LEN + len;
    if bytes.len() < expected {
        return Err(DecodeError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }
    if bytes.len() > expected {
        return Err(DecodeError::TrailingBytes(bytes.len() - expected));
    }

    Ok((token, &bytes[HEADER_LEN..]))
}
