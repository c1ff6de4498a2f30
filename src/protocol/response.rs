use std::fmt;

use bincode::{Decode, Encode};
use log::warn;
use thiserror::Error;

use crate::term::Datum;

use super::{Token, split_frame, transport::frame, wire_config};

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("frame truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("{0} trailing bytes after frame")]
    TrailingBytes(usize),

    #[error("frame body of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    #[error("malformed frame body: {0}")]
    Malformed(#[from] bincode::error::DecodeError),

    #[error("unknown response kind {0}")]
    UnknownResponseKind(u32),

    #[error("unknown query kind {0}")]
    UnknownQueryKind(u32),

    #[error("no outstanding query for token {0}")]
    UnknownToken(Token),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    SuccessAtom,
    SuccessSequence,
    SuccessPartial,
    WaitComplete,
    ServerInfo,
    ClientError,
    CompileError,
    RuntimeError,
}

impl ResponseKind {
    pub fn code(self) -> u32 {
        match self {
            ResponseKind::SuccessAtom => 1,
            ResponseKind::SuccessSequence => 2,
            ResponseKind::SuccessPartial => 3,
            ResponseKind::WaitComplete => 4,
            ResponseKind::ServerInfo => 5,
            ResponseKind::ClientError => 16,
            ResponseKind::CompileError => 17,
            ResponseKind::RuntimeError => 18,
        }
    }

    pub fn is_error(self) -> bool {
        matches!(
            self,
            ResponseKind::ClientError | ResponseKind::CompileError | ResponseKind::RuntimeError
        )
    }

    pub fn is_partial(self) -> bool {
        self == ResponseKind::SuccessPartial
    }
}

impl TryFrom<u32> for ResponseKind {
    type Error = DecodeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => ResponseKind::SuccessAtom,
            2 => ResponseKind::SuccessSequence,
            3 => ResponseKind::SuccessPartial,
            4 => ResponseKind::WaitComplete,
            5 => ResponseKind::ServerInfo,
            16 => ResponseKind::ClientError,
            17 => ResponseKind::CompileError,
            18 => ResponseKind::RuntimeError,
            other => return Err(DecodeError::UnknownResponseKind(other)),
        })
    }
}

/// Finer classification of runtime errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Internal,
    ResourceLimit,
    QueryLogic,
    NonExistence,
    OpFailed,
    OpIndeterminate,
    User,
    PermissionError,
}

impl ErrorType {
    pub fn code(self) -> u32 {
        match self {
            ErrorType::Internal => 1_000_000,
            ErrorType::ResourceLimit => 2_000_000,
            ErrorType::QueryLogic => 3_000_000,
            ErrorType::NonExistence => 3_100_000,
            ErrorType::OpFailed => 4_100_000,
            ErrorType::OpIndeterminate => 4_200_000,
            ErrorType::User => 5_000_000,
            ErrorType::PermissionError => 6_000_000,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1_000_000 => ErrorType::Internal,
            2_000_000 => ErrorType::ResourceLimit,
            3_000_000 => ErrorType::QueryLogic,
            3_100_000 => ErrorType::NonExistence,
            4_100_000 => ErrorType::OpFailed,
            4_200_000 => ErrorType::OpIndeterminate,
            5_000_000 => ErrorType::User,
            6_000_000 => ErrorType::PermissionError,
            _ => return None,
        })
    }
}

/// Behavioral flags describing the result sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Note {
    SequenceFeed,
    AtomFeed,
    OrderByLimitFeed,
    UnionedFeed,
    IncludesStates,
}

impl Note {
    pub fn code(self) -> u32 {
        match self {
            Note::SequenceFeed => 1,
            Note::AtomFeed => 2,
            Note::OrderByLimitFeed => 3,
            Note::UnionedFeed => 4,
            Note::IncludesStates => 5,
        }
    }

    fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => Note::SequenceFeed,
            2 => Note::AtomFeed,
            3 => Note::OrderByLimitFeed,
            4 => Note::UnionedFeed,
            5 => Note::IncludesStates,
            _ => return None,
        })
    }

    pub fn is_feed(self) -> bool {
        self != Note::IncludesStates
    }
}

/// Step on the path from the query's root term to where an error arose.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub enum Frame {
    /// Positional argument index.
    Pos(u32),
    /// Named argument.
    Opt(String),
}

/// Serialized value kept as-is until the caller asks for a shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPayload(Vec<u8>);

impl RawPayload {
    pub fn encode<T: Encode>(value: T) -> Result<Self, bincode::error::EncodeError> {
        Ok(Self(bincode::encode_to_vec(value, wire_config())?))
    }

    pub fn decode<T: Decode<()>>(&self) -> Result<T, DecodeError> {
        let (value, used) = bincode::decode_from_slice(&self.0, wire_config())?;
        if used != self.0.len() {
            return Err(DecodeError::TrailingBytes(self.0.len() - used));
        }
        Ok(value)
    }

    pub fn datum(&self) -> Result<Datum, DecodeError> {
        self.decode()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for RawPayload {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    Client,
    Compile,
    Runtime,
}

impl fmt::Display for ServerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerErrorKind::Client => write!(f, "client"),
            ServerErrorKind::Compile => write!(f, "compile"),
            ServerErrorKind::Runtime => write!(f, "runtime"),
        }
    }
}

/// Failure reported by the server for one query.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct ServerError {
    pub kind: ServerErrorKind,
    pub error_type: Option<ErrorType>,
    pub message: String,
    pub backtrace: Vec<Frame>,
}

#[derive(Debug, Encode, Decode)]
struct ResponseBody {
    kind: u32,
    error_type: Option<u32>,
    notes: Vec<u32>,
    results: Vec<Vec<u8>>,
    backtrace: Option<Vec<Frame>>,
    profile: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub token: Token,
    pub kind: ResponseKind,
    pub error_type: Option<ErrorType>,
    pub notes: Vec<Note>,
    pub results: Vec<RawPayload>,
    pub backtrace: Option<Vec<Frame>>,
    pub profile: Option<RawPayload>,
}

impl Response {
    pub fn new(token: Token, kind: ResponseKind) -> Self {
        Self {
            token,
            kind,
            error_type: None,
            notes: Vec::new(),
            results: Vec::new(),
            backtrace: None,
            profile: None,
        }
    }

    /// Response carrying `items` as its result payloads.
    pub fn with_datums<I>(
        token: Token,
        kind: ResponseKind,
        items: I,
    ) -> Result<Self, bincode::error::EncodeError>
    where
        I: IntoIterator<Item = Datum>,
    {
        let mut response = Self::new(token, kind);
        for item in items {
            response.results.push(RawPayload::encode(item)?);
        }
        Ok(response)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (token, body) = split_frame(bytes)?;
        let (decoded, used): (ResponseBody, usize) =
            bincode::decode_from_slice(body, wire_config())?;
        if used != body.len() {
            return Err(DecodeError::TrailingBytes(body.len() - used));
        }

        let kind = ResponseKind::try_from(decoded.kind)?;
        let error_type = decoded.error_type.and_then(|code| {
            let error_type = ErrorType::from_code(code);
            if error_type.is_none() {
                warn!("token {token}: ignoring unknown error type {code}");
            }
            error_type
        });
        let notes = decoded
            .notes
            .into_iter()
            .filter_map(|code| {
                let note = Note::from_code(code);
                if note.is_none() {
                    warn!("token {token}: ignoring unknown response note {code}");
                }
                note
            })
            .collect();

        Ok(Self {
            token,
            kind,
            error_type,
            notes,
            results: decoded.results.into_iter().map(RawPayload).collect(),
            backtrace: decoded.backtrace,
            profile: decoded.profile.map(RawPayload),
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, crate::Error> {
        let body = ResponseBody {
            kind: self.kind.code(),
            error_type: self.error_type.map(ErrorType::code),
            notes: self.notes.iter().map(|n| n.code()).collect(),
            results: self.results.iter().map(|r| r.0.clone()).collect(),
            backtrace: self.backtrace.clone(),
            profile: self.profile.as_ref().map(|p| p.0.clone()),
        };
        let body = bincode::encode_to_vec(body, wire_config())?;
        Ok(frame(self.token, &body)?)
    }

    pub fn is_feed(&self) -> bool {
        self.notes.iter().any(|n| n.is_feed())
    }

    /// Error carried by an error-kind response. The message is the first
    /// result payload.
    pub fn server_error(&self) -> Option<ServerError> {
        let kind = match self.kind {
            ResponseKind::ClientError => ServerErrorKind::Client,
            ResponseKind::CompileError => ServerErrorKind::Compile,
            ResponseKind::RuntimeError => ServerErrorKind::Runtime,
            _ => return None,
        };

        let message = match self.results.first().map(RawPayload::datum) {
            Some(Ok(Datum::Text(message))) => message,
            Some(Ok(other)) => format!("{other:?}"),
            Some(Err(e)) => format!("undecodable error message: {e}"),
            None => "no error message".to_string(),
        };

        Some(ServerError {
            kind,
            error_type: self.error_type,
            message,
            backtrace: self.backtrace.clone().unwrap_or_default(),
        })
    }
}
