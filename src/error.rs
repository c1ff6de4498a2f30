use thiserror::Error;

use crate::{
    encoding::{AnnotationError, EncodingError},
    protocol::{DecodeError, OptionsError, ResponseKind, ServerError, Token, TransportError},
};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    #[error(transparent)]
    Options(#[from] OptionsError),

    #[error("failed to serialize query: {0}")]
    Serialize(#[from] bincode::error::EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("unexpected {kind:?} response for token {token}")]
    UnexpectedResponse { token: Token, kind: ResponseKind },
}
