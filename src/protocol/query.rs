use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use bincode::{Decode, Encode};

use crate::{
    Error,
    term::{Datum, Term},
};

use super::{
    DecodeError, OptionsError, QueryOptions, Token, lock, options::NOREPLY, split_frame,
    transport::frame, wire_config,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Start,
    Continue,
    Stop,
    NoreplyWait,
    ServerInfo,
}

impl QueryKind {
    pub fn code(self) -> u32 {
        match self {
            QueryKind::Start => 1,
            QueryKind::Continue => 2,
            QueryKind::Stop => 3,
            QueryKind::NoreplyWait => 4,
            QueryKind::ServerInfo => 5,
        }
    }
}

impl TryFrom<u32> for QueryKind {
    type Error = DecodeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => QueryKind::Start,
            2 => QueryKind::Continue,
            3 => QueryKind::Stop,
            4 => QueryKind::NoreplyWait,
            5 => QueryKind::ServerInfo,
            other => return Err(DecodeError::UnknownQueryKind(other)),
        })
    }
}

/// Hands out correlation tokens for one connection.
///
/// Tokens come from a wrapping counter; a value still held by an in-flight
/// query is skipped rather than reused.
#[derive(Debug)]
pub struct TokenAllocator {
    next: AtomicU64,
    outstanding: Mutex<HashSet<Token>>,
}

impl TokenAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: Token) -> Self {
        Self {
            next: AtomicU64::new(first),
            outstanding: Mutex::new(HashSet::new()),
        }
    }

    pub fn acquire(&self) -> Token {
        let mut outstanding = lock(&self.outstanding);
        loop {
            let token = self.next.fetch_add(1, Ordering::Relaxed);
            if outstanding.insert(token) {
                return token;
            }
        }
    }

    /// Returns whether the token was outstanding.
    pub fn release(&self, token: Token) -> bool {
        lock(&self.outstanding).remove(&token)
    }

    pub fn is_outstanding(&self, token: Token) -> bool {
        lock(&self.outstanding).contains(&token)
    }

    pub fn outstanding(&self) -> usize {
        lock(&self.outstanding).len()
    }
}

impl Default for TokenAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Encode, Decode)]
struct QueryBody {
    kind: u32,
    term: Option<Term>,
    options: BTreeMap<String, Term>,
}

/// One request frame, ready for serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub token: Token,
    pub kind: QueryKind,
    pub term: Option<Term>,
    /// Validated options in wire form.
    pub options: BTreeMap<String, Term>,
}

impl Query {
    /// Build a query carrying `term`, drawing a fresh token from `tokens`.
    /// The token is only taken once the options have been validated.
    pub fn build(
        tokens: &TokenAllocator,
        term: Term,
        options: &QueryOptions,
        kind: QueryKind,
    ) -> Result<Self, OptionsError> {
        let options = options.validate()?;
        Ok(Self {
            token: tokens.acquire(),
            kind,
            term: Some(term),
            options,
        })
    }

    /// Term-less query of `kind` for an existing token.
    pub fn control(token: Token, kind: QueryKind) -> Self {
        Self {
            token,
            kind,
            term: None,
            options: BTreeMap::new(),
        }
    }

    pub fn continuation(token: Token) -> Self {
        Self::control(token, QueryKind::Continue)
    }

    pub fn stop(token: Token) -> Self {
        Self::control(token, QueryKind::Stop)
    }

    /// Server will not answer this query.
    pub fn is_noreply(&self) -> bool {
        matches!(
            self.options.get(NOREPLY),
            Some(Term::Datum(Datum::Bool(true)))
        )
    }

    /// Serialize into a single self-contained frame.
    pub fn serialize(&self) -> Result<Vec<u8>, Error> {
        let body = QueryBody {
            kind: self.kind.code(),
            term: self.term.clone(),
            options: self.options.clone(),
        };
        let body = bincode::encode_to_vec(body, wire_config())?;
        Ok(frame(self.token, &body)?)
    }

    /// Parse a query frame, as a server would.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (token, body) = split_frame(bytes)?;
        let (decoded, used): (QueryBody, usize) =
            bincode::decode_from_slice(body, wire_config())?;
        if used != body.len() {
            return Err(DecodeError::TrailingBytes(body.len() - used));
        }

        Ok(Self {
            token,
            kind: decoded.kind.try_into()?,
            term: decoded.term,
            options: decoded.options,
        })
    }
}
