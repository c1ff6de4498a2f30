use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Condvar, Mutex, PoisonError},
};

use log::{debug, trace, warn};

use crate::{
    Error,
    encoding::encode,
    term::{Datum, Term},
    value::Value,
};

use super::{
    DecodeError, FrameRead, FrameWrite, Query, QueryKind, QueryOptions, Response, ResponseKind,
    ResultStream, Token, TokenAllocator, lock, transport::peek_token,
};

type Mailbox = VecDeque<Result<Response, DecodeError>>;

/// Routed frames plus whether some caller is currently reading.
#[derive(Default)]
struct Inbox {
    mailboxes: HashMap<Token, Mailbox>,
    reading: bool,
}

/// One logical connection shared by any number of in-flight queries.
///
/// At most one caller reads from the transport at a time. It files every
/// frame under the frame's token and wakes all waiters, so a caller whose
/// response was read by someone else never waits on the transport itself.
pub struct Connection {
    tokens: TokenAllocator,
    reader: Mutex<Box<dyn FrameRead>>,
    writer: Mutex<Box<dyn FrameWrite>>,
    inbox: Mutex<Inbox>,
    arrived: Condvar,
}

impl Connection {
    pub fn new(reader: impl FrameRead + 'static, writer: impl FrameWrite + 'static) -> Self {
        Self::with_tokens(reader, writer, TokenAllocator::new())
    }

    pub fn with_tokens(
        reader: impl FrameRead + 'static,
        writer: impl FrameWrite + 'static,
        tokens: TokenAllocator,
    ) -> Self {
        Self {
            tokens,
            reader: Mutex::new(Box::new(reader)),
            writer: Mutex::new(Box::new(writer)),
            inbox: Mutex::new(Inbox::default()),
            arrived: Condvar::new(),
        }
    }

    pub fn tokens(&self) -> &TokenAllocator {
        &self.tokens
    }

    pub fn build(
        &self,
        term: Term,
        options: &QueryOptions,
        kind: QueryKind,
    ) -> Result<Query, Error> {
        Ok(Query::build(&self.tokens, term, options, kind)?)
    }

    pub fn send(&self, query: &Query) -> Result<(), Error> {
        let frame = query.serialize()?;
        trace!(
            "sending {:?} for token {} ({} bytes)",
            query.kind,
            query.token,
            frame.len()
        );
        lock(&self.writer).write_frame(&frame)?;
        Ok(())
    }

    /// Wait for the next response addressed to `token`.
    pub fn receive(&self, token: Token) -> Result<Response, Error> {
        let mut inbox = lock(&self.inbox);
        loop {
            if !self.tokens.is_outstanding(token) {
                return Err(DecodeError::UnknownToken(token).into());
            }
            if let Some(queued) = inbox
                .mailboxes
                .get_mut(&token)
                .and_then(VecDeque::pop_front)
            {
                return Ok(queued?);
            }
            if inbox.reading {
                inbox = self
                    .arrived
                    .wait(inbox)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            }

            inbox.reading = true;
            drop(inbox);
            let frame = lock(&self.reader).read_frame();
            inbox = lock(&self.inbox);
            inbox.reading = false;

            if let Ok(frame) = &frame {
                self.route(&mut inbox, frame);
            }
            // wake waiters whether to collect a frame or to take over reading
            self.arrived.notify_all();
            frame?;
        }
    }

    /// File a frame under its token. Must be called with the inbox locked so
    /// that a concurrent `release` cannot leave a mailbox behind.
    fn route(&self, inbox: &mut Inbox, frame: &[u8]) {
        let decoded = Response::decode(frame);
        let owner = match &decoded {
            Ok(response) => Some(response.token),
            Err(_) => peek_token(frame),
        };

        match owner {
            Some(owner) if self.tokens.is_outstanding(owner) => {
                trace!("routing frame for token {owner}");
                inbox.mailboxes.entry(owner).or_default().push_back(decoded);
            }
            Some(owner) => warn!("dropping frame for unknown token {owner}"),
            None => warn!("dropping frame without a readable token"),
        }
    }

    /// End the exchange for `token`, discarding anything still queued for it.
    pub fn release(&self, token: Token) {
        let mut inbox = lock(&self.inbox);
        self.tokens.release(token);
        if let Some(left) = inbox.mailboxes.remove(&token) {
            if !left.is_empty() {
                debug!("discarding {} queued frames for token {token}", left.len());
            }
        }
        drop(inbox);
        self.arrived.notify_all();
    }

    /// Start `term` and stream its results.
    pub fn run(self: &Arc<Self>, term: Term, options: &QueryOptions) -> Result<ResultStream, Error> {
        let query = self.build(term, options, QueryKind::Start)?;
        ResultStream::open(Arc::clone(self), &query)
    }

    /// Encode `value` with the default encoder, then run it.
    pub fn run_value(
        self: &Arc<Self>,
        value: &Value,
        options: &QueryOptions,
    ) -> Result<ResultStream, Error> {
        self.run(encode(value)?, options)
    }

    /// Block until every earlier `noreply` query has been applied.
    pub fn noreply_wait(&self) -> Result<(), Error> {
        let response = self.exchange(QueryKind::NoreplyWait)?;
        expect_kind(&response, ResponseKind::WaitComplete)
    }

    pub fn server_info(&self) -> Result<Datum, Error> {
        let response = self.exchange(QueryKind::ServerInfo)?;
        expect_kind(&response, ResponseKind::ServerInfo)?;
        match response.results.first() {
            Some(payload) => Ok(payload.datum()?),
            None => Ok(Datum::Null),
        }
    }

    fn exchange(&self, kind: QueryKind) -> Result<Response, Error> {
        let token = self.tokens.acquire();
        let result = self
            .send(&Query::control(token, kind))
            .and_then(|()| self.receive(token));
        self.release(token);
        result
    }
}

fn expect_kind(response: &Response, expected: ResponseKind) -> Result<(), Error> {
    if let Some(error) = response.server_error() {
        return Err(error.into());
    }
    if response.kind != expected {
        return Err(Error::UnexpectedResponse {
            token: response.token,
            kind: response.kind,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{sync::mpsc, thread, time::Duration};

    use crate::protocol::{
        TransportError,
        mock::{ChannelReader, RecordingWriter, ScriptedReader, ints},
    };

    use super::*;

    fn connection() -> (Connection, ScriptedReader, RecordingWriter) {
        let reader = ScriptedReader::default();
        let writer = RecordingWriter::default();
        let conn = Connection::new(reader.clone(), writer.clone());
        (conn, reader, writer)
    }

    fn table() -> Term {
        Term::db("benchmarks").table("benchmarks")
    }

    #[test]
    fn frames_routed_to_waiting_tokens() {
        let (conn, reader, _) = connection();
        let first = conn
            .build(table(), &QueryOptions::new(), QueryKind::Start)
            .unwrap();
        let second = conn
            .build(table(), &QueryOptions::new(), QueryKind::Start)
            .unwrap();

        reader.respond(second.token, ResponseKind::SuccessSequence, ints(20..21));
        reader.respond(99, ResponseKind::SuccessSequence, ints(0..1));
        reader.respond(first.token, ResponseKind::SuccessSequence, ints(10..11));

        let response = conn.receive(first.token).unwrap();
        assert_eq!(response.results[0].datum().unwrap(), Datum::Int(10));
        assert_eq!(reader.remaining(), 0);

        let response = conn.receive(second.token).unwrap();
        assert_eq!(response.results[0].datum().unwrap(), Datum::Int(20));
    }

    #[test]
    fn malformed_frame_reaches_only_its_token() {
        let (conn, reader, _) = connection();
        let first = conn
            .build(table(), &QueryOptions::new(), QueryKind::Start)
            .unwrap();
        let second = conn
            .build(table(), &QueryOptions::new(), QueryKind::Start)
            .unwrap();

        reader.push_raw(second.token, &[0xff]);
        reader.respond(first.token, ResponseKind::SuccessAtom, ints(1..2));

        assert!(conn.receive(first.token).is_ok());
        assert!(matches!(
            conn.receive(second.token),
            Err(Error::Decode(DecodeError::Malformed(_)))
        ));
    }

    #[test]
    fn released_token_cannot_receive() {
        let (conn, reader, _) = connection();
        let query = conn
            .build(table(), &QueryOptions::new(), QueryKind::Start)
            .unwrap();
        conn.release(query.token);
        reader.respond(query.token, ResponseKind::SuccessAtom, ints(0..1));

        assert!(matches!(
            conn.receive(query.token),
            Err(Error::Decode(DecodeError::UnknownToken(1)))
        ));
    }

    #[test]
    fn closed_transport_surfaces() {
        let (conn, _, _) = connection();
        let query = conn
            .build(table(), &QueryOptions::new(), QueryKind::Start)
            .unwrap();

        assert!(matches!(
            conn.receive(query.token),
            Err(Error::Transport(TransportError::Closed))
        ));
    }

    #[test]
    fn noreply_wait_expects_wait_complete() {
        let (conn, reader, writer) = connection();
        reader.respond(1, ResponseKind::WaitComplete, vec![]);
        reader.respond(2, ResponseKind::SuccessAtom, vec![]);

        conn.noreply_wait().unwrap();
        assert!(matches!(
            conn.noreply_wait(),
            Err(Error::UnexpectedResponse {
                token: 2,
                kind: ResponseKind::SuccessAtom
            })
        ));

        let kinds: Vec<_> = writer.queries().iter().map(|q| q.kind).collect();
        assert_eq!(kinds, vec![QueryKind::NoreplyWait, QueryKind::NoreplyWait]);
        assert_eq!(conn.tokens().outstanding(), 0);
    }

    #[test]
    fn server_info_returns_datum() {
        let (conn, reader, _) = connection();
        let info = Datum::Object(
            [("name".to_string(), Datum::from("node_1"))]
                .into_iter()
                .collect(),
        );
        reader.respond(1, ResponseKind::ServerInfo, vec![info.clone()]);

        assert_eq!(conn.server_info().unwrap(), info);
    }

    #[test]
    fn server_info_error_is_surfaced() {
        let (conn, reader, _) = connection();
        reader.respond(1, ResponseKind::ClientError, vec![Datum::from("denied")]);

        let err = conn.server_info().unwrap_err();
        assert_eq!(err.to_string(), "client error: denied");
    }

    #[test]
    fn idle_query_does_not_hold_up_others() {
        let (frames, reader) = ChannelReader::new();
        let conn = Arc::new(Connection::new(reader, RecordingWriter::default()));
        let quick = conn
            .build(table(), &QueryOptions::new(), QueryKind::Start)
            .unwrap()
            .token;
        let idle = conn
            .build(table(), &QueryOptions::new(), QueryKind::Start)
            .unwrap()
            .token;

        let idle_waiter = {
            let conn = Arc::clone(&conn);
            thread::spawn(move || conn.receive(idle).map(|r| r.kind))
        };
        while !lock(&conn.inbox).reading {
            thread::yield_now();
        }

        let (done, received) = mpsc::channel();
        {
            let conn = Arc::clone(&conn);
            thread::spawn(move || done.send(conn.receive(quick).map(|r| r.kind)).unwrap());
        }
        frames
            .send(Response::new(quick, ResponseKind::SuccessSequence).encode().unwrap())
            .unwrap();

        let kind = received
            .recv_timeout(Duration::from_secs(5))
            .expect("quick query stuck behind idle one")
            .unwrap();
        assert_eq!(kind, ResponseKind::SuccessSequence);

        frames
            .send(Response::new(idle, ResponseKind::SuccessAtom).encode().unwrap())
            .unwrap();
        assert_eq!(idle_waiter.join().unwrap().unwrap(), ResponseKind::SuccessAtom);
    }

    #[test]
    fn released_token_gets_no_mailbox() {
        let (conn, reader, _) = connection();
        let kept = conn
            .build(table(), &QueryOptions::new(), QueryKind::Start)
            .unwrap();
        let released = conn
            .build(table(), &QueryOptions::new(), QueryKind::Start)
            .unwrap();
        conn.release(released.token);

        reader.respond(released.token, ResponseKind::SuccessPartial, ints(0..1));
        reader.respond(kept.token, ResponseKind::SuccessAtom, ints(1..2));

        assert!(conn.receive(kept.token).is_ok());
        let inbox = lock(&conn.inbox);
        assert!(!inbox.mailboxes.contains_key(&released.token));
        assert!(!inbox.reading);
    }

    #[test]
    fn waiters_take_over_reading() {
        let (conn, reader, _) = connection();
        let conn = Arc::new(conn);
        let tokens: Vec<_> = (0..4)
            .map(|_| {
                conn.build(table(), &QueryOptions::new(), QueryKind::Start)
                    .unwrap()
                    .token
            })
            .collect();
        for &token in tokens.iter().rev() {
            let n = token as i64;
            reader.respond(token, ResponseKind::SuccessAtom, ints(n..n + 1));
        }

        let handles: Vec<_> = tokens
            .iter()
            .map(|&token| {
                let conn = Arc::clone(&conn);
                thread::spawn(move || conn.receive(token).unwrap().results[0].datum().unwrap())
            })
            .collect();

        for (token, handle) in tokens.iter().zip(handles) {
            assert_eq!(handle.join().unwrap(), Datum::Int(*token as i64));
        }
        assert_eq!(reader.remaining(), 0);
    }
}
