use std::{collections::VecDeque, sync::Arc};

use bincode::Decode;
use log::{debug, warn};

use crate::{Error, term::Datum};

use super::{Connection, Note, Query, RawPayload, Response, ResponseKind, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    Complete,
    Error,
}

/// Ordered results of one query.
///
/// Items from a partial batch are handed out before the next batch is
/// requested, so continuation is invisible to the caller. Once the stream
/// reaches a terminal state it sends nothing more and its token is released.
pub struct ResultStream {
    conn: Arc<Connection>,
    token: Token,
    state: StreamState,
    buffer: VecDeque<RawPayload>,
    error: Option<Error>,
    notes: Vec<Note>,
    profile: Option<RawPayload>,
}

impl ResultStream {
    /// Send `query` and wait for its first response. A `noreply` query
    /// yields an empty, already complete stream.
    pub fn open(conn: Arc<Connection>, query: &Query) -> Result<Self, Error> {
        let mut stream = Self {
            conn,
            token: query.token,
            state: StreamState::Open,
            buffer: VecDeque::new(),
            error: None,
            notes: Vec::new(),
            profile: None,
        };

        if let Err(e) = stream.start(query) {
            stream.finish(StreamState::Error);
            return Err(e);
        }
        Ok(stream)
    }

    fn start(&mut self, query: &Query) -> Result<(), Error> {
        self.conn.send(query)?;
        if query.is_noreply() {
            self.finish(StreamState::Complete);
            return Ok(());
        }

        let response = self.conn.receive(self.token)?;
        self.apply(response);
        Ok(())
    }

    fn apply(&mut self, mut response: Response) {
        for note in &response.notes {
            if !self.notes.contains(note) {
                self.notes.push(*note);
            }
        }
        if let Some(profile) = response.profile.take() {
            self.profile = Some(profile);
        }

        if let Some(error) = response.server_error() {
            self.error = Some(error.into());
            self.finish(StreamState::Error);
            return;
        }

        match response.kind {
            ResponseKind::SuccessPartial => self.buffer.extend(response.results),
            ResponseKind::SuccessAtom | ResponseKind::SuccessSequence => {
                self.buffer.extend(response.results);
                self.finish(StreamState::Complete);
            }
            kind => {
                self.error = Some(Error::UnexpectedResponse {
                    token: self.token,
                    kind,
                });
                self.finish(StreamState::Error);
            }
        }
    }

    fn fetch_more(&mut self) {
        debug!("requesting next batch for token {}", self.token);
        let result = self
            .conn
            .send(&Query::continuation(self.token))
            .and_then(|()| self.conn.receive(self.token));

        match result {
            Ok(response) => self.apply(response),
            Err(e) => {
                self.error = Some(e);
                self.finish(StreamState::Error);
            }
        }
    }

    fn finish(&mut self, state: StreamState) {
        self.state = state;
        self.conn.release(self.token);
    }

    /// Next undecoded result, fetching another batch when the buffer runs
    /// dry. A failure is returned once, after all buffered items.
    pub fn next_raw(&mut self) -> Option<Result<RawPayload, Error>> {
        loop {
            if let Some(payload) = self.buffer.pop_front() {
                return Some(Ok(payload));
            }

            match self.state {
                StreamState::Open => self.fetch_more(),
                StreamState::Complete => return None,
                StreamState::Error => return self.error.take().map(Err),
            }
        }
    }

    /// Next result along with whether more may follow.
    pub fn next_item(&mut self) -> Option<Result<(Datum, bool), Error>> {
        let item = self.next_raw()?.and_then(|p| Ok(p.datum()?));
        Some(item.map(|datum| (datum, self.has_more())))
    }

    pub fn next_as<T: Decode<()>>(&mut self) -> Option<Result<T, Error>> {
        Some(self.next_raw()?.and_then(|p| Ok(p.decode()?)))
    }

    pub fn has_more(&self) -> bool {
        !self.buffer.is_empty() || self.state == StreamState::Open
    }

    /// Stop an unfinished query and wait for the server to acknowledge it.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.state != StreamState::Open {
            return Ok(());
        }

        self.buffer.clear();
        let ack = self
            .conn
            .send(&Query::stop(self.token))
            .and_then(|()| self.conn.receive(self.token));

        let result = match ack {
            Ok(response) => match response.server_error() {
                Some(error) => Err(error.into()),
                None => Ok(()),
            },
            Err(e) => Err(e),
        };
        self.finish(if result.is_ok() {
            StreamState::Complete
        } else {
            StreamState::Error
        });
        result
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn is_feed(&self) -> bool {
        self.notes.iter().any(|n| n.is_feed())
    }

    pub fn profile(&self) -> Option<&RawPayload> {
        self.profile.as_ref()
    }
}

impl Iterator for ResultStream {
    type Item = Result<Datum, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_raw()?.and_then(|p| Ok(p.datum()?)))
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed to stop query {}: {e}", self.token);
        }
    }
}
