//! In-memory transports for driving a connection from a fixed script.
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, mpsc},
};

use super::{
    FrameRead, FrameWrite, Query, Response, ResponseKind, TransportError, lock, transport::frame,
};
use crate::term::Datum;

/// Yields queued frames in order, then reports the connection closed.
#[derive(Clone, Default)]
pub(crate) struct ScriptedReader {
    frames: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl ScriptedReader {
    pub(crate) fn push(&self, frame: Vec<u8>) {
        lock(&self.frames).push_back(frame);
    }

    pub(crate) fn respond(&self, token: u64, kind: ResponseKind, items: Vec<Datum>) {
        let response = Response::with_datums(token, kind, items).unwrap();
        self.push(response.encode().unwrap());
    }

    pub(crate) fn push_raw(&self, token: u64, body: &[u8]) {
        self.push(frame(token, body).unwrap());
    }

    pub(crate) fn remaining(&self) -> usize {
        lock(&self.frames).len()
    }
}

impl FrameRead for ScriptedReader {
    fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        lock(&self.frames)
            .pop_front()
            .ok_or(TransportError::Closed)
    }
}

/// Blocks until the test hands it a frame through the paired sender.
pub(crate) struct ChannelReader {
    frames: mpsc::Receiver<Vec<u8>>,
}

impl ChannelReader {
    pub(crate) fn new() -> (mpsc::Sender<Vec<u8>>, Self) {
        let (sender, frames) = mpsc::channel();
        (sender, Self { frames })
    }
}

impl FrameRead for ChannelReader {
    fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        self.frames.recv().map_err(|_| TransportError::Closed)
    }
}

/// Keeps every written frame for later inspection.
#[derive(Clone, Default)]
pub(crate) struct RecordingWriter {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingWriter {
    pub(crate) fn queries(&self) -> Vec<Query> {
        lock(&self.frames)
            .iter()
            .map(|f| Query::decode(f).unwrap())
            .collect()
    }
}

impl FrameWrite for RecordingWriter {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        lock(&self.frames).push(frame.to_vec());
        Ok(())
    }
}

pub(crate) fn ints(range: std::ops::Range<i64>) -> Vec<Datum> {
    range.map(Datum::Int).collect()
}
