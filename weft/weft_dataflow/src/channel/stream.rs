//! Unbounded FIFO dataflow stream.

use log::trace;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use weft_core::error::ChannelError;

use super::{ReadChannel, Reader, Registration, WriteChannel};

struct StreamState<T> {
    /// Buffered values; empty whenever `readers` is non-empty
    values: VecDeque<T>,
    /// Readers waiting for a value, oldest first
    readers: VecDeque<Reader<T>>,
}

/// An unbounded multi-writer, multi-reader FIFO channel.
///
/// A write hands its value to the oldest waiting reader, or buffers it when
/// nobody is waiting. Writers never block.
pub struct Stream<T> {
    state: Arc<Mutex<StreamState<T>>>,
}

enum Placement {
    Back,
    Front,
}

impl<T: Send + 'static> Stream<T> {
    /// Create an empty stream.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StreamState {
                values: VecDeque::new(),
                readers: VecDeque::new(),
            })),
        }
    }

    /// Append a value, waking the oldest waiting reader if there is one.
    pub fn write(&self, value: T) {
        self.push(value, Placement::Back);
    }

    /// Number of buffered values.
    pub fn len(&self) -> usize {
        self.state.lock().values.len()
    }

    /// Whether no values are buffered.
    pub fn is_empty(&self) -> bool {
        self.state.lock().values.is_empty()
    }

    /// Number of readers currently waiting for a value.
    pub fn waiting_readers(&self) -> usize {
        self.state.lock().readers.len()
    }

    /// Run `callback` with the next value (immediately if one is buffered).
    pub fn when_bound<F>(&self, callback: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.deliver_to(Reader::new(move |value| {
            callback(value);
            Ok(())
        }));
    }

    fn push(&self, mut value: T, placement: Placement) {
        loop {
            let reader = {
                let mut state = self.state.lock();
                match state.readers.pop_front() {
                    Some(reader) => reader,
                    None => {
                        match placement {
                            Placement::Back => state.values.push_back(value),
                            Placement::Front => state.values.push_front(value),
                        }
                        return;
                    }
                }
            };

            // Readers run outside the lock; they may touch other channels.
            match reader.offer(value) {
                Ok(()) => return,
                Err(declined) => {
                    trace!("Stream reader declined a value, passing it on");
                    value = declined;
                }
            }
        }
    }
}

impl<T: Send + 'static> Default for Stream<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Send + 'static> ReadChannel<T> for Stream<T> {
    fn register(&self, reader: Reader<T>) -> Registration<T> {
        let mut state = self.state.lock();
        match state.values.pop_front() {
            Some(value) => Registration::Ready(value, reader),
            None => {
                state.readers.push_back(reader);
                Registration::Queued
            }
        }
    }

    fn give_back(&self, value: T) {
        self.push(value, Placement::Front);
    }

    fn discard_withdrawn(&self) {
        self.state.lock().readers.retain(|reader| !reader.is_withdrawn());
    }

    fn try_read(&self) -> Option<T> {
        self.state.lock().values.pop_front()
    }
}

impl<T: Send + 'static> WriteChannel<T> for Stream<T> {
    fn write(&self, value: T) -> Result<(), ChannelError> {
        self.push(value, Placement::Back);
        Ok(())
    }
}

impl<T> fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Stream")
            .field("buffered", &state.values.len())
            .field("waiting_readers", &state.readers.len())
            .finish()
    }
}
