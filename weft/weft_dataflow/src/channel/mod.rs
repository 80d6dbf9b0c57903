//! Dataflow channels.
//!
//! Two channel kinds are provided:
//!
//! - [`Variable`]: single-assignment; bound once, read any number of times
//! - [`Stream`]: unbounded FIFO; every written value is read exactly once
//!
//! Both hand values to *readers*: one-shot callbacks that either accept the
//! value or decline it (for instance because the waiting thread timed out or
//! the operator behind it has stopped). A declined value is passed on to the
//! next reader or kept in the channel, so no value is lost.

pub mod stream;
pub mod variable;

pub use stream::Stream;
pub use variable::Variable;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use weft_core::error::ChannelError;

use crate::oneshot;

type Callback<T> = Box<dyn FnOnce(T) -> Result<(), T> + Send + 'static>;

/// A one-shot reader. Its callback returns the value back (`Err`) to
/// decline it.
pub struct Reader<T> {
    callback: Callback<T>,
    withdrawn: Option<Arc<AtomicBool>>,
}

impl<T> Reader<T> {
    /// A reader that stays registered until it is offered a value
    pub fn new<F>(callback: F) -> Self
    where
        F: FnOnce(T) -> Result<(), T> + Send + 'static,
    {
        Self {
            callback: Box::new(callback),
            withdrawn: None,
        }
    }

    /// A reader that its owner can withdraw by setting `withdrawn`.
    /// Channels drop withdrawn readers in [`ReadChannel::discard_withdrawn`].
    pub fn withdrawable<F>(callback: F, withdrawn: Arc<AtomicBool>) -> Self
    where
        F: FnOnce(T) -> Result<(), T> + Send + 'static,
    {
        Self {
            callback: Box::new(callback),
            withdrawn: Some(withdrawn),
        }
    }

    /// Whether the owner has withdrawn the reader
    pub fn is_withdrawn(&self) -> bool {
        self.withdrawn
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    /// Hand `value` to the reader. A withdrawn reader declines it.
    pub fn offer(self, value: T) -> Result<(), T> {
        if self.is_withdrawn() {
            return Err(value);
        }
        (self.callback)(value)
    }
}

/// Outcome of registering a reader with a channel.
pub enum Registration<T> {
    /// A value was available immediately; the reader is handed back unused.
    Ready(T, Reader<T>),
    /// The reader was queued and will be called with the next value.
    Queued,
}

/// The readable side of a channel.
pub trait ReadChannel<T: Send + 'static>: Send + Sync {
    /// Take the next value if one is available, otherwise queue `reader`.
    fn register(&self, reader: Reader<T>) -> Registration<T>;

    /// Return a value taken by a reader that then declined it.
    fn give_back(&self, value: T);

    /// Take the next value without blocking.
    fn try_read(&self) -> Option<T>;

    /// Drop every queued reader that has been withdrawn.
    fn discard_withdrawn(&self) {}

    /// Whether every read yields the same single value.
    fn is_single_assignment(&self) -> bool {
        false
    }

    /// Block until a value is available and return it.
    fn read(&self) -> T {
        loop {
            let (sender, receiver) = oneshot::pair();
            match self.register(Reader::new(move |value: T| sender.send(value))) {
                Registration::Ready(value, _) => return value,
                Registration::Queued => {
                    if let Some(value) = receiver.recv() {
                        return value;
                    }
                }
            }
        }
    }

    /// Block for at most `timeout` waiting for a value.
    ///
    /// On timeout the reader is withdrawn from the channel.
    fn read_timeout(&self, timeout: Duration) -> Result<T, ChannelError> {
        let deadline = Instant::now() + timeout;
        let (sender, receiver) = oneshot::pair();
        let withdrawn = Arc::new(AtomicBool::new(false));
        let reader = Reader::withdrawable(move |value: T| sender.send(value), Arc::clone(&withdrawn));
        match self.register(reader) {
            Registration::Ready(value, _) => Ok(value),
            Registration::Queued => match receiver.recv_deadline(deadline) {
                Some(value) => Ok(value),
                None => {
                    withdrawn.store(true, Ordering::Release);
                    self.discard_withdrawn();
                    Err(ChannelError::Timeout(timeout))
                }
            },
        }
    }

    /// Deliver the next value to `reader`, now if one is available.
    fn deliver_to(&self, reader: Reader<T>) {
        if let Registration::Ready(value, reader) = self.register(reader) {
            if let Err(value) = reader.offer(value) {
                self.give_back(value);
            }
        }
    }
}

/// The writable side of a channel.
pub trait WriteChannel<T>: Send + Sync {
    /// Write a value. Fails only for an already bound [`Variable`].
    fn write(&self, value: T) -> Result<(), ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_channels_as_trait_objects() {
        let stream: Stream<i32> = Stream::new();
        let variable: Variable<i32> = Variable::new();

        let readers: Vec<Arc<dyn ReadChannel<i32>>> =
            vec![Arc::new(stream.clone()), Arc::new(variable.clone())];
        let writers: Vec<Arc<dyn WriteChannel<i32>>> =
            vec![Arc::new(stream.clone()), Arc::new(variable.clone())];

        for writer in &writers {
            writer.write(3).unwrap();
        }

        assert_eq!(readers[0].read(), 3);
        assert_eq!(readers[1].read(), 3);
        assert!(!readers[0].is_single_assignment());
        assert!(readers[1].is_single_assignment());
    }

    #[test]
    fn test_read_timeout_does_not_lose_late_value() {
        let stream: Stream<i32> = Stream::new();

        let result = stream.read_timeout(Duration::from_millis(10));
        assert_eq!(result, Err(ChannelError::Timeout(Duration::from_millis(10))));

        // The abandoned reader is gone, so the value stays in the stream.
        assert_eq!(stream.waiting_readers(), 0);
        stream.write(9);
        assert_eq!(stream.try_read(), Some(9));
    }

    #[test]
    fn test_repeated_timeouts_leave_no_readers_behind() {
        let stream: Stream<u8> = Stream::new();
        let variable: Variable<u8> = Variable::new();

        for _ in 0..200 {
            assert!(stream.read_timeout(Duration::from_micros(1)).is_err());
            assert!(variable.read_timeout(Duration::from_micros(1)).is_err());
        }

        assert_eq!(stream.waiting_readers(), 0);
        assert_eq!(variable.waiting_readers(), 0);
    }

    #[test]
    fn test_withdrawn_reader_declines() {
        let withdrawn = Arc::new(AtomicBool::new(true));
        let reader = Reader::withdrawable(|_: i32| Ok(()), withdrawn);
        assert!(reader.is_withdrawn());
        assert_eq!(reader.offer(4), Err(4));

        assert_eq!(Reader::new(|_: i32| Ok(())).offer(4), Ok(()));
    }

    #[test]
    fn test_blocking_read_across_threads() {
        let stream: Stream<String> = Stream::new();
        let reader = stream.clone();
        let handle = thread::spawn(move || reader.read());

        thread::sleep(Duration::from_millis(20));
        stream.write("hello".to_string());

        assert_eq!(handle.join().unwrap(), "hello");
    }

    #[test]
    fn test_deliver_to_gives_back_declined_value() {
        let stream: Stream<i32> = Stream::new();
        stream.write(1);
        stream.write(2);

        stream.deliver_to(Reader::new(Err::<(), i32>));
        assert_eq!(stream.len(), 2);
        assert_eq!(stream.try_read(), Some(1));
    }
}
