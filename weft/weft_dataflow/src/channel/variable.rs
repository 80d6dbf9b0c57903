//! Single-assignment dataflow variable.

use log::trace;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use weft_core::error::ChannelError;

use super::{ReadChannel, Reader, Registration, WriteChannel};

enum VariableState<T> {
    Unbound(Vec<Reader<T>>),
    Bound(T),
}

/// A variable that can be bound exactly once.
///
/// Readers arriving before the bind park (or, for asynchronous readers,
/// are queued) and are all released with the bound value, in the order they
/// arrived. After binding every read returns a clone of the value.
pub struct Variable<T> {
    state: Arc<Mutex<VariableState<T>>>,
}

impl<T: Clone + Send + 'static> Variable<T> {
    /// Create an unbound variable.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(VariableState::Unbound(Vec::new()))),
        }
    }

    /// Create a variable that is already bound to `value`.
    pub fn bound(value: T) -> Self {
        Self {
            state: Arc::new(Mutex::new(VariableState::Bound(value))),
        }
    }

    /// Bind the variable and release every waiting reader.
    ///
    /// Fails with [`ChannelError::AlreadyBound`] on a second bind; the
    /// variable keeps its first value.
    pub fn bind(&self, value: T) -> Result<(), ChannelError> {
        let readers = {
            let mut state = self.state.lock();
            match &mut *state {
                VariableState::Bound(_) => return Err(ChannelError::AlreadyBound),
                VariableState::Unbound(readers) => {
                    let readers = std::mem::take(readers);
                    *state = VariableState::Bound(value.clone());
                    readers
                }
            }
        };

        trace!("Variable bound, releasing {} reader(s)", readers.len());
        for reader in readers {
            // A declined copy costs nothing: the bound value stays readable.
            let _ = reader.offer(value.clone());
        }
        Ok(())
    }

    /// Whether the variable has been bound.
    pub fn is_bound(&self) -> bool {
        matches!(*self.state.lock(), VariableState::Bound(_))
    }

    /// Number of readers waiting for the bind.
    pub fn waiting_readers(&self) -> usize {
        match &*self.state.lock() {
            VariableState::Unbound(readers) => readers.len(),
            VariableState::Bound(_) => 0,
        }
    }

    /// Run `callback` with the value once bound (immediately if it already is).
    pub fn when_bound<F>(&self, callback: F)
    where
        F: FnOnce(T) + Send + 'static,
    {
        self.deliver_to(Reader::new(move |value| {
            callback(value);
            Ok(())
        }));
    }
}

impl<T: Clone + Send + 'static> Default for Variable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Variable<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Clone + Send + 'static> ReadChannel<T> for Variable<T> {
    fn register(&self, reader: Reader<T>) -> Registration<T> {
        let mut state = self.state.lock();
        match &mut *state {
            VariableState::Bound(value) => Registration::Ready(value.clone(), reader),
            VariableState::Unbound(readers) => {
                readers.push(reader);
                Registration::Queued
            }
        }
    }

    fn give_back(&self, _value: T) {}

    fn discard_withdrawn(&self) {
        if let VariableState::Unbound(readers) = &mut *self.state.lock() {
            readers.retain(|reader| !reader.is_withdrawn());
        }
    }

    fn try_read(&self) -> Option<T> {
        match &*self.state.lock() {
            VariableState::Bound(value) => Some(value.clone()),
            VariableState::Unbound(_) => None,
        }
    }

    fn is_single_assignment(&self) -> bool {
        true
    }
}

impl<T: Clone + Send + 'static> WriteChannel<T> for Variable<T> {
    fn write(&self, value: T) -> Result<(), ChannelError> {
        self.bind(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Variable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.state.lock() {
            VariableState::Bound(value) => f.debug_tuple("Variable").field(value).finish(),
            VariableState::Unbound(readers) => f
                .debug_struct("Variable")
                .field("waiting_readers", &readers.len())
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_bind_then_read() {
        let variable = Variable::new();
        assert!(!variable.is_bound());
        assert_eq!(variable.try_read(), None);

        variable.bind(42).unwrap();

        assert!(variable.is_bound());
        assert_eq!(variable.read(), 42);
        assert_eq!(variable.read(), 42);
        assert_eq!(variable.try_read(), Some(42));
    }

    #[test]
    fn test_second_bind_fails_and_keeps_value() {
        let variable = Variable::new();
        variable.bind("first").unwrap();

        assert_eq!(variable.bind("second"), Err(ChannelError::AlreadyBound));
        assert_eq!(variable.read(), "first");
    }

    #[test]
    fn test_waiting_readers_released_by_bind() {
        let variable: Variable<u32> = Variable::new();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let variable = variable.clone();
                thread::spawn(move || variable.read())
            })
            .collect();

        thread::sleep(Duration::from_millis(30));
        variable.bind(7).unwrap();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 7);
        }
    }

    #[test]
    fn test_concurrent_binds_exactly_one_wins() {
        let variable: Variable<usize> = Variable::new();
        let successes = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let variable = variable.clone();
                let successes = successes.clone();
                thread::spawn(move || {
                    if variable.bind(i).is_ok() {
                        successes.fetch_add(1, Ordering::SeqCst);
                        Some(i)
                    } else {
                        None
                    }
                })
            })
            .collect();

        let winners: Vec<usize> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(winners.len(), 1);
        assert_eq!(variable.read(), winners[0]);
    }

    #[test]
    fn test_when_bound_callbacks_in_arrival_order() {
        let variable: Variable<i32> = Variable::new();
        let seen = Arc::new(StdMutex::new(Vec::new()));

        for tag in 0..3 {
            let seen = seen.clone();
            variable.when_bound(move |value| seen.lock().unwrap().push((tag, value)));
        }
        assert!(seen.lock().unwrap().is_empty());

        variable.bind(5).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(0, 5), (1, 5), (2, 5)]);

        // Late registration fires immediately.
        let seen_late = seen.clone();
        variable.when_bound(move |value| seen_late.lock().unwrap().push((9, value)));
        assert_eq!(seen.lock().unwrap().last(), Some(&(9, 5)));
    }

    #[test]
    fn test_read_timeout_on_unbound() {
        let variable: Variable<i32> = Variable::new();
        assert_eq!(
            variable.read_timeout(Duration::from_millis(5)),
            Err(ChannelError::Timeout(Duration::from_millis(5)))
        );

        let bound = Variable::bound(1);
        assert_eq!(bound.read_timeout(Duration::from_millis(5)), Ok(1));
    }
}
