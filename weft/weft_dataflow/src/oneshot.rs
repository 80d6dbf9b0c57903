//! One-shot hand-off between a delivering thread and a parked waiter.
//!
//! Used for blocking channel reads and for agent replies. The waiter can
//! give up (timeout); a value delivered after that is handed back to the
//! sender instead of being lost. Dropping the sender without delivering
//! wakes the waiter with `None`.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Instant;

enum SlotState<T> {
    Waiting,
    Filled(T),
    Taken,
    Abandoned,
    Dropped,
}

struct Slot<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

/// Delivering half.
pub(crate) struct OneshotSender<T> {
    slot: Arc<Slot<T>>,
    sent: bool,
}

/// Waiting half.
pub(crate) struct OneshotReceiver<T> {
    slot: Arc<Slot<T>>,
}

/// Create a connected sender/receiver pair.
pub(crate) fn pair<T>() -> (OneshotSender<T>, OneshotReceiver<T>) {
    let slot = Arc::new(Slot {
        state: Mutex::new(SlotState::Waiting),
        ready: Condvar::new(),
    });
    (
        OneshotSender {
            slot: slot.clone(),
            sent: false,
        },
        OneshotReceiver { slot },
    )
}

impl<T> OneshotSender<T> {
    /// Deliver the value; returns it back if the receiver gave up.
    pub(crate) fn send(mut self, value: T) -> Result<(), T> {
        let mut state = self.slot.state.lock();
        match *state {
            SlotState::Waiting => {
                *state = SlotState::Filled(value);
                self.sent = true;
                drop(state);
                self.slot.ready.notify_one();
                Ok(())
            }
            _ => {
                self.sent = true;
                Err(value)
            }
        }
    }
}

impl<T> Drop for OneshotSender<T> {
    fn drop(&mut self) {
        if self.sent {
            return;
        }
        let mut state = self.slot.state.lock();
        if matches!(*state, SlotState::Waiting) {
            *state = SlotState::Dropped;
            drop(state);
            self.slot.ready.notify_one();
        }
    }
}

impl<T> OneshotReceiver<T> {
    /// Park until a value arrives. `None` if the sender was dropped.
    pub(crate) fn recv(self) -> Option<T> {
        let mut state = self.slot.state.lock();
        loop {
            match std::mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Filled(value) => return Some(value),
                SlotState::Dropped => return None,
                SlotState::Waiting => {
                    *state = SlotState::Waiting;
                    self.slot.ready.wait(&mut state);
                }
                other => {
                    *state = other;
                    return None;
                }
            }
        }
    }

    /// Park until a value arrives or `deadline` passes.
    ///
    /// On timeout the slot is marked abandoned, so a later `send` fails and
    /// returns the value to its sender.
    pub(crate) fn recv_deadline(self, deadline: Instant) -> Option<T> {
        let mut state = self.slot.state.lock();
        loop {
            match std::mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Filled(value) => return Some(value),
                SlotState::Waiting => {
                    *state = SlotState::Waiting;
                    if self.slot.ready.wait_until(&mut state, deadline).timed_out() {
                        if let SlotState::Filled(value) =
                            std::mem::replace(&mut *state, SlotState::Abandoned)
                        {
                            return Some(value);
                        }
                        return None;
                    }
                }
                other => {
                    *state = other;
                    return None;
                }
            }
        }
    }
}

impl<T> Drop for OneshotReceiver<T> {
    fn drop(&mut self) {
        let mut state = self.slot.state.lock();
        if matches!(*state, SlotState::Waiting) {
            *state = SlotState::Abandoned;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_send_then_recv() {
        let (tx, rx) = pair();
        tx.send(7).unwrap();
        assert_eq!(rx.recv(), Some(7));
    }

    #[test]
    fn test_recv_parks_until_send() {
        let (tx, rx) = pair();
        let handle = thread::spawn(move || rx.recv());
        thread::sleep(Duration::from_millis(20));
        tx.send("late").unwrap();
        assert_eq!(handle.join().unwrap(), Some("late"));
    }

    #[test]
    fn test_dropped_sender_wakes_receiver() {
        let (tx, rx) = pair::<u32>();
        let handle = thread::spawn(move || rx.recv());
        thread::sleep(Duration::from_millis(20));
        drop(tx);
        assert_eq!(handle.join().unwrap(), None);
    }

    #[test]
    fn test_timeout_hands_value_back() {
        let (tx, rx) = pair();
        let deadline = Instant::now() + Duration::from_millis(10);
        assert_eq!(rx.recv_deadline(deadline), None);
        assert_eq!(tx.send(5), Err(5));
    }

    #[test]
    fn test_dropped_receiver_hands_value_back() {
        let (tx, rx) = pair();
        drop(rx);
        assert_eq!(tx.send(1), Err(1));
    }
}
