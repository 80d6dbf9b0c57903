//! Output side of an operator firing.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use weft_core::error::ChannelError;

use crate::channel::WriteChannel;

/// Handle passed to an operator body for publishing results.
///
/// Every firing gets a context over the same output channels. The atomic
/// variants share one lock per operator, so two atomic broadcasts from
/// concurrent firings never interleave their per-channel writes.
pub struct OutputContext<O> {
    outputs: Arc<[Arc<dyn WriteChannel<O>>]>,
    atomic: Arc<Mutex<()>>,
}

impl<O: Send + 'static> OutputContext<O> {
    pub(crate) fn new(outputs: Vec<Arc<dyn WriteChannel<O>>>) -> Self {
        Self {
            outputs: outputs.into(),
            atomic: Arc::new(Mutex::new(())),
        }
    }

    /// Number of output channels
    pub fn output_count(&self) -> usize {
        self.outputs.len()
    }

    /// Write `value` to output 0.
    pub fn bind_output(&self, value: O) -> Result<(), ChannelError> {
        self.bind_output_at(0, value)
    }

    /// Write `value` to output `index`.
    pub fn bind_output_at(&self, index: usize, value: O) -> Result<(), ChannelError> {
        let output = self
            .outputs
            .get(index)
            .ok_or(ChannelError::OutputIndexOutOfRange {
                index,
                outputs: self.outputs.len(),
            })?;
        output.write(value)
    }

    /// Write one value per output, matched by position.
    pub fn bind_all_output_values(&self, values: Vec<O>) -> Result<(), ChannelError> {
        if values.len() != self.outputs.len() {
            return Err(ChannelError::OutputCountMismatch {
                expected: self.outputs.len(),
                actual: values.len(),
            });
        }
        self.outputs
            .iter()
            .zip(values)
            .try_for_each(|(output, value)| output.write(value))
    }

    /// [`bind_all_output_values`](Self::bind_all_output_values) serialized
    /// against every other atomic write of this operator.
    pub fn bind_all_output_values_atomically(&self, values: Vec<O>) -> Result<(), ChannelError> {
        let _guard = self.atomic.lock();
        self.bind_all_output_values(values)
    }
}

impl<O: Clone + Send + 'static> OutputContext<O> {
    /// Write `value` to every output.
    pub fn bind_all_outputs(&self, value: O) -> Result<(), ChannelError> {
        match self.outputs.split_last() {
            None => Ok(()),
            Some((last, rest)) => {
                for output in rest {
                    output.write(value.clone())?;
                }
                last.write(value)
            }
        }
    }

    /// [`bind_all_outputs`](Self::bind_all_outputs) serialized against every
    /// other atomic write of this operator.
    pub fn bind_all_outputs_atomically(&self, value: O) -> Result<(), ChannelError> {
        let _guard = self.atomic.lock();
        self.bind_all_outputs(value)
    }
}

impl<O> Clone for OutputContext<O> {
    fn clone(&self) -> Self {
        Self {
            outputs: Arc::clone(&self.outputs),
            atomic: Arc::clone(&self.atomic),
        }
    }
}

impl<O> fmt::Debug for OutputContext<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputContext")
            .field("outputs", &self.outputs.len())
            .finish()
    }
}
