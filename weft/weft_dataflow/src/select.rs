//! Blocking selection over several channels.
//!
//! A [`Select`] runs a selector over the caller's inputs and funnels every
//! value, tagged with the index of the input it came from, into one
//! internal stream. `select()` is a blocking read from that stream, so the
//! first value to arrive on any input is the first one returned.

use std::sync::Arc;
use std::time::Duration;
use weft_core::error::{ConfigurationError, Result};

use crate::channel::{ReadChannel, Stream};
use crate::group::{default_group, ParallelGroup};
use crate::processor::{Processor, ProcessorBuilder};

/// A value produced by a [`Select`], with the input it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectResult<T> {
    /// Position of the input in the list the select was built with
    pub index: usize,
    /// The value read from that input
    pub value: T,
}

/// Merges several input channels into one blocking `select()`
pub struct Select<T: Send + 'static> {
    selector: Processor<T>,
    output: Stream<SelectResult<T>>,
}

impl<T: Send + 'static> Select<T> {
    /// Select over `inputs` in the default group
    pub fn new(inputs: Vec<Arc<dyn ReadChannel<T>>>) -> Result<Self> {
        Self::in_group(default_group()?, inputs)
    }

    /// Select over `inputs` in `group`
    pub fn in_group(group: &ParallelGroup, inputs: Vec<Arc<dyn ReadChannel<T>>>) -> Result<Self> {
        if inputs.is_empty() {
            return Err(ConfigurationError::NoInputs.into());
        }

        let output = Stream::new();
        let selector = inputs
            .into_iter()
            .fold(ProcessorBuilder::new(group), |builder, input| {
                builder.shared_input(input)
            })
            .output(output.clone())
            .max_forks(1)
            .selector(|index, value, ctx| {
                ctx.bind_output(SelectResult { index, value })?;
                Ok(())
            })?;

        Ok(Self { selector, output })
    }

    /// Block until any input produces a value
    pub fn select(&self) -> SelectResult<T> {
        self.output.read()
    }

    /// Block for at most `timeout` waiting for any input
    pub fn select_timeout(&self, timeout: Duration) -> Result<SelectResult<T>> {
        Ok(self.output.read_timeout(timeout)?)
    }

    /// Take a value that has already been selected, without blocking
    pub fn try_select(&self) -> Option<SelectResult<T>> {
        self.output.try_read()
    }

    /// The stream every selected value is written to
    pub fn output_channel(&self) -> &Stream<SelectResult<T>> {
        &self.output
    }

    /// Stop selecting. Values not yet read stay in the output channel.
    pub fn stop(&self) {
        self.selector.terminate();
    }
}

impl<T: Send + 'static> Drop for Select<T> {
    fn drop(&mut self) {
        self.selector.terminate();
    }
}
