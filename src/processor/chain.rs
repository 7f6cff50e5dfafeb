//! Ordered chain of processors, each link joined to the next by its own buffer.

use super::Processor;
use crate::buffer::DataBuffer;
use crate::execution::processor_executor::{NodeLauncher, ProcessorNode};
use std::fmt;
use std::sync::Arc;

type Binder<I, O> =
    Box<dyn FnOnce(Arc<DataBuffer<I>>, Arc<DataBuffer<O>>, usize) -> Vec<Box<dyn NodeLauncher>> + Send>;

/// A typed sequence of processors turning `I` records into `O` records.
///
/// The chain is bound to the task's read and write buffers when the task is
/// built; one intermediate buffer is created per link.
///
/// ```rust,no_run
/// use pipeline_core::processor::{processor_fn, ProcessorChain};
/// use pipeline_core::chunk::DataChunk;
///
/// let chain = ProcessorChain::new(processor_fn("parse", |rows: DataChunk<String>| {
///     Ok(rows.into_iter().map(|row| row.len()).collect())
/// }))
/// .then_with_capacity(
///     processor_fn("double", |lens: DataChunk<usize>| Ok(lens.into_iter().map(|n| n * 2).collect())),
///     64,
/// );
/// assert_eq!(chain.len(), 2);
/// ```
pub struct ProcessorChain<I, O> {
    binder: Binder<I, O>,
    names: Vec<&'static str>,
    intermediate_capacities: Vec<Option<usize>>,
}

impl<I: Send + 'static, O: Send + 'static> ProcessorChain<I, O> {
    pub fn new<P: Processor<I, O>>(processor: P) -> Self {
        let processor: Arc<dyn Processor<I, O>> = Arc::new(processor);
        let names = vec![processor.name()];
        Self {
            binder: Box::new(move |input, output, _default_capacity| {
                vec![Box::new(ProcessorNode::new(processor, input, output)) as Box<dyn NodeLauncher>]
            }),
            names,
            intermediate_capacities: Vec::new(),
        }
    }

    /// Append a processor; the buffer in front of it uses the task's default capacity.
    pub fn then<N: Send + 'static, P: Processor<O, N>>(self, processor: P) -> ProcessorChain<I, N> {
        self.link(processor, None)
    }

    /// Append a processor with an explicitly sized buffer in front of it.
    pub fn then_with_capacity<N: Send + 'static, P: Processor<O, N>>(
        self,
        processor: P,
        capacity: usize,
    ) -> ProcessorChain<I, N> {
        self.link(processor, Some(capacity))
    }

    fn link<N: Send + 'static, P: Processor<O, N>>(
        self,
        processor: P,
        capacity: Option<usize>,
    ) -> ProcessorChain<I, N> {
        let processor: Arc<dyn Processor<O, N>> = Arc::new(processor);
        let mut names = self.names;
        names.push(processor.name());
        let mut intermediate_capacities = self.intermediate_capacities;
        intermediate_capacities.push(capacity);

        let head = self.binder;
        ProcessorChain {
            binder: Box::new(move |input, output, default_capacity| {
                let middle = Arc::new(DataBuffer::new(capacity.unwrap_or(default_capacity)));
                let mut nodes = head(input, Arc::clone(&middle), default_capacity);
                nodes.push(Box::new(ProcessorNode::new(processor, middle, output)));
                nodes
            }),
            names,
            intermediate_capacities,
        }
    }
}

impl<I, O> ProcessorChain<I, O> {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn processor_names(&self) -> &[&'static str] {
        &self.names
    }

    /// Explicit capacities requested with `then_with_capacity`, in link order.
    pub(crate) fn explicit_capacities(&self) -> impl Iterator<Item = usize> + '_ {
        self.intermediate_capacities.iter().flatten().copied()
    }

    pub(crate) fn bind(
        self,
        input: Arc<DataBuffer<I>>,
        output: Arc<DataBuffer<O>>,
        default_capacity: usize,
    ) -> Vec<Box<dyn NodeLauncher>> {
        (self.binder)(input, output, default_capacity)
    }
}

impl<I, O> fmt::Debug for ProcessorChain<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorChain")
            .field("processors", &self.names)
            .finish()
    }
}
