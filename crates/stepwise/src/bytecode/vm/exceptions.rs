//! Handler stack, RAISE, and the single unwinding procedure every failure goes through.

use super::{Handler, StepResult, Vm, generator};
use crate::{
    exception::{ExcType, RunError, RunResult, SimpleException},
    heap::HeapData,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{Instance, class::is_subclass},
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> Vm<'_, T, P, Tr> {
    /// PUSH_HANDLER: records the current operand stack depth with the handler target.
    pub(super) fn push_handler(&mut self, target: usize) {
        let frame = self.thread.top_mut();
        frame.handlers.push(Handler {
            depth: frame.stack.len(),
            target,
        });
        let depth = frame.handlers.len();
        self.tracer.on_handler_push(depth);
    }

    /// POP_HANDLER: discards the most recent handler.
    pub(super) fn pop_handler(&mut self) -> RunResult<()> {
        let frame = self.thread.top_mut();
        if frame.handlers.pop().is_none() {
            return Err(RunError::internal("POP_HANDLER with an empty handler stack"));
        }
        let depth = frame.handlers.len();
        self.tracer.on_handler_pop(depth);
        Ok(())
    }

    /// RAISE: `exc →`.
    ///
    /// An exception class is instantiated with no arguments; any other value is raised as is.
    pub(super) fn raise(&mut self) -> RunResult<()> {
        let value = self.pop()?;
        let base = self.heap.exception_class(ExcType::BaseException);
        let raised = match value {
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::Class(_)) && is_subclass(self.heap, id, base) => {
                let args = self.heap.alloc_tuple(Vec::new())?;
                let mut inst = Instance::new(id);
                inst.attrs.insert("args".to_owned(), args);
                Value::Ref(self.heap.allocate(HeapData::Instance(inst))?)
            }
            other => other,
        };
        Err(RunError::Raised(raised))
    }

    /// Routes a failure to the innermost handler of the thread.
    ///
    /// Each frame's handlers are searched newest first. A frame without handlers is popped
    /// (a generator frame is exhausted and parked back into its generator) and the search
    /// continues in its caller. Malformed code and resource budgets never reach a handler.
    pub(super) fn unwind(&mut self, err: RunError) -> StepResult {
        let exc = match err {
            RunError::Internal(msg) => {
                let line = self.current_line();
                self.thread.abandon(self.heap);
                return StepResult::Faulted {
                    message: msg.into_owned(),
                    line,
                };
            }
            RunError::Uncatchable(exc) => {
                let name: &'static str = exc.exc_type().into();
                self.tracer.on_unwind(name, false);
                self.thread.abandon(self.heap);
                return StepResult::Aborted(exc);
            }
            RunError::Exc(exc) => match self.heap.materialize(&exc) {
                Ok(value) => value,
                Err(resource) => {
                    self.thread.abandon(self.heap);
                    return StepResult::Aborted(SimpleException::new_msg(resource.exc_type(), &resource));
                }
            },
            RunError::Raised(value) => value,
        };

        while let Some(frame) = self.thread.frames.last_mut() {
            if let Some(handler) = frame.handlers.pop() {
                frame.stack.truncate(handler.depth);
                frame.stack.push(exc);
                frame.pending.clear();
                self.thread.cursor = handler.target;
                self.tracer.on_unwind(self.heap.type_name(exc), true);
                return StepResult::Running;
            }
            if let Some(mut frame) = self.thread.frames.pop()
                && frame.generator.is_some()
            {
                frame.exhaust();
                generator::park(self.heap, frame);
            }
        }
        self.tracer.on_unwind(self.heap.type_name(exc), false);
        StepResult::Raised(exc)
    }
}
