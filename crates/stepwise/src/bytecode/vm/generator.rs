//! Generators as suspended frames.
//!
//! A generator owns exactly one frame. Resuming it moves the frame out of the generator
//! onto the consuming thread; YIELD_VALUE and GEN_RETURN move it back. The consumer tells
//! the two apart through the frame it resumes: after a yield it continues right after the
//! resuming instruction, after a return it continues at the FOR_ITER exit label (or, for a
//! `__next__` call, gets StopIteration raised at it).

use std::sync::Arc;

use super::{CallResult, Frame, FrameState, ResumeMode, Vm};
use crate::{
    exception::{ExcType, RunError, RunResult, SimpleException},
    heap::{Heap, HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{Attrs, Generator, class::resolve},
    value::Value,
};

/// Moves a frame that left the thread back into its generator.
pub(super) fn park(heap: &mut Heap<impl ResourceTracker>, frame: Box<Frame>) {
    let Some(id) = frame.generator else {
        return;
    };
    if let HeapData::Generator(generator) = heap.get_mut(id) {
        generator.park(frame);
    }
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> Vm<'_, T, P, Tr> {
    /// MAKE_GEN: turns the executing frame into a generator and returns the generator to
    /// the caller. The frame stays `Created` until the first resumption.
    pub(super) fn make_gen(&mut self) -> RunResult<()> {
        if self.thread.depth() < 3 {
            return Err(RunError::internal("MAKE_GEN outside a called frame"));
        }
        if self.thread.top().generator.is_some() {
            return Err(RunError::internal("MAKE_GEN in a frame that already is a generator"));
        }
        let name = self.thread.top().name().to_owned();
        let id = self.heap.allocate(HeapData::Generator(Generator::new(name)))?;
        let Some(mut frame) = self.thread.frames.pop() else {
            return Err(RunError::internal("MAKE_GEN with no frame"));
        };
        frame.state = FrameState::Created;
        frame.generator = Some(id);
        park(self.heap, frame);
        self.tracer.on_return(self.thread.depth());
        self.deliver(Value::Ref(id))
    }

    /// GET_ITER: `iterable → generator`.
    ///
    /// Generators pass through. Anything with `__iter__` or `__next__` is wrapped in an
    /// adapter generator that turns StopIteration into normal termination.
    pub(super) fn get_iter(&mut self) -> RunResult<()> {
        let value = self.pop()?;
        if let Value::Ref(id) = value
            && let HeapData::Generator(_) = self.heap.get(id)
        {
            self.push(value);
            return Ok(());
        }
        let class = self.heap.type_of(value);
        let has_iter = resolve(self.heap, class, "__iter__").is_some();
        let has_next = resolve(self.heap, class, "__next__").is_some();
        if !has_iter && !has_next {
            return Err(ExcType::type_error(format!(
                "'{}' object is not iterable",
                self.heap.type_name(value)
            )));
        }

        let mut locals = Attrs::default();
        locals.insert("source".to_owned(), value);
        let mut frame = Frame::new(
            Arc::clone(&self.runtime.adapter_code),
            None,
            Some(self.runtime.builtins),
            locals,
        );
        if !has_iter {
            // a bare iterator skips the prologue that would ask it for an iterator
            frame.locals.insert("iterator".to_owned(), value);
            frame.last = Some(self.runtime.adapter_prologue_end);
        }
        let id = self.heap.allocate(HeapData::Generator(Generator::new("<iterator>".to_owned())))?;
        frame.generator = Some(id);
        park(self.heap, Box::new(frame));
        self.push(Value::Ref(id));
        Ok(())
    }

    /// FOR_ITER: `generator → generator value`, or `generator result` at `exit` once the
    /// generator is exhausted.
    pub(super) fn for_iter(&mut self, exit: usize) -> RunResult<()> {
        let value = self.peek()?;
        let id = match value {
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::Generator(_)) => id,
            _ => return Err(RunError::internal("FOR_ITER operand is not a generator")),
        };
        self.thread.top_mut().exit = Some(exit);
        if !self.resume(id, ResumeMode::ForIter)? {
            self.push(Value::None);
            self.thread.cursor = exit;
        }
        Ok(())
    }

    /// Pushes the generator's frame onto the thread; `false` if it is already exhausted.
    fn resume(&mut self, id: HeapId, mode: ResumeMode) -> RunResult<bool> {
        let HeapData::Generator(generator) = self.heap.get(id) else {
            return Err(RunError::internal("resume of a non-generator"));
        };
        match generator.state() {
            None => return Err(ExcType::value_error("generator already executing")),
            Some(FrameState::Exhausted) => return Ok(false),
            Some(_) => {}
        }
        self.heap.tracker().check_frame_depth(self.thread.depth() - 1)?;
        let HeapData::Generator(generator) = self.heap.get_mut(id) else {
            return Err(RunError::internal("resume of a non-generator"));
        };
        let Some(mut frame) = generator.take() else {
            return Err(RunError::internal("generator lost its frame"));
        };
        frame.state = FrameState::Executing;
        frame.resume = mode;
        self.thread.cursor = frame.resume_index();
        self.tracer.on_call(frame.name(), self.thread.depth() + 1);
        self.thread.frames.push(frame);
        Ok(true)
    }

    /// `generator.__next__`: resumes the generator for one value.
    pub(super) fn generator_next(&mut self, args: Vec<Value>) -> RunResult<CallResult> {
        let id = match args.as_slice() {
            [Value::Ref(id)] if matches!(self.heap.get(*id), HeapData::Generator(_)) => *id,
            _ => return Err(ExcType::type_error("generator.__next__() expects a single generator")),
        };
        if self.resume(id, ResumeMode::Next)? {
            Ok(CallResult::FramePushed)
        } else {
            Err(SimpleException::new(ExcType::StopIteration, None).into())
        }
    }

    /// YIELD_VALUE: suspends the generator frame and hands `value` to its consumer.
    pub(super) fn yield_value(&mut self) -> RunResult<()> {
        let value = self.pop()?;
        if self.thread.top().generator.is_none() {
            return Err(RunError::internal("YIELD_VALUE outside a generator frame"));
        }
        let Some(mut frame) = self.thread.frames.pop() else {
            return Err(RunError::internal("YIELD_VALUE with no frame"));
        };
        frame.state = FrameState::Suspended;
        park(self.heap, frame);
        self.tracer.on_yield(self.thread.depth());
        self.deliver(value)
    }

    /// GEN_RETURN (and RETURN inside a generator frame): exhausts the frame and reports
    /// termination to the consumer the way it resumed the generator.
    pub(super) fn gen_return(&mut self, value: Value) -> RunResult<()> {
        if self.thread.top().generator.is_none() {
            return Err(RunError::internal("GEN_RETURN outside a generator frame"));
        }
        let Some(mut frame) = self.thread.frames.pop() else {
            return Err(RunError::internal("GEN_RETURN with no frame"));
        };
        let mode = frame.resume;
        frame.exhaust();
        park(self.heap, frame);
        self.tracer.on_return(self.thread.depth());

        match mode {
            ResumeMode::ForIter => {
                let consumer = self.thread.top_mut();
                let exit = consumer
                    .exit
                    .ok_or_else(|| RunError::internal("generator returned to a consumer without an exit label"))?;
                consumer.stack.push(value);
                self.thread.cursor = exit;
                Ok(())
            }
            ResumeMode::Next => {
                self.thread.cursor = self.thread.top().resume_index();
                let args = if value == Value::None { Vec::new() } else { vec![value] };
                let exc = self.heap.new_exception(ExcType::StopIteration, args)?;
                Err(RunError::Raised(exc))
            }
        }
    }
}
