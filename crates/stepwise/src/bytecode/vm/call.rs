//! Call protocol: resolving a callable down to a frame push or a foreign call.

use std::sync::Arc;

use super::{Continuation, Frame, FrameState, Vm, attr::Slot, constant_value};
use crate::{
    builtins::Builtins,
    bytecode::Constant,
    exception::{ExcType, RunError, RunResult, SimpleException},
    heap::{HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    signature::bind,
    tracer::VmTracer,
    types::{Dict, Function},
    value::Value,
};

/// Maximum number of bound-method and call-slot rewrites for one call.
///
/// Each rewrite replaces the callable with something closer to a function, so only a
/// pathological chain of `__call__` attributes can reach it.
pub(super) const MAX_CALL_INDIRECTION: usize = 64;

/// Result of a call operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallResult {
    /// The call completed immediately with this value.
    Push(Value),
    /// A frame was pushed; its RETURN will deliver the value to the caller.
    FramePushed,
}

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> Vm<'_, T, P, Tr> {
    /// CALL: `callable args kwargs → result`.
    pub(super) fn call(&mut self) -> RunResult<()> {
        let kwargs = self.pop()?;
        let args = self.pop()?;
        let callable = self.pop()?;
        let args = self.tuple_items(args)?;
        let kwargs = self.dict_items(kwargs)?;
        let result = self.call_value(callable, args, kwargs)?;
        self.push_result(result);
        Ok(())
    }

    /// FFI_CALL: `builtin a1..an → result`.
    pub(super) fn ffi_call(&mut self, argc: usize) -> RunResult<()> {
        let args = self.pop_n(argc)?;
        let target = self.pop()?;
        let builtin = match target {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Builtin(b) | HeapData::MethodDescriptor(b) => *b,
                _ => return Err(RunError::internal("FFI_CALL target is not a foreign function")),
            },
            _ => return Err(RunError::internal("FFI_CALL target is not a foreign function")),
        };
        let result = self.call_foreign(builtin, args)?;
        self.push_result(result);
        Ok(())
    }

    /// The general call loop.
    ///
    /// Functions push a frame, foreign functions run to completion, bound methods prepend
    /// their receiver and retry, anything else retries with its `__call__` slot.
    pub(super) fn call_value(&mut self, callable: Value, args: Vec<Value>, kwargs: Dict) -> RunResult<CallResult> {
        self.call_bounded(callable, args, kwargs, MAX_CALL_INDIRECTION)
    }

    /// [`Vm::call_value`] with at most `budget` rewrites of the callable left.
    ///
    /// A `__call__` slot bound by a user `__get__` frame parks the arguments; the retry
    /// happens when that frame returns.
    pub(super) fn call_bounded(
        &mut self,
        mut callable: Value,
        mut args: Vec<Value>,
        kwargs: Dict,
        budget: usize,
    ) -> RunResult<CallResult> {
        for remaining in (0..budget).rev() {
            if let Value::Ref(id) = callable {
                match self.heap.get(id) {
                    HeapData::Function(_) => {
                        let frame = self.make_frame(id, args, kwargs)?;
                        self.enter_frame(Box::new(frame))?;
                        return Ok(CallResult::FramePushed);
                    }
                    HeapData::Builtin(b) | HeapData::MethodDescriptor(b) => {
                        let builtin = *b;
                        if !kwargs.is_empty() {
                            return Err(ExcType::type_error(format!(
                                "{}() takes no keyword arguments",
                                builtin.qualname()
                            )));
                        }
                        return self.call_foreign(builtin, args);
                    }
                    HeapData::BoundMethod(method) => {
                        let method = *method;
                        args.insert(0, method.receiver);
                        callable = method.func;
                        continue;
                    }
                    _ => {}
                }
            }
            match self.slot(callable, "__call__", remaining)? {
                Slot::Bound(slot) => callable = slot,
                Slot::Binding { mark } => {
                    let then = Continuation::CallSlot {
                        args,
                        kwargs,
                        budget: remaining,
                    };
                    self.defer(mark, then)?;
                    return Ok(CallResult::FramePushed);
                }
                Slot::Missing => return Err(ExcType::not_callable(self.heap.type_name(callable))),
            }
        }
        Err(SimpleException::new_msg(ExcType::RecursionError, "maximum call indirection depth exceeded").into())
    }

    /// Calls with positional arguments only; a pushed frame inherits `then` as the
    /// continuation of the calling frame. Returns the value if the call finished.
    pub(super) fn call_then(&mut self, callable: Value, args: Vec<Value>, then: Continuation) -> RunResult<Option<Value>> {
        let mark = self.thread.top().pending.len();
        match self.call_value(callable, args, Dict::default())? {
            CallResult::Push(value) => Ok(Some(value)),
            CallResult::FramePushed => {
                self.defer(mark, then)?;
                Ok(None)
            }
        }
    }

    fn call_foreign(&mut self, builtin: Builtins, args: Vec<Value>) -> RunResult<CallResult> {
        if builtin == Builtins::GeneratorNext {
            return self.generator_next(args);
        }
        builtin.call(self.heap, args, self.print).map(CallResult::Push)
    }

    pub(super) fn push_result(&mut self, result: CallResult) {
        if let CallResult::Push(value) = result {
            self.push(value);
        }
    }

    /// Binds arguments into a fresh frame for the function stored at `func_id`.
    fn make_frame(&mut self, func_id: HeapId, args: Vec<Value>, kwargs: Dict) -> RunResult<Frame> {
        let HeapData::Function(func) = self.heap.get(func_id) else {
            return Err(RunError::internal("make_frame on a non-function"));
        };
        let code = Arc::clone(&func.code);
        let (globals, builtins) = (func.globals, func.builtins);
        let defaults = func.defaults.clone();
        let locals = bind(self.heap, &code.name, &code.arg_spec, &defaults, args, kwargs)?;
        Ok(Frame::new(code, globals, builtins, locals))
    }

    /// Pushes `frame` and moves the cursor to its resume point.
    fn enter_frame(&mut self, mut frame: Box<Frame>) -> RunResult<()> {
        self.heap.tracker().check_frame_depth(self.thread.depth() - 1)?;
        frame.state = FrameState::Executing;
        self.thread.cursor = frame.resume_index();
        self.tracer.on_call(frame.name(), self.thread.depth() + 1);
        self.thread.frames.push(frame);
        Ok(())
    }

    /// MAKE_FRAME: `func args kwargs → frame`.
    pub(super) fn make_frame_op(&mut self) -> RunResult<()> {
        let kwargs = self.pop()?;
        let args = self.pop()?;
        let func = self.pop()?;
        let args = self.tuple_items(args)?;
        let kwargs = self.dict_items(kwargs)?;
        let func_id = match func {
            Value::Ref(id) if matches!(self.heap.get(id), HeapData::Function(_)) => id,
            other => {
                return Err(ExcType::type_error(format!(
                    "MAKE_FRAME expects a function, got '{}'",
                    self.heap.type_name(other)
                )));
            }
        };
        let frame = self.make_frame(func_id, args, kwargs)?;
        let id = self.heap.allocate(HeapData::Frame(Some(Box::new(frame))))?;
        self.push(Value::Ref(id));
        Ok(())
    }

    /// ENTER_FRAME: `frame →`.
    pub(super) fn enter_frame_op(&mut self) -> RunResult<()> {
        let value = self.pop()?;
        let frame = match value {
            Value::Ref(id) => match self.heap.get_mut(id) {
                HeapData::Frame(slot) => slot.take(),
                _ => None,
            },
            _ => None,
        };
        let Some(frame) = frame else {
            return Err(RunError::internal("ENTER_FRAME expects a frame that was not entered yet"));
        };
        self.enter_frame(frame)
    }

    /// RETURN: pops the frame and delivers its single remaining value to the caller.
    pub(super) fn return_value(&mut self) -> RunResult<()> {
        let value = self.pop()?;
        let frame = self.thread.top();
        if frame.generator.is_some() {
            return self.gen_return(value);
        }
        if !frame.stack.is_empty() {
            return Err(RunError::internal(format!(
                "{}: RETURN with {} values left on the operand stack",
                frame.name(),
                frame.stack.len()
            )));
        }
        if self.thread.depth() < 2 {
            return Err(RunError::internal("RETURN from the halt frame"));
        }
        self.thread.frames.pop();
        self.tracer.on_return(self.thread.depth());
        self.deliver(value)
    }

    /// MAKE_FUNCTION: closes a code constant over the current globals and builtins.
    pub(super) fn make_function(&mut self, index: usize) -> RunResult<()> {
        let frame = self.thread.top();
        let (globals, builtins) = (frame.globals, frame.builtins);
        let Some(Constant::Code(code)) = frame.code.constants.get(index) else {
            return Err(RunError::internal("MAKE_FUNCTION operand is not a code constant"));
        };
        let code = Arc::clone(code);
        let mut defaults = Vec::with_capacity(code.arg_spec.params.len());
        for param in &code.arg_spec.params {
            defaults.push(match &param.default {
                Some(constant) => Some(constant_value(self.heap, Some(constant))?),
                None => None,
            });
        }
        let id = self.heap.allocate(HeapData::Function(Function {
            code,
            globals,
            builtins,
            defaults,
        }))?;
        self.push(Value::Ref(id));
        Ok(())
    }

    /// Copies the items of a positional-arguments tuple.
    fn tuple_items(&self, value: Value) -> RunResult<Vec<Value>> {
        match value {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Tuple(items) | HeapData::List(items) => Ok(items.clone()),
                _ => Err(RunError::internal("call arguments must be a tuple")),
            },
            _ => Err(RunError::internal("call arguments must be a tuple")),
        }
    }

    /// Copies the entries of a keyword-arguments dict.
    fn dict_items(&self, value: Value) -> RunResult<Dict> {
        match value {
            Value::Ref(id) => match self.heap.get(id) {
                HeapData::Dict(dict) => Ok(dict.clone()),
                _ => Err(RunError::internal("keyword arguments must be a dict")),
            },
            _ => Err(RunError::internal("keyword arguments must be a dict")),
        }
    }
}
