//! The instruction engine.
//!
//! A [`Thread`] is a stack of [`Frame`]s plus a cursor naming the next instruction of the
//! top frame. [`Vm::step`] fetches exactly one instruction, executes it, and funnels any
//! failure into the unwinder. Calls, returns, generator resumption and unwinding all work
//! by pushing and popping frames on the thread; the Rust call stack never grows with the
//! program's.
//!
//! The opcode families live in submodules:
//!
//! - `call` - CALL/FFI_CALL, MAKE_FRAME/ENTER_FRAME/RETURN, MAKE_FUNCTION
//! - `attr` - `load_special`, attribute load/store, class creation
//! - `binary` - operator trials and truth conversion
//! - `collections` - call-argument assembly helpers
//! - `exceptions` - handler stack, RAISE/RERAISE and unwinding
//! - `generator` - generators as suspended frames

mod attr;
mod binary;
mod call;
mod collections;
mod exceptions;
mod generator;

use std::sync::Arc;

use smallvec::SmallVec;

pub(crate) use self::call::CallResult;
use self::binary::BinaryTrials;
use crate::{
    builtins::Runtime,
    bytecode::{Code, Constant, Instruction, Op},
    exception::{ExcType, RunError, RunResult, SimpleException},
    heap::{Heap, HeapData, HeapId},
    interpreter::ThreadId,
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    types::{Attrs, Dict, DictKey},
    value::Value,
};

/// Lifecycle of a frame.
///
/// `Created → Executing → (Executing ⇄ Suspended) → Exhausted`; only generator frames
/// ever suspend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameState {
    Created,
    Executing,
    Suspended,
    Exhausted,
}

/// An installed exception handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Handler {
    /// Operand stack depth when the handler was pushed.
    pub depth: usize,
    pub target: usize,
}

/// How the consumer of a generator frame expects exhaustion to be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum ResumeMode {
    /// FOR_ITER: resume the consumer at its exit label with the return value.
    #[default]
    ForIter,
    /// A `__next__` call: raise StopIteration carrying the return value.
    Next,
}

/// Work a frame still has to do with the value its callee returns.
///
/// Queued on the calling frame when an instruction's protocol lands in a user-defined
/// function; [`Vm::deliver`] pops the newest one instead of pushing the value. A
/// continuation may itself call into user code, so they nest.
#[derive(Debug)]
pub(crate) enum Continuation {
    /// Remaining operator trials; a not-implemented result moves on to the next one.
    BinaryOp(BinaryTrials),
    /// The value is an operator slot bound by a user `__get__`; call it with `other`.
    OperatorSlot { other: Value, trials: BinaryTrials },
    /// The value must be a bool and is pushed as the TO_BOOL result.
    ToBool,
    /// The value is a `__bool__` slot bound by a user `__get__`.
    BoolSlot,
    /// The value is a call slot bound by a user `__get__`; retry the call with it.
    CallSlot { args: Vec<Value>, kwargs: Dict, budget: usize },
    /// The value is dropped (set-slot calls).
    Discard,
}

impl Continuation {
    fn collect_refs(&self, work_list: &mut Vec<HeapId>) {
        match self {
            Self::BinaryOp(trials) => trials.collect_refs(work_list),
            Self::OperatorSlot { other, trials } => {
                work_list.extend(other.ref_id());
                trials.collect_refs(work_list);
            }
            Self::CallSlot { args, kwargs, .. } => {
                work_list.extend(args.iter().filter_map(|v| v.ref_id()));
                for (key, value) in kwargs {
                    key.collect_ref(work_list);
                    work_list.extend(value.ref_id());
                }
            }
            Self::ToBool | Self::BoolSlot | Self::Discard => {}
        }
    }
}

/// One activation of a code object.
#[derive(Debug)]
pub(crate) struct Frame {
    pub stack: Vec<Value>,
    pub locals: Attrs,
    pub globals: Option<HeapId>,
    pub builtins: Option<HeapId>,
    pub code: Arc<Code>,
    pub state: FrameState,
    /// Index of the most recently fetched instruction; the frame resumes right after it.
    pub last: Option<usize>,
    /// Exit label of the FOR_ITER this frame is currently running.
    pub exit: Option<usize>,
    pub handlers: SmallVec<[Handler; 4]>,
    /// The generator owning this frame, if it was made one by MAKE_GEN or GET_ITER.
    pub generator: Option<HeapId>,
    pub resume: ResumeMode,
    pub pending: Vec<Continuation>,
}

impl Frame {
    pub fn new(code: Arc<Code>, globals: Option<HeapId>, builtins: Option<HeapId>, locals: Attrs) -> Self {
        Self {
            stack: Vec::new(),
            locals,
            globals,
            builtins,
            code,
            state: FrameState::Created,
            last: None,
            exit: None,
            handlers: SmallVec::new(),
            generator: None,
            resume: ResumeMode::default(),
            pending: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.code.name
    }

    /// Index the frame resumes at.
    fn resume_index(&self) -> usize {
        self.last.map_or(0, |last| last + 1)
    }

    /// Marks the frame exhausted and releases everything it was holding.
    fn exhaust(&mut self) {
        self.state = FrameState::Exhausted;
        self.stack = Vec::new();
        self.locals = Attrs::default();
        self.handlers.clear();
        self.pending.clear();
        self.exit = None;
    }

    pub(crate) fn collect_refs(&self, work_list: &mut Vec<HeapId>) {
        work_list.extend(self.stack.iter().filter_map(|v| v.ref_id()));
        work_list.extend(self.locals.values().filter_map(|v| v.ref_id()));
        work_list.extend(self.globals);
        work_list.extend(self.builtins);
        work_list.extend(self.generator);
        for pending in &self.pending {
            pending.collect_refs(work_list);
        }
    }
}

/// An ordered stack of frames and the cursor into the top one.
#[derive(Debug)]
pub(crate) struct Thread {
    frames: Vec<Box<Frame>>,
    /// Next instruction to fetch from the top frame.
    cursor: usize,
    /// The currently handled exception, exchanged by SWAP_EXCEPTION.
    handled: Value,
}

impl Thread {
    /// Creates a thread running `entry` above a halt frame.
    pub fn new(halt_code: Arc<Code>, mut entry: Frame) -> Self {
        let mut halt = Frame::new(halt_code, None, None, Attrs::default());
        halt.state = FrameState::Executing;
        entry.state = FrameState::Executing;
        Self {
            frames: vec![Box::new(halt), Box::new(entry)],
            cursor: 0,
            handled: Value::None,
        }
    }

    /// Number of frames, the halt frame included.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    fn top(&self) -> &Frame {
        self.frames.last().expect("Thread::top: no frames")
    }

    fn top_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("Thread::top_mut: no frames")
    }

    /// Drops every remaining frame; generator frames are parked back, exhausted.
    pub(crate) fn abandon(&mut self, heap: &mut Heap<impl ResourceTracker>) {
        while let Some(mut frame) = self.frames.pop() {
            if frame.generator.is_some() {
                frame.exhaust();
                generator::park(heap, frame);
            }
        }
    }

    pub(crate) fn collect_refs(&self, work_list: &mut Vec<HeapId>) {
        for frame in &self.frames {
            frame.collect_refs(work_list);
        }
        work_list.extend(self.handled.ref_id());
    }
}

/// Outcome of a single step.
#[derive(Debug)]
pub(crate) enum StepResult {
    Running,
    /// HALT executed; carries the value left on the halting frame.
    Returned(Value),
    /// An exception escaped every frame.
    Raised(Value),
    /// A resource limit terminated the thread.
    Aborted(SimpleException),
    /// The code broke the operand contract at source line `line`.
    Faulted { message: String, line: u32 },
}

/// Executes instructions of one thread against the shared heap.
pub(crate) struct Vm<'a, T: ResourceTracker, P: PrintWriter, Tr: VmTracer> {
    heap: &'a mut Heap<T>,
    thread: &'a mut Thread,
    thread_id: ThreadId,
    runtime: &'a Runtime,
    print: &'a mut P,
    tracer: &'a mut Tr,
}

impl<'a, T: ResourceTracker, P: PrintWriter, Tr: VmTracer> Vm<'a, T, P, Tr> {
    pub fn new(
        heap: &'a mut Heap<T>,
        thread: &'a mut Thread,
        thread_id: ThreadId,
        runtime: &'a Runtime,
        print: &'a mut P,
        tracer: &'a mut Tr,
    ) -> Self {
        Self {
            heap,
            thread,
            thread_id,
            runtime,
            print,
            tracer,
        }
    }

    /// Fetches and executes exactly one instruction.
    pub fn step(&mut self) -> StepResult {
        if let Err(err) = self.heap.tracker_mut().check_step() {
            return self.unwind(err.into());
        }
        let (code, index) = match self.fetch() {
            Ok(fetched) => fetched,
            Err(err) => return self.unwind(err),
        };
        let Instruction { op, line } = &code.instructions[index];
        self.tracer.on_instruction(
            self.thread_id,
            index,
            *line,
            op.name(),
            self.thread.top().stack.len(),
            self.thread.depth(),
        );
        match self.execute(op) {
            Ok(None) => StepResult::Running,
            Ok(Some(value)) => StepResult::Returned(value),
            Err(err) => self.unwind(err),
        }
    }

    /// Source line of the instruction the top frame executed last; 0 before the first.
    fn current_line(&self) -> u32 {
        self.thread
            .frames
            .last()
            .and_then(|frame| frame.last.and_then(|index| frame.code.instructions.get(index)))
            .map_or(0, |instruction| instruction.line)
    }

    /// Records the cursor as the top frame's `last` and advances it.
    fn fetch(&mut self) -> RunResult<(Arc<Code>, usize)> {
        let index = self.thread.cursor;
        let frame = self.thread.top_mut();
        if index >= frame.code.instructions.len() {
            return Err(RunError::internal(format!(
                "{}: execution ran past the last instruction",
                frame.code.name
            )));
        }
        frame.last = Some(index);
        let code = Arc::clone(&frame.code);
        self.thread.cursor = index + 1;
        Ok((code, index))
    }

    /// Executes one instruction; `Some` is the value of a HALT.
    fn execute(&mut self, op: &Op) -> RunResult<Option<Value>> {
        match op {
            Op::LoadConst { index } => {
                let value = self.load_constant(*index)?;
                self.push(value);
            }
            Op::LoadLocal { name } => {
                let value = self.thread.top().locals.get(name).copied();
                self.push(value.ok_or_else(|| ExcType::name_error(name))?);
            }
            Op::StoreLocal { name } => {
                let value = self.pop()?;
                self.thread.top_mut().locals.insert(name.clone(), value);
            }
            Op::LoadGlobal { name } => {
                let value = self.lookup_global(name).ok_or_else(|| ExcType::name_error(name))?;
                self.push(value);
            }
            Op::StoreGlobal { name } => {
                let value = self.pop()?;
                let Some(globals) = self.thread.top().globals else {
                    return Err(RunError::internal("STORE_GLOBAL in a frame without globals"));
                };
                match self.heap.get_mut(globals) {
                    HeapData::Dict(dict) => {
                        dict.insert(DictKey::Str(name.clone()), value);
                    }
                    _ => return Err(RunError::internal("globals is not a dict")),
                }
            }
            Op::LoadName { name } => {
                let local = self.thread.top().locals.get(name).copied();
                let value = local.or_else(|| self.lookup_global(name));
                self.push(value.ok_or_else(|| ExcType::name_error(name))?);
            }
            Op::PopTop => {
                self.pop()?;
            }
            Op::DupTop => {
                let value = self.peek()?;
                self.push(value);
            }
            Op::RotTwo => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(b);
                self.push(a);
            }
            Op::BuildTuple { count } => {
                let items = self.pop_n(*count)?;
                let tuple = self.heap.alloc_tuple(items)?;
                self.push(tuple);
            }
            Op::BuildList { count } => {
                let items = self.pop_n(*count)?;
                let list = self.heap.alloc_list(items)?;
                self.push(list);
            }
            Op::BuildDict => {
                let id = self.heap.allocate(HeapData::Dict(Dict::default()))?;
                self.push(Value::Ref(id));
            }
            Op::LoadAttr { name } => self.load_attr(name)?,
            Op::StoreAttr { name } => self.store_attr(name)?,
            Op::LoadSpecial { name } => self.load_special(name)?,
            Op::MakeFunction { index } => self.make_function(*index)?,
            Op::BuildClass { name } => self.build_class(name)?,
            Op::NewInstance => self.new_instance()?,
            Op::Call => self.call()?,
            Op::FfiCall { argc } => self.ffi_call(*argc)?,
            Op::MakeFrame => self.make_frame_op()?,
            Op::EnterFrame => self.enter_frame_op()?,
            Op::Return => self.return_value()?,
            Op::ListAppend => self.list_append()?,
            Op::ListExtend => self.list_extend()?,
            Op::ListToTuple => self.list_to_tuple()?,
            Op::DictInsertNoDuplicate => self.dict_insert_no_duplicate()?,
            Op::DictMergeNoDuplicate => self.dict_merge_no_duplicate()?,
            Op::MappingToDict => self.mapping_to_dict()?,
            Op::Type => {
                let value = self.pop()?;
                let class = self.heap.type_of(value);
                self.push(Value::Ref(class));
            }
            Op::Subtype => {
                let base = self.pop()?;
                let class = self.pop()?;
                let result = match (class, base) {
                    (Value::Ref(c), Value::Ref(b)) => crate::types::class::is_subclass(self.heap, c, b),
                    _ => false,
                };
                self.push(Value::Bool(result));
            }
            Op::Jump { target } => self.thread.cursor = *target,
            Op::Branch { way, target } => match self.pop()? {
                Value::Bool(b) => {
                    if b == *way {
                        self.thread.cursor = *target;
                    }
                }
                other => {
                    return Err(ExcType::type_error(format!(
                        "BRANCH expects a bool, got '{}'",
                        self.heap.type_name(other)
                    )));
                }
            },
            Op::ToBool => self.to_bool()?,
            Op::Halt => {
                let value = self.thread.top_mut().stack.pop().unwrap_or_default();
                return Ok(Some(value));
            }
            Op::PushHandler { target } => self.push_handler(*target),
            Op::PopHandler => self.pop_handler()?,
            Op::SwapException => {
                let value = self.pop()?;
                let previous = std::mem::replace(&mut self.thread.handled, value);
                self.push(previous);
            }
            Op::Raise => self.raise()?,
            Op::Reraise => return Err(RunError::Raised(self.pop()?)),
            Op::GetIter => self.get_iter()?,
            Op::ForIter { exit } => self.for_iter(*exit)?,
            Op::MakeGen => self.make_gen()?,
            Op::YieldValue => self.yield_value()?,
            Op::GenReturn => {
                let value = self.pop()?;
                self.gen_return(value)?;
            }
            Op::BinaryOp { forward, reflected } => self.binary_op(None, forward, reflected)?,
            Op::InplaceOp {
                inplace,
                forward,
                reflected,
            } => self.binary_op(Some(inplace), forward, reflected)?,
        }
        Ok(None)
    }

    fn push(&mut self, value: Value) {
        self.thread.top_mut().stack.push(value);
    }

    fn pop(&mut self) -> RunResult<Value> {
        self.thread
            .top_mut()
            .stack
            .pop()
            .ok_or_else(|| RunError::internal("operand stack underflow"))
    }

    fn peek(&self) -> RunResult<Value> {
        self.thread
            .top()
            .stack
            .last()
            .copied()
            .ok_or_else(|| RunError::internal("operand stack underflow"))
    }

    /// Pops `count` values, returned bottom-first.
    fn pop_n(&mut self, count: usize) -> RunResult<Vec<Value>> {
        let stack = &mut self.thread.top_mut().stack;
        let Some(start) = stack.len().checked_sub(count) else {
            return Err(RunError::internal("operand stack underflow"));
        };
        Ok(stack.split_off(start))
    }

    fn load_constant(&mut self, index: usize) -> RunResult<Value> {
        let code = Arc::clone(&self.thread.top().code);
        constant_value(self.heap, code.constants.get(index))
    }

    /// Looks `name` up in the frame's globals, then its builtins.
    fn lookup_global(&self, name: &str) -> Option<Value> {
        let frame = self.thread.top();
        let key = DictKey::from(name);
        [frame.globals, frame.builtins]
            .into_iter()
            .flatten()
            .find_map(|id| match self.heap.get(id) {
                HeapData::Dict(dict) => dict.get(&key).copied(),
                _ => None,
            })
    }

    /// The frame below the top, which a just-pushed callee returns into.
    fn caller_mut(&mut self) -> RunResult<&mut Frame> {
        let len = self.thread.frames.len();
        len.checked_sub(2)
            .and_then(|i| self.thread.frames.get_mut(i))
            .map(AsMut::as_mut)
            .ok_or_else(|| RunError::internal("no calling frame"))
    }

    /// Hands a value returned by a callee to the new top frame and resumes it.
    fn deliver(&mut self, value: Value) -> RunResult<()> {
        self.thread.cursor = self.thread.top().resume_index();
        self.resolve_pending(value)
    }

    /// Feeds `value` to the newest continuation of the top frame, or pushes it.
    fn resolve_pending(&mut self, value: Value) -> RunResult<()> {
        let Some(pending) = self.thread.top_mut().pending.pop() else {
            self.push(value);
            return Ok(());
        };
        match pending {
            Continuation::Discard => {}
            Continuation::ToBool => {
                let value = self.expect_bool(value)?;
                self.push(value);
            }
            Continuation::BoolSlot => self.call_bool_slot(value)?,
            Continuation::BinaryOp(trials) => {
                if value == Value::NotImplemented {
                    self.run_trials(trials)?;
                } else {
                    self.push(value);
                }
            }
            Continuation::OperatorSlot { other, trials } => self.call_trial(value, other, trials)?,
            Continuation::CallSlot { args, kwargs, budget } => {
                if let CallResult::Push(result) = self.call_bounded(value, args, kwargs, budget)? {
                    return self.resolve_pending(result);
                }
            }
        }
        Ok(())
    }
}

/// Materializes a constant pool entry.
fn constant_value(heap: &mut Heap<impl ResourceTracker>, constant: Option<&Constant>) -> RunResult<Value> {
    match constant {
        Some(Constant::None) => Ok(Value::None),
        Some(Constant::Bool(b)) => Ok(Value::Bool(*b)),
        Some(Constant::Int(i)) => Ok(Value::Int(*i)),
        Some(Constant::Str(s)) => Ok(heap.alloc_str(s.as_str())?),
        Some(Constant::Code(_)) => Err(RunError::internal("code constants are only valid for MAKE_FUNCTION")),
        None => Err(RunError::internal("constant index out of range")),
    }
}
