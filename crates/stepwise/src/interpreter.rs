//! Interpreter, scheduler and the embedding API.
//!
//! An [`Interpreter`] owns the heap, the builtins, every loaded module and every live
//! thread. Each call to [`Interpreter::step`] picks one runnable thread uniformly at random
//! and executes exactly one instruction on it, so instructions are the unit of atomicity
//! across threads. [`SharedInterpreter`] puts the whole interpreter behind one lock for
//! hosts that drive it from several OS threads.

use std::{fmt, sync::Arc};

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::{
    builtins::{Runtime, bootstrap},
    bytecode::{
        Code, LoadError,
        vm::{Frame, StepResult, Thread, Vm},
    },
    exception::{Exception, RunError},
    heap::{Heap, HeapData, HeapId},
    io::PrintWriter,
    object::Object,
    resource::{NoLimitTracker, ResourceTracker},
    tracer::{NoopTracer, VmTracer},
    types::{Attrs, Dict, DictKey},
    value::Value,
};

/// Identifies a thread for its whole lifetime, terminal state included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(usize);

impl ThreadId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Identifies a loaded code object and its globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleId(usize);

/// Terminal state of a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadOutcome {
    /// The thread executed HALT; carries the value left on the halting frame.
    Returned(Object),
    /// An exception escaped every frame.
    Raised(Exception),
    /// A resource budget terminated the thread.
    Aborted(Exception),
    /// The code broke the instruction operand contract at source line `line`.
    Faulted { message: String, line: u32 },
}

impl ThreadOutcome {
    /// Short name used in traces: `returned`, `raised`, `aborted` or `faulted`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Returned(_) => "returned",
            Self::Raised(_) => "raised",
            Self::Aborted(_) => "aborted",
            Self::Faulted { .. } => "faulted",
        }
    }
}

impl fmt::Display for ThreadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Returned(value) => write!(f, "returned {value}"),
            Self::Raised(exc) => write!(f, "raised {exc}"),
            Self::Aborted(exc) => write!(f, "aborted {exc}"),
            Self::Faulted { message, line } => write!(f, "faulted at line {line}: {message}"),
        }
    }
}

/// Why [`Interpreter::run`] stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Every thread reached a terminal state.
    Terminated,
    /// Threads remain but none of them is runnable.
    Deadlocked { parked: Vec<ThreadId> },
}

/// Interpreter-wide settings that are not resource limits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterpreterConfig {
    /// Seed of the scheduler's random choice; `None` seeds from OS entropy.
    pub seed: Option<u64>,
}

impl InterpreterConfig {
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self { seed: Some(seed) }
    }
}

#[derive(Debug)]
struct Module {
    code: Arc<Code>,
    globals: HeapId,
}

/// The abstract machine.
///
/// # Example
/// ```
/// use stepwise::{CodeBuilder, Constant, Interpreter, InterpreterConfig, NoLimitTracker, NoPrint, Object, Op, ThreadOutcome};
///
/// let mut b = CodeBuilder::new("<module>");
/// b.load_const(Constant::Int(41));
/// b.load_const(Constant::Int(1));
/// b.binary_op("__add__", "__radd__");
/// b.emit(Op::Return);
///
/// let mut interp = Interpreter::new(InterpreterConfig::seeded(0), NoLimitTracker).unwrap();
/// let module = interp.load(b.build().unwrap()).unwrap();
/// let thread = interp.spawn(module).unwrap();
/// interp.run(&mut NoPrint);
/// assert_eq!(interp.outcome(thread), Some(&ThreadOutcome::Returned(Object::Int(42))));
/// ```
#[derive(Debug)]
pub struct Interpreter<T: ResourceTracker = NoLimitTracker, Tr: VmTracer = NoopTracer> {
    heap: Heap<T>,
    runtime: Runtime,
    modules: Vec<Module>,
    threads: IndexMap<ThreadId, Thread>,
    /// Subset of `threads` the scheduler may pick from.
    runnable: IndexSet<ThreadId>,
    /// Thread of the previous step, for switch tracing.
    current: Option<ThreadId>,
    outcomes: IndexMap<ThreadId, ThreadOutcome>,
    next_thread: usize,
    rng: ChaCha8Rng,
    tracer: Tr,
}

impl<T: ResourceTracker> Interpreter<T, NoopTracer> {
    /// Creates an interpreter with the builtins bootstrapped and no threads.
    pub fn new(config: InterpreterConfig, tracker: T) -> Result<Self, Exception> {
        Self::with_tracer(config, tracker, NoopTracer)
    }
}

impl<T: ResourceTracker, Tr: VmTracer> Interpreter<T, Tr> {
    pub fn with_tracer(config: InterpreterConfig, tracker: T, tracer: Tr) -> Result<Self, Exception> {
        let mut heap = Heap::new(tracker);
        let runtime = bootstrap(&mut heap).map_err(bootstrap_error)?;
        let rng = config
            .seed
            .map_or_else(ChaCha8Rng::from_entropy, ChaCha8Rng::seed_from_u64);
        Ok(Self {
            heap,
            runtime,
            modules: Vec::new(),
            threads: IndexMap::new(),
            runnable: IndexSet::new(),
            current: None,
            outcomes: IndexMap::new(),
            next_thread: 0,
            rng,
            tracer,
        })
    }

    /// Validates `code` and gives it a fresh globals mapping.
    pub fn load(&mut self, code: Code) -> Result<ModuleId, LoadError> {
        code.validate()?;
        let globals = self
            .heap
            .allocate(HeapData::Dict(Dict::default()))
            .map_err(|err| LoadError::Resource(err.to_string()))?;
        self.modules.push(Module {
            code: Arc::new(code),
            globals,
        });
        Ok(ModuleId(self.modules.len() - 1))
    }

    /// Creates a runnable thread executing the module's code above a halt frame.
    ///
    /// Several threads may run the same module; they share its globals.
    pub fn spawn(&mut self, module: ModuleId) -> Result<ThreadId, Exception> {
        let Some(module) = self.modules.get(module.0) else {
            return Err(Exception::new("ValueError", "unknown module"));
        };
        let entry = Frame::new(
            Arc::clone(&module.code),
            Some(module.globals),
            Some(self.runtime.builtins),
            Attrs::default(),
        );
        let thread = Thread::new(Arc::clone(&self.runtime.halt_code), entry);
        let id = ThreadId(self.next_thread);
        self.next_thread += 1;
        self.threads.insert(id, thread);
        self.runnable.insert(id);
        Ok(id)
    }

    /// Executes one instruction on a randomly chosen runnable thread.
    ///
    /// Returns the thread that ran, or `None` when nothing is runnable.
    pub fn step(&mut self, print: &mut impl PrintWriter) -> Option<ThreadId> {
        if self.runnable.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..self.runnable.len());
        let id = *self.runnable.get_index(index)?;
        if self.current != Some(id) {
            self.tracer.on_thread_switch(id);
            self.current = Some(id);
        }
        let thread = self.threads.get_mut(&id)?;
        let result = Vm::new(&mut self.heap, thread, id, &self.runtime, print, &mut self.tracer).step();

        let outcome = match result {
            StepResult::Running => None,
            StepResult::Returned(value) => Some(ThreadOutcome::Returned(Object::from_value(&self.heap, value))),
            StepResult::Raised(value) => Some(ThreadOutcome::Raised(self.heap.exception_info(value))),
            StepResult::Aborted(exc) => Some(ThreadOutcome::Aborted(exc.into())),
            StepResult::Faulted { message, line } => Some(ThreadOutcome::Faulted { message, line }),
        };
        if let Some(outcome) = outcome {
            self.finish(id, outcome);
        }
        if self.heap.should_gc() {
            self.collect_garbage();
        }
        Some(id)
    }

    fn finish(&mut self, id: ThreadId, outcome: ThreadOutcome) {
        if let Some(mut thread) = self.threads.shift_remove(&id) {
            thread.abandon(&mut self.heap);
        }
        self.runnable.shift_remove(&id);
        self.tracer.on_thread_exit(id, outcome.kind());
        self.outcomes.insert(id, outcome);
    }

    /// Steps until no thread is runnable.
    pub fn run(&mut self, print: &mut impl PrintWriter) -> RunOutcome {
        while self.step(print).is_some() {}
        if self.threads.is_empty() {
            RunOutcome::Terminated
        } else {
            RunOutcome::Deadlocked {
                parked: self.threads.keys().copied().collect(),
            }
        }
    }

    /// Terminal state of a thread, `None` while it is still live.
    #[must_use]
    pub fn outcome(&self, thread: ThreadId) -> Option<&ThreadOutcome> {
        self.outcomes.get(&thread)
    }

    /// Every terminal state so far, in the order threads finished.
    pub fn outcomes(&self) -> impl Iterator<Item = (ThreadId, &ThreadOutcome)> {
        self.outcomes.iter().map(|(id, outcome)| (*id, outcome))
    }

    /// Whether the thread exists and has not reached a terminal state.
    #[must_use]
    pub fn is_live(&self, thread: ThreadId) -> bool {
        self.threads.contains_key(&thread)
    }

    /// Removes a live thread from the scheduler's choice until it is unparked.
    pub fn park(&mut self, thread: ThreadId) -> bool {
        self.threads.contains_key(&thread) && self.runnable.shift_remove(&thread)
    }

    /// Makes a parked thread runnable again.
    pub fn unpark(&mut self, thread: ThreadId) -> bool {
        self.threads.contains_key(&thread) && self.runnable.insert(thread)
    }

    /// Reads a module global.
    #[must_use]
    pub fn global(&self, module: ModuleId, name: &str) -> Option<Object> {
        let module = self.modules.get(module.0)?;
        let HeapData::Dict(dict) = self.heap.get(module.globals) else {
            return None;
        };
        let value = dict.get(&DictKey::from(name)).copied()?;
        Some(Object::from_value(&self.heap, value))
    }

    /// Runs a mark-sweep collection rooted at every thread, every module and the builtins.
    pub fn collect_garbage(&mut self) {
        let mut roots: Vec<HeapId> = vec![self.runtime.builtins];
        roots.extend(self.modules.iter().map(|m| m.globals));
        for thread in self.threads.values() {
            thread.collect_refs(&mut roots);
        }
        self.heap.collect_garbage(roots);
    }

    /// Number of live heap objects.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.heap.live_count()
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    #[must_use]
    pub fn into_tracer(self) -> Tr {
        self.tracer
    }

    #[must_use]
    pub fn tracker(&self) -> &T {
        self.heap.tracker()
    }

    #[cfg(test)]
    pub(crate) fn heap(&self) -> &Heap<T> {
        &self.heap
    }
}

fn bootstrap_error(err: RunError) -> Exception {
    match err {
        RunError::Exc(exc) | RunError::Uncatchable(exc) => exc.into(),
        RunError::Internal(msg) => Exception::new("RuntimeError", msg),
        RunError::Raised(_) => Exception::new("RuntimeError", "bootstrap raised a program value"),
    }
}

/// An [`Interpreter`] behind the global lock.
///
/// Every step holds the lock for exactly one instruction, so host threads driving the
/// same interpreter interleave at instruction granularity.
#[derive(Debug)]
pub struct SharedInterpreter<T: ResourceTracker = NoLimitTracker, Tr: VmTracer = NoopTracer>(
    Arc<Mutex<Interpreter<T, Tr>>>,
);

impl<T: ResourceTracker, Tr: VmTracer> Clone for SharedInterpreter<T, Tr> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: ResourceTracker, Tr: VmTracer> SharedInterpreter<T, Tr> {
    #[must_use]
    pub fn new(interpreter: Interpreter<T, Tr>) -> Self {
        Self(Arc::new(Mutex::new(interpreter)))
    }

    /// Takes the lock for one instruction.
    pub fn step(&self, print: &mut impl PrintWriter) -> Option<ThreadId> {
        self.0.lock().step(print)
    }

    /// Steps until nothing is runnable, releasing the lock between instructions.
    pub fn run(&self, print: &mut impl PrintWriter) -> RunOutcome {
        while self.step(print).is_some() {}
        let interp = self.0.lock();
        if interp.threads.is_empty() {
            RunOutcome::Terminated
        } else {
            RunOutcome::Deadlocked {
                parked: interp.threads.keys().copied().collect(),
            }
        }
    }

    /// Runs `f` with the lock held.
    pub fn with<R>(&self, f: impl FnOnce(&mut Interpreter<T, Tr>) -> R) -> R {
        f(&mut self.0.lock())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        bytecode::{CodeBuilder, Constant, Op},
        io::NoPrint,
    };

    fn constant_module(value: i64) -> Code {
        let mut b = CodeBuilder::new("<module>");
        b.load_const(Constant::Int(value));
        b.emit(Op::Return);
        b.build().unwrap()
    }

    #[test]
    fn thread_ids_display_with_prefix() {
        assert_eq!(ThreadId(3).to_string(), "t3");
    }

    #[test]
    fn collection_keeps_builtins_and_globals() {
        let mut interp = Interpreter::new(InterpreterConfig::seeded(1), NoLimitTracker).unwrap();
        let module = interp.load(constant_module(1)).unwrap();
        interp.collect_garbage();
        let after_first = interp.live_objects();
        interp.collect_garbage();
        assert_eq!(interp.live_objects(), after_first);
        assert!(interp.heap().is_live(interp.runtime.builtins));
        assert!(interp.heap().is_live(interp.modules[module.0].globals));
    }

    #[test]
    fn finished_threads_leave_the_scheduler() {
        let mut interp = Interpreter::new(InterpreterConfig::seeded(1), NoLimitTracker).unwrap();
        let module = interp.load(constant_module(5)).unwrap();
        let thread = interp.spawn(module).unwrap();
        assert_eq!(interp.run(&mut NoPrint), RunOutcome::Terminated);
        assert!(!interp.is_live(thread));
        assert_eq!(interp.outcome(thread), Some(&ThreadOutcome::Returned(Object::Int(5))));
    }
}
