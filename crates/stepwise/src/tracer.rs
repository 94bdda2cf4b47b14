//! Execution tracing for the instruction engine.
//!
//! Provides a trait-based tracing system with zero-cost abstraction.
//! When using [`NoopTracer`], all trace methods compile away entirely via monomorphization,
//! the same way [`NoLimitTracker`](crate::resource::NoLimitTracker) eliminates resource
//! checking overhead.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (default) |
//! | [`StderrTracer`] | Human-readable execution log to stderr |
//! | [`RecordingTracer`] | Full event recording for tests and post-mortem analysis |
//!
//! ```ignore
//! let mut interp = Interpreter::with_tracer(config, NoLimitTracker, StderrTracer::new());
//! ```

use crate::interpreter::ThreadId;

/// Trace event emitted during execution.
///
/// Used by [`RecordingTracer`] to capture a full execution trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// An instruction was fetched from the top frame of `thread`.
    Instruction {
        thread: ThreadId,
        /// Index of the instruction within its code object.
        index: usize,
        /// Source line the instruction was compiled from.
        line: u32,
        /// Opcode name, e.g. `LOAD_CONST`.
        op: &'static str,
        /// Operand stack depth of the top frame before execution.
        stack_depth: usize,
        /// Number of frames on the thread, halt frame included.
        frame_depth: usize,
    },
    /// A frame was pushed by a call or a generator resumption.
    Call { name: String, depth: usize },
    /// A frame was popped by RETURN (or MAKE_GEN handing a generator back).
    Return { depth: usize },
    /// A generator frame suspended itself with YIELD_VALUE.
    Yield { depth: usize },
    /// PUSH_HANDLER installed a handler; `depth` is the handler stack size after the push.
    HandlerPush { depth: usize },
    /// POP_HANDLER removed a handler; `depth` is the handler stack size after the pop.
    HandlerPop { depth: usize },
    /// An exception started unwinding.
    Unwind { exc_type: String, caught: bool },
    /// The scheduler picked a different thread than the previous step.
    ThreadSwitch { thread: ThreadId },
    /// A thread left the interpreter; `outcome` is `returned`, `raised`, `aborted` or `faulted`.
    ThreadExit { thread: ThreadId, outcome: &'static str },
}

/// Trait for execution tracing.
///
/// All methods have default no-op implementations, so [`NoopTracer`] requires
/// zero lines of code and compiles to zero instructions. Implementations only
/// override the hooks they care about.
pub trait VmTracer: std::fmt::Debug {
    /// Called before each instruction executes.
    ///
    /// This is the hottest hook, called for every single instruction.
    #[inline(always)]
    fn on_instruction(
        &mut self,
        _thread: ThreadId,
        _index: usize,
        _line: u32,
        _op: &'static str,
        _stack_depth: usize,
        _frame_depth: usize,
    ) {
    }

    /// Called when a frame is pushed onto a thread.
    ///
    /// # Arguments
    /// * `name` - Name of the code object the frame runs
    /// * `depth` - Frame stack depth after the push
    #[inline(always)]
    fn on_call(&mut self, _name: &str, _depth: usize) {}

    /// Called when a frame returns to its caller.
    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    /// Called when a generator frame yields to its consumer.
    #[inline(always)]
    fn on_yield(&mut self, _depth: usize) {}

    #[inline(always)]
    fn on_handler_push(&mut self, _depth: usize) {}

    #[inline(always)]
    fn on_handler_pop(&mut self, _depth: usize) {}

    /// Called once per unwind, after the search for a handler finished.
    ///
    /// # Arguments
    /// * `exc_type` - Class name of the exception value
    /// * `caught` - Whether a handler was found before the frame stack emptied
    #[inline(always)]
    fn on_unwind(&mut self, _exc_type: &str, _caught: bool) {}

    #[inline(always)]
    fn on_thread_switch(&mut self, _thread: ThreadId) {}

    #[inline(always)]
    fn on_thread_exit(&mut self, _thread: ThreadId, _outcome: &'static str) {}
}

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Tracer that prints a human-readable execution log to stderr.
///
/// Output format:
/// ```text
/// [t0     0] LOAD_CONST            line=1  stack=0  frames=2
/// [t0     1] CALL                  line=1  stack=3  frames=2
///   >>> CALL f                    depth=3
///   <<< RETURN                    depth=2
///   !!! UNWIND ValueError         caught
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Maximum number of instructions to trace before going quiet. None = unlimited.
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stderr tracer that stops after `limit` instructions.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

impl VmTracer for StderrTracer {
    #[inline]
    fn on_instruction(
        &mut self,
        thread: ThreadId,
        index: usize,
        line: u32,
        op: &'static str,
        stack_depth: usize,
        frame_depth: usize,
    ) {
        if self.stopped {
            return;
        }
        eprintln!("[{thread} {index:>5}] {op:<20}  line={line}  stack={stack_depth}  frames={frame_depth}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} instructions) ---");
            self.stopped = true;
        }
    }

    fn on_call(&mut self, name: &str, depth: usize) {
        if !self.stopped {
            eprintln!("  >>> CALL {name:<20} depth={depth}");
        }
    }

    fn on_return(&mut self, depth: usize) {
        if !self.stopped {
            eprintln!("  <<< RETURN                    depth={depth}");
        }
    }

    fn on_yield(&mut self, depth: usize) {
        if !self.stopped {
            eprintln!("  <<< YIELD                     depth={depth}");
        }
    }

    fn on_unwind(&mut self, exc_type: &str, caught: bool) {
        if !self.stopped {
            let status = if caught { "caught" } else { "uncaught" };
            eprintln!("  !!! UNWIND {exc_type:<18} {status}");
        }
    }

    fn on_thread_switch(&mut self, thread: ThreadId) {
        if !self.stopped {
            eprintln!("--- switch to {thread} ---");
        }
    }

    fn on_thread_exit(&mut self, thread: ThreadId, outcome: &'static str) {
        eprintln!("--- {thread} exited: {outcome} ---");
    }
}

/// Tracer that records every event for later inspection.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    /// Whether per-instruction events are recorded; they dominate the log otherwise.
    instructions: bool,
}

impl RecordingTracer {
    /// Creates a recorder that captures every event, instructions included.
    #[must_use]
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            instructions: true,
        }
    }

    /// Creates a recorder that skips per-instruction events.
    #[must_use]
    pub fn without_instructions() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }
}

impl VmTracer for RecordingTracer {
    fn on_instruction(
        &mut self,
        thread: ThreadId,
        index: usize,
        line: u32,
        op: &'static str,
        stack_depth: usize,
        frame_depth: usize,
    ) {
        if self.instructions {
            self.events.push(TraceEvent::Instruction {
                thread,
                index,
                line,
                op,
                stack_depth,
                frame_depth,
            });
        }
    }

    fn on_call(&mut self, name: &str, depth: usize) {
        self.events.push(TraceEvent::Call {
            name: name.to_owned(),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.events.push(TraceEvent::Return { depth });
    }

    fn on_yield(&mut self, depth: usize) {
        self.events.push(TraceEvent::Yield { depth });
    }

    fn on_handler_push(&mut self, depth: usize) {
        self.events.push(TraceEvent::HandlerPush { depth });
    }

    fn on_handler_pop(&mut self, depth: usize) {
        self.events.push(TraceEvent::HandlerPop { depth });
    }

    fn on_unwind(&mut self, exc_type: &str, caught: bool) {
        self.events.push(TraceEvent::Unwind {
            exc_type: exc_type.to_owned(),
            caught,
        });
    }

    fn on_thread_switch(&mut self, thread: ThreadId) {
        self.events.push(TraceEvent::ThreadSwitch { thread });
    }

    fn on_thread_exit(&mut self, thread: ThreadId, outcome: &'static str) {
        self.events.push(TraceEvent::ThreadExit { thread, outcome });
    }
}
