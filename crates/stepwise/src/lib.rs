//! A small-step abstract machine for a dynamic, class-based object-oriented language.
//!
//! Code objects built with [`CodeBuilder`] (or loaded from JSON) are loaded into an
//! [`Interpreter`], which runs any number of threads one instruction at a time under a
//! random scheduler. Calls, attribute lookup with descriptors, operator dispatch,
//! exception unwinding and generators are all expressed as pushes and pops of frames on
//! a thread, so every observable effect happens at a single-instruction boundary.

mod builtins;
mod bytecode;
mod exception;
mod heap;
mod interpreter;
mod io;
mod object;
mod resource;
mod signature;
pub mod tracer;
mod types;
mod value;

pub use crate::{
    bytecode::{ArgSpec, BuildError, Code, CodeBuilder, Constant, Instruction, Label, LoadError, Op, Param, ParamKind},
    exception::{ExcType, Exception},
    interpreter::{
        Interpreter, InterpreterConfig, ModuleId, RunOutcome, SharedInterpreter, ThreadId, ThreadOutcome,
    },
    io::{CollectStringPrint, NoPrint, PrintWriter, StdPrint},
    object::Object,
    resource::{
        DEFAULT_GC_INTERVAL, DEFAULT_MAX_FRAME_DEPTH, LimitedTracker, NoLimitTracker, ResourceError, ResourceLimits,
        ResourceTracker,
    },
    tracer::{NoopTracer, RecordingTracer, StderrTracer, TraceEvent, VmTracer},
};
