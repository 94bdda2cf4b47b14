//! Code objects and the instruction engine.
//!
//! # Module Structure
//!
//! - `op` - Opcode enum definitions and their operand contract
//! - `code` - Code object, argument specification and load-time validation
//! - `builder` - CodeBuilder for assembling code objects with labels
//! - `vm` - Frames, threads and the fetch/execute step

pub use builder::{BuildError, CodeBuilder, Label};
pub use code::{ArgSpec, Code, Constant, Instruction, LoadError, Param, ParamKind};
pub use op::Op;

mod builder;
mod code;
mod op;
pub(crate) mod vm;
