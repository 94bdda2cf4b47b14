//! Opcode definitions.
//!
//! Instructions are data, not bytes: each [`Op`] variant carries its operand directly.
//! Jump-like operands are absolute instruction indices within the owning code object.
//!
//! Stack effects are written `inputs → outputs`, top of stack last.

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Op {
    // === Stack and names ===
    /// `→ value` from the code object's constant pool.
    LoadConst { index: usize },
    /// `→ value` from the frame's locals; NameError if unbound.
    LoadLocal { name: String },
    /// `value →` into the frame's locals.
    StoreLocal { name: String },
    /// `→ value` from globals, falling back to builtins.
    LoadGlobal { name: String },
    /// `value →` into globals.
    StoreGlobal { name: String },
    /// `→ value` from locals, then globals, then builtins.
    LoadName { name: String },
    /// `value →`
    PopTop,
    /// `value → value value`
    DupTop,
    /// `a b → b a`
    RotTwo,
    /// `v1 .. vn → tuple`
    BuildTuple { count: usize },
    /// `v1 .. vn → list`
    BuildList { count: usize },
    /// `→ {}`
    BuildDict,

    // === Attributes and classes ===
    /// `obj → value`: instance dict, the class's own MRO for class objects, then `load_special`.
    LoadAttr { name: String },
    /// `obj value →`: set-slot of a data descriptor, otherwise the object's own dict.
    StoreAttr { name: String },
    /// `obj → value`: pure MRO walk on the object's class with descriptor binding.
    LoadSpecial { name: String },
    /// `→ function` closing over the current frame's globals and builtins.
    MakeFunction { index: usize },
    /// `bases namespace → class`
    BuildClass { name: String },
    /// `class → instance` with no initializer run.
    NewInstance,

    // === Calls ===
    /// `callable args kwargs → result` through the general call protocol.
    Call,
    /// `builtin a1 .. an → result`
    FfiCall { argc: usize },
    /// `function args kwargs → frame`
    MakeFrame,
    /// `frame →` and control transfers into the frame.
    EnterFrame,
    /// `value →` and the value is handed to the caller.
    Return,

    // === Call-argument assembly ===
    /// `list value → list`
    ListAppend,
    /// `list iterable → list`
    ListExtend,
    /// `list → tuple`
    ListToTuple,
    /// `dict key value → dict`; TypeError if the key is already present.
    DictInsertNoDuplicate,
    /// `dict mapping → dict`; TypeError on the first duplicate key.
    DictMergeNoDuplicate,
    /// `mapping → dict` (a fresh copy).
    MappingToDict,

    // === Reflection ===
    /// `value → class`
    Type,
    /// `a b → bool`: `a` is a class whose MRO contains `b`.
    Subtype,

    // === Control flow ===
    Jump { target: usize },
    /// `bool →` and jump when the popped value equals `way`.
    Branch { way: bool, target: usize },
    /// `value → bool` through the boolean-conversion slot, true when absent.
    ToBool,
    /// Terminates the thread with the value on top of the stack, if any.
    Halt,

    // === Exceptions ===
    /// Records `(stack depth, target)` on the frame's handler stack.
    PushHandler { target: usize },
    PopHandler,
    /// `value → handled`: exchanges with the thread's handled-exception slot.
    SwapException,
    /// `exc →` with exception classes normalized to bare instances.
    Raise,
    /// `exc →` raised verbatim.
    Reraise,

    // === Generators ===
    /// `value → generator`
    GetIter,
    /// `gen → gen item`, or `gen → gen retval` at `exit` once exhausted.
    ForIter { exit: usize },
    /// Parks the current frame in a new generator handed to the caller.
    MakeGen,
    /// `value →` and the value is handed to the consumer.
    YieldValue,
    /// `value →` and the consumer resumes at its exit label.
    GenReturn,

    // === Operators ===
    /// `a b → result` trying `forward` on `a` and `reflected` on `b`.
    BinaryOp { forward: String, reflected: String },
    /// `a b → result` trying `inplace` on `a` first.
    InplaceOp {
        inplace: String,
        forward: String,
        reflected: String,
    },
}

impl Op {
    /// Name of the opcode as it appears in traces and serialized code.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Jump target carried by this instruction, if it has one.
    #[must_use]
    pub fn target(&self) -> Option<usize> {
        match self {
            Self::Jump { target } | Self::Branch { target, .. } | Self::PushHandler { target } => Some(*target),
            Self::ForIter { exit } => Some(*exit),
            _ => None,
        }
    }

    /// Rewrites the jump target; used by the builder when resolving labels.
    pub(crate) fn set_target(&mut self, new_target: usize) {
        match self {
            Self::Jump { target } | Self::Branch { target, .. } | Self::PushHandler { target } => *target = new_target,
            Self::ForIter { exit } => *exit = new_target,
            _ => {}
        }
    }

    /// Constant pool index referenced by this instruction, if any.
    #[must_use]
    pub(crate) fn constant(&self) -> Option<usize> {
        match self {
            Self::LoadConst { index } | Self::MakeFunction { index } => Some(*index),
            _ => None,
        }
    }
}
