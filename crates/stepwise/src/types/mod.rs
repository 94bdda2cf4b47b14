//! Object model: classes, functions, instances, generators and containers.

pub(crate) mod class;
pub(crate) mod dict;
pub(crate) mod function;
pub(crate) mod generator;
pub(crate) mod instance;

use strum::{Display, EnumString, IntoStaticStr};

pub(crate) use self::{
    class::ClassObject,
    dict::{Attrs, Dict, DictKey},
    function::{BoundMethod, Function},
    generator::Generator,
    instance::{Instance, SeqIterator},
};

/// Builtin classes the engine bootstraps into every interpreter.
///
/// The strum serialization is the class name as seen by programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub(crate) enum Type {
    #[strum(serialize = "object")]
    Object,
    #[strum(serialize = "type")]
    Type,
    NoneType,
    NotImplementedType,
    #[strum(serialize = "int")]
    Int,
    #[strum(serialize = "bool")]
    Bool,
    #[strum(serialize = "str")]
    Str,
    #[strum(serialize = "tuple")]
    Tuple,
    #[strum(serialize = "list")]
    List,
    #[strum(serialize = "dict")]
    Dict,
    #[strum(serialize = "function")]
    Function,
    #[strum(serialize = "builtin_function")]
    BuiltinFunction,
    #[strum(serialize = "method_descriptor")]
    MethodDescriptor,
    #[strum(serialize = "method")]
    Method,
    #[strum(serialize = "generator")]
    Generator,
    #[strum(serialize = "frame")]
    Frame,
    #[strum(serialize = "sequence_iterator")]
    SequenceIterator,
}

impl Type {
    /// Every builtin class, bases before subclasses.
    pub(crate) const ALL: [Self; 17] = [
        Self::Object,
        Self::Type,
        Self::NoneType,
        Self::NotImplementedType,
        Self::Int,
        Self::Bool,
        Self::Str,
        Self::Tuple,
        Self::List,
        Self::Dict,
        Self::Function,
        Self::BuiltinFunction,
        Self::MethodDescriptor,
        Self::Method,
        Self::Generator,
        Self::Frame,
        Self::SequenceIterator,
    ];

    #[must_use]
    pub fn base(self) -> Option<Self> {
        match self {
            Self::Object => None,
            Self::Bool => Some(Self::Int),
            _ => Some(Self::Object),
        }
    }

    /// Classes whose instances have a native layout and cannot come from NEW_INSTANCE.
    #[must_use]
    pub fn is_native(self) -> bool {
        !matches!(self, Self::Object)
    }
}
