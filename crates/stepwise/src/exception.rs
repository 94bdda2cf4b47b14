use std::{borrow::Cow, fmt};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Builtin exception classes known to the engine.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>` implementations.
/// The string representation matches the variant name exactly (e.g., `ValueError` -> "ValueError"),
/// which is also the name the class is registered under in the builtins mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ExcType {
    /// Root of the exception hierarchy.
    BaseException,
    /// Base class of every ordinary exception.
    Exception,
    TypeError,
    AttributeError,
    /// Raised by the iteration-next slot when an iterator is exhausted.
    StopIteration,
    ValueError,
    NameError,
    RuntimeError,
    /// Raised when a thread's frame stack exceeds the configured depth. Catchable.
    RecursionError,
    ZeroDivisionError,
    OverflowError,
    /// Raised when the allocation budget is exhausted. Never catchable.
    MemoryError,
    /// Raised when the instruction or time budget is exhausted. Never catchable.
    TimeoutError,
}

impl ExcType {
    /// Every builtin exception class in registration order.
    ///
    /// Bases always precede subclasses so the builtins bootstrap can compute each MRO
    /// from already-registered parents.
    pub(crate) const ALL: [Self; 13] = [
        Self::BaseException,
        Self::Exception,
        Self::TypeError,
        Self::AttributeError,
        Self::StopIteration,
        Self::ValueError,
        Self::NameError,
        Self::RuntimeError,
        Self::RecursionError,
        Self::ZeroDivisionError,
        Self::OverflowError,
        Self::MemoryError,
        Self::TimeoutError,
    ];

    /// Direct base class of this exception type, `None` for the root.
    #[must_use]
    pub(crate) fn base(self) -> Option<Self> {
        match self {
            Self::BaseException => None,
            Self::Exception => Some(Self::BaseException),
            Self::RecursionError => Some(Self::RuntimeError),
            _ => Some(Self::Exception),
        }
    }

    #[must_use]
    pub(crate) fn type_error(msg: impl fmt::Display) -> RunError {
        SimpleException::new_msg(Self::TypeError, msg).into()
    }

    #[must_use]
    pub(crate) fn attribute_error(type_name: &str, attr: &str) -> RunError {
        SimpleException::new_msg(
            Self::AttributeError,
            format!("'{type_name}' object has no attribute '{attr}'"),
        )
        .into()
    }

    #[must_use]
    pub(crate) fn name_error(name: &str) -> RunError {
        SimpleException::new_msg(Self::NameError, format!("name '{name}' is not defined")).into()
    }

    #[must_use]
    pub(crate) fn value_error(msg: impl fmt::Display) -> RunError {
        SimpleException::new_msg(Self::ValueError, msg).into()
    }

    /// Creates a TypeError for calling something that has no call slot.
    ///
    /// Matches the host language's format: `TypeError: 'int' object is not callable`
    #[must_use]
    pub(crate) fn not_callable(type_name: &str) -> RunError {
        Self::type_error(format!("'{type_name}' object is not callable"))
    }

    /// Creates a TypeError for an operator with no applicable slot on either side.
    #[must_use]
    pub(crate) fn unsupported_operands(op: &str, left: &str, right: &str) -> RunError {
        Self::type_error(format!(
            "unsupported operand type(s) for {op}: '{left}' and '{right}'"
        ))
    }
}

/// An engine-raised exception that has not been materialized on the heap yet.
///
/// Failures inside the engine and inside foreign functions are described with this
/// lightweight form; the unwinder turns it into a real exception instance before any
/// handler observes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SimpleException {
    exc_type: ExcType,
    arg: Option<String>,
}

impl SimpleException {
    #[must_use]
    pub fn new(exc_type: ExcType, arg: Option<String>) -> Self {
        Self { exc_type, arg }
    }

    #[must_use]
    pub fn new_msg(exc_type: ExcType, arg: impl fmt::Display) -> Self {
        Self {
            exc_type,
            arg: Some(arg.to_string()),
        }
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn arg(&self) -> Option<&str> {
        self.arg.as_deref()
    }
}

impl From<SimpleException> for Exception {
    fn from(exc: SimpleException) -> Self {
        Self {
            type_name: exc.exc_type.to_string(),
            message: exc.arg.unwrap_or_default(),
        }
    }
}

/// Runtime error propagated through the engine with `?`.
///
/// Every variant eventually reaches the unwinder, which decides whether handlers may see it.
#[derive(Debug, Clone)]
pub(crate) enum RunError {
    /// Malformed code: the instruction stream broke the operand contract.
    ///
    /// This faults the thread rather than unwinding, since no program-level handler can
    /// meaningfully recover from a translator bug.
    Internal(Cow<'static, str>),
    /// Catchable exception raised by the engine or a foreign function.
    Exc(SimpleException),
    /// Catchable exception carrying an arbitrary program value (RAISE/RERAISE).
    Raised(crate::value::Value),
    /// Resource-limit violation that skips every handler and terminates the thread.
    Uncatchable(SimpleException),
}

impl RunError {
    #[must_use]
    pub fn internal(msg: impl Into<Cow<'static, str>>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<SimpleException> for RunError {
    fn from(exc: SimpleException) -> Self {
        Self::Exc(exc)
    }
}

/// Owned description of an exception value, detached from the heap.
///
/// Returned to the embedding caller for uncaught exceptions and resource aborts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exception {
    /// Name of the exception's class, e.g. `TypeError` or a user-defined class name.
    pub type_name: String,
    /// First argument rendered as text, empty if the exception carried no arguments.
    pub message: String,
}

impl Exception {
    #[must_use]
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            f.write_str(&self.type_name)
        } else {
            write!(f, "{}: {}", self.type_name, self.message)
        }
    }
}

impl std::error::Error for Exception {}
