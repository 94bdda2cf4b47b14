use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use super::op::Op;

/// Compiled unit consumed by the engine.
///
/// Immutable after creation and shared by every frame instantiated from it. Handler
/// scopes are tracked dynamically with PUSH_HANDLER/POP_HANDLER, so there is no
/// exception table; each instruction carries its own source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code {
    pub name: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub first_line: u32,
    #[serde(default)]
    pub arg_spec: ArgSpec,
    #[serde(default)]
    pub constants: Vec<Constant>,
    pub instructions: Vec<Instruction>,
    /// Local variable names, for diagnostics only.
    #[serde(default)]
    pub local_names: Vec<String>,
}

/// One instruction: an opcode with its operand plus the source line it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    #[serde(flatten)]
    pub op: Op,
    #[serde(default)]
    pub line: u32,
}

/// A constant pool entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    /// A nested code object, materialized into a function by MAKE_FUNCTION.
    Code(Arc<Code>),
}

/// How a parameter may be supplied by a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    PositionalOnly,
    PositionalOrKeyword,
    KeywordOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default)]
    pub default: Option<Constant>,
}

impl Param {
    #[must_use]
    pub fn positional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::PositionalOrKeyword,
            default: None,
        }
    }

    #[must_use]
    pub fn positional_only(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::PositionalOnly,
            default: None,
        }
    }

    #[must_use]
    pub fn keyword_only(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParamKind::KeywordOnly,
            default: None,
        }
    }

    #[must_use]
    pub fn with_default(mut self, default: Constant) -> Self {
        self.default = Some(default);
        self
    }
}

/// Argument specification of a code object.
///
/// Parameters are ordered positional-only, then positional-or-keyword, then keyword-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgSpec {
    #[serde(default)]
    pub params: Vec<Param>,
    /// Name bound to the tuple of surplus positional arguments.
    #[serde(default)]
    pub var_args: Option<String>,
    /// Name bound to the dict of surplus keyword arguments.
    #[serde(default)]
    pub var_kwargs: Option<String>,
}

impl ArgSpec {
    #[must_use]
    pub fn new(params: Vec<Param>) -> Self {
        Self {
            params,
            var_args: None,
            var_kwargs: None,
        }
    }

    #[must_use]
    pub fn var_args(mut self, name: impl Into<String>) -> Self {
        self.var_args = Some(name.into());
        self
    }

    #[must_use]
    pub fn var_kwargs(mut self, name: impl Into<String>) -> Self {
        self.var_kwargs = Some(name.into());
        self
    }

    /// Number of parameters that accept positional arguments.
    #[must_use]
    pub fn positional_count(&self) -> usize {
        self.params.iter().filter(|p| p.kind != ParamKind::KeywordOnly).count()
    }
}

/// Reasons a code object is rejected at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The serialized form could not be parsed.
    Parse(String),
    /// A jump target points outside the instruction sequence.
    BadTarget { code: String, index: usize, target: usize },
    /// A constant index points outside the constant pool.
    BadConstant { code: String, index: usize, constant: usize },
    /// MAKE_FUNCTION references a constant that is not a code object.
    NotCode { code: String, index: usize },
    /// Parameters are not ordered positional-only, positional-or-keyword, keyword-only.
    ParamOrder { code: String },
    /// The code object has no instructions.
    Empty { code: String },
    /// Allocating the module's globals failed.
    Resource(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "invalid code object: {msg}"),
            Self::BadTarget { code, index, target } => {
                write!(f, "{code}: instruction {index} jumps to {target}, outside the code object")
            }
            Self::BadConstant { code, index, constant } => {
                write!(f, "{code}: instruction {index} references missing constant {constant}")
            }
            Self::NotCode { code, index } => {
                write!(f, "{code}: instruction {index} makes a function from a non-code constant")
            }
            Self::ParamOrder { code } => write!(f, "{code}: parameters are out of order"),
            Self::Empty { code } => write!(f, "{code}: no instructions"),
            Self::Resource(msg) => write!(f, "cannot load code object: {msg}"),
        }
    }
}

impl std::error::Error for LoadError {}

impl Code {
    /// Parses a code object from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, LoadError> {
        serde_json::from_str(json).map_err(|err| LoadError::Parse(err.to_string()))
    }

    /// Serializes the code object to pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Checks the static operand contract of this code object and every nested one.
    ///
    /// Jump targets and constant indices are validated here so the engine can treat
    /// violations it still meets at run time as faults rather than exceptions.
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.instructions.is_empty() {
            return Err(LoadError::Empty { code: self.name.clone() });
        }
        let ordered = self.arg_spec.params.windows(2).all(|pair| rank(pair[0].kind) <= rank(pair[1].kind));
        if !ordered {
            return Err(LoadError::ParamOrder { code: self.name.clone() });
        }
        for (index, instr) in self.instructions.iter().enumerate() {
            if let Some(target) = instr.op.target()
                && target >= self.instructions.len()
            {
                return Err(LoadError::BadTarget {
                    code: self.name.clone(),
                    index,
                    target,
                });
            }
            if let Some(constant) = instr.op.constant() {
                let Some(value) = self.constants.get(constant) else {
                    return Err(LoadError::BadConstant {
                        code: self.name.clone(),
                        index,
                        constant,
                    });
                };
                if matches!(instr.op, Op::MakeFunction { .. }) && !matches!(value, Constant::Code(_)) {
                    return Err(LoadError::NotCode {
                        code: self.name.clone(),
                        index,
                    });
                }
            }
        }
        for constant in &self.constants {
            if let Constant::Code(nested) = constant {
                nested.validate()?;
            }
        }
        Ok(())
    }
}

fn rank(kind: ParamKind) -> u8 {
    match kind {
        ParamKind::PositionalOnly => 0,
        ParamKind::PositionalOrKeyword => 1,
        ParamKind::KeywordOnly => 2,
    }
}
