//! Builder for assembling code objects.
//!
//! `CodeBuilder` emits instructions, manages forward jumps through labels that are
//! patched at build time, and tracks the current source line.

use std::{fmt, sync::Arc};

use super::{
    code::{ArgSpec, Code, Constant, Instruction},
    op::Op,
};

/// A jump destination that may be bound after instructions referencing it were emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

/// Builder for code objects.
///
/// # Usage
///
/// ```
/// use stepwise::{CodeBuilder, Constant, Op};
///
/// let mut b = CodeBuilder::new("<module>");
/// let done = b.label();
/// b.load_const(Constant::Bool(true));
/// b.emit_branch(false, done);
/// b.load_const(Constant::Int(1));
/// b.emit(Op::Return);
/// b.bind(done);
/// b.load_const(Constant::Int(2));
/// b.emit(Op::Return);
/// let code = b.build().unwrap();
/// assert_eq!(code.instructions.len(), 6);
/// ```
#[derive(Debug)]
pub struct CodeBuilder {
    name: String,
    filename: String,
    first_line: u32,
    arg_spec: ArgSpec,
    constants: Vec<Constant>,
    instructions: Vec<Instruction>,
    /// Bound position of each label, `None` until [`CodeBuilder::bind`] is called.
    labels: Vec<Option<usize>>,
    /// Instructions whose target must be patched, with the label they jump to.
    fixups: Vec<(usize, Label)>,
    current_line: u32,
}

/// Error returned by [`CodeBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// A label was referenced by an instruction but never bound.
    UnboundLabel { label: usize, instruction: usize },
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnboundLabel { label, instruction } => {
                write!(f, "label {label} used by instruction {instruction} was never bound")
            }
        }
    }
}

impl std::error::Error for BuildError {}

impl CodeBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filename: "<code>".to_owned(),
            first_line: 1,
            arg_spec: ArgSpec::default(),
            constants: Vec::new(),
            instructions: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            current_line: 1,
        }
    }

    #[must_use]
    pub fn filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    #[must_use]
    pub fn arg_spec(mut self, arg_spec: ArgSpec) -> Self {
        self.arg_spec = arg_spec;
        self
    }

    /// Sets the source line attached to subsequently emitted instructions.
    pub fn set_line(&mut self, line: u32) {
        if self.instructions.is_empty() {
            self.first_line = line;
        }
        self.current_line = line;
    }

    /// Adds a constant to the pool, reusing an equal entry, and returns its index.
    pub fn add_const(&mut self, constant: Constant) -> usize {
        if let Some(index) = self.constants.iter().position(|c| *c == constant) {
            return index;
        }
        self.constants.push(constant);
        self.constants.len() - 1
    }

    /// Emits an instruction and returns its index.
    pub fn emit(&mut self, op: Op) -> usize {
        self.instructions.push(Instruction {
            op,
            line: self.current_line,
        });
        self.instructions.len() - 1
    }

    /// Emits LOAD_CONST for `constant`.
    pub fn load_const(&mut self, constant: Constant) -> usize {
        let index = self.add_const(constant);
        self.emit(Op::LoadConst { index })
    }

    /// Emits MAKE_FUNCTION for a nested code object.
    pub fn make_function(&mut self, code: Code) -> usize {
        let index = self.add_const(Constant::Code(Arc::new(code)));
        self.emit(Op::MakeFunction { index })
    }

    pub fn load_local(&mut self, name: &str) -> usize {
        self.emit(Op::LoadLocal { name: name.to_owned() })
    }

    pub fn store_local(&mut self, name: &str) -> usize {
        self.emit(Op::StoreLocal { name: name.to_owned() })
    }

    pub fn load_global(&mut self, name: &str) -> usize {
        self.emit(Op::LoadGlobal { name: name.to_owned() })
    }

    pub fn store_global(&mut self, name: &str) -> usize {
        self.emit(Op::StoreGlobal { name: name.to_owned() })
    }

    pub fn load_attr(&mut self, name: &str) -> usize {
        self.emit(Op::LoadAttr { name: name.to_owned() })
    }

    pub fn store_attr(&mut self, name: &str) -> usize {
        self.emit(Op::StoreAttr { name: name.to_owned() })
    }

    pub fn load_special(&mut self, name: &str) -> usize {
        self.emit(Op::LoadSpecial { name: name.to_owned() })
    }

    /// Emits `BUILD_TUPLE argc; BUILD_DICT; CALL` for a callable followed by `argc`
    /// positional arguments on the stack. Returns the index of the CALL.
    pub fn call_positional(&mut self, argc: usize) -> usize {
        self.emit(Op::BuildTuple { count: argc });
        self.emit(Op::BuildDict);
        self.emit(Op::Call)
    }

    /// Emits BINARY_OP with the given forward and reflected slot names.
    pub fn binary_op(&mut self, forward: &str, reflected: &str) -> usize {
        self.emit(Op::BinaryOp {
            forward: forward.to_owned(),
            reflected: reflected.to_owned(),
        })
    }

    /// Creates a new unbound label.
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the position of the next emitted instruction.
    pub fn bind(&mut self, label: Label) {
        self.labels[label.0] = Some(self.instructions.len());
    }

    pub fn emit_jump(&mut self, label: Label) -> usize {
        self.emit_to(Op::Jump { target: 0 }, label)
    }

    pub fn emit_branch(&mut self, way: bool, label: Label) -> usize {
        self.emit_to(Op::Branch { way, target: 0 }, label)
    }

    pub fn emit_push_handler(&mut self, label: Label) -> usize {
        self.emit_to(Op::PushHandler { target: 0 }, label)
    }

    pub fn emit_for_iter(&mut self, label: Label) -> usize {
        self.emit_to(Op::ForIter { exit: 0 }, label)
    }

    fn emit_to(&mut self, op: Op, label: Label) -> usize {
        let index = self.emit(op);
        self.fixups.push((index, label));
        index
    }

    /// Resolves every label reference and produces the code object.
    ///
    /// Local names are collected from LOAD_LOCAL/STORE_LOCAL operands and the argument
    /// specification, in first-seen order.
    pub fn build(mut self) -> Result<Code, BuildError> {
        for &(instruction, label) in &self.fixups {
            let Some(target) = self.labels[label.0] else {
                return Err(BuildError::UnboundLabel {
                    label: label.0,
                    instruction,
                });
            };
            self.instructions[instruction].op.set_target(target);
        }

        let mut local_names: Vec<String> = Vec::new();
        let declared = self
            .arg_spec
            .params
            .iter()
            .map(|p| p.name.as_str())
            .chain(self.arg_spec.var_args.as_deref())
            .chain(self.arg_spec.var_kwargs.as_deref());
        let used = self.instructions.iter().filter_map(|instr| match &instr.op {
            Op::LoadLocal { name } | Op::StoreLocal { name } => Some(name.as_str()),
            _ => None,
        });
        for name in declared.chain(used) {
            if !local_names.iter().any(|n| n == name) {
                local_names.push(name.to_owned());
            }
        }

        Ok(Code {
            name: self.name,
            filename: self.filename,
            first_line: self.first_line,
            arg_spec: self.arg_spec,
            constants: self.constants,
            instructions: self.instructions,
            local_names,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::bytecode::code::Param;

    #[test]
    fn forward_and_backward_labels_resolve() {
        let mut b = CodeBuilder::new("loop");
        let top = b.label();
        let exit = b.label();
        b.bind(top);
        b.load_const(Constant::Bool(false));
        b.emit_branch(false, exit);
        b.emit_jump(top);
        b.bind(exit);
        b.emit(Op::Halt);
        let code = b.build().unwrap();
        assert_eq!(code.instructions[1].op, Op::Branch { way: false, target: 3 });
        assert_eq!(code.instructions[2].op, Op::Jump { target: 0 });
    }

    #[test]
    fn unbound_label_is_an_error() {
        let mut b = CodeBuilder::new("broken");
        let nowhere = b.label();
        b.emit_jump(nowhere);
        assert_eq!(
            b.build(),
            Err(BuildError::UnboundLabel {
                label: 0,
                instruction: 0
            })
        );
    }

    #[test]
    fn local_names_follow_parameters_then_use_order() {
        let mut b = CodeBuilder::new("f").arg_spec(ArgSpec::new(vec![Param::positional("a")]).var_args("rest"));
        b.load_const(Constant::Int(1));
        b.emit(Op::StoreLocal { name: "x".to_owned() });
        b.emit(Op::LoadLocal { name: "a".to_owned() });
        b.emit(Op::Return);
        let code = b.build().unwrap();
        assert_eq!(code.local_names, vec!["a", "rest", "x"]);
    }

    #[test]
    fn constants_are_deduplicated() {
        let mut b = CodeBuilder::new("c");
        let first = b.add_const(Constant::Int(3));
        let second = b.add_const(Constant::Int(3));
        assert_eq!(first, second);
    }
}
