//! Builtin classes and foreign functions.
//!
//! Every foreign function is a [`Builtins`] variant whose name encodes where it lives:
//! `"len"` goes into the builtins mapping, `"int.__add__"` into the namespace of `int`
//! as a method descriptor. [`bootstrap`] builds the class hierarchy from these names.

use std::{borrow::Cow, str::FromStr, sync::Arc};

use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::{
    bytecode::{ArgSpec, Code, CodeBuilder, Constant, Op, Param},
    exception::{ExcType, RunError, RunResult, SimpleException},
    heap::{Heap, HeapData, HeapId},
    io::PrintWriter,
    resource::ResourceTracker,
    types::{Attrs, BoundMethod, ClassObject, Dict, DictKey, Function, SeqIterator, Type},
    value::Value,
};

/// Foreign functions implemented in Rust.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, EnumIter)]
pub(crate) enum Builtins {
    #[strum(serialize = "print")]
    Print,
    #[strum(serialize = "len")]
    Len,
    #[strum(serialize = "isinstance")]
    Isinstance,
    #[strum(serialize = "repr")]
    Repr,

    #[strum(serialize = "object.__init__")]
    ObjectInit,
    #[strum(serialize = "object.__eq__")]
    ObjectEq,
    #[strum(serialize = "object.__ne__")]
    ObjectNe,

    #[strum(serialize = "int.__add__")]
    IntAdd,
    #[strum(serialize = "int.__radd__")]
    IntRadd,
    #[strum(serialize = "int.__sub__")]
    IntSub,
    #[strum(serialize = "int.__rsub__")]
    IntRsub,
    #[strum(serialize = "int.__mul__")]
    IntMul,
    #[strum(serialize = "int.__rmul__")]
    IntRmul,
    #[strum(serialize = "int.__floordiv__")]
    IntFloordiv,
    #[strum(serialize = "int.__rfloordiv__")]
    IntRfloordiv,
    #[strum(serialize = "int.__mod__")]
    IntMod,
    #[strum(serialize = "int.__rmod__")]
    IntRmod,
    #[strum(serialize = "int.__lt__")]
    IntLt,
    #[strum(serialize = "int.__le__")]
    IntLe,
    #[strum(serialize = "int.__gt__")]
    IntGt,
    #[strum(serialize = "int.__ge__")]
    IntGe,
    #[strum(serialize = "int.__eq__")]
    IntEq,
    #[strum(serialize = "int.__ne__")]
    IntNe,
    #[strum(serialize = "int.__bool__")]
    IntBool,

    #[strum(serialize = "NoneType.__bool__")]
    NoneBool,

    #[strum(serialize = "str.__add__")]
    StrAdd,
    #[strum(serialize = "str.__eq__")]
    StrEq,
    #[strum(serialize = "str.__ne__")]
    StrNe,
    #[strum(serialize = "str.__len__")]
    StrLen,
    #[strum(serialize = "str.__bool__")]
    StrBool,
    #[strum(serialize = "str.__iter__")]
    StrIter,

    #[strum(serialize = "tuple.__len__")]
    TupleLen,
    #[strum(serialize = "tuple.__bool__")]
    TupleBool,
    #[strum(serialize = "tuple.__iter__")]
    TupleIter,

    #[strum(serialize = "list.__len__")]
    ListLen,
    #[strum(serialize = "list.__bool__")]
    ListBool,
    #[strum(serialize = "list.__iter__")]
    ListIter,
    #[strum(serialize = "list.append")]
    ListAppend,

    #[strum(serialize = "dict.__len__")]
    DictLen,
    #[strum(serialize = "dict.__bool__")]
    DictBool,

    #[strum(serialize = "sequence_iterator.__iter__")]
    SeqIterIter,
    #[strum(serialize = "sequence_iterator.__next__")]
    SeqIterNext,

    #[strum(serialize = "function.__get__")]
    FunctionGet,
    #[strum(serialize = "method_descriptor.__get__")]
    MethodDescriptorGet,

    #[strum(serialize = "generator.__iter__")]
    GeneratorIter,
    /// Resumes the generator frame; handled by the engine since it pushes a frame.
    #[strum(serialize = "generator.__next__")]
    GeneratorNext,

    #[strum(serialize = "BaseException.__init__")]
    ExceptionInit,
}

impl Builtins {
    /// Qualified name, e.g. `int.__add__`.
    #[must_use]
    pub fn qualname(self) -> &'static str {
        self.into()
    }

    /// Name under which the function is registered.
    #[must_use]
    pub fn method_name(self) -> &'static str {
        let name = self.qualname();
        name.split_once('.').map_or(name, |(_, method)| method)
    }

    /// Name of the class owning this method, `builtins` for free functions.
    #[must_use]
    pub fn owner_name(self) -> &'static str {
        self.qualname().split_once('.').map_or("builtins", |(owner, _)| owner)
    }

    fn owner_class(self, heap: &Heap<impl ResourceTracker>) -> Option<HeapId> {
        let (owner, _) = self.qualname().split_once('.')?;
        if let Ok(t) = Type::from_str(owner) {
            Some(heap.builtin_class(t))
        } else {
            ExcType::from_str(owner).ok().map(|t| heap.exception_class(t))
        }
    }

    /// Whether this is a binary operator or comparison slot of `int`.
    fn is_int_binary(self) -> bool {
        matches!(
            self,
            Self::IntAdd
                | Self::IntRadd
                | Self::IntSub
                | Self::IntRsub
                | Self::IntMul
                | Self::IntRmul
                | Self::IntFloordiv
                | Self::IntRfloordiv
                | Self::IntMod
                | Self::IntRmod
                | Self::IntLt
                | Self::IntLe
                | Self::IntGt
                | Self::IntGe
                | Self::IntEq
                | Self::IntNe
        )
    }

    /// Invokes the foreign function with positional arguments only.
    pub fn call(self, heap: &mut Heap<impl ResourceTracker>, args: Vec<Value>, print: &mut impl PrintWriter) -> RunResult<Value> {
        if self.is_int_binary() {
            let [receiver, other] = self.arity(args)?;
            let a = self.int_receiver(heap, receiver)?;
            let Some(b) = other.as_int() else {
                return Ok(Value::NotImplemented);
            };
            return self.int_binary(a, b);
        }
        match self {
            Self::Print => {
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        print.stdout_push(' ').map_err(print_error)?;
                    }
                    print.stdout_write(Cow::Owned(heap.display(*arg))).map_err(print_error)?;
                }
                print.stdout_push('\n').map_err(print_error)?;
                Ok(Value::None)
            }
            Self::Len => {
                let [value] = self.arity(args)?;
                match sequence_len(heap, value) {
                    Some(len) => Ok(Value::Int(len)),
                    None => Err(ExcType::type_error(format!(
                        "object of type '{}' has no len()",
                        heap.type_name(value)
                    ))),
                }
            }
            Self::Isinstance => {
                let [value, classes] = self.arity(args)?;
                let class_ids: Vec<HeapId> = match classes {
                    Value::Ref(id) => match heap.get(id) {
                        HeapData::Class(_) => vec![id],
                        HeapData::Tuple(items) => items.iter().filter_map(|v| v.ref_id()).collect(),
                        _ => Vec::new(),
                    },
                    _ => Vec::new(),
                };
                if class_ids.is_empty() || class_ids.iter().any(|&id| !matches!(heap.get(id), HeapData::Class(_))) {
                    return Err(ExcType::type_error(
                        "isinstance() arg 2 must be a type or tuple of types",
                    ));
                }
                Ok(Value::Bool(class_ids.into_iter().any(|id| heap.is_instance(value, id))))
            }
            Self::Repr => {
                let [value] = self.arity(args)?;
                let text = heap.repr(value);
                Ok(heap.alloc_str(text)?)
            }
            Self::ObjectInit => {
                if args.len() == 1 {
                    Ok(Value::None)
                } else {
                    Err(ExcType::type_error(
                        "object.__init__() takes exactly one argument (the instance to initialize)",
                    ))
                }
            }
            Self::ObjectEq => {
                let [a, b] = self.arity(args)?;
                Ok(Value::Bool(a.is(b)))
            }
            Self::ObjectNe => {
                let [a, b] = self.arity(args)?;
                Ok(Value::Bool(!a.is(b)))
            }
            Self::IntBool => {
                let [value] = self.arity(args)?;
                Ok(Value::Bool(self.int_receiver(heap, value)? != 0))
            }
            Self::NoneBool => {
                let [_] = self.arity(args)?;
                Ok(Value::Bool(false))
            }
            Self::StrAdd | Self::StrEq | Self::StrNe => {
                let [receiver, other] = self.arity(args)?;
                let a = self.str_receiver(heap, receiver)?;
                let Some(b) = heap.as_str(other) else {
                    return Ok(Value::NotImplemented);
                };
                match self {
                    Self::StrEq => Ok(Value::Bool(a == b)),
                    Self::StrNe => Ok(Value::Bool(a != b)),
                    _ => {
                        let joined = format!("{a}{b}");
                        Ok(heap.alloc_str(joined)?)
                    }
                }
            }
            Self::StrLen | Self::TupleLen | Self::ListLen | Self::DictLen => {
                let [value] = self.arity(args)?;
                self.check_receiver(heap, value)?;
                Ok(Value::Int(sequence_len(heap, value).unwrap_or_default()))
            }
            Self::StrBool | Self::TupleBool | Self::ListBool | Self::DictBool => {
                let [value] = self.arity(args)?;
                self.check_receiver(heap, value)?;
                Ok(Value::Bool(sequence_len(heap, value).unwrap_or_default() != 0))
            }
            Self::StrIter | Self::TupleIter | Self::ListIter => {
                let [value] = self.arity(args)?;
                self.check_receiver(heap, value)?;
                let Value::Ref(source) = value else {
                    return Err(RunError::internal("sequence receiver is not a heap object"));
                };
                Ok(Value::Ref(heap.allocate(HeapData::SeqIterator(SeqIterator { source, index: 0 }))?))
            }
            Self::ListAppend => {
                let [list, item] = self.arity(args)?;
                self.check_receiver(heap, list)?;
                if let Value::Ref(id) = list
                    && let HeapData::List(items) = heap.get_mut(id)
                {
                    items.push(item);
                }
                Ok(Value::None)
            }
            Self::SeqIterIter | Self::GeneratorIter => {
                let [value] = self.arity(args)?;
                self.check_receiver(heap, value)?;
                Ok(value)
            }
            Self::SeqIterNext => {
                let [value] = self.arity(args)?;
                self.check_receiver(heap, value)?;
                seq_iter_next(heap, value)
            }
            Self::FunctionGet | Self::MethodDescriptorGet => {
                if !(2..=3).contains(&args.len()) {
                    return Err(ExcType::type_error(format!(
                        "{}() takes 2 or 3 arguments ({} given)",
                        self.qualname(),
                        args.len()
                    )));
                }
                let (func, instance) = (args[0], args[1]);
                if instance == Value::None {
                    return Ok(func);
                }
                let method = BoundMethod { receiver: instance, func };
                Ok(Value::Ref(heap.allocate(HeapData::BoundMethod(method))?))
            }
            Self::ExceptionInit => {
                let mut args = args.into_iter();
                let Some(receiver) = args.next() else {
                    return Err(ExcType::type_error("BaseException.__init__() needs an argument"));
                };
                let exc_args = heap.alloc_tuple(args.collect())?;
                match receiver {
                    Value::Ref(id) if matches!(heap.get(id), HeapData::Instance(_)) => {
                        if let HeapData::Instance(inst) = heap.get_mut(id) {
                            inst.attrs.insert("args".to_owned(), exc_args);
                        }
                        Ok(Value::None)
                    }
                    other => Err(self.wrong_receiver(heap, other)),
                }
            }
            Self::GeneratorNext => Err(RunError::internal("generator.__next__ must be resumed by the engine")),
            _ => Err(RunError::internal("unhandled foreign function")),
        }
    }

    fn arity<const N: usize>(self, args: Vec<Value>) -> RunResult<[Value; N]> {
        let given = args.len();
        args.try_into().map_err(|_| {
            let plural = if N == 1 { "" } else { "s" };
            ExcType::type_error(format!(
                "{}() takes exactly {N} argument{plural} ({given} given)",
                self.qualname()
            ))
        })
    }

    fn wrong_receiver(self, heap: &Heap<impl ResourceTracker>, receiver: Value) -> RunError {
        ExcType::type_error(format!(
            "descriptor '{}' requires a '{}' object but received a '{}'",
            self.method_name(),
            self.owner_name(),
            heap.type_name(receiver)
        ))
    }

    /// Checks the receiver is an instance of the method's owning class.
    fn check_receiver(self, heap: &Heap<impl ResourceTracker>, receiver: Value) -> RunResult<()> {
        match self.owner_class(heap) {
            Some(owner) if !heap.is_instance(receiver, owner) => Err(self.wrong_receiver(heap, receiver)),
            _ => Ok(()),
        }
    }

    fn int_receiver(self, heap: &Heap<impl ResourceTracker>, receiver: Value) -> RunResult<i64> {
        receiver.as_int().ok_or_else(|| self.wrong_receiver(heap, receiver))
    }

    fn str_receiver(self, heap: &Heap<impl ResourceTracker>, receiver: Value) -> RunResult<String> {
        heap.as_str(receiver)
            .map(str::to_owned)
            .ok_or_else(|| self.wrong_receiver(heap, receiver))
    }

    fn int_binary(self, a: i64, b: i64) -> RunResult<Value> {
        let result = match self {
            Self::IntAdd => a.checked_add(b),
            Self::IntRadd => b.checked_add(a),
            Self::IntSub => a.checked_sub(b),
            Self::IntRsub => b.checked_sub(a),
            Self::IntMul => a.checked_mul(b),
            Self::IntRmul => b.checked_mul(a),
            Self::IntFloordiv => floor_div(a, b)?,
            Self::IntRfloordiv => floor_div(b, a)?,
            Self::IntMod => floor_mod(a, b)?,
            Self::IntRmod => floor_mod(b, a)?,
            Self::IntLt => return Ok(Value::Bool(a < b)),
            Self::IntLe => return Ok(Value::Bool(a <= b)),
            Self::IntGt => return Ok(Value::Bool(a > b)),
            Self::IntGe => return Ok(Value::Bool(a >= b)),
            Self::IntEq => return Ok(Value::Bool(a == b)),
            Self::IntNe => return Ok(Value::Bool(a != b)),
            _ => return Err(RunError::internal("not an int operator")),
        };
        result
            .map(Value::Int)
            .ok_or_else(|| SimpleException::new_msg(ExcType::OverflowError, "integer overflow").into())
    }
}

fn print_error(err: crate::exception::Exception) -> RunError {
    let exc_type = ExcType::from_str(&err.type_name).unwrap_or(ExcType::RuntimeError);
    SimpleException::new_msg(exc_type, err.message).into()
}

fn zero_division() -> RunError {
    SimpleException::new_msg(ExcType::ZeroDivisionError, "integer division or modulo by zero").into()
}

/// Floor division rounding toward negative infinity.
fn floor_div(a: i64, b: i64) -> RunResult<Option<i64>> {
    if b == 0 {
        return Err(zero_division());
    }
    Ok(a.checked_div(b).map(|q| if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q }))
}

/// Modulo taking the sign of the divisor.
fn floor_mod(a: i64, b: i64) -> RunResult<Option<i64>> {
    if b == 0 {
        return Err(zero_division());
    }
    Ok(a.checked_rem(b).map(|r| if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }))
}

fn sequence_len(heap: &Heap<impl ResourceTracker>, value: Value) -> Option<i64> {
    let len = match heap.get(value.ref_id()?) {
        HeapData::Str(s) => s.chars().count(),
        HeapData::Tuple(items) | HeapData::List(items) => items.len(),
        HeapData::Dict(dict) => dict.len(),
        _ => return None,
    };
    i64::try_from(len).ok()
}

fn seq_iter_next(heap: &mut Heap<impl ResourceTracker>, iterator: Value) -> RunResult<Value> {
    enum Item {
        Char(char),
        Value(Value),
    }
    let Some(id) = iterator.ref_id() else {
        return Err(RunError::internal("iterator is not a heap object"));
    };
    let HeapData::SeqIterator(it) = heap.get(id) else {
        return Err(RunError::internal("iterator is not a sequence iterator"));
    };
    let (source, index) = (it.source, it.index);
    let item = match heap.get(source) {
        HeapData::Str(s) => s.chars().nth(index).map(Item::Char),
        HeapData::Tuple(items) | HeapData::List(items) => items.get(index).copied().map(Item::Value),
        _ => None,
    };
    let Some(item) = item else {
        return Err(SimpleException::new(ExcType::StopIteration, None).into());
    };
    if let HeapData::SeqIterator(it) = heap.get_mut(id) {
        it.index += 1;
    }
    match item {
        Item::Char(c) => Ok(heap.alloc_str(c.to_string())?),
        Item::Value(v) => Ok(v),
    }
}

/// Interpreter-wide objects created once by [`bootstrap`].
#[derive(Debug)]
pub(crate) struct Runtime {
    /// The shared builtins mapping.
    pub builtins: HeapId,
    /// Code of every thread's root frame: a single HALT.
    pub halt_code: Arc<Code>,
    /// Body of the adapter generator GET_ITER wraps around non-generator iterables.
    pub adapter_code: Arc<Code>,
    /// Index of the adapter's last prologue instruction; an adapter over a bare iterator
    /// starts suspended here so its first resumption enters the loop directly.
    pub adapter_prologue_end: usize,
}

/// Creates the builtin classes, the exception hierarchy and the builtins mapping.
pub(crate) fn bootstrap(heap: &mut Heap<impl ResourceTracker>) -> RunResult<Runtime> {
    let mut builtins = Dict::default();

    for t in Type::ALL {
        let base = t.base().map(|b| heap.builtin_class(b));
        let id = new_builtin_class(heap, t.to_string(), base, t.is_native())?;
        heap.register_builtin_class(t, id);
        builtins.insert(DictKey::from(<&str>::from(t)), Value::Ref(id));
    }
    for t in ExcType::ALL {
        let base = t.base().map(|b| heap.exception_class(b));
        let id = new_builtin_class(heap, t.to_string(), base, false)?;
        heap.register_exception_class(t, id);
        builtins.insert(DictKey::from(<&str>::from(t)), Value::Ref(id));
    }

    for builtin in Builtins::iter() {
        match builtin.owner_class(heap) {
            Some(class_id) => {
                let descriptor = heap.allocate(HeapData::MethodDescriptor(builtin))?;
                set_class_attr(heap, class_id, builtin.method_name(), Value::Ref(descriptor));
            }
            None => {
                let func = heap.allocate(HeapData::Builtin(builtin))?;
                builtins.insert(DictKey::from(builtin.method_name()), Value::Ref(func));
            }
        }
    }

    builtins.insert(DictKey::from("NotImplemented"), Value::NotImplemented);

    let builtins_id = heap.allocate(HeapData::Dict(builtins))?;

    let call_code = Arc::new(type_call_code()?);
    let defaults = vec![None; call_code.arg_spec.params.len()];
    let type_call = heap.allocate(HeapData::Function(Function {
        code: call_code,
        globals: None,
        builtins: Some(builtins_id),
        defaults,
    }))?;
    let type_class = heap.builtin_class(Type::Type);
    set_class_attr(heap, type_class, "__call__", Value::Ref(type_call));

    let mut halt = CodeBuilder::new("<halt>").filename("<builtins>");
    halt.emit(Op::Halt);
    let (adapter_code, adapter_prologue_end) = adapter_code()?;

    Ok(Runtime {
        builtins: builtins_id,
        halt_code: Arc::new(halt.build().map_err(build_error)?),
        adapter_code: Arc::new(adapter_code),
        adapter_prologue_end,
    })
}

fn new_builtin_class(
    heap: &mut Heap<impl ResourceTracker>,
    name: String,
    base: Option<HeapId>,
    native: bool,
) -> RunResult<HeapId> {
    let bases: Vec<HeapId> = base.into_iter().collect();
    let id = heap.allocate(HeapData::Class(ClassObject::new(name, bases, Attrs::default(), native)))?;
    // builtin hierarchies are single inheritance: the MRO is the base chain
    let mut mro = vec![id];
    if let Some(base) = base
        && let HeapData::Class(cls) = heap.get(base)
    {
        mro.extend_from_slice(cls.mro());
    }
    if let HeapData::Class(cls) = heap.get_mut(id) {
        cls.set_mro(mro);
    }
    Ok(id)
}

fn set_class_attr(heap: &mut Heap<impl ResourceTracker>, class_id: HeapId, name: &str, value: Value) {
    if let HeapData::Class(cls) = heap.get_mut(class_id) {
        cls.namespace_mut().insert(name.to_owned(), value);
    }
}

fn build_error(err: crate::bytecode::BuildError) -> RunError {
    RunError::internal(format!("builtin code failed to assemble: {err}"))
}

/// `type.__call__(cls, *args, **kwargs)`: allocate, run `__init__`, return the instance.
fn type_call_code() -> RunResult<Code> {
    let spec = ArgSpec::new(vec![Param::positional_only("cls")])
        .var_args("args")
        .var_kwargs("kwargs");
    let mut b = CodeBuilder::new("__call__").filename("<builtins>").arg_spec(spec);
    b.load_local("cls");
    b.emit(Op::NewInstance);
    b.store_local("self");
    b.load_local("self");
    b.load_attr("__init__");
    b.load_local("args");
    b.load_local("kwargs");
    b.emit(Op::Call);
    b.emit(Op::PopTop);
    b.load_local("self");
    b.emit(Op::Return);
    b.build().map_err(build_error)
}

/// Adapter generator body.
///
/// ```text
///     iterator = source.__iter__()
/// loop:
///     try: item = iterator.__next__()
///     except StopIteration: return None
///     yield item
/// ```
fn adapter_code() -> RunResult<(Code, usize)> {
    let mut b = CodeBuilder::new("<iterator>").filename("<builtins>");
    let top = b.label();
    let stop = b.label();
    let reraise = b.label();

    b.load_local("source");
    b.load_special("__iter__");
    b.call_positional(0);
    let prologue_end = b.store_local("iterator");

    b.bind(top);
    b.emit_push_handler(stop);
    b.load_local("iterator");
    b.load_special("__next__");
    b.call_positional(0);
    b.emit(Op::PopHandler);
    b.emit(Op::YieldValue);
    b.emit_jump(top);

    b.bind(stop);
    b.emit(Op::DupTop);
    b.emit(Op::Type);
    b.load_global("StopIteration");
    b.emit(Op::Subtype);
    b.emit_branch(false, reraise);
    b.emit(Op::PopTop);
    b.load_const(Constant::None);
    b.emit(Op::GenReturn);

    b.bind(reraise);
    b.emit(Op::Reraise);

    Ok((b.build().map_err(build_error)?, prologue_end))
}
