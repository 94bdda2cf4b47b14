//! Tests for the general call protocol.
//!
//! Covers plain functions with defaults, class instantiation through `type.__call__`,
//! instances with a call slot, foreign functions, explicit MAKE_FRAME/ENTER_FRAME, and
//! the descriptor get/set slots honoured by attribute access.

use pretty_assertions::assert_eq;
use stepwise::{
    ArgSpec, Code, CodeBuilder, CollectStringPrint, Constant, Exception, Interpreter, InterpreterConfig,
    NoLimitTracker, Object, Op, Param, ThreadOutcome,
};

/// Runs `code` as the only thread of a fresh interpreter and returns its outcome with
/// everything it printed.
fn run(code: Code) -> (ThreadOutcome, String) {
    let mut interp = Interpreter::new(InterpreterConfig::seeded(0), NoLimitTracker).unwrap();
    let module = interp.load(code).unwrap();
    let thread = interp.spawn(module).unwrap();
    let mut print = CollectStringPrint::new();
    interp.run(&mut print);
    (interp.outcome(thread).cloned().unwrap(), print.into_output())
}

fn module(body: impl FnOnce(&mut CodeBuilder)) -> Code {
    let mut b = CodeBuilder::new("<module>");
    body(&mut b);
    b.build().unwrap()
}

fn function(name: &str, params: &[&str], body: impl FnOnce(&mut CodeBuilder)) -> Code {
    let spec = ArgSpec::new(params.iter().map(|p| Param::positional(*p)).collect());
    function_with(name, spec, body)
}

fn function_with(name: &str, spec: ArgSpec, body: impl FnOnce(&mut CodeBuilder)) -> Code {
    let mut b = CodeBuilder::new(name).arg_spec(spec);
    body(&mut b);
    b.build().unwrap()
}

/// Emits `name = <function>` at module level.
fn define_function(b: &mut CodeBuilder, code: Code) {
    let name = code.name.clone();
    b.make_function(code);
    b.store_global(&name);
}

/// Emits `class name(*bases)` with each code object as a method named after it.
fn define_class(b: &mut CodeBuilder, name: &str, bases: &[&str], methods: Vec<Code>) {
    for base in bases {
        b.load_global(base);
    }
    b.emit(Op::BuildTuple { count: bases.len() });
    b.emit(Op::BuildDict);
    for code in methods {
        b.load_const(Constant::Str(code.name.clone()));
        b.make_function(code);
        b.emit(Op::DictInsertNoDuplicate);
    }
    b.emit(Op::BuildClass { name: name.to_owned() });
    b.store_global(name);
}

/// `def f(a, b=10): return a + b`
fn add_with_default() -> Code {
    let spec = ArgSpec::new(vec![
        Param::positional("a"),
        Param::positional("b").with_default(Constant::Int(10)),
    ]);
    function_with("f", spec, |b| {
        b.load_local("a");
        b.load_local("b");
        b.binary_op("__add__", "__radd__");
        b.emit(Op::Return);
    })
}

fn type_error(message: &str) -> ThreadOutcome {
    ThreadOutcome::Raised(Exception::new("TypeError", message))
}

// === Functions ===

/// A missing argument is filled from the default captured by MAKE_FUNCTION.
#[test]
fn default_fills_missing_argument() {
    let code = module(|b| {
        define_function(b, add_with_default());
        b.load_global("f");
        b.load_const(Constant::Int(1));
        b.call_positional(1);
        b.emit(Op::Return);
    });
    assert_eq!(run(code).0, ThreadOutcome::Returned(Object::Int(11)));
}

/// Keyword arguments bind by name and override defaults.
#[test]
fn keyword_argument_overrides_default() {
    let code = module(|b| {
        define_function(b, add_with_default());
        b.load_global("f");
        b.load_const(Constant::Int(1));
        b.emit(Op::BuildTuple { count: 1 });
        b.emit(Op::BuildDict);
        b.load_const(Constant::Str("b".to_owned()));
        b.load_const(Constant::Int(5));
        b.emit(Op::DictInsertNoDuplicate);
        b.emit(Op::Call);
        b.emit(Op::Return);
    });
    assert_eq!(run(code).0, ThreadOutcome::Returned(Object::Int(6)));
}

/// Too many positional arguments fail in the binder before any frame is pushed.
#[test]
fn surplus_positionals_are_a_type_error() {
    let code = module(|b| {
        define_function(
            b,
            function("f", &["a", "b"], |b| {
                b.load_local("a");
                b.emit(Op::Return);
            }),
        );
        b.load_global("f");
        b.load_const(Constant::Int(1));
        b.load_const(Constant::Int(2));
        b.load_const(Constant::Int(3));
        b.call_positional(3);
        b.emit(Op::Return);
    });
    assert_eq!(
        run(code).0,
        type_error("f() takes 2 positional arguments but 3 were given")
    );
}

/// A value with no call slot is not callable.
#[test]
fn int_is_not_callable() {
    let code = module(|b| {
        b.load_const(Constant::Int(5));
        b.call_positional(0);
        b.emit(Op::Return);
    });
    assert_eq!(run(code).0, type_error("'int' object is not callable"));
}

// === Classes and call slots ===

/// `C(5).get()` runs `__init__` through `type.__call__` and binds `get` to the instance.
#[test]
fn class_call_runs_init_and_binds_methods() {
    let init = function("__init__", &["self", "x"], |b| {
        b.load_local("self");
        b.load_local("x");
        b.store_attr("x");
        b.load_const(Constant::None);
        b.emit(Op::Return);
    });
    let get = function("get", &["self"], |b| {
        b.load_local("self");
        b.load_attr("x");
        b.emit(Op::Return);
    });
    let code = module(|b| {
        define_class(b, "C", &["object"], vec![init, get]);
        b.load_global("C");
        b.load_const(Constant::Int(5));
        b.call_positional(1);
        b.load_attr("get");
        b.call_positional(0);
        b.emit(Op::Return);
    });
    assert_eq!(run(code).0, ThreadOutcome::Returned(Object::Int(5)));
}

/// An instance whose class defines `__call__` is callable; `object.__init__` is inherited.
#[test]
fn instance_call_slot_is_used() {
    let call = function("__call__", &["self", "y"], |b| {
        b.load_local("y");
        b.load_const(Constant::Int(1));
        b.binary_op("__add__", "__radd__");
        b.emit(Op::Return);
    });
    let code = module(|b| {
        define_class(b, "K", &["object"], vec![call]);
        b.load_global("K");
        b.call_positional(0);
        b.load_const(Constant::Int(41));
        b.call_positional(1);
        b.emit(Op::Return);
    });
    assert_eq!(run(code).0, ThreadOutcome::Returned(Object::Int(42)));
}

/// Instantiating a class without `__init__` arguments still rejects surplus arguments.
#[test]
fn object_init_rejects_arguments() {
    let code = module(|b| {
        define_class(b, "Plain", &["object"], Vec::new());
        b.load_global("Plain");
        b.load_const(Constant::Int(1));
        b.call_positional(1);
        b.emit(Op::Return);
    });
    assert_eq!(
        run(code).0,
        type_error("object.__init__() takes exactly one argument (the instance to initialize)")
    );
}

// === Foreign functions ===

/// FFI_CALL invokes a foreign function with stack arguments directly.
#[test]
fn ffi_call_runs_foreign_function() {
    let code = module(|b| {
        b.load_global("len");
        b.load_const(Constant::Str("abc".to_owned()));
        b.emit(Op::FfiCall { argc: 1 });
        b.emit(Op::Return);
    });
    assert_eq!(run(code).0, ThreadOutcome::Returned(Object::Int(3)));
}

/// Foreign functions reached through CALL accept positional arguments only.
#[test]
fn foreign_function_rejects_keywords() {
    let code = module(|b| {
        b.load_global("len");
        b.load_const(Constant::Str("abc".to_owned()));
        b.emit(Op::BuildTuple { count: 1 });
        b.emit(Op::BuildDict);
        b.load_const(Constant::Str("x".to_owned()));
        b.load_const(Constant::Int(1));
        b.emit(Op::DictInsertNoDuplicate);
        b.emit(Op::Call);
        b.emit(Op::Return);
    });
    assert_eq!(run(code).0, type_error("len() takes no keyword arguments"));
}

/// `print` writes through the interpreter's print writer.
#[test]
fn print_goes_to_the_writer() {
    let code = module(|b| {
        b.load_global("print");
        b.load_const(Constant::Str("hello".to_owned()));
        b.load_const(Constant::Int(3));
        b.call_positional(2);
        b.emit(Op::Return);
    });
    let (outcome, output) = run(code);
    assert_eq!(outcome, ThreadOutcome::Returned(Object::None));
    assert_eq!(output, "hello 3\n");
}

// === Explicit frames ===

/// MAKE_FRAME binds arguments into a frame object that ENTER_FRAME later runs.
#[test]
fn make_frame_then_enter_frame() {
    let code = module(|b| {
        define_function(b, add_with_default());
        b.load_global("f");
        b.load_const(Constant::Int(1));
        b.emit(Op::BuildTuple { count: 1 });
        b.emit(Op::BuildDict);
        b.emit(Op::MakeFrame);
        b.emit(Op::EnterFrame);
        b.emit(Op::Return);
    });
    assert_eq!(run(code).0, ThreadOutcome::Returned(Object::Int(11)));
}

/// MAKE_FRAME only accepts functions.
#[test]
fn make_frame_rejects_non_functions() {
    let code = module(|b| {
        b.load_global("len");
        b.emit(Op::BuildTuple { count: 0 });
        b.emit(Op::BuildDict);
        b.emit(Op::MakeFrame);
        b.emit(Op::Return);
    });
    assert_eq!(
        run(code).0,
        type_error("MAKE_FRAME expects a function, got 'builtin_function'")
    );
}

// === Descriptors ===

/// A class attribute whose type defines `__get__` is bound on both instance and class access.
#[test]
fn user_get_slot_applies_to_instance_and_class() {
    let getter = function("__get__", &["self", "instance", "owner"], |b| {
        b.load_const(Constant::Int(99));
        b.emit(Op::Return);
    });
    let code = module(|b| {
        define_class(b, "D", &["object"], vec![getter]);
        b.load_global("object");
        b.emit(Op::BuildTuple { count: 1 });
        b.emit(Op::BuildDict);
        b.load_const(Constant::Str("attr".to_owned()));
        b.load_global("D");
        b.call_positional(0);
        b.emit(Op::DictInsertNoDuplicate);
        b.emit(Op::BuildClass { name: "H".to_owned() });
        b.store_global("H");

        b.load_global("H");
        b.call_positional(0);
        b.load_attr("attr");
        b.load_global("H");
        b.load_attr("attr");
        b.emit(Op::BuildTuple { count: 2 });
        b.emit(Op::Return);
    });
    assert_eq!(
        run(code).0,
        ThreadOutcome::Returned(Object::Tuple(vec![Object::Int(99), Object::Int(99)]))
    );
}

/// STORE_ATTR on a data descriptor calls `__set__` instead of writing the instance dict.
#[test]
fn user_set_slot_intercepts_stores() {
    let setter = function("__set__", &["self", "instance", "value"], |b| {
        b.load_local("value");
        b.store_global("seen");
        b.load_const(Constant::Str("ignored".to_owned()));
        b.emit(Op::Return);
    });
    let code = module(|b| {
        define_class(b, "S", &["object"], vec![setter]);
        b.load_global("object");
        b.emit(Op::BuildTuple { count: 1 });
        b.emit(Op::BuildDict);
        b.load_const(Constant::Str("attr".to_owned()));
        b.load_global("S");
        b.call_positional(0);
        b.emit(Op::DictInsertNoDuplicate);
        b.emit(Op::BuildClass { name: "H".to_owned() });
        b.store_global("H");

        b.load_global("H");
        b.call_positional(0);
        b.load_const(Constant::Int(7));
        b.store_attr("attr");
        b.load_global("seen");
        b.emit(Op::Return);
    });
    assert_eq!(run(code).0, ThreadOutcome::Returned(Object::Int(7)));
}

/// A `__call__` held by a user descriptor is bound by its `__get__` frame, then called.
#[test]
fn call_slot_bound_by_user_get_slot() {
    let getter = function("__get__", &["self", "instance", "owner"], |b| {
        b.load_global("answer");
        b.emit(Op::Return);
    });
    let answer = function("answer", &[], |b| {
        b.load_const(Constant::Int(42));
        b.emit(Op::Return);
    });
    let code = module(|b| {
        define_function(b, answer);
        define_class(b, "D", &["object"], vec![getter]);
        b.load_global("object");
        b.emit(Op::BuildTuple { count: 1 });
        b.emit(Op::BuildDict);
        b.load_const(Constant::Str("__call__".to_owned()));
        b.load_global("D");
        b.call_positional(0);
        b.emit(Op::DictInsertNoDuplicate);
        b.emit(Op::BuildClass { name: "H".to_owned() });
        b.store_global("H");

        b.load_global("H");
        b.call_positional(0);
        b.call_positional(0);
        b.load_const(Constant::Int(1));
        b.binary_op("__add__", "__radd__");
        b.emit(Op::Return);
    });
    assert_eq!(run(code).0, ThreadOutcome::Returned(Object::Int(43)));
}

/// An exception raised by the `__get__` of a call slot reaches the caller's handler.
#[test]
fn call_slot_get_failure_is_catchable() {
    let getter = function("__get__", &["self", "instance", "owner"], |b| {
        b.load_global("ValueError");
        b.call_positional(0);
        b.emit(Op::Raise);
    });
    let code = module(|b| {
        let handler = b.label();
        define_class(b, "D", &["object"], vec![getter]);
        b.load_global("object");
        b.emit(Op::BuildTuple { count: 1 });
        b.emit(Op::BuildDict);
        b.load_const(Constant::Str("__call__".to_owned()));
        b.load_global("D");
        b.call_positional(0);
        b.emit(Op::DictInsertNoDuplicate);
        b.emit(Op::BuildClass { name: "H".to_owned() });
        b.store_global("H");

        b.emit_push_handler(handler);
        b.load_global("H");
        b.call_positional(0);
        b.call_positional(0);
        b.emit(Op::Return);
        b.bind(handler);
        b.emit(Op::PopTop);
        b.load_const(Constant::Str("caught".to_owned()));
        b.emit(Op::Return);
    });
    assert_eq!(
        run(code).0,
        ThreadOutcome::Returned(Object::String("caught".to_owned()))
    );
}

/// Missing attributes name the receiver's class.
#[test]
fn missing_attribute_is_reported() {
    let code = module(|b| {
        b.load_const(Constant::Int(1));
        b.load_attr("nope");
        b.emit(Op::Return);
    });
    assert_eq!(
        run(code).0,
        ThreadOutcome::Raised(Exception::new("AttributeError", "'int' object has no attribute 'nope'"))
    );
}
