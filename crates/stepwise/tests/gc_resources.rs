//! Tests for garbage collection and resource budgets.
//!
//! Collection is mark-sweep, rooted at the builtins, every module's globals and every live
//! thread. Budgets are checked per instruction, per allocation and per frame push.

use pretty_assertions::assert_eq;
use stepwise::{
    ArgSpec, Code, CodeBuilder, Constant, Exception, Interpreter, InterpreterConfig, LimitedTracker, NoLimitTracker,
    NoPrint, Object, Op, Param, ResourceLimits, ResourceTracker, ThreadOutcome,
};

fn run_with<T: ResourceTracker>(code: Code, tracker: T) -> ThreadOutcome {
    let mut interp = Interpreter::new(InterpreterConfig::seeded(0), tracker).unwrap();
    let module = interp.load(code).unwrap();
    let thread = interp.spawn(module).unwrap();
    interp.run(&mut NoPrint);
    interp.outcome(thread).cloned().unwrap()
}

/// A tracker that collects after every single allocation.
fn eager_gc() -> LimitedTracker {
    LimitedTracker::new(ResourceLimits::new().gc_interval(1))
}

/// Loop `n` times, building a throwaway list each time, then return `n`.
fn allocating_loop(n: i64) -> Code {
    let mut b = CodeBuilder::new("<module>");
    let top = b.label();
    let done = b.label();
    b.load_const(Constant::Int(0));
    b.store_local("i");
    b.bind(top);
    b.load_local("i");
    b.load_const(Constant::Int(n));
    b.binary_op("__lt__", "__gt__");
    b.emit_branch(false, done);
    b.load_local("i");
    b.load_local("i");
    b.emit(Op::BuildList { count: 2 });
    b.emit(Op::PopTop);
    b.load_local("i");
    b.load_const(Constant::Int(1));
    b.binary_op("__add__", "__radd__");
    b.store_local("i");
    b.emit_jump(top);
    b.bind(done);
    b.load_local("i");
    b.emit(Op::Return);
    b.build().unwrap()
}

/// `def counter(): yield 1; yield 2; yield 3` followed by a loop summing it into a list
/// held only by a global.
fn generator_program() -> Code {
    let mut gen_body = CodeBuilder::new("counter");
    gen_body.emit(Op::MakeGen);
    for i in 1..=3 {
        gen_body.load_const(Constant::Int(i));
        gen_body.emit(Op::YieldValue);
    }
    gen_body.load_const(Constant::None);
    gen_body.emit(Op::Return);

    let mut b = CodeBuilder::new("<module>");
    let top = b.label();
    let exit = b.label();
    b.make_function(gen_body.build().unwrap());
    b.store_global("counter");
    b.emit(Op::BuildList { count: 0 });
    b.store_global("seen");
    b.load_global("counter");
    b.call_positional(0);
    b.emit(Op::GetIter);
    b.bind(top);
    b.emit_for_iter(exit);
    b.load_global("seen");
    b.load_attr("append");
    b.emit(Op::RotTwo);
    b.call_positional(1);
    b.emit(Op::PopTop);
    b.emit_jump(top);
    b.bind(exit);
    b.emit(Op::PopTop);
    b.emit(Op::PopTop);
    b.load_global("seen");
    b.emit(Op::ListToTuple);
    b.emit(Op::Return);
    b.build().unwrap()
}

/// A class whose `__add__` builds a tuple of its operand, exercised through an instance.
fn user_operator_program() -> Code {
    let spec = ArgSpec::new(vec![Param::positional("self"), Param::positional("other")]);
    let mut add = CodeBuilder::new("__add__").arg_spec(spec);
    add.load_local("other");
    add.load_local("other");
    add.emit(Op::BuildTuple { count: 2 });
    add.emit(Op::Return);

    let mut b = CodeBuilder::new("<module>");
    b.load_global("object");
    b.emit(Op::BuildTuple { count: 1 });
    b.emit(Op::BuildDict);
    b.load_const(Constant::Str("__add__".to_owned()));
    b.make_function(add.build().unwrap());
    b.emit(Op::DictInsertNoDuplicate);
    b.emit(Op::BuildClass { name: "Pair".to_owned() });
    b.call_positional(0);
    b.load_const(Constant::Str("x".to_owned()));
    b.binary_op("__add__", "__radd__");
    b.emit(Op::Return);
    b.build().unwrap()
}

// === Garbage collection ===

/// Everything a finished thread allocated is reclaimed.
#[test]
fn finished_thread_leaves_no_garbage() {
    let mut interp = Interpreter::new(InterpreterConfig::seeded(0), NoLimitTracker).unwrap();
    let module = interp.load(allocating_loop(50)).unwrap();
    interp.collect_garbage();
    let baseline = interp.live_objects();

    let thread = interp.spawn(module).unwrap();
    interp.run(&mut NoPrint);
    assert_eq!(interp.outcome(thread), Some(&ThreadOutcome::Returned(Object::Int(50))));
    interp.collect_garbage();
    assert_eq!(interp.live_objects(), baseline);
}

/// Values reachable from module globals survive collection.
#[test]
fn globals_keep_values_alive() {
    let mut interp = Interpreter::new(InterpreterConfig::seeded(0), eager_gc()).unwrap();
    let module = interp.load(generator_program()).unwrap();
    let thread = interp.spawn(module).unwrap();
    interp.run(&mut NoPrint);
    interp.collect_garbage();
    let expected = Object::List(vec![Object::Int(1), Object::Int(2), Object::Int(3)]);
    assert_eq!(interp.global(module, "seen"), Some(expected));
    assert!(matches!(interp.outcome(thread), Some(ThreadOutcome::Returned(_))));
}

/// Suspended generator frames and pending operator frames are roots while in use.
#[test]
fn collecting_after_every_allocation_keeps_results_intact() {
    assert_eq!(
        run_with(generator_program(), eager_gc()),
        ThreadOutcome::Returned(Object::Tuple(vec![Object::Int(1), Object::Int(2), Object::Int(3)]))
    );
    let x = || Object::String("x".to_owned());
    assert_eq!(
        run_with(user_operator_program(), eager_gc()),
        ThreadOutcome::Returned(Object::Tuple(vec![x(), x()]))
    );
    assert_eq!(
        run_with(allocating_loop(30), eager_gc()),
        ThreadOutcome::Returned(Object::Int(30))
    );
}

// === Budgets ===

/// An instruction budget aborts the thread even inside a handler.
#[test]
fn instruction_budget_is_not_catchable() {
    let mut b = CodeBuilder::new("<module>");
    let handler = b.label();
    let top = b.label();
    b.emit_push_handler(handler);
    b.bind(top);
    b.emit_jump(top);
    b.bind(handler);
    b.emit(Op::Return);

    let tracker = LimitedTracker::new(ResourceLimits::new().max_instructions(1000));
    let ThreadOutcome::Aborted(exc) = run_with(b.build().unwrap(), tracker) else {
        panic!("expected the thread to be aborted");
    };
    assert_eq!(exc.type_name, "TimeoutError");
    assert!(exc.message.starts_with("instruction limit exceeded"), "{exc}");
}

#[test]
fn allocation_budget_aborts_with_memory_error() {
    let tracker = LimitedTracker::new(ResourceLimits::new().max_allocations(1000));
    let ThreadOutcome::Aborted(exc) = run_with(allocating_loop(100_000), tracker) else {
        panic!("expected the thread to be aborted");
    };
    assert_eq!(exc.type_name, "MemoryError");
}

/// Exceeding the frame depth raises an ordinary RecursionError the caller can handle.
#[test]
fn frame_depth_raises_catchable_recursion_error() {
    let mut recurse = CodeBuilder::new("f");
    recurse.load_global("f");
    recurse.call_positional(0);
    recurse.emit(Op::Return);

    let mut b = CodeBuilder::new("<module>");
    let handler = b.label();
    b.make_function(recurse.build().unwrap());
    b.store_global("f");
    b.emit_push_handler(handler);
    b.load_global("f");
    b.call_positional(0);
    b.emit(Op::Return);
    b.bind(handler);
    b.emit(Op::Return);

    let tracker = LimitedTracker::new(ResourceLimits::new().max_frame_depth(Some(20)));
    assert_eq!(
        run_with(b.build().unwrap(), tracker),
        ThreadOutcome::Returned(Object::Exception(Exception::new(
            "RecursionError",
            "maximum recursion depth exceeded"
        )))
    );
}

#[test]
fn unlimited_tracker_still_bounds_recursion() {
    let mut recurse = CodeBuilder::new("f");
    recurse.load_global("f");
    recurse.call_positional(0);
    recurse.emit(Op::Return);

    let mut b = CodeBuilder::new("<module>");
    b.make_function(recurse.build().unwrap());
    b.store_global("f");
    b.load_global("f");
    b.call_positional(0);
    b.emit(Op::Return);
    assert_eq!(
        run_with(b.build().unwrap(), NoLimitTracker),
        ThreadOutcome::Raised(Exception::new("RecursionError", "maximum recursion depth exceeded"))
    );
}
