//! Tests for generators as suspended frames.
//!
//! A generator function starts with MAKE_GEN, which parks its frame and hands the
//! generator back to the caller. FOR_ITER and `__next__` push the parked frame onto the
//! consuming thread; YIELD_VALUE and GEN_RETURN park it again.

use pretty_assertions::assert_eq;
use stepwise::{
    ArgSpec, Code, CodeBuilder, Constant, Exception, Interpreter, InterpreterConfig, NoLimitTracker, NoPrint, Object,
    Op, Param, ThreadOutcome,
};

fn run(code: Code) -> ThreadOutcome {
    let mut interp = Interpreter::new(InterpreterConfig::seeded(0), NoLimitTracker).unwrap();
    let module = interp.load(code).unwrap();
    let thread = interp.spawn(module).unwrap();
    interp.run(&mut NoPrint);
    interp.outcome(thread).cloned().unwrap()
}

fn module(body: impl FnOnce(&mut CodeBuilder)) -> Code {
    let mut b = CodeBuilder::new("<module>");
    body(&mut b);
    b.build().unwrap()
}

/// A generator function named `name` whose body follows MAKE_GEN.
fn generator(name: &str, body: impl FnOnce(&mut CodeBuilder)) -> Code {
    let mut b = CodeBuilder::new(name);
    b.emit(Op::MakeGen);
    body(&mut b);
    b.build().unwrap()
}

/// `def counter(): yield 1; yield 2; yield 3`
fn counter() -> Code {
    generator("counter", |b| {
        for i in 1..=3 {
            b.load_const(Constant::Int(i));
            b.emit(Op::YieldValue);
        }
        b.load_const(Constant::None);
        b.emit(Op::Return);
    })
}

/// Emits `name = <function>`.
fn define(b: &mut CodeBuilder, code: Code) {
    let name = code.name.clone();
    b.make_function(code);
    b.store_global(&name);
}

/// Emits a loop adding every item of the iterable on the stack to global `total`, then
/// leaves `total` on the stack.
fn sum_loop(b: &mut CodeBuilder) {
    let top = b.label();
    let exit = b.label();
    b.load_const(Constant::Int(0));
    b.store_global("total");
    b.emit(Op::GetIter);
    b.bind(top);
    b.emit_for_iter(exit);
    b.load_global("total");
    b.binary_op("__add__", "__radd__");
    b.store_global("total");
    b.emit_jump(top);
    b.bind(exit);
    b.emit(Op::PopTop);
    b.emit(Op::PopTop);
    b.load_global("total");
}

/// Emits `g.__next__()` for global `g`.
fn next(b: &mut CodeBuilder) {
    b.load_global("g");
    b.load_attr("__next__");
    b.call_positional(0);
}

fn stop_iteration() -> Object {
    Object::Exception(Exception::new("StopIteration", ""))
}

// === FOR_ITER ===

#[test]
fn for_loop_visits_every_yielded_value() {
    let code = module(|b| {
        define(b, counter());
        b.load_global("counter");
        b.call_positional(0);
        sum_loop(b);
        b.emit(Op::Return);
    });
    assert_eq!(run(code), ThreadOutcome::Returned(Object::Int(6)));
}

/// The value of the generator's RETURN is on the stack at the loop exit.
#[test]
fn return_value_is_delivered_at_the_exit_label() {
    let code = module(|b| {
        let top = b.label();
        let exit = b.label();
        define(
            b,
            generator("seven", |b| {
                b.load_const(Constant::Int(7));
                b.emit(Op::Return);
            }),
        );
        b.load_global("seven");
        b.call_positional(0);
        b.bind(top);
        b.emit_for_iter(exit);
        b.emit(Op::PopTop);
        b.emit_jump(top);
        b.bind(exit);
        b.emit(Op::RotTwo);
        b.emit(Op::PopTop);
        b.emit(Op::Return);
    });
    assert_eq!(run(code), ThreadOutcome::Returned(Object::Int(7)));
}

/// Iterating an exhausted generator again exits immediately.
#[test]
fn exhausted_generator_stays_exhausted() {
    let code = module(|b| {
        define(b, counter());
        b.load_global("counter");
        b.call_positional(0);
        b.store_global("g");
        b.load_global("g");
        sum_loop(b);
        b.emit(Op::PopTop);
        b.load_global("g");
        sum_loop(b);
        b.emit(Op::Return);
    });
    assert_eq!(run(code), ThreadOutcome::Returned(Object::Int(0)));
}

/// Lists and strings are wrapped in an adapter generator by GET_ITER.
#[test]
fn sequences_iterate_through_the_adapter() {
    let code = module(|b| {
        for i in [1, 2, 3] {
            b.load_const(Constant::Int(i));
        }
        b.emit(Op::BuildList { count: 3 });
        sum_loop(b);
        b.load_const(Constant::Str(String::new()));
        b.store_global("joined");
        b.load_const(Constant::Str("abc".to_owned()));
        let top = b.label();
        let exit = b.label();
        b.emit(Op::GetIter);
        b.bind(top);
        b.emit_for_iter(exit);
        b.load_global("joined");
        b.emit(Op::RotTwo);
        b.binary_op("__add__", "__radd__");
        b.store_global("joined");
        b.emit_jump(top);
        b.bind(exit);
        b.emit(Op::PopTop);
        b.emit(Op::PopTop);
        b.load_global("joined");
        b.emit(Op::BuildTuple { count: 2 });
        b.emit(Op::Return);
    });
    assert_eq!(
        run(code),
        ThreadOutcome::Returned(Object::Tuple(vec![Object::Int(6), Object::String("abc".to_owned())]))
    );
}

/// A class with only `__next__` is iterated directly, its StopIteration ending the loop.
#[test]
fn bare_iterator_is_adapted() {
    let self_only = || ArgSpec::new(vec![Param::positional("self")]);
    let mut init = CodeBuilder::new("__init__").arg_spec(self_only());
    init.load_local("self");
    init.load_const(Constant::Int(0));
    init.store_attr("n");
    init.load_const(Constant::None);
    init.emit(Op::Return);

    let mut next = CodeBuilder::new("__next__").arg_spec(self_only());
    let more = next.label();
    next.load_local("self");
    next.load_attr("n");
    next.load_const(Constant::Int(3));
    next.binary_op("__eq__", "__eq__");
    next.emit_branch(false, more);
    next.load_global("StopIteration");
    next.emit(Op::Raise);
    next.bind(more);
    next.load_local("self");
    next.load_local("self");
    next.load_attr("n");
    next.load_const(Constant::Int(1));
    next.binary_op("__add__", "__radd__");
    next.store_attr("n");
    next.load_local("self");
    next.load_attr("n");
    next.emit(Op::Return);

    let methods = [init.build().unwrap(), next.build().unwrap()];
    let code = module(|b| {
        b.load_global("object");
        b.emit(Op::BuildTuple { count: 1 });
        b.emit(Op::BuildDict);
        for method in methods {
            b.load_const(Constant::Str(method.name.clone()));
            b.make_function(method);
            b.emit(Op::DictInsertNoDuplicate);
        }
        b.emit(Op::BuildClass { name: "Count".to_owned() });
        b.call_positional(0);
        sum_loop(b);
        b.emit(Op::Return);
    });
    assert_eq!(run(code), ThreadOutcome::Returned(Object::Int(6)));
}

#[test]
fn non_iterable_is_a_type_error() {
    let code = module(|b| {
        b.load_const(Constant::Int(5));
        b.emit(Op::GetIter);
        b.emit(Op::Return);
    });
    assert_eq!(
        run(code),
        ThreadOutcome::Raised(Exception::new("TypeError", "'int' object is not iterable"))
    );
}

// === __next__ ===

/// Each `__next__` resumes once; after exhaustion every call raises StopIteration.
#[test]
fn next_raises_stop_iteration_after_exhaustion() {
    let code = module(|b| {
        define(b, counter());
        b.load_global("counter");
        b.call_positional(0);
        b.store_global("g");
        b.emit(Op::BuildList { count: 0 });
        b.store_global("out");
        for _ in 0..5 {
            let caught = b.label();
            let append = b.label();
            b.load_global("out");
            b.load_attr("append");
            b.emit_push_handler(caught);
            next(b);
            b.emit(Op::PopHandler);
            b.emit_jump(append);
            b.bind(caught);
            b.bind(append);
            b.call_positional(1);
            b.emit(Op::PopTop);
        }
        b.load_global("out");
        b.emit(Op::Return);
    });
    assert_eq!(
        run(code),
        ThreadOutcome::Returned(Object::List(vec![
            Object::Int(1),
            Object::Int(2),
            Object::Int(3),
            stop_iteration(),
            stop_iteration(),
        ]))
    );
}

/// A non-None return value travels in the StopIteration raised at a `__next__` caller.
#[test]
fn next_carries_the_return_value() {
    let code = module(|b| {
        let caught = b.label();
        define(
            b,
            generator("seven", |b| {
                b.load_const(Constant::Int(7));
                b.emit(Op::Return);
            }),
        );
        b.load_global("seven");
        b.call_positional(0);
        b.store_global("g");
        b.emit_push_handler(caught);
        next(b);
        b.emit(Op::Return);
        b.bind(caught);
        b.load_attr("args");
        b.emit(Op::Return);
    });
    assert_eq!(run(code), ThreadOutcome::Returned(Object::Tuple(vec![Object::Int(7)])));
}

/// A generator resuming itself while running is rejected.
#[test]
fn self_resumption_is_rejected() {
    let code = module(|b| {
        define(
            b,
            generator("selfish", |b| {
                next(b);
                b.emit(Op::YieldValue);
                b.load_const(Constant::None);
                b.emit(Op::Return);
            }),
        );
        b.load_global("selfish");
        b.call_positional(0);
        b.store_global("g");
        next(b);
        b.emit(Op::Return);
    });
    assert_eq!(
        run(code),
        ThreadOutcome::Raised(Exception::new("ValueError", "generator already executing"))
    );
}

/// An exception escaping the generator frame reaches the consumer and exhausts the generator.
#[test]
fn exception_inside_generator_reaches_consumer() {
    let code = module(|b| {
        let first_handler = b.label();
        let second_handler = b.label();
        define(
            b,
            generator("faulty", |b| {
                b.load_const(Constant::Int(1));
                b.emit(Op::YieldValue);
                b.load_global("ValueError");
                b.load_const(Constant::Str("bad".to_owned()));
                b.call_positional(1);
                b.emit(Op::Raise);
            }),
        );
        b.load_global("faulty");
        b.call_positional(0);
        b.store_global("g");

        b.emit_push_handler(first_handler);
        next(b);
        b.store_global("first");
        next(b);
        b.emit(Op::Return);

        b.bind(first_handler);
        b.store_global("caught");
        b.emit_push_handler(second_handler);
        next(b);
        b.emit(Op::Return);

        b.bind(second_handler);
        b.store_global("after");
        b.load_global("first");
        b.load_global("caught");
        b.load_global("after");
        b.emit(Op::BuildTuple { count: 3 });
        b.emit(Op::Return);
    });
    assert_eq!(
        run(code),
        ThreadOutcome::Returned(Object::Tuple(vec![
            Object::Int(1),
            Object::Exception(Exception::new("ValueError", "bad")),
            stop_iteration(),
        ]))
    );
}

/// Generators are their own iterators.
#[test]
fn generator_iter_returns_itself() {
    let code = module(|b| {
        define(b, counter());
        b.load_global("counter");
        b.call_positional(0);
        b.store_global("g");
        b.load_global("g");
        b.load_attr("__iter__");
        b.call_positional(0);
        b.load_global("g");
        b.emit(Op::RotTwo);
        b.binary_op("__eq__", "__eq__");
        b.emit(Op::Return);
    });
    assert_eq!(run(code), ThreadOutcome::Returned(Object::Bool(true)));
}

/// MAKE_GEN is only valid in a frame that was called.
#[test]
fn make_gen_at_module_level_faults() {
    let code = module(|b| {
        b.emit(Op::MakeGen);
        b.load_const(Constant::None);
        b.emit(Op::Return);
    });
    assert_eq!(
        run(code),
        ThreadOutcome::Faulted {
            message: "MAKE_GEN outside a called frame".to_owned(),
            line: 1,
        }
    );
}
