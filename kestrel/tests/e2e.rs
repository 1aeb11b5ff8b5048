use std::sync::{Arc, Barrier};
use std::thread;

use compiler::{CompilationUnit, Phase};
use kestrel::{Shell, ShellError, with_program_stack};
use runtime::{Runtime, RuntimeConfig, RuntimeError, SiteState, Value};

fn eval(src: &str) -> Value {
    let shell = Shell::captured();
    match shell.evaluate("test.kst", src) {
        Ok(value) => value,
        Err(err) => panic!("evaluation failed: {err}"),
    }
}

fn strs(items: &[&str]) -> Value {
    Value::list(items.iter().map(|s| Value::str(*s)).collect())
}

#[test]
fn matching_catch_and_finally_run_once() {
    let value = eval(
        "\
class TypeA extends RuntimeException {}
class TypeB extends RuntimeException {}
def counter = 0
def caught = ''
try {
    throw new TypeA('boom')
} catch (TypeA e) {
    caught = 'A:' + e.message
} catch (TypeB e) {
    caught = 'B'
} finally {
    counter += 1
}
[caught, counter]
",
    );
    assert_eq!(value, Value::list(vec![Value::str("A:boom"), Value::Int(1)]));
}

#[test]
fn finally_runs_once_on_early_return() {
    let value = eval(
        "\
class Box {
    def hits = 0
    def f() {
        try {
            return 'early'
        } finally {
            hits += 1
        }
    }
}
def b = new Box()
def r = b.f()
[r, b.hits]
",
    );
    assert_eq!(value, Value::list(vec![Value::str("early"), Value::Int(1)]));
}

#[test]
fn uncaught_exceptions_reach_the_host() {
    let shell = Shell::captured();
    let err = shell
        .evaluate("t.kst", "throw new IllegalStateException('nope')")
        .unwrap_err();
    match err {
        ShellError::Runtime(e) => {
            assert_eq!(e.exception_class(), Some("IllegalStateException"));
            assert_eq!(e.to_string(), "IllegalStateException: nope");
        }
        other => panic!("unexpected {other}"),
    }
}

#[test]
fn declared_methods_beat_dynamic_ones() {
    let value = eval(
        "\
class Greeter {
    def foo() { 'declared' }
}
Greeter.addMethod('foo', { 'dynamic' })
Greeter.addMethod('bar', { 'dynamic' })
def g = new Greeter()
[g.foo(), g.bar()]
",
    );
    assert_eq!(value, strs(&["declared", "dynamic"]));
}

#[test]
fn pattern_methods_receive_the_matcher_first() {
    let value = eval(
        "\
class Bean {}
Bean.addPatternMethod('get(.*)', { m, v -> [m instanceof Matcher, m.group(1), v] })
new Bean().getFoo(42)
",
    );
    assert_eq!(
        value,
        Value::list(vec![Value::Bool(true), Value::str("Foo"), Value::Int(42)])
    );
}

#[test]
fn pattern_methods_without_the_extra_parameter_get_plain_arguments() {
    let value = eval(
        "\
class Bean {}
Bean.addPatternMethod('find.*', { v -> v * 2 })
new Bean().findAnything(21)
",
    );
    assert_eq!(value, Value::Int(42));
}

#[test]
fn failing_pattern_methods_name_their_pattern() {
    let value = eval(
        "\
class Bean {}
Bean.addPatternMethod('boom.*', { m -> throw new IllegalStateException('bad') })
def text = ''
try {
    new Bean().boomNow()
} catch (IllegalStateException e) {
    text = e.message
}
text
",
    );
    let text = value.as_str().unwrap_or_default().to_string();
    assert!(text.contains("/boom.*/"), "{text}");
    assert!(text.contains("bad"), "{text}");
}

#[test]
fn adding_a_method_invalidates_warm_call_sites() {
    let value = eval(
        "\
class T {}
T.addMethod('greet', { 'v1' })
def t = new T()
def seen = []
def i = 0
while (i < 4) {
    if (i == 2) {
        T.addMethod('greet', { 'v2' })
    }
    seen.add(t.greet())
    i += 1
}
seen
",
    );
    assert_eq!(value, strs(&["v1", "v1", "v2", "v2"]));
}

#[test]
fn removed_methods_stop_resolving() {
    let shell = Shell::captured();
    let err = shell
        .evaluate(
            "t.kst",
            "\
class T {}
T.addMethod('once', { 1 })
def t = new T()
t.once()
T.removeMethod('once')
t.once()
",
        )
        .unwrap_err();
    match err {
        ShellError::Runtime(RuntimeError::Dispatch(e)) => {
            assert_eq!(&*e.receiver, "T");
            assert_eq!(&*e.name, "once");
        }
        other => panic!("unexpected {other}"),
    }
}

#[test]
fn method_missing_catches_unknown_calls() {
    let value = eval(
        "\
class Ghost {
    def methodMissing(String name, args) { name + args.size() }
}
new Ghost().haunt(1, 2)
",
    );
    assert_eq!(value, Value::str("haunt2"));
}

#[test]
fn dispatch_errors_describe_the_call() {
    let value = eval(
        "\
class Person {}
def text = ''
try {
    new Person().fly(1, 'x')
} catch (MissingMethodException e) {
    text = e.message
}
text
",
    );
    assert_eq!(
        value,
        Value::str("No signature of method: Person.fly() is applicable for argument types: (Integer, String)")
    );
}

#[test]
fn most_specific_overload_wins() {
    let value = eval(
        "\
class Printer {
    def show(Object o) { 'object' }
    def show(String s) { 'string' }
    def show(Integer i) { 'integer' }
}
class Base {
    def who(x) { 'base' }
}
class Derived extends Base {
    def who(x) { 'derived' }
}
def p = new Printer()
[p.show('x'), p.show(1), p.show([1]), p.show(null), new Derived().who(1)]
",
    );
    assert_eq!(value, strs(&["string", "integer", "object", "object", "derived"]));
}

#[test]
fn call_sites_follow_receiver_shapes() {
    let src = "\
class A { def v() { 1 } }
class B { def v() { 2 } }
class C { def v() { 3 } }
def xs = [new A(), new B(), new C()]
def total = 0
for (x in xs) {
    total += x.v()
}
total
";
    for (limit, expected) in [(4, SiteState::Polymorphic(3)), (2, SiteState::Megamorphic)] {
        let runtime = Runtime::new(RuntimeConfig {
            polymorphic_limit: limit,
            ..RuntimeConfig::default()
        });
        let shell = Shell::new(Default::default(), runtime);
        let value = shell.evaluate("poly.kst", src).unwrap();
        assert_eq!(value, Value::Int(6));
        let script = shell.runtime().class("poly").unwrap();
        let run = script
            .method_infos()
            .iter()
            .find(|m| &*m.name == "run")
            .unwrap();
        let states: Vec<SiteState> = (0..run.body.code.call_sites)
            .filter_map(|i| run.body.call_site(i))
            .map(|s| s.state())
            .collect();
        assert!(states.contains(&expected), "limit {limit}: {states:?}");
    }
}

#[test]
fn concurrent_metaclass_requests_build_once() {
    let runtime = Runtime::default();
    runtime
        .load(compiler::compile_source("fresh.kst", "class Fresh {}").unwrap())
        .unwrap();
    let class = runtime.class("Fresh").unwrap();
    let threads = 8;
    let barrier = Barrier::new(threads);
    let metas: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    runtime.metaclass(&class)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(runtime.registry().build_count(), 1);
    assert!(metas.iter().all(|m| Arc::ptr_eq(m, &metas[0])));
}

#[test]
fn independent_units_compile_and_run_concurrently() {
    let runtime = Runtime::new(RuntimeConfig::default());
    let results: Vec<Value> = thread::scope(|s| {
        let handles: Vec<_> = (0..6)
            .map(|i| {
                let runtime = &runtime;
                s.spawn(move || {
                    let name = format!("worker{i}");
                    let src = format!("class Job{i} {{ def go() {{ {i} * 10 }} }}\nnew Job{i}().go()\n");
                    let classes = compiler::compile_source(&format!("{name}.kst"), &src).unwrap();
                    runtime.load(classes).unwrap();
                    runtime.run_script(&name).unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    let expected: Vec<Value> = (0..6).map(|i| Value::Int(i * 10)).collect();
    assert_eq!(results, expected);
}

#[test]
fn single_class_compiles_to_its_qualified_name() {
    let mut unit = CompilationUnit::default();
    unit.add_source_str("widget.kst", "package com.acme\nclass Widget {}\n");
    unit.compile(Phase::Output).unwrap();
    assert_eq!(unit.generated().len(), 1);
    assert_eq!(&*unit.generated()[0].name, "com.acme.Widget");

    let runtime = Runtime::default();
    runtime.load(unit.take_generated()).unwrap();
    let widget = runtime.class("com.acme.Widget").unwrap();
    assert_eq!(widget.simple_name(), "Widget");
}

#[test]
fn runaway_recursion_is_a_catchable_stack_overflow() {
    let (uncaught, caught) = with_program_stack(|| {
        let shell = Shell::captured();
        let src = "def down(n) { down(n + 1) }\ndown(0)\n";
        let uncaught = match shell.evaluate("deep.kst", src) {
            Err(ShellError::Runtime(RuntimeError::StackOverflow)) => true,
            _ => false,
        };
        let caught = Shell::captured()
            .evaluate(
                "deep.kst",
                "\
def down(n) { down(n + 1) }
def result = 'none'
try {
    down(0)
} catch (StackOverflowError e) {
    result = 'caught'
}
result
",
            )
            .ok();
        (uncaught, caught)
    })
    .unwrap();
    assert!(uncaught);
    assert_eq!(caught, Some(Value::str("caught")));
}

#[test]
fn program_output_is_captured() {
    let shell = Shell::captured();
    shell
        .evaluate("out.kst", "def name = 'world'\nprintln \"hello ${name}\"\nprint 1 / 2\n")
        .unwrap();
    assert_eq!(shell.runtime().output().take(), "hello world\n0.5");
}

#[test]
fn integer_overflow_raises_arithmetic_exception() {
    let value = eval(
        "\
def big = 9223372036854775807
def text = ''
try {
    big + 1
} catch (ArithmeticException e) {
    text = 'overflow'
}
text
",
    );
    assert_eq!(value, Value::str("overflow"));
}

#[test]
fn remainder_of_min_by_minus_one_is_zero() {
    let value = eval(
        "\
def a = -9223372036854775807 - 1
def b = -1
[a % b, 7 % b, -7 % 2]
",
    );
    assert_eq!(value, Value::list(vec![Value::Int(0), Value::Int(0), Value::Int(-1)]));
}

#[test]
fn closures_reject_missing_arguments_except_it() {
    let value = eval(
        "\
def pair = { a, b -> a }
def echo = { it }
def text = ''
try {
    pair(1)
} catch (MissingMethodException e) {
    text = 'rejected'
}
[text, pair(1, 2), echo(), echo(5)]
",
    );
    assert_eq!(
        value,
        Value::list(vec![Value::str("rejected"), Value::Int(1), Value::Null, Value::Int(5)])
    );
}

#[test]
fn large_and_infinite_floats_print_in_double_notation() {
    let shell = Shell::captured();
    shell
        .evaluate("floats.kst", "def big = 1.0\nbig = big * 10000000000 * 10000000000\nprintln big\nprintln 1.0 / 0\nprint \"${-1.0 / 0}\"\n")
        .unwrap();
    assert_eq!(shell.runtime().output().take(), "1.0E20\nInfinity\n-Infinity");
}
