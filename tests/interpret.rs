use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use lox::{Error, VM};

/// Writer handing the interpreter's output back to the test.
#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn run(src: &str) -> (Result<(), Error>, String) {
    let buf = SharedBuf::default();
    let mut vm = VM::with_output(Box::new(buf.clone()));
    let result = vm.interpret(src);
    let output = String::from_utf8(buf.0.borrow().clone()).expect("Output must be UTF-8.");
    (result, output)
}

fn assert_prints(src: &str, expected: &str) {
    let (result, output) = run(src);
    assert!(result.is_ok(), "program failed, output so far: {output:?}");
    assert_eq!(output, expected);
}

#[test]
fn arithmetic_and_falsiness() {
    assert_prints("print 1 + 2 * 3; print !nil; print !!0;", "7\ntrue\ntrue\n");
}

#[test]
fn number_printing_drops_trailing_zero() {
    assert_prints(
        "print 3.0; print 0.1; print -0.5; print 9007199254740992;",
        "3\n0.1\n-0.5\n9007199254740992\n",
    );
}

#[test]
fn string_concatenation_and_interning() {
    assert_prints("print \"ab\" + \"c\" == \"abc\";", "true\n");
    assert_prints("print \"one\" + \" \" + \"two\";", "one two\n");
}

#[test]
fn equality_rules() {
    assert_prints(
        "print 1 == 1; print \"a\" == \"b\"; print nil == nil; print 1 == \"1\";",
        "true\nfalse\ntrue\nfalse\n",
    );
}

#[test]
fn logical_operators_short_circuit() {
    assert_prints("print nil or \"yes\"; print nil and \"no\";", "yes\nnil\n");
    assert_prints("print false or false or 3; print 1 and 2;", "3\n2\n");
}

#[test]
fn if_else_branches() {
    assert_prints(
        "if (1 < 2) print \"then\"; else print \"else\";
         if (nil) print \"then\"; else print \"else\";",
        "then\nelse\n",
    );
}

#[test]
fn while_loop() {
    assert_prints(
        "var sum = 0; var i = 1; while (i <= 4) { sum = sum + i; i = i + 1; } print sum;",
        "10\n",
    );
}

#[test]
fn for_loop_counts() {
    assert_prints("for (var i = 0; i < 3; i = i + 1) print i;", "0\n1\n2\n");
}

#[test]
fn for_loop_variable_is_scoped_to_the_loop() {
    let (result, output) = run("for (var i = 0; i < 3; i = i + 1) print i; print i;");
    assert_eq!(output, "0\n1\n2\n");
    assert!(matches!(result, Err(Error::Runtime)));
}

#[test]
fn functions_and_recursion() {
    assert_prints(
        "fun fib(n) { if (n < 2) return n; return fib(n - 2) + fib(n - 1); } print fib(10);",
        "55\n",
    );
}

#[test]
fn function_printing() {
    assert_prints(
        "fun f() {} print f; print clock;",
        "<fn f>\n<native fn>\n",
    );
}

#[test]
fn closures_retain_by_reference() {
    assert_prints(
        "fun makeCounter() { var c = 0; fun inc() { c = c + 1; return c; } return inc; }
         var a = makeCounter(); print a(); print a(); print a();",
        "1\n2\n3\n",
    );
}

#[test]
fn sibling_closures_share_an_upvalue() {
    assert_prints(
        "fun outer() {
           var x = 1;
           fun set(v) { x = v; }
           fun get() { return x; }
           set(42);
           print get();
         }
         outer();",
        "42\n",
    );
}

#[test]
fn closed_upvalue_stays_shared() {
    assert_prints(
        "var set; var get;
         fun outer() {
           var x = \"before\";
           fun s(v) { x = v; }
           fun g() { return x; }
           set = s;
           get = g;
         }
         outer();
         set(\"after\");
         print get();",
        "after\n",
    );
}

#[test]
fn loop_closures_share_the_induction_variable() {
    assert_prints(
        "var g; var h;
         for (var i = 0; i < 2; i = i + 1) {
           fun f() { return i; }
           if (i == 0) g = f; else h = f;
         }
         print g(); print h();",
        "2\n2\n",
    );
}

#[test]
fn classes_init_inheritance_super() {
    assert_prints(
        "class A { greet() { print \"A\"; } }
         class B < A { greet() { super.greet(); print \"B\"; } }
         B().greet();",
        "A\nB\n",
    );
}

#[test]
fn initializer_returns_the_instance() {
    assert_prints(
        "class Point {
           init(x, y) { this.x = x; this.y = y; }
           sum() { return this.x + this.y; }
         }
         var p = Point(3, 4);
         print p.sum();
         print p.x = 10;
         print p.sum();",
        "7\n10\n14\n",
    );
}

#[test]
fn inherited_methods_and_fields() {
    assert_prints(
        "class Toggle {
           init(state) { this.state = state; }
           flip() { this.state = !this.state; return this.state; }
         }
         class Loud < Toggle {
           flip() { print \"flipping\"; return super.flip(); }
         }
         var t = Loud(false);
         print t.flip();
         print t.flip();",
        "flipping\ntrue\nflipping\nfalse\n",
    );
}

#[test]
fn bound_methods_remember_their_receiver() {
    assert_prints(
        "class C { m() { return this.x; } }
         var c = C();
         c.x = 9;
         var m = c.m;
         print m();",
        "9\n",
    );
}

#[test]
fn fields_shadow_methods_on_invoke() {
    assert_prints(
        "class C { m() { return \"method\"; } }
         fun shadow() { return \"field\"; }
         var c = C();
         print c.m();
         c.m = shadow;
         print c.m();",
        "method\nfield\n",
    );
}

#[test]
fn instances_and_classes_print_by_name() {
    assert_prints("class A {} print A; print A();", "A\nA instance\n");
}

#[test]
fn clock_native_returns_a_number() {
    assert_prints("print clock() > 0;", "true\n");
}

#[test]
fn globals_persist_across_interpret_calls() {
    let buf = SharedBuf::default();
    let mut vm = VM::with_output(Box::new(buf.clone()));
    vm.interpret("var answer = 42;").unwrap();
    vm.interpret("fun tell() { print answer; }").unwrap();
    vm.interpret("tell();").unwrap();
    assert_eq!(String::from_utf8(buf.0.borrow().clone()).unwrap(), "42\n");
}

#[test]
fn vm_recovers_after_runtime_error() {
    let buf = SharedBuf::default();
    let mut vm = VM::with_output(Box::new(buf.clone()));
    assert!(matches!(vm.interpret("print missing;"), Err(Error::Runtime)));
    vm.interpret("print \"still alive\";").unwrap();
    assert_eq!(
        String::from_utf8(buf.0.borrow().clone()).unwrap(),
        "still alive\n"
    );
}

#[test]
fn runtime_error_on_undefined_variable() {
    assert!(matches!(run("print missing;").0, Err(Error::Runtime)));
    assert!(matches!(run("missing = 1;").0, Err(Error::Runtime)));
}

#[test]
fn runtime_error_on_bad_operands() {
    assert!(matches!(run("print 1 + \"a\";").0, Err(Error::Runtime)));
    assert!(matches!(run("print -\"a\";").0, Err(Error::Runtime)));
    assert!(matches!(run("print 1 < \"a\";").0, Err(Error::Runtime)));
}

#[test]
fn runtime_error_on_bad_calls() {
    assert!(matches!(run("var x = 1; x();").0, Err(Error::Runtime)));
    assert!(matches!(
        run("fun f(a, b) {} f(1);").0,
        Err(Error::Runtime)
    ));
    assert!(matches!(
        run("class A {} A(1);").0,
        Err(Error::Runtime)
    ));
}

#[test]
fn runtime_error_on_deep_recursion() {
    assert!(matches!(run("fun f() { f(); } f();").0, Err(Error::Runtime)));
}

#[test]
fn runtime_error_on_properties_of_non_instances() {
    assert!(matches!(run("print true.field;").0, Err(Error::Runtime)));
    assert!(matches!(run("var x = 1; x.field = 2;").0, Err(Error::Runtime)));
    assert!(matches!(
        run("class A {} print A().nothing;").0,
        Err(Error::Runtime)
    ));
}

#[test]
fn runtime_error_on_non_class_superclass() {
    assert!(matches!(
        run("var NotAClass = 1; class A < NotAClass {}").0,
        Err(Error::Runtime)
    ));
}

#[test]
fn compile_errors_are_reported() {
    assert!(matches!(run("1 +;").0, Err(Error::Compile)));
    assert!(matches!(run("return 1;").0, Err(Error::Compile)));
    assert!(matches!(run("print this;").0, Err(Error::Compile)));
    assert!(matches!(run("var 1 = 2;").0, Err(Error::Compile)));
    assert!(matches!(run("print \"unterminated;").0, Err(Error::Compile)));
}

#[test]
fn garbage_is_collected_while_running() {
    // Builds up far more than the first collection threshold in dead
    // intermediate strings, so the collector has to run (and must not free
    // the live ones).
    assert_prints(
        "var s = \"\";
         var i = 0;
         while (i < 1000) {
           s = s + \"xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx\";
           i = i + 1;
         }
         print s == s;
         print \"done\";",
        "true\ndone\n",
    );
}
