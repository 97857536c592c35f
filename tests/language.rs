#![expect(clippy::unwrap_used)] // test code OK

use crisp::{Error, Interpreter, Value};
use maplit::hashmap;

fn run(interp: &mut Interpreter, line: &str) -> String {
    let value = interp
        .eval_line(line)
        .unwrap_or_else(|e| panic!("evaluating '{line}' failed: {e}"));
    interp.print(value)
}

/// Run a sequence of lines against one interpreter, checking each result.
fn run_program(program: Vec<(&str, &str)>) {
    let mut interp = Interpreter::new().unwrap();
    for (i, (input, expected)) in program.iter().enumerate() {
        assert_eq!(run(&mut interp, input), *expected, "Program step #{}: {input}", i + 1);
    }
}

#[test]
fn test_independent_expressions() {
    let cases = hashmap! {
        "if 1 a b" => "a",
        "if () a b" => "b",
        "if () a b c" => "c",
        "if ()" => "()",
        "zip (quote a b c) (quote d e)" => "(a . d) (b . e)",
        "assoc b (list (cons a 1) (cons b 2))" => "b . 2",
        "assoc c (list (cons a 1) (cons b 2))" => "()",
        "same a a" => "a",
        "sum 1 2 3 4" => "10",
        "product 2 (sum 1 2)" => "6",
        "quotient (sum 10 5) 4" => "3",
        "car (cdr (quote a b c))" => "b",
        "concat (quote 1 2) (quote 3)" => "1 2 3",
        "typeof (quote a)" => "SYMBOL",
        "((lambda (x) product x x) 7)" => "49",
        "'(a (b c) . d)" => "a (b c) . d",
        "eval (list sum 1 2)" => "3",
        "apply list (quote 1 2)" => "1 2",
        "lambda (x) sum x 1" => "LAMBDA(x)<sum x 1>",
    };
    let mut interp = Interpreter::new().unwrap();
    for (input, expected) in cases {
        assert_eq!(run(&mut interp, input), expected, "Expression: {input}");
    }
}

#[test]
fn test_definitions_and_shadowing() {
    run_program(vec![
        ("def x 1", "()"),
        ("x", "1"),
        ("def x 2", "()"),
        ("x", "2"),
        ("with x 3 x", "3"),
        ("x", "2"),
        ("with x 3 with x 4 x", "4"),
        ("def name (quote x)", "()"),
        ("def name 5", "()"),
        ("x", "5"),
    ]);
}

#[test]
fn test_parameter_binding() {
    run_program(vec![
        ("def rest (lambda (a . more) more)", "()"),
        ("def first (lambda (a . more) a)", "()"),
        ("rest 1 2 3", "2 3"),
        ("first 1 2 3", "1"),
        ("apply first 1", "1"),
        ("apply first (quote 1)", "1"),
        ("def all (lambda args args)", "()"),
        ("all 1 2", "1 2"),
        ("def pair (lambda (a b) cons a b)", "()"),
        ("pair 1 2 3", "1 . 2"),
        ("pair 1", "1 . b"),
    ]);
}

#[test]
fn test_closures_capture_their_environment() {
    run_program(vec![
        ("def make-adder (lambda (n) lambda (m) sum n m)", "()"),
        ("def add5 (make-adder 5)", "()"),
        ("add5 3", "8"),
        ("with n 100 add5 1", "6"),
        ("def peek (macro () n)", "()"),
        ("with n 100 peek ()", "100"),
    ]);
}

#[test]
fn test_macros_build_special_forms() {
    run_program(vec![
        ("def unless (macro (c . body) if (eval c) () (eval body))", "()"),
        ("unless (asc 2 1) sum 1 1", "2"),
        ("unless (asc 1 2) sum 1 1", "()"),
        ("def swap (macro (a b) list b a)", "()"),
        ("swap x y", "y x"),
    ]);
}

#[test]
fn test_source_with_comments_and_continuations() {
    let mut interp = Interpreter::new().unwrap();
    let source = "\
; squares a number
def square (lambda (x)
  product x x)

def sum-squares (lambda (a b)
  sum (square a) (square b))  ; two squares

sum-squares 3 4
";
    assert_eq!(interp.eval_source(source).unwrap(), Value::Integer(25));
}

#[test]
fn test_fatal_errors_propagate() {
    let mut interp = Interpreter::new().unwrap();
    assert!(matches!(
        interp.eval_line("assert (same a b)").unwrap_err(),
        Error::AssertionFailed(_)
    ));
    assert!(matches!(
        interp.eval_source("sum (1 2").unwrap_err(),
        Error::ParseError(_)
    ));
    // The interpreter stays usable after a fatal error.
    assert_eq!(run(&mut interp, "sum 1 1"), "2");
}
