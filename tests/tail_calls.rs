#![expect(clippy::unwrap_used)] // test code OK

use crisp::{Error, Interpreter, Value};

#[test]
fn test_self_recursive_countdown_runs_in_constant_stack() {
    let mut interp = Interpreter::new().unwrap();
    interp
        .eval_line("def count (lambda (n) if (asc 0 n) (count (sum n -1)) done)")
        .unwrap();
    let result = interp.eval_line("count 300000").unwrap();
    assert_eq!(interp.print(result), "done");
}

#[test]
fn test_countdown_really_iterates() {
    let mut interp = Interpreter::new().unwrap();
    interp
        .eval_line("def steps (lambda (n acc) if (asc 0 n) (steps (sum n -1) (sum acc 1)) acc)")
        .unwrap();
    assert_eq!(interp.eval_line("steps 300000 0").unwrap(), Value::Integer(300000));
}

#[test]
fn test_mutual_recursion_through_if() {
    let mut interp = Interpreter::new().unwrap();
    interp
        .eval_source(
            "def even (lambda (n) if (asc 0 n) (odd (sum n -1)) yes)\n\
             def odd (lambda (n) if (asc 0 n) (even (sum n -1)) no)\n",
        )
        .unwrap();
    let result = interp.eval_line("even 200001").unwrap();
    assert_eq!(interp.print(result), "no");
}

#[test]
fn test_non_tail_recursion_overflows_cleanly() {
    let mut interp = Interpreter::new().unwrap();
    interp
        .eval_line("def deep (lambda (n) if (asc 0 n) (sum 1 (deep (sum n -1))) 0)")
        .unwrap();
    assert_eq!(interp.eval_line("deep 100").unwrap(), Value::Integer(100));

    let err = interp.eval_line("deep 1000000").unwrap_err();
    assert!(
        matches!(err, Error::StackOverflow { used, limit } if used > limit),
        "unexpected error: {err}"
    );
    assert_eq!(interp.eval_line("deep 10").unwrap(), Value::Integer(10));
}

#[test]
fn test_cons_in_tail_position_builds_long_lists() {
    let mut interp = Interpreter::new().unwrap();
    interp
        .eval_line("def range (lambda (n) if (asc 0 n) (cons n (range (sum n -1))) ())")
        .unwrap();
    let list = interp.eval_line("range 100000").unwrap();
    assert_eq!(interp.heap().list_len(list), 100000);
    assert_eq!(interp.car(list), Value::Integer(100000));

    interp
        .eval_line("def upto (lambda (i n) if (asc i n) (cons i (upto (sum i 1) n)) (cons n ()))")
        .unwrap();
    let short = interp.eval_line("upto 1 5").unwrap();
    assert_eq!(interp.print(short), "1 2 3 4 5");
}

#[test]
fn test_tail_calls_through_with_and_apply() {
    let mut interp = Interpreter::new().unwrap();
    interp
        .eval_line("def loop (lambda (n) with m (sum n -1) if (asc 0 m) (apply loop (list m)) m)")
        .unwrap();
    assert_eq!(interp.eval_line("loop 250000").unwrap(), Value::Integer(0));
}

#[test]
fn test_dotted_tail_closes_a_long_cons_chain() {
    let mut interp = Interpreter::new().unwrap();
    interp
        .eval_line("def spine (lambda (n) if (asc 0 n) (cons n (spine (sum n -1))) (n . tail))")
        .unwrap();
    let short = interp.eval_line("spine 3").unwrap();
    assert_eq!(interp.print(short), "3 2 1 0 . tail");

    let list = interp.eval_line("spine 100000").unwrap();
    assert_eq!(interp.heap().list_len(list), 100001);
    assert!(interp.print(list).ends_with(" 2 1 0 . tail"));
}
