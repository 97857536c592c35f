//! Built-in operations registry.
//!
//! Every builtin is defined once in [`BUILTIN_OPS`] and bound into the
//! global environment when an [`Interpreter`] is created.
//!
//! ```text
//! car (a b)                ; a
//! sum 1 2 3                ; 6
//! if (equal x 1) one other ; conditional, tail position
//! def twice (lambda (x) sum x x)
//! ```
//!
//! ## Functions vs Special Forms
//!
//! - **Functions** receive their arguments evaluated and return a value
//!   (e.g. `car`, `sum`, `zip`).
//! - **Special Forms** may receive their arguments unevaluated and the
//!   caller's environment, and may hand an expression back to the evaluator
//!   as a tail call (e.g. `if`, `with`, `apply`).
//! - `cons` is its own kind: the evaluator recognises it so that
//!   `(cons x (f ...))` builds lists without growing the native stack.
//!
//! ## Error Handling
//!
//! Builtins are forgiving: wrong types, missing arguments or a zero divisor
//! produce `()`. Only `assert` and failures inside the evaluator itself
//! (stack or heap exhaustion) stop evaluation.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use crate::Error;
use crate::cell::{NativeBody, NativeFn, NativeFunction, TailNativeFn, Value};
use crate::env;
use crate::evaluator::{Interpreter, Step};

/// Represents the implementation of a built-in operation
#[derive(Clone, Copy)]
pub enum OpKind {
    /// Returns its result directly
    Function(NativeFn),
    /// May continue evaluation in tail position
    SpecialForm(TailNativeFn),
    /// The bootstrap `cons` callable
    Cons,
}

impl std::fmt::Debug for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Function(_) => write!(f, "Function(<fn>)"),
            OpKind::SpecialForm(_) => write!(f, "SpecialForm(<fn>)"),
            OpKind::Cons => write!(f, "Cons"),
        }
    }
}

/// Definition of a built-in operation
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    /// The name bound in the global environment
    pub name: &'static str,
    pub op_kind: OpKind,
    /// The caller's environment is passed instead of `()`
    pub receives_env: bool,
    /// Arguments are passed unevaluated
    pub holds_args: bool,
}

impl BuiltinOp {
    /// The native function this op is registered as, with `body` as its
    /// implementation.
    pub(crate) fn native(&self, body: NativeBody) -> NativeFunction {
        NativeFunction {
            name: self.name.to_owned(),
            body,
            receives_env: self.receives_env,
            holds_args: self.holds_args,
        }
    }
}

//
// List Functions
//

fn builtin_car(interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    Ok(interp.heap.car(interp.heap.car(args)))
}

fn builtin_cdr(interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    Ok(interp.heap.cdr(interp.heap.car(args)))
}

/// `(cons a)` is `(a)`, `(cons a b)` is `(a . b)`.
pub(crate) fn cons_fn(interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    let Value::Pair(id) = args else {
        return Ok(Value::Nil);
    };
    let (first, rest) = interp.heap.pair(id);
    match rest {
        Value::Nil => Ok(args),
        Value::Pair(rest_id) => {
            let (second, _) = interp.heap.pair(rest_id);
            interp.heap.cons(first, second)
        }
        _ => Ok(Value::Nil),
    }
}

fn builtin_list(_interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    Ok(args)
}

fn builtin_ispair(interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    let first = interp.heap.car(args);
    Ok(if first.is_pair() { first } else { Value::Nil })
}

/// Returns the first argument if every argument satisfies `matches` against
/// it, else `()`. A dotted argument list never matches.
fn all_match(interp: &Interpreter, args: Value, matches: fn(Value, Value) -> bool) -> Value {
    let Value::Pair(id) = args else {
        return Value::Nil;
    };
    let (first, mut rest) = interp.heap.pair(id);
    loop {
        match rest {
            Value::Nil => return first,
            Value::Pair(id) => {
                let (value, next) = interp.heap.pair(id);
                if !matches(first, value) {
                    return Value::Nil;
                }
                rest = next;
            }
            _ => return Value::Nil,
        }
    }
}

fn builtin_same(interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    Ok(all_match(interp, args, |a, b| a == b))
}

fn builtin_equal(interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    Ok(all_match(interp, args, Value::equal))
}

/// `(assoc key alist)`: the first entry whose key equals `key`.
fn builtin_assoc(interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    let heap = &interp.heap;
    if !heap.cdr(args).is_pair() {
        return Ok(Value::Nil);
    }
    let key = heap.car(args);
    let mut dict = heap.car(heap.cdr(args));
    while let Value::Pair(id) = dict {
        let (entry, rest) = heap.pair(id);
        if !entry.is_pair() {
            break;
        }
        if key.equal(heap.car(entry)) {
            return Ok(entry);
        }
        dict = rest;
    }
    Ok(Value::Nil)
}

/// Pair up elements of two lists until either runs out.
fn builtin_zip(interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    if !interp.heap.cdr(args).is_pair() {
        return Ok(Value::Nil);
    }
    let mut left = interp.heap.car(args);
    let mut right = interp.heap.car(interp.heap.cdr(args));
    let mut entries = Vec::new();
    while let (Value::Pair(l), Value::Pair(r)) = (left, right) {
        let (a, left_rest) = interp.heap.pair(l);
        let (b, right_rest) = interp.heap.pair(r);
        entries.push(interp.heap.cons(a, b)?);
        left = left_rest;
        right = right_rest;
    }
    interp.heap.list(&entries)
}

/// Flatten one level: list arguments are spliced, atoms become elements and
/// `()` contributes nothing.
fn builtin_concat(interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    let mut items = Vec::new();
    let mut splice = |interp: &Interpreter, arg: Value| match arg {
        Value::Nil => {}
        Value::Pair(_) => items.extend(interp.heap.list_to_vec(arg)),
        atom => items.push(atom),
    };

    let mut current = args;
    loop {
        match current {
            Value::Pair(id) => {
                let (arg, rest) = interp.heap.pair(id);
                splice(interp, arg);
                current = rest;
            }
            Value::Nil => break,
            tail => {
                splice(interp, tail);
                break;
            }
        }
    }
    interp.heap.list(&items)
}

/// djb2 of a symbol's name. Other values hash by identity.
fn builtin_hash(interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    if args.is_nil() {
        return Ok(Value::Integer(0));
    }
    let hash = match interp.heap.car(args) {
        Value::Symbol(id) => interp
            .symbols
            .name(id)
            .bytes()
            .fold(5381u64, |hash, b| {
                (hash << 5).wrapping_add(hash).wrapping_add(u64::from(b))
            }),
        other => {
            let mut hasher = DefaultHasher::new();
            other.hash(&mut hasher);
            hasher.finish()
        }
    };
    Ok(Value::Integer(hash as i64))
}

fn builtin_typeof(interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    let kinds = interp.symbols.well_known();
    let kind = match interp.heap.car(args) {
        Value::Nil => return Ok(Value::Nil),
        Value::Pair(_) => kinds.pair,
        Value::Symbol(_) => kinds.symbol,
        Value::Integer(_) => kinds.integer,
        Value::Closure(id) => match interp.heap.closure(id) {
            Some(closure) if closure.is_macro => kinds.macro_,
            _ => kinds.lambda,
        },
        Value::Native(_) => kinds.native,
        Value::Cons => kinds.cons,
        Value::ForeignLibrary(_) => kinds.ffi_library,
        Value::ForeignFunction(_) => kinds.ffi_function,
    };
    Ok(Value::Symbol(kind))
}

//
// Arithmetic
//

/// Fold over the leading integer arguments.
fn fold_integers(interp: &Interpreter, args: Value, init: i64, f: fn(i64, i64) -> i64) -> i64 {
    let mut acc = init;
    let mut current = args;
    while let Value::Pair(id) = current {
        let (arg, rest) = interp.heap.pair(id);
        let Value::Integer(n) = arg else {
            break;
        };
        acc = f(acc, n);
        current = rest;
    }
    acc
}

fn builtin_sum(interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    Ok(Value::Integer(fold_integers(interp, args, 0, i64::wrapping_add)))
}

fn builtin_product(interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    Ok(Value::Integer(fold_integers(interp, args, 1, i64::wrapping_mul)))
}

fn integer_pair(interp: &Interpreter, args: Value) -> Option<(i64, i64)> {
    let a = interp.heap.car(args).as_integer()?;
    let b = interp.heap.car(interp.heap.cdr(args)).as_integer()?;
    Some((a, b))
}

fn builtin_quotient(interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    Ok(match integer_pair(interp, args) {
        Some((_, 0)) | None => Value::Nil,
        Some((a, b)) => Value::Integer(a.wrapping_div(b)),
    })
}

fn builtin_modulus(interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    Ok(match integer_pair(interp, args) {
        Some((_, 0)) | None => Value::Nil,
        Some((a, b)) => Value::Integer(a.wrapping_rem(b)),
    })
}

/// The first argument if all arguments are strictly ascending integers.
fn builtin_asc(interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    let first = interp.heap.car(args);
    let Value::Integer(mut previous) = first else {
        return Ok(Value::Nil);
    };
    let mut rest = interp.heap.cdr(args);
    loop {
        match rest {
            Value::Nil => return Ok(first),
            Value::Pair(id) => {
                let (value, next) = interp.heap.pair(id);
                match value {
                    Value::Integer(n) if previous < n => previous = n,
                    _ => return Ok(Value::Nil),
                }
                rest = next;
            }
            _ => return Ok(Value::Nil),
        }
    }
}

//
// Special Forms
//

/// `(quote x)` is `x`; `(quote a b)` is `(a b)`.
fn builtin_quote(interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    if let Value::Pair(id) = args
        && let (first, Value::Nil) = interp.heap.pair(id)
        && !first.is_pair()
    {
        return Ok(first);
    }
    Ok(args)
}

fn make_closure(
    interp: &mut Interpreter,
    args: Value,
    env: Value,
    is_macro: bool,
) -> Result<Value, Error> {
    let Value::Pair(id) = args else {
        return Ok(Value::Nil);
    };
    let (params, body) = interp.heap.pair(id);
    interp.heap.make_closure(params, body, env, is_macro)
}

fn builtin_lambda(interp: &mut Interpreter, args: Value, env: Value) -> Result<Value, Error> {
    make_closure(interp, args, env, false)
}

fn builtin_macro(interp: &mut Interpreter, args: Value, env: Value) -> Result<Value, Error> {
    make_closure(interp, args, env, true)
}

/// `(if p then else [fourth])`
fn builtin_if(interp: &mut Interpreter, args: Value, env: Value) -> Result<Step, Error> {
    let Value::Pair(id) = args else {
        return Ok(Step::Done(Value::Nil));
    };
    let (predicate, branches) = interp.heap.pair(id);
    let predicate = interp.eval(predicate, env)?;
    let Value::Pair(branches) = branches else {
        return Ok(Step::Done(Value::Nil));
    };
    let (then, otherwise) = interp.heap.pair(branches);
    if predicate.is_truthy() {
        return Ok(Step::Continue { expr: then, env });
    }
    let Value::Pair(otherwise) = otherwise else {
        return Ok(Step::Done(Value::Nil));
    };
    let (mut branch, fourth) = interp.heap.pair(otherwise);
    if let Value::Pair(fourth) = fourth {
        branch = interp.heap.pair(fourth).0;
    }
    Ok(Step::Continue { expr: branch, env })
}

/// `(with name expr body...)`
fn builtin_with(interp: &mut Interpreter, args: Value, env: Value) -> Result<Step, Error> {
    let Value::Pair(id) = args else {
        return Ok(Step::Done(Value::Nil));
    };
    let (name, rest) = interp.heap.pair(id);
    let Value::Pair(rest) = rest else {
        return Ok(Step::Done(Value::Nil));
    };
    let (expr, body) = interp.heap.pair(rest);
    let value = interp.eval(expr, env)?;
    if log::log_enabled!(log::Level::Debug) {
        log::debug!("With {} -> {}", interp.print(name), interp.print(value));
    }
    let binding = interp.heap.cons(name, value)?;
    let env = interp.heap.cons(binding, env)?;
    Ok(Step::Continue { expr: body, env })
}

/// `(apply f args)`
fn builtin_apply(interp: &mut Interpreter, args: Value, env: Value) -> Result<Step, Error> {
    let function = interp.heap.car(args);
    let function = interp.eval(function, env)?;
    if !function.is_callable() {
        return Ok(Step::Done(Value::Nil));
    }
    let arguments = interp.heap.car(interp.heap.cdr(args));
    let arguments = match interp.eval(arguments, env)? {
        atom @ (Value::Nil | Value::Pair(_)) => atom,
        atom => interp.heap.cons(atom, Value::Nil)?,
    };
    interp.apply(function, arguments, env)
}

/// `(eval x)` continues with the evaluated argument list.
fn builtin_eval(_interp: &mut Interpreter, args: Value, env: Value) -> Result<Step, Error> {
    Ok(Step::Continue { expr: args, env })
}

/// `(def name value...)`
fn builtin_def(interp: &mut Interpreter, args: Value, env: Value) -> Result<Value, Error> {
    let Value::Pair(id) = args else {
        return Ok(Value::Nil);
    };
    let (name_expr, value_expr) = interp.heap.pair(id);
    let value = interp.eval(value_expr, env)?;
    let name = match interp.eval(name_expr, env)? {
        name @ Value::Symbol(_) => name,
        _ => name_expr,
    };
    if log::log_enabled!(log::Level::Debug) {
        log::debug!("Defining {} -> {}", interp.print(name), interp.print(value));
    }
    interp.define_value(name, value)?;
    Ok(Value::Nil)
}

/// `(assert expr...)` stops evaluation when the expression is `()`.
fn builtin_assert(interp: &mut Interpreter, args: Value, env: Value) -> Result<Value, Error> {
    if args.is_nil() {
        return Err(Error::AssertionFailed("assert called without an argument".into()));
    }
    let value = interp.eval(args, env)?;
    if value.is_nil() {
        return Err(Error::AssertionFailed(interp.print(args)));
    }
    Ok(value)
}

//
// Foreign Functions and Modules
//

fn builtin_dlopen(interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    let Value::Symbol(name) = interp.heap.car(args) else {
        return Ok(Value::Nil);
    };
    Ok(interp.open_library(name))
}

fn builtin_dlsym(interp: &mut Interpreter, args: Value, _env: Value) -> Result<Value, Error> {
    let library = interp.heap.car(args);
    let name = interp.heap.car(interp.heap.cdr(args));
    match (library, name) {
        (Value::ForeignLibrary(library), Value::Symbol(name)) => {
            Ok(interp.resolve_foreign(library, name))
        }
        _ => Ok(Value::Nil),
    }
}

fn builtin_import(interp: &mut Interpreter, args: Value, env: Value) -> Result<Value, Error> {
    let Value::Symbol(name) = interp.heap.car(args) else {
        return Ok(Value::Nil);
    };
    interp.import_module(name, env)
}

/// Names of local bindings in scope, innermost first. Handy from a REPL.
fn builtin_locals(interp: &mut Interpreter, _args: Value, env: Value) -> Result<Value, Error> {
    let stop = Value::Symbol(interp.symbols.well_known().globals);
    let names: Vec<Value> = env::local_frames(&interp.heap, env, stop)
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    interp.heap.list(&names)
}

//
// Registry
//

macro_rules! function {
    ($name:expr, $f:expr) => {
        BuiltinOp {
            name: $name,
            op_kind: OpKind::Function($f),
            receives_env: false,
            holds_args: false,
        }
    };
}

/// Global registry of all built-in operations, bound into every new
/// interpreter's global environment.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    vec![
        // Special forms
        BuiltinOp {
            name: "if",
            op_kind: OpKind::SpecialForm(builtin_if),
            receives_env: true,
            holds_args: true,
        },
        BuiltinOp {
            name: "with",
            op_kind: OpKind::SpecialForm(builtin_with),
            receives_env: true,
            holds_args: true,
        },
        BuiltinOp {
            name: "apply",
            op_kind: OpKind::SpecialForm(builtin_apply),
            receives_env: true,
            holds_args: true,
        },
        BuiltinOp {
            name: "eval",
            op_kind: OpKind::SpecialForm(builtin_eval),
            receives_env: true,
            holds_args: false,
        },
        BuiltinOp {
            name: "def",
            op_kind: OpKind::Function(builtin_def),
            receives_env: true,
            holds_args: true,
        },
        BuiltinOp {
            name: "quote",
            op_kind: OpKind::Function(builtin_quote),
            receives_env: false,
            holds_args: true,
        },
        BuiltinOp {
            name: "lambda",
            op_kind: OpKind::Function(builtin_lambda),
            receives_env: true,
            holds_args: true,
        },
        BuiltinOp {
            name: "macro",
            op_kind: OpKind::Function(builtin_macro),
            receives_env: true,
            holds_args: true,
        },
        BuiltinOp {
            name: "assert",
            op_kind: OpKind::Function(builtin_assert),
            receives_env: true,
            holds_args: true,
        },
        BuiltinOp {
            name: "locals",
            op_kind: OpKind::Function(builtin_locals),
            receives_env: true,
            holds_args: false,
        },
        // Lists
        BuiltinOp {
            name: "cons",
            op_kind: OpKind::Cons,
            receives_env: false,
            holds_args: false,
        },
        function!("car", builtin_car),
        function!("cdr", builtin_cdr),
        function!("list", builtin_list),
        function!("ispair", builtin_ispair),
        function!("same", builtin_same),
        function!("equal", builtin_equal),
        function!("assoc", builtin_assoc),
        function!("zip", builtin_zip),
        function!("concat", builtin_concat),
        function!("hash", builtin_hash),
        function!("typeof", builtin_typeof),
        // Arithmetic
        function!("sum", builtin_sum),
        function!("product", builtin_product),
        function!("quotient", builtin_quotient),
        function!("modulus", builtin_modulus),
        function!("asc", builtin_asc),
        // Foreign functions
        function!("dlopen", builtin_dlopen),
        function!("dlsym", builtin_dlsym),
        BuiltinOp {
            name: "import",
            op_kind: OpKind::Function(builtin_import),
            receives_env: true,
            holds_args: false,
        },
    ]
});

/// Get all builtin operations
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}
