//! Association-list environments.
//!
//! An environment is an ordinary list of `(name . value)` pairs, searched
//! front to back. Local frames are consed in front of the environment they
//! extend; the global environment is the list headed by the `(GLOBALS)`
//! sentinel entry, below which [`define_global`] splices new definitions.

use crate::Error;
use crate::cell::{Heap, PairId, Value};

/// Find the value bound to `symbol`. The first entry whose key is
/// [`Value::equal`] to `symbol` wins; the scan stops at the end of the list or
/// at the first entry that is not a pair.
pub fn lookup(heap: &Heap, symbol: Value, env: Value) -> Option<Value> {
    let mut current = env;
    while let Value::Pair(id) = current {
        let (entry, rest) = heap.pair(id);
        let Value::Pair(entry_id) = entry else {
            return None;
        };
        let (key, value) = heap.pair(entry_id);
        if key.equal(symbol) {
            return Some(value);
        }
        current = rest;
    }
    None
}

/// Prepend a copy of `new_bindings` to `env`. Neither list is modified.
pub fn extend(heap: &mut Heap, new_bindings: Value, env: Value) -> Result<Value, Error> {
    let bindings = heap.list_to_vec(new_bindings);
    let mut result = env;
    for &binding in bindings.iter().rev() {
        result = heap.cons(binding, result)?;
    }
    Ok(result)
}

/// Pair up parameter names with arguments.
///
/// `params` is a symbol (bound to the whole argument list), or a possibly
/// improper list of symbols whose trailing symbol binds the remaining
/// arguments. Extra arguments are dropped; missing ones get no binding.
/// A non-nil atom passed as `args` counts as a one-element argument list.
pub fn bind_positional(heap: &mut Heap, params: Value, args: Value) -> Result<Value, Error> {
    let mut args = match args {
        Value::Nil | Value::Pair(_) => args,
        atom => heap.cons(atom, Value::Nil)?,
    };

    let mut bindings = Vec::new();
    let mut params = params;
    loop {
        match params {
            Value::Symbol(_) => {
                bindings.push(heap.cons(params, args)?);
                break;
            }
            Value::Pair(id) => {
                let Value::Pair(arg_id) = args else {
                    break;
                };
                let (name, rest_params) = heap.pair(id);
                let (arg, rest_args) = heap.pair(arg_id);
                bindings.push(heap.cons(name, arg)?);
                params = rest_params;
                args = rest_args;
            }
            _ => break,
        }
    }
    heap.list(&bindings)
}

/// Insert `(name . value)` directly below the sentinel heading `global`.
/// Older definitions of `name` stay in the list, shadowed.
pub fn define_global(
    heap: &mut Heap,
    global: PairId,
    name: Value,
    value: Value,
) -> Result<(), Error> {
    let entry = heap.cons(name, value)?;
    let (_, below) = heap.pair(global);
    let spliced = heap.cons(entry, below)?;
    heap.set_cdr(global, spliced);
    Ok(())
}

/// The frames of `env` that sit above the entry keyed by `stop`, typically
/// the `GLOBALS` sentinel.
pub fn local_frames(heap: &Heap, env: Value, stop: Value) -> Vec<(Value, Value)> {
    let mut frames = Vec::new();
    let mut current = env;
    while let Value::Pair(id) = current {
        let (entry, rest) = heap.pair(id);
        let Value::Pair(entry_id) = entry else {
            break;
        };
        let (key, value) = heap.pair(entry_id);
        if key.equal(stop) {
            break;
        }
        frames.push((key, value));
        current = rest;
    }
    frames
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::symbol::SymbolTable;
    use proptest::prelude::*;

    fn setup() -> (Heap, SymbolTable) {
        (Heap::new(1 << 16, 1 << 16), SymbolTable::new())
    }

    fn sym(symbols: &mut SymbolTable, name: &str) -> Value {
        Value::Symbol(symbols.intern(name))
    }

    fn frame(heap: &mut Heap, name: Value, value: Value) -> Value {
        let entry = heap.cons(name, value).unwrap();
        heap.list(&[entry]).unwrap()
    }

    #[test]
    fn test_lookup_inner_frame_shadows_outer() {
        let (mut heap, mut symbols) = setup();
        let x = sym(&mut symbols, "x");
        let outer = frame(&mut heap, x, Value::Integer(2));
        let env0 = extend(&mut heap, outer, Value::Nil).unwrap();
        let inner = frame(&mut heap, x, Value::Integer(1));
        let env1 = extend(&mut heap, inner, env0).unwrap();

        assert_eq!(lookup(&heap, x, env1), Some(Value::Integer(1)));
        assert_eq!(lookup(&heap, x, env0), Some(Value::Integer(2)));
        assert_eq!(lookup(&heap, sym(&mut symbols, "y"), env1), None);
    }

    #[test]
    fn test_lookup_stops_at_non_pair_entry() {
        let (mut heap, mut symbols) = setup();
        let x = sym(&mut symbols, "x");
        let binding = heap.cons(x, Value::Integer(1)).unwrap();
        let env = heap.list(&[Value::Integer(9), binding]).unwrap();
        assert_eq!(lookup(&heap, x, env), None);
    }

    #[test]
    fn test_bind_positional_with_rest_parameter() {
        let (mut heap, mut symbols) = setup();
        let a = sym(&mut symbols, "a");
        let rest = sym(&mut symbols, "rest");
        let params = heap.cons(a, rest).unwrap();
        let args = heap
            .list(&[Value::Integer(1), Value::Integer(2), Value::Integer(3)])
            .unwrap();

        let env = bind_positional(&mut heap, params, args).unwrap();
        assert_eq!(lookup(&heap, a, env), Some(Value::Integer(1)));
        let bound_rest = lookup(&heap, rest, env).unwrap();
        assert_eq!(
            heap.list_to_vec(bound_rest),
            vec![Value::Integer(2), Value::Integer(3)]
        );
    }

    #[test]
    fn test_bind_positional_atom_argument_is_singleton_list() {
        let (mut heap, mut symbols) = setup();
        let a = sym(&mut symbols, "a");
        let rest = sym(&mut symbols, "rest");
        let params = heap.cons(a, rest).unwrap();

        let env = bind_positional(&mut heap, params, Value::Integer(1)).unwrap();
        assert_eq!(lookup(&heap, a, env), Some(Value::Integer(1)));
        assert_eq!(lookup(&heap, rest, env), Some(Value::Nil));
    }

    #[test]
    fn test_bind_positional_arity_is_permissive() {
        let (mut heap, mut symbols) = setup();
        let a = sym(&mut symbols, "a");
        let b = sym(&mut symbols, "b");
        let params = heap.list(&[a, b]).unwrap();

        let one = heap.list(&[Value::Integer(1)]).unwrap();
        let env = bind_positional(&mut heap, params, one).unwrap();
        assert_eq!(heap.list_len(env), 1);
        assert_eq!(lookup(&heap, b, env), None);

        let three = heap
            .list(&[Value::Integer(1), Value::Integer(2), Value::Integer(3)])
            .unwrap();
        let env = bind_positional(&mut heap, params, three).unwrap();
        assert_eq!(heap.list_len(env), 2);
        assert_eq!(lookup(&heap, b, env), Some(Value::Integer(2)));
    }

    #[test]
    fn test_bind_positional_bare_symbol_is_variadic() {
        let (mut heap, mut symbols) = setup();
        let all = sym(&mut symbols, "all");
        let args = heap.list(&[Value::Integer(4), Value::Integer(5)]).unwrap();
        let env = bind_positional(&mut heap, all, args).unwrap();
        assert_eq!(lookup(&heap, all, env), Some(args));
    }

    #[test]
    fn test_define_global_keeps_history_below_sentinel() {
        let (mut heap, mut symbols) = setup();
        let globals = sym(&mut symbols, "GLOBALS");
        let sentinel = heap.cons(globals, Value::Nil).unwrap();
        let head = heap.cons(sentinel, Value::Nil).unwrap();
        let head_id = head.as_pair().unwrap();
        let x = sym(&mut symbols, "x");

        define_global(&mut heap, head_id, x, Value::Integer(1)).unwrap();
        define_global(&mut heap, head_id, x, Value::Integer(2)).unwrap();

        assert_eq!(lookup(&heap, x, head), Some(Value::Integer(2)));
        assert_eq!(heap.car(head), sentinel);
        assert_eq!(heap.list_len(head), 3);

        let y = sym(&mut symbols, "y");
        let local = frame(&mut heap, y, Value::Integer(3));
        let env = extend(&mut heap, local, head).unwrap();
        assert_eq!(local_frames(&heap, env, globals), vec![(y, Value::Integer(3))]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_most_recent_binding_wins(values in prop::collection::vec(any::<i64>(), 1..20)) {
            let (mut heap, mut symbols) = setup();
            let x = sym(&mut symbols, "x");
            let mut env = Value::Nil;
            for &v in &values {
                let binding = frame(&mut heap, x, Value::Integer(v));
                env = extend(&mut heap, binding, env).unwrap();
            }
            let last = *values.last().unwrap();
            prop_assert_eq!(lookup(&heap, x, env), Some(Value::Integer(last)));
        }
    }
}
