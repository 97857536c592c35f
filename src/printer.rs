//! Text rendering of values.
//!
//! Lists print without their outer parentheses, mirroring the reader, which
//! supplies them implicitly: the list `(sum 1 2)` prints as `sum 1 2` and a
//! nested list element is wrapped, as in `a (b c)`. For values made only of
//! pairs, symbols, integers and `()`, reading the printed text gives back an
//! equal structure.

use crate::cell::Value;
use crate::env;
use crate::evaluator::Interpreter;

impl Interpreter {
    /// Render a value as text.
    pub fn print(&self, value: Value) -> String {
        let mut out = String::new();
        self.write_value(&mut out, value);
        out
    }

    /// Render the local bindings of `env` (those above the `GLOBALS`
    /// sentinel), one per line.
    pub fn print_env(&self, env: Value) -> String {
        let stop = Value::Symbol(self.symbols.well_known().globals);
        let mut out = String::from("(");
        for (name, value) in env::local_frames(&self.heap, env, stop) {
            out.push('\n');
            self.write_value(&mut out, name);
            out.push_str(" . ");
            self.write_value(&mut out, value);
        }
        out.push(')');
        out
    }

    /// Write `value` without recursing: nesting depth is bounded only by
    /// the heap, not by the native stack.
    fn write_value(&self, out: &mut String, value: Value) {
        let mut work = vec![Task::Value(value)];
        while let Some(task) = work.pop() {
            match task {
                Task::Text(text) => out.push_str(text),
                Task::Value(value) => self.write_atom(out, value, &mut work),
                Task::List { list, first } => match list {
                    Value::Pair(id) => {
                        if !first {
                            out.push(' ');
                        }
                        let (element, rest) = self.heap.pair(id);
                        work.push(Task::List {
                            list: rest,
                            first: false,
                        });
                        if element.is_pair() {
                            out.push('(');
                            work.push(Task::Text(")"));
                            work.push(Task::List {
                                list: element,
                                first: true,
                            });
                        } else {
                            work.push(Task::Value(element));
                        }
                    }
                    Value::Nil => {}
                    tail => {
                        out.push_str(" . ");
                        work.push(Task::Value(tail));
                    }
                },
            }
        }
    }

    /// Write a non-list value. Parts of closures that are themselves values
    /// go back on the work stack, last part first.
    fn write_atom(&self, out: &mut String, value: Value, work: &mut Vec<Task>) {
        match value {
            Value::Nil => out.push_str("()"),
            Value::Integer(n) => out.push_str(&n.to_string()),
            Value::Symbol(id) => out.push_str(self.symbols.name(id)),
            Value::Pair(_) => work.push(Task::List {
                list: value,
                first: true,
            }),
            Value::Closure(id) => match self.heap.closure(id) {
                Some(closure) => {
                    out.push_str(if closure.is_macro { "MACRO(" } else { "LAMBDA(" });
                    work.push(Task::Text(">"));
                    work.push(Task::Value(closure.body));
                    work.push(Task::Text(")<"));
                    work.push(Task::Value(closure.params));
                }
                None => out.push_str("LAMBDA<freed>"),
            },
            Value::Native(id) => {
                out.push_str("NATIVE_FUNCTION<");
                if let Some(native) = self.native(id) {
                    out.push_str(&native.name);
                }
                out.push('>');
            }
            Value::Cons => out.push_str("CONS"),
            Value::ForeignLibrary(id) => {
                out.push_str("FFI_LIBRARY<");
                out.push_str(self.ffi.library_name(id).unwrap_or(""));
                out.push('>');
            }
            Value::ForeignFunction(id) => {
                out.push_str("FFI_FUNCTION<");
                if let Some((library, name)) = self.ffi.function_name(id) {
                    out.push_str(library);
                    out.push('.');
                    out.push_str(name);
                }
                out.push('>');
            }
        }
    }
}

/// Pending printer work.
enum Task {
    Text(&'static str),
    Value(Value),
    /// The remainder of a list; `first` suppresses the separating space
    List { list: Value, first: bool },
}
