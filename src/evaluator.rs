use crate::Error;
use crate::builtinops::{OpKind, get_builtin_ops};
use crate::cell::{Heap, NativeBody, NativeFunction, NativeId, PairId, Value};
use crate::config::InterpreterConfig;
use crate::env;
use crate::ffi::ForeignTable;
use crate::reader::{self, LogicalLine};
use crate::symbol::SymbolTable;
use crate::{ParseError, ParseErrorKind};

mod apply;

/// Outcome of one reduction: either a final value, or an expression the
/// evaluator should continue with in place of the current one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Done(Value),
    Continue { expr: Value, env: Value },
}

/// The open end of a chain of pairs being built across tail calls.
///
/// When a result is known to become the rest of a fresh pair, the pair is
/// allocated up front and linked here, and evaluation carries on in the
/// same loop. The final value fills the hole.
#[derive(Debug, Default)]
struct Pending {
    root: Value,
    hole: Option<PairId>,
}

impl Pending {
    fn defer(&mut self, heap: &mut Heap, cell: PairId) {
        match self.hole {
            Some(hole) => heap.set_cdr(hole, Value::Pair(cell)),
            None => self.root = Value::Pair(cell),
        }
        self.hole = Some(cell);
    }

    fn resolve(self, heap: &mut Heap, value: Value) -> Value {
        match self.hole {
            Some(hole) => {
                heap.set_cdr(hole, value);
                self.root
            }
            None => value,
        }
    }
}

#[derive(Debug, Default)]
struct StackGuard {
    base: usize,
    depth: usize,
}

/// An interpreter instance: the cell store, the symbol table, registered
/// natives, opened libraries and the global environment.
pub struct Interpreter {
    pub(crate) heap: Heap,
    pub(crate) symbols: SymbolTable,
    pub(crate) natives: Vec<NativeFunction>,
    pub(crate) ffi: ForeignTable,
    global_env: Value,
    global_head: PairId,
    config: InterpreterConfig,
    stack: StackGuard,
}

impl Interpreter {
    /// Create an interpreter with the default configuration.
    pub fn new() -> Result<Self, Error> {
        Self::with_config(InterpreterConfig::default())
    }

    /// Create an interpreter whose global environment holds every builtin,
    /// headed by the `(GLOBALS)` sentinel.
    pub fn with_config(config: InterpreterConfig) -> Result<Self, Error> {
        let mut heap = Heap::new(config.heap_capacity, config.gc_threshold);
        let mut symbols = SymbolTable::new();
        let mut natives = Vec::new();

        let mut builtins = Value::Nil;
        for op in get_builtin_ops().iter().rev() {
            let value = match op.op_kind {
                OpKind::Cons => Value::Cons,
                OpKind::Function(f) => push_native(&mut natives, op.native(NativeBody::Direct(f))),
                OpKind::SpecialForm(f) => {
                    push_native(&mut natives, op.native(NativeBody::TailCall(f)))
                }
            };
            let name = Value::Symbol(symbols.intern(op.name));
            let entry = heap.cons(name, value)?;
            builtins = heap.cons(entry, builtins)?;
        }

        let sentinel_name = Value::Symbol(symbols.well_known().globals);
        let sentinel = heap.cons(sentinel_name, Value::Nil)?;
        let global_head = heap.alloc_pair(sentinel, builtins)?;

        Ok(Interpreter {
            heap,
            symbols,
            natives,
            ffi: ForeignTable::default(),
            global_env: Value::Pair(global_head),
            global_head,
            config,
            stack: StackGuard::default(),
        })
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// The global environment. Its head pair never changes.
    pub fn global_env(&self) -> Value {
        self.global_env
    }

    /// Intern `name` and return it as a symbol value.
    pub fn intern(&mut self, name: &str) -> Value {
        Value::Symbol(self.symbols.intern(name))
    }

    pub fn cons(&mut self, car: Value, cdr: Value) -> Result<Value, Error> {
        self.heap.cons(car, cdr)
    }

    pub fn car(&self, val: Value) -> Value {
        self.heap.car(val)
    }

    pub fn cdr(&self, val: Value) -> Value {
        self.heap.cdr(val)
    }

    pub fn list(&mut self, values: &[Value]) -> Result<Value, Error> {
        self.heap.list(values)
    }

    pub fn list_to_vec(&self, val: Value) -> Vec<Value> {
        self.heap.list_to_vec(val)
    }

    /// Register a host function. The returned value is callable but unbound;
    /// use [`Interpreter::define`] to give it a global name.
    pub fn register_native(
        &mut self,
        name: &str,
        body: NativeBody,
        receives_env: bool,
        holds_args: bool,
    ) -> Value {
        let native = NativeFunction {
            name: name.to_owned(),
            body,
            receives_env,
            holds_args,
        };
        push_native(&mut self.natives, native)
    }

    pub fn native(&self, id: NativeId) -> Option<&NativeFunction> {
        self.natives.get(id.0 as usize)
    }

    /// Bind `name` in the global environment, shadowing earlier definitions.
    pub fn define(&mut self, name: &str, value: Value) -> Result<(), Error> {
        let name = self.intern(name);
        self.define_value(name, value)
    }

    pub(crate) fn define_value(&mut self, name: Value, value: Value) -> Result<(), Error> {
        env::define_global(&mut self.heap, self.global_head, name, value)
    }

    /// Look `name` up in the global environment.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let id = self.symbols.lookup(name)?;
        env::lookup(&self.heap, Value::Symbol(id), self.global_env)
    }

    /// Read one logical line of text into a list of expressions.
    pub fn parse(&mut self, text: &str) -> Result<Value, Error> {
        let mut cursor = text;
        reader::parse(
            &mut self.heap,
            &mut self.symbols,
            &mut cursor,
            self.config.max_parse_depth,
        )
    }

    /// Evaluate `expr` in `env`.
    ///
    /// This never reclaims storage, so it is safe to call from builtins that
    /// hold values in host variables.
    pub fn eval(&mut self, expr: Value, env: Value) -> Result<Value, Error> {
        self.guarded_eval(expr, env, false)
    }

    /// Evaluate `expr` in the global environment as a top-level form.
    ///
    /// Storage not reachable from the global environment, `expr` or the
    /// result may be reclaimed during the call, so values kept by the host
    /// from earlier evaluations should be bound globally first.
    pub fn eval_toplevel(&mut self, expr: Value) -> Result<Value, Error> {
        let env = self.global_env;
        self.guarded_eval(expr, env, true)
    }

    /// Parse and evaluate one logical line. An empty line yields `()`.
    pub fn eval_line(&mut self, text: &str) -> Result<Value, Error> {
        let expr = self.parse(text)?;
        if expr.is_nil() {
            return Ok(Value::Nil);
        }
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("Parsed {}", self.print(expr));
        }
        self.eval_toplevel(expr)
    }

    /// Evaluate every logical line of `source` in order and return the
    /// last result.
    pub fn eval_source(&mut self, source: &str) -> Result<Value, Error> {
        let (lines, remainder) = logical_lines(source);
        if !remainder.trim().is_empty() {
            return Err(Error::ParseError(ParseError::with_context(
                ParseErrorKind::Incomplete,
                "Unclosed parenthesis at end of input",
                source,
                source.len().saturating_sub(remainder.len()),
            )));
        }
        let mut result = Value::Nil;
        for line in lines {
            result = self.eval_line(&line)?;
        }
        Ok(result)
    }

    /// Evaluate the logical lines of `source` in `env` without collecting,
    /// skipping an unbalanced trailing fragment. Used for module bodies.
    pub(crate) fn eval_lines_in(&mut self, source: &str, env: Value) -> Result<Value, Error> {
        let (lines, remainder) = logical_lines(source);
        if !remainder.trim().is_empty() {
            log::warn!("Ignoring unbalanced trailing input: {remainder}");
        }
        let mut result = Value::Nil;
        for line in lines {
            let expr = self.parse(&line)?;
            if expr.is_nil() {
                continue;
            }
            if log::log_enabled!(log::Level::Debug) {
                log::debug!("Parsed {}", self.print(expr));
            }
            result = self.eval(expr, env)?;
        }
        Ok(result)
    }

    fn guarded_eval(&mut self, expr: Value, env: Value, collect: bool) -> Result<Value, Error> {
        self.enter()?;
        let collect = collect && self.stack.depth == 1;
        let result = self.eval_loop(expr, env, collect);
        self.stack.depth -= 1;
        result
    }

    /// Record one more level of native recursion and check the stack budget.
    #[inline(never)]
    fn enter(&mut self) -> Result<(), Error> {
        let marker = 0u8;
        let here = std::hint::black_box(&marker) as *const u8 as usize;
        if self.stack.depth == 0 {
            self.stack.base = here;
        }
        let used = self.stack.base.abs_diff(here);
        if used > self.config.stack_limit {
            return Err(Error::StackOverflow {
                used,
                limit: self.config.stack_limit,
            });
        }
        self.stack.depth += 1;
        Ok(())
    }

    /// The trampoline. Tail positions come back here as `Step::Continue`
    /// instead of recursing.
    fn eval_loop(
        &mut self,
        mut expr: Value,
        mut env: Value,
        collect: bool,
    ) -> Result<Value, Error> {
        let mut pending = Pending::default();
        loop {
            if collect && self.heap.should_collect() {
                let roots = [expr, env, pending.root, self.global_env];
                self.heap.collect(&roots);
            }
            if log::log_enabled!(log::Level::Trace) && expr.is_pair() {
                log::trace!("Evalling {} in {}", self.print(expr), self.print_env(env));
            }
            match self.reduce(expr, env, &mut pending)? {
                Step::Done(value) => return Ok(pending.resolve(&mut self.heap, value)),
                Step::Continue {
                    expr: next_expr,
                    env: next_env,
                } => {
                    expr = next_expr;
                    env = next_env;
                }
            }
        }
    }

    fn reduce(&mut self, expr: Value, env: Value, pending: &mut Pending) -> Result<Step, Error> {
        let Value::Pair(id) = expr else {
            return Ok(Step::Done(match expr {
                Value::Symbol(_) => self.resolve_symbol(expr, env),
                other => other,
            }));
        };
        let (first, rest) = self.heap.pair(id);

        // () x y -> () 1 2
        if first.is_nil() {
            let mut values = vec![Value::Nil];
            let tail = self.eval_each(rest, env, &mut values)?;
            return self.finish_list(&values, tail).map(Step::Done);
        }

        // (x) -> 1
        if rest.is_nil() {
            return Ok(Step::Continue { expr: first, env });
        }

        let head = self.eval(first, env)?;

        // x . y -> 1 . 2
        if !rest.is_pair() {
            let cell = self.heap.alloc_pair(head, Value::Nil)?;
            pending.defer(&mut self.heap, cell);
            return Ok(Step::Continue { expr: rest, env });
        }

        if !head.is_callable() {
            // x y -> 1 2
            let mut values = vec![head];
            let tail = self.eval_each(rest, env, &mut values)?;
            return self.finish_list(&values, tail).map(Step::Done);
        }

        if head == Value::Cons
            && let Value::Pair(second) = self.heap.cdr(rest)
            && self.heap.cdr(Value::Pair(second)).is_nil()
        {
            let value = self.eval(self.heap.car(rest), env)?;
            let cell = self.heap.alloc_pair(value, Value::Nil)?;
            pending.defer(&mut self.heap, cell);
            let (next, _) = self.heap.pair(second);
            return Ok(Step::Continue { expr: next, env });
        }

        let args = if self.holds_args(head) {
            rest
        } else {
            self.evalmap(rest, env)?
        };
        self.apply(head, args, env)
    }

    fn holds_args(&self, callable: Value) -> bool {
        match callable {
            Value::Closure(id) => self.heap.closure(id).is_some_and(|c| c.is_macro),
            Value::Native(id) => self.native(id).is_some_and(|n| n.holds_args),
            _ => false,
        }
    }

    /// Resolve a symbol: environment first, then `lib.name` foreign lookup.
    /// Unbound symbols evaluate to themselves.
    fn resolve_symbol(&mut self, symbol: Value, env: Value) -> Value {
        if let Some(value) = env::lookup(&self.heap, symbol, env) {
            return value;
        }
        if let Value::Symbol(id) = symbol
            && let Some(function) = self.find_foreign_symbol(id, env)
        {
            return function;
        }
        symbol
    }

    /// Evaluate each element of an argument list, left to right. A dotted
    /// tail is evaluated as an expression and kept as the tail.
    pub fn evalmap(&mut self, args: Value, env: Value) -> Result<Value, Error> {
        let mut values = Vec::new();
        let tail = self.eval_each(args, env, &mut values)?;
        self.finish_list(&values, tail)
    }

    fn eval_each(
        &mut self,
        args: Value,
        env: Value,
        values: &mut Vec<Value>,
    ) -> Result<Value, Error> {
        let mut current = args;
        loop {
            match current {
                Value::Pair(id) => {
                    let (arg, rest) = self.heap.pair(id);
                    values.push(self.eval(arg, env)?);
                    current = rest;
                }
                Value::Nil => return Ok(Value::Nil),
                tail => return self.eval(tail, env),
            }
        }
    }

    fn finish_list(&mut self, values: &[Value], tail: Value) -> Result<Value, Error> {
        let mut result = tail;
        for &value in values.iter().rev() {
            result = self.heap.cons(value, result)?;
        }
        Ok(result)
    }
}

/// Store a native and return the value that calls it.
fn push_native(natives: &mut Vec<NativeFunction>, native: NativeFunction) -> Value {
    let id = NativeId(natives.len() as u32);
    natives.push(native);
    Value::Native(id)
}

/// Split `source` into complete logical lines, returning whatever text was
/// left unterminated.
fn logical_lines(source: &str) -> (Vec<String>, String) {
    let mut line = LogicalLine::new();
    let mut lines = Vec::new();
    for c in source.chars().chain(std::iter::once('\n')) {
        if line.ingest(c) {
            let text = line.take();
            if !text.trim().is_empty() {
                lines.push(text);
            }
        }
    }
    (lines, line.take())
}
