//! The apply engine: invoking a callable on an argument list.

use crate::Error;
use crate::builtinops::cons_fn;
use crate::cell::{NativeBody, Value};
use crate::env;
use crate::evaluator::{Interpreter, Step};

impl Interpreter {
    /// Apply `callable` to `args`.
    ///
    /// Closures and macros never run here: they come back as a
    /// `Step::Continue` with their body and a freshly extended environment,
    /// which is what makes calls in tail position iterative. Macros bind
    /// their arguments over the caller's environment `env`; closures over
    /// the environment they captured.
    pub fn apply(&mut self, callable: Value, args: Value, env: Value) -> Result<Step, Error> {
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("Applying {} to {}", self.print(callable), self.print(args));
        }
        match callable {
            Value::Closure(id) => {
                let Some(closure) = self.heap.closure(id) else {
                    return Err(Error::NotCallable(format!("{callable:?}")));
                };
                let bindings = env::bind_positional(&mut self.heap, closure.params, args)?;
                let base = if closure.is_macro { env } else { closure.env };
                let env = env::extend(&mut self.heap, bindings, base)?;
                Ok(Step::Continue {
                    expr: closure.body,
                    env,
                })
            }
            Value::Native(id) => {
                let Some(native) = self.native(id) else {
                    return Err(Error::NotCallable(format!("{callable:?}")));
                };
                let body = native.body;
                let env = if native.receives_env { env } else { Value::Nil };
                match body {
                    NativeBody::Direct(f) => f(self, args, env).map(Step::Done),
                    NativeBody::TailCall(f) => f(self, args, env),
                }
            }
            Value::Cons => cons_fn(self, args, Value::Nil).map(Step::Done),
            Value::ForeignFunction(id) => self.apply_foreign(id, args).map(Step::Done),
            other => Err(Error::NotCallable(self.print(other))),
        }
    }
}
