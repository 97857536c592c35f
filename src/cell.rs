//! This module defines the cell store: the [`Value`] enum every part of the
//! interpreter passes around, and the [`Heap`] arena that owns pair and
//! closure storage. A `Value` is a small `Copy` tag plus payload; pairs and
//! closures live in the heap and are referred to by index, so sharing a list
//! or an environment is just copying its handle.
//!
//! The heap reclaims storage with a mark-and-sweep pass over explicit roots
//! (see [`Heap::collect`]). Environments, closures and the global binding
//! list form cycles, which tracing handles without special cases.

use crate::Error;
use crate::evaluator::{Interpreter, Step};
use crate::symbol::SymbolId;

/// Index of a pair in the heap.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PairId(pub(crate) u32);

/// Index of a closure in the heap.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ClosureId(pub(crate) u32);

/// Index of a registered native function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NativeId(pub(crate) u32);

/// Index of a library opened through the FFI bridge.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LibraryId(pub(crate) u32);

/// Index of a symbol resolved through the FFI bridge.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ForeignId(pub(crate) u32);

/// Core value type of the interpreter
///
/// Equality on `Value` is identity: two pairs are equal only if they are the
/// same cell. Symbols are interned, so equal text means equal values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum Value {
    /// The empty list, also the only false value
    #[default]
    Nil,
    Pair(PairId),
    Symbol(SymbolId),
    Integer(i64),
    /// User-defined function or macro (see [`Closure::is_macro`])
    Closure(ClosureId),
    /// Host-implemented function
    Native(NativeId),
    /// The bootstrap `cons` callable
    Cons,
    ForeignLibrary(LibraryId),
    ForeignFunction(ForeignId),
}

impl Value {
    pub fn is_nil(self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_pair(self) -> bool {
        matches!(self, Value::Pair(_))
    }

    pub fn is_symbol(self) -> bool {
        matches!(self, Value::Symbol(_))
    }

    /// Everything except `()` is true.
    pub fn is_truthy(self) -> bool {
        !self.is_nil()
    }

    /// Whether the apply engine accepts this value in function position.
    pub fn is_callable(self) -> bool {
        matches!(
            self,
            Value::Closure(_) | Value::Native(_) | Value::Cons | Value::ForeignFunction(_)
        )
    }

    pub fn as_pair(self) -> Option<PairId> {
        match self {
            Value::Pair(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_symbol(self) -> Option<SymbolId> {
        match self {
            Value::Symbol(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_integer(self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(n),
            _ => None,
        }
    }

    /// Structural equality used by `equal`, `assoc` and environment lookup:
    /// symbols with the same name and integers with the same value.
    /// Everything else, pairs included, is never equal.
    pub fn equal(self, other: Value) -> bool {
        match (self, other) {
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            _ => false,
        }
    }
}

/// A user-defined function. Macros share the representation and differ only
/// in how the apply engine treats them.
#[derive(Clone, Copy, Debug)]
pub struct Closure {
    /// A symbol (variadic), or a possibly improper list of symbols
    pub params: Value,
    /// Expression evaluated on application; singleton lists collapse
    pub body: Value,
    /// Environment captured at creation, unused by macros
    pub env: Value,
    pub is_macro: bool,
}

/// Host function that returns a final value.
pub type NativeFn = fn(&mut Interpreter, Value, Value) -> Result<Value, Error>;

/// Host function that takes part in the trampoline: it may hand an
/// expression back to the evaluator instead of evaluating it itself.
pub type TailNativeFn = fn(&mut Interpreter, Value, Value) -> Result<Step, Error>;

#[derive(Clone, Copy)]
pub enum NativeBody {
    Direct(NativeFn),
    TailCall(TailNativeFn),
}

impl std::fmt::Debug for NativeBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NativeBody::Direct(_) => write!(f, "Direct(<fn>)"),
            NativeBody::TailCall(_) => write!(f, "TailCall(<fn>)"),
        }
    }
}

/// A host-implemented callable. Both functions receive `(args, env)`; `env`
/// is `()` unless `receives_env` is set.
#[derive(Clone, Debug)]
pub struct NativeFunction {
    pub name: String,
    pub body: NativeBody,
    pub receives_env: bool,
    /// Arguments are passed unevaluated
    pub holds_args: bool,
}

struct PairCell {
    car: Value,
    cdr: Value,
    mark: bool,
}

struct ClosureSlot {
    closure: Option<Closure>,
    mark: bool,
}

/// The cell store. All pairs and closures are allocated here.
pub struct Heap {
    cells: Vec<PairCell>,
    free_pairs: Vec<PairId>,
    closures: Vec<ClosureSlot>,
    free_closures: Vec<ClosureId>,
    capacity: usize,
    allocs_since_gc: usize,
    gc_threshold: usize,
}

impl Heap {
    pub fn new(capacity: usize, gc_threshold: usize) -> Self {
        Heap {
            cells: Vec::with_capacity(1024),
            free_pairs: Vec::new(),
            closures: Vec::new(),
            free_closures: Vec::new(),
            capacity,
            allocs_since_gc: 0,
            gc_threshold,
        }
    }

    /// Allocate a new pair.
    pub fn cons(&mut self, car: Value, cdr: Value) -> Result<Value, Error> {
        self.alloc_pair(car, cdr).map(Value::Pair)
    }

    pub fn alloc_pair(&mut self, car: Value, cdr: Value) -> Result<PairId, Error> {
        self.allocs_since_gc += 1;

        if let Some(id) = self.free_pairs.pop() {
            let cell = &mut self.cells[id.0 as usize];
            cell.car = car;
            cell.cdr = cdr;
            cell.mark = false;
            return Ok(id);
        }

        if self.cells.len() >= self.capacity {
            return Err(Error::HeapExhausted {
                capacity: self.capacity,
            });
        }

        let id = PairId(self.cells.len() as u32);
        self.cells.push(PairCell {
            car,
            cdr,
            mark: false,
        });
        Ok(id)
    }

    pub fn make_closure(
        &mut self,
        params: Value,
        body: Value,
        env: Value,
        is_macro: bool,
    ) -> Result<Value, Error> {
        self.allocs_since_gc += 1;
        let closure = Closure {
            params,
            body,
            env,
            is_macro,
        };

        if let Some(id) = self.free_closures.pop() {
            let slot = &mut self.closures[id.0 as usize];
            slot.closure = Some(closure);
            slot.mark = false;
            return Ok(Value::Closure(id));
        }

        if self.closures.len() >= self.capacity {
            return Err(Error::HeapExhausted {
                capacity: self.capacity,
            });
        }

        let id = ClosureId(self.closures.len() as u32);
        self.closures.push(ClosureSlot {
            closure: Some(closure),
            mark: false,
        });
        Ok(Value::Closure(id))
    }

    /// The first and rest of a pair.
    #[inline]
    pub fn pair(&self, id: PairId) -> (Value, Value) {
        let cell = &self.cells[id.0 as usize];
        (cell.car, cell.cdr)
    }

    /// First element of a pair, `()` for anything else.
    #[inline]
    pub fn car(&self, val: Value) -> Value {
        match val {
            Value::Pair(id) => self.cells[id.0 as usize].car,
            _ => Value::Nil,
        }
    }

    /// Rest of a pair, `()` for anything else.
    #[inline]
    pub fn cdr(&self, val: Value) -> Value {
        match val {
            Value::Pair(id) => self.cells[id.0 as usize].cdr,
            _ => Value::Nil,
        }
    }

    /// Overwrite the rest of a pair. Pairs are otherwise immutable; this is
    /// used by `def` and by the evaluator's pending cons slot.
    #[inline]
    pub fn set_cdr(&mut self, id: PairId, val: Value) {
        self.cells[id.0 as usize].cdr = val;
    }

    pub fn closure(&self, id: ClosureId) -> Option<Closure> {
        self.closures.get(id.0 as usize).and_then(|slot| slot.closure)
    }

    /// Build a proper list from a slice of values.
    pub fn list(&mut self, values: &[Value]) -> Result<Value, Error> {
        let mut result = Value::Nil;
        for &val in values.iter().rev() {
            result = self.cons(val, result)?;
        }
        Ok(result)
    }

    /// Collect the elements of a list into a Vec, ignoring a dotted tail.
    pub fn list_to_vec(&self, val: Value) -> Vec<Value> {
        let mut result = Vec::new();
        let mut current = val;
        while let Value::Pair(id) = current {
            let (car, cdr) = self.pair(id);
            result.push(car);
            current = cdr;
        }
        result
    }

    /// Number of pairs in the list spine.
    pub fn list_len(&self, val: Value) -> usize {
        let mut len = 0;
        let mut current = val;
        while let Value::Pair(id) = current {
            len += 1;
            current = self.cells[id.0 as usize].cdr;
        }
        len
    }

    /// Number of live pairs (accurate after a collection).
    pub fn live_pairs(&self) -> usize {
        self.cells.len() - self.free_pairs.len()
    }

    /// Number of live closures (accurate after a collection).
    pub fn live_closures(&self) -> usize {
        self.closures.len() - self.free_closures.len()
    }

    /// Returns true if enough has been allocated to make a collection worthwhile.
    pub fn should_collect(&self) -> bool {
        self.allocs_since_gc >= self.gc_threshold
    }

    /// Mark everything reachable from `roots` and put the rest on the free
    /// lists. Callers must pass every value they still hold.
    pub fn collect(&mut self, roots: &[Value]) {
        for cell in &mut self.cells {
            cell.mark = false;
        }
        for slot in &mut self.closures {
            slot.mark = false;
        }

        let mut worklist: Vec<Value> = roots.to_vec();
        while let Some(val) = worklist.pop() {
            match val {
                Value::Pair(id) => {
                    let cell = &mut self.cells[id.0 as usize];
                    if !cell.mark {
                        cell.mark = true;
                        worklist.push(cell.car);
                        worklist.push(cell.cdr);
                    }
                }
                Value::Closure(id) => {
                    let slot = &mut self.closures[id.0 as usize];
                    if !slot.mark {
                        slot.mark = true;
                        if let Some(closure) = slot.closure {
                            worklist.push(closure.params);
                            worklist.push(closure.body);
                            worklist.push(closure.env);
                        }
                    }
                }
                _ => {}
            }
        }

        self.free_pairs.clear();
        for (i, cell) in self.cells.iter_mut().enumerate() {
            if !cell.mark {
                cell.car = Value::Nil;
                cell.cdr = Value::Nil;
                self.free_pairs.push(PairId(i as u32));
            }
        }
        self.free_closures.clear();
        for (i, slot) in self.closures.iter_mut().enumerate() {
            if !slot.mark {
                slot.closure = None;
                self.free_closures.push(ClosureId(i as u32));
            }
        }
        // Reuse low indices first.
        self.free_pairs.reverse();
        self.free_closures.reverse();

        self.allocs_since_gc = 0;
        log::debug!(
            "Collected: {} pairs and {} closures live",
            self.live_pairs(),
            self.live_closures()
        );
    }
}
