//! crisp - a minimal Lisp runtime
//!
//! This crate provides a small Lisp-family language: a reader, a printer and
//! an evaluator built around a tail-call trampoline. Every value is a tagged
//! cell; lists are chains of pairs stored in an arena, symbols are interned,
//! and environments are ordinary association lists that closures capture.
//!
//! ## Language Overview
//!
//! ```text
//! def fact (lambda (n) if (asc 0 n) (product n (fact (sum n -1))) 1)
//! (fact 10)                        ; 3628800
//! (if () a b c)                    ; c - a fourth argument overrides else
//! (with x 5 sum x 1)               ; 6
//! (zip (quote a b c) (quote d e))  ; (a . d) (b . e)
//! (def libc (dlopen libc.so.6))
//! (libc.strlen hello)              ; 5
//! ```
//!
//! The outermost parentheses of a line are implicit: the reader returns the
//! list of everything it read, and a one-element list evaluates to its only
//! member.
//!
//! ## Tail Calls
//!
//! Closure bodies and the branches of `if`, `with`, `apply` and `eval` are
//! evaluated in the evaluator's own loop rather than by recursion, so
//! self-recursive programs run in constant native stack. A tail call whose
//! result lands in the rest of a fresh `cons` is also iterative
//! ("TCO modulo cons"). Non-tail recursion is bounded by a stack guard that
//! aborts evaluation with [`Error::StackOverflow`].
//!
//! ## Errors
//!
//! Malformed arguments to builtins never raise: they produce `()`. Only
//! conditions the language cannot continue past surface as [`Error`]s.
//!
//! ## Modules
//!
//! - `cell`: the cell store (values, pairs, closures, natives)
//! - `symbol`: the symbol table
//! - `reader`: S-expression parsing from text
//! - `printer`: text rendering of values
//! - `env`: association-list environments
//! - `evaluator`: the reduction loop and apply engine
//! - `builtinops`: special forms and builtin functions
//! - `ffi`: shared-library loading, foreign calls and module import
//! - `config`: interpreter limits and search paths

use std::fmt;

/// Default native stack budget for non-tail evaluation, in bytes
pub const DEFAULT_STACK_LIMIT: usize = 1024 * 1024;

/// Default maximum nesting of parentheses accepted by the reader
pub const DEFAULT_MAX_PARSE_DEPTH: usize = 1024;

/// Default maximum number of pairs the cell store may hold at once
pub const DEFAULT_HEAP_CAPACITY: usize = 1 << 24;

/// Default number of allocations between two collections
pub const DEFAULT_GC_THRESHOLD: usize = 1 << 20;

/// Maximum number of arguments marshalled into a foreign call
pub const MAX_FOREIGN_ARGS: usize = 6;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Input ended before the expression was complete (unclosed parens)
    Incomplete,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    /// Create a ParseError with all fields
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a ParseError with context extracted from input at a given offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let context_start = error_offset.saturating_sub(20);
        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.len() < input.len() {
            display_context.push_str("[...]");
        }

        let display_context = display_context.replace('\n', "\\n").replace('\r', "");
        let found = input.chars().nth(error_offset).map(String::from);

        Self::new(kind, message, Some(display_context), found)
    }
}

/// Conditions the interpreter cannot continue past.
///
/// None of these are visible to the running program: a builtin that meets
/// bad input returns `()` instead. An `Error` always unwinds the whole
/// evaluation back to the embedding caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    ParseError(ParseError),
    /// Non-tail evaluation used more native stack than the configured limit
    StackOverflow {
        used: usize,
        limit: usize,
    },
    /// Something other than a function, macro or native reached the apply engine
    NotCallable(String),
    /// The cell store is full
    HeapExhausted {
        capacity: usize,
    },
    /// `assert` was called without an argument or its argument evaluated to `()`
    AssertionFailed(String),
}

impl Error {
    /// Create a TooDeeplyNested ParseError pointing into `input`
    pub(crate) fn too_deeply_nested(input: &str, offset: usize, max_depth: usize) -> Self {
        Error::ParseError(ParseError::with_context(
            ParseErrorKind::TooDeeplyNested,
            format!("Expression too deeply nested (max depth: {max_depth})"),
            input,
            offset,
        ))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParseError(e) => {
                write!(f, "ParseError: {}", e.message)?;
                if let Some(found) = &e.found {
                    write!(f, "\nFound: {found}")?;
                }
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            Error::StackOverflow { used, limit } => write!(
                f,
                "Stack overflowed: {used} bytes of native stack in use (limit: {limit})"
            ),
            Error::NotCallable(what) => write!(f, "Tried to apply something uncallable: {what}"),
            Error::HeapExhausted { capacity } => {
                write!(f, "Failed to allocate memory for new cell (capacity: {capacity})")
            }
            Error::AssertionFailed(msg) => write!(f, "Fatal assertion failure: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

pub mod builtinops;
pub mod cell;
pub mod config;
pub mod env;
pub mod evaluator;
pub mod ffi;
pub mod printer;
pub mod reader;
pub mod symbol;

pub use cell::Value;
pub use config::InterpreterConfig;
pub use evaluator::{Interpreter, Step};
