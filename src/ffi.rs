//! Shared-library loading, foreign calls and module import.
//!
//! Libraries are opened with `libloading` and live for as long as the
//! interpreter. A resolved symbol is remembered per library, so evaluating
//! `libc.strlen` twice yields the same `FFI_FUNCTION` value.
//!
//! Foreign calls are untyped: every argument is passed as one machine word
//! and the result is read back as a 64-bit integer.

use std::collections::HashMap;
use std::ffi::{CString, c_void};
use std::fs;

use libloading::Library;

use crate::cell::{ForeignId, LibraryId, Value};
use crate::evaluator::Interpreter;
use crate::symbol::SymbolId;
use crate::{Error, MAX_FOREIGN_ARGS, env};

struct OpenLibrary {
    name: String,
    library: Library,
}

/// A symbol resolved in an open library.
#[derive(Debug, Clone)]
pub struct ForeignSymbol {
    pub library: LibraryId,
    pub name: String,
    pub address: usize,
}

/// Libraries opened and symbols resolved so far.
#[derive(Default)]
pub struct ForeignTable {
    libraries: Vec<OpenLibrary>,
    by_name: HashMap<String, LibraryId>,
    functions: Vec<ForeignSymbol>,
    resolved: HashMap<LibraryId, HashMap<String, ForeignId>>,
}

impl ForeignTable {
    /// Open a shared library by file name or path. Opening the same name
    /// twice returns the same handle.
    pub fn open(&mut self, name: &str) -> Option<LibraryId> {
        if let Some(&id) = self.by_name.get(name) {
            return Some(id);
        }
        // SAFETY: loading a library runs its initialisers; the caller asked
        // for this library by name.
        let library = match unsafe { Library::new(name) } {
            Ok(library) => library,
            Err(e) => {
                log::warn!("Failed to open library {name}: {e}");
                return None;
            }
        };
        let id = LibraryId(self.libraries.len() as u32);
        self.libraries.push(OpenLibrary {
            name: name.to_owned(),
            library,
        });
        self.by_name.insert(name.to_owned(), id);
        log::debug!("Opened library {name}");
        Some(id)
    }

    /// Look up `name` in an open library.
    pub fn resolve(&mut self, library: LibraryId, name: &str) -> Option<ForeignId> {
        if let Some(&id) = self.resolved.get(&library).and_then(|names| names.get(name)) {
            return Some(id);
        }
        let open = self.libraries.get(library.0 as usize)?;
        // SAFETY: the symbol is only read as an address, never dereferenced here.
        let address = match unsafe { open.library.get::<*const c_void>(name.as_bytes()) } {
            Ok(symbol) => *symbol as usize,
            Err(e) => {
                log::warn!("Failed to resolve {}.{name}: {e}", open.name);
                return None;
            }
        };
        if address == 0 {
            return None;
        }

        let id = ForeignId(self.functions.len() as u32);
        self.functions.push(ForeignSymbol {
            library,
            name: name.to_owned(),
            address,
        });
        self.resolved
            .entry(library)
            .or_default()
            .insert(name.to_owned(), id);
        Some(id)
    }

    pub fn function(&self, id: ForeignId) -> Option<&ForeignSymbol> {
        self.functions.get(id.0 as usize)
    }

    pub fn library_name(&self, id: LibraryId) -> Option<&str> {
        self.libraries.get(id.0 as usize).map(|open| open.name.as_str())
    }

    /// The library and symbol name a foreign function was resolved from.
    pub fn function_name(&self, id: ForeignId) -> Option<(&str, &str)> {
        let function = self.function(id)?;
        let library = self.library_name(function.library)?;
        Some((library, function.name.as_str()))
    }
}

/// Split `lib.symbol` at the last dot. Both parts must be non-empty.
pub fn split_foreign_name(name: &str) -> Option<(&str, &str)> {
    let (library, symbol) = name.rsplit_once('.')?;
    if library.is_empty() || symbol.is_empty() {
        return None;
    }
    Some((library, symbol))
}

/// Call the C function at `address` with word-sized arguments.
///
/// # Safety
///
/// `address` must be the entry point of a C function that accepts
/// `args.len()` integer or pointer arguments and returns a 64-bit integer,
/// and every pointer in `args` must be valid for the duration of the call.
unsafe fn call_foreign(address: usize, args: &[usize]) -> i64 {
    type F0 = unsafe extern "C" fn() -> i64;
    type F1 = unsafe extern "C" fn(usize) -> i64;
    type F2 = unsafe extern "C" fn(usize, usize) -> i64;
    type F3 = unsafe extern "C" fn(usize, usize, usize) -> i64;
    type F4 = unsafe extern "C" fn(usize, usize, usize, usize) -> i64;
    type F5 = unsafe extern "C" fn(usize, usize, usize, usize, usize) -> i64;
    type F6 = unsafe extern "C" fn(usize, usize, usize, usize, usize, usize) -> i64;

    unsafe {
        match *args {
            [] => std::mem::transmute::<usize, F0>(address)(),
            [a] => std::mem::transmute::<usize, F1>(address)(a),
            [a, b] => std::mem::transmute::<usize, F2>(address)(a, b),
            [a, b, c] => std::mem::transmute::<usize, F3>(address)(a, b, c),
            [a, b, c, d] => std::mem::transmute::<usize, F4>(address)(a, b, c, d),
            [a, b, c, d, e] => std::mem::transmute::<usize, F5>(address)(a, b, c, d, e),
            [a, b, c, d, e, f, ..] => {
                std::mem::transmute::<usize, F6>(address)(a, b, c, d, e, f)
            }
        }
    }
}

impl Interpreter {
    /// `dlopen name`: a library handle, or `()` if it cannot be opened.
    pub fn open_library(&mut self, name: SymbolId) -> Value {
        let name = self.symbols.name(name);
        match self.ffi.open(name) {
            Some(id) => Value::ForeignLibrary(id),
            None => Value::Nil,
        }
    }

    /// `dlsym lib name`: a foreign function, or `()` if the symbol is missing.
    pub fn resolve_foreign(&mut self, library: LibraryId, name: SymbolId) -> Value {
        let name = self.symbols.name(name);
        match self.ffi.resolve(library, name) {
            Some(id) => Value::ForeignFunction(id),
            None => Value::Nil,
        }
    }

    /// Resolve a symbol like `libc.puts` whose prefix is bound to a library
    /// in `env`.
    pub(crate) fn find_foreign_symbol(&mut self, symbol: SymbolId, env: Value) -> Option<Value> {
        let (library, function) = split_foreign_name(self.symbols.name(symbol))?;
        let library = self.symbols.lookup(library)?;
        let Value::ForeignLibrary(library) = env::lookup(&self.heap, Value::Symbol(library), env)?
        else {
            return None;
        };
        self.ffi
            .resolve(library, function)
            .map(Value::ForeignFunction)
    }

    /// Call a foreign function with up to [`MAX_FOREIGN_ARGS`] arguments.
    /// Symbols are passed as NUL-terminated strings, integers as words and
    /// foreign functions as their address; anything else is passed as 0.
    pub(crate) fn apply_foreign(&mut self, id: ForeignId, args: Value) -> Result<Value, Error> {
        let Some(address) = self.ffi.function(id).map(|function| function.address) else {
            return Err(Error::NotCallable(format!("{:?}", Value::ForeignFunction(id))));
        };

        let mut words = [0usize; MAX_FOREIGN_ARGS];
        let mut strings = Vec::new();
        let mut count = 0;
        let mut current = args;
        while let Value::Pair(pair) = current
            && count < MAX_FOREIGN_ARGS
        {
            let (arg, rest) = self.heap.pair(pair);
            words[count] = match arg {
                Value::Symbol(name) => match CString::new(self.symbols.name(name)) {
                    Ok(text) => {
                        let pointer = text.as_ptr() as usize;
                        strings.push(text);
                        pointer
                    }
                    Err(_) => 0,
                },
                Value::Integer(n) => n as usize,
                Value::ForeignFunction(f) => self.ffi.function(f).map_or(0, |f| f.address),
                _ => 0,
            };
            count += 1;
            current = rest;
        }

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Calling {} with {count} arguments",
                self.print(Value::ForeignFunction(id))
            );
        }
        // SAFETY: the address came from a successful symbol lookup and the
        // argument strings outlive the call.
        let result = unsafe { call_foreign(address, &words[..count]) };
        drop(strings);
        Ok(Value::Integer(result))
    }

    /// `import name`: evaluate `name.crisp` from the module search path, or
    /// the script embedded in `libname.crisp.so`. Returns the last result, or
    /// `()` if the module cannot be found.
    pub fn import_module(&mut self, name: SymbolId, env: Value) -> Result<Value, Error> {
        let name = self.symbols.name(name).to_owned();

        let paths = self.config().module_paths.clone();
        for dir in paths {
            let path = dir.join(format!("{name}.crisp"));
            if !path.is_file() {
                continue;
            }
            return match fs::read_to_string(&path) {
                Ok(source) => {
                    log::debug!("Importing {name} from {}", path.display());
                    self.eval_lines_in(&source, env)
                }
                Err(e) => {
                    log::warn!("Failed to read module {}: {e}", path.display());
                    Ok(Value::Nil)
                }
            };
        }

        let file = format!("lib{name}.crisp.so");
        let Some(library) = self.ffi.open(&file) else {
            return Ok(Value::Nil);
        };
        let start = self.ffi.resolve(library, &format!("_binary_{name}_crisp_start"));
        let end = self.ffi.resolve(library, &format!("_binary_{name}_crisp_end"));
        let (Some(start), Some(end)) = (start, end) else {
            return Ok(Value::Nil);
        };
        let (Some(start), Some(end)) = (self.ffi.function(start), self.ffi.function(end)) else {
            return Ok(Value::Nil);
        };
        let (start, end) = (start.address, end.address);
        if end < start {
            return Ok(Value::Nil);
        }
        // SAFETY: the linker places the embedded script between these two
        // symbols, and the library stays loaded while the text is copied.
        let bytes = unsafe { std::slice::from_raw_parts(start as *const u8, end - start) };
        let source = String::from_utf8_lossy(bytes).into_owned();

        let this = Value::Symbol(self.symbols.well_known().this);
        let binding = self.heap.cons(this, Value::ForeignLibrary(library))?;
        let module_env = self.heap.cons(binding, env)?;
        log::debug!("Importing {name} from {file}");
        self.eval_lines_in(&source, module_env)
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::InterpreterConfig;

    #[test]
    fn test_split_foreign_name_uses_last_dot() {
        assert_eq!(split_foreign_name("libc.puts"), Some(("libc", "puts")));
        assert_eq!(split_foreign_name("ab.cd.ef"), Some(("ab.cd", "ef")));
        assert_eq!(split_foreign_name("plain"), None);
        assert_eq!(split_foreign_name(".hidden"), None);
        assert_eq!(split_foreign_name("trailing."), None);
    }

    #[test]
    fn test_missing_library_and_module_yield_nil() {
        let mut interp = Interpreter::new().unwrap();
        assert_eq!(
            interp.eval_line("dlopen libdefinitely-not-here.so").unwrap(),
            Value::Nil
        );
        assert_eq!(
            interp.eval_line("import definitely-not-a-module").unwrap(),
            Value::Nil
        );
        assert_eq!(interp.eval_line("dlsym 5 puts").unwrap(), Value::Nil);
    }

    #[test]
    fn test_dotted_symbol_without_library_is_itself() {
        let mut interp = Interpreter::new().unwrap();
        interp.eval_line("def notlib 5").unwrap();
        let value = interp.eval_line("notlib.strlen").unwrap();
        assert_eq!(interp.print(value), "notlib.strlen");
    }

    #[test]
    fn test_import_evaluates_module_file() {
        let dir = std::env::temp_dir().join(format!("crisp-import-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("greeting.crisp"),
            "; a tiny module\ndef greet (lambda (x)\n  cons hello x)\nsum 1 2\n",
        )
        .unwrap();

        let config = InterpreterConfig::default().with_module_path(&dir);
        let mut interp = Interpreter::with_config(config).unwrap();
        assert_eq!(interp.eval_line("import greeting").unwrap(), Value::Integer(3));
        let value = interp.eval_line("greet world").unwrap();
        assert_eq!(interp.print(value), "hello . world");

        fs::remove_dir_all(&dir).unwrap();
    }

    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn test_call_into_libc() {
        let mut interp = Interpreter::new().unwrap();
        interp.eval_line("def libc (dlopen libc.so.6)").unwrap();
        assert_eq!(interp.eval_line("libc.strlen hello").unwrap(), Value::Integer(5));

        let strlen = interp.eval_line("libc.strlen").unwrap();
        assert_eq!(interp.print(strlen), "FFI_FUNCTION<libc.so.6.strlen>");
        assert_eq!(interp.eval_line("dlsym libc strlen").unwrap(), strlen);
        assert_eq!(interp.eval_line("apply libc.strlen abc").unwrap(), Value::Integer(3));

        let missing = interp.eval_line("libc.no_such_function_here").unwrap();
        assert_eq!(interp.print(missing), "libc.no_such_function_here");
    }
}
