//! Interpreter limits and search paths.

use std::path::PathBuf;

use crate::{
    DEFAULT_GC_THRESHOLD, DEFAULT_HEAP_CAPACITY, DEFAULT_MAX_PARSE_DEPTH, DEFAULT_STACK_LIMIT,
};

/// Configuration fixed when an [`Interpreter`](crate::Interpreter) is created.
#[derive(Debug, Clone, PartialEq)]
pub struct InterpreterConfig {
    /// Bytes of native stack non-tail evaluation may use before
    /// [`Error::StackOverflow`](crate::Error::StackOverflow)
    pub stack_limit: usize,
    /// Deepest parenthesis nesting the reader accepts
    pub max_parse_depth: usize,
    /// Maximum live pairs (and separately, closures) in the cell store
    pub heap_capacity: usize,
    /// Allocations between collections
    pub gc_threshold: usize,
    /// Directories searched for `name.crisp` by `import`
    pub module_paths: Vec<PathBuf>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            stack_limit: DEFAULT_STACK_LIMIT,
            max_parse_depth: DEFAULT_MAX_PARSE_DEPTH,
            heap_capacity: DEFAULT_HEAP_CAPACITY,
            gc_threshold: DEFAULT_GC_THRESHOLD,
            module_paths: vec![PathBuf::from(".")],
        }
    }
}

impl InterpreterConfig {
    /// Defaults overridden by `CRISP_STACK_LIMIT`, `CRISP_MAX_PARSE_DEPTH`,
    /// `CRISP_HEAP_CAPACITY`, `CRISP_GC_THRESHOLD` and `CRISP_MODULE_PATH`
    /// (a `PATH`-style list). Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let module_paths = match std::env::var_os("CRISP_MODULE_PATH") {
            Some(paths) => std::env::split_paths(&paths).collect(),
            None => defaults.module_paths,
        };
        InterpreterConfig {
            stack_limit: env_usize("CRISP_STACK_LIMIT", defaults.stack_limit),
            max_parse_depth: env_usize("CRISP_MAX_PARSE_DEPTH", defaults.max_parse_depth),
            heap_capacity: env_usize("CRISP_HEAP_CAPACITY", defaults.heap_capacity),
            gc_threshold: env_usize("CRISP_GC_THRESHOLD", defaults.gc_threshold),
            module_paths,
        }
    }

    pub fn with_stack_limit(mut self, stack_limit: usize) -> Self {
        self.stack_limit = stack_limit;
        self
    }

    pub fn with_heap_capacity(mut self, heap_capacity: usize) -> Self {
        self.heap_capacity = heap_capacity;
        self
    }

    pub fn with_gc_threshold(mut self, gc_threshold: usize) -> Self {
        self.gc_threshold = gc_threshold;
        self
    }

    pub fn with_module_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.module_paths.push(path.into());
        self
    }
}

fn env_usize(key: &str, default_value: usize) -> usize {
    let raw = match std::env::var(key) {
        Ok(value) => value,
        Err(_) => return default_value,
    };
    match raw.trim().parse::<usize>() {
        Ok(value) => value,
        Err(_) => {
            log::warn!("Ignoring {key}: expected an unsigned integer, got '{raw}'");
            default_value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_override_defaults() {
        let config = InterpreterConfig::default()
            .with_stack_limit(4096)
            .with_heap_capacity(10)
            .with_gc_threshold(5)
            .with_module_path("/opt/crisp");
        assert_eq!(config.stack_limit, 4096);
        assert_eq!(config.heap_capacity, 10);
        assert_eq!(config.gc_threshold, 5);
        assert_eq!(
            config.module_paths,
            vec![PathBuf::from("."), PathBuf::from("/opt/crisp")]
        );
        assert_eq!(config.max_parse_depth, DEFAULT_MAX_PARSE_DEPTH);
    }

    #[test]
    fn test_env_usize_falls_back_on_missing_key() {
        assert_eq!(env_usize("CRISP_TEST_SURELY_UNSET_KEY", 17), 17);
    }
}
