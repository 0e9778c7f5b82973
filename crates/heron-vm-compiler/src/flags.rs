//! Compile flags and eval configuration, loadable from TOML

use serde::Deserialize;
use std::path::Path;

use crate::error::{CompileError, CompileResult};

/// Options controlling one compilation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompileFlags {
    /// Emit debug locations for every instruction
    pub debug: bool,
    /// Run the optimization pipeline
    pub optimize: bool,
    /// Defer body compilation
    pub lazy: bool,
    /// Force strict mode
    pub strict: bool,
    /// Insert cooperative preemption checks
    pub emit_async_break_check: bool,
    /// Size bound for inlining decisions
    pub inline_max_size: u32,
    /// Source must contain exactly one function (Function constructor mode)
    pub require_single_function: bool,
    /// Verify the IR after every pass
    pub verify_ir: bool,
}

impl Default for CompileFlags {
    fn default() -> Self {
        Self {
            debug: false,
            optimize: true,
            lazy: false,
            strict: false,
            emit_async_break_check: false,
            inline_max_size: 1,
            require_single_function: false,
            verify_ir: cfg!(debug_assertions),
        }
    }
}

impl CompileFlags {
    /// Parse flags from TOML text
    pub fn from_toml_str(text: &str) -> CompileResult<Self> {
        toml::from_str(text).map_err(|e| CompileError::config(e.to_string()))
    }

    /// Load flags from a TOML file
    pub fn load(path: &Path) -> CompileResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CompileError::config(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from `path` if given, falling back to defaults on any failure
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path.map(Self::load) {
            Some(Ok(flags)) => flags,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "using default compile flags");
                Self::default()
            }
            None => Self::default(),
        }
    }

    /// Set `debug`
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Set `optimize`
    pub fn with_optimize(mut self, optimize: bool) -> Self {
        self.optimize = optimize;
        self
    }

    /// Set `lazy`
    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    /// Set `strict`
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Set `emit_async_break_check`
    pub fn with_async_break_check(mut self, emit: bool) -> Self {
        self.emit_async_break_check = emit;
        self
    }

    /// Set `require_single_function`
    pub fn with_single_function(mut self, single: bool) -> Self {
        self.require_single_function = single;
        self
    }

    /// Set `verify_ir`
    pub fn with_verify_ir(mut self, verify: bool) -> Self {
        self.verify_ir = verify;
        self
    }
}

/// Runtime policy of the eval bridge
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Allow compiling source at runtime
    pub enable_eval: bool,
    /// Source length, in bytes, from which eval compiles lazily
    pub lazy_threshold: usize,
    /// Stack size of the compilation thread
    pub stack_size: usize,
    /// Flags every eval compilation starts from
    pub flags: CompileFlags,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            enable_eval: true,
            lazy_threshold: 64 * 1024,
            stack_size: 16 * 1024 * 1024,
            flags: CompileFlags::default(),
        }
    }
}

impl EvalConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> CompileResult<Self> {
        toml::from_str(text).map_err(|e| CompileError::config(e.to_string()))
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> CompileResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CompileError::config(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from `path` if given, falling back to defaults on any failure
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path.map(Self::load) {
            Some(Ok(config)) => config,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "using default eval config");
                Self::default()
            }
            None => Self::default(),
        }
    }

    /// Set `enable_eval`
    pub fn with_enable_eval(mut self, enable: bool) -> Self {
        self.enable_eval = enable;
        self
    }

    /// Set `lazy_threshold`
    pub fn with_lazy_threshold(mut self, threshold: usize) -> Self {
        self.lazy_threshold = threshold;
        self
    }

    /// Set `stack_size`
    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    /// Set the base compile flags
    pub fn with_flags(mut self, flags: CompileFlags) -> Self {
        self.flags = flags;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let flags = CompileFlags::from_toml_str("debug = true\ninline_max_size = 8\n").unwrap();
        assert!(flags.debug);
        assert!(flags.optimize);
        assert_eq!(flags.inline_max_size, 8);
    }

    #[test]
    fn test_eval_config_nested_flags() {
        let config = EvalConfig::from_toml_str(
            "enable_eval = false\nlazy_threshold = 10\n[flags]\nstrict = true\n",
        )
        .unwrap();
        assert!(!config.enable_eval);
        assert_eq!(config.lazy_threshold, 10);
        assert!(config.flags.strict);
        assert_eq!(config.stack_size, EvalConfig::default().stack_size);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = CompileFlags::from_toml_str("debug = 3").unwrap_err();
        assert!(matches!(err, CompileError::Config(_)));
    }

    #[test]
    fn test_missing_file_falls_back() {
        let flags = CompileFlags::load_or_default(Some(Path::new("/nonexistent/heron.toml")));
        assert_eq!(flags, CompileFlags::default());
    }
}
