//! Python runtime.

use async_trait::async_trait;
use base64::Engine as _;
use rustpython_parser::Mode;
use std::sync::Arc;

use super::{DockerRuntime, LanguageRuntime, RuntimeConfig, SyntaxError};
use crate::error::Result;
use crate::manager::SandboxManager;
use crate::result::ExecutionResult;

pub const PYTHON_IMAGE: &str = "codebox-python:latest";

/// Runs a base64-encoded module under pytest. Only the base64 alphabet is
/// ever substituted into this template, so user code cannot break out of
/// the string literal.
const PYTEST_WRAPPER: &str = r#"import base64
import os
import sys
import tempfile

source = base64.b64decode("__SOURCE__").decode("utf-8")
fd, path = tempfile.mkstemp(prefix="test_", suffix=".py", dir="/tmp")
try:
    with os.fdopen(fd, "w") as handle:
        handle.write(source)
    import pytest
    sys.exit(int(pytest.main([path, "-v", "--tb=short", "-p", "no:cacheprovider"])))
finally:
    if os.path.exists(path):
        os.remove(path)
"#;

/// Python 3.12 with pytest, numpy, pandas and requests preinstalled.
pub fn python_config() -> RuntimeConfig {
    RuntimeConfig {
        packages: ["pytest", "numpy", "pandas", "requests"]
            .into_iter()
            .map(String::from)
            .collect(),
        ..RuntimeConfig::new("python", PYTHON_IMAGE, vec!["python".into(), "-c".into()])
    }
}

/// Python code execution runtime.
pub struct PythonRuntime {
    inner: DockerRuntime,
}

impl PythonRuntime {
    pub fn new(manager: Arc<SandboxManager>) -> Self {
        Self::with_config(python_config(), manager)
    }

    /// Python runtime with custom limits, e.g. from the application config.
    pub fn with_config(config: RuntimeConfig, manager: Arc<SandboxManager>) -> Self {
        Self {
            inner: DockerRuntime::new(config, manager),
        }
    }

    pub fn with_build_context(mut self, build_context: impl Into<String>) -> Self {
        self.inner = self.inner.with_build_context(build_context);
        self
    }

    /// Build or locate `codebox-python:latest`.
    pub async fn prepare(&self) -> bool {
        self.inner.prepare().await
    }
}

/// The wrapper script that runs `code` and `test_code` under pytest.
pub fn pytest_script(code: &str, test_code: &str) -> String {
    let combined = format!("{}\n\n{}", code, test_code);
    let encoded = base64::engine::general_purpose::STANDARD.encode(combined.as_bytes());
    PYTEST_WRAPPER.replace("__SOURCE__", &encoded)
}

#[async_trait]
impl LanguageRuntime for PythonRuntime {
    fn language(&self) -> &str {
        self.inner.language()
    }

    fn config(&self) -> &RuntimeConfig {
        self.inner.config()
    }

    async fn run(&self, code: &str, timeout_seconds: Option<u32>) -> Result<ExecutionResult> {
        self.inner.run(code, timeout_seconds).await
    }

    async fn run_tests(&self, code: &str, test_code: &str) -> Result<ExecutionResult> {
        self.inner.run(&pytest_script(code, test_code), None).await
    }

    fn check_syntax(&self, code: &str) -> std::result::Result<(), SyntaxError> {
        check_syntax(code)
    }

    async fn is_available(&self) -> bool {
        self.inner.is_available().await
    }
}

// =============================================================================
// Syntax Pre-check
// =============================================================================

/// Parse `code` as a Python module without running it. Reports the first
/// lexical or grammar error with its 1-based line.
pub fn check_syntax(code: &str) -> std::result::Result<(), SyntaxError> {
    match rustpython_parser::parse(code, Mode::Module, "<string>") {
        Ok(_) => Ok(()),
        Err(err) => {
            let offset = (u32::from(err.offset) as usize).min(code.len());
            let line = code.as_bytes()[..offset].iter().filter(|b| **b == b'\n').count() + 1;
            Err(SyntaxError::new(err.error.to_string(), line))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MockEngine, MockRun};

    #[test]
    fn test_python_config() {
        let config = python_config();
        assert_eq!(config.language, "python");
        assert_eq!(config.image, "codebox-python:latest");
        assert_eq!(config.command, vec!["python", "-c"]);
        assert_eq!(config.file_extension, ".py");
        assert_eq!(config.timeout_seconds, 30);
        assert_eq!(config.memory_limit, "256m");
        assert_eq!(config.cpu_quota, 50_000);
        assert!(config.packages.contains(&"pytest".to_string()));
    }

    #[test]
    fn test_valid_code_passes() {
        let code = r#"
import math

def area(r):
    # (unbalanced in a comment
    return math.pi * r ** 2

class Shape:
    sides: int = 0

data = {"a": [1, 2, (3, 4)], 'b': "it's"}
text = """multi
line ) string"""
path = r"C:\temp"
squares = [n * n for n in range(10) if n % 2]
print(f"{area(2):.2f}", data[\
    "a"], squares)
"#;
        assert_eq!(check_syntax(code), Ok(()));
        assert_eq!(check_syntax(""), Ok(()));
    }

    #[test]
    fn test_grammar_errors_are_caught() {
        for code in ["x = = 1", "if True print(1)", "print 'hi'", "class :", "return = 5"] {
            let err = check_syntax(code).unwrap_err();
            assert_eq!(err.line, 1, "{:?}", code);
            assert!(!err.message.is_empty());
        }

        let err = check_syntax("def f(\n    return 1)").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_error_line_points_past_valid_prefix() {
        let err = check_syntax("a = 1\nb = 2\nc = = 3\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.to_string().ends_with(" at line 3"));
    }

    #[test]
    fn test_unterminated_strings() {
        let err = check_syntax("x = 1\nprint('hello)\n").unwrap_err();
        assert_eq!(err.line, 2);

        assert!(check_syntax("doc = \"\"\"never\nclosed\n").is_err());
    }

    #[test]
    fn test_bracket_errors() {
        assert!(check_syntax("print('hi'))").is_err());
        assert!(check_syntax("x = [1, 2)").is_err());

        let err = check_syntax("def f(:\n    pass\n").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn test_pytest_script_only_embeds_base64() {
        let code = "def add(a, b):\n    return a + b";
        let tests = "def test_add():\n    assert add(1, 2) == 3\n    s = \"\"\"x\"\"\" + '''y'''";
        let script = pytest_script(code, tests);

        assert!(!script.contains("def add"));
        assert!(!script.contains("'''y'''"));
        assert!(script.contains("-p\", \"no:cacheprovider"));
        assert!(script.contains("finally:"));

        let encoded = script
            .split("b64decode(\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap();
        let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).unwrap();
        assert_eq!(
            String::from_utf8(decoded).unwrap(),
            format!("{}\n\n{}", code, tests)
        );
    }

    #[tokio::test]
    async fn test_run_tests_runs_wrapper_through_python() {
        let engine = Arc::new(MockEngine::new(vec![MockRun::stdout("1 passed")]));
        let manager = Arc::new(SandboxManager::new(engine.clone(), None).unwrap());
        let runtime = PythonRuntime::new(manager);

        let result = runtime
            .run_tests("def f(): return 1", "def test_f(): assert f() == 1")
            .await
            .unwrap();
        assert!(result.success);

        let spec = &engine.created_specs().await[0];
        assert_eq!(spec.image, "codebox-python:latest");
        assert_eq!(&spec.cmd[..2], ["python", "-c"]);
        assert!(spec.cmd[2].starts_with("import base64"));
    }
}
