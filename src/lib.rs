// Copyright 2025 Cornell University
// released under MIT License

pub mod ast;
pub mod codegen;
pub mod diagnostic;
pub mod errors;
pub mod js_builder;
pub mod parser;
pub mod refs;
pub mod serialize;

use std::path::Path;

use crate::diagnostic::DiagnosticHandler;

/// Where the generated module imports XState from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeSource {
    /// the `xstate` npm package
    Package,
    /// the hosted ES module build
    Remote,
}

impl RuntimeSource {
    pub fn specifier(self) -> &'static str {
        match self {
            RuntimeSource::Package => "xstate",
            RuntimeSource::Remote => "https://cdn.skypack.dev/xstate",
        }
    }
}

impl Default for RuntimeSource {
    /// `Remote` when built with the `remote-runtime` feature
    fn default() -> Self {
        if cfg!(feature = "remote-runtime") {
            RuntimeSource::Remote
        } else {
            RuntimeSource::Package
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompileOptions {
    pub runtime: RuntimeSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileResult {
    pub success: bool,
    /// the generated module, `None` unless `success`
    pub output: Option<String>,
}

/// Compiles Lucy `source` into an XState module. Fatal problems yield an
/// unsuccessful result without output; all diagnostics go to `handler`.
pub fn compile(
    source: &str,
    filename: &str,
    options: &CompileOptions,
    handler: &mut DiagnosticHandler,
) -> CompileResult {
    match parser::parse(source, filename, handler) {
        Ok(program) => CompileResult {
            success: true,
            output: Some(codegen::generate(program, options, handler)),
        },
        Err(err) => {
            log::error!("{err}");
            CompileResult {
                success: false,
                output: None,
            }
        }
    }
}

/// Reads and compiles the Lucy file at `path`.
pub fn compile_file(
    path: impl AsRef<Path>,
    options: &CompileOptions,
    handler: &mut DiagnosticHandler,
) -> errors::Result<String> {
    let program = parser::parse_file(path, handler)?;
    Ok(codegen::generate(program, options, handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CompileError;

    fn package() -> CompileOptions {
        CompileOptions {
            runtime: RuntimeSource::Package,
        }
    }

    fn compile_fixture(path: &str) -> String {
        let mut handler = DiagnosticHandler::default();
        match compile_file(path, &package(), &mut handler) {
            Ok(js) => js,
            Err(e) => panic!("{e}\n{}", handler.error_string()),
        }
    }

    #[test]
    fn toggle() {
        assert_eq!(
            compile_fixture("tests/toggle.lucy"),
            include_str!("../tests/toggle.js").trim_end()
        );
    }

    #[test]
    fn nested_state() {
        assert_eq!(
            compile_fixture("tests/nested_state/input.lucy"),
            include_str!("../tests/nested_state/expected.js").trim_end()
        );
    }

    #[test]
    fn login() {
        assert_eq!(
            compile_fixture("tests/login.lucy"),
            include_str!("../tests/login.js").trim_end()
        );
    }

    #[test]
    fn compile_from_source() {
        let mut handler = DiagnosticHandler::default();
        let result = compile(
            "machine door { initial state closed { open => opened } state opened {} }",
            "door.lucy",
            &package(),
            &mut handler,
        );
        assert!(result.success);
        let output = result.output.unwrap();
        assert!(output
            .starts_with("import { Machine } from 'xstate';\n\nexport const door = Machine({"));
        assert!(output.contains("open: 'opened'"));
        assert_eq!(handler.warning_count(), 0);
    }

    #[test]
    fn events_around_child_states_are_reported() {
        let mut handler = DiagnosticHandler::default();
        let result = compile(
            "machine m {
  initial state red {
    timer => green
    initial state walk { countdown => wait }
    state wait {}
    reset => red
  }
  state green {}
}",
            "around.lucy",
            &package(),
            &mut handler,
        );
        assert!(result.success);
        assert_eq!(handler.warning_count(), 1);
        assert!(handler.error_string().contains("`on` is written twice"));
    }

    #[test]
    fn parse_failure_has_no_output() {
        let mut handler = DiagnosticHandler::default();
        let result = compile("machine {", "broken.lucy", &package(), &mut handler);
        assert_eq!(
            result,
            CompileResult {
                success: false,
                output: None
            }
        );
        assert_eq!(handler.error_count(), 1);
    }

    #[test]
    fn remote_runtime() {
        let mut handler = DiagnosticHandler::default();
        let options = CompileOptions {
            runtime: RuntimeSource::Remote,
        };
        let result = compile("machine {}", "remote.lucy", &options, &mut handler);
        assert_eq!(
            result.output.as_deref(),
            Some("import { Machine } from 'https://cdn.skypack.dev/xstate';\n\nexport default Machine({\n\n});")
        );
    }

    #[test]
    fn default_runtime_follows_feature() {
        let expected = if cfg!(feature = "remote-runtime") {
            RuntimeSource::Remote
        } else {
            RuntimeSource::Package
        };
        assert_eq!(CompileOptions::default().runtime, expected);
    }

    #[test]
    fn compile_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counter.lucy");
        std::fs::write(
            &path,
            "machine counter {\n  initial state active {\n    inc => assign(count, :increment) => active\n  }\n}\n",
        )
        .unwrap();

        let mut handler = DiagnosticHandler::default();
        let js = compile_file(&path, &package(), &mut handler).unwrap();
        assert!(js.starts_with("import { Machine, assign } from 'xstate';"));
        assert!(js.contains(
            "        inc: {
          target: 'active',
          actions: [
            assign({
              count: increment
            })
          ]
        }"
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut handler = DiagnosticHandler::default();
        let result = compile_file(dir.path().join("nope.lucy"), &package(), &mut handler);
        assert!(matches!(result, Err(CompileError::Io(_))));
    }
}
