// Copyright 2025 Cornell University
// released under MIT License

use std::io::Write;

use clap::ColorChoice;
use codespan_reporting::diagnostic::{
    Diagnostic as CodespanDiagnostic, Label as CodespanLabel, LabelStyle, Severity,
};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{Buffer, Color, ColorSpec, WriteColor};
use pest::iterators::Pair;
use pest::RuleType;
use rustc_hash::FxHashSet;

use crate::ast::{Ast, NodeId};

/// Severity of diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Error,
    Warning,
}

/// A label representing a part of the source code
#[derive(Debug, Clone, PartialEq, Eq)]
struct Label {
    message: Option<String>,
    range: (usize, usize),
}

impl Label {
    fn to_codespan_label(&self, fileid: usize) -> CodespanLabel<usize> {
        CodespanLabel::new(LabelStyle::Primary, fileid, self.range.0..self.range.1)
            .with_message(self.message.clone().unwrap_or_default())
    }
}

/// Diagnostic of a particular part of source code
struct Diagnostic {
    title: String,
    message: String,
    level: Level,
    location: Option<(usize, Label)>,
}

impl Diagnostic {
    fn emit(&self, buffer: &mut Buffer, files: &SimpleFiles<String, String>) {
        if let Some((fileid, label)) = &self.location {
            let severity = match self.level {
                Level::Error => Severity::Error,
                Level::Warning => Severity::Warning,
            };

            let diagnostic = CodespanDiagnostic::new(severity)
                .with_message(&self.message)
                .with_labels(vec![label.to_codespan_label(*fileid)]);

            let config = term::Config::default();
            term::emit(buffer, &config, files, &diagnostic).expect("Failed to write diagnostic");
        } else {
            let color = match self.level {
                Level::Error => Color::Red,
                Level::Warning => Color::Yellow,
            };

            buffer
                .set_color(ColorSpec::new().set_bold(true).set_fg(Some(color)))
                .expect("Failed to set color");
            write!(buffer, "{}", self.title).expect("Failed to write title");
            buffer
                .set_color(&ColorSpec::new())
                .expect("Failed to reset color");
            writeln!(buffer, ": {}", self.message).expect("Failed to write message");
        }
    }
}

/// Collects and prints everything the compiler has to say about its input.
///
/// Every message is written to stderr right away and appended to
/// [`DiagnosticHandler::error_string`], which tests use to inspect the output.
pub struct DiagnosticHandler {
    files: SimpleFiles<String, String>,
    reported: FxHashSet<(NodeId, String)>,
    error_string: String,
    errors: usize,
    warnings: usize,
    /// `color_choice` indicates whether to emit error messages w/ ANSI colors
    color_choice: ColorChoice,
}

impl Default for DiagnosticHandler {
    /// Default `DiagnosticHandler` does not emit colored error messages
    fn default() -> Self {
        Self::new(ColorChoice::Never)
    }
}

impl DiagnosticHandler {
    pub fn new(color_choice: ColorChoice) -> Self {
        Self {
            files: SimpleFiles::new(),
            reported: FxHashSet::default(),
            error_string: String::new(),
            errors: 0,
            warnings: 0,
            color_choice,
        }
    }

    /// Creates a buffer for error diagnostics
    /// (different buffers are created based on whether we want colors or not)
    fn create_buffer(&self) -> Buffer {
        if self.color_choice == ColorChoice::Never {
            Buffer::no_color()
        } else {
            Buffer::ansi()
        }
    }

    pub fn add_file(&mut self, name: String, content: String) -> usize {
        self.files.add(name, content)
    }

    pub fn error_string(&self) -> &str {
        &self.error_string
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn warning_count(&self) -> usize {
        self.warnings
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        match diagnostic.level {
            Level::Error => self.errors += 1,
            Level::Warning => self.warnings += 1,
        }
        let mut buffer = self.create_buffer();
        diagnostic.emit(&mut buffer, &self.files);
        let msg = String::from_utf8_lossy(buffer.as_slice());
        self.error_string.push_str(&msg);
        eprint!("{}", msg);
    }

    fn located(
        &self,
        message: &str,
        fileid: usize,
        start: usize,
        end: usize,
        level: Level,
    ) -> Diagnostic {
        Diagnostic {
            title: format!("{:?} in file {}", level, fileid),
            message: message.to_string(),
            level,
            location: Some((
                fileid,
                Label {
                    message: Some(message.to_string()),
                    range: (start, end),
                },
            )),
        }
    }

    /// Reports `message` at the source of `node`. Nodes without a recorded
    /// location (e.g. built by hand) get a plain message instead. The same
    /// message is reported at most once per node.
    pub fn emit_diagnostic_node(&mut self, ast: &Ast, node: NodeId, message: &str, level: Level) {
        if !self.reported.insert((node, message.to_string())) {
            return;
        }
        match ast.get_node_loc(node) {
            Some((start, end, fileid)) => {
                let diagnostic = self.located(message, fileid, start, end, level);
                self.report(diagnostic);
            }
            None => self.emit_general_message(message, level),
        }
    }

    /// Note: we make this function parametric over any type `R`
    /// that implements Pest's `RuleType` trait
    /// so that we can call this function from different parsers
    pub fn emit_diagnostic_parsing<R: RuleType>(
        &mut self,
        message: &str,
        fileid: usize,
        pair: &Pair<'_, R>,
        level: Level,
    ) {
        let span = pair.as_span();
        let diagnostic = self.located(message, fileid, span.start(), span.end(), level);
        self.report(diagnostic);
    }

    pub fn emit_diagnostic_lexing(
        &mut self,
        message: &str,
        fileid: usize,
        start: usize,
        end: usize,
        level: Level,
    ) {
        let diagnostic = self.located(message, fileid, start, end, level);
        self.report(diagnostic);
    }

    pub fn emit_general_message(&mut self, message: &str, level: Level) {
        self.report(Diagnostic {
            title: format!("{:?}", level),
            message: message.to_string(),
            level,
            location: None,
        });
    }
}

#[cfg(test)]
mod tests {
    use strip_ansi_escapes::strip_str;

    use super::*;
    use crate::ast::{Node, StateNode};

    #[test]
    fn test_emit_diagnostic_node() {
        let mut ast = Ast::new();
        let idle = ast.add(Node::State(StateNode::new("idle")));
        let done = ast.add(Node::State(StateNode::new("done")));

        let mut handler = DiagnosticHandler::new(ColorChoice::Never);
        let fileid = handler.add_file(
            "light.lucy".to_string(),
            "machine {\n  state idle {}\n  state done {}\n}\n".to_string(),
        );
        ast.add_node_loc(idle, 12, 25, fileid);
        ast.add_node_loc(done, 28, 41, fileid);

        handler.emit_diagnostic_node(&ast, idle, "Random Warning", Level::Warning);
        handler.emit_diagnostic_node(&ast, done, "Random Error", Level::Error);

        let content = strip_str(handler.error_string());
        assert!(content.contains("warning: Random Warning"));
        assert!(content.contains("error: Random Error"));
        assert!(content.contains("light.lucy:2:3"));
        assert!(content.contains("light.lucy:3:3"));
        assert_eq!(handler.warning_count(), 1);
        assert_eq!(handler.error_count(), 1);
    }

    #[test]
    fn repeated_node_messages_are_reported_once() {
        let mut ast = Ast::new();
        let idle = ast.add(Node::State(StateNode::new("idle")));
        let mut handler = DiagnosticHandler::default();

        handler.emit_diagnostic_node(&ast, idle, "same thing", Level::Warning);
        handler.emit_diagnostic_node(&ast, idle, "same thing", Level::Warning);
        handler.emit_diagnostic_node(&ast, idle, "something else", Level::Warning);

        assert_eq!(handler.warning_count(), 2);
        // no location recorded, so the plain form is used
        assert_eq!(
            handler.error_string(),
            "Warning: same thing\nWarning: something else\n"
        );
    }

    #[test]
    fn general_messages_are_counted() {
        let mut handler = DiagnosticHandler::default();
        handler.emit_general_message("unused binding `g`", Level::Warning);
        handler.emit_general_message("nothing to compile", Level::Error);
        assert_eq!(handler.warning_count(), 1);
        assert_eq!(handler.error_count(), 1);
        assert!(handler.error_string().contains("Error: nothing to compile"));
    }
}
