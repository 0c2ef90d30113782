// Copyright 2025 Cornell University
// released under MIT License

//! Structural writer for the emitted JavaScript. Callers open and close
//! objects, arrays, properties and calls; layout and escaping happen here.

const INDENT: &str = "  ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Object { first: bool },
    Array { first: bool, multiline: bool },
}

#[derive(Debug, Default)]
pub struct JsBuilder {
    out: String,
    indent: usize,
    frames: Vec<Frame>,
}

impl JsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_indent(&mut self) {
        for _ in 0..self.indent {
            self.add_indent();
        }
    }

    /// appends one indentation unit
    pub fn add_indent(&mut self) {
        self.out.push_str(INDENT);
    }

    pub fn start_object(&mut self) {
        self.out.push_str("{\n");
        self.indent += 1;
        self.frames.push(Frame::Object { first: true });
    }

    pub fn end_object(&mut self) {
        debug_assert!(matches!(self.frames.last(), Some(Frame::Object { .. })));
        self.frames.pop();
        self.indent = self.indent.saturating_sub(1);
        self.out.push('\n');
        self.push_indent();
        self.out.push('}');
    }

    /// Starts `key: ` inside the innermost object; the value follows.
    pub fn start_prop(&mut self, key: &str) {
        if let Some(Frame::Object { first }) = self.frames.last_mut() {
            if !*first {
                self.out.push_str(",\n");
            }
            *first = false;
        } else {
            debug_assert!(false, "property `{key}` outside of an object");
        }
        self.push_indent();
        if is_identifier(key) {
            self.out.push_str(key);
        } else {
            self.push_quoted(key);
        }
        self.out.push_str(": ");
    }

    pub fn start_array(&mut self, multiline: bool) {
        self.out.push('[');
        if multiline {
            self.indent += 1;
        }
        self.frames.push(Frame::Array {
            first: true,
            multiline,
        });
    }

    /// Separates the next array element from the previous one.
    pub fn start_element(&mut self) {
        let Some(Frame::Array { first, multiline }) = self.frames.last_mut() else {
            debug_assert!(false, "array element outside of an array");
            return;
        };
        let (was_first, multiline) = (*first, *multiline);
        *first = false;
        if multiline {
            if !was_first {
                self.out.push(',');
            }
            self.out.push('\n');
            self.push_indent();
        } else if !was_first {
            self.out.push_str(", ");
        }
    }

    pub fn end_array(&mut self) {
        let Some(Frame::Array { first, multiline }) = self.frames.pop() else {
            debug_assert!(false, "no array to close");
            return;
        };
        if multiline {
            self.indent = self.indent.saturating_sub(1);
            if !first {
                self.out.push('\n');
                self.push_indent();
            }
        }
        self.out.push(']');
    }

    pub fn start_call(&mut self, callee: &str) {
        self.out.push_str(callee);
        self.out.push('(');
    }

    pub fn end_call(&mut self) {
        self.out.push(')');
    }

    /// appends `token` without quoting
    pub fn add_raw(&mut self, token: &str) {
        self.out.push_str(token);
    }

    /// appends `text` as a string literal
    pub fn add_string(&mut self, text: &str) {
        self.push_quoted(text);
    }

    fn push_quoted(&mut self, text: &str) {
        self.out.push('\'');
        for c in text.chars() {
            match c {
                '\\' => self.out.push_str("\\\\"),
                '\'' => self.out.push_str("\\'"),
                '\n' => self.out.push_str("\\n"),
                '\r' => self.out.push_str("\\r"),
                '\t' => self.out.push_str("\\t"),
                c if c.is_control() => self.out.push_str(&format!("\\u{:04x}", c as u32)),
                c => self.out.push(c),
            }
        }
        self.out.push('\'');
    }

    /// objects and arrays that were opened but not closed
    pub fn open_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn dump(self) -> String {
        self.out
    }
}

/// Whether `key` can be written as a bare property name.
fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_objects() {
        let mut jsb = JsBuilder::new();
        jsb.start_object();
        jsb.start_prop("initial");
        jsb.add_string("idle");
        jsb.start_prop("states");
        jsb.start_object();
        jsb.start_prop("idle");
        jsb.start_object();
        jsb.end_object();
        jsb.end_object();
        jsb.end_object();
        assert_eq!(jsb.open_frames(), 0);
        assert_eq!(
            jsb.dump(),
            "{\n  initial: 'idle',\n  states: {\n    idle: {\n\n    }\n  }\n}"
        );
    }

    #[test]
    fn single_line_array() {
        let mut jsb = JsBuilder::new();
        jsb.start_array(false);
        for name in ["canGo", "isReady"] {
            jsb.start_element();
            jsb.add_string(name);
        }
        jsb.end_array();
        assert_eq!(jsb.dump(), "['canGo', 'isReady']");
    }

    #[test]
    fn multiline_array_of_calls() {
        let mut jsb = JsBuilder::new();
        jsb.start_object();
        jsb.start_prop("actions");
        jsb.start_array(true);
        jsb.start_element();
        jsb.start_call("assign");
        jsb.start_object();
        jsb.start_prop("user");
        jsb.add_raw("getUser");
        jsb.end_object();
        jsb.end_call();
        jsb.start_element();
        jsb.add_raw("log");
        jsb.end_array();
        jsb.end_object();
        assert_eq!(
            jsb.dump(),
            "{\n  actions: [\n    assign({\n      user: getUser\n    }),\n    log\n  ]\n}"
        );
    }

    #[test]
    fn empty_arrays_stay_on_one_line() {
        let mut jsb = JsBuilder::new();
        jsb.start_array(true);
        jsb.end_array();
        jsb.start_array(false);
        jsb.end_array();
        assert_eq!(jsb.dump(), "[][]");
    }

    #[test]
    fn keys_are_quoted_when_needed() {
        let mut jsb = JsBuilder::new();
        jsb.start_object();
        jsb.start_prop("500");
        jsb.add_string("timeout");
        jsb.start_prop("done.invoke");
        jsb.add_string("x");
        jsb.start_prop("$ok_1");
        jsb.add_string("y");
        jsb.end_object();
        assert_eq!(
            jsb.dump(),
            "{\n  '500': 'timeout',\n  'done.invoke': 'x',\n  $ok_1: 'y'\n}"
        );
    }

    #[test]
    fn strings_are_escaped() {
        let mut jsb = JsBuilder::new();
        jsb.add_string("it's a \\ path\n");
        assert_eq!(jsb.dump(), "'it\\'s a \\\\ path\\n'");
    }
}
