//! Indentation-aware text sink for emitted code

use core::fmt;

/// The sink every emitter writes into.
///
/// Tracks an indent level and provides scoped `{}` blocks so generated
/// C-family code stays readable without any emitter doing its own
/// bookkeeping.
#[derive(Debug, Default)]
pub struct CodeStream {
    out: String,
    indent: usize,
}

const INDENT: &str = "    ";

impl CodeStream {
    /// Create an empty stream
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one indented line
    pub fn line(&mut self, line: impl AsRef<str>) {
        let line = line.as_ref();
        if line.is_empty() {
            self.out.push('\n');
            return;
        }
        for _ in 0..self.indent {
            self.out.push_str(INDENT);
        }
        self.out.push_str(line);
        self.out.push('\n');
    }

    /// Append a blank line
    pub fn blank(&mut self) {
        self.out.push('\n');
    }

    /// Append text verbatim, without indentation or trailing newline
    pub fn raw(&mut self, text: impl AsRef<str>) {
        self.out.push_str(text.as_ref());
    }

    /// Append a multi-line block, indenting each non-empty line
    pub fn block(&mut self, code: &str) {
        for line in code.lines() {
            self.line(line.trim_end());
        }
    }

    /// Open a `{` scope: emits `head {` and indents subsequent lines
    pub fn open(&mut self, head: impl AsRef<str>) {
        let head = head.as_ref();
        if head.is_empty() {
            self.line("{");
        } else {
            self.line(format!("{} {{", head));
        }
        self.indent += 1;
    }

    /// Close the current scope with `}`
    pub fn close(&mut self) {
        self.close_with("}");
    }

    /// Close the current scope with custom text, e.g. `};`
    pub fn close_with(&mut self, tail: impl AsRef<str>) {
        debug_assert!(self.indent > 0, "unbalanced CodeStream scope");
        self.indent = self.indent.saturating_sub(1);
        self.line(tail);
    }

    /// Current indent depth
    pub fn depth(&self) -> usize {
        self.indent
    }

    /// Has anything been written?
    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    /// Borrow the accumulated text
    pub fn as_str(&self) -> &str {
        &self.out
    }

    /// Consume the stream and return the accumulated text
    pub fn into_string(self) -> String {
        self.out
    }
}

impl fmt::Display for CodeStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_and_scopes() {
        let mut os = CodeStream::new();
        os.line("void f()");
        os.open("");
        os.line("x = 1;");
        os.open("if (x)");
        os.line("y = 2;");
        os.close();
        os.close();

        let text = os.into_string();
        assert_eq!(
            text,
            "void f()\n{\n    x = 1;\n    if (x) {\n        y = 2;\n    }\n}\n"
        );
    }

    #[test]
    fn test_block_indents_each_line() {
        let mut os = CodeStream::new();
        os.open("for (;;)");
        os.block("a = 1;\nb = 2;");
        os.close();

        let text = os.into_string();
        assert!(text.contains("    a = 1;\n"));
        assert!(text.contains("    b = 2;\n"));
    }

    #[test]
    fn test_close_with() {
        let mut os = CodeStream::new();
        os.open("struct S");
        os.line("int x;");
        os.close_with("};");
        assert!(os.as_str().ends_with("};\n"));
    }
}
