//! Compile-time error reporting.

use crate::compiler::ast::Location;
use std::collections::HashSet;
use std::fmt;

/// A compile error with its source location. Errors accumulate on the
/// compiler; compilation of the unit stops at the first one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileError {
    pub description: String,
    pub url: String,
    pub line: u32,
    pub column: u32,
}

impl CompileError {
    pub fn new(url: impl Into<String>, location: Location, description: impl Into<String>) -> Self {
        CompileError {
            description: description.into(),
            url: url.into(),
            line: location.line,
            column: location.column,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}",
            self.url, self.line, self.column, self.description
        )
    }
}

impl std::error::Error for CompileError {}

lazy_static! {
    /// Names that ids and declared members may not shadow: reserved words
    /// plus the properties of the global object.
    pub static ref ILLEGAL_NAMES: HashSet<&'static str> = {
        [
            "break", "case", "catch", "continue", "debugger", "default", "delete", "do", "else",
            "finally", "for", "function", "if", "in", "instanceof", "new", "return", "switch",
            "this", "throw", "try", "typeof", "var", "void", "while", "with", "class", "const",
            "enum", "export", "extends", "import", "super", "let", "static", "yield",
            "Array", "Boolean", "Date", "Function", "Infinity", "JSON", "Math", "NaN", "Number",
            "Object", "RegExp", "String", "undefined", "eval", "isFinite", "isNaN", "parseFloat",
            "parseInt", "decodeURI", "decodeURIComponent", "encodeURI", "encodeURIComponent",
        ]
        .into_iter()
        .collect()
    };
}
