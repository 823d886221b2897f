//! Error reporting with source positions.
//!
//! Diagnostics are pushed through a caller-supplied callback as they are
//! discovered; the [`Reporter`] also counts them so a driver can decide its
//! exit status. The callback is a plain boxed closure held by value — there
//! is no global or thread-local error state.
//!
//! Passes share a `&Reporter` freely: reporting only needs interior
//! mutability, never an exclusive borrow, which keeps diagnostics usable
//! from inside pattern-match callbacks that already borrow the token data.
//!
//! # Example
//!
//! ```
//! use bslc_base::Reporter;
//!
//! let reporter = Reporter::new(Box::new(|d| {
//!     eprintln!("{}:{}: {}", d.line, d.column, d.message);
//! }));
//! reporter.report(3, 7, "int a = ;", "expected expression");
//! assert_eq!(reporter.error_count(), 1);
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;

/// A single reported problem, carrying enough context to print a
/// compiler-style message without re-reading the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// 1-based line number, adjusted for `#line` directives.
    pub line: usize,
    /// 0-based column offset into the line.
    pub column: usize,
    /// Text of the offending line.
    pub line_text: String,
    /// Human-readable description.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

/// Callback invoked once per diagnostic, in discovery order.
pub type ReportFn<'a> = Box<dyn FnMut(&Diagnostic) + 'a>;

/// Shared sink for diagnostics.
pub struct Reporter<'a> {
    callback: RefCell<ReportFn<'a>>,
    count: Cell<usize>,
}

impl<'a> Reporter<'a> {
    pub fn new(callback: ReportFn<'a>) -> Self {
        Self {
            callback: RefCell::new(callback),
            count: Cell::new(0),
        }
    }

    /// A reporter that drops diagnostics but still counts them.
    pub fn sink() -> Reporter<'static> {
        Reporter::new(Box::new(|_| {}))
    }

    /// Reports one diagnostic.
    pub fn report(&self, line: usize, column: usize, line_text: &str, message: &str) {
        self.count.set(self.count.get() + 1);
        let diagnostic = Diagnostic {
            line,
            column,
            line_text: line_text.to_string(),
            message: message.to_string(),
        };
        (self.callback.borrow_mut())(&diagnostic);
    }

    pub fn error_count(&self) -> usize {
        self.count.get()
    }

    pub fn had_errors(&self) -> bool {
        self.count.get() > 0
    }
}
