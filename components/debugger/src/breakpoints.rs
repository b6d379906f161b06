//! Breakpoint identities.

/// A breakpoint: either a source location or a function name.
///
/// Location breakpoints persist until toggled off. Function breakpoints
/// are one-shot: the match that causes a suspend also consumes them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Breakpoint {
    /// Break when execution reaches a line of a section.
    Location {
        /// Section (source file) identifier.
        section: String,
        /// 1-based line number.
        line: u32,
    },
    /// Break when execution enters a function with this name.
    Function {
        /// Bare function name.
        name: String,
    },
}

impl Breakpoint {
    /// A location breakpoint.
    pub fn location(section: impl Into<String>, line: u32) -> Breakpoint {
        Breakpoint::Location {
            section: section.into(),
            line,
        }
    }

    /// A function-name breakpoint.
    pub fn function(name: impl Into<String>) -> Breakpoint {
        Breakpoint::Function { name: name.into() }
    }
}
