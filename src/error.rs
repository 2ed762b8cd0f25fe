use thiserror::Error;

use crate::ir::MethodId;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };
    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which covers every failure this library can report.
///
/// Only structural problems surface as errors. A call site that cannot or should not be
/// inlined, or a store or branch that cannot be simplified, is never an error: the code is
/// left unmodified and a named counter is incremented instead (see
/// [`crate::compiler::InliningInfo`]).
///
/// # Error Categories
///
/// ## Invariant violations
/// - [`Error::Malformed`] - A control flow graph or change set has an impossible shape
/// - [`Error::GraphError`] - Call graph bookkeeping became inconsistent
/// - [`Error::UnknownMethod`] - A method body was requested for a method without code
///
/// ## Runtime errors
/// - [`Error::LockError`] - A mutex was poisoned by a panicking worker
/// - [`Error::Error`] - Miscellaneous failures
///
/// # Examples
///
/// ```rust
/// use dexopt::Error;
///
/// fn report(result: dexopt::Result<()>) {
///     match result {
///         Ok(()) => println!("done"),
///         Err(Error::Malformed { message, file, line }) => {
///             eprintln!("invariant violated: {} ({}:{})", message, file, line);
///         }
///         Err(e) => eprintln!("error: {}", e),
///     }
/// }
/// # report(Ok(()));
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The intermediate representation is structurally broken.
    ///
    /// Raised for shapes that can only come from a bug in an upstream pass: a conditional
    /// branch block without exactly two non-ghost successors, a switch without a default
    /// edge, a branch replaced by more than one instruction, or overlapping changes in one
    /// change set. The error carries the source location where the check failed.
    ///
    /// # Fields
    ///
    /// * `message` - Description of what was malformed
    /// * `file` - Source file where the violation was detected
    /// * `line` - Source line where the violation was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A method body was requested for a method that has no code.
    #[error("Method {0} has no body")]
    UnknownMethod(MethodId),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),

    /// Failed to lock target.
    ///
    /// This error occurs when a worker panicked while holding one of the shared
    /// mutexes, leaving it poisoned.
    #[error("Failed to lock target")]
    LockError,

    /// Call graph error.
    ///
    /// Raised when the caller/callee bookkeeping of the inliner is inconsistent, for
    /// example when a wait counter would drop below zero.
    #[error("{0}")]
    GraphError(String),
}
