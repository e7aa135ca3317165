use crate::Position;

/// Lox virtual machine errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A runtime error happened
    #[error("Runtime error(s) occurred.")]
    Runtime,
    /// A compilation error happened
    #[error("Compilation error(s) occurred.")]
    Compile,
}

/// Error emitted while parsing and compiling Lox source code.
///
/// The display form is the diagnostic printed to the user, matching the
/// `[line N] Error at ...` convention.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    /// The parser rejected a token.
    #[error("[line {}] Error at '{lexeme}': {msg}", .pos.line)]
    At {
        /// Position of the offending token
        pos: Position,
        /// Lexeme of the offending token
        lexeme: String,
        /// What the parser expected
        msg: String,
    },
    /// The parser ran out of tokens.
    #[error("[line {}] Error at end: {msg}", .pos.line)]
    AtEnd {
        /// Position of the last consumed token
        pos: Position,
        /// What the parser expected
        msg: String,
    },
}

/// Virtual machine errors
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Exceeded the call frame or value stack limit
    #[error("Stack overflow.")]
    StackOverflow,
    /// Popped or peeked a value off an empty stack
    #[error("Stack underflow.")]
    StackUnderflow,
    /// A unary numeric opcode was given a non-number
    #[error("Operand must be a number.")]
    OperandMustBeNumber,
    /// A binary numeric opcode was given a non-number
    #[error("Operands must be numbers.")]
    OperandsMustBeNumbers,
    /// Operator `+` was given operands it cannot combine
    #[error("Operands must be two numbers or two strings.")]
    InvalidAddOperands,
    /// Made a call on a value that is not callable
    #[error("Can only call functions and classes.")]
    InvalidCall,
    /// A function or method was called with the wrong number of arguments
    #[error("Expected {expected} arguments but got {got}.")]
    ArityMismatch {
        /// Number of parameters the callee declares
        expected: u8,
        /// Number of arguments given at the call site
        got: u8,
    },
    /// Accessed a variable that was never defined
    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),
    /// Accessed a property that is neither a field nor a method
    #[error("Undefined property '{0}'.")]
    UndefinedProperty(String),
    /// Read a property of a value that is not an instance
    #[error("Only instances have properties.")]
    PropertyOnNonInstance,
    /// Wrote a field of a value that is not an instance
    #[error("Only instances have fields.")]
    FieldOnNonInstance,
    /// Invoked a method on a value that is not an instance
    #[error("Only instances have methods.")]
    MethodOnNonInstance,
    /// A class tried to inherit from a value that is not a class
    #[error("Superclass must be a class.")]
    SuperclassNotClass,
    /// Writing interpreted output failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
