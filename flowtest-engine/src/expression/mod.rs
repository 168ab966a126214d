// Expression Engine Module
// Sandboxed expression language for captures, conditions and scripts

pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod parser;

pub use evaluator::{EvalError, Evaluator, ExpressionEngine, SandboxLimits, ScriptOutput};
pub use functions::BuiltinFunctions;
pub use lexer::{LexError, Lexer, Token};
pub use parser::{BinaryOp, Expr, ExprParser, ParseExprError, UnaryOp};
