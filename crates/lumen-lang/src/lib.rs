pub mod syntax;
pub mod runtime;
pub mod analysis;
pub mod error;
pub mod config;
pub mod namespaces;

pub use config::{AnimationState, Limits};
pub use error::{Error, RuntimeError, RuntimeErrorKind, SyntaxError, SyntaxErrorKind};
pub use runtime::environment::Environment;
pub use runtime::evaluator::EvalStats;
pub use runtime::value::{Selection, Shape, VectorArray};
pub use syntax::ast::{Expr, Span, Statement, StatementKind};
pub use syntax::token::{Token, TokenKind};

// ─── Public API ───────────────────────────────────────────────────────────────

/// Tokenizes, parses and indexes a whole script. Statements that fail to
/// parse are returned alongside the environment; they never abort the load.
pub fn load_script(source: &str) -> (Environment, Vec<Statement>) {
    Environment::load(source)
}
