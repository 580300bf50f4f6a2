pub mod value;
pub mod scope;
pub mod evaluator;
pub mod environment;
