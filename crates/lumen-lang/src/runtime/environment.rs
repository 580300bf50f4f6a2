use std::collections::{BTreeSet, HashMap};

use log::{debug, warn};

use crate::analysis::DependencyCollector;
use crate::config::{AnimationState, Limits};
use crate::error::{Error, RuntimeError, RuntimeErrorKind, SyntaxError, SyntaxErrorKind};
use crate::namespaces::NamespaceRegistry;
use crate::runtime::evaluator::{EvalStats, Evaluator};
use crate::runtime::value::{Selection, Shape, VectorArray};
use crate::syntax::ast::{Expr, Span, Statement, StatementKind};
use crate::syntax::lexer::tokenize;
use crate::syntax::parser::{parse_expression, parse_script};

/// Everything a loaded script knows: its declarations, the render
/// statements, the value cache and the dependency graph used to invalidate it.
///
/// Lifecycle:
///   1. `Environment::load(source)` parses every statement and indexes the
///      declarations; failed statements are handed back, not fatal.
///   2. `evaluate*` calls compute values lazily and cache full results.
///   3. `advance_time`, `set_*` and `define` invalidate exactly the cached
///      values that read what changed.
pub struct Environment {
    definitions: HashMap<String, Statement>,
    /// Declaration names in first-seen order.
    order: Vec<String>,
    renders: Vec<Statement>,
    cache: HashMap<String, VectorArray>,
    dependencies: HashMap<String, BTreeSet<String>>,
    dependents: HashMap<String, BTreeSet<String>>,
    registry: NamespaceRegistry,
    animation: AnimationState,
    limits: Limits,
    stats: EvalStats,
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self {
            definitions: HashMap::new(),
            order: Vec::new(),
            renders: Vec::new(),
            cache: HashMap::new(),
            dependencies: HashMap::new(),
            dependents: HashMap::new(),
            registry: NamespaceRegistry::standard(),
            animation: AnimationState::default(),
            limits: Limits::default(),
            stats: EvalStats::default(),
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self.cache.clear();
        self
    }

    pub fn with_animation(mut self, animation: AnimationState) -> Self {
        self.animation = animation;
        self.cache.clear();
        self
    }

    /// Parses a whole script. Later declarations of a name replace earlier
    /// ones. Returns the environment and the statements that failed to parse.
    pub fn load(source: &str) -> (Self, Vec<Statement>) {
        let mut env = Self::new();
        let mut failed = Vec::new();

        for statement in parse_script(source) {
            match &statement.kind {
                StatementKind::Invalid(err) => {
                    debug!("statement failed to parse: {err}");
                    failed.push(statement);
                }
                StatementKind::Render { .. } => env.renders.push(statement),
                StatementKind::Variable { .. } | StatementKind::Function { .. } => {
                    env.insert(statement);
                }
            }
        }

        env.rebuild_dependencies();
        debug!(
            "loaded {} declarations, {} renders, {} failed statements",
            env.definitions.len(),
            env.renders.len(),
            failed.len()
        );
        (env, failed)
    }

    fn insert(&mut self, statement: Statement) -> Option<Statement> {
        let name = statement.name()?.to_string();
        if !self.definitions.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.definitions.insert(name, statement)
    }

    /// Adds or replaces one statement, as a REPL would.
    ///
    /// A statement that failed to parse is returned as its syntax error. A
    /// redefinition that would make a variable depend on itself is rejected
    /// and the previous definition kept.
    pub fn define(&mut self, statement: Statement) -> Result<(), Error> {
        let name = match &statement.kind {
            StatementKind::Invalid(err) => return Err(err.clone().into()),
            StatementKind::Render { .. } => {
                self.renders.push(statement);
                return Ok(());
            }
            StatementKind::Variable { name, .. } | StatementKind::Function { name, .. } => name.clone(),
        };

        let is_new = !self.definitions.contains_key(&name);
        let previous = self.insert(statement);

        if let Err(cycle) = DependencyCollector::new(&self.definitions).collect(&name) {
            debug!("rejected definition of `{name}`: {cycle}");
            match previous {
                Some(previous) => {
                    self.definitions.insert(name.clone(), previous);
                }
                None => {
                    self.definitions.remove(&name);
                    self.order.retain(|n| *n != name);
                }
            }
            let err = RuntimeError::new(RuntimeErrorKind::CyclicDefinition(name.clone()), Span::default())
                .in_statement(Some(&name));
            return Err(err.into());
        }

        debug!("{} `{name}`", if is_new { "defined" } else { "redefined" });
        self.rebuild_dependencies();
        self.invalidate(&name);
        Ok(())
    }

    /// Recomputes every declaration's dependency set and the inverse map.
    fn rebuild_dependencies(&mut self) {
        self.dependencies.clear();
        self.dependents.clear();

        for name in &self.order {
            match DependencyCollector::new(&self.definitions).collect(name) {
                Ok(found) => {
                    for parent in &found {
                        self.dependents.entry(parent.clone()).or_default().insert(name.clone());
                    }
                    self.dependencies.insert(name.clone(), found);
                }
                Err(cycle) => warn!("{cycle}"),
            }
        }
    }

    /// Drops the cached value of `name` and of everything that reads it.
    /// Nothing is recomputed until it is asked for again.
    pub fn invalidate(&mut self, name: &str) {
        let mut dropped = usize::from(self.cache.remove(name).is_some());
        if let Some(dependents) = self.dependents.get(name) {
            for dependent in dependents {
                dropped += usize::from(self.cache.remove(dependent).is_some());
            }
        }
        debug!("invalidated `{name}`: {dropped} cached values dropped");
    }

    // ─── Evaluation ──────────────────────────────────────────────────────────

    fn evaluator(&mut self) -> Evaluator<'_> {
        Evaluator::new(
            &self.definitions,
            &mut self.cache,
            &self.registry,
            &self.animation,
            &self.limits,
            &mut self.stats,
        )
    }

    /// Full value of a variable or builtin constant.
    pub fn evaluate(&mut self, name: &str) -> Result<VectorArray, RuntimeError> {
        self.evaluate_indexed(name, None)
    }

    /// `None` evaluates everything; `Some(indices)` evaluates only those
    /// elements, in request order, with `NaN` for out-of-range indices.
    pub fn evaluate_indexed(&mut self, name: &str, indices: Option<&[i64]>) -> Result<VectorArray, RuntimeError> {
        self.evaluator().evaluate_name(name, Selection::from_option(indices))
    }

    /// Length and dimension without computing values.
    pub fn evaluate_shape(&mut self, name: &str) -> Result<Shape, RuntimeError> {
        self.evaluator().shape_of_name(name)
    }

    pub fn evaluate_expression(&mut self, expr: &Expr, indices: Option<&[i64]>) -> Result<VectorArray, RuntimeError> {
        self.evaluator().evaluate_expr(expr, Selection::from_option(indices))
    }

    pub fn expression_shape(&mut self, expr: &Expr) -> Result<Shape, RuntimeError> {
        self.evaluator().shape_of_expr(expr)
    }

    /// Parses and evaluates one free-standing expression.
    pub fn evaluate_source(&mut self, source: &str) -> Result<VectorArray, Error> {
        let tokens: Vec<_> = tokenize(source).into_iter().flatten().collect();
        if tokens.is_empty() {
            return Err(SyntaxError::new(SyntaxErrorKind::MissingExpression, Span::default()).into());
        }
        let expr = parse_expression(&tokens)?;
        Ok(self.evaluate_expression(&expr, None)?)
    }

    /// Evaluates the body of the `index`th render statement, or `None` if
    /// there is no such statement.
    pub fn evaluate_render(
        &mut self,
        index: usize,
        indices: Option<&[i64]>,
    ) -> Option<Result<VectorArray, RuntimeError>> {
        let body = self.renders.get(index)?.body()?;
        let mut evaluator = Evaluator::new(
            &self.definitions,
            &mut self.cache,
            &self.registry,
            &self.animation,
            &self.limits,
            &mut self.stats,
        );
        Some(evaluator.evaluate_expr(body, Selection::from_option(indices)))
    }

    // ─── Animation state ─────────────────────────────────────────────────────

    pub fn animation(&self) -> &AnimationState {
        &self.animation
    }

    pub fn advance_time(&mut self, dt: f32) {
        self.animation.time += dt;
        self.invalidate("time");
    }

    pub fn set_time(&mut self, time: f32) {
        self.animation.time = time;
        self.invalidate("time");
    }

    pub fn set_position(&mut self, position: [f32; 3]) {
        self.animation.position = position;
        self.invalidate("position");
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.animation.scale = scale;
        self.invalidate("scale");
    }

    pub fn set_rotation(&mut self, rotation: [f32; 4]) {
        self.animation.rotation = rotation;
        self.invalidate("rotation");
    }

    // ─── Introspection ───────────────────────────────────────────────────────

    pub fn statement(&self, name: &str) -> Option<&Statement> {
        self.definitions.get(name)
    }

    /// Declaration names in the order they first appeared.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn renders(&self) -> &[Statement] {
        &self.renders
    }

    pub fn cached(&self, name: &str) -> Option<&VectorArray> {
        self.cache.get(name)
    }

    /// Declarations whose values read `name`, directly or transitively.
    pub fn dependents(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.dependents.get(name)
    }

    /// Names the declaration `name` reads, directly or transitively.
    pub fn dependencies(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.dependencies.get(name)
    }

    pub fn registry(&self) -> &NamespaceRegistry {
        &self.registry
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn stats(&self) -> EvalStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_declaration_wins() {
        let (mut env, failed) = Environment::load("a = 1\na = 2");
        assert!(failed.is_empty());
        assert_eq!(env.evaluate("a").unwrap(), VectorArray::scalar(2.0));
        assert_eq!(env.names().collect::<Vec<_>>(), ["a"]);
    }

    #[test]
    fn dependents_are_inverted_dependencies() {
        let (env, _) = Environment::load("a = time\nb = a + 1\nc = 3");
        let readers: Vec<&str> = env.dependents("time").unwrap().iter().map(String::as_str).collect();
        assert_eq!(readers, ["a", "b"]);
        assert!(env.dependents("c").is_none());
    }

    #[test]
    fn cyclic_redefinition_keeps_previous() {
        let (mut env, _) = Environment::load("a = 1\nb = a + 1");
        let statement = parse_script("a = b").remove(0);
        let err = env.define(statement).unwrap_err();
        assert!(matches!(
            err,
            Error::Runtime(RuntimeError { kind: RuntimeErrorKind::CyclicDefinition(ref n), .. }) if n == "a"
        ));
        assert_eq!(env.evaluate("b").unwrap(), VectorArray::scalar(2.0));
    }
}
