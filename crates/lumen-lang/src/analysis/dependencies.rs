//! Dependency collection
//!
//! Walks a declaration's expression tree and gathers every free name it
//! reads, following variables and user functions transitively:
//! - Names bound by `for` or by the enclosing function's parameters are local
//! - A variable is recorded and its body expanded
//! - A user function is recorded and its body expanded with its parameters bound
//! - Builtin constants (`time`, `pi`, ...) and unknown names are recorded as is
//!
//! The environment inverts the result into its `dependents` map.

use std::collections::{BTreeSet, HashMap, HashSet};

use thiserror::Error;

use crate::syntax::ast::{Expr, Statement, StatementKind};

/// A chain of variable definitions that leads back to its start.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cyclic definition: {}", .0.join(" -> "))]
pub struct Cycle(pub Vec<String>);

pub struct DependencyCollector<'a> {
    definitions: &'a HashMap<String, Statement>,
    /// Declarations currently being expanded, outermost first.
    visiting: Vec<&'a str>,
    expanded: HashSet<&'a str>,
    found: BTreeSet<String>,
}

impl<'a> DependencyCollector<'a> {
    pub fn new(definitions: &'a HashMap<String, Statement>) -> Self {
        Self { definitions, visiting: Vec::new(), expanded: HashSet::new(), found: BTreeSet::new() }
    }

    /// Everything the declaration `name` reads, directly or through other
    /// declarations. `name` itself is not part of the result unless it is
    /// a function that calls itself.
    pub fn collect(mut self, name: &str) -> Result<BTreeSet<String>, Cycle> {
        let definitions = self.definitions;
        if let Some((key, statement)) = definitions.get_key_value(name) {
            self.expand(key, statement)?;
        }
        Ok(self.found)
    }

    /// Everything a free-standing expression reads, such as a render body.
    pub fn collect_expr(mut self, expr: &'a Expr) -> Result<BTreeSet<String>, Cycle> {
        self.walk(expr, &mut Vec::new())?;
        Ok(self.found)
    }

    fn expand(&mut self, name: &'a str, statement: &'a Statement) -> Result<(), Cycle> {
        if let Some(start) = self.visiting.iter().position(|&v| v == name) {
            // A function re-entering itself is recursion, not a cycle.
            if statement.is_function() {
                return Ok(());
            }
            let mut chain: Vec<String> = self.visiting[start..].iter().map(|s| s.to_string()).collect();
            chain.push(name.to_string());
            return Err(Cycle(chain));
        }
        if self.expanded.contains(name) {
            return Ok(());
        }

        self.visiting.push(name);
        let result = match &statement.kind {
            StatementKind::Variable { body, .. } => self.walk(body, &mut Vec::new()),
            StatementKind::Function { params, body, .. } => {
                let mut bound: Vec<&'a str> = params.iter().map(String::as_str).collect();
                self.walk(body, &mut bound)
            }
            _ => Ok(()),
        };
        self.visiting.pop();
        self.expanded.insert(name);
        result
    }

    /// Records a free name and follows it into its declaration, if any.
    fn reference(&mut self, name: &'a str, bound: &[&'a str]) -> Result<(), Cycle> {
        if bound.contains(&name) {
            return Ok(());
        }
        self.found.insert(name.to_string());
        let definitions = self.definitions;
        match definitions.get_key_value(name) {
            Some((key, statement)) => self.expand(key, statement),
            None => Ok(()),
        }
    }

    fn walk(&mut self, expr: &'a Expr, bound: &mut Vec<&'a str>) -> Result<(), Cycle> {
        match expr {
            Expr::Constant(..) => Ok(()),
            Expr::Identifier(name, _) => self.reference(name, bound),
            Expr::Call { name, args, .. } => {
                for arg in args {
                    self.walk(arg, bound)?;
                }
                // Only user functions have bodies to follow; builtin
                // function names are not dependencies.
                if bound.contains(&name.as_str()) || !self.definitions.contains_key(name) {
                    return Ok(());
                }
                self.reference(name, bound)
            }
            Expr::Vector(items, _) | Expr::Array(items, _) => {
                items.iter().try_for_each(|item| self.walk(item, bound))
            }
            Expr::For { body, binder, source, filter, .. } => {
                self.walk(source, bound)?;
                bound.push(binder);
                let result = self.walk(body, bound).and_then(|()| match filter {
                    Some(filter) => self.walk(filter, bound),
                    None => Ok(()),
                });
                bound.pop();
                result
            }
            Expr::Unary { operand, .. } => self.walk(operand, bound),
            Expr::Binary { left, right, .. } => {
                self.walk(left, bound)?;
                self.walk(right, bound)
            }
            Expr::Range { lower, upper, .. } => {
                self.walk(lower, bound)?;
                self.walk(upper, bound)
            }
            Expr::Index { target, index, .. } => {
                self.walk(target, bound)?;
                self.walk(index, bound)
            }
            Expr::Swizzle { target, .. } => self.walk(target, bound),
            Expr::Conditional { then_expr, condition, else_expr, .. } => {
                self.walk(then_expr, bound)?;
                self.walk(condition, bound)?;
                self.walk(else_expr, bound)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parser::parse_script;

    fn definitions(src: &str) -> HashMap<String, Statement> {
        parse_script(src)
            .into_iter()
            .filter_map(|s| Some((s.name()?.to_string(), s)))
            .collect()
    }

    fn deps(src: &str, name: &str) -> Vec<String> {
        let defs = definitions(src);
        DependencyCollector::new(&defs)
            .collect(name)
            .expect("expected no cycle")
            .into_iter()
            .collect()
    }

    #[test]
    fn direct_and_transitive_variables() {
        let src = "a = sin(time)\nb = a * 2\nc = b + pi";
        assert_eq!(deps(src, "a"), ["time"]);
        assert_eq!(deps(src, "b"), ["a", "time"]);
        assert_eq!(deps(src, "c"), ["a", "b", "pi", "time"]);
    }

    #[test]
    fn builtin_functions_are_not_dependencies() {
        assert_eq!(deps("a = mean([1, 2, 3])", "a"), Vec::<String>::new());
    }

    #[test]
    fn for_binder_is_local() {
        let src = "n = 4\na = [i * k for i = [1...n]]";
        assert_eq!(deps(src, "a"), ["k", "n"]);
    }

    #[test]
    fn binder_does_not_cover_its_own_source() {
        let src = "a = [i for i = [1...i]]";
        assert_eq!(deps(src, "a"), ["i"]);
    }

    #[test]
    fn function_body_is_followed() {
        let src = "f(x) = x * time\na = f(2)";
        assert_eq!(deps(src, "a"), ["f", "time"]);
    }

    #[test]
    fn recursive_function_is_not_a_cycle() {
        let src = "f(n) = 1 if n <= 0 else n * f(n - 1)\na = f(3)";
        assert_eq!(deps(src, "a"), ["f"]);
    }

    #[test]
    fn cycle_is_reported_with_its_chain() {
        let defs = definitions("a = b + 1\nb = c\nc = a");
        let err = DependencyCollector::new(&defs).collect("a").unwrap_err();
        assert_eq!(err, Cycle(vec!["a".into(), "b".into(), "c".into(), "a".into()]));
        assert_eq!(err.to_string(), "cyclic definition: a -> b -> c -> a");
    }

    #[test]
    fn cycle_through_function() {
        let defs = definitions("f(x) = a + x\na = f(1)");
        assert!(DependencyCollector::new(&defs).collect("a").is_err());
    }

    #[test]
    fn render_expression() {
        let defs = definitions("r = 2");
        let statements = parse_script("point (r * cos(time), r * sin(time))");
        let body = statements[0].body().expect("render body");
        let found: Vec<String> = DependencyCollector::new(&defs).collect_expr(body).unwrap().into_iter().collect();
        assert_eq!(found, ["r", "time"]);
    }
}
