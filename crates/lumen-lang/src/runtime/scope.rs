use crate::runtime::value::VectorArray;
use crate::syntax::ast::Expr;

/// What a parameter name stands for during evaluation.
#[derive(Debug, Clone)]
pub enum Binding<'a> {
    /// An already computed value: a for-binder element or an eagerly
    /// evaluated call argument.
    Value(VectorArray),
    /// A call argument left unevaluated so that only the elements the callee
    /// actually requests get computed. `scope` is the caller's scope and
    /// `owner` the statement the expression's spans point into.
    Deferred {
        expr: &'a Expr,
        scope: &'a Scope<'a>,
        owner: Option<&'a str>,
    },
}

#[derive(Debug, Clone)]
pub struct Parameter<'a> {
    pub name: &'a str,
    pub binding: Binding<'a>,
}

/// A chain of parameter frames, searched innermost first.
///
/// Function calls start a fresh chain: a body only sees its own
/// parameters, never the caller's binders.
#[derive(Debug, Clone, Default)]
pub struct Scope<'a> {
    params: Vec<Parameter<'a>>,
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn frame(params: Vec<Parameter<'a>>) -> Self {
        Self { params, parent: None }
    }

    pub fn bind(parent: &'a Scope<'a>, name: &'a str, binding: Binding<'a>) -> Self {
        Self { params: vec![Parameter { name, binding }], parent: Some(parent) }
    }

    pub fn lookup(&self, name: &str) -> Option<&Binding<'a>> {
        self.params
            .iter()
            .rev()
            .find(|p| p.name == name)
            .map(|p| &p.binding)
            .or_else(|| self.parent.and_then(|parent| parent.lookup(name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }
}
