use crate::config::AnimationState;
use crate::error::RuntimeErrorKind;
use crate::runtime::value::{Shape, VectorArray};

pub mod core;
pub mod stats;
pub mod list;
pub mod geometry;

// ─── Builtin descriptors ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl Arity {
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Arity::Exactly(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Between(lo, hi) => (lo..=hi).contains(&count),
        }
    }
}

/// Whole-array builtin: sees fully evaluated arguments.
pub type ArrayKernel = fn(&[VectorArray]) -> Result<VectorArray, RuntimeErrorKind>;

/// Result shape of a whole-array builtin, derived from argument shapes
/// alone. Must agree with what the kernel produces, errors included.
pub type ShapeRule = fn(&[Shape]) -> Result<Shape, RuntimeErrorKind>;

/// How the evaluator drives a builtin.
///
/// `Map` and `Zip` are element-wise and therefore index-aware: an indexed
/// request only evaluates the requested elements of the arguments.
/// `Reduce` collapses each channel to one value. `Array` kernels need whole
/// arguments and are evaluated fully before the request is applied; their
/// shape rule answers shape queries without evaluating anything.
#[derive(Clone, Copy)]
pub enum Kernel {
    Map(fn(f32) -> f32),
    Zip(fn(f32, f32) -> f32),
    Reduce(fn(&[f32]) -> f32),
    Array(ArrayKernel, ShapeRule),
    /// Recognised name with no implementation.
    Reserved,
}

#[derive(Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub arity: Arity,
    pub kernel: Kernel,
}

impl std::fmt::Debug for Builtin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builtin").field("name", &self.name).field("arity", &self.arity).finish()
    }
}

pub(crate) const fn map(name: &'static str, f: fn(f32) -> f32) -> Builtin {
    Builtin { name, arity: Arity::Exactly(1), kernel: Kernel::Map(f) }
}

pub(crate) const fn zip(name: &'static str, f: fn(f32, f32) -> f32) -> Builtin {
    Builtin { name, arity: Arity::Exactly(2), kernel: Kernel::Zip(f) }
}

pub(crate) const fn reduce(name: &'static str, f: fn(&[f32]) -> f32) -> Builtin {
    Builtin { name, arity: Arity::Exactly(1), kernel: Kernel::Reduce(f) }
}

pub(crate) const fn array(name: &'static str, arity: Arity, f: ArrayKernel, shape: ShapeRule) -> Builtin {
    Builtin { name, arity, kernel: Kernel::Array(f, shape) }
}

// ─── Namespace interface ──────────────────────────────────────────────────────

/// A group of builtin functions and constants.
pub trait Namespace {
    fn name(&self) -> &'static str;

    fn builtins(&self) -> &'static [Builtin];

    /// Value of a named constant, if this namespace defines it.
    fn constant(&self, _name: &str, _animation: &AnimationState) -> Option<VectorArray> {
        None
    }
}

// ─── Registry ─────────────────────────────────────────────────────────────────

pub struct NamespaceRegistry {
    namespaces: Vec<Box<dyn Namespace>>,
}

impl NamespaceRegistry {
    pub fn new() -> Self { Self { namespaces: Vec::new() } }

    pub fn register(&mut self, namespace: Box<dyn Namespace>) { self.namespaces.push(namespace); }

    pub fn get(&self, name: &str) -> Option<&dyn Namespace> {
        self.namespaces.iter().find(|n| n.name() == name).map(|n| n.as_ref())
    }

    fn overloads<'r, 'n>(&'r self, name: &'n str) -> impl Iterator<Item = &'r Builtin> + use<'r, 'n> {
        self.namespaces
            .iter()
            .flat_map(|n| n.builtins().iter())
            .filter(move |b| b.name == name)
    }

    /// Finds the builtin `name` taking `argc` arguments. A known name with no
    /// overload of that arity is `IncorrectArgumentCount`.
    pub fn lookup(&self, name: &str, argc: usize) -> Result<Option<&Builtin>, RuntimeErrorKind> {
        let mut known = false;
        for builtin in self.overloads(name) {
            if builtin.arity.accepts(argc) {
                return Ok(Some(builtin));
            }
            known = true;
        }
        if known {
            Err(RuntimeErrorKind::IncorrectArgumentCount { name: name.to_string(), found: argc })
        } else {
            Ok(None)
        }
    }

    pub fn is_function(&self, name: &str) -> bool {
        self.overloads(name).next().is_some()
    }

    pub fn constant(&self, name: &str, animation: &AnimationState) -> Option<VectorArray> {
        self.namespaces.iter().find_map(|n| n.constant(name, animation))
    }

    pub fn is_constant(&self, name: &str) -> bool {
        self.constant(name, &AnimationState::default()).is_some()
    }

    pub fn standard() -> Self {
        let mut r = Self::new();
        r.register(Box::new(core::CoreNamespace));
        r.register(Box::new(stats::StatsNamespace));
        r.register(Box::new(list::ListNamespace));
        r.register(Box::new(geometry::GeometryNamespace));
        r
    }
}

impl Default for NamespaceRegistry {
    fn default() -> Self { Self::standard() }
}

// ─── Argument helpers ─────────────────────────────────────────────────────────

pub(crate) fn invalid(name: &str, reason: &'static str) -> RuntimeErrorKind {
    RuntimeErrorKind::InvalidArgumentType { name: name.to_string(), reason }
}

pub(crate) fn require_scalar_dimension(name: &str, arg: &VectorArray) -> Result<(), RuntimeErrorKind> {
    if arg.dimension() == 1 { Ok(()) } else { Err(invalid(name, "expected a scalar array")) }
}

pub(crate) fn require_dimension(name: &str, arg: &VectorArray, dimension: usize) -> Result<(), RuntimeErrorKind> {
    if arg.dimension() == dimension {
        Ok(())
    } else if dimension == 3 {
        Err(invalid(name, "expected a 3-dimensional vector"))
    } else {
        Err(invalid(name, "wrong vector dimension"))
    }
}
