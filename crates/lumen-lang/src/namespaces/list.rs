//! Builtins that rearrange whole arrays.

use crate::error::RuntimeErrorKind;
use crate::runtime::value::{ArrayBuilder, Shape, VectorArray, broadcast_shape, zip_map};
use super::{Arity, Builtin, Namespace, array, invalid, require_scalar_dimension};

pub struct ListNamespace;

static BUILTINS: &[Builtin] = &[
    array("join", Arity::AtLeast(1), join, join_shape),
    array("interleave", Arity::AtLeast(1), interleave, interleave_shape),
    array("max", Arity::AtLeast(2), max, max_shape),
    array("min", Arity::AtLeast(2), min, min_shape),
    array("sort", Arity::Between(1, 2), sort, sort_shape),
];

impl Namespace for ListNamespace {
    fn name(&self) -> &'static str { "list" }

    fn builtins(&self) -> &'static [Builtin] { BUILTINS }
}

// ─── Shapes ───────────────────────────────────────────────────────────────────

fn uniform_dimension(name: &str, shapes: &[Shape]) -> Result<usize, RuntimeErrorKind> {
    let dimension = shapes[0].dimension;
    if shapes.iter().any(|s| s.dimension != dimension) {
        return Err(invalid(name, "arguments differ in dimension"));
    }
    Ok(dimension)
}

fn join_shape(shapes: &[Shape]) -> Result<Shape, RuntimeErrorKind> {
    let dimension = uniform_dimension("join", shapes)?;
    Ok(Shape::new(shapes.iter().map(|s| s.length).sum(), dimension))
}

fn interleave_shape(shapes: &[Shape]) -> Result<Shape, RuntimeErrorKind> {
    let dimension = uniform_dimension("interleave", shapes)?;
    let rows = shapes.iter().map(|s| s.length).min().unwrap_or(0);
    Ok(Shape::new(rows * shapes.len(), dimension))
}

fn max_shape(shapes: &[Shape]) -> Result<Shape, RuntimeErrorKind> {
    broadcast_shape(shapes).map_err(|_| invalid("max", "arguments differ in dimension"))
}

fn min_shape(shapes: &[Shape]) -> Result<Shape, RuntimeErrorKind> {
    broadcast_shape(shapes).map_err(|_| invalid("min", "arguments differ in dimension"))
}

fn sort_shape(shapes: &[Shape]) -> Result<Shape, RuntimeErrorKind> {
    let values = shapes[0];
    let Some(key) = shapes.get(1) else {
        return Ok(values);
    };
    if key.dimension != 1 {
        return Err(invalid("sort", "expected a scalar array"));
    }
    Ok(Shape::new(values.length.min(key.length), values.dimension))
}

// ─── Kernels ──────────────────────────────────────────────────────────────────

/// Concatenation in argument order.
fn join(args: &[VectorArray]) -> Result<VectorArray, RuntimeErrorKind> {
    let mut out = ArrayBuilder::new();
    for arg in args {
        out.push(arg).map_err(|_| invalid("join", "arguments differ in dimension"))?;
    }
    Ok(out.finish())
}

/// `a0, b0, c0, a1, b1, c1, ...`, stopping at the shortest argument.
fn interleave(args: &[VectorArray]) -> Result<VectorArray, RuntimeErrorKind> {
    let dimension = args[0].dimension();
    if args.iter().any(|a| a.dimension() != dimension) {
        return Err(invalid("interleave", "arguments differ in dimension"));
    }

    let rows = args.iter().map(VectorArray::length).min().unwrap_or(0);
    let mut out = ArrayBuilder::with_dimension(dimension);
    for i in 0..rows {
        for arg in args {
            if let Some(element) = arg.element(i) {
                out.push_element(&element).map_err(|_| invalid("interleave", "malformed input"))?;
            }
        }
    }
    Ok(out.finish())
}

fn fold_elementwise(name: &str, args: &[VectorArray], f: fn(f32, f32) -> f32) -> Result<VectorArray, RuntimeErrorKind> {
    let operands: Vec<&VectorArray> = args.iter().collect();
    zip_map(&operands, |values| values.iter().copied().reduce(f).unwrap_or(f32::NAN))
        .map_err(|_| invalid(name, "arguments differ in dimension"))
}

fn max(args: &[VectorArray]) -> Result<VectorArray, RuntimeErrorKind> {
    fold_elementwise("max", args, f32::max)
}

fn min(args: &[VectorArray]) -> Result<VectorArray, RuntimeErrorKind> {
    fold_elementwise("min", args, f32::min)
}

/// `sort(a)` sorts each channel ascending. `sort(a, key)` reorders whole
/// elements of `a` by ascending `key`, keeping ties in order.
fn sort(args: &[VectorArray]) -> Result<VectorArray, RuntimeErrorKind> {
    let values = &args[0];

    let Some(key) = args.get(1) else {
        let channels: Vec<Vec<f32>> = values
            .channels()
            .iter()
            .map(|c| {
                let mut sorted = c.to_vec();
                sorted.sort_by(f32::total_cmp);
                sorted
            })
            .collect();
        return VectorArray::from_channels(channels).ok_or_else(|| invalid("sort", "malformed input"));
    };

    require_scalar_dimension("sort", key)?;
    let n = values.length().min(key.length());
    let keys = key.channel(0);
    let mut order: Vec<i64> = (0..n as i64).collect();
    order.sort_by(|&a, &b| keys[a as usize].total_cmp(&keys[b as usize]));
    Ok(values.gather(&order))
}
