//! Vector geometry over arrays of points.

use crate::error::RuntimeErrorKind;
use crate::runtime::value::{Channel, Shape, VectorArray, broadcast_shape};
use super::{Arity, Builtin, Namespace, array, invalid, require_dimension};

pub struct GeometryNamespace;

static BUILTINS: &[Builtin] = &[
    array("cross", Arity::Exactly(2), cross, cross_shape),
    array("dot", Arity::Exactly(2), dot, |s| pairwise_shape("dot", s)),
    array("dist", Arity::Exactly(2), dist, |s| pairwise_shape("dist", s)),
    array("distsq", Arity::Exactly(2), distsq, |s| pairwise_shape("distsq", s)),
    array("length", Arity::Exactly(1), length, |s| Ok(Shape::new(s[0].length, 1))),
    array("lengthsq", Arity::Exactly(1), lengthsq, |s| Ok(Shape::new(s[0].length, 1))),
    array("normalize", Arity::Exactly(1), normalize, |s| Ok(s[0])),
];

impl Namespace for GeometryNamespace {
    fn name(&self) -> &'static str { "geometry" }

    fn builtins(&self) -> &'static [Builtin] { BUILTINS }
}

fn pairwise_shape(name: &str, shapes: &[Shape]) -> Result<Shape, RuntimeErrorKind> {
    let (a, b) = (shapes[0], shapes[1]);
    if a.dimension != b.dimension {
        return Err(invalid(name, "vectors differ in dimension"));
    }
    let shape = broadcast_shape(shapes).map_err(|_| invalid(name, "vectors differ in dimension"))?;
    Ok(Shape::new(shape.length, 1))
}

fn cross_shape(shapes: &[Shape]) -> Result<Shape, RuntimeErrorKind> {
    if shapes.iter().any(|s| s.dimension != 3) {
        return Err(invalid("cross", "expected a 3-dimensional vector"));
    }
    let shape = broadcast_shape(shapes).map_err(|_| invalid("cross", "vectors differ in dimension"))?;
    Ok(Shape::new(shape.length, 3))
}

/// Scalar result per element pair. Both operands must have the same
/// dimension; lengths broadcast like a binary operator.
/// `f` gets the two operands, the element index and the shared dimension.
fn pairwise(
    name: &str,
    args: &[VectorArray],
    f: impl Fn(&VectorArray, &VectorArray, usize, usize) -> f32,
) -> Result<VectorArray, RuntimeErrorKind> {
    let (a, b) = (&args[0], &args[1]);
    if a.dimension() != b.dimension() {
        return Err(invalid(name, "vectors differ in dimension"));
    }
    let shape = broadcast_shape(&[a.shape(), b.shape()])
        .map_err(|_| invalid(name, "vectors differ in dimension"))?;
    let values = (0..shape.length).map(|i| f(a, b, i, shape.dimension)).collect();
    Ok(VectorArray::from_values(values))
}

fn dot(args: &[VectorArray]) -> Result<VectorArray, RuntimeErrorKind> {
    pairwise("dot", args, |a, b, i, dim| {
        (0..dim).map(|c| a.broadcast_at(i, c) * b.broadcast_at(i, c)).sum()
    })
}

fn distsq(args: &[VectorArray]) -> Result<VectorArray, RuntimeErrorKind> {
    pairwise("distsq", args, squared_distance)
}

fn dist(args: &[VectorArray]) -> Result<VectorArray, RuntimeErrorKind> {
    pairwise("dist", args, |a, b, i, dim| squared_distance(a, b, i, dim).sqrt())
}

fn squared_distance(a: &VectorArray, b: &VectorArray, i: usize, dim: usize) -> f32 {
    (0..dim)
        .map(|c| {
            let d = a.broadcast_at(i, c) - b.broadcast_at(i, c);
            d * d
        })
        .sum()
}

fn cross(args: &[VectorArray]) -> Result<VectorArray, RuntimeErrorKind> {
    let (a, b) = (&args[0], &args[1]);
    require_dimension("cross", a, 3)?;
    require_dimension("cross", b, 3)?;

    let shape = broadcast_shape(&[a.shape(), b.shape()])
        .map_err(|_| invalid("cross", "vectors differ in dimension"))?;
    let component = |i: usize, c: usize| {
        let (j, k) = ((c + 1) % 3, (c + 2) % 3);
        a.broadcast_at(i, j) * b.broadcast_at(i, k) - a.broadcast_at(i, k) * b.broadcast_at(i, j)
    };
    let channels = (0..3)
        .map(|c| Channel::new((0..shape.length).map(|i| component(i, c)).collect()))
        .collect();
    Ok(VectorArray::from_parts(shape.length, channels))
}

fn squared_length(a: &VectorArray, i: usize) -> f32 {
    a.channels().iter().map(|c| c[i] * c[i]).sum()
}

fn lengthsq(args: &[VectorArray]) -> Result<VectorArray, RuntimeErrorKind> {
    let a = &args[0];
    Ok(VectorArray::from_values((0..a.length()).map(|i| squared_length(a, i)).collect()))
}

fn length(args: &[VectorArray]) -> Result<VectorArray, RuntimeErrorKind> {
    let a = &args[0];
    Ok(VectorArray::from_values((0..a.length()).map(|i| squared_length(a, i).sqrt()).collect()))
}

fn normalize(args: &[VectorArray]) -> Result<VectorArray, RuntimeErrorKind> {
    let a = &args[0];
    let norms: Vec<f32> = (0..a.length()).map(|i| squared_length(a, i).sqrt()).collect();
    let channels = a
        .channels()
        .iter()
        .map(|c| Channel::new(c.iter().zip(&norms).map(|(v, n)| v / n).collect()))
        .collect();
    Ok(VectorArray::from_parts(a.length(), channels))
}
