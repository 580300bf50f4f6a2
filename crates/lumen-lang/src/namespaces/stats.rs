//! Statistics over the elements of an array, channel by channel.

use crate::error::RuntimeErrorKind;
use crate::runtime::value::{ArrayBuilder, Shape, VectorArray, broadcast_shape};
use super::{Arity, Builtin, Namespace, array, invalid, reduce, require_scalar_dimension};

pub struct StatsNamespace;

static BUILTINS: &[Builtin] = &[
    reduce("mean", mean),
    reduce("median", median),
    reduce("sum", sum),
    reduce("prod", prod),
    reduce("var", variance),
    reduce("stdev", stdev),
    reduce("max", max),
    reduce("min", min),
    array("count", Arity::Exactly(1), count, |_| Ok(Shape::SCALAR)),
    array("quantile", Arity::Exactly(2), quantile, quantile_shape),
    array("corr", Arity::Exactly(2), corr, corr_shape),
    array("cov", Arity::Exactly(2), cov, cov_shape),
];

impl Namespace for StatsNamespace {
    fn name(&self) -> &'static str { "stats" }

    fn builtins(&self) -> &'static [Builtin] { BUILTINS }
}

// ─── Reductions ───────────────────────────────────────────────────────────────

pub fn sum(values: &[f32]) -> f32 {
    values.iter().sum()
}

pub fn prod(values: &[f32]) -> f32 {
    values.iter().product()
}

pub fn mean(values: &[f32]) -> f32 {
    if values.is_empty() { return f32::NAN; }
    sum(values) / values.len() as f32
}

pub fn median(values: &[f32]) -> f32 {
    let sorted = sorted(values);
    let n = sorted.len();
    match n {
        0 => f32::NAN,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

/// Sample variance (`n - 1` denominator); `0` for a single element.
pub fn variance(values: &[f32]) -> f32 {
    match values.len() {
        0 => f32::NAN,
        1 => 0.0,
        n => {
            let m = mean(values);
            values.iter().map(|v| (v - m) * (v - m)).sum::<f32>() / (n - 1) as f32
        }
    }
}

pub fn stdev(values: &[f32]) -> f32 {
    variance(values).sqrt()
}

pub fn max(values: &[f32]) -> f32 {
    values.iter().copied().reduce(f32::max).unwrap_or(f32::NAN)
}

pub fn min(values: &[f32]) -> f32 {
    values.iter().copied().reduce(f32::min).unwrap_or(f32::NAN)
}

fn sorted(values: &[f32]) -> Vec<f32> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    sorted
}

// ─── Whole-array statistics ───────────────────────────────────────────────────

fn count(args: &[VectorArray]) -> Result<VectorArray, RuntimeErrorKind> {
    Ok(VectorArray::scalar(args[0].length() as f32))
}

/// One interpolated quantile per element of `q`, per channel of `a`.
/// `q` outside `[0, 1]` gives `NaN`.
fn quantile(args: &[VectorArray]) -> Result<VectorArray, RuntimeErrorKind> {
    let (values, q) = (&args[0], &args[1]);
    require_scalar_dimension("quantile", q)?;

    let channels: Vec<Vec<f32>> = values
        .channels()
        .iter()
        .map(|channel| {
            let sorted = sorted(channel);
            q.channel(0).iter().map(|&q| interpolate(&sorted, q)).collect()
        })
        .collect();

    VectorArray::from_channels(channels).ok_or_else(|| invalid("quantile", "malformed input"))
}

fn interpolate(sorted: &[f32], q: f32) -> f32 {
    if sorted.is_empty() || !(0.0..=1.0).contains(&q) {
        return f32::NAN;
    }
    let position = q * (sorted.len() - 1) as f32;
    let lo = position.floor() as usize;
    let hi = position.ceil() as usize;
    let t = position - lo as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * t
}

fn quantile_shape(shapes: &[Shape]) -> Result<Shape, RuntimeErrorKind> {
    let (values, q) = (shapes[0], shapes[1]);
    if q.dimension != 1 {
        return Err(invalid("quantile", "expected a scalar array"));
    }
    Ok(Shape::new(q.length, values.dimension))
}

/// One element with a component per channel of the broadcast operands.
fn paired_shape(name: &str, shapes: &[Shape]) -> Result<Shape, RuntimeErrorKind> {
    let shape = broadcast_shape(shapes).map_err(|_| invalid(name, "arguments differ in dimension"))?;
    Ok(Shape::new(1, shape.dimension))
}

fn corr_shape(shapes: &[Shape]) -> Result<Shape, RuntimeErrorKind> {
    paired_shape("corr", shapes)
}

fn cov_shape(shapes: &[Shape]) -> Result<Shape, RuntimeErrorKind> {
    paired_shape("cov", shapes)
}

/// Paired samples of `a` and `b` in one channel, zipped like a binary operator.
fn paired(name: &str, a: &VectorArray, b: &VectorArray) -> Result<Vec<(Vec<f32>, Vec<f32>)>, RuntimeErrorKind> {
    let shape = broadcast_shape(&[a.shape(), b.shape()])
        .map_err(|_| invalid(name, "arguments differ in dimension"))?;
    let series = (0..shape.dimension)
        .map(|c| {
            let xs: Vec<f32> = (0..shape.length).map(|i| a.broadcast_at(i, c)).collect();
            let ys: Vec<f32> = (0..shape.length).map(|i| b.broadcast_at(i, c)).collect();
            (xs, ys)
        })
        .collect();
    Ok(series)
}

fn covariance(xs: &[f32], ys: &[f32]) -> f32 {
    let n = xs.len();
    if n < 2 {
        return if n == 1 { 0.0 } else { f32::NAN };
    }
    let (mx, my) = (mean(xs), mean(ys));
    xs.iter().zip(ys).map(|(x, y)| (x - mx) * (y - my)).sum::<f32>() / (n - 1) as f32
}

fn per_channel(
    name: &str,
    args: &[VectorArray],
    f: impl Fn(&[f32], &[f32]) -> f32,
) -> Result<VectorArray, RuntimeErrorKind> {
    let series = paired(name, &args[0], &args[1])?;
    let mut out = ArrayBuilder::new();
    let components: Vec<f32> = series.iter().map(|(xs, ys)| f(xs, ys)).collect();
    out.push_element(&components).map_err(|_| invalid(name, "malformed input"))?;
    Ok(out.finish())
}

/// Sample covariance per channel.
fn cov(args: &[VectorArray]) -> Result<VectorArray, RuntimeErrorKind> {
    per_channel("cov", args, covariance)
}

/// Pearson correlation per channel.
fn corr(args: &[VectorArray]) -> Result<VectorArray, RuntimeErrorKind> {
    per_channel("corr", args, |xs, ys| {
        covariance(xs, ys) / (variance(xs).sqrt() * variance(ys).sqrt())
    })
}
