//! Always-available math: element-wise functions and the named constants.

use std::f64::consts::PI;

use crate::config::AnimationState;
use crate::runtime::value::VectorArray;
use super::{Arity, Builtin, Kernel, Namespace, map, zip};

pub struct CoreNamespace;

static BUILTINS: &[Builtin] = &[
    // Trigonometry
    map("sin", f32::sin),
    map("cos", f32::cos),
    map("tan", f32::tan),
    map("sec", sec),
    map("csc", csc),
    map("cot", cot),
    map("asin", f32::asin),
    map("acos", f32::acos),
    map("atan", f32::atan),
    zip("atan2", f32::atan2),
    map("sinh", f32::sinh),
    map("cosh", f32::cosh),
    map("tanh", f32::tanh),
    map("asinh", f32::asinh),
    map("acosh", f32::acosh),
    map("atanh", f32::atanh),

    // Rounding
    map("floor", f32::floor),
    map("ceil", f32::ceil),
    map("round", f32::round),
    map("trunc", f32::trunc),
    map("fract", fract),
    map("abs", f32::abs),
    map("sign", sign),

    // Powers and logarithms
    map("sqrt", f32::sqrt),
    map("cbrt", f32::cbrt),
    map("exp", f32::exp),
    map("ln", f32::ln),
    map("log", f32::log10),
    zip("log", log_base),
    map("log2", f32::log2),
    map("log10", f32::log10),
    zip("pow", f32::powf),
    map("gamma", gamma),
    map("factorial", factorial),

    Builtin { name: "random", arity: Arity::Between(0, 2), kernel: Kernel::Reserved },
];

impl Namespace for CoreNamespace {
    fn name(&self) -> &'static str { "core" }

    fn builtins(&self) -> &'static [Builtin] { BUILTINS }

    fn constant(&self, name: &str, animation: &AnimationState) -> Option<VectorArray> {
        let value = match name {
            "pi"       => VectorArray::scalar(std::f32::consts::PI),
            "tau"      => VectorArray::scalar(std::f32::consts::TAU),
            "e"        => VectorArray::scalar(std::f32::consts::E),
            "inf"      => VectorArray::scalar(f32::INFINITY),
            "time"     => VectorArray::scalar(animation.time),
            "position" => VectorArray::vector(&animation.position),
            "scale"    => VectorArray::scalar(animation.scale),
            "rotation" => VectorArray::vector(&animation.rotation),
            _ => return None,
        };
        Some(value)
    }
}

// ─── Kernels ──────────────────────────────────────────────────────────────────

fn sec(x: f32) -> f32 { 1.0 / x.cos() }
fn csc(x: f32) -> f32 { 1.0 / x.sin() }
fn cot(x: f32) -> f32 { 1.0 / x.tan() }

fn fract(x: f32) -> f32 { x - x.floor() }

/// `-1`, `0` or `1`; `NaN` stays `NaN`.
fn sign(x: f32) -> f32 {
    if x > 0.0 { 1.0 } else if x < 0.0 { -1.0 } else { x }
}

fn log_base(x: f32, base: f32) -> f32 { x.ln() / base.ln() }

/// Lanczos approximation (g = 7, n = 9), computed in f64.
pub fn gamma(x: f32) -> f32 {
    gamma_f64(f64::from(x)) as f32
}

fn gamma_f64(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        // reflection
        return PI / ((PI * x).sin() * gamma_f64(1.0 - x));
    }

    let x = x - 1.0;
    let t = x + G + 0.5;
    let series = COEFFICIENTS
        .iter()
        .enumerate()
        .skip(1)
        .fold(COEFFICIENTS[0], |acc, (i, c)| acc + c / (x + i as f64));

    (2.0 * PI).sqrt() * t.powf(x + 0.5) * (-t).exp() * series
}

pub fn factorial(x: f32) -> f32 {
    gamma(x + 1.0)
}
