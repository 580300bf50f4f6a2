//! Evaluation tests.
//!
//! Tests the full stack: load_script → Environment::evaluate*.
//! Values are compared element by element, with `NaN` equal to `NaN`.

use lumen_lang::{Environment, Limits, RuntimeError, RuntimeErrorKind, Shape, VectorArray, load_script};

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn load(src: &str) -> Environment {
    let (env, failed) = load_script(src);
    if !failed.is_empty() {
        let errors: Vec<_> = failed.iter().filter_map(|s| s.error()).collect();
        panic!("parse failed: {errors:#?}");
    }
    env
}

fn eval(src: &str, name: &str) -> VectorArray {
    load(src)
        .evaluate(name)
        .unwrap_or_else(|e| panic!("evaluating `{name}` failed: {e}"))
}

fn eval_err(src: &str, name: &str) -> RuntimeError {
    match load(src).evaluate(name) {
        Ok(v) => panic!("expected `{name}` to fail, got {v}"),
        Err(e) => e,
    }
}

fn shape(src: &str, name: &str) -> Shape {
    load(src)
        .evaluate_shape(name)
        .unwrap_or_else(|e| panic!("shape of `{name}` failed: {e}"))
}

fn floats(v: &VectorArray) -> Vec<f32> {
    assert_eq!(v.dimension(), 1, "expected a dimension-1 array, got {}", v.shape());
    v.channel(0).to_vec()
}

fn close(a: f32, b: f32) -> bool {
    (a - b).abs() <= 1e-5 * b.abs().max(1.0)
}

fn same(a: &VectorArray, b: &VectorArray) -> bool {
    a.shape() == b.shape()
        && a.channels().iter().zip(b.channels()).all(|(x, y)| {
            x.iter().zip(y.iter()).all(|(p, q)| (p.is_nan() && q.is_nan()) || p == q)
        })
}

// ─── Ranges ──────────────────────────────────────────────────────────────────

#[test]
fn ellipsis_range() {
    let v = eval("a = 3...7", "a");
    assert_eq!(v.shape(), Shape::new(5, 1));
    assert_eq!(floats(&v), [3.0, 4.0, 5.0, 6.0, 7.0]);
}

#[test]
fn ellipsis_inside_array() {
    assert_eq!(floats(&eval("a = [3...7]", "a")), [3.0, 4.0, 5.0, 6.0, 7.0]);
    assert_eq!(floats(&eval("a = [1, 2...4, 10]", "a")), [1.0, 2.0, 3.0, 4.0, 10.0]);
}

#[test]
fn range_bounds_are_rounded() {
    assert_eq!(floats(&eval("a = 1.4...3.6", "a")), [1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn descending_range_is_invalid() {
    assert_eq!(eval_err("a = 5...1", "a").kind, RuntimeErrorKind::InvalidArrayRange);
}

#[test]
fn range_operands_must_be_scalars() {
    assert_eq!(eval_err("a = (1, 2)...3", "a").kind, RuntimeErrorKind::InvalidEllipsisOperand);
}

#[test]
fn range_longer_than_limit() {
    let (env, _) = load_script("a = 1...100");
    let mut env = env.with_limits(Limits { max_array_length: 10, ..Limits::default() });
    assert_eq!(env.evaluate("a").unwrap_err().kind, RuntimeErrorKind::ArrayTooLarge);
}

// ─── Broadcasting ────────────────────────────────────────────────────────────

#[test]
fn scalar_broadcasts_over_array() {
    assert_eq!(floats(&eval("a = [1, 2, 3] + 10", "a")), [11.0, 12.0, 13.0]);
}

#[test]
fn unequal_lengths_truncate_to_shortest() {
    assert_eq!(floats(&eval("a = [1, 2, 3] * [2, 2]", "a")), [2.0, 4.0]);
}

#[test]
fn vector_broadcasts_over_scalar_array() {
    let v = eval("a = (1, 2) + [10, 20]", "a");
    assert_eq!(v.shape(), Shape::new(2, 2));
    assert_eq!(v.channel(0), &[11.0, 21.0]);
    assert_eq!(v.channel(1), &[12.0, 22.0]);
}

#[test]
fn broadcast_shape_rules() {
    let src = "x = [1, 2, 3]\ny = (1, 2)\nz = [1, 2, 3, 4]\nw = [5]\n\
               a = x + y\nb = z + [1, 2]\nc = w + x\nd = y * y";
    assert_eq!(shape(src, "a"), Shape::new(3, 2));
    assert_eq!(shape(src, "b"), Shape::new(2, 1));
    assert_eq!(shape(src, "c"), Shape::new(3, 1));
    assert_eq!(shape(src, "d"), Shape::new(1, 2));
}

#[test]
fn mismatched_dimensions() {
    let err = eval_err("a = (1, 2) + (1, 2, 3)", "a");
    assert!(matches!(err.kind, RuntimeErrorKind::DifferingLengthVectors(..)));
    assert_eq!(err.statement.as_deref(), Some("a"));
}

#[test]
fn comparisons_yield_ones_and_zeros() {
    assert_eq!(floats(&eval("a = [1, 2, 3] >= 2", "a")), [0.0, 1.0, 1.0]);
    assert_eq!(floats(&eval("a = [1, 2, 3] != 2", "a")), [1.0, 0.0, 1.0]);
}

#[test]
fn unary_operators() {
    assert_eq!(floats(&eval("a = not [0, 2]", "a")), [1.0, 0.0]);
    assert_eq!(floats(&eval("a = -[1, 2]", "a")), [-1.0, -2.0]);
    assert!(close(eval("a = 5!", "a").channel(0)[0], 120.0));
}

// ─── Vectors and arrays ──────────────────────────────────────────────────────

#[test]
fn vector_inside_vector() {
    assert_eq!(eval_err("a = ((1, 2), 3)", "a").kind, RuntimeErrorKind::VectorInsideVector);
}

#[test]
fn non_uniform_array() {
    assert_eq!(eval_err("a = [(1, 2), 3]", "a").kind, RuntimeErrorKind::NonUniformArray);
}

#[test]
fn array_inside_array() {
    assert_eq!(eval_err("x = [1, 2]\na = [x, 3]", "a").kind, RuntimeErrorKind::ArrayInsideArray);
}

#[test]
fn array_of_vectors() {
    let v = eval("a = [(1, 2), (3, 4), (5, 6)]", "a");
    assert_eq!(v.shape(), Shape::new(3, 2));
    assert_eq!(v.element(1), Some(vec![3.0, 4.0]));
}

// ─── Swizzle and indexing ────────────────────────────────────────────────────

#[test]
fn swizzle_selects_channels() {
    let v = eval("v = (1, 2, 3)\na = v.xz", "a");
    assert_eq!(v.shape(), Shape::new(1, 2));
    assert_eq!(v.element(0), Some(vec![1.0, 3.0]));
}

#[test]
fn repeated_swizzle_channels_are_independent() {
    let mut env = load("v = (1, 2, 3)\nb = v.xx");
    let mut b = env.evaluate("b").unwrap();
    assert_eq!(b.element(0), Some(vec![1.0, 1.0]));

    b.channel_mut(0)[0] = 9.0;
    assert_eq!(b.channel(1)[0], 1.0);
    assert_eq!(env.evaluate("v").unwrap().element(0), Some(vec![1.0, 2.0, 3.0]));
    assert_eq!(env.evaluate("b").unwrap().element(0), Some(vec![1.0, 1.0]));
}

#[test]
fn swizzle_past_dimension() {
    assert_eq!(
        eval_err("v = (1, 2)\na = v.z", "a").kind,
        RuntimeErrorKind::InvalidSwizzling("z".into())
    );
}

#[test]
fn out_of_range_index_is_nan() {
    let v = eval("a = [10, 20, 30][5]", "a");
    assert_eq!(v.shape(), Shape::SCALAR);
    assert!(v.channel(0)[0].is_nan());
    assert!(eval("a = [10, 20, 30][-1]", "a").channel(0)[0].is_nan());
}

#[test]
fn index_is_rounded() {
    assert_eq!(floats(&eval("a = [10, 20, 30][1.6]", "a")), [30.0]);
}

#[test]
fn index_with_array() {
    assert_eq!(floats(&eval("a = [10, 20, 30][[2, 0]]", "a")), [30.0, 10.0]);
}

#[test]
fn dot_indexes_with_variable() {
    assert_eq!(floats(&eval("i = [0, 2]\na = [10, 20, 30].i", "a")), [10.0, 30.0]);
}

#[test]
fn index_must_be_scalar_per_element() {
    assert_eq!(
        eval_err("p = (0, 1)\na = [1, 2][p]", "a").kind,
        RuntimeErrorKind::IndexingWithVector
    );
}

// ─── Comprehensions ──────────────────────────────────────────────────────────

#[test]
fn for_comprehension() {
    assert_eq!(floats(&eval("a = [i * i for i = [1...4]]", "a")), [1.0, 4.0, 9.0, 16.0]);
}

#[test]
fn for_comprehension_of_vectors() {
    let v = eval("a = [(i, i ^ 2) for i = [1...3]]", "a");
    assert_eq!(v.shape(), Shape::new(3, 2));
    assert_eq!(v.channel(1), &[1.0, 4.0, 9.0]);
}

#[test]
fn filtered_comprehension() {
    assert_eq!(floats(&eval("a = [i for i = [1...10] when i % 3 == 0]", "a")), [3.0, 6.0, 9.0]);
}

#[test]
fn nested_comprehension() {
    let v = eval("a = [i + j for j = [0, 10] for i = [1, 2]]", "a");
    assert_eq!(floats(&v), [1.0, 11.0, 2.0, 12.0]);
}

#[test]
fn comprehension_dimensions_checked_on_every_element() {
    let src = "a = [(x, x) if x > 1 else x for x = [1...3]]";
    assert_eq!(eval_err(src, "a").kind, RuntimeErrorKind::NonUniformArray);
    assert_eq!(load(src).evaluate_shape("a").unwrap_err().kind, RuntimeErrorKind::NonUniformArray);
    assert_eq!(
        load(src).evaluate_indexed("a", Some(&[0])).unwrap_err().kind,
        RuntimeErrorKind::NonUniformArray
    );
}

#[test]
fn comprehension_lengths_checked_on_every_element() {
    let src = "a = [[10, 20, 30][0...x] for x = [0...2]]";
    assert_eq!(eval_err(src, "a").kind, RuntimeErrorKind::ArrayInsideArray);
    assert_eq!(load(src).evaluate_shape("a").unwrap_err().kind, RuntimeErrorKind::ArrayInsideArray);
    assert_eq!(
        load(src).evaluate_indexed("a", Some(&[0])).unwrap_err().kind,
        RuntimeErrorKind::ArrayInsideArray
    );
}

#[test]
fn value_dependent_bodies_that_stay_uniform() {
    let src = "a = [x * 10 if x > 1 else -x for x = [1...4]]";
    assert_eq!(shape(src, "a"), Shape::new(4, 1));
    let indexed = load(src).evaluate_indexed("a", Some(&[2, 0, 9])).unwrap();
    assert!(same(&indexed, &eval(src, "a").gather(&[2, 0, 9])));
}

#[test]
fn comprehension_body_must_be_one_element() {
    assert_eq!(
        eval_err("x = [1, 2]\na = [x for i = [1, 2]]", "a").kind,
        RuntimeErrorKind::ArrayInsideArray
    );
}

// ─── Conditionals ────────────────────────────────────────────────────────────

#[test]
fn elementwise_conditional() {
    assert_eq!(floats(&eval("a = [1, 2, 3] if [1, 0, 1] else 0", "a")), [1.0, 0.0, 3.0]);
}

#[test]
fn nan_condition_gives_nan() {
    assert!(eval("a = 1 if [10, 20][5] else 2", "a").channel(0)[0].is_nan());
}

// ─── Functions ───────────────────────────────────────────────────────────────

#[test]
fn vector_function_scenario() {
    let v = eval("f(x, y) = (cos(x - y), sin(x + y)); a = f(1, 2)", "a");
    assert_eq!(v.shape(), Shape::new(1, 2));
    let element = v.element(0).unwrap();
    assert!(close(element[0], (1.0f32 - 2.0).cos()));
    assert!(close(element[1], (1.0f32 + 2.0).sin()));
}

#[test]
fn function_over_array() {
    assert_eq!(floats(&eval("sq(x) = x * x\na = sq([1, 2, 3])", "a")), [1.0, 4.0, 9.0]);
}

#[test]
fn recursive_function() {
    assert_eq!(floats(&eval("fact(n) = 1 if n <= 0 else n * fact(n - 1)\na = fact(5)", "a")), [120.0]);
}

#[test]
fn runaway_recursion_is_stopped() {
    let (env, _) = load_script("f(n) = f(n + 1)\na = f(0)");
    let mut env = env.with_limits(Limits { max_call_depth: 32, ..Limits::default() });
    assert_eq!(env.evaluate("a").unwrap_err().kind, RuntimeErrorKind::RecursionLimit(32));
}

#[test]
fn wrong_parameter_count() {
    assert_eq!(
        eval_err("f(x) = x\na = f(1, 2)", "a").kind,
        RuntimeErrorKind::IncorrectParameterCount { name: "f".into(), expected: 1, found: 2 }
    );
}

#[test]
fn identifier_kind_mismatches() {
    assert_eq!(
        eval_err("b = 2\na = b(1)", "a").kind,
        RuntimeErrorKind::IdentifierNotFunction("b".into())
    );
    assert_eq!(
        eval_err("f(x) = x\na = f + 1", "a").kind,
        RuntimeErrorKind::IdentifierNotVariable("f".into())
    );
    assert_eq!(
        eval_err("a = sin + 1", "a").kind,
        RuntimeErrorKind::IdentifierNotVariable("sin".into())
    );
}

#[test]
fn undefined_identifier_names_its_statement() {
    let err = eval_err("a = q + 1", "a");
    assert_eq!(err.kind, RuntimeErrorKind::UndefinedIdentifier("q".into()));
    assert_eq!(err.statement.as_deref(), Some("a"));
}

#[test]
fn cyclic_variables() {
    let err = eval_err("a = b + 1\nb = a", "a");
    assert!(matches!(err.kind, RuntimeErrorKind::CyclicDefinition(_)));
}

// ─── Builtins ────────────────────────────────────────────────────────────────

#[test]
fn reductions() {
    assert_eq!(floats(&eval("a = mean([1, 2, 3, 4])", "a")), [2.5]);
    assert_eq!(floats(&eval("a = max([1, 5, 3])", "a")), [5.0]);
    assert_eq!(floats(&eval("a = count([1...10])", "a")), [10.0]);
    let per_channel = eval("a = sum([(1, 10), (2, 20)])", "a");
    assert_eq!(per_channel.element(0), Some(vec![3.0, 30.0]));
}

#[test]
fn whole_array_builtins() {
    assert_eq!(floats(&eval("a = sort([3, 1, 2])", "a")), [1.0, 2.0, 3.0]);
    assert_eq!(floats(&eval("a = join([1, 2], 3)", "a")), [1.0, 2.0, 3.0]);
    assert_eq!(floats(&eval("a = max([1, 5], [4, 2])", "a")), [4.0, 5.0]);
    assert_eq!(floats(&eval("a = dot((1, 2, 3), (4, 5, 6))", "a")), [32.0]);
}

#[test]
fn two_argument_math() {
    assert!(close(eval("a = atan2(1, 1)", "a").channel(0)[0], std::f32::consts::FRAC_PI_4));
    assert!(close(eval("a = log(8, 2)", "a").channel(0)[0], 3.0));
    assert_eq!(floats(&eval("a = pow([1, 2, 3], 2)", "a")), [1.0, 4.0, 9.0]);
}

#[test]
fn builtin_argument_errors() {
    assert!(matches!(
        eval_err("a = sin(1, 2)", "a").kind,
        RuntimeErrorKind::IncorrectArgumentCount { .. }
    ));
    assert!(matches!(
        eval_err("a = cross((1, 2), (3, 4))", "a").kind,
        RuntimeErrorKind::InvalidArgumentType { .. }
    ));
    assert_eq!(eval_err("a = random()", "a").kind, RuntimeErrorKind::NotImplemented("random".into()));
}

#[test]
fn geometry_requires_equal_dimensions() {
    for src in ["a = dot(2, (1, 2, 3))", "a = dist(1, (3, 4))", "a = distsq((1, 2), 1)"] {
        assert!(
            matches!(eval_err(src, "a").kind, RuntimeErrorKind::InvalidArgumentType { .. }),
            "{src} should be rejected"
        );
        assert!(matches!(
            load(src).evaluate_shape("a").unwrap_err().kind,
            RuntimeErrorKind::InvalidArgumentType { .. }
        ));
    }
    assert_eq!(floats(&eval("a = dist([(0, 0), (3, 4)], (0, 0))", "a")), [0.0, 5.0]);
}

const BUILTIN_SHAPES_SCRIPT: &str = "\
b1 = join([1, 2], 3, [4...6])
b2 = interleave([1, 2, 3], [10, 20])
b3 = max([1, 5, 2], 3)
b4 = sort([(3, 1), (1, 2)])
b5 = sort([1, 2, 3], [3, 1])
b6 = count([1...9])
b7 = quantile([1...5], [0, 0.5, 1])
b8 = corr([(1, 2), (2, 4), (3, 7)], [1, 2, 3])
b9 = cross([(1, 0, 0), (0, 1, 0)], (0, 0, 1))
b10 = dist([(0, 0), (3, 4)], (0, 0))
b11 = normalize([(3, 4), (0, 2)])
b12 = length([(3, 4), (0, 2)])
";

#[test]
fn builtin_shapes_match_their_values() {
    for name in ["b1", "b2", "b3", "b4", "b5", "b6", "b7", "b8", "b9", "b10", "b11", "b12"] {
        let mut env = load(BUILTIN_SHAPES_SCRIPT);
        let inferred = env.evaluate_shape(name).unwrap_or_else(|e| panic!("{name}: {e}"));
        assert_eq!(env.stats().builtin_calls, 0, "{name}: shape inference ran a builtin");
        let value = env.evaluate(name).unwrap_or_else(|e| panic!("{name}: {e}"));
        assert_eq!(inferred, value.shape(), "{name}");
    }
}

#[test]
fn shape_of_whole_array_builtin_is_lazy() {
    let mut env = load("a = join([0...10000000], [1, 2])\nb = length([(x, 1) for x = [0...10000000]])");
    assert_eq!(env.evaluate_shape("a").unwrap(), Shape::new(10_000_003, 1));
    assert_eq!(env.evaluate_shape("b").unwrap(), Shape::new(10_000_001, 1));
    assert_eq!(env.stats().builtin_calls, 0);
}

#[test]
fn constants() {
    assert!(close(eval("a = pi", "a").channel(0)[0], std::f32::consts::PI));
    assert_eq!(eval("a = rotation", "a").element(0), Some(vec![0.0, 0.0, 0.0, 1.0]));
    assert_eq!(eval("a = time", "a"), VectorArray::scalar(0.0));
}

// ─── Indexed evaluation ──────────────────────────────────────────────────────

const EQUIVALENCE_SCRIPT: &str = "\
a = [i * 2 for i = [0...9]]
b = [1, 2...4, 10]
c = [(i, i ^ 2) for i = [1...5]]
d = b[[4, 0, 2]]
e = sin(a) + b
f = [j + i for j = [0, 10] for i = [1, 2, 3]]
g = [i for i = [1...20] when i % 2]
h = c.yx
k(x) = x * 3
m = k(a)
n = [10, 20, 30][1.2]
p = 7
q = (a, a + 1)
r = 1...6
s = a if a > 5 else -a
";

#[test]
fn indexed_evaluation_matches_full_evaluation() {
    let subset: &[i64] = &[0, 3, 1, 42, -1, 4];
    for name in ["a", "b", "c", "d", "e", "f", "g", "h", "m", "n", "p", "q", "r", "s"] {
        // separate environments so the indexed pass cannot read the cache
        let full = load(EQUIVALENCE_SCRIPT).evaluate(name).unwrap_or_else(|e| panic!("{name}: {e}"));
        let indexed = load(EQUIVALENCE_SCRIPT)
            .evaluate_indexed(name, Some(subset))
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        assert!(
            same(&full.gather(subset), &indexed),
            "{name}: full {full} sliced {} != indexed {indexed}",
            full.gather(subset)
        );
    }
}

#[test]
fn indexed_evaluation_of_huge_range_is_lazy() {
    let mut env = load("a = [x * 2 for x = [0...10000000]]");
    let v = env.evaluate_indexed("a", Some(&[5, 9_999_999])).unwrap();
    assert_eq!(floats(&v), [10.0, 19_999_998.0]);
    assert!(env.cached("a").is_none());
}

#[test]
fn shape_without_values() {
    let mut env = load("a = [x * 2 for x = [0...10000000]]\nb = [(x, 1) for x = [1...4]]");
    assert_eq!(env.evaluate_shape("a").unwrap(), Shape::new(10_000_001, 1));
    assert_eq!(env.evaluate_shape("b").unwrap(), Shape::new(4, 2));
    assert_eq!(env.stats().statement_evaluations, 0);
}
