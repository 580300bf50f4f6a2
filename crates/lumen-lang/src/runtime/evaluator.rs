use std::collections::HashMap;

use log::trace;

use crate::config::{AnimationState, Limits};
use crate::error::{RuntimeError, RuntimeErrorKind};
use crate::namespaces::core::factorial;
use crate::namespaces::{Builtin, Kernel, NamespaceRegistry, invalid};
use crate::runtime::scope::{Binding, Parameter, Scope};
use crate::runtime::value::{
    ArrayBuilder, Channel, DimensionMismatch, Selection, Shape, VectorArray, broadcast_shape, zip_map,
};
use crate::syntax::ast::{Expr, Span, Statement, StatementKind, UnOp};

/// Counters exposed through `Environment::stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalStats {
    /// Builtin dispatches that computed values.
    pub builtin_calls: u64,
    /// Named variable bodies evaluated for values (cache misses).
    pub statement_evaluations: u64,
}

/// What a walk should produce.
#[derive(Debug, Clone, Copy)]
enum Mode<'i> {
    /// Length and dimension only.
    Shape,
    Values(Selection<'i>),
}

enum Walked {
    Shape(Shape),
    Values(VectorArray),
}

impl Walked {
    fn shape(&self) -> Shape {
        match self {
            Walked::Shape(shape) => *shape,
            Walked::Values(value) => value.shape(),
        }
    }

    fn into_values(self) -> VectorArray {
        match self {
            Walked::Values(value) => value,
            // a value walk never answers with a bare shape
            Walked::Shape(shape) => VectorArray::nan(shape),
        }
    }
}

/// Answers `mode` from an already materialised value.
fn leaf(mode: Mode<'_>, value: VectorArray) -> Walked {
    match mode {
        Mode::Shape => Walked::Shape(value.shape()),
        Mode::Values(selection) => Walked::Values(value.select(selection)),
    }
}

fn in_range(index: i64, length: usize) -> bool {
    usize::try_from(index).is_ok_and(|i| i < length)
}

fn to_index(value: f32) -> i64 {
    if value.is_finite() { value.round() as i64 } else { -1 }
}

fn differing(m: DimensionMismatch) -> RuntimeErrorKind {
    RuntimeErrorKind::DifferingLengthVectors(m.expected, m.found)
}

/// Spreads `result`, computed for the in-range entries of `indices` only,
/// back over every requested position. Out-of-range positions get `NaN`.
fn scatter(result: VectorArray, indices: &[i64], shape: Shape) -> VectorArray {
    if result.length() == indices.len() && indices.iter().all(|&i| in_range(i, shape.length)) {
        return result;
    }

    let mut channels = vec![Vec::with_capacity(indices.len()); result.dimension()];
    let mut k = 0;
    for &i in indices {
        let valid = in_range(i, shape.length);
        for (c, channel) in channels.iter_mut().enumerate() {
            channel.push(if valid { result.broadcast_at(k, c) } else { f32::NAN });
        }
        if valid { k += 1; }
    }
    VectorArray::from_parts(indices.len(), channels.into_iter().map(Channel::new).collect())
}

fn swizzle_channels(components: &str, dimension: usize) -> Result<Vec<usize>, RuntimeErrorKind> {
    components
        .bytes()
        .map(|letter| {
            let channel = match letter {
                b'x' => 0,
                b'y' => 1,
                b'z' => 2,
                _ => 3,
            };
            if channel < dimension {
                Ok(channel)
            } else {
                Err(RuntimeErrorKind::InvalidSwizzling(components.to_string()))
            }
        })
        .collect()
}

// ─── Evaluator ───────────────────────────────────────────────────────────────

/// Tree-walking evaluator over one environment.
///
/// Every node kind is handled by one walk parameterised by `Mode`: shape
/// inference, full evaluation, or evaluation of selected output elements
/// only. Indexed requests are narrowed as they descend so that only the
/// needed elements of the operands are ever computed.
pub(crate) struct Evaluator<'e> {
    definitions: &'e HashMap<String, Statement>,
    cache: &'e mut HashMap<String, VectorArray>,
    registry: &'e NamespaceRegistry,
    animation: &'e AnimationState,
    limits: &'e Limits,
    stats: &'e mut EvalStats,
    in_progress: Vec<&'e str>,
    depth: usize,
    /// Statement whose tokens the spans being walked index into.
    owner: Option<&'e str>,
}

impl<'e> Evaluator<'e> {
    pub(crate) fn new(
        definitions: &'e HashMap<String, Statement>,
        cache: &'e mut HashMap<String, VectorArray>,
        registry: &'e NamespaceRegistry,
        animation: &'e AnimationState,
        limits: &'e Limits,
        stats: &'e mut EvalStats,
    ) -> Self {
        Self {
            definitions,
            cache,
            registry,
            animation,
            limits,
            stats,
            in_progress: Vec::new(),
            depth: 0,
            owner: None,
        }
    }

    // ─── Entry points ────────────────────────────────────────────────────────

    pub(crate) fn evaluate_name(&mut self, name: &str, selection: Selection<'_>) -> Result<VectorArray, RuntimeError> {
        let root = Scope::root();
        self.eval_identifier(name, Span::default(), &root, Mode::Values(selection))
            .map(Walked::into_values)
    }

    pub(crate) fn shape_of_name(&mut self, name: &str) -> Result<Shape, RuntimeError> {
        let root = Scope::root();
        Ok(self.eval_identifier(name, Span::default(), &root, Mode::Shape)?.shape())
    }

    pub(crate) fn evaluate_expr(&mut self, expr: &Expr, selection: Selection<'_>) -> Result<VectorArray, RuntimeError> {
        let root = Scope::root();
        self.values_of(expr, &root, selection)
    }

    pub(crate) fn shape_of_expr(&mut self, expr: &Expr) -> Result<Shape, RuntimeError> {
        let root = Scope::root();
        self.shape_of(expr, &root)
    }

    // ─── Walk ────────────────────────────────────────────────────────────────

    fn walk<'s>(&mut self, expr: &'s Expr, scope: &'s Scope<'s>, mode: Mode<'_>) -> Result<Walked, RuntimeError> {
        match expr {
            Expr::Constant(v, _) => Ok(leaf(mode, VectorArray::scalar(*v))),
            Expr::Identifier(name, span) => self.eval_identifier(name, *span, scope, mode),
            Expr::Vector(items, span) => self.eval_vector(items, *span, scope, mode),
            Expr::Array(items, span) => self.eval_array(items, *span, scope, mode),
            Expr::For { body, binder, source, filter, span } => {
                let comprehension = Comprehension { body, binder, source, filter: filter.as_deref(), span: *span };
                self.eval_for(&comprehension, scope, mode)
            }
            Expr::Call { name, args, span } => self.eval_call(name, args, *span, scope, mode),
            Expr::Unary { op, operand, span } => self.eval_unary(*op, operand, *span, scope, mode),
            Expr::Binary { op, left, right, span } => {
                let op = *op;
                self.elementwise(
                    &[&**left, &**right],
                    scope,
                    mode,
                    *span,
                    |shapes| broadcast_shape(shapes).map_err(differing),
                    move |v| zip_map(&[&v[0], &v[1]], |x| op.apply(x[0], x[1])).map_err(differing),
                )
            }
            Expr::Range { lower, upper, span } => self.eval_range(lower, upper, *span, scope, mode),
            Expr::Index { target, index, span } => self.eval_index(target, index, *span, scope, mode),
            Expr::Swizzle { target, components, span } => self.eval_swizzle(target, components, *span, scope, mode),
            Expr::Conditional { then_expr, condition, else_expr, span } => {
                self.eval_conditional(then_expr, condition, else_expr, *span, scope, mode)
            }
        }
    }

    fn shape_of<'s>(&mut self, expr: &'s Expr, scope: &'s Scope<'s>) -> Result<Shape, RuntimeError> {
        Ok(self.walk(expr, scope, Mode::Shape)?.shape())
    }

    fn values_of<'s>(
        &mut self,
        expr: &'s Expr,
        scope: &'s Scope<'s>,
        selection: Selection<'_>,
    ) -> Result<VectorArray, RuntimeError> {
        Ok(self.walk(expr, scope, Mode::Values(selection))?.into_values())
    }

    fn fail(&self, kind: RuntimeErrorKind, span: Span) -> RuntimeError {
        RuntimeError::new(kind, span).in_statement(self.owner)
    }

    fn owner_key(&self, name: &str) -> Option<&'e str> {
        let definitions = self.definitions;
        definitions.get_key_value(name).map(|(key, _)| key.as_str())
    }

    // ─── Element-wise nodes ──────────────────────────────────────────────────

    /// Shared driver for every node whose output element `i` depends only on
    /// element `i` of each operand (after broadcasting).
    ///
    /// `check` maps operand shapes to the result shape; `combine` computes the
    /// result from operand values. For an indexed request the operands are
    /// evaluated at the in-range requested indices only (length-1 operands at
    /// index 0) and the result is scattered back with `NaN` fill.
    fn elementwise<'s>(
        &mut self,
        operands: &[&'s Expr],
        scope: &'s Scope<'s>,
        mode: Mode<'_>,
        span: Span,
        check: impl Fn(&[Shape]) -> Result<Shape, RuntimeErrorKind>,
        combine: impl Fn(&[VectorArray]) -> Result<VectorArray, RuntimeErrorKind>,
    ) -> Result<Walked, RuntimeError> {
        match mode {
            Mode::Shape => {
                let mut shapes = Vec::with_capacity(operands.len());
                for operand in operands {
                    shapes.push(self.shape_of(operand, scope)?);
                }
                check(&shapes).map(Walked::Shape).map_err(|kind| self.fail(kind, span))
            }

            Mode::Values(Selection::All) => {
                let mut values = Vec::with_capacity(operands.len());
                for operand in operands {
                    values.push(self.values_of(operand, scope, Selection::All)?);
                }
                combine(&values).map(Walked::Values).map_err(|kind| self.fail(kind, span))
            }

            Mode::Values(Selection::Indices(indices)) => {
                let mut shapes = Vec::with_capacity(operands.len());
                for operand in operands {
                    shapes.push(self.shape_of(operand, scope)?);
                }
                let shape = check(&shapes).map_err(|kind| self.fail(kind, span))?;

                let valid: Vec<i64> = indices.iter().copied().filter(|&i| in_range(i, shape.length)).collect();
                let mut values = Vec::with_capacity(operands.len());
                for (operand, operand_shape) in operands.iter().zip(&shapes) {
                    let selection = if operand_shape.length == 1 {
                        Selection::Indices(&[0])
                    } else {
                        Selection::Indices(&valid)
                    };
                    values.push(self.values_of(operand, scope, selection)?);
                }

                let result = combine(&values).map_err(|kind| self.fail(kind, span))?;
                Ok(Walked::Values(scatter(result, indices, shape)))
            }
        }
    }

    fn eval_unary<'s>(
        &mut self,
        op: UnOp,
        operand: &'s Expr,
        span: Span,
        scope: &'s Scope<'s>,
        mode: Mode<'_>,
    ) -> Result<Walked, RuntimeError> {
        let f: fn(f32) -> f32 = match op {
            UnOp::Pos => return self.walk(operand, scope, mode),
            UnOp::Neg => |x| -x,
            UnOp::Not => |x| if x == 0.0 { 1.0 } else { 0.0 },
            UnOp::Factorial => factorial,
        };
        self.elementwise(
            &[operand],
            scope,
            mode,
            span,
            |shapes| Ok(shapes[0]),
            move |v| zip_map(&[&v[0]], |x| f(x[0])).map_err(differing),
        )
    }

    /// `(a, b, c)`: each component is one output channel.
    fn eval_vector<'s>(
        &mut self,
        items: &'s [Expr],
        span: Span,
        scope: &'s Scope<'s>,
        mode: Mode<'_>,
    ) -> Result<Walked, RuntimeError> {
        let operands: Vec<&Expr> = items.iter().collect();
        let dimension = items.len();

        let check = move |shapes: &[Shape]| -> Result<Shape, RuntimeErrorKind> {
            if shapes.iter().any(|s| s.dimension != 1) {
                return Err(RuntimeErrorKind::VectorInsideVector);
            }
            let length = broadcast_shape(shapes).map_err(differing)?.length;
            Ok(Shape::new(length, dimension))
        };

        self.elementwise(&operands, scope, mode, span, check, move |values| {
            let shapes: Vec<Shape> = values.iter().map(VectorArray::shape).collect();
            let shape = check(&shapes)?;
            let channels = values
                .iter()
                .map(|v| Channel::new((0..shape.length).map(|i| v.broadcast_at(i, 0)).collect()))
                .collect();
            Ok(VectorArray::from_parts(shape.length, channels))
        })
    }

    /// `a if c else b`. A single scalar condition picks one branch and only
    /// that branch is evaluated; otherwise the select is element-wise.
    fn eval_conditional<'s>(
        &mut self,
        then_expr: &'s Expr,
        condition: &'s Expr,
        else_expr: &'s Expr,
        span: Span,
        scope: &'s Scope<'s>,
        mode: Mode<'_>,
    ) -> Result<Walked, RuntimeError> {
        if self.shape_of(condition, scope)? == Shape::SCALAR {
            let c = self.values_of(condition, scope, Selection::All)?.broadcast_at(0, 0);
            return if c.is_nan() {
                let shape = self.shape_of(then_expr, scope)?;
                Ok(leaf(mode, VectorArray::nan(shape)))
            } else if c != 0.0 {
                self.walk(then_expr, scope, mode)
            } else {
                self.walk(else_expr, scope, mode)
            };
        }

        self.elementwise(
            &[then_expr, condition, else_expr],
            scope,
            mode,
            span,
            |shapes| broadcast_shape(shapes).map_err(differing),
            |v| {
                zip_map(&[&v[0], &v[1], &v[2]], |x| {
                    if x[1].is_nan() { f32::NAN } else if x[1] != 0.0 { x[0] } else { x[2] }
                })
                .map_err(differing)
            },
        )
    }

    // ─── Identifiers ─────────────────────────────────────────────────────────

    /// Resolution order: parameter scope, cache, variable statement,
    /// builtin constant.
    fn eval_identifier<'s>(
        &mut self,
        name: &str,
        span: Span,
        scope: &'s Scope<'s>,
        mode: Mode<'_>,
    ) -> Result<Walked, RuntimeError> {
        if let Some(binding) = scope.lookup(name) {
            return match binding {
                Binding::Value(value) => Ok(leaf(mode, value.clone())),
                Binding::Deferred { expr, scope: outer, owner } => {
                    let saved = self.owner;
                    self.owner = owner.and_then(|o| self.owner_key(o));
                    let result = self.walk(expr, outer, mode);
                    self.owner = saved;
                    result
                }
            };
        }

        if let Some(cached) = self.cache.get(name) {
            trace!("cache hit: {name}");
            return Ok(leaf(mode, cached.clone()));
        }

        let definitions = self.definitions;
        if let Some((key, statement)) = definitions.get_key_value(name) {
            return match &statement.kind {
                StatementKind::Variable { body, .. } => self.eval_variable(key, body, span, mode),
                _ => Err(self.fail(RuntimeErrorKind::IdentifierNotVariable(name.to_string()), span)),
            };
        }

        if let Some(value) = self.registry.constant(name, self.animation) {
            return Ok(leaf(mode, value));
        }

        let kind = if self.registry.is_function(name) {
            RuntimeErrorKind::IdentifierNotVariable(name.to_string())
        } else {
            RuntimeErrorKind::UndefinedIdentifier(name.to_string())
        };
        Err(self.fail(kind, span))
    }

    fn eval_variable(&mut self, name: &'e str, body: &'e Expr, span: Span, mode: Mode<'_>) -> Result<Walked, RuntimeError> {
        if self.in_progress.contains(&name) {
            return Err(self.fail(RuntimeErrorKind::CyclicDefinition(name.to_string()), span));
        }
        trace!("cache miss: {name}");

        if matches!(mode, Mode::Values(_)) {
            self.stats.statement_evaluations += 1;
        }

        self.in_progress.push(name);
        let saved = self.owner.replace(name);
        let root = Scope::root();
        let result = self.walk(body, &root, mode);
        self.owner = saved;
        self.in_progress.pop();

        let walked = result?;
        if let (Mode::Values(Selection::All), Walked::Values(value)) = (mode, &walked) {
            trace!("cache insert: {name} ({})", value.shape());
            self.cache.insert(name.to_string(), value.clone());
        }
        Ok(walked)
    }

    // ─── Arrays and ranges ───────────────────────────────────────────────────

    /// Validates element shapes of an array literal; returns the result shape.
    fn check_array(&self, items: &[Expr], shapes: &[Shape], span: Span) -> Result<Shape, RuntimeError> {
        let dimension = shapes.iter().find(|s| s.length > 0).map_or(1, |s| s.dimension);
        let mut length = 0usize;

        for (item, shape) in items.iter().zip(shapes) {
            if shape.length > 0 && shape.dimension != dimension {
                return Err(self.fail(RuntimeErrorKind::NonUniformArray, item.span()));
            }
            if shape.length > 1 && !matches!(item, Expr::For { .. } | Expr::Range { .. }) {
                return Err(self.fail(RuntimeErrorKind::ArrayInsideArray, item.span()));
            }
            length = length.saturating_add(shape.length);
        }

        if length > self.limits.max_array_length {
            return Err(self.fail(RuntimeErrorKind::ArrayTooLarge, span));
        }
        Ok(Shape::new(length, dimension))
    }

    fn eval_array<'s>(
        &mut self,
        items: &'s [Expr],
        span: Span,
        scope: &'s Scope<'s>,
        mode: Mode<'_>,
    ) -> Result<Walked, RuntimeError> {
        if let Mode::Values(Selection::All) = mode {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(self.values_of(item, scope, Selection::All)?);
            }
            let shapes: Vec<Shape> = values.iter().map(VectorArray::shape).collect();
            let shape = self.check_array(items, &shapes, span)?;

            let mut out = ArrayBuilder::with_dimension(shape.dimension);
            for value in values.iter().filter(|v| v.length() > 0) {
                out.push(value).map_err(|_| self.fail(RuntimeErrorKind::NonUniformArray, span))?;
            }
            return Ok(Walked::Values(out.finish()));
        }

        let mut shapes = Vec::with_capacity(items.len());
        for item in items {
            shapes.push(self.shape_of(item, scope)?);
        }
        let shape = self.check_array(items, &shapes, span)?;

        match mode {
            Mode::Values(Selection::Indices(indices)) if items.len() == 1 => {
                Ok(Walked::Values(self.values_of(&items[0], scope, Selection::Indices(indices))?))
            }
            Mode::Values(Selection::Indices(indices)) => {
                let lengths: Vec<usize> = shapes.iter().map(|s| s.length).collect();
                self.gather_segments(&lengths, shape.dimension, indices, |this, k, local| {
                    this.values_of(&items[k], scope, Selection::Indices(local))
                })
                .map(Walked::Values)
            }
            _ => Ok(Walked::Shape(shape)),
        }
    }

    /// Indexed read over a concatenation of segments with the given lengths.
    /// Each requested position is routed to its segment; `segment` is called
    /// once per segment that has requests, with segment-local indices.
    fn gather_segments(
        &mut self,
        lengths: &[usize],
        dimension: usize,
        indices: &[i64],
        mut segment: impl FnMut(&mut Self, usize, &[i64]) -> Result<VectorArray, RuntimeError>,
    ) -> Result<VectorArray, RuntimeError> {
        let mut starts = Vec::with_capacity(lengths.len());
        let mut total = 0usize;
        for &length in lengths {
            starts.push(total);
            total += length;
        }

        let mut local: Vec<Vec<i64>> = vec![Vec::new(); lengths.len()];
        let mut slots = Vec::with_capacity(indices.len());
        for &i in indices {
            if !in_range(i, total) {
                slots.push(None);
                continue;
            }
            let position = i as usize;
            let owner = starts.partition_point(|&start| start <= position) - 1;
            local[owner].push((position - starts[owner]) as i64);
            slots.push(Some((owner, local[owner].len() - 1)));
        }

        let mut parts = Vec::with_capacity(lengths.len());
        for (k, requested) in local.iter().enumerate() {
            parts.push(if requested.is_empty() { None } else { Some(segment(self, k, requested)?) });
        }

        let mut channels = vec![Vec::with_capacity(indices.len()); dimension];
        for slot in slots {
            for (c, channel) in channels.iter_mut().enumerate() {
                let value = slot
                    .and_then(|(owner, k)| parts[owner].as_ref()?.get(k, c))
                    .unwrap_or(f32::NAN);
                channel.push(value);
            }
        }
        Ok(VectorArray::from_parts(indices.len(), channels.into_iter().map(Channel::new).collect()))
    }

    /// Rounded bounds of `lower...upper`: the first value and the length.
    fn range_bounds<'s>(
        &mut self,
        lower: &'s Expr,
        upper: &'s Expr,
        span: Span,
        scope: &'s Scope<'s>,
    ) -> Result<(f64, usize), RuntimeError> {
        let mut bounds = [0.0f64; 2];
        for (bound, expr) in bounds.iter_mut().zip([lower, upper]) {
            if self.shape_of(expr, scope)? != Shape::SCALAR {
                return Err(self.fail(RuntimeErrorKind::InvalidEllipsisOperand, expr.span()));
            }
            let value = self.values_of(expr, scope, Selection::All)?.broadcast_at(0, 0);
            *bound = f64::from(value).round();
        }

        let [lo, hi] = bounds;
        if !lo.is_finite() || !hi.is_finite() || hi < lo {
            return Err(self.fail(RuntimeErrorKind::InvalidArrayRange, span));
        }
        let length = hi - lo + 1.0;
        if length > self.limits.max_array_length as f64 {
            return Err(self.fail(RuntimeErrorKind::ArrayTooLarge, span));
        }
        Ok((lo, length as usize))
    }

    fn eval_range<'s>(
        &mut self,
        lower: &'s Expr,
        upper: &'s Expr,
        span: Span,
        scope: &'s Scope<'s>,
        mode: Mode<'_>,
    ) -> Result<Walked, RuntimeError> {
        let (lo, length) = self.range_bounds(lower, upper, span, scope)?;
        let at = |k: usize| (lo + k as f64) as f32;

        Ok(match mode {
            Mode::Shape => Walked::Shape(Shape::new(length, 1)),
            Mode::Values(Selection::All) => Walked::Values(VectorArray::from_values((0..length).map(at).collect())),
            Mode::Values(Selection::Indices(indices)) => {
                let values = indices
                    .iter()
                    .map(|&i| if in_range(i, length) { at(i as usize) } else { f32::NAN })
                    .collect();
                Walked::Values(VectorArray::from_values(values))
            }
        })
    }

    // ─── Comprehensions ──────────────────────────────────────────────────────

    fn eval_for<'s>(&mut self, c: &Comprehension<'s>, scope: &'s Scope<'s>, mode: Mode<'_>) -> Result<Walked, RuntimeError> {
        if let Some(filter) = c.filter {
            let full = self.filtered_for(c, filter, scope)?;
            return Ok(leaf(mode, full));
        }
        if c.allows_runs() {
            return self.nested_for(c, scope, mode);
        }
        self.plain_for(c, scope, mode)
    }

    /// Evaluates the body once per source element in `source`, appending.
    fn collect_elements<'s>(
        &mut self,
        c: &Comprehension<'s>,
        source: &VectorArray,
        scope: &'s Scope<'s>,
        out: &mut ArrayBuilder,
    ) -> Result<(), RuntimeError> {
        for i in 0..source.length() {
            let element = Scope::bind(scope, c.binder, Binding::Value(source.gather(&[i as i64])));
            let value = self.values_of(c.body, &element, Selection::All)?;
            self.append(c, &value, out)?;
        }
        Ok(())
    }

    fn append(&self, c: &Comprehension<'_>, value: &VectorArray, out: &mut ArrayBuilder) -> Result<(), RuntimeError> {
        if value.length() != 1 && !c.allows_runs() {
            return Err(self.fail(RuntimeErrorKind::ArrayInsideArray, c.body.span()));
        }
        if value.length() == 0 {
            return Ok(());
        }
        out.push(value).map_err(|_| self.fail(RuntimeErrorKind::NonUniformArray, c.span))?;
        if out.len() > self.limits.max_array_length {
            return Err(self.fail(RuntimeErrorKind::ArrayTooLarge, c.span));
        }
        Ok(())
    }

    fn filtered_for<'s>(&mut self, c: &Comprehension<'s>, filter: &'s Expr, scope: &'s Scope<'s>) -> Result<VectorArray, RuntimeError> {
        let source = self.values_of(c.source, scope, Selection::All)?;
        let mut out = ArrayBuilder::new();

        for i in 0..source.length() {
            let element = Scope::bind(scope, c.binder, Binding::Value(source.gather(&[i as i64])));
            let keep = self.values_of(filter, &element, Selection::All)?;
            if !keep.get(0, 0).is_some_and(|k| k != 0.0 && !k.is_nan()) {
                continue;
            }
            let value = self.values_of(c.body, &element, Selection::All)?;
            self.append(c, &value, &mut out)?;
        }
        Ok(out.finish())
    }

    /// Shape of a comprehension whose body yields one element per source
    /// element.
    ///
    /// When the body's shape cannot depend on the bound element, source
    /// element 0 stands for all of them. Otherwise every element is bound and
    /// checked in the order a full evaluation would visit it, so shape and
    /// indexed walks fail exactly where the full walk does.
    fn plain_for_shape<'s>(&mut self, c: &Comprehension<'s>, scope: &'s Scope<'s>) -> Result<Shape, RuntimeError> {
        let source = self.shape_of(c.source, scope)?;
        if source.length == 0 {
            return Ok(Shape::new(0, 1));
        }

        if !self.shape_may_vary(c.body) {
            let first = self.values_of(c.source, scope, Selection::Indices(&[0]))?;
            let element = Scope::bind(scope, c.binder, Binding::Value(first));
            let body = self.shape_of(c.body, &element)?;
            if body.length != 1 {
                return Err(self.fail(RuntimeErrorKind::ArrayInsideArray, c.body.span()));
            }
            return Ok(Shape::new(source.length, body.dimension));
        }

        let values = self.values_of(c.source, scope, Selection::All)?;
        let mut dimension = None;
        for i in 0..values.length() {
            let element = Scope::bind(scope, c.binder, Binding::Value(values.gather(&[i as i64])));
            let body = self.shape_of(c.body, &element)?;
            if body.length != 1 {
                return Err(self.fail(RuntimeErrorKind::ArrayInsideArray, c.body.span()));
            }
            match dimension {
                None => dimension = Some(body.dimension),
                Some(d) if d != body.dimension => {
                    return Err(self.fail(RuntimeErrorKind::NonUniformArray, c.span));
                }
                Some(_) => {}
            }
        }
        Ok(Shape::new(source.length, dimension.unwrap_or(1)))
    }

    /// Whether the shape of `expr` can change with the values it reads.
    /// Conditionals pick a branch by value, ranges take their length from
    /// values, and user functions may contain either. Builtin shapes follow
    /// from argument shapes alone.
    fn shape_may_vary(&self, expr: &Expr) -> bool {
        match expr {
            Expr::Constant(..) | Expr::Identifier(..) => false,
            Expr::Conditional { .. } | Expr::Range { .. } | Expr::For { .. } => true,
            Expr::Vector(items, _) | Expr::Array(items, _) => items.iter().any(|e| self.shape_may_vary(e)),
            Expr::Unary { operand, .. } => self.shape_may_vary(operand),
            Expr::Binary { left, right, .. } => self.shape_may_vary(left) || self.shape_may_vary(right),
            Expr::Index { target, index, .. } => self.shape_may_vary(target) || self.shape_may_vary(index),
            Expr::Swizzle { target, .. } => self.shape_may_vary(target),
            Expr::Call { name, args, .. } => {
                self.definitions.contains_key(name) || args.iter().any(|e| self.shape_may_vary(e))
            }
        }
    }

    fn plain_for<'s>(&mut self, c: &Comprehension<'s>, scope: &'s Scope<'s>, mode: Mode<'_>) -> Result<Walked, RuntimeError> {
        match mode {
            Mode::Shape => Ok(Walked::Shape(self.plain_for_shape(c, scope)?)),

            Mode::Values(Selection::All) => {
                let source = self.values_of(c.source, scope, Selection::All)?;
                let mut out = ArrayBuilder::new();
                self.collect_elements(c, &source, scope, &mut out)?;
                Ok(Walked::Values(out.finish()))
            }

            Mode::Values(Selection::Indices(indices)) => {
                let shape = self.plain_for_shape(c, scope)?;
                let valid: Vec<i64> = indices.iter().copied().filter(|&i| in_range(i, shape.length)).collect();
                let source = self.values_of(c.source, scope, Selection::Indices(&valid))?;

                let mut out = ArrayBuilder::with_dimension(shape.dimension);
                self.collect_elements(c, &source, scope, &mut out)?;
                Ok(Walked::Values(scatter(out.finish(), indices, shape)))
            }
        }
    }

    /// Comprehension whose body is itself a comprehension or a range, so
    /// each source element contributes a run of elements.
    fn nested_for<'s>(&mut self, c: &Comprehension<'s>, scope: &'s Scope<'s>, mode: Mode<'_>) -> Result<Walked, RuntimeError> {
        let source = self.values_of(c.source, scope, Selection::All)?;

        let mut lengths = Vec::with_capacity(source.length());
        let mut dimension = None;
        let mut total = 0usize;
        for i in 0..source.length() {
            let element = Scope::bind(scope, c.binder, Binding::Value(source.gather(&[i as i64])));
            let shape = self.shape_of(c.body, &element)?;
            if shape.length > 0 {
                match dimension {
                    None => dimension = Some(shape.dimension),
                    Some(d) if d != shape.dimension => {
                        return Err(self.fail(RuntimeErrorKind::NonUniformArray, c.span));
                    }
                    Some(_) => {}
                }
            }
            total = total.saturating_add(shape.length);
            lengths.push(shape.length);
        }
        if total > self.limits.max_array_length {
            return Err(self.fail(RuntimeErrorKind::ArrayTooLarge, c.span));
        }
        let dimension = dimension.unwrap_or(1);

        match mode {
            Mode::Shape => Ok(Walked::Shape(Shape::new(total, dimension))),
            Mode::Values(Selection::All) => {
                let mut out = ArrayBuilder::with_dimension(dimension);
                self.collect_elements(c, &source, scope, &mut out)?;
                Ok(Walked::Values(out.finish()))
            }
            Mode::Values(Selection::Indices(indices)) => self
                .gather_segments(&lengths, dimension, indices, |this, k, local| {
                    let element = Scope::bind(scope, c.binder, Binding::Value(source.gather(&[k as i64])));
                    this.values_of(c.body, &element, Selection::Indices(local))
                })
                .map(Walked::Values),
        }
    }

    // ─── Indexing ────────────────────────────────────────────────────────────

    fn eval_index<'s>(
        &mut self,
        target: &'s Expr,
        index: &'s Expr,
        span: Span,
        scope: &'s Scope<'s>,
        mode: Mode<'_>,
    ) -> Result<Walked, RuntimeError> {
        match mode {
            Mode::Shape => {
                let positions = self.shape_of(index, scope)?;
                if positions.dimension != 1 {
                    return Err(self.fail(RuntimeErrorKind::IndexingWithVector, index.span()));
                }
                let target = self.shape_of(target, scope)?;
                Ok(Walked::Shape(Shape::new(positions.length, target.dimension)))
            }
            Mode::Values(selection) => {
                let positions = self.values_of(index, scope, selection)?;
                if positions.dimension() != 1 {
                    return Err(self.fail(RuntimeErrorKind::IndexingWithVector, index.span()));
                }
                let indices: Vec<i64> = positions.channel(0).iter().map(|&v| to_index(v)).collect();
                let value = self.values_of(target, scope, Selection::Indices(&indices))?;
                debug_assert_eq!(value.length(), indices.len(), "indexed read at {span:?}");
                Ok(Walked::Values(value))
            }
        }
    }

    /// Channel selection. The first use of a channel shares the input buffer;
    /// repeats get their own copy.
    fn eval_swizzle<'s>(
        &mut self,
        target: &'s Expr,
        components: &str,
        span: Span,
        scope: &'s Scope<'s>,
        mode: Mode<'_>,
    ) -> Result<Walked, RuntimeError> {
        match mode {
            Mode::Shape => {
                let shape = self.shape_of(target, scope)?;
                let picks = swizzle_channels(components, shape.dimension).map_err(|kind| self.fail(kind, span))?;
                Ok(Walked::Shape(Shape::new(shape.length, picks.len())))
            }
            Mode::Values(selection) => {
                let value = self.values_of(target, scope, selection)?;
                let picks = swizzle_channels(components, value.dimension()).map_err(|kind| self.fail(kind, span))?;

                let mut used = [false; 4];
                let channels = picks
                    .into_iter()
                    .map(|c| {
                        let channel = &value.channels()[c];
                        if std::mem::replace(&mut used[c], true) { channel.detached() } else { channel.clone() }
                    })
                    .collect();
                Ok(Walked::Values(VectorArray::from_parts(value.length(), channels)))
            }
        }
    }

    // ─── Calls ───────────────────────────────────────────────────────────────

    fn eval_call<'s>(
        &mut self,
        name: &str,
        args: &'s [Expr],
        span: Span,
        scope: &'s Scope<'s>,
        mode: Mode<'_>,
    ) -> Result<Walked, RuntimeError> {
        if scope.contains(name) {
            return Err(self.fail(RuntimeErrorKind::IdentifierNotFunction(name.to_string()), span));
        }

        let definitions = self.definitions;
        if let Some((key, statement)) = definitions.get_key_value(name) {
            return match &statement.kind {
                StatementKind::Function { params, body, .. } => {
                    self.call_function(key, params, body, args, span, scope, mode)
                }
                _ => Err(self.fail(RuntimeErrorKind::IdentifierNotFunction(name.to_string()), span)),
            };
        }

        let registry = self.registry;
        match registry.lookup(name, args.len()) {
            Ok(Some(builtin)) => self.call_builtin(*builtin, args, span, scope, mode),
            Err(kind) => Err(self.fail(kind, span)),
            Ok(None) if registry.is_constant(name) => {
                Err(self.fail(RuntimeErrorKind::IdentifierNotFunction(name.to_string()), span))
            }
            Ok(None) => Err(self.fail(RuntimeErrorKind::UndefinedIdentifier(name.to_string()), span)),
        }
    }

    /// Binds arguments to parameters and walks the body in a fresh frame.
    /// Full evaluations bind argument values; shape and indexed walks bind
    /// the argument expressions so the body decides what gets computed.
    #[allow(clippy::too_many_arguments)]
    fn call_function<'s>(
        &mut self,
        name: &'e str,
        params: &'e [String],
        body: &'e Expr,
        args: &'s [Expr],
        span: Span,
        scope: &'s Scope<'s>,
        mode: Mode<'_>,
    ) -> Result<Walked, RuntimeError> {
        if params.len() != args.len() {
            return Err(self.fail(
                RuntimeErrorKind::IncorrectParameterCount {
                    name: name.to_string(),
                    expected: params.len(),
                    found: args.len(),
                },
                span,
            ));
        }
        if self.depth >= self.limits.max_call_depth {
            return Err(self.fail(RuntimeErrorKind::RecursionLimit(self.limits.max_call_depth), span));
        }

        let mut frame = Vec::with_capacity(params.len());
        for (param, arg) in params.iter().zip(args) {
            let binding = match mode {
                Mode::Values(Selection::All) => Binding::Value(self.values_of(arg, scope, Selection::All)?),
                _ => Binding::Deferred { expr: arg, scope, owner: self.owner },
            };
            frame.push(Parameter { name: param.as_str(), binding });
        }
        let frame = Scope::frame(frame);

        self.depth += 1;
        let saved = self.owner.replace(name);
        let result = self.walk(body, &frame, mode);
        self.owner = saved;
        self.depth -= 1;
        result
    }

    fn call_builtin<'s>(
        &mut self,
        builtin: Builtin,
        args: &'s [Expr],
        span: Span,
        scope: &'s Scope<'s>,
        mode: Mode<'_>,
    ) -> Result<Walked, RuntimeError> {
        if matches!(mode, Mode::Values(_)) {
            self.stats.builtin_calls += 1;
        }
        let name = builtin.name;
        let operands: Vec<&Expr> = args.iter().collect();

        match builtin.kernel {
            Kernel::Map(f) => self.elementwise(
                &operands,
                scope,
                mode,
                span,
                |shapes| Ok(shapes[0]),
                move |v| zip_map(&[&v[0]], |x| f(x[0])).map_err(differing),
            ),

            Kernel::Zip(f) => self.elementwise(
                &operands,
                scope,
                mode,
                span,
                move |shapes| broadcast_shape(shapes).map_err(|_| invalid(name, "arguments differ in dimension")),
                move |v| {
                    zip_map(&[&v[0], &v[1]], |x| f(x[0], x[1]))
                        .map_err(|_| invalid(name, "arguments differ in dimension"))
                },
            ),

            Kernel::Reduce(f) => match mode {
                Mode::Shape => {
                    let shape = self.shape_of(&args[0], scope)?;
                    Ok(Walked::Shape(Shape::new(1, shape.dimension)))
                }
                Mode::Values(selection) => {
                    let value = self.values_of(&args[0], scope, Selection::All)?;
                    let components: Vec<f32> = value.channels().iter().map(|c| f(c)).collect();
                    Ok(Walked::Values(VectorArray::vector(&components).select(selection)))
                }
            },

            Kernel::Array(kernel, rule) => match mode {
                Mode::Shape => {
                    let mut shapes = Vec::with_capacity(args.len());
                    for arg in args {
                        shapes.push(self.shape_of(arg, scope)?);
                    }
                    rule(&shapes).map(Walked::Shape).map_err(|kind| self.fail(kind, span))
                }
                Mode::Values(selection) => {
                    let mut values = Vec::with_capacity(args.len());
                    for arg in args {
                        values.push(self.values_of(arg, scope, Selection::All)?);
                    }
                    let result = kernel(&values).map_err(|kind| self.fail(kind, span))?;
                    Ok(Walked::Values(result.select(selection)))
                }
            },

            Kernel::Reserved => Err(self.fail(RuntimeErrorKind::NotImplemented(name.to_string()), span)),
        }
    }
}

/// Borrowed parts of a `for` node.
struct Comprehension<'s> {
    body: &'s Expr,
    binder: &'s str,
    source: &'s Expr,
    filter: Option<&'s Expr>,
    span: Span,
}

impl Comprehension<'_> {
    /// A body that is itself a comprehension or range may yield several
    /// elements per source element.
    fn allows_runs(&self) -> bool {
        matches!(self.body, Expr::For { .. } | Expr::Range { .. })
    }
}
