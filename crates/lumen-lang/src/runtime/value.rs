use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

/// Channels per element: scalar, vec2, vec3, vec4.
pub const MAX_DIMENSION: usize = 4;

// ─── Channel ─────────────────────────────────────────────────────────────────

/// One component buffer of a `VectorArray`.
///
/// Buffers are reference counted so a swizzle can hand out a view of an
/// input channel without copying. Writes go through `to_mut`, which copies
/// the buffer first if anyone else holds it.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel(Rc<Vec<f32>>);

impl Channel {
    pub fn new(values: Vec<f32>) -> Self {
        Self(Rc::new(values))
    }

    pub fn to_mut(&mut self) -> &mut Vec<f32> {
        Rc::make_mut(&mut self.0)
    }

    /// An owned copy that shares nothing with `self`.
    pub fn detached(&self) -> Self {
        Self(Rc::new(self.0.as_ref().clone()))
    }

    pub fn shares_buffer(&self, other: &Channel) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for Channel {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.0
    }
}

// ─── Shape ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    pub length: usize,
    pub dimension: usize,
}

impl Shape {
    pub const SCALAR: Shape = Shape { length: 1, dimension: 1 };

    pub fn new(length: usize, dimension: usize) -> Self {
        Self { length, dimension }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} × {}", self.length, self.dimension)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DimensionMismatch {
    pub expected: usize,
    pub found: usize,
}

/// Result shape of an element-wise operation over `shapes`.
///
/// Dimension-1 operands broadcast across channels; any other dimensions
/// must agree. Length-1 operands broadcast across elements; the remaining
/// lengths are zipped, truncating to the shortest.
pub fn broadcast_shape(shapes: &[Shape]) -> Result<Shape, DimensionMismatch> {
    let mut dimension = 1;
    for shape in shapes.iter().filter(|s| s.dimension != 1) {
        if dimension == 1 {
            dimension = shape.dimension;
        } else if dimension != shape.dimension {
            return Err(DimensionMismatch { expected: dimension, found: shape.dimension });
        }
    }

    let length = shapes
        .iter()
        .map(|s| s.length)
        .filter(|&l| l != 1)
        .min()
        .unwrap_or(1);

    Ok(Shape { length, dimension })
}

// ─── Selection ───────────────────────────────────────────────────────────────

/// Which output elements an evaluation should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection<'i> {
    All,
    /// Requested positions, in request order. Out-of-range positions
    /// produce `NaN` elements.
    Indices(&'i [i64]),
}

impl<'i> Selection<'i> {
    pub fn from_option(indices: Option<&'i [i64]>) -> Self {
        indices.map_or(Selection::All, Selection::Indices)
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Selection::All)
    }
}

// ─── VectorArray ─────────────────────────────────────────────────────────────

/// `dimension` parallel channels of `length` floats each.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorArray {
    length: usize,
    channels: Vec<Channel>,
}

impl VectorArray {
    pub fn scalar(value: f32) -> Self {
        Self { length: 1, channels: vec![Channel::new(vec![value])] }
    }

    /// A single element with one channel per component.
    pub fn vector(components: &[f32]) -> Self {
        let channels = components.iter().map(|&c| Channel::new(vec![c])).collect();
        Self { length: 1, channels }
    }

    pub fn from_values(values: Vec<f32>) -> Self {
        Self { length: values.len(), channels: vec![Channel::new(values)] }
    }

    pub fn splat(value: f32, shape: Shape) -> Self {
        let channels = (0..shape.dimension)
            .map(|_| Channel::new(vec![value; shape.length]))
            .collect();
        Self { length: shape.length, channels }
    }

    pub fn nan(shape: Shape) -> Self {
        Self::splat(f32::NAN, shape)
    }

    /// Builds an array from per-channel buffers. `None` unless there are
    /// 1 to 4 channels of equal length.
    pub fn from_channels(channels: Vec<Vec<f32>>) -> Option<Self> {
        if channels.is_empty() || channels.len() > MAX_DIMENSION {
            return None;
        }
        let length = channels[0].len();
        if channels.iter().any(|c| c.len() != length) {
            return None;
        }
        Some(Self { length, channels: channels.into_iter().map(Channel::new).collect() })
    }

    pub(crate) fn from_parts(length: usize, channels: Vec<Channel>) -> Self {
        debug_assert!(!channels.is_empty() && channels.len() <= MAX_DIMENSION);
        debug_assert!(channels.iter().all(|c| c.len() == length));
        Self { length, channels }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn dimension(&self) -> usize {
        self.channels.len()
    }

    pub fn shape(&self) -> Shape {
        Shape { length: self.length, dimension: self.dimension() }
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index]
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut Vec<f32> {
        self.channels[index].to_mut()
    }

    pub fn into_channels(self) -> Vec<Channel> {
        self.channels
    }

    pub fn get(&self, element: usize, channel: usize) -> Option<f32> {
        self.channels.get(channel)?.get(element).copied()
    }

    /// All components of one element.
    pub fn element(&self, index: usize) -> Option<Vec<f32>> {
        (index < self.length).then(|| self.channels.iter().map(|c| c[index]).collect())
    }

    /// Value used at `element`/`channel` when this array is broadcast
    /// against a larger one.
    pub fn broadcast_at(&self, element: usize, channel: usize) -> f32 {
        let channel = if self.channels.len() == 1 { 0 } else { channel };
        let element = if self.length == 1 { 0 } else { element };
        self.channels[channel][element]
    }

    /// Picks the listed elements. Out-of-range indices give `NaN`.
    pub fn gather(&self, indices: &[i64]) -> Self {
        let channels = self
            .channels
            .iter()
            .map(|channel| {
                let values = indices
                    .iter()
                    .map(|&i| usize::try_from(i).ok().and_then(|i| channel.get(i)).copied().unwrap_or(f32::NAN))
                    .collect();
                Channel::new(values)
            })
            .collect();
        Self { length: indices.len(), channels }
    }

    pub fn select(self, selection: Selection<'_>) -> Self {
        match selection {
            Selection::All => self,
            Selection::Indices(indices) => self.gather(indices),
        }
    }

    pub fn is_scalar(&self) -> bool {
        self.shape() == Shape::SCALAR
    }
}

impl fmt::Display for VectorArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_element = |f: &mut fmt::Formatter<'_>, i: usize| -> fmt::Result {
            if self.dimension() == 1 {
                return write!(f, "{}", self.channels[0][i]);
            }
            write!(f, "(")?;
            for (c, channel) in self.channels.iter().enumerate() {
                if c > 0 { write!(f, ", ")?; }
                write!(f, "{}", channel[i])?;
            }
            write!(f, ")")
        };

        if self.length == 1 {
            return write_element(f, 0);
        }
        write!(f, "[")?;
        for i in 0..self.length {
            if i > 0 { write!(f, ", ")?; }
            write_element(f, i)?;
        }
        write!(f, "]")
    }
}

// ─── Construction helpers ────────────────────────────────────────────────────

/// Concatenates arrays of one dimension.
#[derive(Debug, Default)]
pub struct ArrayBuilder {
    channels: Vec<Vec<f32>>,
    length: usize,
}

impl ArrayBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dimension(dimension: usize) -> Self {
        Self { channels: vec![Vec::new(); dimension], length: 0 }
    }

    pub fn dimension(&self) -> Option<usize> {
        (!self.channels.is_empty()).then_some(self.channels.len())
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn push(&mut self, value: &VectorArray) -> Result<(), DimensionMismatch> {
        if self.channels.is_empty() {
            self.channels = vec![Vec::new(); value.dimension()];
        }
        if self.channels.len() != value.dimension() {
            return Err(DimensionMismatch { expected: self.channels.len(), found: value.dimension() });
        }
        for (out, channel) in self.channels.iter_mut().zip(value.channels()) {
            out.extend_from_slice(channel);
        }
        self.length += value.length();
        Ok(())
    }

    /// Appends one element given component-wise.
    pub fn push_element(&mut self, components: &[f32]) -> Result<(), DimensionMismatch> {
        if self.channels.is_empty() {
            self.channels = vec![Vec::new(); components.len()];
        }
        if self.channels.len() != components.len() {
            return Err(DimensionMismatch { expected: self.channels.len(), found: components.len() });
        }
        for (out, &c) in self.channels.iter_mut().zip(components) {
            out.push(c);
        }
        self.length += 1;
        Ok(())
    }

    pub fn finish(self) -> VectorArray {
        if self.channels.is_empty() {
            return VectorArray::from_values(Vec::new());
        }
        let channels = self.channels.into_iter().map(Channel::new).collect();
        VectorArray::from_parts(self.length, channels)
    }
}

/// Applies `f` element-wise over broadcast operands. `f` receives one value
/// per operand, in operand order.
pub fn zip_map(
    operands: &[&VectorArray],
    f: impl Fn(&[f32]) -> f32,
) -> Result<VectorArray, DimensionMismatch> {
    let shapes: Vec<Shape> = operands.iter().map(|a| a.shape()).collect();
    let shape = broadcast_shape(&shapes)?;

    let mut args = vec![0.0; operands.len()];
    let channels = (0..shape.dimension)
        .map(|c| {
            let values = (0..shape.length)
                .map(|i| {
                    for (slot, operand) in args.iter_mut().zip(operands) {
                        *slot = operand.broadcast_at(i, c);
                    }
                    f(&args)
                })
                .collect();
            Channel::new(values)
        })
        .collect();

    Ok(VectorArray::from_parts(shape.length, channels))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn array(channels: Vec<Vec<f32>>) -> VectorArray {
        VectorArray::from_channels(channels).expect("valid channels")
    }

    #[test]
    fn broadcast_dimension() {
        let s = |l, d| Shape::new(l, d);
        assert_eq!(broadcast_shape(&[s(1, 1), s(1, 3)]), Ok(s(1, 3)));
        assert_eq!(broadcast_shape(&[s(1, 2), s(1, 2)]), Ok(s(1, 2)));
        assert_eq!(
            broadcast_shape(&[s(1, 2), s(1, 3)]),
            Err(DimensionMismatch { expected: 2, found: 3 })
        );
    }

    #[test]
    fn broadcast_length() {
        let s = |l| Shape::new(l, 1);
        assert_eq!(broadcast_shape(&[s(1), s(5)]).map(|r| r.length), Ok(5));
        assert_eq!(broadcast_shape(&[s(7), s(1)]).map(|r| r.length), Ok(7));
        assert_eq!(broadcast_shape(&[s(7), s(3)]).map(|r| r.length), Ok(3));
        assert_eq!(broadcast_shape(&[s(1), s(1)]).map(|r| r.length), Ok(1));
        assert_eq!(broadcast_shape(&[s(0), s(1)]).map(|r| r.length), Ok(0));
    }

    #[test]
    fn from_channels_validates() {
        assert!(VectorArray::from_channels(vec![]).is_none());
        assert!(VectorArray::from_channels(vec![vec![1.0], vec![1.0, 2.0]]).is_none());
        assert!(VectorArray::from_channels(vec![vec![0.0]; 5]).is_none());
        assert_eq!(array(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).shape(), Shape::new(2, 2));
    }

    #[test]
    fn gather_out_of_range_is_nan() {
        let a = VectorArray::from_values(vec![10.0, 20.0, 30.0]);
        let g = a.gather(&[2, 5, -1, 0]);
        assert_eq!(g.length(), 4);
        assert_eq!(g.channel(0)[0], 30.0);
        assert!(g.channel(0)[1].is_nan());
        assert!(g.channel(0)[2].is_nan());
        assert_eq!(g.channel(0)[3], 10.0);
    }

    #[test]
    fn shared_channel_copies_on_write() {
        let a = array(vec![vec![1.0, 2.0]]);
        let mut view = VectorArray::from_parts(2, vec![a.channels()[0].clone()]);
        assert!(view.channels()[0].shares_buffer(&a.channels()[0]));

        view.channel_mut(0)[0] = 99.0;
        assert_eq!(a.channel(0)[0], 1.0);
        assert_eq!(view.channel(0)[0], 99.0);
    }

    #[test]
    fn zip_map_broadcasts_scalar() {
        let a = VectorArray::from_values(vec![1.0, 2.0, 3.0]);
        let b = VectorArray::scalar(10.0);
        let r = zip_map(&[&a, &b], |v| v[0] + v[1]).unwrap();
        assert_eq!(r.channel(0), &[11.0, 12.0, 13.0]);
    }

    #[test]
    fn zip_map_broadcasts_channels() {
        let v = array(vec![vec![1.0], vec![2.0]]);
        let k = VectorArray::from_values(vec![2.0, 3.0]);
        let r = zip_map(&[&v, &k], |x| x[0] * x[1]).unwrap();
        assert_eq!(r.shape(), Shape::new(2, 2));
        assert_eq!(r.channel(0), &[2.0, 3.0]);
        assert_eq!(r.channel(1), &[4.0, 6.0]);
    }

    #[test]
    fn zip_map_truncates_to_shortest() {
        let a = VectorArray::from_values(vec![1.0, 2.0, 3.0, 4.0]);
        let b = VectorArray::from_values(vec![1.0, 1.0]);
        let r = zip_map(&[&a, &b], |v| v[0] - v[1]).unwrap();
        assert_eq!(r.channel(0), &[0.0, 1.0]);
    }

    #[test]
    fn builder_rejects_mixed_dimensions() {
        let mut builder = ArrayBuilder::new();
        builder.push(&VectorArray::vector(&[1.0, 2.0])).unwrap();
        assert!(builder.push(&VectorArray::scalar(3.0)).is_err());
        builder.push_element(&[3.0, 4.0]).unwrap();
        let a = builder.finish();
        assert_eq!(a.shape(), Shape::new(2, 2));
        assert_eq!(a.element(1), Some(vec![3.0, 4.0]));
    }

    #[test]
    fn display() {
        assert_eq!(VectorArray::scalar(1.5).to_string(), "1.5");
        assert_eq!(VectorArray::vector(&[1.0, 2.0]).to_string(), "(1, 2)");
        assert_eq!(VectorArray::from_values(vec![1.0, 2.0]).to_string(), "[1, 2]");
    }
}
