/// Resource caps applied during evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Longest array a range, literal or comprehension may produce.
    pub max_array_length: usize,
    /// Deepest chain of nested user function calls.
    pub max_call_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_array_length: 1 << 24, max_call_depth: 256 }
    }
}

/// Render-context values exposed to scripts as the constants `time`,
/// `position`, `scale` and `rotation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnimationState {
    pub time: f32,
    pub position: [f32; 3],
    pub scale: f32,
    /// Quaternion `(x, y, z, w)`.
    pub rotation: [f32; 4],
}

impl Default for AnimationState {
    fn default() -> Self {
        Self {
            time: 0.0,
            position: [0.0; 3],
            scale: 1.0,
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }
}
