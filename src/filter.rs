//! Per-slot filter pipeline.
//!
//! Filters run synchronously on each decoded value before it reaches the
//! application. Each stage may mutate the value in place or drop the
//! occurrence; a drop short-circuits the rest of the chain. Filter state
//! belongs to one slot and is never shared.

use crate::client::Value;

/// Outcome of one filter stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Deliver the (possibly mutated) value to the next stage.
    Pass,
    /// Discard this occurrence; later stages and the application callback
    /// never see it.
    Drop,
}

/// One transformation stage.
pub trait Filter: Send {
    fn apply(&mut self, value: &mut Value) -> Verdict;
}

/// Ordered filter chain, fixed at slot construction time.
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Filter>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage, builder style.
    pub fn with(mut self, filter: impl Filter + 'static) -> Self {
        self.push(filter);
        self
    }

    pub fn push(&mut self, filter: impl Filter + 'static) {
        self.stages.push(Box::new(filter));
    }

    /// Run the chain over one value.
    pub fn apply(&mut self, value: &mut Value) -> Verdict {
        for stage in &mut self.stages {
            if stage.apply(value) == Verdict::Drop {
                return Verdict::Drop;
            }
        }
        Verdict::Pass
    }
}

/// Negate boolean values. Non-boolean values pass through unchanged.
pub struct Invert;

impl Filter for Invert {
    fn apply(&mut self, value: &mut Value) -> Verdict {
        if let Value::Bool(v) = value {
            *v = !*v;
        }
        Verdict::Pass
    }
}

/// Add a constant to numeric values. Integer variants saturate at their
/// bounds; non-numeric values pass through unchanged.
pub struct Offset {
    pub delta: f64,
}

impl Filter for Offset {
    fn apply(&mut self, value: &mut Value) -> Verdict {
        match value {
            Value::Double(v) => *v += self.delta,
            Value::Int64(v) => *v = v.saturating_add(self.delta as i64),
            Value::UInt64(v) => {
                *v = if self.delta >= 0.0 {
                    v.saturating_add(self.delta as u64)
                } else {
                    v.saturating_sub((-self.delta) as u64)
                }
            }
            _ => {}
        }
        Verdict::Pass
    }
}

/// Scale numeric values. Integer variants go through f64 and saturate on
/// the cast back.
pub struct Multiply {
    pub factor: f64,
}

impl Filter for Multiply {
    fn apply(&mut self, value: &mut Value) -> Verdict {
        match value {
            Value::Double(v) => *v *= self.factor,
            Value::Int64(v) => *v = (*v as f64 * self.factor) as i64,
            Value::UInt64(v) => *v = (*v as f64 * self.factor) as u64,
            _ => {}
        }
        Verdict::Pass
    }
}

/// Drop occurrences equal to a fixed value.
pub struct FilterOut(pub Value);

impl Filter for FilterOut {
    fn apply(&mut self, value: &mut Value) -> Verdict {
        if *value == self.0 {
            Verdict::Drop
        } else {
            Verdict::Pass
        }
    }
}

/// Drop repeats, delivering only state changes. The first occurrence
/// always passes.
#[derive(Default)]
pub struct NewState {
    last: Option<Value>,
}

impl Filter for NewState {
    fn apply(&mut self, value: &mut Value) -> Verdict {
        if self.last.as_ref() == Some(value) {
            return Verdict::Drop;
        }
        self.last = Some(value.clone());
        Verdict::Pass
    }
}

/// Adapter turning a closure into a stage.
pub struct FilterFn<F>(F);

impl<F> Filter for FilterFn<F>
where
    F: FnMut(&mut Value) -> Verdict + Send,
{
    fn apply(&mut self, value: &mut Value) -> Verdict {
        (self.0)(value)
    }
}

/// Build a stage from a closure.
pub fn filter_fn<F>(f: F) -> FilterFn<F>
where
    F: FnMut(&mut Value) -> Verdict + Send,
{
    FilterFn(f)
}
