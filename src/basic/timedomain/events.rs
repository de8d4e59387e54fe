use ordered_float::OrderedFloat;

/// Sorted, deduplicated switching times inside `(t0, tf]`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EventQueue {
    times: Vec<OrderedFloat<f64>>,
}

impl EventQueue {
    pub fn new(times: impl IntoIterator<Item = f64>, t0: f64, tf: f64) -> Self {
        let mut times: Vec<OrderedFloat<f64>> = times
            .into_iter()
            .filter(|t| t.is_finite() && *t > t0 && *t <= tf)
            .map(OrderedFloat)
            .collect();
        times.sort();
        times.dedup();
        Self { times }
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn times(&self) -> impl Iterator<Item = f64> + '_ {
        self.times.iter().map(|t| t.0)
    }

    /// First event strictly after `t`.
    pub fn next_after(&self, t: f64) -> Option<f64> {
        let i = self.times.partition_point(|te| te.0 <= t);
        self.times.get(i).map(|te| te.0)
    }

    /// Shortens `h` so that a step from `t` ends on the first event in
    /// `(t, t + h]`, and returns that event.
    pub fn align(&self, t: f64, h: f64) -> (f64, Option<f64>) {
        match self.next_after(t) {
            Some(te) if te <= t + h => (te - t, Some(te)),
            _ => (h, None),
        }
    }
}
