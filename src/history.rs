//! Fixed-capacity FIFO buffer backing the plot series.
//!
//! Plot data grows for the lifetime of an acquisition run, so every series is
//! capped: once the buffer is full each push evicts the oldest sample. The
//! buffer is a preallocated arena with a head index, so pushes stay O(1) and
//! the acquisition loop never reallocates on the hot path after warm-up.

/// Default number of samples kept per plot series.
pub const DEFAULT_GRAPH_CAPACITY: usize = 1000;

/// Ring buffer of `f64` samples with strict FIFO eviction.
#[derive(Debug, Clone)]
pub struct History {
    buf: Vec<f64>,
    head: usize,
    capacity: usize,
}

impl History {
    /// Create an empty buffer holding at most `capacity` samples.
    /// A zero capacity is bumped to 1 so `push` always retains something.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: Vec::with_capacity(capacity),
            head: 0,
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append a sample, evicting the oldest one when full.
    pub fn push(&mut self, value: f64) {
        if self.buf.len() < self.capacity {
            self.buf.push(value);
        } else {
            self.buf[self.head] = value;
            self.head = (self.head + 1) % self.capacity;
        }
    }

    /// Drop all samples but keep the allocation.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.head = 0;
    }

    /// Copy out the samples in append order, oldest first.
    pub fn snapshot(&self) -> Vec<f64> {
        let mut out = Vec::with_capacity(self.buf.len());
        out.extend_from_slice(&self.buf[self.head..]);
        out.extend_from_slice(&self.buf[..self.head]);
        out
    }

    /// Oldest retained sample, if any.
    pub fn front(&self) -> Option<f64> {
        self.buf.get(self.head).copied().or_else(|| self.buf.first().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len_never_exceeds_capacity() {
        let mut h = History::new(10);
        for n in 0..25 {
            h.push(n as f64);
            assert_eq!(h.len(), (n + 1).min(10));
        }
    }

    #[test]
    fn fifo_eviction_keeps_last_n_in_order() {
        let mut h = History::new(4);
        for n in 0..9 {
            h.push(n as f64);
        }
        assert_eq!(h.snapshot(), vec![5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn partial_fill_preserves_order() {
        let mut h = History::new(100);
        h.push(1.0);
        h.push(2.0);
        h.push(3.0);
        assert_eq!(h.snapshot(), vec![1.0, 2.0, 3.0]);
        assert_eq!(h.front(), Some(1.0));
    }

    #[test]
    fn overflow_by_one_evicts_oldest() {
        let mut h = History::new(1000);
        for n in 0..1001 {
            h.push(n as f64);
        }
        assert_eq!(h.len(), 1000);
        assert_eq!(h.front(), Some(1.0));
        assert_eq!(h.snapshot().last().copied(), Some(1000.0));
    }

    #[test]
    fn clear_empties_but_keeps_capacity() {
        let mut h = History::new(8);
        for n in 0..20 {
            h.push(n as f64);
        }
        h.clear();
        assert!(h.is_empty());
        assert_eq!(h.capacity(), 8);
        h.push(42.0);
        assert_eq!(h.snapshot(), vec![42.0]);
    }
}
