/// Fixed-capacity ring of the most recent values with a running sum.
///
/// Adding a value is O(1): once the ring is full the evicted value is
/// subtracted from the sum before the new one is added. The ring does no
/// locking of its own; the owning session serializes access.
#[derive(Debug, Clone)]
pub struct RunningAverage {
    data: Vec<f64>,
    count: usize,
    head: usize,
    sum: f64,
    filled_once: bool,
}

impl RunningAverage {
    /// Creates an empty ring. A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0.0; capacity.max(1)],
            count: 0,
            head: 0,
            sum: 0.0,
            filled_once: false,
        }
    }

    pub fn add(&mut self, value: f64) {
        if self.count == self.data.len() {
            self.sum -= self.data[self.head];
        } else {
            self.count += 1;
        }

        self.data[self.head] = value;
        self.sum += value;
        self.head = (self.head + 1) % self.data.len();

        if self.count == self.data.len() {
            self.filled_once = true;
        }
    }

    /// Mean of the values currently held; zero when empty.
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    /// True forever once the ring has held `capacity` values.
    pub fn filled_once(&self) -> bool {
        self.filled_once
    }

    pub fn is_full(&self) -> bool {
        self.count == self.data.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn empty_ring_averages_to_zero() {
        let ring = RunningAverage::new(4);
        assert_eq!(ring.average(), 0.0);
        assert!(ring.is_empty());
        assert!(!ring.filled_once());
    }

    #[test]
    fn partial_ring_is_mean_of_everything_added() {
        let mut ring = RunningAverage::new(4);
        ring.add(1.0);
        ring.add(2.0);
        ring.add(6.0);
        assert!(close(ring.average(), 3.0));
        assert_eq!(ring.len(), 3);
        assert!(!ring.filled_once());
    }

    #[test]
    fn full_ring_only_keeps_last_values() {
        let mut ring = RunningAverage::new(3);
        let values = [5.0, -1.0, 2.5, 10.0, 7.0, -3.0, 0.5];
        for (i, v) in values.iter().enumerate() {
            ring.add(*v);
            let start = (i + 1).saturating_sub(3);
            let window = &values[start..=i];
            let expected = window.iter().sum::<f64>() / window.len() as f64;
            assert!(close(ring.average(), expected), "after {} values", i + 1);
            assert_eq!(ring.filled_once(), i + 1 >= 3);
        }
        assert!(ring.is_full());
    }

    #[test]
    fn filled_once_never_resets() {
        let mut ring = RunningAverage::new(2);
        ring.add(1.0);
        ring.add(1.0);
        assert!(ring.filled_once());
        for _ in 0..10 {
            ring.add(0.0);
            assert!(ring.filled_once());
        }
        assert_eq!(ring.average(), 0.0);
    }

    #[test]
    fn zero_capacity_behaves_as_single_slot() {
        let mut ring = RunningAverage::new(0);
        assert_eq!(ring.capacity(), 1);
        ring.add(3.0);
        ring.add(4.0);
        assert_eq!(ring.average(), 4.0);
    }
}
