use serde::{Serialize, Serializer};
use std::collections::VecDeque;

/// Fixed-capacity FIFO of the most recent values of one series.
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T> {
    values: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> HistoryBuffer<T> {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { values: VecDeque::with_capacity(capacity), capacity }
    }

    /// Append `value`, evicting the oldest when full.
    pub fn append(&mut self, value: T) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Oldest first.
    pub fn contents(&self) -> Vec<T> {
        self.values.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T: Serialize> Serialize for HistoryBuffer<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.values.iter())
    }
}

/// The dashboard's named series. Each one only grows on ticks where its
/// source had data, so series may differ in length.
#[derive(Debug, Clone, Serialize)]
pub struct MetricHistory {
    pub cpu: HistoryBuffer<f64>,
    pub memory: HistoryBuffer<f64>,
    pub load: HistoryBuffer<f64>,
    pub net_rx: HistoryBuffer<f64>,
    pub net_tx: HistoryBuffer<f64>,
    pub latency: HistoryBuffer<f64>,
}

impl MetricHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            cpu: HistoryBuffer::new(capacity),
            memory: HistoryBuffer::new(capacity),
            load: HistoryBuffer::new(capacity),
            net_rx: HistoryBuffer::new(capacity),
            net_tx: HistoryBuffer::new(capacity),
            latency: HistoryBuffer::new(capacity),
        }
    }
}
