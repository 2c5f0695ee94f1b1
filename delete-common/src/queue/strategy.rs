//! Queue selection strategies.
//!
//! A strategy is created for a single logical operation (one publish, one consume) and hands
//! out each candidate queue at most once. Strategies take `&mut self` and are not `Clone`,
//! so an instance can't be shared between concurrent operations.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::BackingQueue;

pub trait SelectionStrategy: Send {
    /// Remove the next candidate from the set and return it with its index in the pool.
    fn try_take_next(&mut self) -> Option<(usize, Arc<dyn BackingQueue>)>;
}

pub trait StrategyFactory: Send + Sync {
    fn create(&self, queues: &[Arc<dyn BackingQueue>]) -> Box<dyn SelectionStrategy>;
}

/// Hands out strategies whose start position advances by one per created instance, so load
/// is spread over the pool while each operation still walks every queue exactly once.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next_start: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StrategyFactory for RoundRobin {
    fn create(&self, queues: &[Arc<dyn BackingQueue>]) -> Box<dyn SelectionStrategy> {
        let start = self.next_start.fetch_add(1, Ordering::Relaxed);

        Box::new(RoundRobinStrategy::new(queues.to_vec(), start))
    }
}

pub struct RoundRobinStrategy {
    candidates: Vec<Arc<dyn BackingQueue>>,
    start: usize,
    taken: usize,
}

impl RoundRobinStrategy {
    pub fn new(candidates: Vec<Arc<dyn BackingQueue>>, start: usize) -> Self {
        let start = if candidates.is_empty() {
            0
        } else {
            start % candidates.len()
        };

        Self {
            candidates,
            start,
            taken: 0,
        }
    }
}

impl SelectionStrategy for RoundRobinStrategy {
    fn try_take_next(&mut self) -> Option<(usize, Arc<dyn BackingQueue>)> {
        if self.taken >= self.candidates.len() {
            return None;
        }

        let index = (self.start + self.taken) % self.candidates.len();
        self.taken += 1;

        Some((index, self.candidates[index].clone()))
    }
}

/// Always starts from the first queue. Useful when one queue is preferred and the others
/// only take overflow.
#[derive(Debug, Default)]
pub struct Ordered;

impl StrategyFactory for Ordered {
    fn create(&self, queues: &[Arc<dyn BackingQueue>]) -> Box<dyn SelectionStrategy> {
        Box::new(RoundRobinStrategy::new(queues.to_vec(), 0))
    }
}
