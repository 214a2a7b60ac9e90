use std::collections::VecDeque;

use parking_lot::Mutex;

/// Thread-safe FIFO of pending work. One lock guards both ends; ordering is
/// insertion order and nothing is deduplicated.
pub struct Queue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> Queue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
        }
    }

    /// Append an item. Returns `true` if the queue was empty beforehand,
    /// which is when a sleeping consumer needs waking.
    pub fn push(&self, item: T) -> bool {
        let mut items = self.items.lock();
        let was_empty = items.is_empty();
        items.push_back(item);
        was_empty
    }

    pub fn pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn pops_in_insertion_order() {
        let q = Queue::new();
        assert!(q.push(1));
        assert!(!q.push(2));
        assert!(!q.push(2));
        assert_eq!(q.len(), 3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let q = Arc::new(Queue::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let q = Arc::clone(&q);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        q.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut seen = Vec::new();
        while let Some(v) = q.pop() {
            seen.push(v);
        }
        assert_eq!(seen.len(), 1000);

        // Each producer's items stay in its own order.
        for t in 0..4 {
            let mine: Vec<_> = seen.iter().filter(|v| **v / 1000 == t).collect();
            assert!(mine.windows(2).all(|w| w[0] < w[1]));
        }
    }
}
