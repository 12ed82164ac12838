//! FIFO node lists that carry packets and buffers between driver stages.
//!
//! Each TX queue moves a fixed set of nodes through three lists:
//!
//! ```text
//!   new ──packet_tx──▶ start ──send──▶ ack ──hardware done──▶ new
//!                        ▲               │
//!                        └─ ring full ───┘ (head re-add, nothing lost)
//! ```
//!
//! RX buffers move between a free list and an in-flight list the same way.
//! Owners reserve storage up front for every node a list can ever hold and
//! never push past it, so moving nodes never allocates.

use alloc::collections::VecDeque;

pub struct NodeList<T> {
    nodes: VecDeque<T>,
}

impl<T> NodeList<T> {
    pub fn new() -> Self {
        Self {
            nodes: VecDeque::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: VecDeque::with_capacity(capacity),
        }
    }

    pub fn head_remove(&mut self) -> Option<T> {
        self.nodes.pop_front()
    }

    pub fn head_add(&mut self, node: T) {
        self.nodes.push_front(node);
    }

    pub fn tail_add(&mut self, node: T) {
        self.nodes.push_back(node);
    }

    /// Unlink the first node matching `pred`, wherever it sits.
    pub fn remove_first(&mut self, pred: impl FnMut(&T) -> bool) -> Option<T> {
        let position = self.nodes.iter().position(pred)?;
        self.nodes.remove(position)
    }

    pub fn head(&self) -> Option<&T> {
        self.nodes.front()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes the list holds without growing.
    pub fn capacity(&self) -> usize {
        self.nodes.capacity()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.nodes.iter()
    }

    /// Remove every node, head first.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.nodes.drain(..)
    }
}

impl<T> Default for NodeList<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_with_head_requeue() {
        let mut list = NodeList::with_capacity(4);
        list.tail_add(1);
        list.tail_add(2);
        list.tail_add(3);

        let first = list.head_remove().unwrap();
        assert_eq!(first, 1);
        list.head_add(first);
        assert_eq!(list.head(), Some(&1));
        assert_eq!(list.len(), 3);

        let drained: alloc::vec::Vec<_> = list.drain().collect();
        assert_eq!(drained, [1, 2, 3]);
        assert!(list.is_empty());
        assert_eq!(list.head_remove(), None);
    }

    #[test]
    fn remove_first_unlinks_from_the_middle() {
        let mut list = NodeList::with_capacity(4);
        for n in [10, 20, 30] {
            list.tail_add(n);
        }
        let capacity = list.capacity();

        assert_eq!(list.remove_first(|&n| n == 20), Some(20));
        assert_eq!(list.remove_first(|&n| n == 20), None);
        let rest: alloc::vec::Vec<_> = list.iter().copied().collect();
        assert_eq!(rest, [10, 30]);
        assert_eq!(list.capacity(), capacity);
    }
}
