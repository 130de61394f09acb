use std::{collections::VecDeque, sync::Arc};

use serde::Serialize;
use thiserror::Error;

use crate::{
    clients::ClientId,
    streams::{Stream, StreamSummary},
};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("the queue is empty")]
    QueueEmpty,

    #[error("no queue stack exists for that user")]
    NoSuchStack,
}

/// One user's ordered sub-list of a room's queue. A stack outlives being
/// drained so its owner keeps their place in the rotation.
#[derive(Debug)]
struct Stack {
    owner: ClientId,
    items: VecDeque<Arc<Stream>>,
}

/// The playback queue of a room: per-user stacks consumed round-robin, one
/// item per owner per cycle, in the order the owners first pushed.
#[derive(Debug, Default)]
pub struct Queue {
    stacks: Vec<Stack>,
    cursor: usize,
}

impl Queue {
    pub fn new() -> Self {
        Default::default()
    }

    /// Appends a stream to the owner's stack, creating the stack at the end
    /// of the rotation if the owner has none yet.
    pub fn push(&mut self, owner: ClientId, stream: Arc<Stream>) {
        match self.stacks.iter_mut().find(|s| s.owner == owner) {
            Some(stack) => stack.items.push_back(stream),
            None => self.stacks.push(Stack {
                owner,
                items: VecDeque::from([stream]),
            }),
        }
    }

    /// Removes and returns the head of the next non-empty stack in rotation
    /// order. The cursor advances past the consumed stack, so consecutive
    /// calls drain one item per owner per cycle.
    pub fn next(&mut self) -> Result<Arc<Stream>, QueueError> {
        let count = self.stacks.len();

        for offset in 0..count {
            let index = (self.cursor + offset) % count;
            let stack = &mut self.stacks[index];

            if let Some(item) = stack.items.pop_front() {
                self.cursor = (index + 1) % count;
                return Ok(item);
            }
        }

        Err(QueueError::QueueEmpty)
    }

    /// Total number of queued items across every stack.
    pub fn len(&self) -> usize {
        self.stacks.iter().map(|s| s.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The full-queue view sent in `queuesync`.
    pub fn status(&self) -> QueueStatus {
        QueueStatus {
            length: self.len(),
            stacks: self.stacks.iter().map(Stack::status).collect(),
        }
    }

    /// The single-stack view sent in `stacksync`.
    pub fn stack_status(&self, owner: ClientId) -> Result<StackStatus, QueueError> {
        self.stacks
            .iter()
            .find(|s| s.owner == owner)
            .map(Stack::status)
            .ok_or(QueueError::NoSuchStack)
    }
}

impl Stack {
    fn status(&self) -> StackStatus {
        StackStatus {
            id: self.owner.to_string(),
            items: self.items.iter().map(|s| s.summary()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub length: usize,
    pub stacks: Vec<StackStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StackStatus {
    pub id: String,
    pub items: Vec<StreamSummary>,
}

impl StackStatus {
    /// The view for a user who never queued anything.
    pub fn empty(owner: ClientId) -> Self {
        Self {
            id: owner.to_string(),
            items: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streams::StreamKind;

    fn stream(url: &str) -> Arc<Stream> {
        Arc::new(Stream::new(StreamKind::Local, url))
    }

    fn urls_of(queue: &mut Queue, count: usize) -> Vec<String> {
        (0..count)
            .map(|_| queue.next().expect("queue has items").url.clone())
            .collect()
    }

    #[test]
    fn single_owner_pops_in_push_order() {
        let mut queue = Queue::new();
        let owner = ClientId::next();

        queue.push(owner, stream("a1"));
        queue.push(owner, stream("a2"));

        assert_eq!(urls_of(&mut queue, 2), vec!["a1", "a2"]);
        assert!(matches!(queue.next(), Err(QueueError::QueueEmpty)));
    }

    #[test]
    fn interleaves_owners_fairly() {
        let mut queue = Queue::new();
        let (a, b, c) = (ClientId::next(), ClientId::next(), ClientId::next());

        for round in 0..2 {
            queue.push(a, stream(&format!("a{round}")));
            queue.push(b, stream(&format!("b{round}")));
            queue.push(c, stream(&format!("c{round}")));
        }

        assert_eq!(
            urls_of(&mut queue, 6),
            vec!["a0", "b0", "c0", "a1", "b1", "c1"],
            "owners alternate one item per cycle"
        );
    }

    #[test]
    fn skips_empty_stacks_but_keeps_their_slot() {
        let mut queue = Queue::new();
        let (a, b) = (ClientId::next(), ClientId::next());

        queue.push(a, stream("a1"));
        queue.push(b, stream("b1"));
        queue.push(b, stream("b2"));

        assert_eq!(urls_of(&mut queue, 3), vec!["a1", "b1", "b2"]);

        // Refilling a drained stack reuses its original slot.
        queue.push(b, stream("b3"));
        queue.push(a, stream("a2"));

        assert_eq!(urls_of(&mut queue, 2), vec!["a2", "b3"]);
    }

    #[test]
    fn four_skips_drain_two_owners_alternately() {
        let mut queue = Queue::new();
        let (a, b) = (ClientId::next(), ClientId::next());

        queue.push(a, stream("a1"));
        queue.push(a, stream("a2"));
        queue.push(b, stream("b1"));
        queue.push(b, stream("b2"));

        assert_eq!(urls_of(&mut queue, 4), vec!["a1", "b1", "a2", "b2"]);
    }

    #[test]
    fn next_on_a_fresh_queue_is_empty() {
        let mut queue = Queue::new();

        assert!(matches!(queue.next(), Err(QueueError::QueueEmpty)));
    }

    #[test]
    fn stack_status_requires_an_existing_stack() {
        let mut queue = Queue::new();
        let (a, b) = (ClientId::next(), ClientId::next());

        queue.push(a, stream("a1"));

        assert!(queue.stack_status(a).is_ok());
        assert!(matches!(
            queue.stack_status(b),
            Err(QueueError::NoSuchStack)
        ));

        // A drained stack still has a status.
        queue.next().unwrap();
        let status = queue.stack_status(a).expect("stack survives draining");
        assert!(status.items.is_empty());
    }

    #[test]
    fn length_counts_every_stack() {
        let mut queue = Queue::new();
        let (a, b) = (ClientId::next(), ClientId::next());

        queue.push(a, stream("a1"));
        queue.push(b, stream("b1"));
        queue.push(b, stream("b2"));

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.status().length, 3);
        assert_eq!(queue.status().stacks.len(), 2);
    }
}
