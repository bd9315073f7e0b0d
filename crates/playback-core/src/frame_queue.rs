//! FIFO holding area for decoded frames awaiting a playback buffer.
//!
//! Not thread-safe on its own: it belongs to the [`crate::decoder::Decoder`], which is only ever
//! driven by one decode at a time.

use std::collections::VecDeque;

use crate::frame::DecodedFrame;

/// Decode order == playback order. Frames are never reordered.
#[derive(Debug, Default)]
pub struct FrameQueue {
    frames: VecDeque<DecodedFrame>,
}

impl FrameQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, frame: DecodedFrame) {
        self.frames.push_back(frame);
    }

    /// Head of the queue, left in place.
    pub fn peek(&self) -> Option<&DecodedFrame> {
        self.frames.front()
    }

    /// Head of the queue for in-place truncation.
    pub fn peek_mut(&mut self) -> Option<&mut DecodedFrame> {
        self.frames.front_mut()
    }

    /// Remove the head, i.e. the frame returned by the last [`FrameQueue::peek`].
    pub fn dequeue(&mut self) -> Option<DecodedFrame> {
        self.frames.pop_front()
    }

    /// Drain every queued frame in order.
    pub fn dequeue_all(&mut self) -> Vec<DecodedFrame> {
        self.frames.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(pts: i64, samples: usize) -> DecodedFrame {
        DecodedFrame::new(1, vec![0.0; samples], pts)
    }

    #[test]
    fn peek_does_not_remove() {
        let mut q = FrameQueue::new();
        q.enqueue(frame(0, 4));
        assert_eq!(q.peek().map(DecodedFrame::pts), Some(0));
        assert_eq!(q.peek().map(DecodedFrame::pts), Some(0));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn dequeue_removes_the_peeked_head_in_order() {
        let mut q = FrameQueue::new();
        for pts in 0..3 {
            q.enqueue(frame(pts, 2));
        }
        let peeked = q.peek().map(DecodedFrame::pts);
        let taken = q.dequeue().map(|f| f.pts());
        assert_eq!(peeked, taken);
        assert_eq!(q.dequeue().map(|f| f.pts()), Some(1));
        assert_eq!(q.dequeue().map(|f| f.pts()), Some(2));
        assert!(q.dequeue().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn dequeue_all_drains_in_order() {
        let mut q = FrameQueue::new();
        q.enqueue(frame(10, 3));
        q.enqueue(frame(20, 5));
        assert_eq!(q.len(), 2);
        let all: Vec<i64> = q.dequeue_all().iter().map(DecodedFrame::pts).collect();
        assert_eq!(all, vec![10, 20]);
        assert!(q.is_empty());
    }

    #[test]
    fn clear_drops_everything() {
        let mut q = FrameQueue::new();
        q.enqueue(frame(0, 1));
        q.enqueue(frame(1, 1));
        q.clear();
        assert!(q.is_empty());
        assert!(q.peek().is_none());
    }
}
