//! Software bookkeeping of descriptor ownership, independent of the hardware ownership bits.
//!
//! Every descriptor slot is on at most one of two intrusive FIFO lists threaded through a
//! shared `next` array: the free list (slots that may be reserved) and the posted queue
//! (slots handed to the adapter, in post order). Reserved and completed slots are on neither.

use alloc::vec;
use alloc::vec::Vec;

/// Sentinel for "no next slot".
const NIL: u32 = u32::MAX;

/// The software state of a descriptor slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DescriptorState {
    /// Never reserved since the ring or fifo was created.
    Avail,
    /// Taken off the free list by `reserve()`, being filled in by the caller.
    Reserved,
    /// Handed to the adapter.
    Posted,
    /// Returned by `next_completed()`, waiting for the caller to free it.
    Completed,
    /// Released by the caller, back on the free list.
    Freed,
}

/// An intrusive singly-linked FIFO over slot indices.
#[derive(Clone, Copy, Debug)]
struct IndexQueue {
    head: u32,
    tail: u32,
    len: usize,
}

impl IndexQueue {
    const fn new() -> IndexQueue {
        IndexQueue { head: NIL, tail: NIL, len: 0 }
    }
}

pub(crate) struct DescriptorList {
    states: Vec<DescriptorState>,
    next: Vec<u32>,
    free: IndexQueue,
    posted: IndexQueue,
}

impl DescriptorList {
    pub(crate) fn new(len: usize) -> DescriptorList {
        let mut list = DescriptorList {
            states: vec![DescriptorState::Avail; len],
            next: vec![NIL; len],
            free: IndexQueue::new(),
            posted: IndexQueue::new(),
        };
        for index in 0..len {
            list.push(Queue::Free, index);
        }
        list
    }

    fn queue(&mut self, which: Queue) -> &mut IndexQueue {
        match which {
            Queue::Free => &mut self.free,
            Queue::Posted => &mut self.posted,
        }
    }

    fn push(&mut self, which: Queue, index: usize) {
        let index = index as u32;
        self.next[index as usize] = NIL;
        let tail = self.queue(which).tail;
        if tail == NIL {
            self.queue(which).head = index;
        } else {
            self.next[tail as usize] = index;
        }
        let q = self.queue(which);
        q.tail = index;
        q.len += 1;
    }

    fn pop(&mut self, which: Queue) -> Option<usize> {
        let head = self.queue(which).head;
        if head == NIL {
            return None;
        }
        let next = self.next[head as usize];
        self.next[head as usize] = NIL;
        let q = self.queue(which);
        q.head = next;
        if next == NIL {
            q.tail = NIL;
        }
        q.len -= 1;
        Some(head as usize)
    }

    pub(crate) fn len(&self) -> usize {
        self.states.len()
    }

    pub(crate) fn state(&self, index: usize) -> Option<DescriptorState> {
        self.states.get(index).copied()
    }

    pub(crate) fn free_count(&self) -> usize {
        self.free.len
    }

    pub(crate) fn posted_count(&self) -> usize {
        self.posted.len
    }

    /// Reserved, posted and completed slots.
    pub(crate) fn outstanding(&self) -> usize {
        self.len() - self.free.len
    }

    /// Takes the oldest free slot.
    pub(crate) fn reserve(&mut self) -> Option<usize> {
        let index = self.pop(Queue::Free)?;
        self.states[index] = DescriptorState::Reserved;
        Some(index)
    }

    /// Appends a reserved slot to the posted queue.
    pub(crate) fn post(&mut self, index: usize) -> Result<(), &'static str> {
        match self.state(index) {
            Some(DescriptorState::Reserved) => {
                self.states[index] = DescriptorState::Posted;
                self.push(Queue::Posted, index);
                Ok(())
            }
            Some(DescriptorState::Posted) => Err("descriptor is already posted"),
            Some(_) => Err("only a reserved descriptor can be posted"),
            None => Err("descriptor index out of range"),
        }
    }

    /// The oldest posted slot, if any.
    pub(crate) fn oldest_posted(&self) -> Option<usize> {
        match self.posted.head {
            NIL => None,
            head => Some(head as usize),
        }
    }

    /// Removes the oldest posted slot and marks it completed.
    pub(crate) fn complete_oldest(&mut self) -> Option<usize> {
        let index = self.pop(Queue::Posted)?;
        self.states[index] = DescriptorState::Completed;
        Some(index)
    }

    /// Returns a reserved or completed slot to the free list.
    pub(crate) fn free(&mut self, index: usize) -> Result<(), &'static str> {
        match self.state(index) {
            Some(DescriptorState::Reserved) | Some(DescriptorState::Completed) => {
                self.states[index] = DescriptorState::Freed;
                self.push(Queue::Free, index);
                Ok(())
            }
            Some(DescriptorState::Posted) => Err("cannot free a descriptor owned by the adapter"),
            Some(_) => Err("descriptor is already free"),
            None => Err("descriptor index out of range"),
        }
    }

    /// Forcibly returns every outstanding slot to the free list, calling `f` with each slot
    /// and the state it was in. Posted slots are visited in post order.
    pub(crate) fn terminate_all<F: FnMut(usize, DescriptorState)>(&mut self, mut f: F) {
        while let Some(index) = self.pop(Queue::Posted) {
            f(index, DescriptorState::Posted);
            self.states[index] = DescriptorState::Freed;
            self.push(Queue::Free, index);
        }
        for index in 0..self.len() {
            let state = self.states[index];
            if matches!(state, DescriptorState::Reserved | DescriptorState::Completed) {
                f(index, state);
                self.states[index] = DescriptorState::Freed;
                self.push(Queue::Free, index);
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Queue {
    Free,
    Posted,
}
