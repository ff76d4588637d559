// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::event::PendingEvent;
use std::collections::VecDeque;

/// FIFO queue of pending events for one task.
///
/// Enqueue may happen from any thread, dequeue only from the owning task;
/// both run under the task's spinlock, which is what gives the MPSC contract
/// and the cross-thread ordering guarantee (an event enqueued before `resume`
/// is visible to the task on its next dispatch).
#[derive(Default)]
pub(crate) struct Mailbox {
    pending: VecDeque<PendingEvent>,
}

impl Mailbox {
    pub(crate) const fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    pub(crate) fn enqueue(&mut self, event: PendingEvent) {
        self.pending.push_back(event);
    }

    pub(crate) fn dequeue(&mut self) -> Option<PendingEvent> {
        self.pending.pop_front()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Removes all pending events so their payloads can be dropped *outside*
    /// the task lock.
    pub(crate) fn take_all(&mut self) -> VecDeque<PendingEvent> {
        std::mem::take(&mut self.pending)
    }
}
