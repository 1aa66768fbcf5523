//! FIFO ordering of commits.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Tickets {
    next: u64,
    serving: u64,
}

/// Ticket queue that admits one commit at a time in arrival order.
#[derive(Debug, Default)]
pub(crate) struct CommitQueue {
    tickets: Mutex<Tickets>,
    turn: Condvar,
}

impl CommitQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Takes a ticket and blocks until it is served.
    pub(crate) fn enter(&self) -> CommitTurn<'_> {
        let mut tickets = self.tickets.lock();
        let ticket = tickets.next;
        tickets.next += 1;
        while tickets.serving != ticket {
            self.turn.wait(&mut tickets);
        }
        CommitTurn {
            queue: self,
            ticket,
        }
    }
}

/// Held for the duration of one commit. Dropping it admits the next ticket.
pub(crate) struct CommitTurn<'a> {
    queue: &'a CommitQueue,
    ticket: u64,
}

impl CommitTurn<'_> {
    pub(crate) fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl Drop for CommitTurn<'_> {
    fn drop(&mut self) {
        let mut tickets = self.queue.tickets.lock();
        tickets.serving += 1;
        self.queue.turn.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn tickets_are_served_in_order() {
        let queue = Arc::new(CommitQueue::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = queue.enter();
        assert_eq!(first.ticket(), 0);

        let mut handles = Vec::new();
        for i in 0..4u64 {
            let thread_queue = Arc::clone(&queue);
            let order = Arc::clone(&order);
            handles.push(std::thread::spawn(move || {
                let turn = thread_queue.enter();
                order.lock().push((i, turn.ticket()));
            }));
            // let thread i take its ticket before the next one starts
            while queue.tickets.lock().next < i + 2 {
                std::thread::sleep(Duration::from_millis(1));
            }
        }

        drop(first);
        for handle in handles {
            handle.join().unwrap();
        }
        let order = order.lock();
        assert_eq!(*order, vec![(0, 1), (1, 2), (2, 3), (3, 4)]);
    }
}
