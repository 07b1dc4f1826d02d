//! Transaction state for a connection
//!
//! A transaction is a queue of commands between MULTI and EXEC. The queue
//! being present (even empty) is what "active" means; DISCARD drops it.

use super::Command;

/// Per-connection command queue
#[derive(Debug, Default)]
pub struct Transaction {
    queue: Option<Vec<Command>>,
}

impl Transaction {
    pub fn new() -> Self {
        Transaction::default()
    }

    /// Whether MULTI has been issued and not yet resolved
    pub fn is_active(&self) -> bool {
        self.queue.is_some()
    }

    /// Start queueing. Fails when already active (nested MULTI).
    pub fn activate(&mut self) -> bool {
        if self.queue.is_some() {
            return false;
        }
        self.queue = Some(Vec::new());
        true
    }

    /// Drop the queue. Fails when not active (DISCARD without MULTI).
    pub fn discard(&mut self) -> bool {
        self.queue.take().is_some()
    }

    /// Queue a command. Only meaningful while active; a command pushed
    /// while inactive is silently dropped.
    pub fn push(&mut self, command: Command) {
        if let Some(queue) = &mut self.queue {
            queue.push(command);
        }
    }

    /// Snapshot the queue and deactivate in one step, so the commands run
    /// by EXEC are not queued again. None when not active.
    pub fn take(&mut self) -> Option<Vec<Command>> {
        self.queue.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;

    fn ping() -> Command {
        Command::from_argv(vec!["PING".to_string()]).unwrap()
    }

    #[test]
    fn test_activation_state_machine() {
        let mut tx = Transaction::new();
        assert!(!tx.is_active());

        assert!(tx.activate());
        assert!(tx.is_active());
        // Nested MULTI fails.
        assert!(!tx.activate());

        assert!(tx.discard());
        assert!(!tx.is_active());
        // DISCARD without MULTI fails.
        assert!(!tx.discard());
    }

    #[test]
    fn test_take_deactivates() {
        let mut tx = Transaction::new();
        assert!(tx.take().is_none());

        tx.activate();
        tx.push(ping());
        tx.push(ping());

        let queued = tx.take().unwrap();
        assert_eq!(queued.len(), 2);
        assert!(!tx.is_active());
        assert!(tx.take().is_none());
    }

    #[test]
    fn test_push_while_inactive_is_dropped() {
        let mut tx = Transaction::new();
        tx.push(ping());
        assert!(!tx.is_active());

        tx.activate();
        assert!(tx.take().unwrap().is_empty());
    }
}
