//! Single-flight guard for credential mutations.
//!
//! Flows take a [`Ticket`] before their gateway call and commit the result
//! through the coordinator afterwards. Commits are serialized, and a logout
//! advances the epoch so that any result whose ticket predates it is dropped
//! instead of resurrecting a credential the user just discarded.

use std::sync::{Mutex, MutexGuard};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

#[derive(Debug, Default)]
pub struct Coordinator {
    epoch: Mutex<u64>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        self.epoch.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn epoch(&self) -> u64 {
        *self.lock()
    }

    pub fn ticket(&self) -> Ticket {
        Ticket(*self.lock())
    }

    /// Apply a mutation if no supersede happened since `ticket` was taken.
    /// Returns `Ok(None)` when the result was discarded.
    pub fn commit<T, E>(
        &self,
        ticket: Ticket,
        apply: impl FnOnce() -> Result<T, E>,
    ) -> Result<Option<T>, E> {
        let epoch = self.lock();
        if *epoch != ticket.0 {
            debug!(ticket = ticket.0, epoch = *epoch, "Discarding superseded mutation");
            return Ok(None);
        }
        apply().map(Some)
    }

    /// Invalidate every outstanding ticket.
    pub fn invalidate(&self) {
        let mut epoch = self.lock();
        *epoch += 1;
    }

    /// Invalidate outstanding tickets and apply a mutation in the same step.
    pub fn supersede<T, E>(&self, apply: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let mut epoch = self.lock();
        *epoch += 1;
        apply()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_with_current_ticket_applies() {
        let coordinator = Coordinator::new();
        let ticket = coordinator.ticket();
        let applied: Result<Option<u8>, ()> = coordinator.commit(ticket, || Ok(7));
        assert_eq!(applied, Ok(Some(7)));
    }

    #[test]
    fn test_commit_after_invalidate_is_discarded() {
        let coordinator = Coordinator::new();
        let ticket = coordinator.ticket();
        coordinator.invalidate();

        let mut ran = false;
        let applied: Result<Option<()>, ()> = coordinator.commit(ticket, || {
            ran = true;
            Ok(())
        });
        assert_eq!(applied, Ok(None));
        assert!(!ran);
    }

    #[test]
    fn test_commits_do_not_supersede_each_other() {
        let coordinator = Coordinator::new();
        let first = coordinator.ticket();
        let second = coordinator.ticket();
        assert_eq!(coordinator.commit::<_, ()>(first, || Ok(1)), Ok(Some(1)));
        assert_eq!(coordinator.commit::<_, ()>(second, || Ok(2)), Ok(Some(2)));
    }

    #[test]
    fn test_supersede_advances_epoch() {
        let coordinator = Coordinator::new();
        let before = coordinator.epoch();
        let _: Result<(), ()> = coordinator.supersede(|| Ok(()));
        assert_eq!(coordinator.epoch(), before + 1);
    }
}
