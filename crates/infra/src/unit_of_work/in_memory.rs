use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::ThreadId;

use super::{UnitOfWork, UnitOfWorkError};

/// Store that can undo the writes of one unit of work.
///
/// `checkpoint` is called on the thread that owns the unit. Only writes made by that thread
/// until `restore` or `release` belong to the unit; writes from other threads are kept.
pub trait Checkpoint: Send + Sync {
    /// Start journaling the calling thread's writes.
    fn checkpoint(&self) -> Result<(), UnitOfWorkError>;

    /// Undo the journaled writes, newest first, and stop journaling.
    fn restore(&self) -> Result<(), UnitOfWorkError>;

    /// Stop journaling, keeping the writes.
    fn release(&self) -> Result<(), UnitOfWorkError>;
}

/// Undo log of the thread that owns the current unit of work.
#[derive(Debug)]
pub(crate) struct Journal<U> {
    owner: ThreadId,
    entries: Vec<U>,
}

impl<U> Journal<U> {
    pub(crate) fn for_current_thread() -> Self {
        Self {
            owner: std::thread::current().id(),
            entries: Vec::new(),
        }
    }

    /// Record `undo` if the calling thread owns the journal.
    pub(crate) fn note(&mut self, undo: U) {
        if self.owner == std::thread::current().id() {
            self.entries.push(undo);
        }
    }

    /// Entries newest first.
    pub(crate) fn into_undo_order(self) -> impl Iterator<Item = U> {
        self.entries.into_iter().rev()
    }
}

/// Unit of work over in-memory stores.
///
/// One unit of work is active at a time across the whole process; other threads block in
/// `begin` until it ends. Beginning twice on the same thread is an error rather than a
/// deadlock.
pub struct InMemoryUnitOfWork {
    participants: Vec<Arc<dyn Checkpoint>>,
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl InMemoryUnitOfWork {
    pub fn new() -> Self {
        Self {
            participants: Vec::new(),
            owner: Mutex::new(None),
            released: Condvar::new(),
            commits: AtomicU64::new(0),
            rollbacks: AtomicU64::new(0),
        }
    }

    pub fn with_participant(mut self, participant: Arc<dyn Checkpoint>) -> Self {
        self.participants.push(participant);
        self
    }

    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollback_count(&self) -> u64 {
        self.rollbacks.load(Ordering::SeqCst)
    }

    fn owner(&self) -> Result<MutexGuard<'_, Option<ThreadId>>, UnitOfWorkError> {
        self.owner
            .lock()
            .map_err(|_| UnitOfWorkError::Storage("lock poisoned".to_string()))
    }

    /// Hand the unit of work back, provided the calling thread holds it.
    fn end(&self, finish: impl Fn(&dyn Checkpoint) -> Result<(), UnitOfWorkError>) -> Result<(), UnitOfWorkError> {
        let mut owner = self.owner()?;
        if *owner != Some(std::thread::current().id()) {
            return Err(UnitOfWorkError::NotActive);
        }

        // Every participant is finished even if one fails; the first error wins.
        let mut result = Ok(());
        for participant in &self.participants {
            let outcome = finish(participant.as_ref());
            if result.is_ok() {
                result = outcome;
            }
        }

        *owner = None;
        self.released.notify_one();
        result
    }
}

impl Default for InMemoryUnitOfWork {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryUnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryUnitOfWork")
            .field("participants", &self.participants.len())
            .field("commits", &self.commit_count())
            .field("rollbacks", &self.rollback_count())
            .finish()
    }
}

impl UnitOfWork for InMemoryUnitOfWork {
    fn begin(&self) -> Result<(), UnitOfWorkError> {
        let me = std::thread::current().id();
        let mut owner = self.owner()?;
        if *owner == Some(me) {
            return Err(UnitOfWorkError::AlreadyActive);
        }
        while owner.is_some() {
            owner = self
                .released
                .wait(owner)
                .map_err(|_| UnitOfWorkError::Storage("lock poisoned".to_string()))?;
        }

        for (idx, participant) in self.participants.iter().enumerate() {
            if let Err(err) = participant.checkpoint() {
                for earlier in &self.participants[..idx] {
                    let _ = earlier.release();
                }
                return Err(err);
            }
        }

        *owner = Some(me);
        Ok(())
    }

    fn commit(&self) -> Result<(), UnitOfWorkError> {
        self.end(|p| p.release())?;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&self) -> Result<(), UnitOfWorkError> {
        self.end(|p| p.restore())?;
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::RwLock;
    use std::time::Duration;

    #[derive(Default)]
    struct Counter {
        value: RwLock<u32>,
        saved: Mutex<Option<u32>>,
    }

    impl Counter {
        fn get(&self) -> u32 {
            *self.value.read().unwrap()
        }

        fn bump(&self) {
            *self.value.write().unwrap() += 1;
        }
    }

    impl Checkpoint for Counter {
        fn checkpoint(&self) -> Result<(), UnitOfWorkError> {
            *self.saved.lock().unwrap() = Some(self.get());
            Ok(())
        }

        fn restore(&self) -> Result<(), UnitOfWorkError> {
            if let Some(saved) = self.saved.lock().unwrap().take() {
                *self.value.write().unwrap() = saved;
            }
            Ok(())
        }

        fn release(&self) -> Result<(), UnitOfWorkError> {
            self.saved.lock().unwrap().take();
            Ok(())
        }
    }

    fn setup() -> (Arc<Counter>, Arc<InMemoryUnitOfWork>) {
        let counter = Arc::new(Counter::default());
        let uow = Arc::new(InMemoryUnitOfWork::new().with_participant(counter.clone()));
        (counter, uow)
    }

    #[test]
    fn rollback_restores_checkpointed_state() {
        let (counter, uow) = setup();

        uow.begin().unwrap();
        counter.bump();
        uow.commit().unwrap();

        uow.begin().unwrap();
        counter.bump();
        counter.bump();
        uow.rollback().unwrap();

        assert_eq!(counter.get(), 1);
        assert_eq!(uow.commit_count(), 1);
        assert_eq!(uow.rollback_count(), 1);
    }

    #[test]
    fn nested_begin_on_same_thread_is_rejected() {
        let (_, uow) = setup();
        uow.begin().unwrap();
        assert!(matches!(uow.begin(), Err(UnitOfWorkError::AlreadyActive)));
        uow.commit().unwrap();
    }

    #[test]
    fn commit_without_begin_is_rejected() {
        let (_, uow) = setup();
        assert!(matches!(uow.commit(), Err(UnitOfWorkError::NotActive)));
        assert!(matches!(uow.rollback(), Err(UnitOfWorkError::NotActive)));
    }

    #[test]
    fn other_threads_wait_for_the_active_unit() {
        let (counter, uow) = setup();
        uow.begin().unwrap();

        let waiter = {
            let uow = uow.clone();
            let counter = counter.clone();
            std::thread::spawn(move || {
                uow.begin().unwrap();
                let seen = counter.get();
                counter.bump();
                uow.commit().unwrap();
                seen
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        counter.bump();
        uow.commit().unwrap();

        assert_eq!(waiter.join().unwrap(), 1);
        assert_eq!(counter.get(), 2);
    }
}
