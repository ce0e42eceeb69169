//! The process-local registry of active drains.
//!
//! The [`Supervisor`] is used for mutual exclusion and cancellation signalling only; the
//! [`WorkStore`](crate::store::WorkStore) remains the source of truth for everything else.
//! Entries do not survive a restart.
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use fxhash::FxHashMap;
use tokio_util::sync::CancellationToken;

use crate::job::JobId;

struct Entry {
    generation: u64,
    token: CancellationToken,
}

/// Tracks which jobs currently have a drain running.
///
/// Cloning is cheap and every clone shares the same registry.
#[derive(Clone, Default)]
pub struct Supervisor {
    entries: Arc<Mutex<FxHashMap<JobId, Entry>>>,
    generations: Arc<AtomicU64>,
}

impl Supervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, FxHashMap<JobId, Entry>> {
        // The map is never left half updated, so a poisoned lock is still usable.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the job as active, returning `None` when it already was.
    ///
    /// The job stays active until the returned [`Registration`] is dropped or the job is
    /// [deactivated](Supervisor::deactivate).
    pub fn try_register(&self, id: JobId) -> Option<Registration> {
        let mut entries = self.entries();
        if entries.contains_key(&id) {
            return None;
        }
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        entries.insert(
            id,
            Entry {
                generation,
                token: token.clone(),
            },
        );
        Some(Registration {
            supervisor: self.clone(),
            id,
            generation,
            token,
        })
    }

    pub fn is_active(&self, id: JobId) -> bool {
        self.entries().contains_key(&id)
    }

    /// Clear the job's flag and signal its drain to stop at the next boundary.
    ///
    /// Returns whether the job was active.
    pub fn deactivate(&self, id: JobId) -> bool {
        match self.entries().remove(&id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn deactivate_all(&self) -> Vec<JobId> {
        self.entries()
            .drain()
            .map(|(id, entry)| {
                entry.token.cancel();
                id
            })
            .collect()
    }

    pub fn active_jobs(&self) -> Vec<JobId> {
        let mut ids: Vec<_> = self.entries().keys().copied().collect();
        ids.sort();
        ids
    }
}

/// Proof that a drain owns a job's entry in the [`Supervisor`].
///
/// Dropping it removes the entry, unless the job was deactivated and registered again since, so
/// deregistration happens on every exit path of a drain.
pub struct Registration {
    supervisor: Supervisor,
    id: JobId,
    generation: u64,
    token: CancellationToken,
}

impl Registration {
    pub fn job_id(&self) -> JobId {
        self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes once the job has been deactivated.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Whether another drain has registered the job after this one was deactivated.
    pub fn is_superseded(&self) -> bool {
        self.is_cancelled() && self.supervisor.is_active(self.id)
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut entries = self.supervisor.entries();
        if entries
            .get(&self.id)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            entries.remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn register_is_exclusive() {
        let supervisor = Supervisor::new();
        let id = JobId::from(1);

        let registration = supervisor.try_register(id);

        assert!(registration.is_some());
        assert!(supervisor.is_active(id));
        assert!(supervisor.try_register(id).is_none());
        assert!(supervisor.try_register(JobId::from(2)).is_some());
    }

    #[test]
    fn dropping_registration_deregisters() {
        let supervisor = Supervisor::new();
        let id = JobId::from(1);

        drop(supervisor.try_register(id));

        assert!(!supervisor.is_active(id));
        assert!(supervisor.try_register(id).is_some());
    }

    #[test]
    fn deactivate_cancels_registration() {
        let supervisor = Supervisor::new();
        let id = JobId::from(1);
        let registration = supervisor.try_register(id).unwrap();

        assert!(supervisor.deactivate(id));

        assert!(registration.is_cancelled());
        assert!(!registration.is_superseded());
        assert!(!supervisor.is_active(id));
        assert!(!supervisor.deactivate(id));
    }

    #[test]
    fn stale_registration_does_not_remove_successor() {
        let supervisor = Supervisor::new();
        let id = JobId::from(1);
        let first = supervisor.try_register(id).unwrap();
        supervisor.deactivate(id);

        let second = supervisor.try_register(id).unwrap();
        assert!(first.is_superseded());
        drop(first);

        assert!(supervisor.is_active(id));
        assert!(!second.is_cancelled());
        drop(second);
        assert!(!supervisor.is_active(id));
    }

    #[test]
    fn deactivate_all() {
        let supervisor = Supervisor::new();
        let first = supervisor.try_register(JobId::from(2)).unwrap();
        let second = supervisor.try_register(JobId::from(1)).unwrap();
        assert_eq!(supervisor.active_jobs(), vec![JobId::from(1), JobId::from(2)]);

        let mut deactivated = supervisor.deactivate_all();
        deactivated.sort();

        assert_eq!(deactivated, vec![JobId::from(1), JobId::from(2)]);
        assert!(first.is_cancelled() && second.is_cancelled());
        assert!(supervisor.active_jobs().is_empty());
    }

    #[tokio::test]
    async fn cancelled_resolves_on_deactivate() {
        let supervisor = Supervisor::new();
        let id = JobId::from(1);
        let registration = supervisor.try_register(id).unwrap();

        tokio::spawn({
            let supervisor = supervisor.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                supervisor.deactivate(id);
            }
        });

        tokio::time::timeout(Duration::from_secs(5), registration.cancelled())
            .await
            .unwrap();
    }
}
