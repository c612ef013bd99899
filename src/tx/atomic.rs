//! Request grouping into transaction batches
//!
//! A `Batch` is what one backend transaction runs. Standard policies build
//! batches by admitting queued requests that fit the open scope. ATOMIC
//! batches come from an `AtomicGroup` the caller closed before queueing it:
//! the dispatcher never widens a group with whatever else happens to be
//! queued, so group boundaries do not depend on task timing.

use tokio::sync::mpsc::UnboundedReceiver;

use super::errors::TxError;
use super::policy::{Policy, TxScope};
use super::request::Job;

/// Requests sharing one backend transaction
pub(crate) struct Batch {
    pub(crate) scope: TxScope,
    pub(crate) jobs: Vec<Job>,
    /// Any failed request aborts the whole transaction
    pub(crate) atomic: bool,
}

impl Batch {
    pub(crate) fn single(scope: TxScope, job: Job) -> Self {
        Self {
            scope,
            jobs: vec![job],
            atomic: false,
        }
    }
}

/// Cross-store group that commits together or not at all.
pub(crate) struct AtomicGroup {
    scope: TxScope,
    jobs: Vec<Job>,
}

impl AtomicGroup {
    pub(crate) fn new(first: Job) -> Self {
        Self {
            scope: first.scope.clone(),
            jobs: vec![first],
        }
    }

    pub(crate) fn join(&mut self, job: Job) {
        self.scope = self.scope.union(&job.scope);
        self.jobs.push(job);
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.len()
    }

    pub(crate) fn scope(&self) -> &TxScope {
        &self.scope
    }

    pub(crate) fn into_batch(self) -> Batch {
        Batch {
            scope: self.scope,
            jobs: self.jobs,
            atomic: true,
        }
    }

    pub(crate) fn into_jobs(self) -> Vec<Job> {
        self.jobs
    }
}

/// Unit travelling through a thread's queue
pub(crate) enum Queued {
    Job(Job),
    /// Closed group; always one transaction of its own
    Group(AtomicGroup),
}

impl Queued {
    /// Fails every request it carries without running it
    pub(crate) fn reject(self, err: TxError) {
        match self {
            Queued::Job(job) => job.reject(err),
            Queued::Group(group) => {
                for job in group.into_jobs() {
                    job.reject(err.clone());
                }
            }
        }
    }
}

/// Builds the next batch starting from `first`. MULTI and REPEAT pull
/// whatever single requests are already queued; anything that does not
/// fit is parked in `held` so that submission order is preserved.
pub(crate) fn gather(
    policy: Policy,
    fixed: Option<&TxScope>,
    first: Queued,
    queue: &mut UnboundedReceiver<Queued>,
    held: &mut Option<Queued>,
) -> Batch {
    let first = match first {
        Queued::Group(group) => return group.into_batch(),
        Queued::Job(job) => job,
    };
    match policy {
        Policy::Single => Batch::single(first.scope.clone(), first),
        Policy::All => {
            let scope = fixed.cloned().unwrap_or_else(|| first.scope.clone());
            Batch::single(scope, first)
        }
        Policy::Multi | Policy::Repeat => {
            let scope = first.scope.clone();
            let mut jobs = vec![first];
            while let Ok(next) = queue.try_recv() {
                let job = match next {
                    Queued::Job(job) => job,
                    group => {
                        *held = Some(group);
                        break;
                    }
                };
                let fits = match policy {
                    Policy::Repeat => job.scope == scope,
                    _ => scope.covers(&job.scope),
                };
                if !fits {
                    *held = Some(Queued::Job(job));
                    break;
                }
                jobs.push(job);
            }
            Batch {
                scope,
                jobs,
                atomic: false,
            }
        }
        // A lone request is a group of one
        Policy::Atomic => AtomicGroup::new(first).into_batch(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::TxMode;
    use tokio::sync::mpsc;

    fn job(scope: TxScope) -> Job {
        Job::new(scope, |_ctx| Ok(())).0
    }

    fn queued(scope: TxScope) -> Queued {
        Queued::Job(job(scope))
    }

    #[test]
    fn test_multi_joins_covered_requests() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(queued(TxScope::read("a"))).ok();
        tx.send(queued(TxScope::read("c"))).ok();
        tx.send(queued(TxScope::read("b"))).ok();

        let mut held = None;
        let first = queued(TxScope::new(["a", "b"], TxMode::ReadWrite));
        let batch = gather(Policy::Multi, None, first, &mut rx, &mut held);

        // Stops at the first request outside the scope
        assert_eq!(batch.jobs.len(), 2);
        assert!(matches!(&held, Some(Queued::Job(j)) if j.scope == TxScope::read("c")));
        assert!(!batch.atomic);
    }

    #[test]
    fn test_repeat_requires_identical_scope() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(queued(TxScope::read("a"))).ok();
        tx.send(queued(TxScope::write("a"))).ok();

        let mut held = None;
        let batch = gather(Policy::Repeat, None, queued(TxScope::read("a")), &mut rx, &mut held);
        assert_eq!(batch.jobs.len(), 2);
        assert!(held.is_some());
    }

    #[test]
    fn test_multi_stops_at_queued_group() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(Queued::Group(AtomicGroup::new(job(TxScope::read("a"))))).ok();
        tx.send(queued(TxScope::read("a"))).ok();

        let mut held = None;
        let batch = gather(Policy::Multi, None, queued(TxScope::read("a")), &mut rx, &mut held);
        assert_eq!(batch.jobs.len(), 1);
        assert!(matches!(held, Some(Queued::Group(_))));
    }

    #[test]
    fn test_single_never_groups() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(queued(TxScope::read("a"))).ok();

        let mut held = None;
        let batch = gather(Policy::Single, None, queued(TxScope::read("a")), &mut rx, &mut held);
        assert_eq!(batch.jobs.len(), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_all_spans_fixed_scope() {
        let (_tx, mut rx) = mpsc::unbounded_channel();
        let fixed = TxScope::new(["a", "b", "c"], TxMode::ReadWrite);

        let mut held = None;
        let first = queued(TxScope::read("a"));
        let batch = gather(Policy::All, Some(&fixed), first, &mut rx, &mut held);
        assert_eq!(batch.scope, fixed);
    }

    #[test]
    fn test_atomic_group_unions_scope() {
        let (_tx, mut rx) = mpsc::unbounded_channel();
        let mut group = AtomicGroup::new(job(TxScope::read("s1")));
        group.join(job(TxScope::write("s2")));
        assert_eq!(group.len(), 2);

        let mut held = None;
        let batch = gather(Policy::Atomic, None, Queued::Group(group), &mut rx, &mut held);
        assert!(batch.atomic);
        assert_eq!(batch.scope, TxScope::new(["s1", "s2"], TxMode::ReadWrite));
        assert_eq!(batch.jobs.len(), 2);
    }

    #[test]
    fn test_atomic_never_merges_queued_requests() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(queued(TxScope::write("s2"))).ok();

        let mut held = None;
        let batch = gather(Policy::Atomic, None, queued(TxScope::write("s1")), &mut rx, &mut held);
        assert!(batch.atomic);
        assert_eq!(batch.jobs.len(), 1);
        assert!(rx.try_recv().is_ok());
    }
}
