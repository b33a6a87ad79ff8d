//! Update Scheduler
//!
//! The scheduler batches deferred work so that a burst of synchronous writes
//! produces one re-render per component instead of one per write.
//!
//! # Algorithm
//!
//! Work is split into three queues:
//!
//! 1. **pre** jobs (watchers with `flush: Pre`) run before any rendering.
//! 2. **main** jobs (component re-renders) run sorted by owner order, so a
//!    parent always renders before its children. A child whose parent
//!    already re-rendered it has had its job invalidated and is skipped.
//! 3. **post** jobs (mounted/updated hooks, `flush: Post` watchers) run after
//!    all rendering of the round.
//!
//! Each queue is deduplicated by [`JobId`]: queueing a job that is already
//! pending is a no-op. Every phase snapshots its queue before iterating, so
//! jobs queued while a phase runs are picked up by a later round of the same
//! flush, never dropped and never run twice.
//!
//! One call to [`flush_jobs`] plays the role of one microtask turn. A host
//! integration registers a [`set_flush_requester`] hook to learn when a flush
//! becomes necessary; tests simply call [`flush_jobs`] or await
//! [`next_tick`].

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::config;
use crate::error::{self, BoxError, ErrorInfo, ErrorOrigin, ErrorRef, RuntimeError};

/// Identity of a scheduler job. Queues deduplicate on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

type Task = Rc<dyn Fn() -> Result<(), BoxError>>;

/// A deferred unit of work.
///
/// Cloning a job keeps its identity; queueing two clones runs the task once.
#[derive(Clone)]
pub struct Job {
    id: JobId,
    order: Option<u64>,
    task: Task,
}

impl Job {
    pub fn new(task: impl Fn() -> Result<(), BoxError> + 'static) -> Self {
        Self {
            id: JobId::new(),
            order: None,
            task: Rc::new(task),
        }
    }

    /// Sort key within the main queue. Lower runs first; unordered jobs run
    /// last.
    pub fn with_order(mut self, order: u64) -> Self {
        self.order = Some(order);
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    fn sort_key(&self) -> u64 {
        self.order.unwrap_or(u64::MAX)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("order", &self.order)
            .finish()
    }
}

#[derive(Default)]
struct SchedulerState {
    pre: IndexMap<JobId, Job>,
    main: IndexMap<JobId, Job>,
    post: IndexMap<JobId, Job>,
    /// Main jobs cancelled while the current round's snapshot runs.
    invalidated: HashSet<JobId>,
    flushing: bool,
    flushing_pre: bool,
    flushing_post: bool,
    flush_pending: bool,
    flush_requester: Option<Rc<dyn Fn()>>,
}

thread_local! {
    static STATE: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

fn with_state<R>(f: impl FnOnce(&mut SchedulerState) -> R) -> R {
    STATE.with(|state| f(&mut state.borrow_mut()))
}

/// Per-flush run counters for the recursion guard.
#[derive(Default)]
struct RunCounts(HashMap<JobId, usize>);

impl RunCounts {
    /// Count one more run of `job`. Returns `false` once the configured
    /// limit is exceeded.
    fn admit(&mut self, job: &Job, limit: usize) -> bool {
        let count = self.0.entry(job.id).or_insert(0);
        *count += 1;
        if *count > limit {
            tracing::warn!(job = job.id.raw(), limit, "job exceeded the recursion limit");
            error::report(
                RuntimeError::RecursionLimit { job: job.id, limit },
                ErrorInfo::new(ErrorOrigin::Scheduler),
                None,
            );
            return false;
        }
        true
    }
}

fn request_flush() {
    let requester = with_state(|state| {
        if state.flushing || state.flush_pending {
            return None;
        }
        state.flush_pending = true;
        state.flush_requester.clone()
    });
    if let Some(requester) = requester {
        requester();
    }
}

fn run_job(job: &Job) {
    if let Err(err) = (job.task)() {
        error::report(
            RuntimeError::callback(err),
            ErrorInfo::new(ErrorOrigin::Scheduler),
            None,
        );
    }
}

/// Queue a main (render) job.
pub fn queue_job(job: Job) {
    with_state(|state| {
        state.main.entry(job.id).or_insert(job);
    });
    request_flush();
}

/// Queue a job that runs before the main jobs of the next round.
pub fn queue_pre_flush_cb(job: Job) {
    with_state(|state| {
        state.pre.entry(job.id).or_insert(job);
    });
    request_flush();
}

/// Queue a job that runs after the main jobs of the next round.
pub fn queue_post_flush_cb(job: Job) {
    with_state(|state| {
        state.post.entry(job.id).or_insert(job);
    });
    request_flush();
}

/// Drop a pending main job, including one already taken into the round
/// that is running. A no-op if it is not queued.
pub fn invalidate_job(id: JobId) {
    with_state(|state| {
        state.main.shift_remove(&id);
        if state.flushing {
            state.invalidated.insert(id);
        }
    });
}

fn take_invalidated(id: JobId) -> bool {
    with_state(|state| state.invalidated.remove(&id))
}

/// Whether any queue holds work.
pub fn has_pending_jobs() -> bool {
    with_state(|state| !(state.pre.is_empty() && state.main.is_empty() && state.post.is_empty()))
}

/// Install the hook notified when a flush first becomes necessary.
pub fn set_flush_requester(requester: Option<Rc<dyn Fn()>>) {
    with_state(|state| state.flush_requester = requester);
}

fn drain_pre(counts: &mut RunCounts, limit: usize) {
    if with_state(|state| std::mem::replace(&mut state.flushing_pre, true)) {
        return;
    }
    loop {
        let jobs = with_state(|state| std::mem::take(&mut state.pre));
        if jobs.is_empty() {
            break;
        }
        for job in jobs.into_values() {
            if counts.admit(&job, limit) {
                run_job(&job);
            }
        }
    }
    with_state(|state| state.flushing_pre = false);
}

fn drain_post(counts: &mut RunCounts, limit: usize) {
    if with_state(|state| std::mem::replace(&mut state.flushing_post, true)) {
        return;
    }
    loop {
        let mut jobs: Vec<Job> = with_state(|state| std::mem::take(&mut state.post))
            .into_values()
            .collect();
        if jobs.is_empty() {
            break;
        }
        jobs.sort_by_key(Job::sort_key);
        for job in jobs {
            if counts.admit(&job, limit) {
                run_job(&job);
            }
        }
    }
    with_state(|state| state.flushing_post = false);
}

/// Run all pending pre jobs now. Used before a component re-renders with
/// new props so that pre watchers observe the props first.
pub fn flush_pre_flush_cbs() {
    drain_pre(&mut RunCounts::default(), config::current().recursion_limit);
}

/// Run all pending post jobs now. Used after a root render.
pub fn flush_post_flush_cbs() {
    drain_post(&mut RunCounts::default(), config::current().recursion_limit);
}

/// Flush every queue until all of them are empty.
///
/// Re-entrant calls (from inside a job) return immediately; the outer flush
/// picks up whatever they would have run.
pub fn flush_jobs() {
    if with_state(|state| std::mem::replace(&mut state.flushing, true)) {
        return;
    }
    with_state(|state| state.flush_pending = false);

    let limit = config::current().recursion_limit;
    let mut counts = RunCounts::default();
    let mut rounds = 0usize;

    loop {
        drain_pre(&mut counts, limit);

        let mut jobs: Vec<Job> = with_state(|state| {
            state.invalidated.clear();
            std::mem::take(&mut state.main)
        })
        .into_values()
        .collect();
        // Stable: jobs with equal order keep queue order.
        jobs.sort_by_key(Job::sort_key);
        for job in &jobs {
            if take_invalidated(job.id) {
                continue;
            }
            if counts.admit(job, limit) {
                run_job(job);
            }
        }

        drain_post(&mut counts, limit);
        rounds += 1;

        if !has_pending_jobs() {
            break;
        }
    }

    tracing::debug!(rounds, jobs = counts.0.len(), "flushed scheduler");
    with_state(|state| {
        state.flushing = false;
        state.flush_pending = false;
        state.invalidated.clear();
    });
    error::close_window();
}

/// Resolve after the pending flush has completed.
///
/// Errors that reached the error channel without any handler during the
/// flush are surfaced here, oldest first.
pub async fn next_tick() -> Result<(), ErrorRef> {
    flush_jobs();
    match error::take_first_unhandled() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn recording_job(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> Job {
        let log = log.clone();
        Job::new(move || {
            log.borrow_mut().push(name);
            Ok(())
        })
    }

    #[test]
    fn duplicate_jobs_run_once() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let job = recording_job(&log, "a");

        queue_job(job.clone());
        queue_job(job.clone());
        queue_job(job);
        flush_jobs();

        assert_eq!(*log.borrow(), vec!["a"]);
        assert!(!has_pending_jobs());
    }

    #[test]
    fn phases_run_pre_main_post() {
        let log = Rc::new(RefCell::new(Vec::new()));

        queue_post_flush_cb(recording_job(&log, "post"));
        queue_job(recording_job(&log, "main"));
        queue_pre_flush_cb(recording_job(&log, "pre"));
        flush_jobs();

        assert_eq!(*log.borrow(), vec!["pre", "main", "post"]);
    }

    #[test]
    fn main_jobs_sorted_by_order() {
        let log = Rc::new(RefCell::new(Vec::new()));

        queue_job(recording_job(&log, "child").with_order(2));
        queue_job(recording_job(&log, "unordered"));
        queue_job(recording_job(&log, "parent").with_order(1));
        flush_jobs();

        assert_eq!(*log.borrow(), vec!["parent", "child", "unordered"]);
    }

    #[test]
    fn jobs_queued_during_flush_run_in_same_flush() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let late = recording_job(&log, "late");

        let log_clone = log.clone();
        queue_job(Job::new(move || {
            log_clone.borrow_mut().push("early");
            queue_job(late.clone());
            Ok(())
        }));
        flush_jobs();

        assert_eq!(*log.borrow(), vec!["early", "late"]);
    }

    #[test]
    fn invalidated_jobs_do_not_run() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let job = recording_job(&log, "skipped");
        let id = job.id();

        queue_job(job);
        invalidate_job(id);
        flush_jobs();

        assert!(log.borrow().is_empty());
    }

    #[test]
    fn job_invalidated_mid_round_is_skipped() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let child = recording_job(&log, "child").with_order(2);
        let child_id = child.id();

        let log_clone = log.clone();
        let parent = Job::new(move || {
            log_clone.borrow_mut().push("parent");
            invalidate_job(child_id);
            Ok(())
        })
        .with_order(1);

        queue_job(child);
        queue_job(parent);
        flush_jobs();

        assert_eq!(*log.borrow(), vec!["parent"]);
        assert!(!has_pending_jobs());
    }

    #[test]
    fn job_requeued_after_invalidation_runs_next_round() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let child = recording_job(&log, "child").with_order(2);
        let child_id = child.id();

        let log_clone = log.clone();
        let requeue = child.clone();
        let parent = Job::new(move || {
            log_clone.borrow_mut().push("parent");
            invalidate_job(child_id);
            queue_job(requeue.clone());
            Ok(())
        })
        .with_order(1);

        queue_job(child);
        queue_job(parent);
        flush_jobs();

        assert_eq!(*log.borrow(), vec!["parent", "child"]);

        // A stale invalidation never leaks into a later flush.
        queue_job(recording_job(&log, "later"));
        flush_jobs();
        assert_eq!(log.borrow().last(), Some(&"later"));
    }

    #[test]
    fn failing_job_does_not_stop_the_flush() {
        let log = Rc::new(RefCell::new(Vec::new()));
        error::take_unhandled_errors();

        queue_job(Job::new(|| Err("job failed".into())).with_order(0));
        queue_job(recording_job(&log, "after").with_order(1));
        flush_jobs();

        assert_eq!(*log.borrow(), vec!["after"]);
        let errors = error::take_unhandled_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "job failed");
    }

    #[test]
    fn runaway_job_hits_recursion_limit() {
        error::take_unhandled_errors();
        let runs = Rc::new(Cell::new(0usize));

        let runs_clone = runs.clone();
        let job_slot: Rc<RefCell<Option<Job>>> = Rc::new(RefCell::new(None));
        let slot_clone = job_slot.clone();
        let job = Job::new(move || {
            runs_clone.set(runs_clone.get() + 1);
            if let Some(job) = slot_clone.borrow().clone() {
                queue_job(job);
            }
            Ok(())
        });
        *job_slot.borrow_mut() = Some(job.clone());

        queue_job(job);
        flush_jobs();
        *job_slot.borrow_mut() = None;

        let limit = config::current().recursion_limit;
        assert_eq!(runs.get(), limit);
        let errors = error::take_unhandled_errors();
        assert!(matches!(&*errors[0], RuntimeError::RecursionLimit { .. }));
    }

    #[test]
    fn flush_requester_fires_once_per_pending_flush() {
        let requests = Rc::new(Cell::new(0));
        let requests_clone = requests.clone();
        set_flush_requester(Some(Rc::new(move || requests_clone.set(requests_clone.get() + 1))));

        queue_job(Job::new(|| Ok(())));
        queue_job(Job::new(|| Ok(())));
        assert_eq!(requests.get(), 1);

        flush_jobs();
        queue_job(Job::new(|| Ok(())));
        assert_eq!(requests.get(), 2);

        set_flush_requester(None);
        flush_jobs();
    }

    #[tokio::test]
    async fn next_tick_flushes_and_surfaces_errors() {
        error::take_unhandled_errors();
        let ran = Rc::new(Cell::new(false));
        let ran_clone = ran.clone();
        queue_job(Job::new(move || {
            ran_clone.set(true);
            Ok(())
        }));
        assert!(next_tick().await.is_ok());
        assert!(ran.get());

        queue_job(Job::new(|| Err("late failure".into())));
        let err = next_tick().await.expect_err("error surfaces");
        assert_eq!(err.to_string(), "late failure");
    }
}
