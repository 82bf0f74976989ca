//! In-memory queue implementation.
//!
//! All task state lives in one `QueueState` behind a mutex. Every operation
//! takes the lock, performs its transitions, collects the resulting
//! `StateChange`s and enqueues them for the observers before releasing the
//! lock. Observers are called and waiting workers woken only after that.
//! Nothing awaits while holding the lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::dependency::DependencyGraph;
use super::handle::TaskHandle;
use super::ready::ReadyQueue;
use super::record::{TaskRecord, TaskSnapshot};
use super::{CancelPolicy, QueueMode, QueueOptions};
use crate::action::{TaskAction, TaskContext};
use crate::domain::{
    CancelReason, Failure, StateChange, SubscriptionId, TaskId, TaskOutcome, TaskSpec, TaskState,
};
use crate::error::{ActionError, DispatchError};
use crate::observability::QueueCounts;
use crate::observer::ObserverRegistry;
use crate::ports::{Clock, IdGenerator, Observer, SystemClock, UlidGenerator};

/// A task handed to a worker. The worker owns the action from here on and
/// must report back through `TaskQueue::complete`.
pub struct ClaimedTask {
    pub id: TaskId,
    pub label: Option<String>,
    pub action: Box<dyn TaskAction>,
    pub context: TaskContext,
}

/// How an action ended, as observed by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionReport {
    Returned(Result<(), ActionError>),
    Panicked(String),
}

/// Result of `TaskQueue::cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task had not started and is now `Cancelled`.
    Cancelled,

    /// The task is running; its flag was raised.
    Requested,

    /// Nothing to do; the task already ended in this state.
    AlreadyTerminal(TaskState),
}

/// In-memory queue state.
struct QueueState {
    /// All task records (single source of truth).
    records: HashMap<TaskId, TaskRecord>,
    graph: DependencyGraph,
    ready: ReadyQueue,

    mode: QueueMode,
    max_concurrency: usize,

    /// Claimed tasks whose action has not returned yet. A timed-out task
    /// still holds its slot here.
    in_flight: usize,

    /// Non-terminal records, checked against `capacity`.
    live: usize,
    capacity: Option<usize>,
    cancel_policy: CancelPolicy,
    default_timeout: Option<Duration>,
    next_seq: u64,
    paused: bool,
    closed: bool,
}

impl QueueState {
    fn new(options: &QueueOptions) -> Self {
        Self {
            records: HashMap::new(),
            graph: DependencyGraph::new(),
            ready: ReadyQueue::default(),
            mode: options.mode,
            max_concurrency: options.effective_concurrency(),
            in_flight: 0,
            live: 0,
            capacity: options.capacity,
            cancel_policy: options.cancel_policy,
            default_timeout: options.default_timeout,
            next_seq: 0,
            paused: options.start_paused,
            closed: false,
        }
    }

    fn record(&self, id: TaskId) -> Result<&TaskRecord, DispatchError> {
        self.records.get(&id).ok_or(DispatchError::UnknownTask(id))
    }

    /// Pending -> Ready.
    fn make_ready(&mut self, id: TaskId, now: DateTime<Utc>, events: &mut Vec<StateChange>) {
        if self.graph.is_blocked(id) {
            return;
        }
        if let Some(rec) = self.records.get_mut(&id)
            && rec.state == TaskState::Pending
        {
            events.push(rec.mark_ready(now));
            self.ready.push(id, rec.priority, rec.seq);
        }
    }

    /// Move a live task to its terminal state. No-op for terminal tasks.
    fn settle(
        &mut self,
        id: TaskId,
        outcome: TaskOutcome,
        now: DateTime<Utc>,
        events: &mut Vec<StateChange>,
    ) {
        if let Some(rec) = self.records.get_mut(&id)
            && !rec.state.is_terminal()
        {
            events.push(rec.settle(outcome, now));
            self.live -= 1;
        }
    }

    /// `task` will never finish: apply the cancel policy to every waiting
    /// transitive dependent, naming `origin`, then drop them from the graph.
    fn propagate(
        &mut self,
        task: TaskId,
        origin: TaskId,
        now: DateTime<Utc>,
        events: &mut Vec<StateChange>,
    ) {
        let doomed = self.graph.dependents_closure(task);
        if !doomed.is_empty() {
            info!(
                task_id = %task,
                origin = %origin,
                dependents = doomed.len(),
                policy = ?self.cancel_policy,
                "propagating to dependents"
            );
        }
        for &id in &doomed {
            let waiting = self.records.get(&id).is_some_and(|r| r.state.is_waiting());
            if waiting {
                let outcome = self.cancel_policy.outcome_for(origin);
                self.settle(id, outcome, now, events);
            }
        }
        self.graph.remove(task);
        for id in doomed {
            self.graph.remove(id);
        }
    }

    fn has_waiting(&self) -> bool {
        self.records.values().any(|r| r.state.is_waiting())
    }

    fn counts(&self) -> QueueCounts {
        self.records.values().map(|r| r.state).collect()
    }
}

enum Poll {
    Claimed(ClaimedTask),
    Empty,
    Closed,
}

struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
    observers: ObserverRegistry,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

/// Shared task queue. Cheap to clone; all clones see the same tasks.
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<Shared>,
}

impl TaskQueue {
    pub fn new(options: QueueOptions) -> Result<Self, DispatchError> {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    /// Queue whose event timestamps and ids come from `clock`.
    pub fn with_clock(options: QueueOptions, clock: Arc<dyn Clock>) -> Result<Self, DispatchError> {
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self::with_ports(options, clock, ids)
    }

    pub fn with_ports(
        options: QueueOptions,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, DispatchError> {
        if options.max_concurrency == 0 {
            return Err(DispatchError::InvalidConcurrency(0));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::new(&options)),
                notify: Notify::new(),
                observers: ObserverRegistry::new(Arc::clone(&ids)),
                clock,
                ids,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // observers never run under the lock
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn now(&self) -> DateTime<Utc> {
        self.shared.clock.now()
    }

    /// Hand `events` to the observers while the lock still fixes their
    /// order, release the lock, then deliver.
    fn commit(&self, guard: MutexGuard<'_, QueueState>, events: Vec<StateChange>) {
        self.shared.observers.enqueue(events);
        drop(guard);
        self.shared.observers.flush();
    }

    /// `commit`, waking every waiting worker and idle waiter before the
    /// observers run.
    fn publish(&self, guard: MutexGuard<'_, QueueState>, events: Vec<StateChange>) {
        self.shared.observers.enqueue(events);
        drop(guard);
        self.wake();
        self.shared.observers.flush();
    }

    fn wake(&self) {
        self.shared.notify.notify_waiters();
    }

    /// Submit a task.
    ///
    /// Fails with `QueueClosed`, `Capacity` or `UnknownTask` without side
    /// effects. The task is Ready at once when none of its dependencies is
    /// still unfinished.
    pub fn submit(&self, spec: TaskSpec) -> Result<TaskHandle, DispatchError> {
        let mut guard = self.lock();
        let st = &mut *guard;
        let now = self.now();
        let mut events = Vec::new();
        if st.closed {
            return Err(DispatchError::QueueClosed);
        }
        if let Some(capacity) = st.capacity
            && st.live >= capacity
        {
            warn!(capacity, "submission rejected: queue at capacity");
            return Err(DispatchError::Capacity { capacity });
        }

        let mut unfinished = Vec::new();
        let mut doomed_by = None;
        for &dep in spec.dependencies() {
            match st.record(dep)?.state {
                TaskState::Finished => {}
                TaskState::Cancelled | TaskState::Failed => {
                    doomed_by.get_or_insert(dep);
                }
                _ => unfinished.push(dep),
            }
        }

        let id = self.shared.ids.generate_task_id();
        if doomed_by.is_none() {
            // a fresh id has no dependents, so this cannot close a cycle
            st.graph.add_edges(unfinished.iter().copied(), id)?;
        }

        let seq = st.next_seq;
        st.next_seq += 1;
        let record = TaskRecord::new(id, spec, seq, st.default_timeout, now);
        debug!(
            task_id = %id,
            label = record.label.as_deref().unwrap_or(""),
            priority = ?record.priority,
            dependencies = record.dependencies.len(),
            "task submitted"
        );
        events.push(record.submitted(now));
        let handle = record.handle();
        st.records.insert(id, record);
        st.live += 1;

        if let Some(dep) = doomed_by {
            let outcome = st.cancel_policy.outcome_for(dep);
            st.settle(id, outcome, now, &mut events);
        } else if unfinished.is_empty() {
            st.make_ready(id, now, &mut events);
        }
        self.publish(guard, events);
        Ok(handle)
    }

    /// Make `task` wait for `depends_on` as well.
    ///
    /// Only tasks that have not started accept new dependencies. A Ready task
    /// goes back to Pending when `depends_on` is unfinished. A cycle is
    /// rejected with the graph unchanged.
    pub fn add_dependency(&self, task: TaskId, depends_on: TaskId) -> Result<(), DispatchError> {
        let mut guard = self.lock();
        let st = &mut *guard;
        let now = self.now();
        let mut events = Vec::new();
        let task_state = st.record(task)?.state;
        let dep_state = st.record(depends_on)?.state;
        if !task_state.is_waiting() {
            return Err(DispatchError::AlreadyStarted(task, task_state));
        }

        match dep_state {
            TaskState::Finished => {}
            TaskState::Cancelled | TaskState::Failed => {
                let outcome = st.cancel_policy.outcome_for(depends_on);
                st.settle(task, outcome, now, &mut events);
                st.propagate(task, depends_on, now, &mut events);
            }
            _ => {
                if let Err(err) = st.graph.add_edge(depends_on, task) {
                    warn!(%err, "dependency rejected");
                    return Err(err.into());
                }
                debug!(
                    task_id = %task,
                    depends_on = %depends_on,
                    edges = st.graph.edge_count(),
                    "dependency added"
                );
                if task_state == TaskState::Ready
                    && let Some(rec) = st.records.get_mut(&task)
                {
                    events.push(rec.mark_pending(now));
                }
            }
        }

        if let Some(rec) = st.records.get_mut(&task)
            && !rec.dependencies.contains(&depends_on)
        {
            rec.dependencies.push(depends_on);
        }
        self.publish(guard, events);
        Ok(())
    }

    /// Cancel a task.
    ///
    /// Pending and Ready tasks end `Cancelled` immediately and the cancel
    /// policy is applied to their dependents. Running tasks get their flag
    /// raised and end when the action returns.
    pub fn cancel(&self, id: TaskId) -> Result<CancelOutcome, DispatchError> {
        let mut guard = self.lock();
        let st = &mut *guard;
        let now = self.now();
        let mut events = Vec::new();
        let state = st.record(id)?.state;
        let outcome = match state {
            TaskState::Pending | TaskState::Ready => {
                st.settle(
                    id,
                    TaskOutcome::Cancelled(CancelReason::Requested),
                    now,
                    &mut events,
                );
                st.propagate(id, id, now, &mut events);
                info!(task_id = %id, "task cancelled before start");
                CancelOutcome::Cancelled
            }
            TaskState::Running => {
                if let Some(rec) = st.records.get_mut(&id)
                    && !rec.cancel_requested
                {
                    rec.cancel_requested = true;
                    rec.cancel.raise();
                    info!(task_id = %id, "cancellation requested for running task");
                }
                CancelOutcome::Requested
            }
            state => CancelOutcome::AlreadyTerminal(state),
        };
        self.publish(guard, events);
        Ok(outcome)
    }

    /// Cancel every non-terminal task. Returns how many were affected.
    pub fn cancel_all(&self) -> usize {
        let mut guard = self.lock();
        let st = &mut *guard;
        let now = self.now();
        let mut events = Vec::new();
        let mut live: Vec<(u64, TaskId, TaskState)> = st
            .records
            .values()
            .filter(|r| !r.state.is_terminal())
            .map(|r| (r.seq, r.id, r.state))
            .collect();
        live.sort_unstable_by_key(|(seq, _, _)| *seq);

        for &(_, id, state) in &live {
            if state == TaskState::Running {
                if let Some(rec) = st.records.get_mut(&id) {
                    rec.cancel_requested = true;
                    rec.cancel.raise();
                }
            } else {
                st.settle(
                    id,
                    TaskOutcome::Cancelled(CancelReason::Requested),
                    now,
                    &mut events,
                );
            }
            st.graph.remove(id);
        }
        let affected = live.len();
        if affected > 0 {
            info!(affected, "cancelled all live tasks");
        }
        self.publish(guard, events);
        affected
    }

    /// Change the concurrency limit of a concurrent queue. Returns the
    /// previous limit.
    pub fn set_max_concurrency(&self, n: usize) -> Result<usize, DispatchError> {
        if n == 0 {
            return Err(DispatchError::InvalidConcurrency(n));
        }
        let previous = {
            let mut st = self.lock();
            if st.mode == QueueMode::Serial {
                return Err(DispatchError::SerialQueue);
            }
            std::mem::replace(&mut st.max_concurrency, n)
        };
        if previous != n {
            info!(previous, current = n, "max concurrency changed");
        }
        self.wake();
        Ok(previous)
    }

    pub fn max_concurrency(&self) -> usize {
        self.lock().max_concurrency
    }

    pub fn mode(&self) -> QueueMode {
        self.lock().mode
    }

    /// Stop handing out tasks. Submissions and cancellations still work and
    /// running tasks continue.
    pub fn pause(&self) {
        self.lock().paused = true;
        debug!("queue paused");
    }

    pub fn resume(&self) {
        self.lock().paused = false;
        debug!("queue resumed");
        self.wake();
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Reject further submissions. Workers exit once nothing is waiting.
    pub fn close(&self) {
        self.lock().closed = true;
        debug!("queue closed");
        self.wake();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Claim the next Ready task, waiting until one is available.
    ///
    /// Returns `None` once the queue is closed and no task is left waiting.
    pub async fn claim(&self) -> Option<ClaimedTask> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            // register before checking so a wake-up in between is not lost
            notified.as_mut().enable();

            match self.try_claim() {
                Poll::Claimed(task) => return Some(task),
                Poll::Closed => return None,
                Poll::Empty => notified.await,
            }
        }
    }

    /// Ready -> Running for the highest-priority, earliest-submitted Ready
    /// task, if the concurrency limit allows.
    fn try_claim(&self) -> Poll {
        let mut guard = self.lock();
        let st = &mut *guard;
        let now = self.now();
        let mut events = Vec::new();
        let mut claimed = None;
        if !st.paused && st.in_flight < st.max_concurrency {
            while let Some(entry) = st.ready.pop() {
                let Some(rec) = st.records.get_mut(&entry.task_id) else {
                    continue;
                };
                // stale entry: cancelled or demoted since it was pushed
                if rec.state != TaskState::Ready {
                    continue;
                }
                let Some(action) = rec.action.take() else {
                    continue;
                };
                events.push(rec.start(now));
                if let Some(timeout) = rec.timeout {
                    rec.timer = Some(self.arm_timeout(rec.id, timeout));
                }
                let context = TaskContext::new(rec.id, rec.label.clone(), rec.cancel.signal());
                claimed = Some(ClaimedTask {
                    id: rec.id,
                    label: rec.label.clone(),
                    action,
                    context,
                });
                st.in_flight += 1;
                break;
            }
        }
        let poll = match claimed {
            Some(task) => {
                debug!(task_id = %task.id, in_flight = st.in_flight, "task claimed");
                Poll::Claimed(task)
            }
            None if st.closed && !st.has_waiting() => Poll::Closed,
            None => Poll::Empty,
        };
        // a claim frees nothing, so no one else needs waking
        self.commit(guard, events);
        poll
    }

    fn arm_timeout(&self, id: TaskId, timeout: Duration) -> tokio::task::AbortHandle {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = shared.upgrade() {
                TaskQueue { shared }.expire(id, timeout);
            }
        })
        .abort_handle()
    }

    /// Advisory timeout elapsed: a still-running task is marked cancelled and
    /// its flag raised. The slot stays taken until the action returns.
    fn expire(&self, id: TaskId, timeout: Duration) {
        let mut guard = self.lock();
        let st = &mut *guard;
        let now = self.now();
        let mut events = Vec::new();
        let Some(rec) = st.records.get_mut(&id) else {
            return;
        };
        if rec.state != TaskState::Running {
            return;
        }
        rec.cancel.raise();
        // the timer is this task; settling must not abort it mid-flight
        rec.timer = None;
        warn!(task_id = %id, timeout_ms = timeout.as_millis() as u64, "task timed out");
        st.settle(
            id,
            TaskOutcome::Cancelled(CancelReason::TimedOut),
            now,
            &mut events,
        );
        st.propagate(id, id, now, &mut events);
        self.publish(guard, events);
    }

    /// Report the end of a claimed task's action and free its slot.
    ///
    /// Dependents become Ready when the task finished; otherwise the cancel
    /// policy is applied to them. If the task already ended through a
    /// timeout, only the slot is freed.
    pub fn complete(&self, id: TaskId, report: ActionReport) {
        let mut guard = self.lock();
        let st = &mut *guard;
        let now = self.now();
        let mut events = Vec::new();
        st.in_flight = st.in_flight.saturating_sub(1);

        match st.records.get(&id) {
            Some(rec) if rec.state == TaskState::Running => {
                let outcome = if rec.cancel_requested {
                    TaskOutcome::Cancelled(CancelReason::Requested)
                } else {
                    outcome_of(report)
                };
                match &outcome {
                    TaskOutcome::Finished => debug!(task_id = %id, "task finished"),
                    TaskOutcome::Cancelled(reason) => {
                        info!(task_id = %id, ?reason, "task cancelled")
                    }
                    TaskOutcome::Failed(failure) => {
                        warn!(task_id = %id, %failure, "task failed")
                    }
                }
                let finished = outcome.is_finished();
                st.settle(id, outcome, now, &mut events);
                if finished {
                    for next in st.graph.on_finished(id) {
                        st.make_ready(next, now, &mut events);
                    }
                } else {
                    st.propagate(id, id, now, &mut events);
                }
            }
            Some(rec) => {
                debug!(task_id = %id, state = %rec.state, "late result discarded");
            }
            None => {
                debug!(task_id = %id, "result for released task discarded");
            }
        }
        self.publish(guard, events);
    }

    /// Wait until no task is live and no action is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let st = self.lock();
                if st.live == 0 && st.in_flight == 0 {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Drop a terminal task's record.
    pub fn release(&self, id: TaskId) -> Result<TaskSnapshot, DispatchError> {
        let mut guard = self.lock();
        let st = &mut *guard;
        let state = st.record(id)?.state;
        if !state.is_terminal() {
            return Err(DispatchError::NotTerminal(id, state));
        }
        st.graph.remove(id);
        let rec = st.records.remove(&id).ok_or(DispatchError::UnknownTask(id))?;
        Ok(rec.snapshot())
    }

    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.lock().records.get(&id).map(|r| r.state)
    }

    pub fn snapshot(&self, id: TaskId) -> Option<TaskSnapshot> {
        self.lock().records.get(&id).map(TaskRecord::snapshot)
    }

    /// Snapshots of every known task in submission order.
    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        let st = self.lock();
        let mut records: Vec<&TaskRecord> = st.records.values().collect();
        records.sort_unstable_by_key(|r| r.seq);
        records.into_iter().map(TaskRecord::snapshot).collect()
    }

    /// Handle for an already submitted task.
    pub fn handle(&self, id: TaskId) -> Option<TaskHandle> {
        self.lock().records.get(&id).map(TaskRecord::handle)
    }

    /// Unresolved dependencies of a task.
    pub fn waiting_on(&self, id: TaskId) -> Vec<TaskId> {
        self.lock().graph.waiting_on(id)
    }

    pub fn counts(&self) -> QueueCounts {
        self.lock().counts()
    }

    /// Claimed tasks whose action has not returned yet.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> SubscriptionId {
        self.shared.observers.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.observers.unsubscribe(id)
    }
}

fn outcome_of(report: ActionReport) -> TaskOutcome {
    match report {
        ActionReport::Returned(Ok(())) => TaskOutcome::Finished,
        ActionReport::Returned(Err(ActionError::Cancelled)) => {
            TaskOutcome::Cancelled(CancelReason::ActionCancelled)
        }
        ActionReport::Returned(Err(ActionError::Failed(message))) => {
            TaskOutcome::Failed(Failure::Action(message))
        }
        ActionReport::Panicked(message) => TaskOutcome::Failed(Failure::Panicked(message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DependencyCancelledError, Priority};
    use crate::observer::ChannelObserver;
    use std::time::Duration;

    fn noop() -> TaskSpec {
        TaskSpec::from_fn(|_ctx| async { Ok(()) })
    }

    fn queue(options: QueueOptions) -> TaskQueue {
        TaskQueue::new(options).unwrap()
    }

    /// Claim without blocking; test helper around `try_claim`.
    fn claim_now(q: &TaskQueue) -> Option<ClaimedTask> {
        match q.try_claim() {
            Poll::Claimed(task) => Some(task),
            _ => None,
        }
    }

    fn finish(q: &TaskQueue, task: &ClaimedTask) {
        q.complete(task.id, ActionReport::Returned(Ok(())));
    }

    #[tokio::test]
    async fn submit_without_dependencies_is_ready() {
        let q = queue(QueueOptions::concurrent(2));

        let h = q.submit(noop()).unwrap();

        assert_eq!(q.state(h.id()), Some(TaskState::Ready));
        assert_eq!(q.counts().ready, 1);
    }

    #[tokio::test]
    async fn dependent_waits_until_dependency_finishes() {
        let q = queue(QueueOptions::concurrent(2));
        let a = q.submit(noop().label("a")).unwrap();
        let b = q.submit(noop().label("b").depends_on(a.id())).unwrap();
        assert_eq!(q.state(b.id()), Some(TaskState::Pending));

        let claimed = claim_now(&q).unwrap();
        assert_eq!(claimed.id, a.id());
        // b is not claimable while a runs
        assert!(claim_now(&q).is_none());

        finish(&q, &claimed);

        assert_eq!(q.state(b.id()), Some(TaskState::Ready));
        assert_eq!(claim_now(&q).unwrap().id, b.id());
    }

    #[tokio::test]
    async fn finished_dependency_does_not_block() {
        let q = queue(QueueOptions::concurrent(1));
        let a = q.submit(noop()).unwrap();
        let claimed = claim_now(&q).unwrap();
        finish(&q, &claimed);

        let b = q.submit(noop().depends_on(a.id())).unwrap();

        assert_eq!(q.state(b.id()), Some(TaskState::Ready));
    }

    #[tokio::test]
    async fn unknown_dependency_is_rejected() {
        let q = queue(QueueOptions::concurrent(1));
        let ghost = TaskId::from_ulid(ulid::Ulid::new());

        let err = q.submit(noop().depends_on(ghost)).unwrap_err();

        assert!(matches!(err, DispatchError::UnknownTask(id) if id == ghost));
        assert_eq!(q.counts().total(), 0);
    }

    #[tokio::test]
    async fn capacity_counts_only_live_tasks() {
        let q = queue(QueueOptions {
            capacity: Some(1),
            ..QueueOptions::concurrent(1)
        });
        let a = q.submit(noop()).unwrap();

        let err = q.submit(noop()).unwrap_err();
        assert!(matches!(err, DispatchError::Capacity { capacity: 1 }));

        q.cancel(a.id()).unwrap();
        assert!(q.submit(noop()).is_ok());
    }

    #[tokio::test]
    async fn closed_queue_rejects_submissions() {
        let q = queue(QueueOptions::concurrent(1));
        q.close();

        assert!(matches!(q.submit(noop()), Err(DispatchError::QueueClosed)));
    }

    #[tokio::test]
    async fn cycle_through_add_dependency_is_rejected_unchanged() {
        let q = queue(QueueOptions::concurrent(1));
        q.pause();
        let a = q.submit(noop()).unwrap();
        let b = q.submit(noop().depends_on(a.id())).unwrap();

        let err = q.add_dependency(a.id(), b.id()).unwrap_err();

        match err {
            DispatchError::Cycle(cycle) => assert_eq!(cycle.path, vec![b.id(), a.id(), b.id()]),
            other => panic!("expected cycle, got {other:?}"),
        }
        assert_eq!(q.state(a.id()), Some(TaskState::Ready));
        assert!(q.waiting_on(a.id()).is_empty());
        assert_eq!(q.waiting_on(b.id()), vec![a.id()]);
    }

    #[tokio::test]
    async fn self_dependency_is_a_cycle() {
        let q = queue(QueueOptions::concurrent(1));
        let a = q.submit(noop()).unwrap();

        let err = q.add_dependency(a.id(), a.id()).unwrap_err();

        assert!(matches!(err, DispatchError::Cycle(_)));
        assert_eq!(q.state(a.id()), Some(TaskState::Ready));
    }

    #[tokio::test]
    async fn add_dependency_demotes_ready_task() {
        let q = queue(QueueOptions::concurrent(2));
        q.pause();
        let a = q.submit(noop()).unwrap();
        let b = q.submit(noop()).unwrap();

        q.add_dependency(b.id(), a.id()).unwrap();

        assert_eq!(q.state(b.id()), Some(TaskState::Pending));
        assert_eq!(q.snapshot(b.id()).unwrap().dependencies, vec![a.id()]);

        q.resume();
        let first = claim_now(&q).unwrap();
        assert_eq!(first.id, a.id());
        // b's stale ready entry is skipped
        assert!(claim_now(&q).is_none());
    }

    #[tokio::test]
    async fn add_dependency_to_running_task_fails() {
        let q = queue(QueueOptions::concurrent(2));
        let a = q.submit(noop()).unwrap();
        let b = q.submit(noop()).unwrap();
        let _running = claim_now(&q).unwrap();

        let err = q.add_dependency(a.id(), b.id()).unwrap_err();

        assert!(matches!(
            err,
            DispatchError::AlreadyStarted(id, TaskState::Running) if id == a.id()
        ));
    }

    #[tokio::test]
    async fn cancelling_pending_task_cascades() {
        let q = queue(QueueOptions::concurrent(1));
        q.pause();
        let a = q.submit(noop()).unwrap();
        let b = q.submit(noop().depends_on(a.id())).unwrap();
        let c = q.submit(noop().depends_on(b.id())).unwrap();

        assert_eq!(q.cancel(a.id()).unwrap(), CancelOutcome::Cancelled);

        assert_eq!(q.state(b.id()), Some(TaskState::Cancelled));
        assert_eq!(
            c.outcome(),
            Some(TaskOutcome::Cancelled(CancelReason::DependencyCancelled {
                dependency: a.id()
            }))
        );
        q.resume();
        assert!(claim_now(&q).is_none());
    }

    #[tokio::test]
    async fn fail_fast_marks_dependents_failed() {
        let q = queue(QueueOptions {
            cancel_policy: CancelPolicy::FailFast,
            ..QueueOptions::concurrent(1)
        });
        let a = q.submit(noop()).unwrap();
        let b = q.submit(noop().depends_on(a.id())).unwrap();
        let claimed = claim_now(&q).unwrap();

        q.complete(
            claimed.id,
            ActionReport::Returned(Err(ActionError::failed("boom"))),
        );

        assert_eq!(
            a.outcome(),
            Some(TaskOutcome::Failed(Failure::Action("boom".into())))
        );
        assert_eq!(
            b.outcome(),
            Some(TaskOutcome::Failed(Failure::DependencyCancelled(
                DependencyCancelledError { dependency: a.id() }
            )))
        );
    }

    #[tokio::test]
    async fn submitting_after_dependency_was_cancelled_applies_policy() {
        let q = queue(QueueOptions::concurrent(1));
        let a = q.submit(noop()).unwrap();
        q.cancel(a.id()).unwrap();

        let b = q.submit(noop().depends_on(a.id())).unwrap();

        assert_eq!(q.state(b.id()), Some(TaskState::Cancelled));
    }

    #[tokio::test]
    async fn cancelling_running_task_raises_flag() {
        let q = queue(QueueOptions::concurrent(1));
        let a = q.submit(noop()).unwrap();
        let claimed = claim_now(&q).unwrap();

        assert_eq!(q.cancel(a.id()).unwrap(), CancelOutcome::Requested);
        assert!(claimed.context.is_cancelled());
        assert_eq!(q.state(a.id()), Some(TaskState::Running));

        // the action ignored the flag and returned Ok
        finish(&q, &claimed);

        assert_eq!(
            a.wait().await.unwrap(),
            TaskOutcome::Cancelled(CancelReason::Requested)
        );
        assert_eq!(
            q.cancel(a.id()).unwrap(),
            CancelOutcome::AlreadyTerminal(TaskState::Cancelled)
        );
    }

    #[tokio::test]
    async fn serial_queue_claims_one_at_a_time() {
        let q = queue(QueueOptions::serial());
        q.submit(noop()).unwrap();
        q.submit(noop()).unwrap();

        let first = claim_now(&q).unwrap();
        assert!(claim_now(&q).is_none());
        finish(&q, &first);
        assert!(claim_now(&q).is_some());
    }

    #[tokio::test]
    async fn serial_queue_rejects_concurrency_change() {
        let q = queue(QueueOptions::serial());

        assert!(matches!(
            q.set_max_concurrency(4),
            Err(DispatchError::SerialQueue)
        ));
        assert!(matches!(
            q.set_max_concurrency(0),
            Err(DispatchError::InvalidConcurrency(0))
        ));
        assert_eq!(q.max_concurrency(), 1);
    }

    #[tokio::test]
    async fn raising_concurrency_allows_more_claims() {
        let q = queue(QueueOptions::concurrent(1));
        for _ in 0..3 {
            q.submit(noop()).unwrap();
        }
        let _a = claim_now(&q).unwrap();
        assert!(claim_now(&q).is_none());

        assert_eq!(q.set_max_concurrency(3).unwrap(), 1);

        assert!(claim_now(&q).is_some());
        assert!(claim_now(&q).is_some());
        assert_eq!(q.in_flight(), 3);
    }

    #[tokio::test]
    async fn priority_then_submission_order() {
        let q = queue(QueueOptions::concurrent(8));
        q.pause();
        let low = q.submit(noop().priority(Priority::Low)).unwrap();
        let d1 = q.submit(noop()).unwrap();
        let high = q.submit(noop().priority(Priority::High)).unwrap();
        let d2 = q.submit(noop()).unwrap();
        q.resume();

        let order: Vec<TaskId> = std::iter::from_fn(|| claim_now(&q).map(|t| t.id)).collect();

        assert_eq!(order, vec![high.id(), d1.id(), d2.id(), low.id()]);
    }

    #[tokio::test]
    async fn paused_queue_hands_out_nothing() {
        let q = queue(QueueOptions {
            start_paused: true,
            ..QueueOptions::concurrent(2)
        });
        q.submit(noop()).unwrap();

        assert!(q.is_paused());
        assert!(claim_now(&q).is_none());

        q.resume();
        assert!(claim_now(&q).is_some());
    }

    #[tokio::test]
    async fn panic_report_becomes_failure() {
        let q = queue(QueueOptions::concurrent(1));
        let a = q.submit(noop()).unwrap();
        let claimed = claim_now(&q).unwrap();

        q.complete(claimed.id, ActionReport::Panicked("oops".into()));

        assert_eq!(
            a.outcome(),
            Some(TaskOutcome::Failed(Failure::Panicked("oops".into())))
        );
        assert_eq!(q.in_flight(), 0);
    }

    #[tokio::test]
    async fn timeout_cancels_but_keeps_slot() {
        let q = queue(QueueOptions::concurrent(1));
        let a = q
            .submit(noop().timeout(Duration::from_millis(20)))
            .unwrap();
        q.submit(noop()).unwrap();
        let claimed = claim_now(&q).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(1), a.wait())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(outcome, TaskOutcome::Cancelled(CancelReason::TimedOut));
        assert!(claimed.context.is_cancelled());
        // slot is still held by the timed-out action
        assert!(claim_now(&q).is_none());

        finish(&q, &claimed);
        assert_eq!(q.state(a.id()), Some(TaskState::Cancelled));
        assert!(claim_now(&q).is_some());
    }

    #[tokio::test]
    async fn release_requires_terminal_state() {
        let q = queue(QueueOptions::concurrent(1));
        let a = q.submit(noop()).unwrap();

        assert!(matches!(
            q.release(a.id()),
            Err(DispatchError::NotTerminal(_, TaskState::Ready))
        ));

        let claimed = claim_now(&q).unwrap();
        finish(&q, &claimed);
        let snapshot = q.release(a.id()).unwrap();

        assert_eq!(snapshot.state, TaskState::Finished);
        assert_eq!(q.state(a.id()), None);
        assert!(matches!(
            q.release(a.id()),
            Err(DispatchError::UnknownTask(_))
        ));
    }

    #[tokio::test]
    async fn cancel_all_settles_waiting_and_flags_running() {
        let q = queue(QueueOptions::concurrent(1));
        let a = q.submit(noop()).unwrap();
        let b = q.submit(noop()).unwrap();
        let c = q.submit(noop().depends_on(b.id())).unwrap();
        let claimed = claim_now(&q).unwrap();

        assert_eq!(q.cancel_all(), 3);

        assert!(claimed.context.is_cancelled());
        assert_eq!(q.state(a.id()), Some(TaskState::Running));
        assert_eq!(q.state(b.id()), Some(TaskState::Cancelled));
        assert_eq!(q.state(c.id()), Some(TaskState::Cancelled));
    }

    #[tokio::test]
    async fn observers_see_transitions_in_order() {
        let q = queue(QueueOptions::concurrent(1));
        let (observer, mut rx) = ChannelObserver::channel();
        let sub = q.subscribe(Arc::new(observer));

        let a = q.submit(noop()).unwrap();
        let claimed = claim_now(&q).unwrap();
        finish(&q, &claimed);
        assert!(q.unsubscribe(sub));

        let mut seen = Vec::new();
        while let Ok(change) = rx.try_recv() {
            assert_eq!(change.task_id, a.id());
            seen.push((change.from, change.to));
        }
        assert_eq!(
            seen,
            vec![
                (None, TaskState::Pending),
                (Some(TaskState::Pending), TaskState::Ready),
                (Some(TaskState::Ready), TaskState::Running),
                (Some(TaskState::Running), TaskState::Finished),
            ]
        );
    }

    #[tokio::test]
    async fn claim_returns_none_when_closed_and_drained() {
        let q = queue(QueueOptions::concurrent(1));
        q.close();

        let claimed = tokio::time::timeout(Duration::from_secs(1), q.claim())
            .await
            .unwrap();

        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn wait_idle_returns_after_last_completion() {
        let q = queue(QueueOptions::concurrent(1));
        q.submit(noop()).unwrap();
        let claimed = q.claim().await.unwrap();

        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        finish(&q, &claimed);

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn add_dependency_on_cancelled_task_cascades_to_own_dependents() {
        let q = queue(QueueOptions::concurrent(1));
        q.pause();
        let a = q.submit(noop()).unwrap();
        let b = q.submit(noop()).unwrap();
        let c = q.submit(noop().depends_on(b.id())).unwrap();
        q.cancel(a.id()).unwrap();

        q.add_dependency(b.id(), a.id()).unwrap();

        let expected = TaskOutcome::Cancelled(CancelReason::DependencyCancelled {
            dependency: a.id(),
        });
        assert_eq!(b.outcome(), Some(expected.clone()));
        assert_eq!(c.outcome(), Some(expected));
        assert_eq!(q.snapshot(b.id()).unwrap().dependencies, vec![a.id()]);
        q.resume();
        assert!(claim_now(&q).is_none());
    }

    #[tokio::test]
    async fn add_dependency_on_failed_task_fails_fast() {
        let q = queue(QueueOptions {
            cancel_policy: CancelPolicy::FailFast,
            ..QueueOptions::concurrent(1)
        });
        let a = q.submit(noop()).unwrap();
        let claimed = claim_now(&q).unwrap();
        q.complete(
            claimed.id,
            ActionReport::Returned(Err(ActionError::failed("boom"))),
        );
        q.pause();
        let b = q.submit(noop()).unwrap();
        let c = q.submit(noop().depends_on(b.id())).unwrap();

        q.add_dependency(b.id(), a.id()).unwrap();

        let expected = TaskOutcome::Failed(Failure::DependencyCancelled(
            DependencyCancelledError { dependency: a.id() },
        ));
        assert_eq!(b.outcome(), Some(expected.clone()));
        assert_eq!(c.outcome(), Some(expected));
        assert_eq!(q.counts().failed, 3);
    }

    #[tokio::test]
    async fn timeout_cascades_to_dependents() {
        let q = queue(QueueOptions::concurrent(1));
        let a = q
            .submit(noop().timeout(Duration::from_millis(20)))
            .unwrap();
        let b = q.submit(noop().depends_on(a.id())).unwrap();
        let c = q.submit(noop().depends_on(b.id())).unwrap();
        let claimed = claim_now(&q).unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(1), c.wait())
            .await
            .unwrap()
            .unwrap();

        let expected = TaskOutcome::Cancelled(CancelReason::DependencyCancelled {
            dependency: a.id(),
        });
        assert_eq!(outcome, expected);
        assert_eq!(b.outcome(), Some(expected));

        // a late Ok neither revives a nor releases its dependents
        finish(&q, &claimed);
        assert_eq!(
            a.outcome(),
            Some(TaskOutcome::Cancelled(CancelReason::TimedOut))
        );
        assert!(claim_now(&q).is_none());
        assert_eq!(q.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancelled_running_task_cascades_once_action_returns() {
        let q = queue(QueueOptions::concurrent(2));
        let a = q.submit(noop()).unwrap();
        let b = q.submit(noop().depends_on(a.id())).unwrap();
        let c = q.submit(noop().depends_on(b.id())).unwrap();
        let claimed = claim_now(&q).unwrap();

        assert_eq!(q.cancel(a.id()).unwrap(), CancelOutcome::Requested);
        // dependents keep waiting until the action returns
        assert_eq!(q.state(b.id()), Some(TaskState::Pending));
        assert_eq!(q.state(c.id()), Some(TaskState::Pending));

        q.complete(
            claimed.id,
            ActionReport::Returned(Err(ActionError::Cancelled)),
        );

        let expected = TaskOutcome::Cancelled(CancelReason::DependencyCancelled {
            dependency: a.id(),
        });
        assert_eq!(
            a.outcome(),
            Some(TaskOutcome::Cancelled(CancelReason::Requested))
        );
        assert_eq!(b.outcome(), Some(expected.clone()));
        assert_eq!(c.outcome(), Some(expected));
        assert!(claim_now(&q).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_observer_sees_each_task_in_transition_order() {
        let q = queue(QueueOptions::concurrent(1));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        q.subscribe(Arc::new(move |change: &StateChange| {
            if change.from.is_none() {
                // hold up the submitting thread while a worker races ahead
                std::thread::sleep(Duration::from_millis(100));
            }
            log.lock().unwrap().push((change.from, change.to, change.at));
        }));

        let worker = {
            let q = q.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                let claimed = q.claim().await.unwrap();
                q.complete(claimed.id, ActionReport::Returned(Ok(())));
            })
        };
        let submitter = {
            let q = q.clone();
            tokio::task::spawn_blocking(move || q.submit(noop()).unwrap())
        };
        let handle = submitter.await.unwrap();
        worker.await.unwrap();

        assert_eq!(handle.outcome(), Some(TaskOutcome::Finished));
        let seen = seen.lock().unwrap();
        let transitions: Vec<_> = seen.iter().map(|(from, to, _)| (*from, *to)).collect();
        assert_eq!(
            transitions,
            vec![
                (None, TaskState::Pending),
                (Some(TaskState::Pending), TaskState::Ready),
                (Some(TaskState::Ready), TaskState::Running),
                (Some(TaskState::Running), TaskState::Finished),
            ]
        );
        assert!(seen.windows(2).all(|w| w[0].2 <= w[1].2));
    }
}
