//! Scheduler core: task table, dispatch, tick processing, block/wake.
//!
//! The kernel is a single-processor, priority-preemptive scheduler. A task's
//! body is a non-terminating future; the future is the task's saved
//! execution context and its size is charged against the task's declared
//! stack budget at creation. Suspension points are exactly the kernel
//! primitives (`take`, `send`, `receive`, [`Kernel::sleep`],
//! [`Kernel::yield_now`]); whenever any task reaches one, the dispatcher
//! selects the highest-priority ready task, so a higher-priority task
//! becoming ready preempts the current one at its current suspension point.
//!
//! All kernel and primitive state is mutated inside short critical sections
//! (index arithmetic and item copies only). Task futures are polled outside
//! any critical section.

use core::cell::UnsafeCell;
use core::convert::Infallible;
use core::future::{poll_fn, Future};
use core::pin::Pin;
use core::task::{Context, Poll};

use alloc::boxed::Box;

use futures_util::task::noop_waker;
use portable_atomic::{AtomicBool, Ordering};

use crate::queue::{Queue, QueueState};
use crate::semaphore::{SemState, Semaphore};
use crate::task::{Priority, TaskId, TaskState, Tcb, WaitSite, WakeReason};

use nanokern_common::ring::ItemRing;

/// Capacity of the task table.
pub const MAX_TASKS: usize = 16;

/// Capacity of the semaphore pool.
pub const MAX_SEMAPHORES: usize = 8;

/// Capacity of the queue pool.
pub const MAX_QUEUES: usize = 8;

/// Errors reported synchronously when creating a task, semaphore or queue.
///
/// Creation is never retried internally; the caller must shed load or
/// enlarge the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum CreateError {
    /// A fixed-capacity pool (task table, stack budget, semaphore or queue
    /// pool) has no room left.
    ResourceExhausted,
    /// Malformed creation parameters, e.g. a zero queue capacity.
    InvalidArgument,
}

type TaskFuture = Pin<Box<dyn Future<Output = Infallible>>>;

/// Storage slot for one task's saved execution context.
///
/// Touched only by `spawn` (while the slot is free) and by the single
/// dispatcher, so it needs no critical section.
struct ContextSlot(UnsafeCell<Option<TaskFuture>>);

/// The kernel: task scheduling plus the semaphore and queue pools.
///
/// Intended to live in a `static` (see [`make_kernel!`](crate::make_kernel));
/// handles returned by the `create_*` methods borrow it for `'static` and
/// are freely copyable between tasks.
///
/// ```
/// use nanokern::{make_kernel, Priority, Timeout};
///
/// let kernel = make_kernel!();
/// let ready = kernel.create_semaphore().unwrap();
///
/// kernel
///     .spawn("worker", Priority::new(2), 256, async move {
///         loop {
///             let _ = ready.take(Timeout::Forever).await;
///         }
///     })
///     .unwrap();
///
/// ready.give();
/// kernel.run(1);
/// ```
pub struct Kernel {
    state: UnsafeCell<KernelState>,
    contexts: [ContextSlot; MAX_TASKS],
    /// Guards against a task body re-entering the dispatcher.
    stepping: AtomicBool,
}

// SAFETY: `state` is only accessed inside critical sections and `contexts`
// only by the single dispatcher (enforced by `stepping`) or by `spawn` on a
// slot no dispatcher can be polling.
unsafe impl Send for Kernel {}
unsafe impl Sync for Kernel {}

impl Kernel {
    /// Create an empty kernel.
    pub const fn new() -> Self {
        Self {
            state: UnsafeCell::new(KernelState {
                tasks: [const { None }; MAX_TASKS],
                semaphores: [const { None }; MAX_SEMAPHORES],
                queues: [const { None }; MAX_QUEUES],
                now: 0,
                seq: 0,
                running: None,
            }),
            contexts: [const { ContextSlot(UnsafeCell::new(None)) }; MAX_TASKS],
            stepping: AtomicBool::new(false),
        }
    }

    /// Run `f` on the kernel state inside a critical section.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut KernelState) -> R) -> R {
        critical_section::with(|_| {
            // SAFETY: all access to the state goes through this critical
            // section, so the mutable reference is exclusive.
            f(unsafe { &mut *self.state.get() })
        })
    }

    /// Register a new task in the Ready state.
    ///
    /// `body` is the task's non-terminating loop; it becomes the task's
    /// saved execution context and must fit within `stack_budget` bytes.
    /// `name` is diagnostic only. Fails with
    /// [`CreateError::ResourceExhausted`] if the task table is full or the
    /// context does not fit the budget.
    pub fn spawn<F>(
        &'static self,
        name: &'static str,
        priority: Priority,
        stack_budget: usize,
        body: F,
    ) -> Result<TaskId, CreateError>
    where
        F: Future<Output = Infallible> + 'static,
    {
        let context_size = core::mem::size_of::<F>();
        if context_size > stack_budget {
            return Err(CreateError::ResourceExhausted);
        }

        // Box outside the critical section; only the table insert is inside.
        let fut: TaskFuture = Box::pin(body);

        self.with_state(|ks| {
            let slot = ks
                .tasks
                .iter()
                .position(Option::is_none)
                .ok_or(CreateError::ResourceExhausted)?;

            let seq = ks.next_seq();
            ks.tasks[slot] = Some(Tcb {
                name,
                priority,
                state: TaskState::Ready,
                ready_seq: seq,
                blocked_on: None,
                deadline: None,
                wake: None,
                stack_budget,
                stack_used: context_size,
            });

            // SAFETY: the slot was free, so no dispatcher poll can touch it.
            unsafe { *self.contexts[slot].0.get() = Some(fut) };

            Ok(TaskId(slot as u8))
        })
    }

    /// Register a new binary semaphore, initially unavailable.
    pub fn create_semaphore(&'static self) -> Result<Semaphore, CreateError> {
        self.with_state(|ks| {
            let index = ks
                .semaphores
                .iter()
                .position(Option::is_none)
                .ok_or(CreateError::ResourceExhausted)?;
            ks.semaphores[index] = Some(SemState::new());
            Ok(Semaphore {
                kernel: self,
                index,
            })
        })
    }

    /// Register a new bounded queue of `capacity` items of `item_size`
    /// bytes each.
    pub fn create_queue(
        &'static self,
        capacity: usize,
        item_size: usize,
    ) -> Result<Queue, CreateError> {
        if capacity == 0 || item_size == 0 {
            return Err(CreateError::InvalidArgument);
        }

        // Allocate storage outside the critical section.
        let ring = ItemRing::new(capacity, item_size);

        self.with_state(|ks| {
            let index = ks
                .queues
                .iter()
                .position(Option::is_none)
                .ok_or(CreateError::ResourceExhausted)?;
            ks.queues[index] = Some(QueueState::new(ring));
            Ok(Queue {
                kernel: self,
                index,
            })
        })
    }

    /// Dispatch once: select the highest-priority Ready task (FIFO among
    /// equals) and run it to its next suspension point.
    ///
    /// Returns the task that ran, or `None` if no task is Ready.
    ///
    /// # Panics
    ///
    /// Panics if re-entered from within a task body, or if the polled task
    /// suspends outside a kernel primitive. Both are kernel contract
    /// violations and fatal.
    pub fn step(&'static self) -> Option<TaskId> {
        assert!(
            !self.stepping.swap(true, Ordering::Acquire),
            "dispatcher re-entered from within a task"
        );

        let picked = self.with_state(|ks| ks.pick_next());
        let Some(id) = picked else {
            self.stepping.store(false, Ordering::Release);
            return None;
        };

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        // SAFETY: `stepping` guarantees we are the only dispatcher, and the
        // slot holds a context for as long as its task exists.
        let fut = unsafe {
            (*self.contexts[id.index()].0.get())
                .as_mut()
                .expect("task context missing")
        };

        // Poll outside any critical section; the primitives inside the task
        // body open their own.
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(never) => match never {},
            Poll::Pending => {}
        }

        self.with_state(|ks| ks.retire(id));
        self.stepping.store(false, Ordering::Release);
        Some(id)
    }

    /// Dispatch until no task is Ready. Returns the number of dispatches.
    ///
    /// Diverges if some task yields without ever blocking.
    pub fn run_until_idle(&'static self) -> u32 {
        let mut polls = 0;
        while self.step().is_some() {
            polls += 1;
        }
        polls
    }

    /// Convenience driver: alternate [`Kernel::run_until_idle`] and
    /// [`Kernel::on_tick`], `ticks` times.
    pub fn run(&'static self, ticks: u64) {
        for _ in 0..ticks {
            self.run_until_idle();
            self.on_tick();
        }
    }

    /// Advance the tick clock by one and expire deadlines.
    ///
    /// Called once per tick by the external clock source. Every blocked
    /// task whose deadline has arrived is removed from its wait list and
    /// resumed with a timed-out outcome. A wake delivered by a primitive
    /// removes the task from its wait list immediately, so a wake and a
    /// timeout landing on the same tick resolve in favor of the wake.
    pub fn on_tick(&self) {
        self.with_state(|ks| {
            ks.now += 1;
            let now = ks.now;

            for index in 0..MAX_TASKS {
                let expired = matches!(
                    &ks.tasks[index],
                    Some(t) if t.state == TaskState::Blocked
                        && matches!(t.deadline, Some(d) if d <= now)
                );
                if expired {
                    let id = TaskId(index as u8);
                    ks.cancel_wait(id);
                    ks.wake(id, WakeReason::TimedOut);
                }
            }
        });
    }

    /// Surrender the processor; the caller re-enters the Ready set behind
    /// its equal-priority peers.
    pub async fn yield_now(&self) {
        let mut yielded = false;
        poll_fn(move |_cx| {
            self.with_state(|ks| {
                let id = ks.current_or_die("yield_now");
                if yielded {
                    return Poll::Ready(());
                }
                yielded = true;
                let seq = ks.next_seq();
                let t = ks.task_mut(id);
                t.state = TaskState::Ready;
                t.ready_seq = seq;
                Poll::Pending
            })
        })
        .await
    }

    /// Block the calling task on the tick clock for `ticks` ticks.
    ///
    /// `sleep(0)` is a plain yield. The deadline saturates, so an enormous
    /// tick count sleeps forever in practice.
    pub async fn sleep(&self, ticks: u64) {
        if ticks == 0 {
            return self.yield_now().await;
        }

        let mut deadline: Option<u64> = None;
        poll_fn(move |_cx| {
            self.with_state(|ks| {
                let id = ks.current_or_die("sleep");
                if ks.task_mut(id).wake.take().is_some() {
                    return Poll::Ready(());
                }

                // Keep the absolute deadline across re-blocks (resume after
                // suspension re-enters here).
                let dl = *deadline.get_or_insert(ks.now.saturating_add(ticks));
                if dl <= ks.now {
                    return Poll::Ready(());
                }
                ks.block_current(id, WaitSite::TickClock, Some(dl));
                Poll::Pending
            })
        })
        .await
    }

    /// Suspend a task from outside. Orthogonal to the blocking states: a
    /// blocked task is removed from its wait list first.
    ///
    /// Returns `false` for the currently running task (self-suspension is
    /// not supported) or an unknown id; suspending an already suspended
    /// task is a no-op returning `true`.
    pub fn suspend(&self, id: TaskId) -> bool {
        self.with_state(|ks| {
            if ks.running == Some(id) {
                return false;
            }
            let Some(t) = ks.tasks.get(id.index()).and_then(Option::as_ref) else {
                return false;
            };
            match t.state {
                TaskState::Suspended => true,
                TaskState::Running => false,
                TaskState::Ready => {
                    ks.task_mut(id).state = TaskState::Suspended;
                    true
                }
                TaskState::Blocked => {
                    ks.cancel_wait(id);
                    let t = ks.task_mut(id);
                    t.state = TaskState::Suspended;
                    t.blocked_on = None;
                    t.deadline = None;
                    true
                }
            }
        })
    }

    /// Resume a suspended task. If it was blocked when suspended, its
    /// primitive re-runs the fast path and, if still unsatisfied, re-blocks
    /// against its original absolute deadline.
    pub fn resume(&self, id: TaskId) -> bool {
        self.with_state(|ks| {
            match ks.tasks.get(id.index()).and_then(Option::as_ref) {
                Some(t) if t.state == TaskState::Suspended => {
                    let seq = ks.next_seq();
                    let t = ks.task_mut(id);
                    t.state = TaskState::Ready;
                    t.ready_seq = seq;
                    true
                }
                _ => false,
            }
        })
    }

    /// Current state of a task, if the id is known.
    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.with_state(|ks| {
            ks.tasks
                .get(id.index())
                .and_then(Option::as_ref)
                .map(|t| t.state)
        })
    }

    /// Display name of a task, if the id is known.
    pub fn task_name(&self, id: TaskId) -> Option<&'static str> {
        self.with_state(|ks| {
            ks.tasks
                .get(id.index())
                .and_then(Option::as_ref)
                .map(|t| t.name)
        })
    }

    /// Unused bytes of a task's stack budget: how close the task's saved
    /// context is to exhausting its declared budget.
    pub fn stack_headroom(&self, id: TaskId) -> Option<usize> {
        self.with_state(|ks| {
            ks.tasks
                .get(id.index())
                .and_then(Option::as_ref)
                .map(|t| t.stack_budget - t.stack_used)
        })
    }

    /// The current tick count.
    pub fn now(&self) -> u64 {
        self.with_state(|ks| ks.now)
    }

    /// The task currently being dispatched, if any.
    pub fn current_task(&self) -> Option<TaskId> {
        self.with_state(|ks| ks.running)
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

/// All scheduler, semaphore and queue bookkeeping. Guarded as a whole by
/// the kernel's critical section.
pub(crate) struct KernelState {
    tasks: [Option<Tcb>; MAX_TASKS],
    pub(crate) semaphores: [Option<SemState>; MAX_SEMAPHORES],
    pub(crate) queues: [Option<QueueState>; MAX_QUEUES],
    /// Tick counter, advanced only by `on_tick`.
    pub(crate) now: u64,
    /// Arrival/readiness sequence source; strictly increasing.
    seq: u64,
    running: Option<TaskId>,
}

impl KernelState {
    pub(crate) fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// The running task, or a fatal error if a kernel primitive was polled
    /// outside the dispatcher.
    pub(crate) fn current_or_die(&self, op: &str) -> TaskId {
        match self.running {
            Some(id) => id,
            None => panic!("`{op}` polled outside a running task"),
        }
    }

    pub(crate) fn task_mut(&mut self, id: TaskId) -> &mut Tcb {
        self.tasks[id.index()].as_mut().expect("stale task id")
    }

    pub(crate) fn semaphore_mut(&mut self, index: usize) -> &mut SemState {
        self.semaphores[index]
            .as_mut()
            .expect("stale semaphore handle")
    }

    pub(crate) fn queue_mut(&mut self, index: usize) -> &mut QueueState {
        self.queues[index].as_mut().expect("stale queue handle")
    }

    /// Select the highest-priority Ready task, FIFO among equal priorities,
    /// and mark it Running.
    fn pick_next(&mut self) -> Option<TaskId> {
        let mut best: Option<(Priority, u64, usize)> = None;
        for (index, slot) in self.tasks.iter().enumerate() {
            let Some(t) = slot else { continue };
            if t.state != TaskState::Ready {
                continue;
            }
            let better = match best {
                None => true,
                Some((p, s, _)) => t.priority > p || (t.priority == p && t.ready_seq < s),
            };
            if better {
                best = Some((t.priority, t.ready_seq, index));
            }
        }

        let (_, _, index) = best?;
        let id = TaskId(index as u8);
        self.task_mut(id).state = TaskState::Running;
        self.running = Some(id);
        Some(id)
    }

    /// Close out a dispatch. The task must have left the Running state
    /// through a kernel primitive.
    fn retire(&mut self, id: TaskId) {
        self.running = None;
        let t = self.tasks[id.index()].as_ref().expect("stale task id");
        if t.state == TaskState::Running {
            panic!("task `{}` suspended outside a kernel primitive", t.name);
        }
    }

    /// Atomically move the running task to Blocked and park it on `site`.
    pub(crate) fn block_current(&mut self, id: TaskId, site: WaitSite, deadline: Option<u64>) {
        let seq = self.next_seq();
        let priority = self.task_mut(id).priority;

        match site {
            WaitSite::Semaphore(i) => self
                .semaphore_mut(i)
                .waiters
                .insert(id, priority.level(), seq),
            WaitSite::QueueSend(i) => self
                .queue_mut(i)
                .send_waiters
                .insert(id, priority.level(), seq),
            WaitSite::QueueRecv(i) => self
                .queue_mut(i)
                .recv_waiters
                .insert(id, priority.level(), seq),
            WaitSite::TickClock => Ok(()),
        }
        .unwrap_or_else(|_| panic!("wait list overflow"));

        let t = self.task_mut(id);
        t.state = TaskState::Blocked;
        t.blocked_on = Some(site);
        t.deadline = deadline;
    }

    /// Make a blocked task Ready again with a fresh sequence and the given
    /// outcome. The task must already be off its wait list.
    pub(crate) fn wake(&mut self, id: TaskId, reason: WakeReason) {
        let seq = self.next_seq();
        let t = self.task_mut(id);
        debug_assert_eq!(t.state, TaskState::Blocked);
        t.state = TaskState::Ready;
        t.ready_seq = seq;
        t.blocked_on = None;
        t.deadline = None;
        t.wake = Some(reason);
    }

    /// Remove a blocked task from whatever wait list it is parked on.
    pub(crate) fn cancel_wait(&mut self, id: TaskId) {
        let Some(site) = self.tasks[id.index()]
            .as_ref()
            .and_then(|t| t.blocked_on)
        else {
            return;
        };
        match site {
            WaitSite::Semaphore(i) => {
                self.semaphore_mut(i).waiters.remove(&id);
            }
            WaitSite::QueueSend(i) => {
                self.queue_mut(i).send_waiters.remove(&id);
            }
            WaitSite::QueueRecv(i) => {
                self.queue_mut(i).recv_waiters.remove(&id);
            }
            WaitSite::TickClock => {}
        }
    }
}
