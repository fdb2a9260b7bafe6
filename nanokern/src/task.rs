//! Task identities, priorities and scheduler-visible task state.

/// Identifies a slot in the kernel task table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct TaskId(pub(crate) u8);

impl TaskId {
    /// The task-table index behind this id.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Task priority. Higher numbers are more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct Priority(u8);

impl Priority {
    /// Create a priority with the given urgency level.
    pub const fn new(level: u8) -> Self {
        Self(level)
    }

    /// The numeric urgency level.
    pub const fn level(self) -> u8 {
        self.0
    }
}

/// Scheduler-visible task states.
///
/// Exactly one task is `Running` at any instant, and only while the
/// dispatcher is polling it. State transitions happen only inside the
/// kernel's critical sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum TaskState {
    /// Eligible for dispatch but not currently executing.
    Ready,
    /// Currently being executed by the dispatcher.
    Running,
    /// Parked on a primitive or on the tick clock.
    Blocked,
    /// Explicitly suspended from outside; ineligible until resumed.
    Suspended,
}

/// Why a blocked task was made ready again.
///
/// Consumed by the primitive the task was blocked in on its next poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WakeReason {
    /// A matching give/send/receive released this waiter.
    Signaled,
    /// The wait deadline elapsed first.
    TimedOut,
}

/// The wait list a blocked task is parked on, so that timeouts and
/// suspension can remove it again.
///
/// A task appears in at most one wait list at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitSite {
    /// Waiting for a semaphore give.
    Semaphore(usize),
    /// Waiting for free space in a queue.
    QueueSend(usize),
    /// Waiting for an item in a queue.
    QueueRecv(usize),
    /// Waiting for the tick clock only (sleep).
    TickClock,
}

/// Task control block.
pub(crate) struct Tcb {
    /// Display name, diagnostic only.
    pub(crate) name: &'static str,
    pub(crate) priority: Priority,
    pub(crate) state: TaskState,
    /// Dispatch order among equal priorities: lower runs first. Re-readying
    /// a task assigns a fresh sequence, which yields round-robin.
    pub(crate) ready_seq: u64,
    pub(crate) blocked_on: Option<WaitSite>,
    /// Absolute tick at which a blocked wait times out. `None` waits forever.
    pub(crate) deadline: Option<u64>,
    pub(crate) wake: Option<WakeReason>,
    /// Bytes reserved for this task's saved execution context.
    pub(crate) stack_budget: usize,
    /// Bytes of the budget actually occupied by the saved context.
    pub(crate) stack_used: usize,
}
