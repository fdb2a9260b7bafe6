//! Binary semaphore for signaling and mutual exclusion.
//!
//! The semaphore holds a single boolean availability flag. `give` either
//! hands the flag directly to the best waiter (highest priority, FIFO among
//! equals) or latches it; repeated gives while available are idempotent.
//! When a waiter is handed the flag, give and take are a single atomic
//! transfer inside one critical section, so no second task can slip in
//! between.

use core::future::poll_fn;
use core::task::Poll;

use crate::kernel::{Kernel, KernelState, MAX_TASKS};
use crate::task::{TaskId, WaitSite, WakeReason};
use crate::timeout::{TimedOut, Timeout};

use nanokern_common::wait_list::WaitList;

/// Kernel-side semaphore bookkeeping.
pub(crate) struct SemState {
    /// The binary availability flag.
    available: bool,
    pub(crate) waiters: WaitList<TaskId, MAX_TASKS>,
}

impl SemState {
    /// A fresh semaphore starts unavailable.
    pub(crate) fn new() -> Self {
        Self {
            available: false,
            waiters: WaitList::new(),
        }
    }
}

impl KernelState {
    /// Signal a semaphore: transfer the flag to the best waiter, or latch it.
    pub(crate) fn semaphore_give(&mut self, index: usize) {
        let sem = self.semaphore_mut(index);
        match sem.waiters.pop() {
            // The flag goes straight to the waiter and stays false, so the
            // give and the pending take are one atomic hand-off.
            Some(id) => self.wake(id, WakeReason::Signaled),
            None => sem.available = true,
        }
    }
}

/// Handle to a binary semaphore owned by a [`Kernel`].
///
/// Handles are plain copyable references; any number of tasks may hold one.
#[derive(Clone, Copy)]
pub struct Semaphore {
    pub(crate) kernel: &'static Kernel,
    pub(crate) index: usize,
}

impl Semaphore {
    /// Make the semaphore available, waking the best waiter if there is one.
    ///
    /// Never blocks, so it is also usable from interrupt-style contexts
    /// outside any task. Giving an already available semaphore is a no-op.
    pub fn give(&self) {
        self.kernel.with_state(|ks| ks.semaphore_give(self.index));
    }

    /// Claim the semaphore if it is available right now, without blocking.
    ///
    /// Usable outside tasks, unlike [`Semaphore::take`].
    pub fn try_take(&self) -> bool {
        self.kernel.with_state(|ks| {
            let sem = ks.semaphore_mut(self.index);
            if sem.available {
                sem.available = false;
                true
            } else {
                false
            }
        })
    }

    /// Claim the semaphore, blocking the calling task until it is given or
    /// `timeout` expires.
    ///
    /// `Timeout::NoWait` (and `Ticks(0)`) checks the flag and returns
    /// [`TimedOut`] immediately if it is down. A give and a timeout landing
    /// on the same tick resolve in favor of the give.
    pub async fn take(&self, timeout: Timeout) -> Result<(), TimedOut> {
        let mut deadline: Option<Option<u64>> = None;
        poll_fn(move |_cx| {
            self.kernel.with_state(|ks| {
                let id = ks.current_or_die("Semaphore::take");

                // A wake left by give or by the tick clock settles the wait.
                match ks.task_mut(id).wake.take() {
                    Some(WakeReason::Signaled) => return Poll::Ready(Ok(())),
                    Some(WakeReason::TimedOut) => return Poll::Ready(Err(TimedOut)),
                    None => {}
                }

                let sem = ks.semaphore_mut(self.index);
                if sem.available {
                    sem.available = false;
                    return Poll::Ready(Ok(()));
                }

                if timeout.is_no_wait() {
                    return Poll::Ready(Err(TimedOut));
                }

                // The absolute deadline is fixed on first poll and survives
                // suspend/resume cycles.
                let dl = *deadline.get_or_insert_with(|| timeout.deadline(ks.now));
                if matches!(dl, Some(d) if d <= ks.now) {
                    return Poll::Ready(Err(TimedOut));
                }

                ks.block_current(id, WaitSite::Semaphore(self.index), dl);
                Poll::Pending
            })
        })
        .await
    }
}
