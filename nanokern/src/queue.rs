//! Bounded FIFO queue of fixed-size byte items.
//!
//! Items cross the queue by copy, so sender and receiver never share
//! storage. Both ends block: `send` waits for space in a full queue and
//! `receive` waits for an item in an empty one, each on its own wait list
//! ordered by priority then arrival. An item handed to a woken receiver and
//! the corresponding wake are one critical section, so the item count never
//! exceeds the capacity and never goes negative.

use core::future::poll_fn;
use core::task::Poll;

use crate::kernel::{Kernel, KernelState, MAX_TASKS};
use crate::task::{TaskId, WaitSite, WakeReason};
use crate::timeout::Timeout;

use nanokern_common::ring::ItemRing;
use nanokern_common::wait_list::WaitList;

/// Kernel-side queue bookkeeping.
pub(crate) struct QueueState {
    pub(crate) ring: ItemRing,
    pub(crate) send_waiters: WaitList<TaskId, MAX_TASKS>,
    pub(crate) recv_waiters: WaitList<TaskId, MAX_TASKS>,
}

impl QueueState {
    pub(crate) fn new(ring: ItemRing) -> Self {
        Self {
            ring,
            send_waiters: WaitList::new(),
            recv_waiters: WaitList::new(),
        }
    }
}

impl KernelState {
    /// Enqueue without blocking. On success the best blocked receiver, if
    /// any, is woken in the same critical section.
    pub(crate) fn queue_send_fast(&mut self, index: usize, item: &[u8]) -> bool {
        let woken = {
            let q = self.queue_mut(index);
            if !q.ring.push(item) {
                return false;
            }
            q.recv_waiters.pop()
        };
        if let Some(id) = woken {
            self.wake(id, WakeReason::Signaled);
        }
        true
    }

    /// Dequeue without blocking. On success the best blocked sender, if
    /// any, is woken in the same critical section.
    pub(crate) fn queue_recv_fast(&mut self, index: usize, buf: &mut [u8]) -> bool {
        let woken = {
            let q = self.queue_mut(index);
            if !q.ring.pop(buf) {
                return false;
            }
            q.send_waiters.pop()
        };
        if let Some(id) = woken {
            self.wake(id, WakeReason::Signaled);
        }
        true
    }
}

/// Errors from [`Queue::send`] and [`Queue::try_send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum SendError {
    /// The queue was full and the operation did not wait.
    Full,
    /// Space did not free up within the wait budget. The item was not
    /// enqueued.
    TimedOut,
}

/// Errors from [`Queue::receive`] and [`Queue::try_receive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum RecvError {
    /// The queue was empty and the operation did not wait.
    Empty,
    /// No item arrived within the wait budget.
    TimedOut,
}

/// Handle to a bounded queue owned by a [`Kernel`].
///
/// Handles are plain copyable references; any number of tasks may hold one.
#[derive(Clone, Copy)]
pub struct Queue {
    pub(crate) kernel: &'static Kernel,
    pub(crate) index: usize,
}

impl core::fmt::Debug for Queue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Queue").field("index", &self.index).finish()
    }
}

impl Queue {
    /// Copy `item` into the queue, blocking the calling task while the
    /// queue is full until space frees up or `timeout` expires.
    ///
    /// `Timeout::NoWait` (and `Ticks(0)`) on a full queue fails with
    /// [`SendError::Full`] immediately. A timed-out send enqueues nothing.
    /// Several blocked senders are released in priority order, FIFO among
    /// equals, as receivers free slots.
    ///
    /// # Panics
    ///
    /// Panics if `item.len()` differs from the queue's item size.
    pub async fn send(&self, item: &[u8], timeout: Timeout) -> Result<(), SendError> {
        let mut deadline: Option<Option<u64>> = None;
        poll_fn(move |_cx| {
            self.kernel.with_state(|ks| {
                let id = ks.current_or_die("Queue::send");

                if ks.task_mut(id).wake.take() == Some(WakeReason::TimedOut) {
                    return Poll::Ready(Err(SendError::TimedOut));
                }

                // A woken sender still races other senders for the freed
                // slot, so the fast path is retried rather than assumed.
                if ks.queue_send_fast(self.index, item) {
                    return Poll::Ready(Ok(()));
                }

                if timeout.is_no_wait() {
                    return Poll::Ready(Err(SendError::Full));
                }

                // The absolute deadline is fixed on first poll; re-blocking
                // after a lost race or a resume keeps the original budget.
                let dl = *deadline.get_or_insert_with(|| timeout.deadline(ks.now));
                if matches!(dl, Some(d) if d <= ks.now) {
                    return Poll::Ready(Err(SendError::TimedOut));
                }

                ks.block_current(id, WaitSite::QueueSend(self.index), dl);
                Poll::Pending
            })
        })
        .await
    }

    /// Copy the oldest item into `buf`, blocking the calling task while the
    /// queue is empty until an item arrives or `timeout` expires.
    ///
    /// `Timeout::NoWait` (and `Ticks(0)`) on an empty queue fails with
    /// [`RecvError::Empty`] immediately.
    ///
    /// # Panics
    ///
    /// Panics if `buf.len()` differs from the queue's item size.
    pub async fn receive(&self, buf: &mut [u8], timeout: Timeout) -> Result<(), RecvError> {
        let mut deadline: Option<Option<u64>> = None;
        poll_fn(move |_cx| {
            self.kernel.with_state(|ks| {
                let id = ks.current_or_die("Queue::receive");

                if ks.task_mut(id).wake.take() == Some(WakeReason::TimedOut) {
                    return Poll::Ready(Err(RecvError::TimedOut));
                }

                if ks.queue_recv_fast(self.index, buf) {
                    return Poll::Ready(Ok(()));
                }

                if timeout.is_no_wait() {
                    return Poll::Ready(Err(RecvError::Empty));
                }

                let dl = *deadline.get_or_insert_with(|| timeout.deadline(ks.now));
                if matches!(dl, Some(d) if d <= ks.now) {
                    return Poll::Ready(Err(RecvError::TimedOut));
                }

                ks.block_current(id, WaitSite::QueueRecv(self.index), dl);
                Poll::Pending
            })
        })
        .await
    }

    /// Enqueue without blocking. Usable outside tasks, unlike
    /// [`Queue::send`].
    pub fn try_send(&self, item: &[u8]) -> Result<(), SendError> {
        self.kernel.with_state(|ks| {
            if ks.queue_send_fast(self.index, item) {
                Ok(())
            } else {
                Err(SendError::Full)
            }
        })
    }

    /// Dequeue without blocking. Usable outside tasks, unlike
    /// [`Queue::receive`].
    pub fn try_receive(&self, buf: &mut [u8]) -> Result<(), RecvError> {
        self.kernel.with_state(|ks| {
            if ks.queue_recv_fast(self.index, buf) {
                Ok(())
            } else {
                Err(RecvError::Empty)
            }
        })
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.kernel
            .with_state(|ks| ks.queue_mut(self.index).ring.len())
    }

    /// Whether the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue is at capacity.
    pub fn is_full(&self) -> bool {
        self.kernel
            .with_state(|ks| ks.queue_mut(self.index).ring.is_full())
    }

    /// Item capacity fixed at creation.
    pub fn capacity(&self) -> usize {
        self.kernel
            .with_state(|ks| ks.queue_mut(self.index).ring.capacity())
    }

    /// Item size in bytes fixed at creation.
    pub fn item_size(&self) -> usize {
        self.kernel
            .with_state(|ks| ks.queue_mut(self.index).ring.item_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{CreateError, MAX_QUEUES};
    use crate::task::Priority;
    use core::cell::RefCell;
    use std::boxed::Box;
    use std::vec::Vec;

    fn leak<T>(value: T) -> &'static T {
        Box::leak(Box::new(value))
    }

    #[test]
    fn try_send_try_receive_fifo() {
        let k = crate::make_kernel!();
        let q = k.create_queue(3, 2).unwrap();
        let mut buf = [0u8; 2];

        q.try_send(&[1, 2]).unwrap();
        q.try_send(&[3, 4]).unwrap();
        assert_eq!(q.len(), 2);

        q.try_receive(&mut buf).unwrap();
        assert_eq!(buf, [1, 2]);
        q.try_receive(&mut buf).unwrap();
        assert_eq!(buf, [3, 4]);
        assert_eq!(q.try_receive(&mut buf), Err(RecvError::Empty));
    }

    #[test]
    fn try_send_rejects_when_full() {
        let k = crate::make_kernel!();
        let q = k.create_queue(2, 1).unwrap();

        q.try_send(&[1]).unwrap();
        q.try_send(&[2]).unwrap();
        assert!(q.is_full());
        assert_eq!(q.try_send(&[3]), Err(SendError::Full));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn creation_validates_dimensions() {
        let k = crate::make_kernel!();

        assert_eq!(
            k.create_queue(0, 4).unwrap_err(),
            CreateError::InvalidArgument
        );
        assert_eq!(
            k.create_queue(4, 0).unwrap_err(),
            CreateError::InvalidArgument
        );

        let q = k.create_queue(4, 8).unwrap();
        assert_eq!(q.capacity(), 4);
        assert_eq!(q.item_size(), 8);
        assert!(q.is_empty());
    }

    #[test]
    fn queue_pool_exhaustion() {
        let k = crate::make_kernel!();

        for _ in 0..MAX_QUEUES {
            k.create_queue(1, 1).unwrap();
        }
        assert_eq!(
            k.create_queue(1, 1).unwrap_err(),
            CreateError::ResourceExhausted
        );
    }

    #[test]
    fn blocked_receiver_is_woken_by_send() {
        let k = crate::make_kernel!();
        let q = k.create_queue(4, 1).unwrap();
        let log = leak(RefCell::new(Vec::new()));

        k.spawn("consumer", Priority::new(2), 512, async move {
            let mut buf = [0u8; 1];
            loop {
                q.receive(&mut buf, Timeout::Forever).await.unwrap();
                log.borrow_mut().push(buf[0]);
            }
        })
        .unwrap();
        k.spawn("producer", Priority::new(1), 512, async move {
            for i in 0..3u8 {
                q.send(&[i], Timeout::Forever).await.unwrap();
                // The consumer outranks us, so it drains at our next
                // suspension point.
                k.yield_now().await;
            }
            loop {
                k.sleep(u64::MAX).await;
            }
        })
        .unwrap();

        k.run_until_idle();
        assert_eq!(*log.borrow(), [0, 1, 2]);
    }

    #[test]
    fn blocking_send_pushes_more_items_than_capacity() {
        let k = crate::make_kernel!();
        let q = k.create_queue(10, 1).unwrap();
        let received = leak(RefCell::new(Vec::new()));
        let done = leak(RefCell::new(false));

        // The producer outranks the consumer, so it fills all ten slots and
        // blocks; every slot the consumer frees goes straight back to it.
        k.spawn("producer", Priority::new(2), 512, async move {
            for i in 0..12u8 {
                q.send(&[i], Timeout::Forever).await.unwrap();
            }
            *done.borrow_mut() = true;
            loop {
                k.sleep(u64::MAX).await;
            }
        })
        .unwrap();
        k.spawn("consumer", Priority::new(1), 512, async move {
            let mut buf = [0u8; 1];
            loop {
                q.receive(&mut buf, Timeout::Forever).await.unwrap();
                received.borrow_mut().push(buf[0]);
            }
        })
        .unwrap();

        k.run_until_idle();
        assert!(*done.borrow());
        assert_eq!(
            *received.borrow(),
            (0..12u8).collect::<Vec<_>>().as_slice()
        );
    }

    #[test]
    fn zero_timeout_send_and_receive_never_block() {
        let k = crate::make_kernel!();
        let q = k.create_queue(1, 1).unwrap();
        let outcome = leak(RefCell::new(None));

        k.spawn("t", Priority::new(1), 512, async move {
            let mut buf = [0u8; 1];
            let recv_empty = q.receive(&mut buf, Timeout::NoWait).await;
            q.send(&[7], Timeout::Forever).await.unwrap();
            let send_full = q.send(&[8], Timeout::Ticks(0)).await;
            *outcome.borrow_mut() = Some((recv_empty, send_full));
            loop {
                k.sleep(u64::MAX).await;
            }
        })
        .unwrap();

        k.run_until_idle();
        assert_eq!(
            *outcome.borrow(),
            Some((Err(RecvError::Empty), Err(SendError::Full)))
        );
    }

    #[test]
    fn timed_out_send_enqueues_nothing() {
        let k = crate::make_kernel!();
        let q = k.create_queue(1, 1).unwrap();
        let outcome = leak(RefCell::new(None));

        q.try_send(&[1]).unwrap();

        k.spawn("sender", Priority::new(1), 512, async move {
            *outcome.borrow_mut() = Some(q.send(&[2], Timeout::Ticks(2)).await);
            loop {
                k.sleep(u64::MAX).await;
            }
        })
        .unwrap();

        k.run(3);
        assert_eq!(*outcome.borrow(), Some(Err(SendError::TimedOut)));
        assert_eq!(q.len(), 1);

        let mut buf = [0u8; 1];
        q.try_receive(&mut buf).unwrap();
        assert_eq!(buf, [1]);
        assert!(q.is_empty());
    }

    #[test]
    fn receive_times_out_on_silence() {
        let k = crate::make_kernel!();
        let q = k.create_queue(2, 1).unwrap();
        let outcome = leak(RefCell::new(None));

        k.spawn("receiver", Priority::new(1), 512, async move {
            let mut buf = [0u8; 1];
            *outcome.borrow_mut() = Some(q.receive(&mut buf, Timeout::Ticks(3)).await);
            loop {
                k.sleep(u64::MAX).await;
            }
        })
        .unwrap();

        k.run(2);
        assert_eq!(*outcome.borrow(), None);
        k.run(2);
        assert_eq!(*outcome.borrow(), Some(Err(RecvError::TimedOut)));
    }

    #[test]
    fn send_from_outside_wakes_blocked_receiver() {
        let k = crate::make_kernel!();
        let q = k.create_queue(2, 1).unwrap();
        let got = leak(RefCell::new(None));

        k.spawn("receiver", Priority::new(1), 512, async move {
            let mut buf = [0u8; 1];
            q.receive(&mut buf, Timeout::Forever).await.unwrap();
            *got.borrow_mut() = Some(buf[0]);
            loop {
                k.sleep(u64::MAX).await;
            }
        })
        .unwrap();

        k.run_until_idle();
        assert_eq!(*got.borrow(), None);

        // Interrupt-style delivery from outside any task.
        q.try_send(&[42]).unwrap();
        k.run_until_idle();
        assert_eq!(*got.borrow(), Some(42));
    }

    #[test]
    fn item_count_never_exceeds_capacity() {
        let k = crate::make_kernel!();
        let q = k.create_queue(2, 1).unwrap();

        k.spawn("producer", Priority::new(2), 512, async move {
            for i in 0..6u8 {
                q.send(&[i], Timeout::Forever).await.unwrap();
                assert!(q.len() <= q.capacity());
            }
            loop {
                k.sleep(u64::MAX).await;
            }
        })
        .unwrap();
        k.spawn("consumer", Priority::new(1), 512, async move {
            let mut buf = [0u8; 1];
            loop {
                q.receive(&mut buf, Timeout::Forever).await.unwrap();
                assert!(q.len() <= q.capacity());
            }
        })
        .unwrap();

        k.run_until_idle();
    }
}
