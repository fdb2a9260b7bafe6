//! A minimal real-time kernel primitive layer: a priority-preemptive
//! scheduler core, binary semaphores and bounded fixed-item-size queues.
//!
//! The kernel schedules cooperatively declared tasks preemptively by
//! priority: at every suspension point the highest-priority ready task runs
//! next, with FIFO rotation among equal priorities. Time is a logical tick
//! fed in through [`Kernel::on_tick`], so the crate runs unchanged on a
//! hardware timer interrupt or inside a host test harness.
//!
//! ```
//! use nanokern::{make_kernel, Priority, Timeout};
//!
//! let kernel = make_kernel!();
//! let queue = kernel.create_queue(8, 2).unwrap();
//!
//! kernel
//!     .spawn("producer", Priority::new(1), 256, async move {
//!         let mut n = 0u16;
//!         loop {
//!             let _ = queue.send(&n.to_le_bytes(), Timeout::Forever).await;
//!             n += 1;
//!             kernel.sleep(1).await;
//!         }
//!     })
//!     .unwrap();
//! kernel
//!     .spawn("consumer", Priority::new(2), 256, async move {
//!         let mut buf = [0u8; 2];
//!         loop {
//!             let _ = queue.receive(&mut buf, Timeout::Forever).await;
//!         }
//!     })
//!     .unwrap();
//!
//! kernel.run(4);
//! assert!(queue.is_empty());
//! ```

#![no_std]
#![deny(missing_docs)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod kernel;
pub mod queue;
pub mod semaphore;
pub mod task;
pub mod timeout;

pub use kernel::{CreateError, Kernel, MAX_QUEUES, MAX_SEMAPHORES, MAX_TASKS};
pub use queue::{Queue, RecvError, SendError};
pub use semaphore::Semaphore;
pub use task::{Priority, TaskId, TaskState};
pub use timeout::{TimedOut, Timeout};

#[doc(hidden)]
pub use critical_section;
#[doc(hidden)]
pub use portable_atomic;

/// Creates a static [`Kernel`] and hands out a `&'static` reference to it.
///
/// Each macro instance may only be evaluated once; a second evaluation of
/// the same instance panics.
#[macro_export]
macro_rules! make_kernel {
    () => {{
        static KERNEL: $crate::Kernel = $crate::Kernel::new();

        static CHECK: $crate::portable_atomic::AtomicU8 = $crate::portable_atomic::AtomicU8::new(0);

        $crate::critical_section::with(|_| {
            if CHECK.load(::core::sync::atomic::Ordering::Relaxed) != 0 {
                panic!("call to the same `make_kernel` instance twice");
            }

            CHECK.store(1, ::core::sync::atomic::Ordering::Relaxed);
        });

        &KERNEL
    }};
}
