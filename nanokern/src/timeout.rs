//! Wait budgets for blocking operations.

/// How long a blocking operation may wait for its condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub enum Timeout {
    /// Fast path only; never block, not even for one tick.
    NoWait,
    /// Wait up to this many ticks.
    Ticks(u64),
    /// Wait until the condition occurs, however long that takes.
    Forever,
}

impl Timeout {
    /// Whether this budget forbids blocking. `Ticks(0)` is `NoWait`.
    pub(crate) fn is_no_wait(self) -> bool {
        matches!(self, Timeout::NoWait | Timeout::Ticks(0))
    }

    /// Absolute expiry tick for a wait starting at `now`; `None` means no
    /// deadline. Saturating, so an enormous tick count waits forever in
    /// practice.
    pub(crate) fn deadline(self, now: u64) -> Option<u64> {
        match self {
            Timeout::NoWait => Some(now),
            Timeout::Ticks(n) => Some(now.saturating_add(n)),
            Timeout::Forever => None,
        }
    }
}

/// A blocking operation's deadline elapsed before the awaited condition
/// occurred. An expected, recoverable outcome; callers branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt::Format))]
pub struct TimedOut;
