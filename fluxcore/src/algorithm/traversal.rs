use std::fmt::Display;

/// Lifecycle of a traversal over the logical entry sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalPhase {
    /// loaded, nothing handed out yet
    Ready,
    Serving,
    /// every requested cycle has been consumed
    Exhausted,
}

impl Display for TraversalPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraversalPhase::Ready => write!(f, "READY"),
            TraversalPhase::Serving => write!(f, "SERVING"),
            TraversalPhase::Exhausted => write!(f, "EXHAUSTED"),
        }
    }
}

/// What a single call to [`Traversal::advance`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// same entry handed out again
    Reuse,
    /// moved on to a new entry
    NextEntry,
    /// ran off the end of the chain and started the next cycle
    Wrapped,
}

impl Step {
    /// True when the position points at an entry that was not the previous one.
    pub fn loads_entry(&self) -> bool {
        !matches!(self, Step::Reuse)
    }
}

/// Cycle / entry / reuse bookkeeping.
///
/// `num_cycles == 0` means cycling forever. Cycles are numbered from 1 and the reuse
/// counter stays within `[1, entry_reuse]` once serving. The phase becomes `Exhausted`
/// as soon as the last position has been handed out, so the final entry is still
/// current when the end is signalled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Traversal {
    num_entries: u64,
    num_cycles: u64,
    entry_reuse: u64,
    i_entry: u64,
    i_cycle: u64,
    i_use: u64,
    phase: TraversalPhase,
}

impl Traversal {
    /// `entry_reuse` below 1 is treated as 1; callers validate it beforehand.
    pub fn new(num_entries: u64, num_cycles: u64, entry_reuse: u64) -> Self {
        let mut traversal = Traversal {
            num_entries,
            num_cycles,
            entry_reuse: entry_reuse.max(1),
            i_entry: 0,
            i_cycle: 0,
            i_use: 0,
            phase: TraversalPhase::Ready,
        };
        traversal.reset();
        traversal
    }

    pub fn reset(&mut self) {
        self.i_entry = 0;
        self.i_cycle = 0;
        self.i_use = 0;
        self.phase = if self.num_entries == 0 { TraversalPhase::Exhausted } else { TraversalPhase::Ready };
    }

    /// Move to the next position, or return None once exhausted.
    pub fn advance(&mut self) -> Option<Step> {
        let step = match self.phase {
            TraversalPhase::Exhausted => return None,
            TraversalPhase::Ready => {
                self.i_entry = 0;
                self.i_cycle = 1;
                self.i_use = 1;
                self.phase = TraversalPhase::Serving;
                Step::NextEntry
            }
            TraversalPhase::Serving => {
                if self.i_use < self.entry_reuse {
                    self.i_use += 1;
                    Step::Reuse
                } else {
                    self.i_use = 1;
                    self.i_entry += 1;
                    if self.i_entry >= self.num_entries {
                        self.i_entry = 0;
                        self.i_cycle += 1;
                        Step::Wrapped
                    } else {
                        Step::NextEntry
                    }
                }
            }
        };
        if !self.has_next() {
            self.phase = TraversalPhase::Exhausted;
        }
        Some(step)
    }

    /// Whether another call to `advance` will yield a position.
    pub fn has_next(&self) -> bool {
        match self.phase {
            TraversalPhase::Exhausted => false,
            TraversalPhase::Ready => self.num_entries > 0,
            TraversalPhase::Serving if self.num_entries == 0 => false,
            TraversalPhase::Serving => {
                self.num_cycles == 0
                    || self.i_use < self.entry_reuse
                    || self.i_entry + 1 < self.num_entries
                    || self.i_cycle < self.num_cycles
            }
        }
    }

    /// Total positions a bounded traversal hands out, None when cycling forever.
    pub fn total_steps(&self) -> Option<u64> {
        match self.num_cycles {
            0 => None,
            n => Some(n * self.num_entries * self.entry_reuse),
        }
    }

    /// Positions in one full pass over the chain, reuse included.
    pub fn pass_length(&self) -> u64 {
        self.num_entries * self.entry_reuse
    }

    pub fn set_num_cycles(&mut self, num_cycles: u64) {
        self.num_cycles = num_cycles;
        self.refresh_phase();
    }

    pub fn set_entry_reuse(&mut self, entry_reuse: u64) {
        self.entry_reuse = entry_reuse.max(1);
        self.i_use = self.i_use.min(self.entry_reuse);
        self.refresh_phase();
    }

    fn refresh_phase(&mut self) {
        if self.num_entries == 0 {
            self.phase = TraversalPhase::Exhausted;
            return;
        }
        if self.phase == TraversalPhase::Ready {
            return;
        }
        // a changed limit may re-open or close an ongoing traversal
        self.phase = TraversalPhase::Serving;
        if !self.has_next() {
            self.phase = TraversalPhase::Exhausted;
        }
    }

    pub fn phase(&self) -> TraversalPhase {
        self.phase
    }

    pub fn is_exhausted(&self) -> bool {
        self.phase == TraversalPhase::Exhausted
    }

    /// Current global entry index, None before the first advance.
    pub fn index(&self) -> Option<u64> {
        match self.phase {
            TraversalPhase::Ready => None,
            _ if self.i_cycle == 0 => None,
            _ => Some(self.i_entry),
        }
    }

    pub fn cycle(&self) -> u64 {
        self.i_cycle
    }

    pub fn reuse_count(&self) -> u64 {
        self.i_use
    }

    pub fn num_cycles(&self) -> u64 {
        self.num_cycles
    }

    pub fn entry_reuse(&self) -> u64 {
        self.entry_reuse
    }

    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn count_steps(traversal: &mut Traversal, limit: u64) -> u64 {
        let mut n = 0;
        while traversal.advance().is_some() {
            n += 1;
            if n > limit {
                break;
            }
        }
        n
    }

    #[test]
    fn test_two_files_single_cycle() {
        let mut t = Traversal::new(150, 1, 1);
        assert_eq!(t.phase(), TraversalPhase::Ready);
        assert_eq!(t.index(), None);
        assert_eq!(count_steps(&mut t, 1000), 150);
        assert!(t.is_exhausted());
        assert_eq!(t.index(), Some(149));
    }

    #[test]
    fn test_reuse_single_entry() {
        let mut t = Traversal::new(1, 1, 3);
        assert_eq!(t.advance(), Some(Step::NextEntry));
        assert_eq!(t.reuse_count(), 1);
        assert_eq!(t.advance(), Some(Step::Reuse));
        assert!(!t.is_exhausted());
        assert_eq!(t.advance(), Some(Step::Reuse));
        assert_eq!(t.reuse_count(), 3);
        assert!(t.is_exhausted());
        assert_eq!(t.advance(), None);
        assert_eq!(t.index(), Some(0));
    }

    #[test]
    fn test_wrap_into_second_cycle() {
        let mut t = Traversal::new(2, 2, 1);
        assert_eq!(t.advance(), Some(Step::NextEntry));
        assert_eq!(t.advance(), Some(Step::NextEntry));
        assert_eq!(t.cycle(), 1);
        assert_eq!(t.advance(), Some(Step::Wrapped));
        assert_eq!(t.cycle(), 2);
        assert_eq!(t.index(), Some(0));
        assert_eq!(t.advance(), Some(Step::NextEntry));
        assert!(t.is_exhausted());
    }

    #[test]
    fn test_unbounded_cycling_wraps_forever() {
        let mut t = Traversal::new(3, 0, 1);
        for i in 0..30u64 {
            assert!(t.advance().is_some());
            assert_eq!(t.index(), Some(i % 3));
            assert!(!t.is_exhausted());
        }
        assert_eq!(t.cycle(), 10);
        assert_eq!(t.total_steps(), None);
    }

    #[test]
    fn test_reset_restarts() {
        let mut t = Traversal::new(2, 1, 1);
        count_steps(&mut t, 10);
        assert!(t.is_exhausted());
        t.reset();
        assert_eq!(t.phase(), TraversalPhase::Ready);
        assert_eq!(count_steps(&mut t, 10), 2);
    }

    #[test]
    fn test_raising_cycles_reopens() {
        let mut t = Traversal::new(2, 1, 1);
        count_steps(&mut t, 10);
        assert!(t.is_exhausted());
        t.set_num_cycles(2);
        assert!(!t.is_exhausted());
        assert_eq!(count_steps(&mut t, 10), 2);
    }

    #[test]
    fn test_empty_chain_is_exhausted() {
        let mut t = Traversal::new(0, 1, 1);
        assert!(t.is_exhausted());
        assert_eq!(t.advance(), None);

        // changing the limits must not re-open a chain without entries
        t.set_num_cycles(0);
        assert!(t.is_exhausted());
        assert!(!t.has_next());
        assert_eq!(t.advance(), None);
        t.set_entry_reuse(3);
        assert_eq!(t.advance(), None);
        assert_eq!(t.index(), None);
    }

    proptest! {
        #[test]
        fn prop_bounded_traversal_length(entries in 1u64..40, cycles in 1u64..5, reuse in 1u64..4) {
            let mut t = Traversal::new(entries, cycles, reuse);
            let expected = cycles * entries * reuse;
            prop_assert_eq!(t.total_steps(), Some(expected));
            prop_assert_eq!(count_steps(&mut t, expected + 10), expected);
        }

        #[test]
        fn prop_reuse_counter_in_range(entries in 1u64..10, reuse in 1u64..6, steps in 1usize..100) {
            let mut t = Traversal::new(entries, 0, reuse);
            for _ in 0..steps {
                t.advance();
                prop_assert!(t.reuse_count() >= 1 && t.reuse_count() <= reuse);
                prop_assert!(t.index().unwrap() < entries);
            }
        }
    }
}
