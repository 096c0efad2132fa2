use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Lifecycle stage of a query. Stages only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExecutionStage {
    Waiting,
    Executing,
    Reporting,
    Finished,
}

impl ExecutionStage {
    /// Whether moving from `self` to `next` is allowed. Besides the linear
    /// path, a query may finish straight from `Executing` when preempted and
    /// from `Waiting` when it fails before execution starts.
    pub fn can_advance_to(self, next: ExecutionStage) -> bool {
        use ExecutionStage::*;
        matches!(
            (self, next),
            (Waiting, Executing)
                | (Executing, Reporting)
                | (Reporting, Finished)
                | (Executing, Finished)
                | (Waiting, Finished)
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Success,
    Failure,
    TimedOut,
}

/// Execution type bitmask. `READ` is the absence of `WRITE`; `PROFILE` combines
/// with either.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ExecutionFlags(pub u8);

impl ExecutionFlags {
    pub const READ: Self = Self(0);
    pub const WRITE: Self = Self(1);
    pub const PROFILE: Self = Self(1 << 1);

    pub const fn contains(&self, flag: Self) -> bool {
        (self.0 & flag.0) != 0
    }

    pub const fn set(&self, flag: Self) -> Self {
        Self(self.0 | flag.0)
    }

    pub const fn is_write(&self) -> bool {
        self.contains(Self::WRITE)
    }

    pub const fn is_profile(&self) -> bool {
        self.contains(Self::PROFILE)
    }
}

impl fmt::Display for ExecutionFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_write() { "WRITE" } else { "READ" })?;
        if self.is_profile() {
            f.write_str("|PROFILE")?;
        }
        Ok(())
    }
}

/// Durations of the waiting, executing and reporting stages.
#[derive(Debug)]
pub(crate) struct StageTimer {
    stage_started: Instant,
    durations: [Duration; 3],
}

impl StageTimer {
    pub(crate) fn start() -> Self {
        Self {
            stage_started: Instant::now(),
            durations: [Duration::ZERO; 3],
        }
    }

    /// Freeze the clock of `stage` and start timing the next one.
    pub(crate) fn close(&mut self, stage: ExecutionStage) {
        let now = Instant::now();
        if let Some(slot) = Self::slot(stage) {
            self.durations[slot] += now.duration_since(self.stage_started);
        }
        self.stage_started = now;
    }

    /// Time spent so far in `stage`, including the running interval when it
    /// is the current stage.
    pub(crate) fn elapsed(&self, stage: ExecutionStage, current: ExecutionStage) -> Duration {
        let Some(slot) = Self::slot(stage) else {
            return Duration::ZERO;
        };
        let mut total = self.durations[slot];
        if stage == current {
            total += self.stage_started.elapsed();
        }
        total
    }

    fn slot(stage: ExecutionStage) -> Option<usize> {
        match stage {
            ExecutionStage::Waiting => Some(0),
            ExecutionStage::Executing => Some(1),
            ExecutionStage::Reporting => Some(2),
            ExecutionStage::Finished => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_never_move_backwards() {
        use ExecutionStage::*;
        assert!(Waiting.can_advance_to(Executing));
        assert!(Executing.can_advance_to(Finished));
        assert!(!Reporting.can_advance_to(Executing));
        assert!(!Finished.can_advance_to(Waiting));
        assert!(!Waiting.can_advance_to(Reporting));
    }

    #[test]
    fn profile_combines_with_write() {
        let flags = ExecutionFlags::READ.set(ExecutionFlags::PROFILE);
        assert!(!flags.is_write());
        assert!(flags.is_profile());
        let flags = flags.set(ExecutionFlags::WRITE);
        assert_eq!(flags.to_string(), "WRITE|PROFILE");
    }
}
