use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::exception::{ExcType, RunError, SimpleException};

/// Default number of allocations between two garbage collections.
pub const DEFAULT_GC_INTERVAL: usize = 10_000;

/// Recommended maximum frame depth per thread if not otherwise specified.
pub const DEFAULT_MAX_FRAME_DEPTH: usize = 1000;

/// Error returned when a resource limit is exceeded during execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Maximum number of allocations exceeded.
    Allocation { limit: usize, count: usize },
    /// Maximum number of executed instructions exceeded.
    Instruction { limit: usize, count: usize },
    /// Maximum execution time exceeded.
    Time { limit: Duration, elapsed: Duration },
    /// Maximum frame depth of a single thread exceeded.
    FrameDepth { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation { limit, count } => {
                write!(f, "allocation limit exceeded: {count} > {limit}")
            }
            Self::Instruction { limit, count } => {
                write!(f, "instruction limit exceeded: {count} > {limit}")
            }
            Self::Time { limit, elapsed } => {
                write!(f, "time limit exceeded: {elapsed:?} > {limit:?}")
            }
            Self::FrameDepth { .. } => f.write_str("maximum recursion depth exceeded"),
        }
    }
}

impl std::error::Error for ResourceError {}

impl ResourceError {
    /// Maps the violated limit to the exception class reported for it.
    ///
    /// - `Allocation` → `MemoryError`
    /// - `Instruction` → `TimeoutError`
    /// - `Time` → `TimeoutError`
    /// - `FrameDepth` → `RecursionError`
    #[must_use]
    pub(crate) fn exc_type(&self) -> ExcType {
        match self {
            Self::Allocation { .. } => ExcType::MemoryError,
            Self::Instruction { .. } | Self::Time { .. } => ExcType::TimeoutError,
            Self::FrameDepth { .. } => ExcType::RecursionError,
        }
    }
}

impl From<ResourceError> for RunError {
    fn from(err: ResourceError) -> Self {
        let exc = SimpleException::new_msg(err.exc_type(), &err);
        // frame depth stays catchable, budgets skip every handler
        if matches!(err, ResourceError::FrameDepth { .. }) {
            Self::Exc(exc)
        } else {
            Self::Uncatchable(exc)
        }
    }
}

/// Trait for tracking resource usage and scheduling garbage collection.
///
/// The heap owns one tracker and consults it on every allocation; the engine consults it
/// once per instruction step and before every frame push. Implementations are chosen at
/// construction time and monomorphized, so [`NoLimitTracker`] costs nothing.
pub trait ResourceTracker: fmt::Debug {
    /// Called before each heap allocation.
    fn on_allocate(&mut self) -> Result<(), ResourceError>;

    /// Called for every slot reclaimed by the garbage collector.
    fn on_free(&mut self) {}

    /// Called once per instruction step, before the instruction is fetched.
    fn check_step(&mut self) -> Result<(), ResourceError>;

    /// Called before pushing a frame onto a thread.
    ///
    /// # Arguments
    /// * `current_depth` - Frames already on the thread, not counting the halt frame
    fn check_frame_depth(&self, current_depth: usize) -> Result<(), ResourceError>;

    /// Whether a collection should run, given allocations since the previous one.
    fn should_gc(&self, allocations_since_gc: usize) -> bool {
        allocations_since_gc >= DEFAULT_GC_INTERVAL
    }
}

/// A resource tracker that enforces nothing beyond the default frame depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    #[inline]
    fn on_allocate(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn check_step(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    #[inline]
    fn check_frame_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        if current_depth >= DEFAULT_MAX_FRAME_DEPTH {
            Err(ResourceError::FrameDepth {
                limit: DEFAULT_MAX_FRAME_DEPTH,
                depth: current_depth + 1,
            })
        } else {
            Ok(())
        }
    }
}

/// Configuration for resource limits.
///
/// All limits are optional - set to `None` to disable a specific limit.
/// Use `ResourceLimits::default()` for no limits, or build custom limits
/// with the builder pattern.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    /// Maximum number of instructions executed across all threads.
    pub max_instructions: Option<usize>,
    /// Maximum number of heap allocations allowed.
    pub max_allocations: Option<usize>,
    /// Maximum execution time.
    pub max_duration: Option<Duration>,
    /// Maximum number of frames on a single thread.
    pub max_frame_depth: Option<usize>,
    /// Run garbage collection every N allocations.
    pub gc_interval: Option<usize>,
}

impl ResourceLimits {
    /// Creates limits with everything disabled except the default frame depth.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_frame_depth: Some(DEFAULT_MAX_FRAME_DEPTH),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn max_instructions(mut self, limit: usize) -> Self {
        self.max_instructions = Some(limit);
        self
    }

    #[must_use]
    pub fn max_allocations(mut self, limit: usize) -> Self {
        self.max_allocations = Some(limit);
        self
    }

    #[must_use]
    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    #[must_use]
    pub fn max_frame_depth(mut self, limit: Option<usize>) -> Self {
        self.max_frame_depth = limit;
        self
    }

    /// Sets the garbage collection interval (run GC every N allocations).
    #[must_use]
    pub fn gc_interval(mut self, interval: usize) -> Self {
        self.gc_interval = Some(interval);
        self
    }
}

/// A resource tracker that enforces configurable limits.
///
/// The start time is recorded when the tracker is created, so create it immediately
/// before starting execution.
#[derive(Debug)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    start_time: Instant,
    allocation_count: usize,
    instruction_count: usize,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            start_time: Instant::now(),
            allocation_count: 0,
            instruction_count: 0,
        }
    }

    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.allocation_count
    }

    #[must_use]
    pub fn instruction_count(&self) -> usize {
        self.instruction_count
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_allocate(&mut self) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_allocations
            && self.allocation_count >= max
        {
            return Err(ResourceError::Allocation {
                limit: max,
                count: self.allocation_count + 1,
            });
        }
        self.allocation_count += 1;
        Ok(())
    }

    fn check_step(&mut self) -> Result<(), ResourceError> {
        self.instruction_count += 1;
        if let Some(max) = self.limits.max_instructions
            && self.instruction_count > max
        {
            return Err(ResourceError::Instruction {
                limit: max,
                count: self.instruction_count,
            });
        }

        if let Some(max) = self.limits.max_duration {
            let elapsed = self.start_time.elapsed();
            if elapsed > max {
                return Err(ResourceError::Time { limit: max, elapsed });
            }
        }
        Ok(())
    }

    fn check_frame_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_frame_depth
            && current_depth >= max
        {
            return Err(ResourceError::FrameDepth {
                limit: max,
                depth: current_depth + 1,
            });
        }
        Ok(())
    }

    fn should_gc(&self, allocations_since_gc: usize) -> bool {
        allocations_since_gc >= self.limits.gc_interval.unwrap_or(DEFAULT_GC_INTERVAL)
    }
}
