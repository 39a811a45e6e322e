//! Pass-target validation and wgpu validation-layer setup.
//!
//! Every solver pass checks its targets before running. A failed check is
//! logged and the pass is skipped for that tick; the run continues.

use deluge_common::GpuError;
use tracing::{error, info};

/// wgpu instance flags: validation in debug builds only.
#[must_use]
pub fn gpu_instance_flags() -> wgpu::InstanceFlags {
    if cfg!(debug_assertions) {
        info!("GPU validation layer enabled (debug build)");
        wgpu::InstanceFlags::VALIDATION | wgpu::InstanceFlags::DEBUG
    } else {
        wgpu::InstanceFlags::empty()
    }
}

/// Creates a wgpu instance with [`gpu_instance_flags`].
#[must_use]
pub fn create_validated_instance() -> wgpu::Instance {
    wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        flags: gpu_instance_flags(),
        ..Default::default()
    })
}

/// Logs uncaptured device errors. Use with `device.on_uncaptured_error()`.
pub fn handle_device_error(error: &wgpu::Error) {
    error!("GPU device error: {error}");
}

/// Checks that a pass target holds exactly `expected` bytes.
pub fn check_target(target: &str, actual: u64, expected: u64) -> Result<(), GpuError> {
    if actual == expected {
        Ok(())
    } else {
        Err(GpuError::IncompleteTarget {
            target: target.to_string(),
            reason: format!("{actual} bytes, expected {expected}"),
        })
    }
}

/// Counts target checks across ticks.
///
/// Failures are logged as they happen; only the count is kept, so a long
/// run costs nothing per tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationHarness {
    failures: u64,
    tick: u64,
}

impl ValidationHarness {
    /// Creates a harness with no failures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the start of a tick.
    pub fn begin_tick(&mut self, tick: u64) {
        self.tick = tick;
    }

    /// Logs a failed check; returns `condition`.
    pub fn validate(&mut self, condition: bool, message: &str) -> bool {
        if !condition {
            self.failures += 1;
            error!("pass target check failed at tick {}: {message}", self.tick);
        }
        condition
    }

    /// Like [`validate`](Self::validate) for a [`check_target`] result.
    pub fn validate_target(&mut self, check: Result<(), GpuError>) -> bool {
        match check {
            Ok(()) => true,
            Err(e) => self.validate(false, &e.to_string()),
        }
    }

    /// Failures seen since creation.
    #[must_use]
    pub const fn failure_count(&self) -> u64 {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_target() {
        assert!(check_target("water", 256, 256).is_ok());
        let Err(GpuError::IncompleteTarget { target, .. }) = check_target("flux", 12, 256) else {
            panic!("short target must fail");
        };
        assert_eq!(target, "flux");
    }

    #[test]
    fn test_failures_counted() {
        let mut harness = ValidationHarness::new();
        harness.begin_tick(3);
        assert!(!harness.validate(false, "short buffer"));
        assert!(harness.validate(true, "fine"));
        assert!(!harness.validate_target(check_target("water", 0, 4)));
        assert_eq!(harness.failure_count(), 2);
    }

    #[test]
    fn test_passing_checks_leave_no_trace() {
        let mut harness = ValidationHarness::new();
        for tick in 1..=10_000 {
            harness.begin_tick(tick);
            assert!(harness.validate(true, "fine"));
            assert!(harness.validate_target(check_target("water", 4, 4)));
        }
        assert_eq!(
            harness,
            ValidationHarness {
                failures: 0,
                tick: 10_000
            }
        );
    }
}
