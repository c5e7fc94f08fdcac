//! Runtime validation switch.
//!
//! Validation gates the checks that catch programmer errors on hot paths:
//! invalid draw list tags, submit indices outside the active range, command
//! lists used in the wrong state. With validation disabled those checks are
//! skipped entirely and invalid input is the caller's responsibility.

/// Whether the RHI validates caller input on hot paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationMode {
    /// Check inputs, log violations and turn them into no-ops.
    Enabled,
    /// Trust the caller.
    Disabled,
}

impl ValidationMode {
    /// Whether checks should run.
    #[inline]
    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled)
    }
}

impl Default for ValidationMode {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Enabled
        } else {
            Self::Disabled
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_follows_build_profile() {
        assert_eq!(
            ValidationMode::default().is_enabled(),
            cfg!(debug_assertions)
        );
        assert!(!ValidationMode::Disabled.is_enabled());
    }
}
