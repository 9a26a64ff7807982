//! Construction-time configuration.

/// Parameters for building a ring buffer.
///
/// The requested capacity is rounded up to the next power of two; see
/// [`crate::capacity::round_up_pow2`]. Nothing else about a ring is
/// configurable at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RingConfig {
    /// Requested number of slots.
    pub capacity: usize,
}

impl RingConfig {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub const fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }
}

impl Default for RingConfig {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacity() {
        assert_eq!(RingConfig::default().capacity, 1024);
        assert_eq!(RingConfig::with_capacity(3).capacity, 3);
    }

    #[test]
    fn test_config_builds_both_rings() {
        let config = RingConfig::with_capacity(5);
        let (producer, _consumer) = crate::sync::spsc::channel_with_config::<u8>(&config).unwrap();
        assert_eq!(producer.capacity(), 7);
        assert_eq!(crate::MpmcRing::<u8>::with_config(&config).unwrap().capacity(), 8);
    }
}
