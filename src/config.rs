//! Process-global configuration switches: the only one is the default
//! slice-caching policy newly-constructed nodes inherit.

use std::sync::atomic::{AtomicU8, Ordering};

/// Slice enumeration/caching policy for a [`crate::Node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SliceCachingBehavior {
    /// Always re-enumerate the slice directory on every call.
    #[default]
    None,
    /// Cache only the newest slice; re-enumerate the rest each call.
    Latest,
    /// Cache the full slice list on first call.
    All,
}

impl SliceCachingBehavior {
    fn to_u8(self) -> u8 {
        match self {
            SliceCachingBehavior::None => 0,
            SliceCachingBehavior::Latest => 1,
            SliceCachingBehavior::All => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => SliceCachingBehavior::Latest,
            2 => SliceCachingBehavior::All,
            _ => SliceCachingBehavior::None,
        }
    }
}

static DEFAULT_BEHAVIOR: AtomicU8 = AtomicU8::new(0);

/// Set the default slice-caching behavior newly-constructed nodes inherit.
/// Mirrors the original `setDefaultSliceCachingBehavior` process-global.
pub fn set_default_slice_caching_behavior(behavior: SliceCachingBehavior) {
    DEFAULT_BEHAVIOR.store(behavior.to_u8(), Ordering::Relaxed);
}

/// Current process-wide default, consulted by [`crate::Node`] at construction.
pub fn default_slice_caching_behavior() -> SliceCachingBehavior {
    SliceCachingBehavior::from_u8(DEFAULT_BEHAVIOR.load(Ordering::Relaxed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_none() {
        assert_eq!(default_slice_caching_behavior(), SliceCachingBehavior::None);
    }

    #[test]
    fn round_trips_through_global() {
        set_default_slice_caching_behavior(SliceCachingBehavior::All);
        assert_eq!(default_slice_caching_behavior(), SliceCachingBehavior::All);
        // restore so other tests in this process see the default again
        set_default_slice_caching_behavior(SliceCachingBehavior::None);
    }
}
