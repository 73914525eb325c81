//! Handler priority.
//!
//! Handlers run in ascending numeric order: [`Priority::HIGHEST`] is
//! `i16::MIN` and runs first. The named levels are powers of two, so there
//! is room for manual placement between any two of them with
//! [`Priority::new`].

/// Dispatch position of an event handler. Lower values run earlier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Priority(i16);

impl Priority {
    pub const HIGHEST: Self = Self(i16::MIN);
    pub const HIGHER_14: Self = Self(-(1 << 14));
    pub const HIGHER_13: Self = Self(-(1 << 13));
    pub const HIGHER_12: Self = Self(-(1 << 12));
    pub const HIGHER_11: Self = Self(-(1 << 11));
    pub const HIGHER_10: Self = Self(-(1 << 10));
    pub const HIGHER_9: Self = Self(-(1 << 9));
    pub const HIGHER_8: Self = Self(-(1 << 8));
    pub const HIGHER_7: Self = Self(-(1 << 7));
    pub const HIGHER_6: Self = Self(-(1 << 6));
    pub const HIGHER_5: Self = Self(-(1 << 5));
    pub const HIGHER_4: Self = Self(-(1 << 4));
    pub const HIGHER_3: Self = Self(-(1 << 3));
    pub const HIGHER_2: Self = Self(-(1 << 2));
    pub const HIGHER_1: Self = Self(-(1 << 1));
    pub const NORMAL: Self = Self(0);
    pub const LOWER_1: Self = Self(1 << 1);
    pub const LOWER_2: Self = Self(1 << 2);
    pub const LOWER_3: Self = Self(1 << 3);
    pub const LOWER_4: Self = Self(1 << 4);
    pub const LOWER_5: Self = Self(1 << 5);
    pub const LOWER_6: Self = Self(1 << 6);
    pub const LOWER_7: Self = Self(1 << 7);
    pub const LOWER_8: Self = Self(1 << 8);
    pub const LOWER_9: Self = Self(1 << 9);
    pub const LOWER_10: Self = Self(1 << 10);
    pub const LOWER_11: Self = Self(1 << 11);
    pub const LOWER_12: Self = Self(1 << 12);
    pub const LOWER_13: Self = Self(1 << 13);
    pub const LOWER_14: Self = Self(1 << 14);
    pub const LOWEST: Self = Self(i16::MAX);

    /// A priority at an arbitrary position.
    #[must_use]
    pub const fn new(value: i16) -> Self {
        Self(value)
    }

    /// Get the raw value.
    #[must_use]
    pub const fn raw(self) -> i16 {
        self.0
    }
}

impl From<i16> for Priority {
    fn from(value: i16) -> Self {
        Self(value)
    }
}
