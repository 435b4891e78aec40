// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// The result of a cache read: a value plus whether it was actually found.
///
/// A missing entry holds `T::default()`, so a stored default value and a miss can still
/// be told apart through [`exists`](Self::exists).
///
/// # Examples
///
/// ```
/// use cairn::MemoryValue;
///
/// let hit = MemoryValue::present(0_u32);
/// let miss = MemoryValue::<u32>::missing();
///
/// assert_eq!(hit.value(), miss.value());
/// assert!(hit.exists());
/// assert!(!miss.exists());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryValue<T> {
    value: T,
    exists: bool,
}

impl<T: Default> MemoryValue<T> {
    /// Creates a miss.
    #[must_use]
    pub fn missing() -> Self {
        Self {
            value: T::default(),
            exists: false,
        }
    }
}

impl<T> MemoryValue<T> {
    /// Creates a hit.
    #[must_use]
    pub fn present(value: T) -> Self {
        Self { value, exists: true }
    }

    /// Returns `true` if the entry was found.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.exists
    }

    /// Returns the value, which is `T::default()` for a miss.
    #[must_use]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Consumes the result and returns the value.
    #[must_use]
    pub fn into_value(self) -> T {
        self.value
    }

    /// Converts into an `Option`, mapping a miss to `None`.
    #[must_use]
    pub fn into_option(self) -> Option<T> {
        self.exists.then_some(self.value)
    }
}

impl<T: Default> From<Option<T>> for MemoryValue<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or_else(Self::missing, Self::present)
    }
}
