//! Absence-safe envelope for single-record reads.

/// Either a record or an explicit "no such record".
///
/// Single-record reads resolve to an `Optional` instead of failing when
/// nothing matches, so a stream can always emit exactly one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Optional<T>(Option<T>);

impl<T> Optional<T> {
    /// Wraps a possibly absent value.
    #[must_use]
    pub const fn wrap(value: Option<T>) -> Self {
        Self(value)
    }

    /// Wraps a present value.
    #[must_use]
    pub const fn present(value: T) -> Self {
        Self(Some(value))
    }

    /// Creates an empty envelope.
    #[must_use]
    pub const fn absent() -> Self {
        Self(None)
    }

    /// Returns true if no value is held.
    #[must_use]
    pub const fn is_absent(&self) -> bool {
        self.0.is_none()
    }

    /// Borrows the held value.
    #[must_use]
    pub const fn get(&self) -> Option<&T> {
        self.0.as_ref()
    }

    /// Unwraps into a standard option.
    #[must_use]
    pub fn into_inner(self) -> Option<T> {
        self.0
    }
}

impl<T> Default for Optional<T> {
    fn default() -> Self {
        Self::absent()
    }
}

impl<T> From<Option<T>> for Optional<T> {
    fn from(value: Option<T>) -> Self {
        Self(value)
    }
}

impl<T> From<Optional<T>> for Option<T> {
    fn from(value: Optional<T>) -> Self {
        value.0
    }
}
