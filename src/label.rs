use std::{fmt, num::NonZeroU64};

/// Opaque identity of one supervised service instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Label(NonZeroU64);

impl Label {
    #[must_use]
    pub fn new(raw: NonZeroU64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<Label> for u64 {
    fn from(value: Label) -> Self {
        value.get()
    }
}

/// Hands out labels in strictly increasing order, starting at 1.
#[derive(Debug)]
pub(crate) struct LabelAllocator {
    next: NonZeroU64,
}

impl Default for LabelAllocator {
    fn default() -> Self {
        Self {
            next: NonZeroU64::MIN,
        }
    }
}

impl LabelAllocator {
    pub(crate) fn next(&mut self) -> Label {
        let label = Label(self.next);
        self.next = self.next.saturating_add(1);
        label
    }
}
