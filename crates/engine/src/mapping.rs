//! Logical and physical page order.
//!
//! Logical order is what the reader sees ("page 1 is the first page I
//! read"); physical order is storage order in the source. Right-to-left
//! reading reverses one into the other.

/// Reading direction of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReadingDirection {
    #[default]
    LeftToRight,
    RightToLeft,
}

impl ReadingDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LeftToRight => "ltr",
            Self::RightToLeft => "rtl",
        }
    }
}

/// Map a logical page to its physical index.
///
/// An empty document maps everything to itself. Indices past the end are
/// clamped to the last page first.
pub fn to_physical(logical: u32, total: u32, direction: ReadingDirection) -> u32 {
    reorder(logical, total, direction)
}

/// Map a physical index back to its logical page.
pub fn to_logical(physical: u32, total: u32, direction: ReadingDirection) -> u32 {
    reorder(physical, total, direction)
}

// RTL reversal is an involution, so both directions share one body.
fn reorder(index: u32, total: u32, direction: ReadingDirection) -> u32 {
    if total == 0 {
        return index;
    }

    let last = total - 1;
    let index = index.min(last);
    match direction {
        ReadingDirection::LeftToRight => index,
        ReadingDirection::RightToLeft => last - index,
    }
}

/// Mapper bound to one document's page count and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexMapper {
    pub total: u32,
    pub direction: ReadingDirection,
}

impl IndexMapper {
    pub fn new(total: u32, direction: ReadingDirection) -> Self {
        Self { total, direction }
    }

    pub fn to_physical(&self, logical: u32) -> u32 {
        to_physical(logical, self.total, self.direction)
    }

    pub fn to_logical(&self, physical: u32) -> u32 {
        to_logical(physical, self.total, self.direction)
    }
}
