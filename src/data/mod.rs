mod row;

pub use row::{LocalRowBlock, Row, RowBlock};

/// A 64-bit feature ID. The top bits may encode a field tag; this crate
/// never interprets them except in the localizer's optional hash/reverse
/// step.
pub type FeaId = u64;
