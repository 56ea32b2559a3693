use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Controls whether transactional records that are not yet resolved, or were aborted, are visible
/// to a fetch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(i8)]
pub enum IsolationLevel {
    /// Read up to the high watermark, including records of open and aborted transactions.
    #[default]
    ReadUncommitted = 0,

    /// Read up to the last stable offset; aborted transaction ranges are reported alongside the data.
    ReadCommitted = 1,
}
