use core::fmt;

/// Errors returned by table and funnel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The allocator could not supply a zeroed block of `size` bytes
    Alloc {
        /// Requested block size in bytes
        size: usize,
    },

    /// The computed bucket buffer does not fit in the address space
    LayoutOverflow,

    /// Tables need at least one key byte to tell entries apart
    ZeroKeySize,

    /// A key span did not match the table's fixed key size
    InvalidKeySize {
        /// Key size the table was built with
        expected: usize,
        /// Length of the offending key
        actual: usize,
    },

    /// A value span did not match the table's fixed value size
    InvalidValueSize {
        /// Value size the table was built with
        expected: usize,
        /// Length of the offending value
        actual: usize,
    },

    /// The live count reached the high-water mark; the table was not modified
    CapacityExhausted,

    /// Every slot reachable by the probe sequence was taken by entries that
    /// could not be displaced; the table was restored and not modified
    ProbeSequenceExhausted,

    /// Buffered funnel inserts that the table refused during a drain
    Rejected {
        /// Number of refused inserts
        count: usize,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alloc { size } => write!(f, "failed to allocate {size} bytes for bucket store"),
            Self::LayoutOverflow => f.write_str("bucket store size overflows the address space"),
            Self::ZeroKeySize => f.write_str("key size must be at least one byte"),
            Self::InvalidKeySize { expected, actual } => {
                write!(f, "key is {actual} bytes, table expects {expected}")
            }
            Self::InvalidValueSize { expected, actual } => {
                write!(f, "value is {actual} bytes, table expects {expected}")
            }
            Self::CapacityExhausted => f.write_str("table reached its high-water mark"),
            Self::ProbeSequenceExhausted => {
                f.write_str("probe sequence exhausted without finding a free slot")
            }
            Self::Rejected { count } => write!(f, "{count} buffered inserts were rejected"),
        }
    }
}

impl core::error::Error for Error {}

/// Result alias for table and funnel operations
pub type Result<T> = core::result::Result<T, Error>;
