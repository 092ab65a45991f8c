#[derive(Debug, thiserror::Error)]
pub enum CsrError {
    #[error("row pointer array has length {actual}, expected {expected}")]
    InvalidRowPointersLength { expected: usize, actual: usize },

    #[error("row pointer {index} is {actual}, expected {expected}")]
    InvalidRowPointers { index: usize, expected: usize, actual: usize },

    #[error("column indices / values length mismatch ({column_indices} vs {values})")]
    ColumnIndicesValuesLengthMismatch { column_indices: usize, values: usize },

    #[error("index {index} out of bounds (max {max})")]
    OutOfBoundsIndex { index: usize, max: usize },

    #[error("row {index}: column {actual} not greater than {expected}")]
    ColumnsNotStrictlyIncreasing { index: usize, expected: usize, actual: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum MtxError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid MatrixMarket banner: {0}")]
    InvalidBanner(String),

    #[error("unsupported MatrixMarket type: {0}")]
    UnsupportedType(String),

    #[error("invalid size line: {0}")]
    InvalidSizeLine(String),

    #[error("invalid entry at line {line}: {reason}")]
    InvalidEntry { line: usize, reason: String },
}
