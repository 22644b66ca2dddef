//! The [`RerankErrorKind`] which makes it easy for downstream users of the error type to match on the exact error.

use context_error::{BoxedError, Context, CreateError, ErrorKind};

/// The kind of error that was raised by any of the reranking operations.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum RerankErrorKind {
    /// A layer was requested that does not exist for the topology of the network
    InvalidLayer,
    /// A PSM, peptide, or protein index does not exist in the dataset
    IndexOutOfRange,
    /// The data cannot be used as is, for example a set without any decoys
    #[default]
    InvalidInput,
    /// The parameters are not internally consistent
    InvalidParameters,
}

impl ErrorKind for RerankErrorKind {
    type Settings = ();
    fn descriptor(&self) -> &'static str {
        "error"
    }
    fn ignored(&self, _settings: Self::Settings) -> bool {
        false
    }
    fn is_error(&self, _settings: Self::Settings) -> bool {
        true
    }
}

/// The error type returned by all fallible operations in this crate.
pub type RerankError = BoxedError<'static, RerankErrorKind>;

/// Create the error for an index that falls outside of a table of the given length.
pub(crate) fn index_out_of_range(table: &'static str, index: usize, length: usize) -> RerankError {
    BoxedError::new(
        RerankErrorKind::IndexOutOfRange,
        "Index out of range",
        format!("The {table} index {index} does not exist, there are only {length} {table}s"),
        Context::none(),
    )
}

/// Create an error for unusable input data.
pub(crate) fn invalid_input(short: &'static str, long: impl Into<String>) -> RerankError {
    BoxedError::new(
        RerankErrorKind::InvalidInput,
        short,
        long.into(),
        Context::none(),
    )
}

/// Create an error for inconsistent parameters.
pub(crate) fn invalid_parameters(short: &'static str, long: impl Into<String>) -> RerankError {
    BoxedError::new(
        RerankErrorKind::InvalidParameters,
        short,
        long.into(),
        Context::none(),
    )
}
