use std::io;

/// Errors raised by registry services and the registration writes built on
/// them.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The active backend cannot express the requested operation.
    #[error("{operation} is not supported by the {backend} backend")]
    Unsupported {
        operation: &'static str,
        backend: String,
    },

    /// A registration root the operation needs is not available.
    #[error("the {0} root is not available")]
    MissingRoot(&'static str),

    /// An OS-level registry failure, propagated verbatim.
    #[error(transparent)]
    Io(#[from] io::Error),
}
