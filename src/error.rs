//! Public error kinds, mirroring the error-handling design in §7.
//!
//! Configuration errors ([`PatchError::InvalidConfiguration`],
//! [`PatchError::MalformedDescriptor`]) are meant to fail eagerly at
//! builder time. [`PatchError::TransformFailure`] and
//! [`PatchError::UnresolvableHook`] surface from per-class work and are
//! caught by [`crate::manager::ScriptManager`] rather than propagated to
//! the host's class-loading thread. [`PatchError::ReloadUnsupported`]
//! surfaces directly to whoever asked for a reload.

use thiserror::Error;

/// Errors produced by the rewrite engine.
#[derive(Error, Debug)]
pub enum PatchError {
    /// A string did not parse as a JVM type or method descriptor.
    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),

    /// A script builder rejected an invalid combination of options.
    #[error("invalid script configuration: {0}")]
    InvalidConfiguration(String),

    /// A hook class could not be read when transplant or insert was requested.
    #[error("could not resolve hook class {internal_name}: {source}")]
    UnresolvableHook {
        internal_name: String,
        #[source]
        source: anyhow::Error,
    },

    /// An exception escaped a script while transforming a specific class.
    #[error("script {script} failed to transform {class_name}: {source}")]
    TransformFailure {
        script: String,
        class_name: String,
        #[source]
        source: anyhow::Error,
    },

    /// The host runtime does not support re-transforming an already-loaded class.
    #[error("host runtime cannot reload class {0}")]
    ReloadUnsupported(String),
}

pub(crate) type Result<T> = std::result::Result<T, PatchError>;
