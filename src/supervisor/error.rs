//! Error types for the child process supervisor.

use thiserror::Error;

/// Errors raised while starting the supervised process.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The argument vector was empty.
    #[error("No command given")]
    EmptyCommand,

    /// The command could not be resolved on `PATH`.
    #[error("Command '{command}' not found: {source}")]
    NotFound {
        /// The command as given.
        command: String,
        /// Lookup failure.
        #[source]
        source: which::Error,
    },

    /// The operating system refused to start the process.
    #[error("Failed to start '{command}': {source}")]
    Spawn {
        /// The command as given.
        command: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
