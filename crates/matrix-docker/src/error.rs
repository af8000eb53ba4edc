//! Error types for the container backend.

/// Failures talking to the container runtime itself.
///
/// These never escape [`DockerRunner`](crate::DockerRunner): they are turned
/// into provisioning failures of the entry being run.
#[derive(Debug, thiserror::Error)]
pub enum DockerError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("workspace {path} is not usable as a bind mount: {reason}")]
    Workspace { path: String, reason: String },
}
