//! Container-runtime backend for compat-matrix.
//!
//! [`DockerRunner`] drives the `docker` CLI (or any CLI-compatible runtime
//! such as `podman`) to run one matrix entry in a throwaway container.

pub mod command;
pub mod container;
pub mod error;
pub mod runner;
pub mod step;

pub use command::{run_command, CommandOutput};
pub use container::{ContainerHandle, VERSION_LABEL};
pub use error::DockerError;
pub use runner::DockerRunner;
pub use step::{plan_steps, shell_quote, ContainerStep, StepKind};
