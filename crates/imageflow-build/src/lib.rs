//! imageflow image build and publish
//!
//! This crate builds every target of a manifest for each of its
//! architectures, assembles a multi-architecture OCI index, and pushes the
//! result to every configured registry with per-registry authentication,
//! bounded concurrency and retry of transient failures.

pub mod artifact;
pub mod auth;
pub mod backend;
pub mod builder;
pub mod cancel;
pub mod client;
pub mod context;
pub mod distribution;
pub mod error;
pub mod log;
pub mod oci;
pub mod orchestrator;
pub mod progress;
pub mod pusher;
pub mod report;

pub use artifact::{ArchImage, Artifact};
pub use auth::{Credentials, DockerConfigStore, RegistryAuthManager, Secret, resolve_credentials};
pub use backend::{ArchBuildRequest, BuildBackend, BuildxBackend};
pub use builder::BuildEngine;
pub use cancel::CancelToken;
pub use client::{RegistryClient, RegistrySession};
pub use context::{ContextBuilder, ContextInput};
pub use distribution::OciRegistryClient;
pub use error::{AuthError, BuildError, BuildResult, PushError, PushErrorClass};
pub use log::{FileLogSink, LogSink, MemoryLogSink, NullLogSink};
pub use orchestrator::{BuildLogs, Orchestrator};
pub use progress::RunProgress;
pub use pusher::{PushCoordinator, RetryPolicy};
pub use report::{BuildOutcome, ErrorKind, Failure, PushResult, Report, RunMode, TargetReport};
