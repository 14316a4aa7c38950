use crate::executor::InvocationError;
use crate::mutator::MutationError;
use crate::namespace::NamespaceError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub const EXIT_CONFIG: u8 = 1;
pub const EXIT_TRANSCRIPT: u8 = 2;
pub const EXIT_NAMESPACE_SETUP: u8 = 3;
pub const EXIT_SEED_READ: u8 = 4;
pub const EXIT_MUTATION: u8 = 5;
pub const EXIT_CLEANUP: u8 = 6;
pub const EXIT_NAMESPACE_TEARDOWN: u8 = 7;

/// Conditions that make the rest of a fuzz session meaningless.
///
/// Anything the plugin under test does wrong is recorded as data instead; only
/// a broken environment ends up here.
#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to read network configuration {path:?}: {source}")]
    SeedRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open transcript log {path:?}: {source}")]
    TranscriptOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write transcript log: {0}")]
    TranscriptWrite(#[source] io::Error),

    #[error("failed to set up network namespace: {0}")]
    NamespaceSetup(#[source] NamespaceError),

    #[error(transparent)]
    Mutation(#[from] MutationError),

    /// DEL after a successful ADD did not release what ADD created.
    #[error("DEL after successful ADD failed: {0}")]
    Cleanup(#[source] InvocationError),

    #[error("failed to tear down network namespace: {0}")]
    NamespaceTeardown(#[source] NamespaceError),
}

impl HarnessError {
    /// Process exit status the CLI terminates with for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            HarnessError::Config(_) => EXIT_CONFIG,
            HarnessError::TranscriptOpen { .. } | HarnessError::TranscriptWrite(_) => {
                EXIT_TRANSCRIPT
            }
            HarnessError::NamespaceSetup(_) => EXIT_NAMESPACE_SETUP,
            HarnessError::SeedRead { .. } => EXIT_SEED_READ,
            HarnessError::Mutation(_) => EXIT_MUTATION,
            HarnessError::Cleanup(_) => EXIT_CLEANUP,
            HarnessError::NamespaceTeardown(_) => EXIT_NAMESPACE_TEARDOWN,
        }
    }
}
