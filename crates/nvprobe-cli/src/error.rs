use std::io;

use nvprobe_config::ConfigError;
use nvprobe_io::{ProbeError, ProbeErrorKind};
use thiserror::Error;

pub const EXIT_USAGE: u8 = 1;
pub const EXIT_IO: u8 = 2;
pub const EXIT_SHORT_READ: u8 = 3;
pub const EXIT_MISMATCH: u8 = 4;
pub const EXIT_CONFIG: u8 = 5;
/// EX_SOFTWARE
pub const EXIT_INTERNAL: u8 = 70;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("no file path given")]
    Usage,

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] io::Error),

    #[error("failed to start runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("probe task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Usage => EXIT_USAGE,
            CliError::Probe(e) => match e.kind() {
                ProbeErrorKind::Io => EXIT_IO,
                ProbeErrorKind::ShortRead => EXIT_SHORT_READ,
                ProbeErrorKind::Mismatch => EXIT_MISMATCH,
            },
            CliError::Config(_) => EXIT_CONFIG,
            CliError::Signal(_) | CliError::Runtime(_) | CliError::Join(_) => EXIT_INTERNAL,
        }
    }
}
