//! Maps failures to the hint printed under `ERROR:`.
use crate::download::AcquireError;
use crate::fetch::FetchError;
use std::fmt;
use std::io;

/// Broad category of what the user can do about a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Remedy {
    /// The tool needs more privileges than it has.
    Permission,
    /// The server or the connection to it is at fault.
    Network,
}

impl fmt::Display for Remedy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remedy::Permission => write!(f, "Please run this tool as root (e.g. with sudo)."),
            Remedy::Network => write!(
                f,
                "Please check your network connection and that the server is reachable."
            ),
        }
    }
}

/// Walks the error chain and returns the first category that applies.
pub fn classify(err: &anyhow::Error) -> Option<Remedy> {
    err.chain().find_map(|cause| {
        if let Some(e) = cause.downcast_ref::<FetchError>() {
            return match e {
                FetchError::Transport { .. } | FetchError::Status { .. } => Some(Remedy::Network),
                FetchError::Io(io) => io_remedy(io),
                FetchError::Cancelled => None,
            };
        }
        match cause.downcast_ref::<AcquireError>() {
            Some(AcquireError::FetchFailed(FetchError::Io(io))) => return io_remedy(io),
            Some(AcquireError::FetchFailed(_)) => return Some(Remedy::Network),
            Some(AcquireError::Io(io)) => return io_remedy(io),
            _ => {}
        }
        cause.downcast_ref::<io::Error>().and_then(io_remedy)
    })
}

fn io_remedy(e: &io::Error) -> Option<Remedy> {
    (e.kind() == io::ErrorKind::PermissionDenied).then_some(Remedy::Permission)
}
