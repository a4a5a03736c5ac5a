//! Error types for the quiesce thrasher.

use std::fmt;

use thiserror::Error;

/// Exit code returned by a cluster command.
///
/// Follows the negative-errno convention: `0` is success, `-ENOTTY` means the
/// command was addressed to a node that is not the quiesce coordinator, and any
/// other negative value is a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    /// Successful completion.
    pub const SUCCESS: ExitCode = ExitCode(0);

    /// The addressed node is not the coordinator.
    pub const WRONG_TARGET: ExitCode = ExitCode(-libc::ENOTTY);

    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    pub fn is_redirect(self) -> bool {
        self == Self::WRONG_TARGET
    }

    /// The positive errno carried by this exit code.
    pub fn errno(self) -> i32 {
        self.0.wrapping_neg()
    }

    /// Symbolic errno name, if known.
    pub fn errno_name(self) -> Option<&'static str> {
        errno_name(self.errno())
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({})",
            self.errno(),
            self.errno_name().unwrap_or("Unknown")
        )
    }
}

/// Errors raised by the quiesce cycle, actor and group controller.
#[derive(Debug, Error)]
pub enum QuiesceError {
    /// The quiesce command returned a non-redirect failure.
    #[error("error quiescing {path}: {code}")]
    Quiesce { path: String, code: ExitCode },

    /// The release command returned a non-redirect failure.
    #[error("error releasing quiesce set {set_id}: {code}")]
    Release { set_id: String, code: ExitCode },

    /// A success response could not be decoded.
    #[error("error parsing quiesce response: {0}")]
    MalformedResponse(String),

    /// The command could not be executed at all.
    #[error("command transport failed: {0:#}")]
    Transport(anyhow::Error),

    /// The actor task panicked.
    #[error("thrasher task panicked: {0}")]
    Panicked(String),

    /// One or more thrashers recorded a failure.
    #[error("error during quiesce thrashing: {name} failed ({failed} of {total} thrashers): {source}")]
    ThrasherFailed {
        name: String,
        failed: usize,
        total: usize,
        #[source]
        source: Box<QuiesceError>,
    },
}

/// Errors raised while validating configuration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("min_quiesce ({min}) must not exceed max_quiesce ({max})")]
    QuiesceBounds { min: u64, max: u64 },

    #[error("quiesce_factor must be a finite number, got {0}")]
    NonFiniteFactor(f64),

    #[error("quiesce_factor {0} is outside [0.005, 0.5]")]
    FactorOutOfRange(f64),

    #[error("quiesced path must not be empty")]
    EmptyPath,

    #[error("failed to read config {path}: {reason}")]
    Load { path: String, reason: String },
}

/// Symbolic name of an errno value.
pub fn errno_name(errno: i32) -> Option<&'static str> {
    let name = match errno {
        libc::EPERM => "EPERM",
        libc::ENOENT => "ENOENT",
        libc::ESRCH => "ESRCH",
        libc::EINTR => "EINTR",
        libc::EIO => "EIO",
        libc::ENXIO => "ENXIO",
        libc::E2BIG => "E2BIG",
        libc::EBADF => "EBADF",
        libc::EAGAIN => "EAGAIN",
        libc::ENOMEM => "ENOMEM",
        libc::EACCES => "EACCES",
        libc::EFAULT => "EFAULT",
        libc::EBUSY => "EBUSY",
        libc::EEXIST => "EEXIST",
        libc::ENODEV => "ENODEV",
        libc::ENOTDIR => "ENOTDIR",
        libc::EISDIR => "EISDIR",
        libc::EINVAL => "EINVAL",
        libc::ENOSPC => "ENOSPC",
        libc::ENOTTY => "ENOTTY",
        libc::EROFS => "EROFS",
        libc::EPIPE => "EPIPE",
        libc::ERANGE => "ERANGE",
        libc::EDEADLK => "EDEADLK",
        libc::ENOSYS => "ENOSYS",
        libc::ENOTEMPTY => "ENOTEMPTY",
        libc::ENOTSUP => "ENOTSUP",
        libc::ECONNREFUSED => "ECONNREFUSED",
        libc::ECONNRESET => "ECONNRESET",
        libc::ESHUTDOWN => "ESHUTDOWN",
        libc::ETIMEDOUT => "ETIMEDOUT",
        libc::EHOSTUNREACH => "EHOSTUNREACH",
        libc::EALREADY => "EALREADY",
        libc::EINPROGRESS => "EINPROGRESS",
        libc::ESTALE => "ESTALE",
        libc::ECANCELED => "ECANCELED",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(-5, "5 (EIO)")]
    #[case(-25, "25 (ENOTTY)")]
    #[case(-110, "110 (ETIMEDOUT)")]
    #[case(-4095, "4095 (Unknown)")]
    fn test_exit_code_display(#[case] code: i32, #[case] expected: &str) {
        assert_eq!(ExitCode(code).to_string(), expected);
    }

    #[test]
    fn test_exit_code_classification() {
        assert!(ExitCode::SUCCESS.is_success());
        assert!(ExitCode(-libc::ENOTTY).is_redirect());
        assert!(!ExitCode(-libc::EIO).is_redirect());
        assert!(!ExitCode(-libc::EIO).is_success());
    }

    #[test]
    fn test_quiesce_error_embeds_code() {
        let err = QuiesceError::Quiesce {
            path: "/".to_string(),
            code: ExitCode(-5),
        };
        let msg = err.to_string();
        assert!(msg.contains("5 (EIO)"), "{msg}");
    }

    #[test]
    fn test_thrasher_failed_names_actor() {
        let err = QuiesceError::ThrasherFailed {
            name: "quiescer.fs.[cephfs]".to_string(),
            failed: 1,
            total: 2,
            source: Box::new(QuiesceError::MalformedResponse("no sets".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("quiescer.fs.[cephfs]"));
        assert!(msg.contains("no sets"));
    }
}
