/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::fmt;
use std::io::Error as IoError;

use thiserror::Error;

pub type Result<T> = ::std::result::Result<T, Error>;

/// The platform refused to issue a token for the supplied credential.
/// `code` is the platform error code (`GetLastError` on Windows).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("logon failed with code {code}: {message}")]
pub struct AuthenticationError {
    code: u32,
    message: String,
}

impl AuthenticationError {
    pub fn new<M: Into<String>>(code: u32, message: M) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error("invalid credential: {field} must not be empty")]
    InvalidCredential { field: &'static str },

    #[error("while binding the logon token to the current thread: {source}")]
    Bind { source: IoError },

    #[error("while restoring the previous identity of the current thread: {source}")]
    Restore { source: IoError },

    #[error("while releasing the logon token: {source}")]
    Release { source: IoError },

    #[error("while inspecting the identity of the current thread: {source}")]
    Inspect { source: IoError },

    /// Restoring the thread and releasing the token both failed
    #[error("{restore}; {release}")]
    Cleanup {
        restore: Box<Error>,
        release: Box<Error>,
    },

    /// The switch failed part way through and undoing it failed as well
    #[error("{source} (cleanup also failed: {cleanup})")]
    Aborted {
        source: Box<Error>,
        cleanup: Box<Error>,
    },
}

impl Error {
    /// Returns the authentication failure, if that is what this is
    pub fn as_authentication(&self) -> Option<&AuthenticationError> {
        match self {
            Self::Authentication(err) => Some(err),
            _ => None,
        }
    }

    /// Attach the failure of the cleanup that followed this error, if any
    pub(crate) fn followed_by(self, cleanup: Option<Error>) -> Self {
        match cleanup {
            Some(cleanup) => Self::Aborted {
                source: Box::new(self),
                cleanup: Box::new(cleanup),
            },
            None => self,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown logon class `{0}`")]
pub struct UnknownLogonClass(pub String);

/// The outcome of a failed `IdentitySwitch::execute`.
///
/// `Switch` means the callback either never ran (logon, bind or inspection
/// failed) or returned successfully but the thread could not be reverted or
/// the token could not be released.  When a bind or inspection failure is
/// followed by a failed cleanup, both are reported as `Error::Aborted`.
///
/// `Callback` carries the callback's own error exactly as it was returned.
/// Cleanup has already been attempted by the time the caller sees it; if
/// that also failed, the cleanup error rides along in `cleanup` rather than
/// replacing `error`.
#[derive(Debug)]
pub enum ExecuteError<E> {
    Switch(Error),
    Callback { error: E, cleanup: Option<Error> },
}

impl<E> ExecuteError<E> {
    /// Returns the callback's error, if the callback is what failed
    pub fn callback_error(&self) -> Option<&E> {
        match self {
            Self::Callback { error, .. } => Some(error),
            Self::Switch(_) => None,
        }
    }

    /// Returns the cleanup failure, whether it is the primary error or
    /// an advisory one attached to a callback error
    pub fn cleanup_error(&self) -> Option<&Error> {
        match self {
            Self::Switch(err) => match err {
                Error::Restore { .. } | Error::Release { .. } | Error::Cleanup { .. } => Some(err),
                Error::Aborted { cleanup, .. } => Some(cleanup),
                _ => None,
            },
            Self::Callback { cleanup, .. } => cleanup.as_ref(),
        }
    }

    pub fn into_callback_error(self) -> Option<E> {
        match self {
            Self::Callback { error, .. } => Some(error),
            Self::Switch(_) => None,
        }
    }
}

impl<E> From<Error> for ExecuteError<E> {
    fn from(err: Error) -> Self {
        Self::Switch(err)
    }
}

impl<E: fmt::Display> fmt::Display for ExecuteError<E> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Switch(err) => fmt::Display::fmt(err, fmt),
            Self::Callback {
                error,
                cleanup: None,
            } => fmt::Display::fmt(error, fmt),
            Self::Callback {
                error,
                cleanup: Some(cleanup),
            } => write!(fmt, "{} (cleanup also failed: {})", error, cleanup),
        }
    }
}

impl<E> std::error::Error for ExecuteError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Switch(err) => std::error::Error::source(err),
            Self::Callback { error, .. } => error.source(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn callback_error_display_mentions_cleanup() {
        let err: ExecuteError<IoError> = ExecuteError::Callback {
            error: IoError::new(ErrorKind::Other, "disk on fire"),
            cleanup: Some(Error::Release {
                source: IoError::new(ErrorKind::Other, "handle is invalid"),
            }),
        };
        let text = err.to_string();
        assert!(text.starts_with("disk on fire"), "{}", text);
        assert!(text.contains("handle is invalid"), "{}", text);
        assert!(err.cleanup_error().is_some());
        assert_eq!(
            err.callback_error().map(|e| e.kind()),
            Some(ErrorKind::Other)
        );
    }

    #[test]
    fn authentication_error_is_reachable_through_error() {
        let err = Error::from(AuthenticationError::new(1326, "bad password"));
        assert_eq!(err.as_authentication().map(|e| e.code()), Some(1326));
        assert_eq!(err.to_string(), "logon failed with code 1326: bad password");

        let err: ExecuteError<IoError> = err.into();
        assert!(err.cleanup_error().is_none());
        assert!(err.into_callback_error().is_none());
    }

    #[test]
    fn aborted_switch_reports_both_failures() {
        let bind = Error::Bind {
            source: IoError::new(ErrorKind::PermissionDenied, "access denied"),
        };
        let release = Error::Release {
            source: IoError::new(ErrorKind::Other, "handle is invalid"),
        };
        let err: ExecuteError<IoError> = bind.followed_by(Some(release)).into();

        let text = err.to_string();
        assert!(text.contains("access denied"), "{}", text);
        assert!(text.contains("handle is invalid"), "{}", text);
        match err.cleanup_error() {
            Some(Error::Release { .. }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn followed_by_nothing_is_unchanged() {
        let err = Error::Inspect {
            source: IoError::new(ErrorKind::Other, "no token"),
        };
        match err.followed_by(None) {
            Error::Inspect { .. } => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
