// Copyright 2022 Xayn AG
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use displaydoc::Display;
use thiserror::Error;

/// The single error type threaded through every component of the engine.
///
/// Each variant's doc comment is its `Display` text (via `displaydoc`), and each
/// variant maps to exactly one [`ErrorKind`] for callers that want to branch on
/// kind without matching the full variant.
#[derive(Debug, Error, Display)]
pub enum Error {
    /// invalid input: {0}
    InvalidInput(String),
    /// upstream unavailable: {0}
    UpstreamUnavailable(#[source] anyhow::Error),
    /// upstream returned no data
    UpstreamEmpty,
    /// LLM unavailable: {0}
    LLMUnavailable(String),
    /// LLM response could not be parsed: {0}
    LLMMalformed(String),
    /// operation was cancelled
    Cancelled,
    /// internal error: {0}
    Internal(#[source] anyhow::Error),
}

impl Error {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn upstream_unavailable(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::UpstreamUnavailable(anyhow::Error::new(error))
    }

    pub fn llm_unavailable(message: impl Into<String>) -> Self {
        Self::LLMUnavailable(message.into())
    }

    pub fn llm_malformed(message: impl Into<String>) -> Self {
        Self::LLMMalformed(message.into())
    }

    pub fn internal(error: impl Into<anyhow::Error>) -> Self {
        Self::Internal(error.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            Self::UpstreamEmpty => ErrorKind::UpstreamEmpty,
            Self::LLMUnavailable(_) => ErrorKind::LLMUnavailable,
            Self::LLMMalformed(_) => ErrorKind::LLMMalformed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True for the two LLM failure kinds that every LLM-assisted component must
    /// treat as "fall back to the deterministic path", never as a hard error.
    pub fn is_llm_soft_failure(&self) -> bool {
        matches!(self, Self::LLMUnavailable(_) | Self::LLMMalformed(_))
    }
}

/// Coarse classification of [`Error`], matching the error kind taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ErrorKind {
    /// InvalidInput
    InvalidInput,
    /// UpstreamUnavailable
    UpstreamUnavailable,
    /// UpstreamEmpty
    UpstreamEmpty,
    /// LLMUnavailable
    LLMUnavailable,
    /// LLMMalformed
    LLMMalformed,
    /// Cancelled
    Cancelled,
    /// Internal
    Internal,
}

macro_rules! impl_from_std_error {
    ($($error:ty,)*) => {$(
        impl From<$error> for Error {
            fn from(error: $error) -> Self {
                Self::Internal(anyhow::Error::new(error))
            }
        }
    )*};
}

impl_from_std_error!(
    std::io::Error,
    serde_json::Error,
    tokio::task::JoinError,
);

impl From<anyhow::Error> for Error {
    fn from(error: anyhow::Error) -> Self {
        Self::Internal(error)
    }
}
