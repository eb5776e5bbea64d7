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

/// Errors specific to talking to the upstream DART API, before they're folded
/// into [`dart_shared::Error`] at every public method's return boundary.
#[derive(Debug, Error, Display)]
pub enum Error {
    /// failed to execute the HTTP request: {0}
    RequestExecution(#[source] reqwest::Error),
    /// server returned a non-successful status code: {0}
    StatusCode(#[source] reqwest::Error),
    /// failed to fetch the response body: {0}
    Fetching(#[source] reqwest::Error),
    /// failed to decode the response at JSON path {1}: {0}
    DecodingAtPath(String, #[source] serde_path_to_error::Error<serde_json::Error>),
    /// failed to decode a normalized value: {0}
    Decoding(#[source] serde_json::Error),
    /// upstream reported status {0}: {1}
    UpstreamStatus(String, String),
    /// upstream returned no data
    UpstreamEmpty,
}

impl From<Error> for dart_shared::Error {
    fn from(error: Error) -> Self {
        match error {
            Error::UpstreamEmpty => dart_shared::Error::UpstreamEmpty,
            Error::RequestExecution(source) | Error::StatusCode(source) | Error::Fetching(source) => {
                dart_shared::Error::upstream_unavailable(source)
            }
            Error::DecodingAtPath(..) | Error::Decoding(_) | Error::UpstreamStatus(..) => {
                dart_shared::Error::internal(anyhow::anyhow!(error.to_string()))
            }
        }
    }
}
