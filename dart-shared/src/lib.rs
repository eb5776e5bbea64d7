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

//! Cross-cutting infrastructure shared by every other crate in the workspace:
//! the error taxonomy, the per-service rate limiter, and the two-tier cache.

pub mod cache;
mod error;
mod rate_limiter;

pub use cache::{Cache, CacheConfig};
pub use error::{Error, ErrorKind};
pub use rate_limiter::{CancellationToken, RateLimiter, RateLimiterConfig, RateLimiterStats};

/// Service name used to key the rate limiter and logs for calls to the upstream
/// DART disclosure API.
pub const SERVICE_DART_API: &str = "dart_api";

/// Service name used to key the rate limiter and logs for calls to the LLM
/// completion endpoint.
pub const SERVICE_LLM: &str = "llm";
