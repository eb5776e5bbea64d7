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

//! Typed HTTP facade over the upstream DART Open API: request building,
//! rate-limited + cached calls, and response normalization. No orchestration
//! logic lives here — see `dart-core` for that.

mod client;
pub mod constants;
pub mod error;
pub mod types;

pub use client::DartGateway;
