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

//! The deep-search orchestration engine: a pipeline of pure and
//! LLM-assisted stages, wired together by [`orchestrator::Orchestrator`].

pub mod company_validator;
pub mod content_cleaner;
pub mod doc_type_mapper;
pub mod document_fetcher;
pub mod document_filter;
pub mod model;
pub mod orchestrator;
pub mod query_expander;
pub mod query_parser;
pub mod search_executor;
pub mod synthesizer;

pub use orchestrator::Orchestrator;
