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

//! Request-scoped data model shared by every orchestration stage: the
//! [`QueryPlan`] the Query Expander hands to the Search Executor, the
//! [`DisclosureHit`]s that come back, the [`ProcessedDocument`]s the Fetcher
//! produces, and the final [`SynthesisResult`].

use std::collections::HashMap;

use chrono::NaiveDate;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use dart_gateway::types::{CategoryCode, CorpCode, ReceiptNo};

/// The DART disclosure viewer URL for a receipt number (`spec.md` §6).
pub fn viewer_url(rcept_no: &ReceiptNo) -> String {
    format!("https://dart.fss.or.kr/dsaf001/main.do?rcpNo={}", rcept_no.as_str())
}

/// A resolved company: the user-facing display name plus its canonical
/// 8-digit corp code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCompany {
    pub display_name: String,
    pub corp_code: CorpCode,
}

/// A company name the Validator could not confidently resolve; carries its
/// ranked candidate list for a `needs_user_input` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmbiguousCompany {
    pub original_query: String,
    pub candidates: Vec<CompanyCandidate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyCandidate {
    pub name: String,
    pub corp_code: CorpCode,
    pub score: u8,
}

/// An inclusive calendar-day range. Invariant: `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange::new called with start > end");
        Self { start, end }
    }

    /// Inclusive span length in days, e.g. a single day has `span_days() == 0`.
    pub fn span_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

/// The Query Expander's assembled output (`spec.md` §3 "Query Plan").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    pub original_query: String,
    pub companies: Vec<ResolvedCompany>,
    pub ambiguous_companies: Vec<AmbiguousCompany>,
    pub date_range: Option<DateRange>,
    pub category_code: Option<CategoryCode>,
    pub category_confidence: f32,
    pub major_event_types: Vec<String>,
    pub securities_types: Vec<String>,
    pub business_report_types: Vec<String>,
    pub keywords: Vec<String>,
    /// Doc-type phrases the Query Parser extracted directly from the query
    /// text, before the Doc-Type Mapper's keyword scorer runs — distinct
    /// from `category_code`, which is always `Some` once the mapper's
    /// unmatched-query default kicks in.
    pub doc_type_phrases: Vec<String>,
    pub needs_confirmation: bool,
    /// Set when more than one shard is produced; consumed by the Search
    /// Executor to choose concurrent vs. sequential execution (`spec.md`
    /// §4.8, glossary "shard strategy flag").
    pub parallel_search: bool,
}

impl QueryPlan {
    /// True when the plan carries nothing the Search Executor or Fetcher
    /// could act on — the Orchestrator's P1 short-circuit condition.
    /// Mirrors the original orchestrator's `companies == [] and corp_codes
    /// == [] and doc_types == []` check on the *extracted* doc types, not
    /// `category_code`, which the Doc-Type Mapper always fills with a
    /// low-confidence default when nothing in the query matches anything.
    pub fn is_empty_params(&self) -> bool {
        self.companies.is_empty() && self.doc_type_phrases.is_empty()
    }
}

/// One upstream search call (`spec.md` §3 "Search Shard"). Invariant:
/// `start <= end`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchShard {
    pub corp_code: Option<CorpCode>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub category_code: Option<CategoryCode>,
    pub page_size: u32,
}

/// A single upstream search result row, reduced to the fields the rest of
/// the pipeline needs (`spec.md` §3 "Disclosure Hit").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisclosureHit {
    pub rcept_no: Option<ReceiptNo>,
    pub corp_code: Option<CorpCode>,
    pub corp_name: String,
    pub report_nm: String,
    pub rcept_dt: NaiveDate,
    pub flr_nm: String,
    pub rm: Option<String>,
    pub corp_cls: Option<String>,
    /// The upstream `pblntf_detail_ty` category code, when the search
    /// response carried one (`spec.md` §4.10 step 1's routing input).
    pub category_code: Option<CategoryCode>,
}

impl DisclosureHit {
    /// Key used for dedup and ordering when `rcept_no` is present; falls
    /// back to the composite `company|title|date` key otherwise (`spec.md`
    /// §9 open question — see `dart-core`'s search executor for the
    /// resolution of whether such rows reach the Fetcher).
    pub fn dedup_key(&self) -> String {
        match &self.rcept_no {
            Some(rcept_no) => rcept_no.as_str().to_owned(),
            None => format!("{}|{}|{}", self.corp_name, self.report_nm, self.rcept_dt),
        }
    }
}

/// Where a [`ProcessedDocument`]'s content ultimately came from (`spec.md`
/// §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    #[display(fmt = "detailed_api")]
    DetailedApi,
    #[display(fmt = "original_document")]
    OriginalDocument,
    #[display(fmt = "downloaded_file")]
    DownloadedFile,
    #[display(fmt = "url_only")]
    UrlOnly,
}

/// A [`DisclosureHit`] enriched by the Document Fetcher (`spec.md` §3
/// "Processed Document").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedDocument {
    pub hit: DisclosureHit,
    pub content: String,
    pub structured_data: HashMap<String, Value>,
    pub source: DocumentSource,
    pub corp_code: Option<CorpCode>,
    pub report_type: Option<CategoryCode>,
    pub error: String,
}

impl ProcessedDocument {
    pub fn viewer_url(&self) -> String {
        self.hit
            .rcept_no
            .as_ref()
            .map(viewer_url)
            .unwrap_or_default()
    }
}

/// One grouped day of activity in the Synthesizer's timeline (`spec.md`
/// §4.11), capped at 10 entries with up to 3 events each.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub date: NaiveDate,
    pub count: usize,
    pub events: Vec<TimelineEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub company: String,
    pub title: String,
    pub rcept_no: Option<String>,
}

/// A top-5 highlight surfaced by the Synthesizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFinding {
    pub company: String,
    pub title: String,
    pub date: NaiveDate,
    pub url: String,
}

/// A single document descriptor in the final [`SynthesisResult`]'s document
/// list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentDescriptor {
    pub company: String,
    pub title: String,
    pub date: NaiveDate,
    pub submitter: String,
    pub rcept_no: Option<String>,
    pub url: String,
    pub content: String,
    pub source: Option<DocumentSource>,
    pub structured_data: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynthesisSummary {
    pub total_documents: usize,
    pub date_range: Option<DateRange>,
    pub companies: Vec<String>,
    pub confidence: f32,
}

/// The Orchestrator's `status = "success"` terminal shape (`spec.md` §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisResult {
    pub query: String,
    pub answer: String,
    pub summary: SynthesisSummary,
    pub documents: Vec<DocumentDescriptor>,
    pub synthesized_at_unix: i64,
}

/// The Orchestrator's non-success terminal shapes (`spec.md` §6, §4.12).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PipelineResponse {
    Success(Box<SynthesisResult>),
    NeedsUserInput {
        query: String,
        message: String,
        ambiguous_companies: Vec<AmbiguousCompany>,
    },
    NoResults {
        query: String,
        message: String,
    },
    Error {
        query: String,
        phase: String,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_key_prefers_receipt_number() {
        let hit = DisclosureHit {
            rcept_no: Some(ReceiptNo::from("20240101000001".to_owned())),
            corp_code: None,
            corp_name: "Samsung Electronics".to_owned(),
            report_nm: "Quarterly report".to_owned(),
            rcept_dt: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            flr_nm: "Samsung Electronics".to_owned(),
            rm: None,
            corp_cls: None,
            category_code: None,
        };
        assert_eq!(hit.dedup_key(), "20240101000001");
    }

    #[test]
    fn dedup_key_falls_back_to_composite_key() {
        let hit = DisclosureHit {
            rcept_no: None,
            corp_code: None,
            corp_name: "Samsung Electronics".to_owned(),
            report_nm: "Quarterly report".to_owned(),
            rcept_dt: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            flr_nm: "Samsung Electronics".to_owned(),
            rm: None,
            corp_cls: None,
            category_code: None,
        };
        assert_eq!(hit.dedup_key(), "Samsung Electronics|Quarterly report|2024-01-01");
    }

    #[test]
    fn url_only_document_has_empty_content_and_viewer_url() {
        let rcept_no = ReceiptNo::from("20240101000001".to_owned());
        let doc = ProcessedDocument {
            hit: DisclosureHit {
                rcept_no: Some(rcept_no),
                corp_code: None,
                corp_name: "Samsung Electronics".to_owned(),
                report_nm: "Quarterly report".to_owned(),
                rcept_dt: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                flr_nm: "Samsung Electronics".to_owned(),
                rm: None,
                corp_cls: None,
                category_code: None,
            },
            content: String::new(),
            structured_data: HashMap::new(),
            source: DocumentSource::UrlOnly,
            corp_code: None,
            report_type: None,
            error: String::new(),
        };
        assert!(doc.content.is_empty());
        assert!(doc.viewer_url().starts_with("https://dart.fss.or.kr/dsaf001/main.do?rcpNo="));
    }
}
