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

//! Enriches [`DisclosureHit`]s with actual document content (`spec.md`
//! §4.10). Tries, per hit, a family-specific structured API, then the raw
//! document body, then the attachment archive, finally falling back to a
//! viewer-URL-only record. Individual failures are captured on the produced
//! [`ProcessedDocument`] rather than aborting the batch.

use std::collections::HashMap;

use futures_util::{stream, StreamExt};
use serde_json::Value;

use dart_gateway::{
    types::{CategoryCode, CorpCode},
    DartGateway,
};

use crate::{
    content_cleaner,
    model::{DisclosureHit, DocumentSource, ProcessedDocument},
};

/// Concurrency cap for [`DocumentFetcher::fetch_all`], overridable via
/// `DART_PARALLEL_DOWNLOADS` at the `dart-service` config layer.
pub const DEFAULT_CONCURRENCY: usize = 3;
/// A fetched document body shorter than this, or that is a bare URL, is
/// treated as not useful and the next fallback step is tried instead
/// (`spec.md` §4.10).
const MIN_USEFUL_BODY_LENGTH: usize = 1_000;

/// Routes a category code's first letter to the structured API family that
/// can supply richer data than the raw document body, mirroring
/// `DETAILED_API_MAPPING`.
fn detailed_api_family(category_code: &CategoryCode) -> Option<char> {
    match category_code.kind_letter()? {
        letter @ ('A' | 'B' | 'C' | 'D') => Some(letter),
        _ => None,
    }
}

pub struct DocumentFetcher<'a> {
    gateway: &'a DartGateway,
    concurrency: usize,
    max_content_length: usize,
    /// The Query Plan's resolved category code, used for hits whose own
    /// search-response row carried none (`spec.md` §4.10 step 1).
    default_category_code: Option<CategoryCode>,
}

impl<'a> DocumentFetcher<'a> {
    pub fn new(gateway: &'a DartGateway) -> Self {
        Self {
            gateway,
            concurrency: DEFAULT_CONCURRENCY,
            max_content_length: content_cleaner::DEFAULT_MAX_LENGTH,
            default_category_code: None,
        }
    }

    #[must_use = "dropped changed fetcher"]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use = "dropped changed fetcher"]
    pub fn with_default_category_code(mut self, category_code: Option<CategoryCode>) -> Self {
        self.default_category_code = category_code;
        self
    }

    /// The effective category code for a hit: its own, falling back to the
    /// plan-level default (`spec.md` §4.10 step 1's routing input).
    fn category_code_of(&self, hit: &DisclosureHit) -> Option<CategoryCode> {
        hit.category_code.clone().or_else(|| self.default_category_code.clone())
    }

    /// Fetches content for every hit, bounded to `self.concurrency` in
    /// flight at once (`spec.md` §4.10, default 3 via
    /// `DART_PARALLEL_DOWNLOADS`).
    pub async fn fetch_all(&self, hits: Vec<DisclosureHit>) -> Vec<ProcessedDocument> {
        stream::iter(hits)
            .map(|hit| self.fetch_one(hit))
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }

    /// Runs the five-step fallback chain for a single hit: structured API
    /// (family-specific) → document body (validity-checked) → archive
    /// download → url-only. Never returns `Err`; failures are recorded on
    /// the returned [`ProcessedDocument::error`].
    async fn fetch_one(&self, hit: DisclosureHit) -> ProcessedDocument {
        let report_type = self.category_code_of(&hit);

        let Some(rcept_no) = hit.rcept_no.clone() else {
            return self.url_only(hit, report_type, "missing receipt number, cannot fetch content".to_owned());
        };

        if let Some((structured, family)) = self.try_structured(&hit, report_type.as_ref()).await {
            return ProcessedDocument {
                content: content_cleaner::clean(&render_structured(&structured), self.max_content_length),
                structured_data: HashMap::from([(family.to_string(), structured)]),
                source: DocumentSource::DetailedApi,
                corp_code: hit.corp_code.clone(),
                report_type,
                error: String::new(),
                hit,
            };
        }

        match self.gateway.get_document_body(&rcept_no).await {
            Ok(body) if is_useful_body(&body.content) => {
                return ProcessedDocument {
                    content: content_cleaner::clean(&body.content, self.max_content_length),
                    structured_data: HashMap::new(),
                    source: DocumentSource::OriginalDocument,
                    corp_code: hit.corp_code.clone(),
                    report_type,
                    error: String::new(),
                    hit,
                };
            }
            Ok(_) | Err(dart_shared::Error::UpstreamEmpty) => {}
            Err(error) => {
                tracing::warn!(%error, rcept_no = %rcept_no.as_str(), "document body fetch failed, trying archive fallback");
            }
        }

        match self.gateway.download_archive(&rcept_no).await {
            Ok(members) if !members.is_empty() => {
                let combined = members
                    .iter()
                    .map(|member| String::from_utf8_lossy(&member.bytes).into_owned())
                    .collect::<Vec<_>>()
                    .join("\n");
                return ProcessedDocument {
                    content: content_cleaner::clean(&combined, self.max_content_length),
                    structured_data: HashMap::new(),
                    source: DocumentSource::DownloadedFile,
                    corp_code: hit.corp_code.clone(),
                    report_type,
                    error: String::new(),
                    hit,
                };
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(%error, rcept_no = %rcept_no.as_str(), "archive download failed, falling back to url-only");
            }
        }

        self.url_only(hit, report_type, "no structured data, document body, or archive available".to_owned())
    }

    /// Tries the structured API family matching the hit's effective category
    /// code, if any. Returns `None` (never an error) when there is no
    /// category code, the code maps to no family, or the upstream call
    /// fails — all of which fall through to the document-body step.
    async fn try_structured(&self, hit: &DisclosureHit, category_code: Option<&CategoryCode>) -> Option<(Value, char)> {
        let corp_code = hit.corp_code.as_ref()?;
        let category_code = category_code?;
        let family = detailed_api_family(category_code)?;

        let year = hit.rcept_dt.format("%Y").to_string().parse::<i32>().ok()?;
        let result = match family {
            'A' => self
                .gateway
                .get_business_report_data(corp_code, "dvTyp", year)
                .await
                .map(|rows| serde_json::to_value(rows).unwrap_or(Value::Null)),
            'B' => self
                .gateway
                .get_major_events(corp_code, "rs", None, None)
                .await
                .map(|rows| serde_json::to_value(rows).unwrap_or(Value::Null)),
            'C' => self
                .gateway
                .get_securities_report(corp_code, "tp")
                .await
                .map(|rows| serde_json::to_value(rows).unwrap_or(Value::Null)),
            'D' => {
                // D002 is the executive/major-shareholder ownership form;
                // every other D-family code reports on outside shareholders.
                let executive = category_code.as_str() == "D002";
                self.gateway
                    .get_major_shareholders(corp_code, executive)
                    .await
                    .map(|rows| serde_json::to_value(rows).unwrap_or(Value::Null))
            }
            _ => return None,
        };

        match result {
            Ok(value) if !value.is_null() => Some((value, family)),
            Ok(_) => None,
            Err(error) => {
                tracing::warn!(%error, corp_code = %corp_code.to_string(), "structured API fetch failed, trying document body");
                None
            }
        }
    }

    fn url_only(&self, hit: DisclosureHit, report_type: Option<CategoryCode>, error: String) -> ProcessedDocument {
        ProcessedDocument {
            corp_code: hit.corp_code.clone(),
            hit,
            content: String::new(),
            structured_data: HashMap::new(),
            source: DocumentSource::UrlOnly,
            report_type,
            error,
        }
    }
}

/// A document body is considered useful when it is reasonably long and not
/// merely a bare URL (`spec.md` §4.10, ">1000-character / not-bare-URL
/// validity check").
fn is_useful_body(content: &str) -> bool {
    let trimmed = content.trim();
    trimmed.chars().count() > MIN_USEFUL_BODY_LENGTH && !is_bare_url(trimmed)
}

fn is_bare_url(text: &str) -> bool {
    (text.starts_with("http://") || text.starts_with("https://")) && !text.contains(char::is_whitespace)
}

fn render_structured(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn bare_url_is_not_useful() {
        assert!(!is_useful_body("https://dart.fss.or.kr/dsaf001/main.do?rcpNo=1"));
    }

    #[test]
    fn short_body_is_not_useful() {
        assert!(!is_useful_body("short"));
    }

    #[test]
    fn long_prose_body_is_useful() {
        let body = "내용 ".repeat(500);
        assert!(is_useful_body(&body));
    }

    #[test]
    fn detailed_api_family_routes_known_letters() {
        assert_eq!(detailed_api_family(&CategoryCode::from("A001".to_owned())), Some('A'));
        assert_eq!(detailed_api_family(&CategoryCode::from("D004".to_owned())), Some('D'));
        assert_eq!(detailed_api_family(&CategoryCode::from("E001".to_owned())), None);
    }

    fn gateway() -> DartGateway {
        let rate_limiter = Arc::new(dart_shared::RateLimiter::new(dart_shared::RateLimiterConfig::for_service(
            dart_shared::SERVICE_DART_API,
        )));
        let cache = Arc::new(dart_shared::Cache::new(dart_shared::CacheConfig {
            cache_dir: std::env::temp_dir().join("dart-fetcher-test"),
            ..dart_shared::CacheConfig::default()
        }));
        DartGateway::new("test-key", rate_limiter, cache)
    }

    #[test]
    fn category_code_of_falls_back_to_plan_default() {
        let gateway = gateway();
        let fetcher = DocumentFetcher::new(&gateway).with_default_category_code(Some(CategoryCode::from("D001".to_owned())));
        let hit = DisclosureHit {
            rcept_no: None,
            corp_code: None,
            corp_name: "Samsung Electronics".to_owned(),
            report_nm: "Report".to_owned(),
            rcept_dt: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            flr_nm: String::new(),
            rm: None,
            corp_cls: None,
            category_code: None,
        };
        assert_eq!(fetcher.category_code_of(&hit).as_ref().map(CategoryCode::as_str), Some("D001"));
    }

    #[test]
    fn category_code_of_prefers_the_hits_own_code() {
        let gateway = gateway();
        let fetcher = DocumentFetcher::new(&gateway).with_default_category_code(Some(CategoryCode::from("D001".to_owned())));
        let hit = DisclosureHit {
            rcept_no: None,
            corp_code: None,
            corp_name: "Samsung Electronics".to_owned(),
            report_nm: "Report".to_owned(),
            rcept_dt: chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            flr_nm: String::new(),
            rm: None,
            corp_cls: None,
            category_code: Some(CategoryCode::from("A001".to_owned())),
        };
        assert_eq!(fetcher.category_code_of(&hit).as_ref().map(CategoryCode::as_str), Some("A001"));
    }
}
