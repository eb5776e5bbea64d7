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

//! Typed facade over the upstream DART Open API, in the shape of the
//! teacher's `gnews_client.rs` `Client`: one `reqwest::Client` plus a shared
//! rate limiter and cache, one method per upstream capability.

use std::{io::Read as _, sync::Arc, time::Duration};

use chrono::NaiveDate;
use secrecy::{ExposeSecret, Secret};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use dart_shared::{cache::canonical_params, Cache, RateLimiter};

use crate::{
    constants::{
        BUSINESS_REPORT_TYPES,
        DISCLOSURE_KINDS,
        MAJOR_EVENT_TYPES,
        REPORT_CODES,
        SECURITIES_TYPES,
        XBRL_CLASSIFICATIONS,
    },
    error::Error as GatewayError,
    types::{
        ArchiveMember,
        AttachmentInfo,
        BusinessReportRow,
        CompanyInfo,
        CompanyRecord,
        CorpCode,
        DisclosureRow,
        DocumentBody,
        FinancialStatementRow,
        MajorEventRow,
        ReceiptNo,
        SecuritiesReportRow,
        ShareholderRow,
        StockCode,
        XbrlTaxonomyEntry,
    },
};

const DEFAULT_BASE_URL: &str = "https://opendart.fss.or.kr/api";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// DART's "no data found" status code (`013`), the upstream-empty sentinel
/// every public method translates into `dart_shared::Error::UpstreamEmpty`.
const STATUS_NO_DATA: &str = "013";
/// DART's "request processed normally" status code.
const STATUS_OK: &str = "000";

/// Typed facade over the upstream DART Open API.
///
/// Every public method follows validate → acquire rate-limit permit (held for
/// the call's duration, not released early — `spec.md` §5's "concurrency
/// cap") → consult cache → on miss, call upstream and normalize.
pub struct DartGateway {
    base_url: String,
    api_key: Secret<String>,
    http: reqwest::Client,
    rate_limiter: Arc<RateLimiter>,
    cache: Arc<Cache>,
}

impl DartGateway {
    pub fn new(api_key: impl Into<String>, rate_limiter: Arc<RateLimiter>, cache: Arc<Cache>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: Secret::new(api_key.into()),
            http: reqwest::Client::new(),
            rate_limiter,
            cache,
        }
    }

    #[must_use = "dropped changed client"]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Performs one rate-limited GET against a JSON endpoint. The rate
    /// limiter's concurrency permit is held for the full duration of this
    /// method, not dropped on acquisition.
    async fn get_json(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value, GatewayError> {
        let _permit = self
            .rate_limiter
            .acquire(None)
            .await
            .expect("acquire without a cancellation token never returns Err");

        let url = format!("{}/{endpoint}", self.base_url.trim_end_matches('/'));
        let mut query = vec![("crtfc_key", self.api_key.expose_secret().clone())];
        query.extend(params.iter().map(|(k, v)| (*k, v.clone())));

        let response = self
            .http
            .get(url)
            .timeout(DEFAULT_TIMEOUT)
            .query(&query)
            .send()
            .await
            .map_err(GatewayError::RequestExecution)?
            .error_for_status()
            .map_err(GatewayError::StatusCode)?;

        let raw = response.bytes().await.map_err(GatewayError::Fetching)?;
        let deserializer = &mut serde_json::Deserializer::from_slice(&raw);
        let value: Value = serde_path_to_error::deserialize(deserializer)
            .map_err(|error| GatewayError::DecodingAtPath(error.path().to_string(), error))?;

        check_status(&value)?;
        Ok(value)
    }

    /// Performs one rate-limited GET against a binary (archive/XML) endpoint.
    async fn get_bytes(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Vec<u8>, GatewayError> {
        let _permit = self
            .rate_limiter
            .acquire(None)
            .await
            .expect("acquire without a cancellation token never returns Err");

        let url = format!("{}/{endpoint}", self.base_url.trim_end_matches('/'));
        let mut query = vec![("crtfc_key", self.api_key.expose_secret().clone())];
        query.extend(params.iter().map(|(k, v)| (*k, v.clone())));

        let response = self
            .http
            .get(url)
            .timeout(DEFAULT_TIMEOUT)
            .query(&query)
            .send()
            .await
            .map_err(GatewayError::RequestExecution)?
            .error_for_status()
            .map_err(GatewayError::StatusCode)?;

        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(GatewayError::Fetching)
    }

    /// Wraps a fetch in the cache-consult/cache-populate pattern every public
    /// method shares: memory+disk lookup first, upstream call and cache
    /// write on miss, `UpstreamEmpty` never written (`spec.md` §9 open
    /// question, `cache_empty_results`).
    async fn cached<T, F, Fut>(
        &self,
        fn_name: &str,
        cache_params: impl Serialize,
        fetch: F,
    ) -> Result<T, dart_shared::Error>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let params = canonical_params(cache_params);
        if let Some(cached) = self.cache.get::<T>(fn_name, &params).await {
            return Ok(cached);
        }

        match fetch().await {
            Ok(value) => {
                self.cache.set(fn_name, &params, &value).await;
                Ok(value)
            }
            Err(GatewayError::UpstreamEmpty) => Err(dart_shared::Error::UpstreamEmpty),
            Err(error) => Err(error.into()),
        }
    }

    /// Searches disclosures, optionally scoped to one company, date range, and
    /// detailed category. Mirrors `search_company_disclosures` /
    /// `dart_reader.list`.
    pub async fn search_disclosures(
        &self,
        corp_code: Option<&CorpCode>,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        detail_type: Option<&str>,
    ) -> Result<Vec<DisclosureRow>, dart_shared::Error> {
        let cache_params = (
            corp_code.map(ToString::to_string),
            start_date.map(|d| d.to_string()),
            end_date.map(|d| d.to_string()),
            detail_type.map(ToOwned::to_owned),
        );

        self.cached("search_company_disclosures", cache_params, || async {
            let mut params = vec![("page_count".to_owned(), "100".to_owned())];
            if let Some(corp_code) = corp_code {
                params.push(("corp_code".to_owned(), corp_code.to_string()));
            }
            if let Some(start_date) = start_date {
                params.push(("bgn_de".to_owned(), start_date.format("%Y%m%d").to_string()));
            }
            if let Some(end_date) = end_date {
                params.push(("end_de".to_owned(), end_date.format("%Y%m%d").to_string()));
            }
            if let Some(detail_type) = detail_type {
                params.push(("pblntf_detail_ty".to_owned(), detail_type.to_owned()));
            }
            let params: Vec<(&str, String)> = params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();

            let value = self.get_json("list.json", &params).await?;
            extract_list(value)
        })
        .await
    }

    /// Fetches a single company's basic profile. Mirrors `get_company_info` /
    /// `dart_reader.company`.
    pub async fn get_company(&self, corp_code: &CorpCode) -> Result<CompanyInfo, dart_shared::Error> {
        let cache_params = corp_code.to_string();
        self.cached("get_company_info", cache_params, || async {
            let params = [("corp_code", corp_code.to_string())];
            let value = self.get_json("company.json", &params).await?;
            serde_json::from_value(value).map_err(GatewayError::Decoding)
        })
        .await
    }

    /// Resolves a free-text company name or stock code to matching registry
    /// rows. Mirrors `find_corporation_code`.
    pub async fn resolve_corp_code(&self, query: &str) -> Result<Vec<CompanyRecord>, dart_shared::Error> {
        let all = self.all_companies().await?;
        let needle = query.trim();
        let matches: Vec<CompanyRecord> = all
            .into_iter()
            .filter(|record| {
                record.corp_name.contains(needle)
                    || record.stock_code.as_ref().is_some_and(|code| code.as_str() == needle)
            })
            .collect();
        if matches.is_empty() {
            Err(dart_shared::Error::UpstreamEmpty)
        } else {
            Ok(matches)
        }
    }

    /// Downloads and parses the full corp-code registry (`corpCode.xml`,
    /// delivered as a zip archive), used once at process start to seed the
    /// Company Validator (`spec.md` §4.4).
    pub async fn all_companies(&self) -> Result<Vec<CompanyRecord>, dart_shared::Error> {
        let params = canonical_params(());
        if let Some(cached) = self.cache.get::<Vec<CompanyRecord>>("all_companies", &params).await {
            return Ok(cached);
        }

        let bytes = self.get_bytes("corpCode.xml", &[]).await.map_err(dart_shared::Error::from)?;
        let members = extract_archive(&bytes).map_err(dart_shared::Error::internal)?;
        let xml = members
            .into_iter()
            .next()
            .map(|member| member.bytes)
            .ok_or(dart_shared::Error::UpstreamEmpty)?;
        let records = parse_corp_code_xml(&xml)?;
        self.cache.set("all_companies", &params, &records).await;
        Ok(records)
    }

    /// Fetches the original document body for a receipt number. Mirrors
    /// `get_document_content`.
    pub async fn get_document_body(&self, rcept_no: &ReceiptNo) -> Result<DocumentBody, dart_shared::Error> {
        let cache_params = rcept_no.to_string();
        let rcept_no = rcept_no.clone();
        self.cached("get_document_content", cache_params, move || async move {
            let params = [("rcept_no", rcept_no.to_string())];
            let bytes = self.get_bytes("document.xml", &params).await?;
            let content = decode_document_bytes(&bytes);
            Ok(DocumentBody { rcept_no, content })
        })
        .await
    }

    /// Lists a disclosure's attached documents/files. Mirrors
    /// `get_attached_documents`.
    pub async fn list_attachments(&self, rcept_no: &ReceiptNo) -> Result<Vec<AttachmentInfo>, dart_shared::Error> {
        let cache_params = rcept_no.to_string();
        self.cached("get_attached_documents", cache_params, || async {
            let params = [("rcept_no", rcept_no.to_string())];
            let value = self.get_json("document.json", &params).await?;
            extract_list(value)
        })
        .await
    }

    /// Downloads the attachment/original-document archive for a receipt
    /// number and extracts its members, the step `DocumentFetcherV2`'s ZIP
    /// fallback relies on.
    pub async fn download_archive(&self, rcept_no: &ReceiptNo) -> Result<Vec<ArchiveMember>, dart_shared::Error> {
        let params = [("rcept_no", rcept_no.to_string())];
        let bytes = self
            .get_bytes("document.xml", &params)
            .await
            .map_err(dart_shared::Error::from)?;
        extract_archive(&bytes).map_err(dart_shared::Error::internal)
    }

    /// Fetches financial-statement line items. Mirrors
    /// `get_financial_statements` / `dart_reader.finstate`/`finstate_all`.
    pub async fn get_financial_statements(
        &self,
        corp_code: &CorpCode,
        year: i32,
        report_code: &str,
    ) -> Result<Vec<FinancialStatementRow>, dart_shared::Error> {
        if !REPORT_CODES.contains_key(report_code) {
            return Err(dart_shared::Error::invalid_input(format!(
                "unknown report code: {report_code}"
            )));
        }
        let cache_params = (corp_code.to_string(), year, report_code.to_owned());
        self.cached("get_financial_statements", cache_params, || async {
            let params = [
                ("corp_code", corp_code.to_string()),
                ("bsns_year", year.to_string()),
                ("reprt_code", report_code.to_owned()),
            ];
            let value = self.get_json("fnlttSinglAcnt.json", &params).await?;
            extract_list(value)
        })
        .await
    }

    /// Fetches the standard XBRL account-label taxonomy for a classification
    /// code. Mirrors `get_xbrl_taxonomy`.
    pub async fn get_xbrl_taxonomy(
        &self,
        classification: &str,
    ) -> Result<Vec<XbrlTaxonomyEntry>, dart_shared::Error> {
        if !XBRL_CLASSIFICATIONS.contains_key(classification) {
            return Err(dart_shared::Error::invalid_input(format!(
                "unknown XBRL classification: {classification}"
            )));
        }
        let cache_params = classification.to_owned();
        self.cached("get_xbrl_taxonomy", cache_params, || async {
            let params = [("classification", classification.to_owned())];
            let value = self.get_json("xbrlTaxonomy.json", &params).await?;
            extract_list(value)
        })
        .await
    }

    /// Fetches one business-report item (배당, 임원, 직원, 주식총수, ...). Mirrors
    /// `get_business_report_data` / `dart_reader.report`.
    pub async fn get_business_report_data(
        &self,
        corp_code: &CorpCode,
        report_type: &str,
        year: i32,
    ) -> Result<Vec<BusinessReportRow>, dart_shared::Error> {
        if !BUSINESS_REPORT_TYPES.contains(&report_type) {
            return Err(dart_shared::Error::invalid_input(format!(
                "unknown business report type: {report_type}"
            )));
        }
        let cache_params = (corp_code.to_string(), report_type.to_owned(), year);
        self.cached("get_business_report_data", cache_params, || async {
            let params = [
                ("corp_code", corp_code.to_string()),
                ("report_type", report_type.to_owned()),
                ("bsns_year", year.to_string()),
            ];
            let value = self.get_json("report.json", &params).await?;
            extract_list(value)
        })
        .await
    }

    /// Fetches 대량보유상황보고 or 임원·주요주주소유보고 rows. Mirrors
    /// `get_major_shareholders`.
    pub async fn get_major_shareholders(
        &self,
        corp_code: &CorpCode,
        executive: bool,
    ) -> Result<Vec<ShareholderRow>, dart_shared::Error> {
        let endpoint = if executive { "elestock.json" } else { "majorstock.json" };
        let cache_params = (corp_code.to_string(), executive);
        self.cached("get_major_shareholders", cache_params, || async {
            let params = [("corp_code", corp_code.to_string())];
            let value = self.get_json(endpoint, &params).await?;
            extract_list(value)
        })
        .await
    }

    /// Fetches 주요사항보고서 rows of a given event type. Mirrors
    /// `get_major_events` / `dart_reader.event`.
    pub async fn get_major_events(
        &self,
        corp_code: &CorpCode,
        event_type: &str,
        start_year: Option<&str>,
        end_year: Option<&str>,
    ) -> Result<Vec<MajorEventRow>, dart_shared::Error> {
        if !MAJOR_EVENT_TYPES.contains(&event_type) {
            return Err(dart_shared::Error::invalid_input(format!(
                "unknown major event type: {event_type}"
            )));
        }
        let cache_params = (
            corp_code.to_string(),
            event_type.to_owned(),
            start_year.map(ToOwned::to_owned),
            end_year.map(ToOwned::to_owned),
        );
        self.cached("get_major_events", cache_params, || async {
            let mut params = vec![
                ("corp_code".to_owned(), corp_code.to_string()),
                ("event_type".to_owned(), event_type.to_owned()),
            ];
            if let Some(start_year) = start_year {
                params.push(("bgn_de".to_owned(), start_year.to_owned()));
            }
            if let Some(end_year) = end_year {
                params.push(("end_de".to_owned(), end_year.to_owned()));
            }
            let params: Vec<(&str, String)> = params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
            let value = self.get_json("majorEvent.json", &params).await?;
            extract_list(value)
        })
        .await
    }

    /// Fetches 증권신고서 rows of a given type. Mirrors `get_securities_report`.
    pub async fn get_securities_report(
        &self,
        corp_code: &CorpCode,
        securities_type: &str,
    ) -> Result<Vec<SecuritiesReportRow>, dart_shared::Error> {
        if !SECURITIES_TYPES.contains(&securities_type) {
            return Err(dart_shared::Error::invalid_input(format!(
                "unknown securities report type: {securities_type}"
            )));
        }
        let cache_params = (corp_code.to_string(), securities_type.to_owned());
        self.cached("get_securities_report", cache_params, || async {
            let params = [
                ("corp_code", corp_code.to_string()),
                ("securities_type", securities_type.to_owned()),
            ];
            let value = self.get_json("securitiesReport.json", &params).await?;
            extract_list(value)
        })
        .await
    }

    /// Looks up a company by KRX stock code directly against the cached
    /// registry, never fuzzily (`spec.md` §8, "stock code resolves by direct
    /// lookup").
    pub async fn get_company_by_stock_code(
        &self,
        stock_code: &StockCode,
    ) -> Result<Option<CompanyRecord>, dart_shared::Error> {
        let all = self.all_companies().await?;
        Ok(all.into_iter().find(|record| record.stock_code.as_ref() == Some(stock_code)))
    }

    /// Exposes the fixed vocabulary for one option family, mirroring
    /// `get_available_options` / `_get_available_options`.
    pub fn available_options(option_type: &str) -> Option<Vec<&'static str>> {
        match option_type {
            "disclosure_kinds" => Some(DISCLOSURE_KINDS.values().copied().collect()),
            "report_codes" => Some(REPORT_CODES.keys().copied().collect()),
            "xbrl_classifications" => Some(XBRL_CLASSIFICATIONS.keys().copied().collect()),
            "major_event_types" => Some(MAJOR_EVENT_TYPES.to_vec()),
            "business_report_types" => Some(BUSINESS_REPORT_TYPES.to_vec()),
            "securities_types" => Some(SECURITIES_TYPES.to_vec()),
            _ => None,
        }
    }
}

fn extract_list<T: DeserializeOwned>(value: Value) -> Result<T, GatewayError> {
    let list = value.get("list").cloned().unwrap_or(Value::Array(vec![]));
    serde_json::from_value(list).map_err(GatewayError::Decoding)
}

fn check_status(value: &Value) -> Result<(), GatewayError> {
    let Some(status) = value.get("status").and_then(Value::as_str) else {
        // `company.json` and a few detail endpoints return a flat object with
        // no envelope when there's exactly one result; absence of a status
        // field is not itself an error.
        return Ok(());
    };
    match status {
        STATUS_OK => Ok(()),
        STATUS_NO_DATA => Err(GatewayError::UpstreamEmpty),
        other => {
            let message = value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_owned();
            Err(GatewayError::UpstreamStatus(other.to_owned(), message))
        }
    }
}

fn extract_archive(bytes: &[u8]) -> anyhow::Result<Vec<ArchiveMember>> {
    let reader = std::io::Cursor::new(bytes);
    let mut archive = zip::ZipArchive::new(reader)?;
    let mut members = Vec::with_capacity(archive.len());
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let file_name = entry.name().to_owned();
        let mut buffer = Vec::new();
        entry.read_to_end(&mut buffer)?;
        members.push(ArchiveMember { file_name, bytes: buffer });
    }
    Ok(members)
}

/// DART serves XML/archive payloads in EUC-KR; UTF-8 is attempted first since
/// some documents are already UTF-8, falling back to EUC-KR decoding.
fn decode_document_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => encoding_rs::EUC_KR.decode(bytes).0.into_owned(),
    }
}

fn parse_corp_code_xml(xml: &[u8]) -> Result<Vec<CompanyRecord>, dart_shared::Error> {
    let text = decode_document_bytes(xml);
    let mut records = Vec::new();
    for block in text.split("<list>").skip(1) {
        let Some(end) = block.find("</list>") else {
            continue;
        };
        let block = &block[..end];
        let corp_code = extract_tag(block, "corp_code");
        let corp_name = extract_tag(block, "corp_name");
        let stock_code = extract_tag(block, "stock_code").filter(|code| !code.trim().is_empty());
        let modify_date = extract_tag(block, "modify_date");
        if let (Some(corp_code), Some(corp_name)) = (corp_code, corp_name) {
            records.push(CompanyRecord {
                corp_code: CorpCode::from(corp_code),
                corp_name,
                stock_code: stock_code.map(StockCode::from),
                modify_date,
            });
        }
    }
    if records.is_empty() {
        Err(dart_shared::Error::UpstreamEmpty)
    } else {
        Ok(records)
    }
}

fn extract_tag(block: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = block.find(&open)? + open.len();
    let end = block[start..].find(&close)? + start;
    Some(block[start..end].trim().to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use dart_shared::{Cache, CacheConfig, RateLimiterConfig, SERVICE_DART_API};
    use wiremock::{
        matchers::{method, path},
        Mock,
        MockServer,
        ResponseTemplate,
    };

    fn gateway(base_url: String) -> DartGateway {
        let rate_limiter = Arc::new(RateLimiter::new(RateLimiterConfig::for_service(SERVICE_DART_API)));
        let cache = Arc::new(Cache::new(CacheConfig {
            cache_dir: std::env::temp_dir().join(format!("dart-gateway-test-{}", unique_suffix())),
            ..CacheConfig::default()
        }));
        DartGateway::new("test-key", rate_limiter, cache).with_base_url(base_url)
    }

    fn unique_suffix() -> u64 {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        COUNTER.fetch_add(1, Ordering::Relaxed)
    }

    #[tokio::test]
    async fn search_disclosures_parses_list_and_caches() {
        let mock_server = MockServer::start().await;
        let body = serde_json::json!({
            "status": "000",
            "message": "정상",
            "list": [{
                "corp_code": "00126380",
                "corp_name": "삼성전자",
                "stock_code": "005930",
                "report_nm": "분기보고서",
                "rcept_no": "20230101000001",
                "rcept_dt": "20230101",
            }]
        });
        Mock::given(method("GET"))
            .and(path("list.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&mock_server)
            .await;

        let gateway = gateway(mock_server.uri());
        let rows = gateway
            .search_disclosures(Some(&CorpCode::from("00126380".to_owned())), None, None, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].corp_name, "삼성전자");

        // second call hits the cache, not the mock (which `.expect(1)` enforces).
        let rows_again = gateway
            .search_disclosures(Some(&CorpCode::from("00126380".to_owned())), None, None, None)
            .await
            .unwrap();
        assert_eq!(rows_again.len(), 1);
    }

    #[tokio::test]
    async fn no_data_status_becomes_upstream_empty() {
        let mock_server = MockServer::start().await;
        let body = serde_json::json!({"status": "013", "message": "조회된 데이타가 없습니다."});
        Mock::given(method("GET"))
            .and(path("list.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&mock_server)
            .await;

        let gateway = gateway(mock_server.uri());
        let error = gateway.search_disclosures(None, None, None, None).await.unwrap_err();
        assert!(matches!(error, dart_shared::Error::UpstreamEmpty));
    }

    #[test]
    fn category_code_kind_letter_is_first_char() {
        let code = crate::types::CategoryCode::from("B001".to_owned());
        assert_eq!(code.kind_letter(), Some('B'));
    }
}
