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

//! Structured extraction from a natural-language query (`spec.md` §4.5):
//! companies, document-type phrases, typed date expressions, and keywords.
//! [`LlmQueryParser`] is the primary path; [`FallbackQueryParser`] is the
//! deterministic extractor every query must still resolve through when the
//! LLM is unavailable or returns something unparseable.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use dart_llm::{ChatMessage, ChatRequest, LlmClient};
use dart_shared::Error;

/// How a [`CompanyMention`] was spelled in the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompanyMentionKind {
    CompanyName,
    StockCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyMention {
    pub text: String,
    pub kind: CompanyMentionKind,
}

/// One relative-date unit understood by [`DateExpression::RelativeWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativeUnit {
    Days,
    Months,
    Years,
}

/// A typed date expression extracted from the query (`spec.md` §4.5's typed
/// attributes). Resolved to a concrete `[start, end]` range by
/// `query_expander::extract_date_range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateExpression {
    CurrentYear,
    LastYear,
    RelativeWindow { amount: i64, unit: RelativeUnit },
    SpecificYear(i32),
    SpecificMonth { year: i32, month: u32 },
    SpecificDate { year: i32, month: u32, day: u32 },
    Quarter { year: i32, quarter: u8 },
    FirstHalf(i32),
    SecondHalf(i32),
}

/// The Query Parser's structured output (`spec.md` §4.5).
#[derive(Debug, Clone, Default)]
pub struct ParsedQuery {
    pub companies: Vec<CompanyMention>,
    pub doc_type_phrases: Vec<String>,
    pub date_expressions: Vec<DateExpression>,
    pub keywords: Vec<String>,
}

#[async_trait]
pub trait QueryParser: Send + Sync {
    async fn parse(&self, query: &str) -> Result<ParsedQuery, Error>;
}

/// Tries the LLM parser first, falling back to the deterministic extractor on
/// any LLM soft failure. Never returns an LLM error to its caller (`spec.md`
/// §9 "LLM as best-effort co-processor") — the fallback is complete, so this
/// combinator's `parse` never errors.
pub struct CompositeQueryParser<L> {
    llm: L,
    fallback: FallbackQueryParser,
}

impl<L: QueryParser> CompositeQueryParser<L> {
    pub fn new(llm: L) -> Self {
        Self {
            llm,
            fallback: FallbackQueryParser,
        }
    }
}

#[async_trait]
impl<L: QueryParser> QueryParser for CompositeQueryParser<L> {
    async fn parse(&self, query: &str) -> Result<ParsedQuery, Error> {
        match self.llm.parse(query).await {
            Ok(parsed) => Ok(parsed),
            Err(error) if error.is_llm_soft_failure() => {
                tracing::warn!(%error, "query parser LLM path failed, using deterministic fallback");
                self.fallback.parse(query).await
            }
            Err(error) => Err(error),
        }
    }
}

/// Calls the LLM completion endpoint with a few-shot extraction prompt and
/// JSON-decodes the result.
pub struct LlmQueryParser<C> {
    client: C,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl<C: LlmClient> LlmQueryParser<C> {
    pub fn new(client: C, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            temperature: 0.0,
            max_tokens: 512,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    companies: Vec<RawCompany>,
    #[serde(default)]
    doc_types: Vec<String>,
    #[serde(default)]
    dates: Vec<String>,
    #[serde(default)]
    keywords: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawCompany {
    text: String,
    #[serde(default)]
    kind: Option<String>,
}

const SYSTEM_PROMPT: &str = r#"You extract structured search parameters from a Korean financial disclosure query. Respond with a single JSON object: {"companies": [{"text": "...", "kind": "company_name"|"stock_code"}], "doc_types": ["..."], "dates": ["current_year"|"last_year"|"last N days"|"last N months"|"last N years"|"YYYY"|"YYYY-MM"|"YYYY-MM-DD"|"YYYYQn"|"first_half YYYY"|"second_half YYYY"], "keywords": ["..."]}. Return only the JSON object, no other text."#;

#[async_trait]
impl<C: LlmClient + Send + Sync> QueryParser for LlmQueryParser<C> {
    async fn parse(&self, query: &str) -> Result<ParsedQuery, Error> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(query)],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let response = self.client.complete(request).await?;
        let raw = extract_json_object(&response.content)
            .ok_or_else(|| Error::llm_malformed("no JSON object found in query parser response"))?;
        let extraction: RawExtraction =
            serde_json::from_str(raw).map_err(|error| Error::llm_malformed(error.to_string()))?;

        let companies = extraction
            .companies
            .into_iter()
            .map(|company| CompanyMention {
                kind: match company.kind.as_deref() {
                    Some("stock_code") => CompanyMentionKind::StockCode,
                    _ => CompanyMentionKind::CompanyName,
                },
                text: company.text,
            })
            .collect();

        let date_expressions = extraction
            .dates
            .iter()
            .filter_map(|raw| parse_date_expression(raw))
            .collect();

        Ok(ParsedQuery {
            companies,
            doc_type_phrases: extraction.doc_types,
            date_expressions,
            keywords: extraction.keywords,
        })
    }
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end >= start).then(|| &text[start..=end])
}

/// Deterministic extractor used when the LLM is unavailable or malformed.
/// Must always succeed (`spec.md` §4.5 "the fallback is complete").
pub struct FallbackQueryParser;

static STOCK_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{6})\b").unwrap());
static CORP_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([가-힣A-Za-z0-9&\.]+(?:주식회사|㈜|\(주\)|Co\.,?\s*Ltd\.?|Corp\.?|Inc\.?))").unwrap());

/// A short built-in list of major Korean conglomerate/company names the
/// fallback extractor recognizes verbatim, mirroring `date_parser.py`'s
/// hard-coded company shortlist.
const KNOWN_COMPANIES: &[&str] = &[
    "삼성전자",
    "SK하이닉스",
    "LG전자",
    "현대자동차",
    "기아",
    "포스코",
    "네이버",
    "카카오",
    "셀트리온",
    "삼성바이오로직스",
    "LG화학",
    "SK이노베이션",
    "삼성SDI",
    "현대모비스",
    "KB금융",
    "신한지주",
];

/// `(keyword, resulting doc-type phrase)` pairs scanned in the raw query to
/// recognize document-category phrases without LLM assistance.
const DOC_TYPE_KEYWORDS: &[(&str, &str)] = &[
    ("합병", "merger"),
    ("분할", "split"),
    ("사업보고서", "business_report"),
    ("반기보고서", "semiannual_report"),
    ("분기보고서", "quarterly_report"),
    ("주식매수선택권", "stock_option"),
    ("스톡옵션", "stock_option"),
    ("유상증자", "rights_offering"),
    ("무상증자", "bonus_issue"),
    ("자기주식", "treasury_stock"),
    ("전환사채", "convertible_bond"),
    ("최대주주", "major_shareholder"),
    ("감사보고서", "audit_report"),
    ("대량보유", "substantial_holding"),
    ("증권신고서", "securities_registration"),
];

/// Keyword phrases scanned to populate `keywords` when the LLM is absent.
const GENERIC_KEYWORDS: &[&str] = &["합병비율", "공시", "상장", "매출", "실적", "배당", "인수", "투자"];

#[async_trait]
impl QueryParser for FallbackQueryParser {
    async fn parse(&self, query: &str) -> Result<ParsedQuery, Error> {
        let mut companies = Vec::new();

        for capture in STOCK_CODE_RE.captures_iter(query) {
            companies.push(CompanyMention {
                text: capture[1].to_owned(),
                kind: CompanyMentionKind::StockCode,
            });
        }

        for name in KNOWN_COMPANIES {
            if query.contains(name) {
                companies.push(CompanyMention {
                    text: (*name).to_owned(),
                    kind: CompanyMentionKind::CompanyName,
                });
            }
        }

        for capture in CORP_SUFFIX_RE.captures_iter(query) {
            let text = capture[1].trim().to_owned();
            if !companies.iter().any(|mention| mention.text == text) {
                companies.push(CompanyMention {
                    text,
                    kind: CompanyMentionKind::CompanyName,
                });
            }
        }

        let mut doc_type_phrases = Vec::new();
        for (needle, phrase) in DOC_TYPE_KEYWORDS {
            if query.contains(needle) {
                doc_type_phrases.push((*phrase).to_owned());
            }
        }

        let date_expressions = extract_date_expressions(query);

        let mut keywords = Vec::new();
        for needle in GENERIC_KEYWORDS {
            if query.contains(needle) {
                keywords.push((*needle).to_owned());
            }
        }

        Ok(ParsedQuery {
            companies,
            doc_type_phrases,
            date_expressions,
            keywords,
        })
    }
}

static RELATIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:지난|최근)\s*(\d+)\s*(일|개월|달|년)").unwrap());
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19|20)\d{2}\b").unwrap());
static ISO_DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap());
static ISO_MONTH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{2})\b").unwrap());
static QUARTER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4})\s*[Qq]([1-4])\b").unwrap());

fn extract_date_expressions(query: &str) -> Vec<DateExpression> {
    let mut expressions = Vec::new();

    if query.contains("올해") || query.contains("금년") {
        expressions.push(DateExpression::CurrentYear);
    }
    if query.contains("작년") || query.contains("지난해") {
        expressions.push(DateExpression::LastYear);
    }
    if query.contains("상반기") {
        if let Some(year) = first_year(query) {
            expressions.push(DateExpression::FirstHalf(year));
        }
    }
    if query.contains("하반기") {
        if let Some(year) = first_year(query) {
            expressions.push(DateExpression::SecondHalf(year));
        }
    }

    for capture in QUARTER_RE.captures_iter(query) {
        let year: i32 = capture[1].parse().unwrap_or_default();
        let quarter: u8 = capture[2].parse().unwrap_or(1);
        expressions.push(DateExpression::Quarter { year, quarter });
    }

    for capture in RELATIVE_RE.captures_iter(query) {
        let amount: i64 = capture[1].parse().unwrap_or(30);
        let unit = match &capture[2] {
            "년" => RelativeUnit::Years,
            "개월" | "달" => RelativeUnit::Months,
            _ => RelativeUnit::Days,
        };
        expressions.push(DateExpression::RelativeWindow { amount, unit });
    }

    for capture in ISO_DATE_RE.captures_iter(query) {
        expressions.push(DateExpression::SpecificDate {
            year: capture[1].parse().unwrap_or_default(),
            month: capture[2].parse().unwrap_or(1),
            day: capture[3].parse().unwrap_or(1),
        });
    }
    if expressions.iter().all(|expr| !matches!(expr, DateExpression::SpecificDate { .. })) {
        for capture in ISO_MONTH_RE.captures_iter(query) {
            expressions.push(DateExpression::SpecificMonth {
                year: capture[1].parse().unwrap_or_default(),
                month: capture[2].parse().unwrap_or(1),
            });
        }
    }

    if expressions.is_empty() {
        if let Some(year) = first_year(query) {
            expressions.push(DateExpression::SpecificYear(year));
        }
    }

    expressions
}

fn first_year(query: &str) -> Option<i32> {
    YEAR_RE.find(query).and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fallback_extracts_stock_code() {
        let parsed = FallbackQueryParser.parse("005930 공시 내역").await.unwrap();
        assert_eq!(parsed.companies[0].text, "005930");
        assert_eq!(parsed.companies[0].kind, CompanyMentionKind::StockCode);
    }

    #[tokio::test]
    async fn fallback_extracts_known_company() {
        let parsed = FallbackQueryParser.parse("삼성전자 합병 공시").await.unwrap();
        assert!(parsed.companies.iter().any(|c| c.text == "삼성전자"));
        assert!(parsed.doc_type_phrases.contains(&"merger".to_owned()));
    }

    #[tokio::test]
    async fn fallback_extracts_relative_window() {
        let parsed = FallbackQueryParser.parse("최근 1년 공시").await.unwrap();
        assert!(parsed
            .date_expressions
            .contains(&DateExpression::RelativeWindow { amount: 1, unit: RelativeUnit::Years }));
    }

    #[tokio::test]
    async fn fallback_never_errors_on_unrecognized_query() {
        let parsed = FallbackQueryParser.parse("hello world").await.unwrap();
        assert!(parsed.companies.is_empty());
        assert!(parsed.doc_type_phrases.is_empty());
    }

    #[tokio::test]
    async fn fallback_extracts_quarter() {
        let parsed = FallbackQueryParser.parse("2024Q1 실적").await.unwrap();
        assert!(parsed
            .date_expressions
            .contains(&DateExpression::Quarter { year: 2024, quarter: 1 }));
    }

    #[test]
    fn extract_json_object_trims_surrounding_prose() {
        let text = "Sure, here you go:\n```json\n{\"companies\": []}\n```\nthanks";
        assert_eq!(extract_json_object(text), Some("{\"companies\": []}"));
    }
}
