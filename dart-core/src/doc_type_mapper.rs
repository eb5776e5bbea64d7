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

//! Resolves document-type phrases to DART `pblntf_detail_ty` category codes
//! (`spec.md` §4.6). Folds the two near-duplicate Python mappers named in
//! `spec.md` §9 into a single table: the richer per-category keyword lists
//! with priority weights, union of both sources' keywords.

use once_cell::sync::Lazy;

use dart_gateway::types::CategoryCode;
use dart_llm::{ChatMessage, ChatRequest, LlmClient};
use dart_shared::Error;

use crate::query_parser::ParsedQuery;

/// Default category emitted when nothing in the query matches anything in
/// the table (`spec.md` §4.6).
const DEFAULT_CODE: &str = "B001";
const DEFAULT_CONFIDENCE: f32 = 0.3;
/// How many ranked `(code, confidence)` pairs the mapper returns at most.
const MAX_RESULTS: usize = 3;

/// One category's keyword hints and base priority, the built-in table every
/// fallback classification scores against.
struct DocTypeMapping {
    code: &'static str,
    name: &'static str,
    keywords: &'static [&'static str],
    priority: u32,
}

/// The union catalog: broad per-category keyword lists with priority
/// weights, folding in keywords unique to the slimmer duplicate mapper named
/// in `spec.md` §9's Design Notes.
static CATALOG: Lazy<Vec<DocTypeMapping>> = Lazy::new(|| {
    vec![
        DocTypeMapping {
            code: "B001",
            name: "주요사항보고서(기타)",
            keywords: &[
                "합병",
                "분할",
                "영업양수도",
                "주요사항",
                "major event",
                "merger",
                "acquisition",
                "spin-off",
            ],
            priority: 15,
        },
        DocTypeMapping {
            code: "B002",
            name: "주요사항보고서(사채)",
            keywords: &["전환사채", "신주인수권부사채", "교환사채", "조건부자본증권", "convertible bond"],
            priority: 12,
        },
        DocTypeMapping {
            code: "B003",
            name: "주요사항보고서(자산양수도)",
            keywords: &["자산양수도", "타법인증권양도", "타법인증권양수", "유형자산양도", "유형자산양수"],
            priority: 11,
        },
        DocTypeMapping {
            code: "A001",
            name: "사업보고서",
            keywords: &["사업보고서", "연간보고서", "annual report", "연차보고서"],
            priority: 10,
        },
        DocTypeMapping {
            code: "A002",
            name: "반기보고서",
            keywords: &["반기보고서", "반기", "semi-annual", "상반기 실적"],
            priority: 9,
        },
        DocTypeMapping {
            code: "A003",
            name: "분기보고서",
            keywords: &["분기보고서", "분기", "quarterly report", "분기 실적"],
            priority: 9,
        },
        DocTypeMapping {
            code: "C001",
            name: "증권신고서(지분증권)",
            keywords: &["지분증권", "주식발행", "유상증자", "증권신고서"],
            priority: 10,
        },
        DocTypeMapping {
            code: "C002",
            name: "증권신고서(채무증권)",
            keywords: &["채무증권", "회사채발행", "사채발행"],
            priority: 9,
        },
        DocTypeMapping {
            code: "C003",
            name: "증권신고서(합병등)",
            keywords: &["주식의포괄적교환이전", "증권예탁증권", "합병등"],
            priority: 9,
        },
        DocTypeMapping {
            code: "D001",
            name: "주식등의대량보유상황보고서",
            keywords: &["대량보유", "지분공시", "5%룰", "경영권"],
            priority: 10,
        },
        DocTypeMapping {
            code: "D002",
            name: "임원ㆍ주요주주특정증권등소유상황보고서",
            keywords: &["임원", "주요주주", "특정증권등소유상황"],
            priority: 8,
        },
        DocTypeMapping {
            code: "D003",
            name: "의결권대리행사권유",
            keywords: &["의결권대리행사", "위임장권유"],
            priority: 7,
        },
        DocTypeMapping {
            code: "D004",
            name: "공개매수신고서",
            keywords: &["공개매수"],
            priority: 8,
        },
        DocTypeMapping {
            code: "E001",
            name: "자기주식취득",
            keywords: &["자기주식취득", "자사주매입"],
            priority: 9,
        },
        DocTypeMapping {
            code: "E002",
            name: "자기주식처분",
            keywords: &["자기주식처분", "자사주처분"],
            priority: 8,
        },
        DocTypeMapping {
            code: "E003",
            name: "자기주식취득신탁계약",
            keywords: &["자기주식취득신탁계약체결", "자기주식취득신탁계약해지"],
            priority: 7,
        },
        DocTypeMapping {
            code: "E004",
            name: "주식매수선택권부여신고",
            keywords: &["주식매수선택권", "스톡옵션", "stock option", "스톡옵션 부여"],
            priority: 10,
        },
        DocTypeMapping {
            code: "F001",
            name: "감사보고서",
            keywords: &["감사보고서", "외부감사", "회계감사"],
            priority: 12,
        },
        DocTypeMapping {
            code: "F002",
            name: "내부회계관리제도 검토보고서",
            keywords: &["내부회계관리제도", "내부통제"],
            priority: 8,
        },
    ]
});

/// Resolves the effective document-type phrases plus raw query to ranked
/// `(category code, confidence)` pairs (`spec.md` §4.6).
pub struct DocTypeMapper;

impl DocTypeMapper {
    /// Rule-based scorer: matches in `parsed.doc_type_phrases` count ×2,
    /// matches in `raw_query` count ×1, matches in `parsed.keywords` count
    /// ×0.5; normalized by the top score to 1.0.
    pub fn map_rule_based(parsed: &ParsedQuery, raw_query: &str) -> Vec<(CategoryCode, f32)> {
        let mut scored: Vec<(&'static str, f32)> = CATALOG
            .iter()
            .filter_map(|mapping| {
                let doc_type_hits = count_hits(mapping.keywords, &parsed.doc_type_phrases);
                let query_hits = count_hits_in_text(mapping.keywords, raw_query);
                let keyword_hits = count_hits(mapping.keywords, &parsed.keywords);

                let score = doc_type_hits as f32 * 2.0 + query_hits as f32 + keyword_hits as f32 * 0.5;
                (score > 0.0).then_some((mapping.code, score * mapping.priority as f32))
            })
            .collect();

        if scored.is_empty() {
            return vec![(CategoryCode::from(DEFAULT_CODE.to_owned()), DEFAULT_CONFIDENCE)];
        }

        scored.sort_unstable_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let top = scored[0].1;
        scored
            .into_iter()
            .take(MAX_RESULTS)
            .map(|(code, score)| (CategoryCode::from(code.to_owned()), (score / top).clamp(0.0, 1.0)))
            .collect()
    }

    /// LLM classifier path: prompts with the full catalog as context, expects
    /// a JSON array of `{code, confidence}`. Falls back to the rule-based
    /// scorer on any LLM soft failure.
    pub async fn map(
        client: &dyn LlmClient,
        model: &str,
        parsed: &ParsedQuery,
        raw_query: &str,
    ) -> Vec<(CategoryCode, f32)> {
        match Self::map_llm(client, model, raw_query).await {
            Ok(ranked) if !ranked.is_empty() => ranked,
            Ok(_) => Self::map_rule_based(parsed, raw_query),
            Err(error) => {
                tracing::warn!(%error, "doc-type mapper LLM path failed, using keyword scorer");
                Self::map_rule_based(parsed, raw_query)
            }
        }
    }

    async fn map_llm(client: &dyn LlmClient, model: &str, raw_query: &str) -> Result<Vec<(CategoryCode, f32)>, Error> {
        let catalog_hint = CATALOG
            .iter()
            .map(|mapping| format!("{}: {} ({})", mapping.code, mapping.name, mapping.keywords.join(", ")))
            .collect::<Vec<_>>()
            .join("\n");
        let system = format!(
            "Given this DART disclosure category catalog:\n{catalog_hint}\n\nClassify the user's query into up to 3 categories, ranked. Respond with a JSON array: [{{\"code\": \"B001\", \"confidence\": 0.9}}, ...]. Return only the JSON array."
        );
        let request = ChatRequest {
            model: model.to_owned(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(raw_query)],
            temperature: 0.0,
            max_tokens: 256,
        };
        let response = client.complete(request).await?;
        let raw = extract_json_array(&response.content)
            .ok_or_else(|| Error::llm_malformed("no JSON array found in doc-type mapper response"))?;
        let parsed: Vec<RawRanked> = serde_json::from_str(raw).map_err(|error| Error::llm_malformed(error.to_string()))?;
        Ok(parsed
            .into_iter()
            .take(MAX_RESULTS)
            .map(|entry| (CategoryCode::from(entry.code), entry.confidence.clamp(0.0, 1.0)))
            .collect())
    }
}

#[derive(serde::Deserialize)]
struct RawRanked {
    code: String,
    confidence: f32,
}

fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    (end >= start).then(|| &text[start..=end])
}

fn count_hits(keywords: &[&str], haystack: &[String]) -> usize {
    haystack
        .iter()
        .filter(|item| keywords.iter().any(|keyword| item.contains(keyword) || keyword.contains(item.as_str())))
        .count()
}

fn count_hits_in_text(keywords: &[&str], text: &str) -> usize {
    keywords.iter().filter(|keyword| text.contains(*keyword)).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_b001_when_nothing_matches() {
        let parsed = ParsedQuery::default();
        let ranked = DocTypeMapper::map_rule_based(&parsed, "hello world");
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0.as_str(), "B001");
        assert!((ranked[0].1 - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn matches_stock_option_grant_query() {
        let parsed = ParsedQuery::default();
        let ranked = DocTypeMapper::map_rule_based(&parsed, "최근 1년 스톡옵션 부여 공시");
        assert_eq!(ranked[0].0.as_str(), "E004");
    }

    #[test]
    fn top_score_normalizes_to_one() {
        let mut parsed = ParsedQuery::default();
        parsed.doc_type_phrases.push("merger".to_owned());
        let ranked = DocTypeMapper::map_rule_based(&parsed, "삼성전자 합병 비율");
        assert!((ranked[0].1 - 1.0).abs() < f32::EPSILON);
    }
}
