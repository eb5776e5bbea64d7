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

//! LLM-assisted pruning of search results to those relevant to the user
//! query (`spec.md` §4.9). Filter order is preserved from search order;
//! the output is always a subsequence of the input.

use once_cell::sync::Lazy;
use regex::Regex;

use dart_llm::{ChatMessage, ChatRequest, LlmClient};
use serde::Deserialize;

use crate::model::{DisclosureHit, QueryPlan};

/// Hits are batched at this size before each LLM call (`spec.md` §4.9).
const BATCH_SIZE: usize = 100;
/// Rule-based fallback keeps the top K most recent hits.
const RULE_BASED_KEEP: usize = 30;
/// If filtering would eliminate everything, the top N are retained instead
/// (`spec.md` §4.9).
const MIN_RETAINED: usize = 5;

pub struct DocumentFilter<'a> {
    llm: Option<&'a dyn LlmClient>,
    model: String,
}

impl<'a> DocumentFilter<'a> {
    pub fn new(llm: Option<&'a dyn LlmClient>, model: impl Into<String>) -> Self {
        Self { llm, model: model.into() }
    }

    /// Filters `hits` to those relevant to `plan.original_query`, preserving
    /// input order. Always a subsequence of the input (`spec.md` §8's filter
    /// monotonicity law).
    pub async fn filter(&self, plan: &QueryPlan, hits: Vec<DisclosureHit>) -> Vec<DisclosureHit> {
        let Some(llm) = self.llm else {
            return rule_based_filter(hits);
        };

        let mut kept = Vec::with_capacity(hits.len());
        for batch in hits.chunks(BATCH_SIZE) {
            match self.filter_batch(llm, &plan.original_query, batch).await {
                Some(mut indices) => {
                    // preserve input order regardless of the order the LLM
                    // listed indices in, so the result stays a subsequence
                    // of the input (`spec.md` §8 filter monotonicity).
                    indices.sort_unstable();
                    indices.dedup();
                    for index in indices {
                        if let Some(hit) = batch.get(index) {
                            kept.push(hit.clone());
                        }
                    }
                }
                None => {
                    // parse/LLM failure for this batch: keep its first 5, per
                    // `spec.md` §5.9.
                    kept.extend(batch.iter().take(MIN_RETAINED).cloned());
                }
            }
        }

        if kept.is_empty() && !hits.is_empty() {
            return hits.into_iter().take(MIN_RETAINED).collect();
        }
        kept
    }

    async fn filter_batch(&self, llm: &dyn LlmClient, query: &str, batch: &[DisclosureHit]) -> Option<Vec<usize>> {
        let summaries: Vec<_> = batch
            .iter()
            .enumerate()
            .map(|(index, hit)| {
                serde_json::json!({
                    "index": index,
                    "report_nm": hit.report_nm,
                    "corp_name": hit.corp_name,
                    "rcept_dt": hit.rcept_dt.format("%Y%m%d").to_string(),
                })
            })
            .collect();
        let listing = serde_json::to_string(&summaries).ok()?;

        let system = "You decide which disclosures are relevant to a user's query. \
            Given a JSON array of disclosures (with index, report_nm, corp_name, rcept_dt) \
            and the user's query, respond with a single JSON object: \
            {\"relevant_indices\": [...], \"reason\": \"...\"}. Return only the JSON object.";
        let user = format!("Query: {query}\nDisclosures: {listing}");

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature: 0.0,
            max_tokens: 512,
        };

        let response = llm.complete(request).await.ok()?;
        parse_filter_response(&response.content)
    }
}

static FENCED_JSON_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```(?:json)?\s*(\{[\s\S]*?\})\s*```").unwrap());
static RELEVANT_INDICES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"relevant_indices\s*[:=]\s*\[([^\]]*)\]").unwrap());
static INTEGER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-?\d+").unwrap());

#[derive(Debug, Deserialize)]
struct FilterResponse {
    relevant_indices: Vec<usize>,
}

/// Tries, in order: a fenced JSON block, a bare JSON object, a
/// `relevant_indices: [...]` pattern, then loose integer extraction
/// (`spec.md` §4.9).
fn parse_filter_response(text: &str) -> Option<Vec<usize>> {
    if let Some(captures) = FENCED_JSON_RE.captures(text) {
        if let Ok(parsed) = serde_json::from_str::<FilterResponse>(&captures[1]) {
            return Some(parsed.relevant_indices);
        }
    }

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end >= start {
            if let Ok(parsed) = serde_json::from_str::<FilterResponse>(&text[start..=end]) {
                return Some(parsed.relevant_indices);
            }
        }
    }

    if let Some(captures) = RELEVANT_INDICES_RE.captures(text) {
        let indices: Vec<usize> = INTEGER_RE
            .find_iter(&captures[1])
            .filter_map(|m| m.as_str().parse().ok())
            .collect();
        if !indices.is_empty() {
            return Some(indices);
        }
    }

    let loose: Vec<usize> = INTEGER_RE.find_iter(text).filter_map(|m| m.as_str().parse().ok()).collect();
    (!loose.is_empty()).then_some(loose)
}

/// Rule-based fallback: keeps the top K most recent hits by receipt date.
/// Input is assumed already ordered descending by recency (the Search
/// Executor's contract), so this is a plain truncation.
fn rule_based_filter(hits: Vec<DisclosureHit>) -> Vec<DisclosureHit> {
    hits.into_iter().take(RULE_BASED_KEEP).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json_block() {
        let text = "Here:\n```json\n{\"relevant_indices\": [0, 2], \"reason\": \"ok\"}\n```";
        assert_eq!(parse_filter_response(text), Some(vec![0, 2]));
    }

    #[test]
    fn parses_bare_json_object() {
        let text = "{\"relevant_indices\": [1], \"reason\": \"ok\"}";
        assert_eq!(parse_filter_response(text), Some(vec![1]));
    }

    #[test]
    fn parses_relevant_indices_pattern() {
        let text = "relevant_indices: [0, 1, 3]";
        assert_eq!(parse_filter_response(text), Some(vec![0, 1, 3]));
    }

    #[test]
    fn parses_loose_integers_as_last_resort() {
        let text = "I think 0 and 4 are relevant";
        assert_eq!(parse_filter_response(text), Some(vec![0, 4]));
    }

    #[test]
    fn rule_based_filter_keeps_top_30() {
        use chrono::NaiveDate;
        let hits: Vec<_> = (0..50)
            .map(|i| DisclosureHit {
                rcept_no: None,
                corp_code: None,
                corp_name: format!("company-{i}"),
                report_nm: "report".to_owned(),
                rcept_dt: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                flr_nm: String::new(),
                rm: None,
                corp_cls: None,
                category_code: None,
            })
            .collect();
        let filtered = rule_based_filter(hits);
        assert_eq!(filtered.len(), 30);
    }
}
