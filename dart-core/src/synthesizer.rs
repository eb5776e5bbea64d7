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

//! Aggregates [`ProcessedDocument`]s into a [`SynthesisResult`] (`spec.md`
//! §4.11): a timeline, top key findings, a document list, and either an
//! LLM-written or templated natural-language answer. Aggregation, timeline
//! construction, and key-finding extraction are pure functions; only the
//! final prose answer is LLM-assisted, with a deterministic template
//! fallback (`spec.md` §9's resolved open question: synthesis always runs at
//! P5 once at least one document is available).

use std::collections::BTreeMap;

use dart_llm::{ChatMessage, ChatRequest, LlmClient};

use crate::model::{
    DocumentDescriptor,
    KeyFinding,
    ProcessedDocument,
    QueryPlan,
    SynthesisResult,
    SynthesisSummary,
    TimelineEntry,
    TimelineEvent,
};

/// Timeline is capped at this many distinct dates (`spec.md` §4.11).
const MAX_TIMELINE_ENTRIES: usize = 10;
/// Each timeline entry lists at most this many individual events.
const MAX_EVENTS_PER_ENTRY: usize = 3;
/// Key findings are capped at this many highlights.
const MAX_KEY_FINDINGS: usize = 5;

pub struct Synthesizer<'a> {
    llm: Option<&'a dyn LlmClient>,
    model: String,
}

impl<'a> Synthesizer<'a> {
    pub fn new(llm: Option<&'a dyn LlmClient>, model: impl Into<String>) -> Self {
        Self { llm, model: model.into() }
    }

    /// Builds the final [`SynthesisResult`] for a completed search. `now`
    /// lets callers (and tests) pin the unix timestamp without reaching for
    /// `Utc::now()` inside a pure-ish aggregation step.
    pub async fn synthesize(
        &self,
        plan: &QueryPlan,
        documents: Vec<ProcessedDocument>,
        now_unix: i64,
    ) -> SynthesisResult {
        let summary = summarize(plan, &documents);
        let timeline = build_timeline(&documents);
        let key_findings = extract_key_findings(&documents);
        let descriptors: Vec<DocumentDescriptor> = documents.iter().map(describe).collect();

        let answer = match self.llm {
            Some(llm) => self
                .llm_answer(llm, plan, &timeline, &key_findings, &summary)
                .await
                .unwrap_or_else(|| template_answer(plan, &summary, &timeline, &key_findings)),
            None => template_answer(plan, &summary, &timeline, &key_findings),
        };

        SynthesisResult {
            query: plan.original_query.clone(),
            answer,
            summary,
            documents: descriptors,
            synthesized_at_unix: now_unix,
        }
    }

    async fn llm_answer(
        &self,
        llm: &dyn LlmClient,
        plan: &QueryPlan,
        timeline: &[TimelineEntry],
        key_findings: &[KeyFinding],
        summary: &SynthesisSummary,
    ) -> Option<String> {
        let context = serde_json::json!({
            "query": plan.original_query,
            "total_documents": summary.total_documents,
            "companies": summary.companies,
            "timeline": timeline.iter().map(|entry| serde_json::json!({
                "date": entry.date.to_string(),
                "count": entry.count,
            })).collect::<Vec<_>>(),
            "key_findings": key_findings.iter().map(|finding| serde_json::json!({
                "company": finding.company,
                "title": finding.title,
                "date": finding.date.to_string(),
            })).collect::<Vec<_>>(),
        });
        let system = "You write a concise, factual answer to a user's question about Korean \
            corporate disclosures, using only the provided structured context. Do not invent \
            facts not present in the context.";
        let user = format!("Context: {context}\n\nWrite the answer in the same language as the query.");

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature: 0.3,
            max_tokens: 800,
        };

        match llm.complete(request).await {
            Ok(response) if !response.content.trim().is_empty() => Some(response.content),
            _ => None,
        }
    }
}

/// Pure aggregation step, mirroring `_analyze_documents`.
fn summarize(plan: &QueryPlan, documents: &[ProcessedDocument]) -> SynthesisSummary {
    let mut companies: Vec<String> = documents.iter().map(|doc| doc.hit.corp_name.clone()).collect();
    companies.sort_unstable();
    companies.dedup();

    let with_content = documents.iter().filter(|doc| !doc.content.is_empty() || !doc.structured_data.is_empty()).count();
    let confidence = if documents.is_empty() {
        0.0
    } else {
        with_content as f32 / documents.len() as f32
    };

    SynthesisSummary {
        total_documents: documents.len(),
        date_range: plan.date_range,
        companies,
        confidence,
    }
}

/// Groups documents by receipt date, keeping the most recent
/// [`MAX_TIMELINE_ENTRIES`] dates and up to [`MAX_EVENTS_PER_ENTRY`] events
/// each (`spec.md` §4.11).
fn build_timeline(documents: &[ProcessedDocument]) -> Vec<TimelineEntry> {
    let mut by_date: BTreeMap<chrono::NaiveDate, Vec<TimelineEvent>> = BTreeMap::new();
    for doc in documents {
        by_date.entry(doc.hit.rcept_dt).or_default().push(TimelineEvent {
            company: doc.hit.corp_name.clone(),
            title: doc.hit.report_nm.clone(),
            rcept_no: doc.hit.rcept_no.as_ref().map(|r| r.as_str().to_owned()),
        });
    }

    let mut entries: Vec<TimelineEntry> = by_date
        .into_iter()
        .map(|(date, mut events)| {
            let count = events.len();
            events.truncate(MAX_EVENTS_PER_ENTRY);
            TimelineEntry { date, count, events }
        })
        .collect();

    entries.sort_unstable_by(|a, b| b.date.cmp(&a.date));
    entries.truncate(MAX_TIMELINE_ENTRIES);
    entries
}

/// Picks the top [`MAX_KEY_FINDINGS`] most recent documents as highlights
/// (`spec.md` §4.11).
fn extract_key_findings(documents: &[ProcessedDocument]) -> Vec<KeyFinding> {
    let mut sorted: Vec<&ProcessedDocument> = documents.iter().collect();
    sorted.sort_unstable_by(|a, b| b.hit.rcept_dt.cmp(&a.hit.rcept_dt));
    sorted
        .into_iter()
        .take(MAX_KEY_FINDINGS)
        .map(|doc| KeyFinding {
            company: doc.hit.corp_name.clone(),
            title: doc.hit.report_nm.clone(),
            date: doc.hit.rcept_dt,
            url: doc.viewer_url(),
        })
        .collect()
}

fn describe(doc: &ProcessedDocument) -> DocumentDescriptor {
    DocumentDescriptor {
        company: doc.hit.corp_name.clone(),
        title: doc.hit.report_nm.clone(),
        date: doc.hit.rcept_dt,
        submitter: doc.hit.flr_nm.clone(),
        rcept_no: doc.hit.rcept_no.as_ref().map(|r| r.as_str().to_owned()),
        url: doc.viewer_url(),
        content: doc.content.clone(),
        source: Some(doc.source),
        structured_data: (!doc.structured_data.is_empty()).then(|| doc.structured_data.clone()),
    }
}

/// Deterministic, template-based answer used whenever no LLM is configured
/// or the LLM call fails — must stay structurally equivalent in information
/// content to what the LLM path would produce.
fn template_answer(
    plan: &QueryPlan,
    summary: &SynthesisSummary,
    timeline: &[TimelineEntry],
    key_findings: &[KeyFinding],
) -> String {
    let mut lines = Vec::new();
    lines.push(format!(
        "'{}' 질의에 대해 공시 {}건을 찾았습니다.",
        plan.original_query, summary.total_documents
    ));

    if !summary.companies.is_empty() {
        lines.push(format!("관련 회사: {}", summary.companies.join(", ")));
    }

    if let Some(range) = summary.date_range {
        lines.push(format!("기간: {} ~ {}", range.start, range.end));
    }

    if !key_findings.is_empty() {
        lines.push("주요 공시:".to_owned());
        for finding in key_findings {
            lines.push(format!("- [{}] {} ({})", finding.date, finding.title, finding.company));
        }
    }

    if !timeline.is_empty() {
        lines.push(format!("활동이 있었던 날짜 수: {}", timeline.len()));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::NaiveDate;

    use super::*;
    use dart_gateway::types::ReceiptNo;
    use crate::model::{DisclosureHit, DocumentSource};

    fn doc(company: &str, title: &str, date: &str, rcept_no: &str) -> ProcessedDocument {
        ProcessedDocument {
            hit: DisclosureHit {
                rcept_no: Some(ReceiptNo::from(rcept_no.to_owned())),
                corp_code: None,
                corp_name: company.to_owned(),
                report_nm: title.to_owned(),
                rcept_dt: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
                flr_nm: company.to_owned(),
                rm: None,
                corp_cls: None,
                category_code: None,
            },
            content: "some content".to_owned(),
            structured_data: HashMap::new(),
            source: DocumentSource::OriginalDocument,
            corp_code: None,
            report_type: None,
            error: String::new(),
        }
    }

    fn plan() -> QueryPlan {
        QueryPlan {
            original_query: "삼성전자 최근 공시".to_owned(),
            companies: Vec::new(),
            ambiguous_companies: Vec::new(),
            date_range: None,
            category_code: None,
            category_confidence: 0.0,
            major_event_types: Vec::new(),
            securities_types: Vec::new(),
            business_report_types: Vec::new(),
            keywords: Vec::new(),
            doc_type_phrases: Vec::new(),
            needs_confirmation: false,
            parallel_search: false,
        }
    }

    #[test]
    fn timeline_groups_by_date_and_caps_events() {
        let documents = vec![
            doc("A", "r1", "2024-01-01", "1"),
            doc("B", "r2", "2024-01-01", "2"),
            doc("C", "r3", "2024-01-01", "3"),
            doc("D", "r4", "2024-01-01", "4"),
            doc("E", "r5", "2024-01-02", "5"),
        ];
        let timeline = build_timeline(&documents);
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0].date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(timeline[1].count, 4);
        assert_eq!(timeline[1].events.len(), MAX_EVENTS_PER_ENTRY);
    }

    #[test]
    fn key_findings_cap_at_five_most_recent() {
        let documents: Vec<_> = (0..10)
            .map(|i| doc("A", "r", &format!("2024-01-{:02}", i + 1), &i.to_string()))
            .collect();
        let findings = extract_key_findings(&documents);
        assert_eq!(findings.len(), MAX_KEY_FINDINGS);
        assert_eq!(findings[0].date, NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
    }

    #[test]
    fn template_answer_mentions_query_and_count() {
        let documents = vec![doc("삼성전자", "분기보고서", "2024-01-01", "1")];
        let summary = summarize(&plan(), &documents);
        let timeline = build_timeline(&documents);
        let findings = extract_key_findings(&documents);
        let answer = template_answer(&plan(), &summary, &timeline, &findings);
        assert!(answer.contains("삼성전자 최근 공시"));
        assert!(answer.contains('1'));
    }

    #[tokio::test]
    async fn synthesize_without_llm_uses_template() {
        let synthesizer = Synthesizer::new(None, "unused");
        let documents = vec![doc("삼성전자", "분기보고서", "2024-01-01", "1")];
        let result = synthesizer.synthesize(&plan(), documents, 0).await;
        assert_eq!(result.summary.total_documents, 1);
        assert!(!result.answer.is_empty());
    }
}
