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

//! Drives one deep-search request end to end through the engine's phases
//! (`spec.md` §4.12):
//!
//! `INIT → EXPANDED → {CONFIRM_NEEDED | EMPTY_PARAMS | SEARCHING} →
//! {NO_RESULTS | FILTERING} → FETCHING → SYNTHESIZING → DONE`
//!
//! The [`Orchestrator::deep_search`] entrypoint is the single public surface
//! other crates call; every other `dart-core` module is reached only through
//! it.

use std::sync::Arc;

use dart_gateway::DartGateway;
use dart_llm::LlmClient;
use dart_shared::Error;

use crate::{
    company_validator::CompanyValidator,
    document_fetcher::DocumentFetcher,
    document_filter::DocumentFilter,
    model::{PipelineResponse, SynthesisResult, SynthesisSummary},
    query_expander::{self, QueryExpander},
    query_parser::QueryParser,
    search_executor::SearchExecutor,
    synthesizer::Synthesizer,
};

/// A minimum of one document reaching the Fetcher is required for synthesis
/// to run at all; below that the pipeline short-circuits to `NoResults`
/// (`spec.md` §9's resolved open question: synthesis always runs once ≥1
/// document is available, never a fixed "top N" gate).
const MIN_DOCUMENTS_FOR_SYNTHESIS: usize = 1;

pub struct Orchestrator<'a, P> {
    gateway: &'a DartGateway,
    expander: QueryExpander<P>,
    llm: Option<Arc<dyn LlmClient>>,
    llm_model: String,
    fetch_concurrency: usize,
}

impl<'a, P: QueryParser> Orchestrator<'a, P> {
    pub fn new(
        gateway: &'a DartGateway,
        parser: P,
        validator: Arc<CompanyValidator>,
        llm: Option<Arc<dyn LlmClient>>,
        llm_model: impl Into<String>,
    ) -> Self {
        let llm_model = llm_model.into();
        let expander = QueryExpander::new(parser, validator, llm.clone(), llm_model.clone());
        Self {
            gateway,
            expander,
            llm,
            llm_model,
            fetch_concurrency: crate::document_fetcher::DEFAULT_CONCURRENCY,
        }
    }

    #[must_use = "dropped changed orchestrator"]
    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency;
        self
    }

    /// Runs the full pipeline for one user query, never propagating an
    /// `Err` to the caller: every phase failure is captured as a
    /// [`PipelineResponse::Error`] (except `Cancelled`, which does
    /// propagate so callers can distinguish a timeout/shutdown from a
    /// genuine pipeline failure).
    pub async fn deep_search(&self, query: &str, now_unix: i64) -> Result<PipelineResponse, Error> {
        let started = std::time::Instant::now();
        let query = query.trim();
        if query.is_empty() {
            return Ok(PipelineResponse::Error {
                query: query.to_owned(),
                phase: "init".to_owned(),
                message: "query must not be empty".to_owned(),
            });
        }

        let (plan, shards) = match self.expander.expand(query, query_expander::today()).await {
            Ok(expanded) => expanded,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(error) => {
                return Ok(PipelineResponse::Error {
                    query: query.to_owned(),
                    phase: "expand".to_owned(),
                    message: error.to_string(),
                });
            }
        };
        tracing::info!(phase = "expanded", elapsed_ms = started.elapsed().as_millis() as u64, shard_count = shards.len());

        // `spec.md` §4.12 P2: gated on `needs_confirmation` alone, even when
        // some other company in the same query resolved cleanly — a mixed
        // resolved/ambiguous query still needs a round trip to the user
        // before anything downstream runs.
        if plan.needs_confirmation {
            return Ok(PipelineResponse::NeedsUserInput {
                query: query.to_owned(),
                message: "more than one company could match this query; please confirm which one".to_owned(),
                ambiguous_companies: plan.ambiguous_companies,
            });
        }

        // `spec.md` §4.12 P1 / §8's boundary behavior: a query with no
        // resolvable company and no doc-type signal at all still reports
        // `status=success` with zero documents, not a failure status —
        // mirrors the original orchestrator's `companies == [] and
        // corp_codes == [] and doc_types == []` short-circuit.
        if plan.is_empty_params() {
            return Ok(PipelineResponse::Success(Box::new(SynthesisResult {
                query: query.to_owned(),
                answer: "이 질의에서 회사명이나 공시 유형을 찾을 수 없습니다. 회사 이름이나 구체적인 공시 종류(예: 주요사항보고서, 사업보고서)를 포함해 다시 질문해 주세요.".to_owned(),
                summary: SynthesisSummary {
                    total_documents: 0,
                    date_range: plan.date_range,
                    companies: Vec::new(),
                    confidence: 0.0,
                },
                documents: Vec::new(),
                synthesized_at_unix: now_unix,
            })));
        }

        let executor = SearchExecutor::new(self.gateway);
        let hits = executor.execute(&shards, plan.parallel_search).await;
        tracing::info!(phase = "searched", elapsed_ms = started.elapsed().as_millis() as u64, hit_count = hits.len());

        if hits.is_empty() {
            return Ok(PipelineResponse::NoResults {
                query: query.to_owned(),
                message: "no disclosures matched this query".to_owned(),
            });
        }

        let filter = DocumentFilter::new(self.llm.as_deref(), self.llm_model.clone());
        let filtered = filter.filter(&plan, hits).await;
        tracing::info!(phase = "filtered", elapsed_ms = started.elapsed().as_millis() as u64, kept_count = filtered.len());

        if filtered.len() < MIN_DOCUMENTS_FOR_SYNTHESIS {
            return Ok(PipelineResponse::NoResults {
                query: query.to_owned(),
                message: "no disclosures remained after relevance filtering".to_owned(),
            });
        }

        let fetcher = DocumentFetcher::new(self.gateway)
            .with_concurrency(self.fetch_concurrency)
            .with_default_category_code(plan.category_code.clone());
        let documents = fetcher.fetch_all(filtered).await;
        let fetch_error_count = documents.iter().filter(|doc| !doc.error.is_empty()).count();
        tracing::info!(
            phase = "fetched",
            elapsed_ms = started.elapsed().as_millis() as u64,
            document_count = documents.len(),
            fetch_error_count,
        );

        let synthesizer = Synthesizer::new(self.llm.as_deref(), self.llm_model.clone());
        let result = synthesizer.synthesize(&plan, documents, now_unix).await;
        tracing::info!(phase = "done", elapsed_ms = started.elapsed().as_millis() as u64);

        Ok(PipelineResponse::Success(Box::new(result)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_parser::{CompanyMention, CompanyMentionKind, ParsedQuery};
    use async_trait::async_trait;
    use dart_gateway::types::CompanyRecord;
    use dart_shared::{Cache, CacheConfig, RateLimiter, RateLimiterConfig, SERVICE_DART_API};

    struct StubParser {
        mentions: Vec<&'static str>,
    }

    impl StubParser {
        fn one(mention: Option<&'static str>) -> Self {
            Self { mentions: mention.into_iter().collect() }
        }
    }

    #[async_trait]
    impl QueryParser for StubParser {
        async fn parse(&self, _query: &str) -> Result<ParsedQuery, Error> {
            let companies = self
                .mentions
                .iter()
                .map(|name| CompanyMention { text: (*name).to_owned(), kind: CompanyMentionKind::CompanyName })
                .collect();
            Ok(ParsedQuery {
                companies,
                date_expressions: Vec::new(),
                doc_type_phrases: Vec::new(),
                keywords: Vec::new(),
            })
        }
    }

    fn gateway() -> DartGateway {
        let rate_limiter = Arc::new(RateLimiter::new(RateLimiterConfig::for_service(SERVICE_DART_API)));
        let cache = Arc::new(Cache::new(CacheConfig {
            cache_dir: std::env::temp_dir().join("dart-orchestrator-test"),
            ..CacheConfig::default()
        }));
        DartGateway::new("test-key", rate_limiter, cache)
    }

    #[tokio::test]
    async fn empty_query_is_an_error_response() {
        let gateway = gateway();
        let validator = Arc::new(CompanyValidator::new(Vec::<CompanyRecord>::new()));
        let orchestrator = Orchestrator::new(&gateway, StubParser::one(None), validator, None, "unused");
        let response = orchestrator.deep_search("   ", 0).await.unwrap();
        assert!(matches!(response, PipelineResponse::Error { .. }));
    }

    #[tokio::test]
    async fn empty_params_query_yields_zero_document_success() {
        let gateway = gateway();
        let validator = Arc::new(CompanyValidator::new(Vec::<CompanyRecord>::new()));
        let orchestrator = Orchestrator::new(&gateway, StubParser::one(None), validator, None, "unused");
        let response = orchestrator.deep_search("아무 내용도 없는 질문", 0).await.unwrap();
        match response {
            PipelineResponse::Success(result) => assert_eq!(result.summary.total_documents, 0),
            other => panic!("expected zero-document Success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mixed_resolved_and_ambiguous_companies_still_needs_confirmation() {
        let gateway = gateway();
        let records = vec![
            CompanyRecord {
                corp_code: dart_gateway::types::CorpCode::from("00126380".to_owned()),
                corp_name: "Samsung Electronics".to_owned(),
                stock_code: None,
                modify_date: None,
            },
            CompanyRecord {
                corp_code: dart_gateway::types::CorpCode::from("00164742".to_owned()),
                corp_name: "LG Electronics".to_owned(),
                stock_code: None,
                modify_date: None,
            },
        ];
        let validator = Arc::new(CompanyValidator::new(records));
        let parser = StubParser { mentions: vec!["Samsung Electronics", "LG Electronik"] };
        let orchestrator = Orchestrator::new(&gateway, parser, validator, None, "unused");
        let response = orchestrator.deep_search("Samsung and LG disclosures", 0).await.unwrap();
        assert!(
            matches!(response, PipelineResponse::NeedsUserInput { .. }),
            "expected NeedsUserInput, got {response:?}"
        );
    }
}
