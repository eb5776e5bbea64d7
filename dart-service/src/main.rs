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

//! Thin wiring harness: loads config, builds every component, runs
//! `deep_search` once for the query given on argv or stdin, and prints the
//! JSON response (`spec.md` §6's single `deep_search` tool entrypoint). The
//! transport shell that would expose this as a long-lived tool endpoint is
//! an explicit out-of-scope external collaborator (`spec.md` §1); this
//! binary is the minimal harness that actually drives the pipeline.

mod config;
mod logging;

use std::{
    io::{self, Read as _},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use secrecy::ExposeSecret;

use dart_core::{
    company_validator::CompanyValidator,
    query_parser::{CompositeQueryParser, FallbackQueryParser, LlmQueryParser, ParsedQuery, QueryParser},
    Orchestrator,
};
use dart_gateway::DartGateway;
use dart_llm::{LlmClient, Provider, RateLimitedLlmClient, ReqwestLlmClient};
use dart_shared::{Cache, CacheConfig, RateLimiter, RateLimiterConfig, SERVICE_DART_API, SERVICE_LLM};

/// `QueryParser` is used generically by [`Orchestrator`], but which concrete
/// parser exists depends on a runtime config value (is an LLM key set).
/// This enum picks between them once at startup and dispatches per call,
/// rather than making the whole binary generic over a type only known at
/// runtime.
enum EitherParser {
    WithLlm(CompositeQueryParser<LlmQueryParser<Arc<dyn LlmClient>>>),
    FallbackOnly(FallbackQueryParser),
}

#[async_trait]
impl QueryParser for EitherParser {
    async fn parse(&self, query: &str) -> Result<ParsedQuery, dart_shared::Error> {
        match self {
            Self::WithLlm(parser) => parser.parse(query).await,
            Self::FallbackOnly(parser) => parser.parse(query).await,
        }
    }
}

/// Derives a 60-second sliding-window limit from the configured daily quota
/// (`spec.md` §6: "`DART_API_RATE_LIMIT` — Daily quota used to derive window
/// limits."), never going below the engine's own built-in default so a
/// generous daily quota can only loosen, not tighten, the window.
fn dart_rate_limit_from_daily_quota(daily_quota: u32) -> RateLimiterConfig {
    let default = RateLimiterConfig::for_service(SERVICE_DART_API);
    let per_minute = ((daily_quota as u64 * 60) / (24 * 60)) as u32;
    RateLimiterConfig::new(per_minute.max(default.max_calls), 60, default.burst_limit)
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or_default()
}

fn read_query(arg: Option<String>) -> anyhow::Result<String> {
    if let Some(query) = arg {
        return Ok(query);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config::Loaded { config, query } = config::load();

    logging::initialize(&config.logging).ok();

    let dart_rate_limiter = Arc::new(RateLimiter::new(dart_rate_limit_from_daily_quota(
        config.dart_api_rate_limit,
    )));
    let cache = Arc::new(Cache::new(CacheConfig {
        cache_dir: config.dart_cache_path.clone(),
        ttl: std::time::Duration::from_secs(config.dart_cache_ttl_hours * 60 * 60),
        cache_empty_results: false,
    }));

    let gateway = DartGateway::new(
        config.dart_api_key.expose_secret().clone(),
        dart_rate_limiter,
        cache,
    );

    let companies = gateway.all_companies().await.unwrap_or_else(|error| {
        tracing::warn!(%error, "failed to load company registry; validator starts empty");
        Vec::new()
    });
    let validator = Arc::new(CompanyValidator::new(companies));

    let llm_api_key = config.llm_api_key.expose_secret().clone();
    let llm: Option<Arc<dyn LlmClient>> = if llm_api_key.is_empty() {
        None
    } else {
        let provider = match config.llm_provider.as_str() {
            "vllm" => Provider::Vllm,
            _ => Provider::OpenAi,
        };
        let llm_rate_limiter = Arc::new(RateLimiter::new(RateLimiterConfig::for_service(SERVICE_LLM)));
        let client = ReqwestLlmClient::new(provider, llm_api_key, config.llm_base_url.clone());
        Some(Arc::new(RateLimitedLlmClient::new(client, llm_rate_limiter)))
    };

    let parser = match &llm {
        Some(llm) => EitherParser::WithLlm(CompositeQueryParser::new(LlmQueryParser::new(
            llm.clone(),
            config.llm_model.clone(),
        ))),
        None => EitherParser::FallbackOnly(FallbackQueryParser),
    };

    let orchestrator = Orchestrator::new(&gateway, parser, validator, llm, config.llm_model.clone())
        .with_fetch_concurrency(config.dart_parallel_downloads);

    let query = read_query(query)?;
    let response = orchestrator.deep_search(&query, now_unix()).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}
