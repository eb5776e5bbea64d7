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

//! Recognized configuration keys (`spec.md` §6), layered the way the
//! teacher's `web-api/src/config.rs` does: environment over a `.env`/
//! `.env.local` pair over process defaults, with a handful of CLI flags
//! that win over everything. Every field here is also a flat env var in the
//! source's `config_loader.py`, so unlike the teacher there is no nested
//! `[section]` table — a single flat struct mirrors that directly.

use std::{path::PathBuf, process::exit};

use clap::Parser;
use figment::{
    providers::{Env, Serialized},
    Figment,
};
use secrecy::Secret;
use serde::{Deserialize, Serialize, Serializer};

use crate::logging;

/// Serializes a [`Secret<String>`] as `"[REDACTED]"`, so `--print-config`
/// never echoes `DART_API_KEY`/`LLM_API_KEY` back to stdout or a log file.
fn serialize_redacted<S>(_secret: &Secret<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str("[REDACTED]")
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_owned()
}

fn default_model() -> String {
    "gpt-4o-mini".to_owned()
}

// `Secret<String>` does not implement `Clone` (it would defeat the point of
// the wrapper), so `Config` cannot derive it either; every place that needs
// a piece of this config clones the individual field instead.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// `DART_API_KEY`. Authenticates upstream DART calls.
    #[serde(serialize_with = "serialize_redacted")]
    pub dart_api_key: Secret<String>,
    /// `DART_CACHE_PATH`. Disk cache root.
    pub dart_cache_path: PathBuf,
    /// `DART_CACHE_TTL`. Cache entry lifetime, in hours.
    pub dart_cache_ttl_hours: u64,
    /// `DART_API_RATE_LIMIT`. Daily call quota; the rate limiter derives its
    /// 60-second sliding-window limit from this (`quota / (24 * 60) * 60`,
    /// floored at the per-service default so a generous daily quota never
    /// produces a *tighter* window than `RateLimiterConfig::for_service`).
    pub dart_api_rate_limit: u32,
    /// `DART_MAX_SEARCH_RESULTS`. Upper bound on results retained per request.
    pub dart_max_search_results: usize,
    /// `DART_PARALLEL_DOWNLOADS`. Document-fetch concurrency.
    pub dart_parallel_downloads: usize,
    /// `LLM_PROVIDER`. `openai` or `vllm`; anything else is treated as `openai`.
    pub llm_provider: String,
    /// `LLM_BASE_URL`.
    pub llm_base_url: String,
    /// `LLM_API_KEY`. Empty means no LLM client is configured; every phase
    /// must still work via its deterministic fallback.
    #[serde(serialize_with = "serialize_redacted")]
    pub llm_api_key: Secret<String>,
    /// `LLM_MODEL`.
    pub llm_model: String,
    /// `LLM_TEMPERATURE`.
    pub llm_temperature: f32,
    /// `LLM_MAX_TOKENS`.
    pub llm_max_tokens: u32,
    pub logging: logging::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dart_api_key: Secret::new(String::new()),
            dart_cache_path: PathBuf::from("./cache/dart"),
            dart_cache_ttl_hours: 24,
            dart_api_rate_limit: 20_000,
            dart_max_search_results: 100,
            dart_parallel_downloads: 3,
            llm_provider: "openai".to_owned(),
            llm_base_url: default_base_url(),
            llm_api_key: Secret::new(String::new()),
            llm_model: default_model(),
            llm_temperature: 0.1,
            llm_max_tokens: 2048,
            logging: logging::Config::default(),
        }
    }
}

/// Mirrors the teacher's `web-api` CLI surface, trimmed to the flags this
/// engine actually has a use for.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// File to log to, in addition to stdout.
    #[arg(short, long)]
    log_file: Option<PathBuf>,

    /// Print the resolved config as JSON and exit instead of running.
    #[arg(long)]
    print_config: bool,

    /// The user query to run through `deep_search`. Reads stdin if absent.
    query: Option<String>,
}

pub struct Loaded {
    pub config: Config,
    pub query: Option<String>,
}

/// Loads config from (ascending priority) built-in defaults, `.env`,
/// `.env.local`, the process environment, then `--log-file`. Exits the
/// process on `--print-config` or on a deserialization failure, matching
/// `Config::load`'s panic/exit contract in the teacher.
pub fn load() -> Loaded {
    let args = Args::parse();

    dotenvy::from_filename(".env").ok();
    dotenvy::from_filename(".env.local").ok();

    // `Env::raw()` lower-cases every process env var key; since every field
    // above is already named as the lowercase of its spec env var (e.g.
    // `DART_API_KEY` -> `dart_api_key`), no key renaming is needed, unlike
    // the teacher's nested `[section]` config which strips a shared prefix.
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Env::raw());

    let mut config: Config = match figment.extract() {
        Ok(config) => config,
        Err(error) => {
            eprintln!("Error: failed to load configuration: {error}");
            exit(1);
        }
    };

    if let Some(log_file) = args.log_file {
        config.logging.file = Some(log_file);
    }

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config).unwrap_or_default());
        exit(0);
    }

    Loaded { config, query: args.query }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let reparsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(reparsed.dart_max_search_results, config.dart_max_search_results);
    }
}
