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

//! Runs a [`QueryPlan`]'s shards against the Gateway, deduplicates, and
//! orders the survivors by recency (`spec.md` §4.8).

use std::collections::HashSet;

use futures_util::{stream::FuturesUnordered, StreamExt};

use dart_gateway::DartGateway;

use crate::model::{DisclosureHit, SearchShard};

/// Soft ceiling on accumulated results in sequential mode; execution stops
/// early once this many hits have been collected (`spec.md` §4.8).
const DEFAULT_SOFT_CEILING: usize = 500;
/// Hard cap on the final result set after dedup+sort (`spec.md` §4.8).
const DEFAULT_MAX_RESULTS: usize = 200;

pub struct SearchExecutor<'a> {
    gateway: &'a DartGateway,
    soft_ceiling: usize,
    max_results: usize,
}

impl<'a> SearchExecutor<'a> {
    pub fn new(gateway: &'a DartGateway) -> Self {
        Self {
            gateway,
            soft_ceiling: DEFAULT_SOFT_CEILING,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }

    #[must_use = "dropped changed executor"]
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// Runs every shard (concurrently when `parallel` is set and there is
    /// more than one shard, sequentially with a soft ceiling otherwise),
    /// then dedups and orders the combined hits. Exceptions from individual
    /// shards are isolated and never abort the aggregate (`spec.md` §4.8).
    pub async fn execute(&self, shards: &[SearchShard], parallel: bool) -> Vec<DisclosureHit> {
        let hits = if parallel && shards.len() > 1 {
            self.execute_parallel(shards).await
        } else {
            self.execute_sequential(shards).await
        };

        let mut deduped = dedupe(hits);
        deduped.sort_unstable_by(|a, b| b.rcept_dt.cmp(&a.rcept_dt).then_with(|| b.dedup_key().cmp(&a.dedup_key())));
        deduped.truncate(self.max_results);
        deduped
    }

    async fn execute_parallel(&self, shards: &[SearchShard]) -> Vec<DisclosureHit> {
        let mut futures = FuturesUnordered::new();
        for shard in shards {
            futures.push(self.run_shard(shard));
        }

        let mut hits = Vec::new();
        while let Some(result) = futures.next().await {
            hits.extend(result);
        }
        hits
    }

    async fn execute_sequential(&self, shards: &[SearchShard]) -> Vec<DisclosureHit> {
        let mut hits = Vec::new();
        for shard in shards {
            hits.extend(self.run_shard(shard).await);
            if hits.len() >= self.soft_ceiling {
                break;
            }
        }
        hits
    }

    /// Runs one shard. Upstream failures (including `UpstreamEmpty`) become
    /// an empty result rather than propagating, so one bad shard never takes
    /// down the others.
    async fn run_shard(&self, shard: &SearchShard) -> Vec<DisclosureHit> {
        let detail_type = shard.category_code.as_ref().map(dart_gateway::types::CategoryCode::as_str);
        match self
            .gateway
            .search_disclosures(shard.corp_code.as_ref(), Some(shard.start), Some(shard.end), detail_type)
            .await
        {
            Ok(rows) => rows
                .into_iter()
                .map(|row| DisclosureHit {
                    rcept_no: Some(row.rcept_no),
                    corp_code: Some(row.corp_code),
                    corp_name: row.corp_name,
                    report_nm: row.report_nm,
                    rcept_dt: row.rcept_dt,
                    flr_nm: row.flr_nm.unwrap_or_default(),
                    rm: row.rm,
                    corp_cls: row.corp_cls,
                    category_code: row.pblntf_detail_ty,
                })
                .collect(),
            Err(dart_shared::Error::UpstreamEmpty) => Vec::new(),
            Err(error) => {
                tracing::warn!(%error, ?shard.corp_code, "search shard failed, continuing with other shards");
                Vec::new()
            }
        }
    }
}

/// Deduplicates by receipt number, falling back to the `company|title|date`
/// composite key with a warning when a hit has none (`spec.md` §4.8, §9's
/// open question — resolved in DESIGN.md: such rows are kept and do reach
/// the Fetcher). Idempotent: `dedupe(dedupe(xs)) == dedupe(xs)`.
pub fn dedupe(hits: Vec<DisclosureHit>) -> Vec<DisclosureHit> {
    let mut seen = HashSet::new();
    let mut result = Vec::with_capacity(hits.len());
    for hit in hits {
        let key = hit.dedup_key();
        if hit.rcept_no.is_none() {
            tracing::warn!(key = %key, "disclosure hit has no receipt number, deduping by composite key");
        }
        if seen.insert(key) {
            result.push(hit);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use dart_gateway::types::ReceiptNo;

    fn hit(rcept_no: Option<&str>, company: &str, title: &str, date: &str) -> DisclosureHit {
        DisclosureHit {
            rcept_no: rcept_no.map(|s| ReceiptNo::from(s.to_owned())),
            corp_code: None,
            corp_name: company.to_owned(),
            report_nm: title.to_owned(),
            rcept_dt: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            flr_nm: company.to_owned(),
            rm: None,
            corp_cls: None,
            category_code: None,
        }
    }

    #[test]
    fn dedupe_collapses_duplicate_receipt_numbers() {
        let hits = vec![
            hit(Some("1"), "A", "t1", "2024-01-01"),
            hit(Some("1"), "A", "t1", "2024-01-01"),
            hit(Some("2"), "B", "t2", "2024-01-02"),
        ];
        let deduped = dedupe(hits);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn dedupe_is_idempotent() {
        let hits = vec![hit(Some("1"), "A", "t1", "2024-01-01"), hit(None, "B", "t2", "2024-01-02")];
        let once = dedupe(hits);
        let twice = dedupe(once.clone());
        assert_eq!(once.len(), twice.len());
    }

    #[test]
    fn dedupe_falls_back_to_composite_key_without_receipt_number() {
        let hits = vec![
            hit(None, "A", "t1", "2024-01-01"),
            hit(None, "A", "t1", "2024-01-01"),
            hit(None, "A", "t2", "2024-01-01"),
        ];
        let deduped = dedupe(hits);
        assert_eq!(deduped.len(), 2);
    }
}
