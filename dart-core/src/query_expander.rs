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

//! Combines the Query Parser, Company Validator, and Doc-Type Mapper into a
//! canonical [`QueryPlan`] and the [`SearchShard`]s that tile it (`spec.md`
//! §4.7).

use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, Utc};

use dart_gateway::types::CorpCode;
use dart_llm::LlmClient;
use dart_shared::Error;

use crate::{
    company_validator::{CompanyValidator, MatchOutcome},
    doc_type_mapper::DocTypeMapper,
    model::{DateRange, QueryPlan, ResolvedCompany, SearchShard},
    query_parser::{CompanyMentionKind, DateExpression, ParsedQuery, QueryParser, RelativeUnit},
};

/// Search shards longer than this many days must be split (`spec.md` §3).
pub const MAX_SHARD_SPAN_DAYS: i64 = 90;
/// Default lookback window when no date expression is present (`spec.md` §4.7).
const DEFAULT_WINDOW_DAYS: i64 = 30;

pub struct QueryExpander<P> {
    parser: P,
    validator: Arc<CompanyValidator>,
    llm: Option<Arc<dyn LlmClient>>,
    llm_model: String,
}

impl<P: QueryParser> QueryExpander<P> {
    pub fn new(
        parser: P,
        validator: Arc<CompanyValidator>,
        llm: Option<Arc<dyn LlmClient>>,
        llm_model: impl Into<String>,
    ) -> Self {
        Self {
            parser,
            validator,
            llm,
            llm_model: llm_model.into(),
        }
    }

    /// Runs the full expansion pipeline: parse → resolve companies → compute
    /// date range → choose category → assemble plan → shard.
    pub async fn expand(&self, query: &str, today: NaiveDate) -> Result<(QueryPlan, Vec<SearchShard>), Error> {
        let parsed = self.parser.parse(query).await?;
        let (companies, ambiguous_companies) = self.resolve_companies(&parsed);
        let date_range = extract_date_range(&parsed.date_expressions, today).unwrap_or_else(|| default_window(today));

        let ranked_categories = match &self.llm {
            Some(llm) => DocTypeMapper::map(llm.as_ref(), &self.llm_model, &parsed, query).await,
            None => DocTypeMapper::map_rule_based(&parsed, query),
        };
        let (category_code, category_confidence) = ranked_categories
            .first()
            .cloned()
            .map(|(code, confidence)| (Some(code), confidence))
            .unwrap_or((None, 0.0));

        let needs_confirmation = !ambiguous_companies.is_empty();

        let shards = build_shards(&companies, date_range, category_code.as_ref());
        let parallel_search = shards.len() > 1;

        let plan = QueryPlan {
            original_query: query.to_owned(),
            companies,
            ambiguous_companies,
            date_range: Some(date_range),
            category_code,
            category_confidence,
            major_event_types: Vec::new(),
            securities_types: Vec::new(),
            business_report_types: Vec::new(),
            keywords: parsed.keywords,
            doc_type_phrases: parsed.doc_type_phrases,
            needs_confirmation,
            parallel_search,
        };

        Ok((plan, shards))
    }

    fn resolve_companies(
        &self,
        parsed: &ParsedQuery,
    ) -> (Vec<ResolvedCompany>, Vec<crate::model::AmbiguousCompany>) {
        let mut resolved = Vec::new();
        let mut ambiguous = Vec::new();

        for mention in &parsed.companies {
            if mention.kind == CompanyMentionKind::StockCode {
                if let Some(company) = self.validator.find_by_stock_code(&mention.text) {
                    resolved.push(company);
                    continue;
                }
            }
            match self.validator.find_company(&mention.text) {
                MatchOutcome::Resolved(company) => resolved.push(company),
                MatchOutcome::Ambiguous(candidate) => ambiguous.push(candidate),
                MatchOutcome::NotFound => {}
            }
        }

        (resolved, ambiguous)
    }
}

/// Computes a single `[start, end]` bound from the parser's date
/// expressions, preferring the first recognized one (`spec.md` §4.7). A pure
/// function with no I/O, mirroring `date_parser.py`'s arithmetic helpers.
pub fn extract_date_range(expressions: &[DateExpression], today: NaiveDate) -> Option<DateRange> {
    let expr = expressions.first()?;
    Some(resolve_expression(*expr, today))
}

fn resolve_expression(expr: DateExpression, today: NaiveDate) -> DateRange {
    match expr {
        DateExpression::CurrentYear => year_range(today.year()),
        DateExpression::LastYear => year_range(today.year() - 1),
        DateExpression::SpecificYear(year) => year_range(year),
        DateExpression::SpecificMonth { year, month } => month_range(year, month),
        DateExpression::SpecificDate { year, month, day } => {
            let date = NaiveDate::from_ymd_opt(year, month, day).unwrap_or(today);
            DateRange::new(date, date)
        }
        DateExpression::Quarter { year, quarter } => quarter_range(year, quarter),
        DateExpression::FirstHalf(year) => DateRange::new(
            NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(today),
            NaiveDate::from_ymd_opt(year, 6, 30).unwrap_or(today),
        ),
        DateExpression::SecondHalf(year) => DateRange::new(
            NaiveDate::from_ymd_opt(year, 7, 1).unwrap_or(today),
            NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(today),
        ),
        DateExpression::RelativeWindow { amount, unit } => {
            let start = match unit {
                RelativeUnit::Days => today - Duration::days(amount),
                RelativeUnit::Months => subtract_months(today, amount * 1),
                RelativeUnit::Years => subtract_months(today, amount * 12),
            };
            DateRange::new(start, today)
        }
    }
}

fn default_window(today: NaiveDate) -> DateRange {
    DateRange::new(today - Duration::days(DEFAULT_WINDOW_DAYS), today)
}

fn year_range(year: i32) -> DateRange {
    DateRange::new(
        NaiveDate::from_ymd_opt(year, 1, 1).expect("valid year start"),
        NaiveDate::from_ymd_opt(year, 12, 31).expect("valid year end"),
    )
}

fn month_range(year: i32, month: u32) -> DateRange {
    let start = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month start");
    let end = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid next-month start")
        - Duration::days(1);
    DateRange::new(start, end)
}

fn quarter_range(year: i32, quarter: u8) -> DateRange {
    let start_month = (quarter.saturating_sub(1)) * 3 + 1;
    let start = month_range(year, u32::from(start_month));
    let end = month_range(year, u32::from(start_month + 2));
    DateRange::new(start.start, end.end)
}

fn subtract_months(date: NaiveDate, months: i64) -> NaiveDate {
    let total_months = i64::from(date.year()) * 12 + i64::from(date.month()) - 1 - months;
    let year = (total_months.div_euclid(12)) as i32;
    let month = (total_months.rem_euclid(12)) as u32 + 1;
    let last_day = days_in_month(year, month);
    NaiveDate::from_ymd_opt(year, month, date.day().min(last_day)).unwrap_or(date)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .expect("valid next month");
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("valid month start");
    (next - first).num_days() as u32
}

/// Today's date as seen by the engine. Exists so callers (and tests) can pin
/// "now" rather than every date computation reaching for `Utc::now()`
/// directly.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Produces the Search Shards for a [`QueryPlan`] (`spec.md` §4.7, §3's
/// Search Shard invariant): one shard per company when companies are fixed;
/// otherwise the date span is tiled into ≤90-day pieces, newest to oldest,
/// without overlap or gaps.
fn build_shards(
    companies: &[ResolvedCompany],
    date_range: DateRange,
    category_code: Option<&dart_gateway::types::CategoryCode>,
) -> Vec<SearchShard> {
    if !companies.is_empty() {
        return companies
            .iter()
            .map(|company| SearchShard {
                corp_code: Some(company.corp_code.clone()),
                start: date_range.start,
                end: date_range.end,
                category_code: category_code.cloned(),
                page_size: 100,
            })
            .collect();
    }

    tile_date_range(date_range, None, category_code.cloned())
}

/// Tiles `range` into ≤[`MAX_SHARD_SPAN_DAYS`]-day pieces, newest-first,
/// covering the range exactly once with no gaps (`spec.md` §3, §8).
pub fn tile_date_range(
    range: DateRange,
    corp_code: Option<CorpCode>,
    category_code: Option<dart_gateway::types::CategoryCode>,
) -> Vec<SearchShard> {
    if range.span_days() <= MAX_SHARD_SPAN_DAYS {
        return vec![SearchShard {
            corp_code,
            start: range.start,
            end: range.end,
            category_code,
            page_size: 100,
        }];
    }

    let mut shards = Vec::new();
    let mut window_end = range.end;
    while window_end >= range.start {
        let window_start = std::cmp::max(range.start, window_end - Duration::days(MAX_SHARD_SPAN_DAYS));
        shards.push(SearchShard {
            corp_code: corp_code.clone(),
            start: window_start,
            end: window_end,
            category_code: category_code.clone(),
            page_size: 100,
        });
        if window_start == range.start {
            break;
        }
        window_end = window_start - Duration::days(1);
    }
    shards
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn ninety_day_span_yields_one_shard() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 3, 30));
        assert_eq!(range.span_days(), 89);
        let shards = tile_date_range(range, None, None);
        assert_eq!(shards.len(), 1);
    }

    #[test]
    fn ninety_one_day_span_yields_two_shards() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 4, 1));
        assert_eq!(range.span_days(), 91);
        let shards = tile_date_range(range, None, None);
        assert_eq!(shards.len(), 2);
    }

    #[test]
    fn shards_tile_without_overlap_or_gaps() {
        let range = DateRange::new(date(2023, 1, 1), date(2024, 1, 1));
        let shards = tile_date_range(range, None, None);
        assert_eq!(shards[0].end, range.end);
        assert_eq!(shards.last().unwrap().start, range.start);
        for window in shards.windows(2) {
            assert_eq!(window[1].end, window[0].start - Duration::days(1));
        }
        for shard in &shards {
            assert!(shard.start <= shard.end);
            assert!((shard.end - shard.start).num_days() <= MAX_SHARD_SPAN_DAYS);
        }
    }

    #[test]
    fn relative_window_one_year_spans_365_days() {
        let today = date(2024, 7, 28);
        let range = resolve_expression(
            DateExpression::RelativeWindow { amount: 1, unit: RelativeUnit::Years },
            today,
        );
        assert_eq!(range.end, today);
        assert_eq!(range.start, date(2023, 7, 28));
    }

    #[test]
    fn current_year_spans_the_full_calendar_year() {
        let range = resolve_expression(DateExpression::CurrentYear, date(2024, 3, 15));
        assert_eq!(range.start, date(2024, 1, 1));
        assert_eq!(range.end, date(2024, 12, 31));
    }

    #[test]
    fn specific_month_spans_that_month_only() {
        let range = resolve_expression(DateExpression::SpecificMonth { year: 2024, month: 3 }, date(2024, 7, 1));
        assert_eq!(range.start, date(2024, 3, 1));
        assert_eq!(range.end, date(2024, 3, 31));
    }

    #[test]
    fn quarter_one_spans_jan_through_march() {
        let range = resolve_expression(DateExpression::Quarter { year: 2024, quarter: 1 }, date(2024, 7, 1));
        assert_eq!(range.start, date(2024, 1, 1));
        assert_eq!(range.end, date(2024, 3, 31));
    }

    #[test]
    fn no_date_expression_defaults_to_last_30_days() {
        assert!(extract_date_range(&[], date(2024, 1, 1)).is_none());
    }
}
