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

//! Normalized wire types returned by [`crate::DartGateway`].
//!
//! Every type here carries a `extra_attributes` catch-all (`spec.md` §9's
//! dynamic-typing note) so fields the upstream API adds that this crate
//! doesn't model yet are preserved rather than silently dropped.

use std::collections::HashMap;

use chrono::NaiveDate;
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};

/// DART's 8-digit unique corporation identifier (`corp_code`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, From, Into, Serialize, Deserialize)]
pub struct CorpCode(String);

impl CorpCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A disclosure's 14-digit receipt number (`rcept_no`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, From, Into, Serialize, Deserialize)]
pub struct ReceiptNo(String);

impl ReceiptNo {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A listed company's 6-digit KRX stock code (`stock_code`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, From, Into, Serialize, Deserialize)]
pub struct StockCode(String);

impl StockCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A `pblntf_detail_ty` detailed-disclosure-category code (e.g. `"A001"`, `"B003"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, From, Into, Serialize, Deserialize)]
pub struct CategoryCode(String);

impl CategoryCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The disclosure-kind letter this detailed category falls under (`spec.md`
    /// §9's "first letter routes to the detailed-API family").
    pub fn kind_letter(&self) -> Option<char> {
        self.0.chars().next()
    }
}

/// One row of `search_company_disclosures` / DART's `list.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisclosureRow {
    pub corp_code: CorpCode,
    pub corp_name: String,
    pub stock_code: Option<StockCode>,
    pub corp_cls: Option<String>,
    pub report_nm: String,
    pub rcept_no: ReceiptNo,
    pub flr_nm: Option<String>,
    #[serde(with = "yyyymmdd")]
    pub rcept_dt: NaiveDate,
    pub rm: Option<String>,
    /// The detailed-disclosure-category code, when the search response
    /// carries one (`spec.md` §4.10 step 1's routing input).
    pub pblntf_detail_ty: Option<CategoryCode>,
    #[serde(flatten)]
    pub extra_attributes: HashMap<String, serde_json::Value>,
}

/// (De)serializes `NaiveDate` from/to the upstream's bare `YYYYMMDD` digit
/// string (e.g. `"20230101"`), keeping `chrono::NaiveDate` the public date
/// type everywhere past the gateway boundary (`spec.md` §9).
mod yyyymmdd {
    use chrono::NaiveDate;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y%m%d";

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(&raw, FORMAT).map_err(D::Error::custom)
    }
}

/// `get_company_info` / DART's `company.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyInfo {
    pub corp_code: CorpCode,
    pub corp_name: String,
    pub corp_name_eng: Option<String>,
    pub stock_code: Option<StockCode>,
    pub ceo_nm: Option<String>,
    pub corp_cls: Option<String>,
    pub adres: Option<String>,
    pub induty_code: Option<String>,
    #[serde(flatten)]
    pub extra_attributes: HashMap<String, serde_json::Value>,
}

/// A single entry of the bulk `corpCode.xml` registry used to seed the
/// Company Validator (`spec.md` §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub corp_code: CorpCode,
    pub corp_name: String,
    pub stock_code: Option<StockCode>,
    pub modify_date: Option<String>,
}

/// The original text body of a disclosure document (`document.xml`/`document_all`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentBody {
    pub rcept_no: ReceiptNo,
    pub content: String,
}

/// One row of `get_attached_documents` (`attach_doc_list` / `attach_docs` / `attach_files`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub title: String,
    pub url: String,
    #[serde(flatten)]
    pub extra_attributes: HashMap<String, serde_json::Value>,
}

/// One row of `get_financial_statements` (`fnlttSinglAcnt` / `fnlttSinglAcntAll`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinancialStatementRow {
    pub corp_code: CorpCode,
    pub account_nm: String,
    pub fs_div: Option<String>,
    pub thstrm_amount: Option<String>,
    #[serde(flatten)]
    pub extra_attributes: HashMap<String, serde_json::Value>,
}

/// One row of `get_xbrl_taxonomy` (`xbrl_taxonomy`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XbrlTaxonomyEntry {
    pub classification: String,
    pub account_id: String,
    pub label_kor: String,
    #[serde(flatten)]
    pub extra_attributes: HashMap<String, serde_json::Value>,
}

/// One row of `get_business_report_data` (`report`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessReportRow {
    pub corp_code: CorpCode,
    #[serde(flatten)]
    pub extra_attributes: HashMap<String, serde_json::Value>,
}

/// One row of `get_major_shareholders` (`major_shareholders` / `major_shareholders_exec`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareholderRow {
    pub corp_code: CorpCode,
    pub repror: Option<String>,
    #[serde(flatten)]
    pub extra_attributes: HashMap<String, serde_json::Value>,
}

/// One row of `get_major_events` (`event`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MajorEventRow {
    pub corp_code: CorpCode,
    pub rcept_no: Option<ReceiptNo>,
    #[serde(flatten)]
    pub extra_attributes: HashMap<String, serde_json::Value>,
}

/// One row of `get_securities_report` (증권신고서 family).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritiesReportRow {
    pub corp_code: CorpCode,
    pub rcept_no: Option<ReceiptNo>,
    #[serde(flatten)]
    pub extra_attributes: HashMap<String, serde_json::Value>,
}

/// A downloaded archive's extracted member: name plus raw bytes, one per file
/// inside the ZIP the `document.xml` endpoint returns for attachment bundles.
#[derive(Debug, Clone)]
pub struct ArchiveMember {
    pub file_name: String,
    pub bytes: Vec<u8>,
}
