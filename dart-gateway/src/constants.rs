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

//! Fixed vocabularies the upstream API validates requests against. Kept as
//! `once_cell::sync::Lazy` tables the way `dart_api_tools.py`'s module-level
//! constants are structured, translated into the typed param enums below.

use std::collections::HashMap;

use once_cell::sync::Lazy;

/// Single-letter disclosure-kind codes (`kind` param of `search_disclosures`).
pub static DISCLOSURE_KINDS: Lazy<HashMap<char, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ('A', "정기보고서"),
        ('B', "주요사항보고서"),
        ('C', "발행공시"),
        ('D', "지분공시"),
        ('E', "기타공시"),
        ('F', "외부감사 관련"),
        ('G', "펀드공시"),
        ('H', "자산유동화"),
        ('I', "거래소 공시"),
        ('J', "공정위 공시"),
    ])
});

/// Report codes accepted by `get_financial_statements`'s `report_code` param.
pub static REPORT_CODES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("11011", "사업보고서"),
        ("11012", "반기보고서"),
        ("11013", "1분기보고서"),
        ("11014", "3분기보고서"),
    ])
});

/// Classification codes accepted by `get_xbrl_taxonomy`.
pub static XBRL_CLASSIFICATIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("BS1", "재무상태표"),
        ("IS1", "손익계산서"),
        ("CIS1", "포괄손익계산서"),
        ("CF1", "현금흐름표"),
        ("SCE1", "자본변동표"),
    ])
});

/// Event-type vocabulary accepted by `get_major_events`.
pub const MAJOR_EVENT_TYPES: &[&str] = &[
    "부도발생",
    "영업정지",
    "회생절차",
    "해산사유",
    "유상증자",
    "무상증자",
    "유무상증자",
    "감자",
    "관리절차개시",
    "소송",
    "해외상장결정",
    "해외상장폐지결정",
    "해외상장",
    "해외상장폐지",
    "전환사채발행",
    "신주인수권부사채발행",
    "교환사채발행",
    "관리절차중단",
    "조건부자본증권발행",
    "자산양수도",
    "타법인증권양도",
    "유형자산양도",
    "유형자산양수",
    "타법인증권양수",
    "영업양도",
    "영업양수",
    "자기주식취득신탁계약해지",
    "자기주식취득신탁계약체결",
    "자기주식처분",
    "자기주식취득",
    "주식교환",
    "회사분할합병",
    "회사분할",
    "회사합병",
    "사채권양수",
    "사채권양도결정",
];

/// Securities-report-type vocabulary accepted by `get_securities_report`.
pub const SECURITIES_TYPES: &[&str] = &[
    "주식의포괄적교환이전",
    "합병",
    "증권예탁증권",
    "채무증권",
    "지분증권",
    "분할",
];

/// Business-report-item vocabulary accepted by `get_business_report_data`.
pub const BUSINESS_REPORT_TYPES: &[&str] = &[
    "조건부자본증권미상환",
    "미등기임원보수",
    "회사채미상환",
    "단기사채미상환",
    "기업어음미상환",
    "채무증권발행",
    "사모자금사용",
    "공모자금사용",
    "임원전체보수승인",
    "임원전체보수유형",
    "주식총수",
    "회계감사",
    "감사용역",
    "회계감사용역계약",
    "사외이사",
    "신종자본증권미상환",
    "증자",
    "배당",
    "자기주식",
    "최대주주",
    "최대주주변동",
    "소액주주",
    "임원",
    "직원",
    "임원개인보수",
    "임원전체보수",
    "개인별보수",
    "타법인출자",
];
