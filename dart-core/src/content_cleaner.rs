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

//! Cleans raw HTML/XML filing text into plain text for the rest of the
//! pipeline (`spec.md` §4.10): strips scripts/styles, reformats tables into
//! pipe-delimited rows, collapses whitespace while keeping paragraph breaks,
//! unescapes HTML entities, and trims to a configured maximum length with an
//! elision marker.

use once_cell::sync::Lazy;
use regex::Regex;

/// Default maximum content length before head/tail elision kicks in.
pub const DEFAULT_MAX_LENGTH: usize = 10_000;
/// Marker inserted between the kept head and tail when content is elided.
/// Kept verbatim from the source's user-visible output, not source-code
/// commentary.
const ELISION_MARKER: &str = "... [중간 내용 생략] ...";

static SCRIPT_STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(script|style)[^>]*>.*?</\1>").unwrap());
static TABLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<table[^>]*>(.*?)</table>").unwrap());
static ROW_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").unwrap());
static CELL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<t[dh][^>]*>(.*?)</t[dh]>").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static BLANK_LINES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static INLINE_WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\x0B\f\r]+").unwrap());

/// Cleans raw HTML/XML content to plain text, trimmed to `max_length`
/// (`spec.md` §4.10). `max_length` of `0` disables trimming.
pub fn clean(raw: &str, max_length: usize) -> String {
    let without_scripts = SCRIPT_STYLE_RE.replace_all(raw, "");
    let with_tables_flattened = flatten_tables(&without_scripts);
    let text_only = TAG_RE.replace_all(&with_tables_flattened, "");
    let unescaped = html_unescape(&text_only);
    let collapsed = collapse_whitespace(&unescaped);

    if max_length == 0 || collapsed.chars().count() <= max_length {
        collapsed
    } else {
        elide(&collapsed, max_length)
    }
}

fn flatten_tables(html: &str) -> std::borrow::Cow<'_, str> {
    TABLE_RE.replace_all(html, |captures: &regex::Captures<'_>| {
        let table_body = &captures[1];
        let rows: Vec<String> = ROW_RE
            .captures_iter(table_body)
            .map(|row_capture| {
                let row_body = &row_capture[1];
                let cells: Vec<String> = CELL_RE
                    .captures_iter(row_body)
                    .map(|cell| TAG_RE.replace_all(&cell[1], "").trim().to_owned())
                    .collect();
                cells.join(" | ")
            })
            .collect();
        format!("\n{}\n", rows.join("\n"))
    })
}

/// Unescapes the small set of HTML entities DART filings actually use;
/// avoids pulling in a full HTML-entity crate for a handful of names.
fn html_unescape(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
}

/// Collapses runs of inline whitespace to a single space while preserving
/// paragraph breaks (two-or-more consecutive newlines become exactly one
/// blank line).
fn collapse_whitespace(text: &str) -> String {
    let lines: Vec<String> = text
        .lines()
        .map(|line| INLINE_WHITESPACE_RE.replace_all(line.trim(), " ").trim().to_owned())
        .collect();
    let joined = lines.join("\n");
    let collapsed_blank_lines = BLANK_LINES_RE.replace_all(&joined, "\n\n");
    collapsed_blank_lines.trim().to_owned()
}

/// Keeps the head and tail of `text`, inserting [`ELISION_MARKER`] between
/// them, so the combined length stays within `max_length` characters.
fn elide(text: &str, max_length: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let marker_len = ELISION_MARKER.chars().count();
    if max_length <= marker_len {
        return ELISION_MARKER.to_owned();
    }
    let budget = max_length - marker_len;
    let head_len = budget / 2;
    let tail_len = budget - head_len;
    let head: String = chars[..head_len].iter().collect();
    let tail: String = chars[chars.len() - tail_len..].iter().collect();
    format!("{head}{ELISION_MARKER}{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_and_style_tags() {
        let html = "<style>.a{color:red}</style><p>hello</p><script>alert(1)</script>";
        let cleaned = clean(html, 0);
        assert_eq!(cleaned, "hello");
    }

    #[test]
    fn reformats_table_into_pipe_delimited_rows() {
        let html = "<table><tr><td>a</td><td>b</td></tr><tr><td>c</td><td>d</td></tr></table>";
        let cleaned = clean(html, 0);
        assert_eq!(cleaned, "a | b\nc | d");
    }

    #[test]
    fn unescapes_html_entities() {
        let cleaned = clean("R&amp;D &lt;division&gt;", 0);
        assert_eq!(cleaned, "R&D <division>");
    }

    #[test]
    fn collapses_whitespace_but_keeps_paragraph_breaks() {
        let cleaned = clean("<p>first   line</p>\n\n\n\n<p>second line</p>", 0);
        assert_eq!(cleaned, "first line\n\nsecond line");
    }

    #[test]
    fn elides_middle_of_overlong_content() {
        let text = "a".repeat(50) + &"b".repeat(50);
        let cleaned = clean(&text, 40);
        assert!(cleaned.len() < text.len());
        assert!(cleaned.contains(ELISION_MARKER));
        assert!(cleaned.starts_with('a'));
        assert!(cleaned.ends_with('b'));
    }

    #[test]
    fn under_max_length_is_unchanged() {
        let cleaned = clean("short text", 10_000);
        assert_eq!(cleaned, "short text");
    }
}
