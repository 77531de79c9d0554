//! Field augmentation steps run between field extraction and record
//! assembly (spec §4.4 step 5).
//!
//! Each function is a small, independently testable transform; [`super::convert_item`]
//! sequences them in the order spec.md lists.

use std::collections::HashSet;

use chrono::NaiveDate;
use regex::Regex;

use crate::config::enhancement::EnhancementMaps;
use crate::model::Creator;

/// Converts `date` from the journal's `strptime_format_string_` into
/// `YYYY-MM-DD`. Returns the input unchanged if it cannot be parsed,
/// matching spec's "leave untouched if unparseable".
#[must_use]
pub fn normalize_date(date: &str, strptime_format: Option<&str>) -> String {
    if date.is_empty() {
        return date.to_string();
    }
    let Some(format) = strptime_format else {
        return date.to_string();
    };
    match NaiveDate::parse_from_str(date, format) {
        Ok(parsed) => parsed.format("%Y-%m-%d").to_string(),
        Err(_) => date.to_string(),
    }
}

/// Strips leading zeros, per spec step 5 ("strip leading zeros from
/// issue/volume"). An all-zero value collapses to a single `"0"`.
#[must_use]
pub fn strip_leading_zeros(value: &str) -> String {
    let trimmed = value.trim_start_matches('0');
    if trimmed.is_empty() && !value.is_empty() {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn roman_to_decimal(roman: &str) -> Option<u32> {
    if roman.is_empty() {
        return None;
    }
    let values = |c: char| -> Option<u32> {
        match c {
            'I' => Some(1),
            'V' => Some(5),
            'X' => Some(10),
            'L' => Some(50),
            'C' => Some(100),
            'D' => Some(500),
            'M' => Some(1000),
            _ => None,
        }
    };
    let digits: Vec<u32> = roman.chars().map(values).collect::<Option<Vec<_>>>()?;
    let mut total = 0i64;
    for i in 0..digits.len() {
        let current = i64::from(digits[i]);
        let next = digits.get(i + 1).map(|&v| i64::from(v)).unwrap_or(0);
        if current < next {
            total -= current;
        } else {
            total += current;
        }
    }
    if total <= 0 {
        None
    } else {
        Some(total as u32)
    }
}

/// Converts a `"N1-N2"` page range where either side may be a Roman
/// numeral, then collapses `"N-N"` to `"N"` (spec step 5; the general
/// "collapse only when equal after normalization" rule is the
/// [`SPEC_FULL`][crate]-documented supplement of spec's special case).
#[must_use]
pub fn normalize_pages(pages: &str) -> String {
    if pages.is_empty() {
        return pages.to_string();
    }
    let upper = pages.to_ascii_uppercase();
    let Some((left, right)) = upper.split_once('-') else {
        return pages.to_string();
    };

    let converted_left = roman_to_decimal(left).map_or_else(|| left.to_string(), |n| n.to_string());
    let converted_right = roman_to_decimal(right).map_or_else(|| right.to_string(), |n| n.to_string());

    if converted_left == converted_right {
        converted_left
    } else {
        format!("{converted_left}-{converted_right}")
    }
}

const VALID_TITLES: &[&str] = &["jr", "sr", "sj", "s.j", "fr", "hr", "dr", "prof", "em"];
const VALID_AFFIXES: &[&str] = &["i", "ii", "iii", "iv", "v"];

fn is_name_token_title(token: &str) -> bool {
    let trimmed = token.trim_end_matches('.').to_ascii_lowercase();
    VALID_TITLES.contains(&trimmed.as_str())
}

fn is_name_token_affix(token: &str) -> bool {
    VALID_AFFIXES.contains(&token.to_ascii_lowercase().as_str())
}

/// `true` unless `last_name` is a single initial like `"B."` — the source's
/// `IsProperLastName` check gating the GND lookup in spec step 5.
#[must_use]
#[allow(clippy::expect_used)]
pub fn is_proper_last_name(last_name: &str) -> bool {
    let re = Regex::new(r"^\p{L}\.$").expect("static regex is valid");
    !re.is_match(last_name.trim())
}

/// Spanish two-component last-name heuristic (spec step 5, `SPEC_FULL`
/// supplement): when the record's resolved language is `spa`, the last two
/// whitespace-separated tokens of the full name are joined as the surname
/// rather than split between first/last, unless the first-name side
/// already ends with a Spanish linking preposition or a capitalized
/// initial (which signals the split is already correct).
#[allow(clippy::expect_used)]
fn adjust_spanish_name(first_name: &mut String, last_name: &mut String) {
    let preposition_re = Regex::new(r"(?i)(des?\s+las?|del|\p{Lu}\.)$").expect("static regex is valid");
    if preposition_re.is_match(first_name) {
        return;
    }

    let mut first_tokens: Vec<&str> = first_name.split_whitespace().collect();
    if first_tokens.len() <= 1 {
        return;
    }
    let mut last_tokens: Vec<&str> = last_name.split_whitespace().collect();
    if last_tokens.len() >= 2 {
        return;
    }

    if let Some(y_pos) = first_tokens.iter().position(|&t| t == "y") {
        if y_pos >= 1 {
            let mut moved: Vec<&str> = first_tokens.split_off(y_pos - 1);
            moved.append(&mut last_tokens);
            *last_name = moved.join(" ");
            *first_name = first_tokens.join(" ");
            return;
        }
    }

    if let Some(moved) = first_tokens.pop() {
        last_tokens.insert(0, moved);
        *last_name = last_tokens.join(" ");
        *first_name = first_tokens.join(" ");
    }
}

/// Splits title/affix tokens out of first/last name, applying the Spanish
/// surname heuristic first when `languages` contains `"spa"`.
pub fn normalize_creator(creator: &mut Creator, languages: &[String], blocklist: &EnhancementMaps) {
    if languages.iter().any(|l| l == "spa") {
        adjust_spanish_name(&mut creator.first, &mut creator.last);
    }

    let mut first_buffer = Vec::new();
    let mut title_buffer = Vec::new();
    for token in creator.first.split_whitespace() {
        if blocklist.is_blocklisted_token(token) {
            continue;
        }
        if is_name_token_title(token) {
            title_buffer.push(token);
        } else {
            first_buffer.push(token);
        }
    }

    let mut last_buffer = Vec::new();
    let mut affix_buffer = Vec::new();
    for token in creator.last.split_whitespace() {
        if blocklist.is_blocklisted_token(token) {
            continue;
        }
        if is_name_token_title(token) {
            title_buffer.push(token);
        } else if is_name_token_affix(token) {
            affix_buffer.push(token);
        } else {
            last_buffer.push(token);
        }
    }

    creator.first = first_buffer.join(" ");
    creator.last = last_buffer.join(" ");
    creator.title = title_buffer.join(" ");
    creator.affix = affix_buffer.join(" ");
}

/// Strips HTML tags from a string value (spec §4.4 step 3: "HTML tags are
/// stripped from all string values"), then decodes the handful of named
/// entities the translation service is known to emit.
#[must_use]
#[allow(clippy::expect_used)]
pub fn strip_html_tags(value: &str) -> String {
    let tag_re = Regex::new(r"<[^>]*>").expect("static regex is valid");
    let without_tags = tag_re.replace_all(value, "");
    without_tags
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
}

/// Review detection (spec step 5): title, short title, or any keyword
/// matching the global-then-journal review regex sets the item type.
#[must_use]
pub fn matches_review(
    title: &str,
    short_title: &str,
    keywords: &[String],
    global_regex: Option<&Regex>,
    journal_regex: Option<&Regex>,
) -> bool {
    let check = |re: &Regex| {
        re.is_match(title) || re.is_match(short_title) || keywords.iter().any(|k| re.is_match(k))
    };
    if let Some(re) = global_regex {
        if check(re) {
            return true;
        }
    }
    if let Some(re) = journal_regex {
        if check(re) {
            return true;
        }
    }
    false
}

/// Notes detection (spec step 5): title matching the notes regex sets item
/// type to `"note"`. Global is checked first, then journal (mirroring
/// `DetectReviews`'s precedence in the original implementation).
#[must_use]
pub fn matches_notes(title: &str, global_regex: Option<&Regex>, journal_regex: Option<&Regex>) -> bool {
    if let Some(re) = global_regex {
        if re.is_match(title) {
            return true;
        }
    }
    if let Some(re) = journal_regex {
        if re.is_match(title) {
            return true;
        }
    }
    false
}

/// Resolves the license tag (spec step 5): `"LF"` if the journal's license
/// is `"LF"` or a custom `LF` note exists; otherwise `"ZZ"`.
#[must_use]
pub fn resolve_license(journal_license: Option<&str>, has_custom_lf_note: bool) -> String {
    if journal_license == Some("LF") || has_custom_lf_note {
        "LF".to_string()
    } else {
        "ZZ".to_string()
    }
}

/// Whether a custom note entry of the form `"LF:..."` is present, the
/// source's `custom_metadata_` convention for a per-record license override.
#[must_use]
pub fn has_custom_lf_note(notes: &[crate::model::NoteEntry]) -> bool {
    notes.iter().any(|n| n.text.starts_with("LF:"))
}

#[must_use]
pub fn unique_languages(languages: &[String]) -> HashSet<String> {
    languages.iter().cloned().collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn normalize_date_parses_configured_format() {
        assert_eq!(normalize_date("2021-01-01", Some("%Y-%m-%d")), "2021-01-01");
        assert_eq!(normalize_date("01/02/2021", Some("%m/%d/%Y")), "2021-01-02");
    }

    #[test]
    fn normalize_date_leaves_unparseable_untouched() {
        assert_eq!(normalize_date("not a date", Some("%Y-%m-%d")), "not a date");
    }

    #[test]
    fn strip_leading_zeros_handles_all_zero() {
        assert_eq!(strip_leading_zeros("007"), "7");
        assert_eq!(strip_leading_zeros("000"), "0");
        assert_eq!(strip_leading_zeros(""), "");
    }

    #[test]
    fn normalize_pages_converts_roman_numerals() {
        assert_eq!(normalize_pages("XI-XV"), "11-15");
    }

    #[test]
    fn normalize_pages_collapses_equal_decimal_range() {
        assert_eq!(normalize_pages("5-5"), "5");
    }

    #[test]
    fn normalize_pages_keeps_unequal_range() {
        assert_eq!(normalize_pages("5-10"), "5-10");
    }

    #[test]
    fn normalize_pages_passes_through_non_range() {
        assert_eq!(normalize_pages("123"), "123");
    }

    #[test]
    fn is_proper_last_name_rejects_single_initial() {
        assert!(!is_proper_last_name("B."));
        assert!(is_proper_last_name("Brecht"));
    }

    #[test]
    fn normalize_creator_splits_title_and_affix_tokens() {
        let mut creator = Creator {
            first: "John Dr.".to_string(),
            last: "Smith III".to_string(),
            ..Default::default()
        };
        let maps = EnhancementMaps::empty();
        normalize_creator(&mut creator, &[], &maps);
        assert_eq!(creator.first, "John");
        assert_eq!(creator.title, "Dr.");
        assert_eq!(creator.last, "Smith");
        assert_eq!(creator.affix, "III");
    }

    #[test]
    fn normalize_creator_joins_spanish_surname() {
        let mut creator = Creator {
            first: "Juan Garcia".to_string(),
            last: "Lopez".to_string(),
            ..Default::default()
        };
        let maps = EnhancementMaps::empty();
        normalize_creator(&mut creator, &["spa".to_string()], &maps);
        assert_eq!(creator.first, "Juan");
        assert_eq!(creator.last, "Garcia Lopez");
    }

    #[test]
    fn normalize_creator_drops_blocklisted_tokens() {
        let mut creator = Creator {
            first: "John".to_string(),
            last: "Smith Jr.".to_string(),
            ..Default::default()
        };
        let mut maps = EnhancementMaps::empty();
        maps.author_blocklist.insert("Jr.".to_string());
        normalize_creator(&mut creator, &[], &maps);
        assert_eq!(creator.last, "Smith");
    }

    #[test]
    fn strip_html_tags_removes_markup_and_decodes_entities() {
        assert_eq!(strip_html_tags("<b>Hi</b> &amp; bye"), "Hi & bye");
    }

    #[test]
    fn matches_review_checks_title_short_title_and_keywords() {
        let re = Regex::new("(?i)review").unwrap();
        assert!(matches_review("Book Review", "", &[], Some(&re), None));
        assert!(matches_review("", "", &["review".to_string()], Some(&re), None));
        assert!(!matches_review("Article", "", &[], Some(&re), None));
    }

    #[test]
    fn resolve_license_prefers_journal_license_then_custom_note() {
        assert_eq!(resolve_license(Some("LF"), false), "LF");
        assert_eq!(resolve_license(None, true), "LF");
        assert_eq!(resolve_license(None, false), "ZZ");
    }
}
