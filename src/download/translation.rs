//! Translation-service client (spec §4.3).
//!
//! Zotero's translation server turns an arbitrary URL into a JSON array of
//! item objects. A "note"-typed entry with no `title` is not a standalone
//! record; it is folded into the `notes` of the item immediately preceding
//! it in the array. After folding, the configured suppress/override/
//! exclude/rewrite filters are applied field-by-field before handing the
//! result on to the conversion engine.

use std::time::Duration;

use serde::Deserialize;
use tracing::{instrument, warn};

use crate::config::ZoteroMetadataParams;
use crate::model::{Creator, MetadataRecord, SuperiorType};

use super::client::HttpClient;
use super::error::DownloadError;

/// One element of the translation service's JSON array response.
#[derive(Debug, Clone, Deserialize)]
pub struct RawZoteroItem {
    #[serde(rename = "itemType", default)]
    pub item_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "shortTitle", default)]
    pub short_title: String,
    #[serde(default)]
    pub creators: Vec<RawCreator>,
    #[serde(rename = "abstractNote", default)]
    pub abstract_note: String,
    #[serde(rename = "publicationTitle", default)]
    pub publication_title: String,
    #[serde(default)]
    pub volume: String,
    #[serde(default)]
    pub issue: String,
    #[serde(default)]
    pub pages: String,
    #[serde(default)]
    pub date: String,
    #[serde(rename = "DOI", default)]
    pub doi: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "ISSN", default)]
    pub issn: Option<String>,
    #[serde(default)]
    pub rights: String,
    #[serde(default)]
    pub tags: Vec<RawTag>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCreator {
    #[serde(rename = "firstName", default)]
    pub first_name: String,
    #[serde(rename = "lastName", default)]
    pub last_name: String,
    #[serde(rename = "creatorType", default)]
    pub creator_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTag {
    pub tag: String,
}

/// Client for the configured `translation_server_url` (spec §3 `GlobalParams`).
#[derive(Debug, Clone)]
pub struct TranslationClient {
    base_url: String,
}

impl TranslationClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    /// Submits `target_url` to the translation server and returns the items
    /// it reports, with note-only entries already folded into their
    /// preceding item.
    #[instrument(skip(self, client), fields(target_url = %target_url))]
    pub async fn translate(
        &self,
        client: &HttpClient,
        target_url: &str,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Vec<RawZoteroItem>, DownloadError> {
        let endpoint = format!("{}/web", self.base_url.trim_end_matches('/'));
        let response = client
            .post(&endpoint, user_agent, timeout)
            .body(target_url.to_string())
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .send()
            .await
            .map_err(|e| translate_network_error(target_url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::translation(
                target_url,
                format!("translation server returned status {status}"),
            ));
        }

        let items: Vec<RawZoteroItem> = response.json().await.map_err(|e| {
            DownloadError::translation(target_url, format!("invalid JSON response: {e}"))
        })?;

        if items.is_empty() {
            return Err(DownloadError::translation(
                target_url,
                "translation server returned an empty item array",
            ));
        }

        Ok(fold_notes(items))
    }
}

fn translate_network_error(url: &str, err: &reqwest::Error) -> DownloadError {
    if err.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, err.to_string())
    }
}

/// Folds any item whose `itemType` is `"note"` into the `note` list of the
/// nearest preceding non-note item. A leading note with nothing to attach
/// to is dropped with a warning, matching the translation server's own
/// convention that standalone notes only make sense as attachments.
fn fold_notes(items: Vec<RawZoteroItem>) -> Vec<RawZoteroItem> {
    let mut folded: Vec<RawZoteroItem> = Vec::with_capacity(items.len());
    for item in items {
        if item.item_type == "note" {
            if let Some(last) = folded.last_mut() {
                if let Some(text) = item.note.filter(|t| !t.is_empty()) {
                    last.tags.push(RawTag {
                        tag: format!("note:{text}"),
                    });
                }
            } else {
                warn!("leading note item with no preceding record to attach to, dropping");
            }
            continue;
        }
        folded.push(item);
    }
    folded
}

/// Converts a folded [`RawZoteroItem`] into a [`MetadataRecord`], applying
/// the merged suppress/override/exclude/rewrite filters. Returns `None` if
/// an `exclude` filter matched, meaning the whole item must be dropped.
#[must_use]
pub fn to_metadata_record(
    item: &RawZoteroItem,
    filters: &ZoteroMetadataParams,
) -> Option<MetadataRecord> {
    let mut record = MetadataRecord {
        item_type: item.item_type.clone(),
        title: apply_filters("title", &item.title, filters)?,
        short_title: apply_filters("shortTitle", &item.short_title, filters)?,
        creators: item
            .creators
            .iter()
            .map(|c| Creator {
                first: c.first_name.clone(),
                last: c.last_name.clone(),
                affix: String::new(),
                title: String::new(),
                creator_type: c.creator_type.clone(),
                ppn: None,
                gnd: None,
            })
            .collect(),
        abstract_note: apply_filters("abstractNote", &item.abstract_note, filters)?,
        publication_title: apply_filters("publicationTitle", &item.publication_title, filters)?,
        volume: apply_filters("volume", &item.volume, filters)?,
        issue: apply_filters("issue", &item.issue, filters)?,
        pages: apply_filters("pages", &item.pages, filters)?,
        date: apply_filters("date", &item.date, filters)?,
        doi: item.doi.clone(),
        languages: item.language.iter().cloned().collect(),
        url: item.url.clone(),
        issn: item.issn.clone(),
        license: apply_filters("rights", &item.rights, filters)?,
        ssg: None,
        superior_ppn: None,
        superior_type: Some(SuperiorType::Online),
        keywords: item
            .tags
            .iter()
            .filter(|t| !t.tag.starts_with("note:"))
            .map(|t| t.tag.clone())
            .collect(),
        notes: item
            .tags
            .iter()
            .filter_map(|t| t.tag.strip_prefix("note:"))
            .map(|text| crate::model::NoteEntry {
                text: text.to_string(),
            })
            .collect(),
    };
    if record.title.is_empty() {
        record.title = item.short_title.clone();
    }
    Some(record)
}

/// Applies suppress, then override, then rewrite, in that order, then tests
/// the already-mutated value against any attached `exclude` filter,
/// returning `None` on a match.
fn apply_filters(field: &str, value: &str, filters: &ZoteroMetadataParams) -> Option<String> {
    let attached = filters.for_field(field);
    let mut current = value.to_string();
    for filter in attached {
        if let Some(suppressed) = filter.apply_suppress(&current) {
            current = suppressed;
        }
        if let Some(overridden) = filter.apply_override(&current) {
            current = overridden;
        }
        if let Some(rewritten) = filter.apply_rewrite(&current) {
            current = rewritten;
        }
    }
    if attached.iter().any(|f| f.matches_exclude(&current)) {
        return None;
    }
    Some(current)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn item(item_type: &str, title: &str) -> RawZoteroItem {
        RawZoteroItem {
            item_type: item_type.to_string(),
            title: title.to_string(),
            short_title: String::new(),
            creators: Vec::new(),
            abstract_note: String::new(),
            publication_title: String::new(),
            volume: String::new(),
            issue: String::new(),
            pages: String::new(),
            date: String::new(),
            doi: None,
            language: None,
            url: String::new(),
            issn: None,
            rights: String::new(),
            tags: Vec::new(),
            note: None,
        }
    }

    #[test]
    fn fold_notes_attaches_trailing_note_to_preceding_item() {
        let mut note_item = item("note", "");
        note_item.note = Some("a comment".to_string());
        let items = vec![item("journalArticle", "Article"), note_item];
        let folded = fold_notes(items);
        assert_eq!(folded.len(), 1);
        assert!(folded[0].tags.iter().any(|t| t.tag == "note:a comment"));
    }

    #[test]
    fn fold_notes_drops_leading_note_with_no_target() {
        let mut note_item = item("note", "");
        note_item.note = Some("orphan".to_string());
        let folded = fold_notes(vec![note_item]);
        assert!(folded.is_empty());
    }

    #[test]
    fn to_metadata_record_excludes_on_matching_exclude_filter() {
        use crate::config::FieldFilter;
        use regex::Regex;
        let mut filters = ZoteroMetadataParams::default();
        filters.filters.insert(
            "title".to_string(),
            vec![FieldFilter::Exclude(Regex::new("^Erratum").unwrap())],
        );
        let record = to_metadata_record(&item("journalArticle", "Erratum: foo"), &filters);
        assert!(record.is_none());
    }

    #[test]
    fn to_metadata_record_applies_override_with_org_token() {
        use crate::config::FieldFilter;
        let mut filters = ZoteroMetadataParams::default();
        filters.filters.insert(
            "publicationTitle".to_string(),
            vec![FieldFilter::Override("[%org%]".to_string())],
        );
        let mut raw = item("journalArticle", "Title");
        raw.publication_title = "Journal".to_string();
        let record = to_metadata_record(&raw, &filters).unwrap();
        assert_eq!(record.publication_title, "[Journal]");
    }
}
