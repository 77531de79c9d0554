//! Catalog record assembly (spec §4.4 step 7, §3 `CatalogRecord`).
//!
//! spec.md places the catalog-format reader/writer libraries out of scope
//! and specifies only the subfields a record must carry. This module
//! assembles a minimal MARCXML-shaped record (leader, control fields, data
//! fields with subfields) — the de facto interchange shape for the format
//! named in the glossary — and computes the hash/identifier spec §3 and §8
//! require.

use chrono::NaiveDate;
use sha2::{Digest, Sha256};

use crate::config::enhancement::EnhancementMaps;
use crate::config::{FieldFilter, GlobalParams, GroupParams, JournalParams, MarcMetadataParams};
use crate::model::{MetadataRecord, SuperiorType};

use super::error::ConversionError;

pub const ABSTRACT_MAX_LEN: usize = 2000;

/// Field tags excluded from the delivery-dedup hash (spec §3): they are
/// volatile bookkeeping, not part of the record's bibliographic identity.
pub const HASH_EXCLUDED_TAGS: &[&str] = &["001", "URL", "ZID", "JOU"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subfield {
    pub code: char,
    pub value: String,
}

impl Subfield {
    pub fn new(code: char, value: impl Into<String>) -> Self {
        Self {
            code,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataField {
    pub tag: String,
    pub ind1: char,
    pub ind2: char,
    pub subfields: Vec<Subfield>,
}

impl DataField {
    pub fn new(tag: impl Into<String>, subfields: Vec<Subfield>) -> Self {
        Self {
            tag: tag.into(),
            ind1: ' ',
            ind2: ' ',
            subfields,
        }
    }
}

/// The emitted record (spec §3 `CatalogRecord`). `control_fields` holds
/// both true MARC control fields (`001`, `007`) and this system's
/// non-standard single-value bookkeeping tags (`URL`, `ZID`, `JOU`).
#[derive(Debug, Clone)]
pub struct CatalogRecord {
    pub leader: String,
    pub control_fields: Vec<(String, String)>,
    pub data_fields: Vec<DataField>,
    pub identifier: String,
    pub hash: String,
    pub group: String,
}

impl CatalogRecord {
    #[must_use]
    pub fn control_field(&self, tag: &str) -> Option<&str> {
        self.control_fields
            .iter()
            .find(|(t, _)| t == tag)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn data_fields_with_tag(&self, tag: &str) -> Vec<&DataField> {
        self.data_fields.iter().filter(|f| f.tag == tag).collect()
    }
}

/// Leader for a serial-component-part record (spec §4.4 step 7): record
/// type `a` (language material), bibliographic level `b` (serial component
/// part).
const LEADER_TEMPLATE: &str = "00000nab a2200000uu4500";

fn carrier_control_field(superior_type: SuperiorType) -> (String, String) {
    match superior_type {
        SuperiorType::Online => ("007".to_string(), "cr|||||||||||".to_string()),
        SuperiorType::Print => ("007".to_string(), "t|".to_string()),
    }
}

fn truncate_abstract(value: &str) -> String {
    if value.chars().count() <= ABSTRACT_MAX_LEN {
        value.to_string()
    } else {
        let truncated: String = value.chars().take(ABSTRACT_MAX_LEN).collect();
        format!("{truncated}...")
    }
}

fn compound_volume_issue_pages_year(record: &MetadataRecord) -> String {
    let year = record.date.get(0..4).unwrap_or("");
    let mut parts = Vec::new();
    if !record.volume.is_empty() {
        parts.push(record.volume.clone());
    }
    if !record.issue.is_empty() {
        parts.push(format!("({})", record.issue));
    }
    if !record.pages.is_empty() {
        parts.push(record.pages.clone());
    }
    let mut compound = parts.join(", ");
    if !year.is_empty() {
        if !compound.is_empty() {
            compound.push_str(" - ");
        }
        compound.push_str(year);
    }
    compound
}

/// Assembles the catalog record (spec §4.4 step 7), then applies the
/// merged `fields_to_add`/`fields_to_add_if`/`fields_to_remove`/
/// `subfields_to_remove`/`rewrite_filters` (step 7's "apply" clause).
///
/// # Errors
///
/// Returns [`ConversionError::MissingUrl`] if `record.url` is empty — a
/// record with no source URL cannot satisfy the §3 invariant that every
/// emitted record carries `URL` or the original source URL.
pub fn assemble(
    record: &MetadataRecord,
    journal: &JournalParams,
    group: &GroupParams,
    global: &GlobalParams,
    enhancement: &EnhancementMaps,
    today: NaiveDate,
) -> Result<CatalogRecord, ConversionError> {
    if record.url.is_empty() {
        return Err(ConversionError::MissingUrl);
    }
    if record.title.is_empty() {
        return Err(ConversionError::EmptyTitle);
    }
    let Some(superior_type) = record.superior_type else {
        return Err(ConversionError::NoUsableIdentifierPair);
    };
    let Some(superior_ppn) = &record.superior_ppn else {
        return Err(ConversionError::NoUsableIdentifierPair);
    };

    let mut control_fields = vec![
        carrier_control_field(superior_type),
        ("URL".to_string(), record.url.clone()),
        ("ZID".to_string(), format!("{}:1", journal.zeder_id)),
        ("JOU".to_string(), journal.name.clone()),
    ];

    let mut data_fields = Vec::new();

    if let Some((first, rest)) = record.creators.split_first() {
        data_fields.push(DataField::new(
            "100",
            vec![Subfield::new('a', format!("{}, {}", first.last, first.first))],
        ));
        for creator in rest {
            data_fields.push(DataField::new(
                "700",
                vec![Subfield::new('a', format!("{}, {}", creator.last, creator.first))],
            ));
        }
    }

    data_fields.push(DataField::new("245", vec![Subfield::new('a', &record.title)]));

    if !record.languages.is_empty() {
        let mut subfields: Vec<Subfield> = record
            .languages
            .iter()
            .map(|l| Subfield::new('a', l.clone()))
            .collect();
        subfields.truncate(record.languages.len());
        data_fields.push(DataField::new("041", subfields));
    }

    if !record.abstract_note.is_empty() {
        data_fields.push(DataField::new(
            "520",
            vec![Subfield::new('a', truncate_abstract(&record.abstract_note))],
        ));
    }

    if !record.date.is_empty() {
        data_fields.push(DataField::new("936", vec![Subfield::new('j', &record.date)]));
    }

    data_fields.push(DataField::new(
        "856",
        vec![
            Subfield::new('u', &record.url),
            Subfield::new('r', &record.license),
        ],
    ));

    if let Some(doi) = &record.doi {
        data_fields.push(DataField::new("024", vec![Subfield::new('a', doi), Subfield::new('2', "doi")]));
        data_fields.push(DataField::new(
            "856",
            vec![Subfield::new('u', format!("https://doi.org/{doi}"))],
        ));
    }

    let mut superior_subfields = vec![Subfield::new('w', format!("(DE-627){superior_ppn}"))];
    if let Some(issn) = &record.issn {
        superior_subfields.push(Subfield::new('x', issn.clone()));
    }
    let compound = compound_volume_issue_pages_year(record);
    if !compound.is_empty() {
        superior_subfields.push(Subfield::new('g', compound));
    }
    data_fields.push(DataField::new("773", superior_subfields));

    for keyword in &record.keywords {
        let tag = if enhancement.is_vocabulary_term(keyword) {
            "689"
        } else {
            "653"
        };
        data_fields.push(DataField::new(tag, vec![Subfield::new('a', keyword.clone())]));
    }

    if let Some(ssg) = &record.ssg {
        data_fields.push(DataField::new("935", vec![Subfield::new('c', ssg.clone())]));
    }

    data_fields.push(DataField::new("852", vec![Subfield::new('a', &group.isil)]));

    let merged = MarcMetadataParams::merged(
        &global.marc_metadata_params,
        &group.marc_metadata_params,
        &journal.marc_metadata_params,
    );
    apply_marc_filters(&mut data_fields, &mut control_fields, &merged);

    let hash = compute_hash(&control_fields, &data_fields);
    let identifier = format!("{}#{}#{}", group.name, today.format("%Y-%m-%d"), hash);
    control_fields.insert(0, ("001".to_string(), identifier.clone()));

    Ok(CatalogRecord {
        leader: LEADER_TEMPLATE.to_string(),
        control_fields,
        data_fields,
        identifier,
        hash,
        group: group.name.clone(),
    })
}

/// Applies the MARC-layer field filters (spec §4.3 table, §9 REDESIGN
/// FLAGS tagged union): `Add`/`AddConditional` append a field,
/// `Remove`/`Exclude`-as-remove drop a field/subfield, `Rewrite` edits
/// matching subfield values in place. Subfield `'*'` means "the whole
/// field".
fn apply_marc_filters(
    data_fields: &mut Vec<DataField>,
    control_fields: &mut Vec<(String, String)>,
    filters: &MarcMetadataParams,
) {
    for ((tag, subfield), filter_list) in &filters.filters {
        for filter in filter_list {
            match filter {
                FieldFilter::Add(value) => {
                    data_fields.push(DataField::new(
                        tag.clone(),
                        vec![Subfield::new(if *subfield == '*' { 'a' } else { *subfield }, value.clone())],
                    ));
                }
                FieldFilter::AddConditional {
                    test_field,
                    matcher,
                    replacement,
                } => {
                    let test_value = control_fields
                        .iter()
                        .find(|(t, _)| t == test_field)
                        .map(|(_, v)| v.as_str())
                        .or_else(|| {
                            data_fields
                                .iter()
                                .find(|f| &f.tag == test_field)
                                .and_then(|f| f.subfields.first())
                                .map(|s| s.value.as_str())
                        })
                        .unwrap_or("");
                    if matcher.is_match(test_value) {
                        data_fields.push(DataField::new(
                            tag.clone(),
                            vec![Subfield::new(if *subfield == '*' { 'a' } else { *subfield }, replacement.clone())],
                        ));
                    }
                }
                FieldFilter::Remove => {
                    if *subfield == '*' {
                        data_fields.retain(|f| &f.tag != tag);
                        control_fields.retain(|(t, _)| t != tag);
                    } else {
                        for field in data_fields.iter_mut().filter(|f| &f.tag == tag) {
                            field.subfields.retain(|sf| sf.code != *subfield);
                        }
                        data_fields.retain(|f| &f.tag != tag || !f.subfields.is_empty());
                    }
                }
                FieldFilter::Exclude(re) => {
                    for field in data_fields.iter_mut().filter(|f| &f.tag == tag) {
                        field.subfields.retain(|sf| *subfield != '*' && sf.code != *subfield || !re.is_match(&sf.value));
                    }
                }
                FieldFilter::Rewrite(re, replacement) => {
                    for field in data_fields.iter_mut().filter(|f| &f.tag == tag) {
                        for sf in &mut field.subfields {
                            if *subfield == '*' || sf.code == *subfield {
                                sf.value = re.replace_all(&sf.value, replacement.as_str()).into_owned();
                            }
                        }
                    }
                }
                FieldFilter::Suppress(_) | FieldFilter::Override(_) => {
                    // zotero-layer-only filter kinds; not meaningful at the MARC layer.
                }
            }
        }
    }
}

/// Any catalog-exclusion filter matching a resulting field (spec §4.4 step
/// 8) drops the whole record.
#[must_use]
pub fn matches_catalog_exclusion(data_fields: &[DataField], filters: &MarcMetadataParams) -> bool {
    for ((tag, subfield), filter_list) in &filters.filters {
        for filter in filter_list {
            if let FieldFilter::Exclude(re) = filter {
                for field in data_fields.iter().filter(|f| &f.tag == tag) {
                    for sf in &field.subfields {
                        if (*subfield == '*' || sf.code == *subfield) && re.is_match(&sf.value) {
                            return true;
                        }
                    }
                }
            }
        }
    }
    false
}

/// Computes the checksum (spec §3, §8): a SHA-256 over a canonical
/// serialization of every control and data field except
/// [`HASH_EXCLUDED_TAGS`], lowercase-hex encoded.
#[must_use]
pub fn compute_hash(control_fields: &[(String, String)], data_fields: &[DataField]) -> String {
    let mut hasher = Sha256::new();
    for (tag, value) in control_fields {
        if HASH_EXCLUDED_TAGS.contains(&tag.as_str()) {
            continue;
        }
        hasher.update(tag.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b";");
    }
    for field in data_fields {
        if HASH_EXCLUDED_TAGS.contains(&field.tag.as_str()) {
            continue;
        }
        hasher.update(field.tag.as_bytes());
        hasher.update([field.ind1 as u8, field.ind2 as u8]);
        for sf in &field.subfields {
            hasher.update([sf.code as u8]);
            hasher.update(sf.value.as_bytes());
        }
        hasher.update(b";");
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
