//! Minimal MARCXML-shaped serialization of [`crate::conversion::assemble::CatalogRecord`].
//!
//! The catalog-format reader/writer libraries are out of scope (spec §1);
//! this module exists only so the writer cache has a concrete byte stream
//! to append per record. It emits the subset of MARCXML spec.md's record
//! invariants require: a leader, control fields, and data fields with
//! subfields.

use crate::conversion::assemble::CatalogRecord;

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Serializes one record as a `<record>` element. Does not include the
/// enclosing `<collection>` wrapper; the writer cache owns that so it can
/// stream records one at a time without buffering the whole file.
#[must_use]
pub fn serialize_record(record: &CatalogRecord) -> String {
    let mut out = String::new();
    out.push_str("<record>\n");
    out.push_str(&format!("  <leader>{}</leader>\n", escape(&record.leader)));
    for (tag, value) in &record.control_fields {
        out.push_str(&format!(
            "  <controlfield tag=\"{}\">{}</controlfield>\n",
            escape(tag),
            escape(value)
        ));
    }
    for field in &record.data_fields {
        out.push_str(&format!(
            "  <datafield tag=\"{}\" ind1=\"{}\" ind2=\"{}\">\n",
            escape(&field.tag),
            field.ind1,
            field.ind2
        ));
        for subfield in &field.subfields {
            out.push_str(&format!(
                "    <subfield code=\"{}\">{}</subfield>\n",
                subfield.code,
                escape(&subfield.value)
            ));
        }
        out.push_str("  </datafield>\n");
    }
    out.push_str("</record>\n");
    out
}

pub const COLLECTION_OPEN: &str = "<collection>\n";
pub const COLLECTION_CLOSE: &str = "</collection>\n";

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::conversion::assemble::{DataField, Subfield};

    #[test]
    fn serializes_control_and_data_fields() {
        let record = CatalogRecord {
            leader: "00000nab a2200000uu4500".to_string(),
            control_fields: vec![("001".to_string(), "TestGroup#2026-07-28#abc".to_string())],
            data_fields: vec![DataField::new("245", vec![Subfield::new('a', "Hello")])],
            identifier: "TestGroup#2026-07-28#abc".to_string(),
            hash: "abc".to_string(),
            group: "TestGroup".to_string(),
        };
        let xml = serialize_record(&record);
        assert!(xml.contains("<controlfield tag=\"001\">TestGroup#2026-07-28#abc</controlfield>"));
        assert!(xml.contains("<datafield tag=\"245\" ind1=\" \" ind2=\" \">"));
        assert!(xml.contains("<subfield code=\"a\">Hello</subfield>"));
    }

    #[test]
    fn escapes_reserved_xml_characters() {
        let record = CatalogRecord {
            leader: String::new(),
            control_fields: Vec::new(),
            data_fields: vec![DataField::new("245", vec![Subfield::new('a', "A & B <C>")])],
            identifier: String::new(),
            hash: String::new(),
            group: String::new(),
        };
        let xml = serialize_record(&record);
        assert!(xml.contains("A &amp; B &lt;C&gt;"));
    }
}
