//! Named header fields with a stable key set.

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::parser::header::{find_field, DecodedHeader, HeaderBlock};

/// Fields shown by the summary and headers views.
pub const SUMMARY_FIELDS: &[&str] = &["From", "To", "Cc", "Subject", "Date", "Message-ID"];

/// Ordered map of field name → decoded value.
///
/// Every requested name is present; absent fields hold `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderFields {
    entries: Vec<DecodedHeader>,
}

impl HeaderFields {
    /// Value for `name` (case-insensitive), `""` when not requested or absent.
    pub fn get(&self, name: &str) -> &str {
        self.entries
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map_or("", |h| h.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &DecodedHeader> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names of fields that kept an undecodable encoded word.
    pub fn degraded_fields(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|h| h.degraded)
            .map(|h| h.name.as_str())
    }

    /// Longest field name, for aligned text output.
    pub fn name_width(&self) -> usize {
        self.entries.iter().map(|h| h.name.len()).max().unwrap_or(0)
    }
}

impl Serialize for HeaderFields {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for header in &self.entries {
            map.serialize_entry(&header.name, &header.value)?;
        }
        map.end()
    }
}

/// Decode the requested fields from `block`, in the order given.
pub fn extract_fields(block: &HeaderBlock, names: &[&str]) -> HeaderFields {
    let entries = names
        .iter()
        .map(|&name| match find_field(block, name) {
            Some(found) => DecodedHeader {
                name: name.to_string(),
                ..found
            },
            None => DecodedHeader {
                name: name.to_string(),
                value: String::new(),
                degraded: false,
            },
        })
        .collect();
    HeaderFields { entries }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADERS: &[u8] = b"from: Ana <ana@example.com>\r\n\
Subject: =?utf-8?Q?Caf=C3=A9?=\r\n\
Date: Thu, 04 Jan 2024 10:00:00 +0000\r\n";

    #[test]
    fn test_absent_fields_are_empty_strings() {
        let fields = extract_fields(&HeaderBlock::new(HEADERS), SUMMARY_FIELDS);
        assert_eq!(fields.len(), SUMMARY_FIELDS.len());
        assert_eq!(fields.get("From"), "Ana <ana@example.com>");
        assert_eq!(fields.get("Subject"), "Café");
        assert_eq!(fields.get("Cc"), "");
        assert_eq!(fields.get("X-Not-Requested"), "");
    }

    #[test]
    fn test_order_and_names_follow_request() {
        let fields = extract_fields(&HeaderBlock::new(HEADERS), &["Subject", "From"]);
        let names: Vec<&str> = fields.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, ["Subject", "From"]);
    }

    #[test]
    fn test_serializes_as_ordered_map() {
        let fields = extract_fields(&HeaderBlock::new(HEADERS), &["Subject", "Cc"]);
        let json = serde_json::to_string(&fields).unwrap();
        assert_eq!(json, r#"{"Subject":"Café","Cc":""}"#);
    }

    #[test]
    fn test_degraded_fields_listed() {
        let block = HeaderBlock::new(b"Subject: =?nope?B?AAAA?=\r\n");
        let fields = extract_fields(&block, &["Subject", "From"]);
        assert_eq!(fields.degraded_fields().collect::<Vec<_>>(), ["Subject"]);
    }
}
