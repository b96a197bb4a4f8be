//! Minimal HL7 v2 (ER7/"pipe-and-hat") parsing.
//!
//! Parses exactly as much structure as routing conditions and MLLP ACK
//! generation need: segment/field/component access. Never validates
//! against a schema — an unparseable message is not an error here, only
//! at the point something tries to read a field from it (see
//! [`crate::domain::envelope::ParsedView::field`]).

use crate::domain::ParsedView;

const SEGMENT_TERMINATOR: char = '\r';
const FIELD_SEPARATOR: char = '|';
const COMPONENT_SEPARATOR: char = '^';

/// Parses raw ER7 bytes into a [`ParsedView`].
///
/// Lossy-decodes non-UTF-8 bytes rather than failing; HL7 v2 messages are
/// frequently transmitted in 8859-1 or similar single-byte encodings, and a
/// routing condition only needs the ASCII-range delimiters to tokenize
/// correctly. The `MSH` segment is special-cased: its own field separator
/// and encoding characters are `MSH-1`/`MSH-2` rather than ordinary
/// pipe-delimited fields.
#[must_use]
pub fn parse(raw: &[u8]) -> ParsedView {
    let text = String::from_utf8_lossy(raw);
    let mut view = ParsedView::default();
    for line in text.split(SEGMENT_TERMINATOR) {
        let line = line.trim_start_matches(['\n', '\r']);
        if line.len() < 3 {
            continue;
        }
        let segment = &line[0..3];
        let rest = &line[3..];
        if segment == "MSH" {
            parse_msh(rest, &mut view);
        } else {
            let body = rest.strip_prefix(FIELD_SEPARATOR).unwrap_or(rest);
            parse_fields(segment, body, &mut view);
        }
    }
    view
}

fn parse_msh(rest: &str, view: &mut ParsedView) {
    // MSH-1 is the field separator itself (the char right after "MSH").
    let Some(sep) = rest.chars().next() else {
        return;
    };
    view.fields
        .insert(("MSH".to_string(), 1, 0), sep.to_string());
    let body = &rest[sep.len_utf8()..];
    // MSH-2 runs up to the next occurrence of the field separator.
    let (encoding_chars, remainder) = match body.find(sep) {
        Some(idx) => (&body[..idx], &body[idx + sep.len_utf8()..]),
        None => (body, ""),
    };
    view.fields
        .insert(("MSH".to_string(), 2, 0), encoding_chars.to_string());
    // Remaining fields are MSH-3 onward, still separated by `sep`.
    for (offset, field) in remainder.split(sep).enumerate() {
        let index = u32::try_from(offset + 3).unwrap_or(u32::MAX);
        insert_field(view, "MSH", index, field);
    }
}

fn parse_fields(segment: &str, body: &str, view: &mut ParsedView) {
    for (offset, field) in body.split(FIELD_SEPARATOR).enumerate() {
        let index = u32::try_from(offset + 1).unwrap_or(u32::MAX);
        insert_field(view, segment, index, field);
    }
}

fn insert_field(view: &mut ParsedView, segment: &str, index: u32, field: &str) {
    view.fields
        .insert((segment.to_string(), index, 0), field.to_string());
    for (comp_offset, component) in field.split(COMPONENT_SEPARATOR).enumerate() {
        let comp_index = u32::try_from(comp_offset + 1).unwrap_or(u32::MAX);
        view.fields
            .insert((segment.to_string(), index, comp_index), component.to_string());
    }
}

/// Builds the MSH+MSA-only ACK message for an inbound message, per §4.3.
///
/// Swaps sending/receiving application and facility from the inbound `MSH`,
/// copies the inbound `MSH-10` (message control id) into `MSA-2`, and sets
/// `MSA-1` to `ack_code`.
#[must_use]
pub fn build_ack(inbound: &ParsedView, ack_code: &str) -> Vec<u8> {
    let sending_app = inbound.field("MSH", 3, 0);
    let sending_facility = inbound.field("MSH", 4, 0);
    let receiving_app = inbound.field("MSH", 5, 0);
    let receiving_facility = inbound.field("MSH", 6, 0);
    let message_control_id = inbound.field("MSH", 10, 0);
    let processing_id = inbound.field("MSH", 11, 0);
    let version = inbound.field("MSH", 12, 0);
    let timestamp = crate::domain::trace::chrono_like::Timestamp::now().0;

    let msh = format!(
        "MSH|^~\\&|{receiving_app}|{receiving_facility}|{sending_app}|{sending_facility}|{timestamp}||ACK|{message_control_id}-ACK|{processing_id}|{version}\r"
    );
    let msa = format!("MSA|{ack_code}|{message_control_id}\r");
    let mut out = Vec::with_capacity(msh.len() + msa.len());
    out.extend_from_slice(msh.as_bytes());
    out.extend_from_slice(msa.as_bytes());
    out
}

/// Extracts `MSH-9.1` (HL7 message type), for populating `MessageBody`'s
/// protocol-indexed columns.
#[must_use]
pub fn message_type(view: &ParsedView) -> Option<String> {
    let value = view.field("MSH", 9, 1);
    (!value.is_empty()).then(|| value.to_string())
}

/// Extracts `MSH-4` (sending facility), for populating `MessageBody`'s
/// protocol-indexed columns.
#[must_use]
pub fn sending_facility(view: &ParsedView) -> Option<String> {
    let value = view.field("MSH", 4, 0);
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADT_A01: &[u8] =
        b"MSH|^~\\&|PAS|HOSP|EPR|HOSP|20260101010101||ADT^A01|MSG1|P|2.4\rEVN|A01|20260101010101\r";

    #[test]
    fn parses_msh_fields_and_components() {
        let view = parse(ADT_A01);
        assert_eq!(view.field("MSH", 9, 1), "ADT");
        assert_eq!(view.field("MSH", 9, 2), "A01");
        assert_eq!(view.field("MSH", 10, 0), "MSG1");
        assert_eq!(view.field("MSH", 11, 0), "P");
        assert_eq!(view.field("MSH", 12, 0), "2.4");
    }

    #[test]
    fn parses_non_msh_segment_fields() {
        let view = parse(ADT_A01);
        assert_eq!(view.field("EVN", 1, 0), "A01");
    }

    #[test]
    fn missing_field_is_empty() {
        let view = parse(ADT_A01);
        assert_eq!(view.field("PID", 5, 0), "");
    }

    #[test]
    fn builds_ack_swapping_applications_and_copying_control_id() {
        let view = parse(ADT_A01);
        let ack = build_ack(&view, "AA");
        let ack_view = parse(&ack);
        assert_eq!(ack_view.field("MSH", 3, 0), "EPR");
        assert_eq!(ack_view.field("MSH", 4, 0), "HOSP");
        assert_eq!(ack_view.field("MSH", 5, 0), "PAS");
        assert_eq!(ack_view.field("MSA", 1, 0), "AA");
        assert_eq!(ack_view.field("MSA", 2, 0), "MSG1");
    }

    #[test]
    fn extracts_message_type_and_facility() {
        let view = parse(ADT_A01);
        assert_eq!(message_type(&view).as_deref(), Some("ADT"));
        assert_eq!(sending_facility(&view).as_deref(), Some("HOSP"));
    }
}
