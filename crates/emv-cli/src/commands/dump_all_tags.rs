//! Dump all TLV tags found on card, including unknown ones

use emv_common::{TagRegistry, TlvReader};

/// Render every data object in `data` as an indented tree
///
/// Constructed objects are descended into. Parsing stops at the first
/// malformed object, which is reported in place.
pub fn dump_all_tags(tags: &TagRegistry, data: &[u8], indent: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let pad = " ".repeat(indent * 2);

    for tlv in TlvReader::new(data) {
        let tlv = match tlv {
            Ok(tlv) => tlv,
            Err(e) => {
                lines.push(format!("{}<malformed: {}>", pad, e));
                break;
            }
        };

        let tag = tlv.tag();
        let value = tlv.value();
        let header = format!("{}[{}] {}", pad, hex::encode_upper(tag), tags.name(tag));

        if tlv.is_constructed() {
            lines.push(format!("{} ({} bytes)", header, value.len()));
            lines.extend(dump_all_tags(tags, value, indent + 1));
        } else if value.len() <= 32 {
            lines.push(format!("{}: {}", header, hex::encode_upper(value)));
        } else {
            lines.push(format!(
                "{}: {}... ({} bytes)",
                header,
                hex::encode_upper(&value[..32]),
                value.len()
            ));
        }
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_and_unknown_tags() {
        let tags = TagRegistry::emv();
        // the trailing 9F36 has lost its length byte
        let record = [0x70, 0x0A, 0x5A, 0x02, 0x54, 0x13, 0xDF, 0x7F, 0x01, 0x00, 0x9F, 0x36];
        let lines = dump_all_tags(&tags, &record, 0);

        assert_eq!(lines[0], "[70] Record Template (10 bytes)");
        assert_eq!(lines[1], "  [5A] Application PAN: 5413");
        assert_eq!(lines[2], "  [DF7F] Unhandled Tag: 00");
        assert!(lines[3].contains("malformed"));
    }
}
