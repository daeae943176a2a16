//! Stream-parses an XML file of `<item .../>` elements into records
//! (component M, §4.M). Field metadata is looked up once per call against
//! the `&'static` table a type's [`ConfigSchema::fields`] already caches;
//! there is no per-file reflection cost to amortize.
//!
//! §4.M "XML safety": external entities and DTDs must be disabled. `quick_xml`'s
//! `Reader` never expands entities or resolves DTDs in the first place, so
//! this is a property of the parser we use rather than a flag we set.

use std::collections::HashMap;

use common::errors::*;
use common::TaggedError;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::schema::ConfigSchema;

fn parse_error(path: &str, detail: impl std::fmt::Display) -> Error {
    TaggedError::new(common::ErrorKind::ConfigParse, format!("{}: {}", path, detail)).into()
}

/// Parses every `<item>` child of `T::root_element()` in `xml` into a `T`,
/// in document order (container enumeration order, §4.L).
pub fn parse_str<T: ConfigSchema>(path: &str, xml: &str) -> Result<Vec<T>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let fields = T::fields();
    let item_tag = T::item_element().as_bytes();
    let mut records = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| parse_error(path, e))? {
            Event::Eof => break,
            Event::Start(tag) | Event::Empty(tag) if tag.name().as_ref() == item_tag => {
                let mut raw_attributes: HashMap<String, String> = HashMap::new();
                for attr in tag.attributes() {
                    let attr = attr.map_err(|e| parse_error(path, e))?;
                    let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
                    let value = attr
                        .decode_and_unescape_value(&reader)
                        .map_err(|e| parse_error(path, e))?
                        .into_owned();
                    raw_attributes.insert(key, value);
                }

                let mut record = T::default();
                for (name, raw) in &raw_attributes {
                    if let Some(binding) = fields.iter().find(|f| f.name == name) {
                        (binding.set)(&mut record, raw).map_err(|e| parse_error(path, e))?;
                    }
                    // Unknown attributes are ignored rather than rejected: a
                    // newer data file may carry fields this build doesn't
                    // know about yet.
                }
                record.after_load(&raw_attributes).map_err(|e| parse_error(path, e))?;
                record.validate().map_err(|e| parse_error(path, e))?;
                records.push(record);
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(records)
}

pub fn parse_file<T: ConfigSchema>(path: &str) -> Result<Vec<T>> {
    let xml = std::fs::read_to_string(path).map_err(|e| parse_error(path, e))?;
    parse_str::<T>(path, &xml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ConfigRecord;
    use crate::schema::primitive;

    #[derive(Default, Clone, Debug)]
    struct Item {
        id: i64,
        name: String,
        power: i64,
    }

    impl ConfigRecord for Item {
        type Id = i64;
        fn id(&self) -> i64 {
            self.id
        }
    }

    impl ConfigSchema for Item {
        fn root_element() -> &'static str {
            "items"
        }

        fn fields() -> &'static [FieldBinding<Self>] {
            use crate::schema::FieldBinding;
            const FIELDS: &[FieldBinding<Item>] = &[
                FieldBinding::new("id", |r, raw| {
                    r.id = primitive::parse_i64(raw)?;
                    Ok(())
                }),
                FieldBinding::new("name", |r, raw| {
                    r.name = primitive::parse_string(raw)?;
                    Ok(())
                }),
                FieldBinding::new("power", |r, raw| {
                    r.power = primitive::parse_i64(raw)?;
                    Ok(())
                }),
            ];
            FIELDS
        }
    }

    use crate::schema::FieldBinding;

    #[test]
    fn parses_items_in_document_order() {
        let xml = r#"<items>
            <item id="2" name="shield" power="5"/>
            <item id="1" name="sword" power="12"/>
        </items>"#;
        let records = parse_str::<Item>("test.xml", xml).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 2);
        assert_eq!(records[1].id, 1);
        assert_eq!(records[1].power, 12);
    }

    #[test]
    fn unknown_attribute_is_ignored_not_rejected() {
        let xml = r#"<items><item id="1" name="sword" power="1" legacy_field="x"/></items>"#;
        let records = parse_str::<Item>("test.xml", xml).unwrap();
        assert_eq!(records[0].name, "sword");
    }

    #[test]
    fn malformed_value_surfaces_as_config_parse() {
        let xml = r#"<items><item id="abc" name="sword" power="1"/></items>"#;
        let err = parse_str::<Item>("test.xml", xml).unwrap_err();
        assert_eq!(common::errors::kind_of(&err), common::ErrorKind::ConfigParse);
    }
}
