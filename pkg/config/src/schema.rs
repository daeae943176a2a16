//! Schema-driven field binding for the config loader (component M, §4.M).
//!
//! The source walks instance fields via reflection, caching (name, declared
//! type, optional converter) the first time each record type is loaded.
//! Rust has no such reflection, so each record type instead registers its
//! field table once as a `&'static [FieldBinding<Self>]` — the schema is
//! still built and cached exactly once per type (by the `&'static` itself),
//! it is just written by hand instead of discovered at runtime.

use common::errors::*;

use crate::container::ConfigRecord;

/// One bound attribute: `name` is the XML attribute name, `set` parses the
/// raw attribute string and assigns it onto the record being built.
pub struct FieldBinding<T> {
    pub name: &'static str,
    pub set: fn(&mut T, &str) -> Result<()>,
}

impl<T> FieldBinding<T> {
    pub const fn new(name: &'static str, set: fn(&mut T, &str) -> Result<()>) -> Self {
        Self { name, set }
    }
}

/// A record type loadable by [`crate::loader::load_file`]. `root_element`
/// and `item_element` name the XML container per §6 ("a root element
/// containing `item` children"); `after_load` and `validate` run in that
/// order after every attribute has been bound, per §4.M.
pub trait ConfigSchema: ConfigRecord + Default {
    fn root_element() -> &'static str;

    fn item_element() -> &'static str {
        "item"
    }

    fn fields() -> &'static [FieldBinding<Self>];

    /// Derived-field hook; `raw_attributes` is the untouched attribute map
    /// for fields that need more than a 1:1 coercion.
    fn after_load(&mut self, _raw_attributes: &std::collections::HashMap<String, String>) -> Result<()> {
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// Primitive-string coercion helpers for `set` functions that don't need a
/// custom converter (§4.M "primitive-string coercion").
pub mod primitive {
    use common::errors::*;
    use common::TaggedError;

    fn coerce_error(raw: &str, ty: &str) -> Error {
        TaggedError::new(common::ErrorKind::ConfigParse, format!("could not coerce '{}' to {}", raw, ty)).into()
    }

    pub fn parse_i64(raw: &str) -> Result<i64> {
        raw.trim().parse().map_err(|_| coerce_error(raw, "i64"))
    }

    pub fn parse_i32(raw: &str) -> Result<i32> {
        raw.trim().parse().map_err(|_| coerce_error(raw, "i32"))
    }

    pub fn parse_f64(raw: &str) -> Result<f64> {
        raw.trim().parse().map_err(|_| coerce_error(raw, "f64"))
    }

    pub fn parse_bool(raw: &str) -> Result<bool> {
        match raw.trim() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(coerce_error(raw, "bool")),
        }
    }

    pub fn parse_string(raw: &str) -> Result<String> {
        Ok(raw.to_string())
    }
}
