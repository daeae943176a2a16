//! Attribute-string converters for the non-primitive field shapes named in
//! §6 "Configuration file layout": comma-separated int list, `k:v,k:v`
//! int-int map, `a,b,c;d,e` 2D int array, comma-separated string list.
//!
//! §9 open question: some converters returned an empty collection on empty
//! input and others returned null. Resolved here by giving every converter
//! a single `default()` and always returning it for empty input, never a
//! null/None in its place.

use common::errors::*;
use common::TaggedError;

fn parse_error(raw: &str, shape: &str) -> Error {
    TaggedError::new(common::ErrorKind::ConfigParse, format!("could not parse '{}' as {}", raw, shape)).into()
}

/// Comma-separated list of signed integers, e.g. `"1,2,3"`.
pub fn int_list(raw: &str) -> Result<Vec<i64>> {
    if raw.trim().is_empty() {
        return Ok(int_list_default());
    }
    raw.split(',')
        .map(|part| part.trim().parse::<i64>().map_err(|_| parse_error(raw, "int list")))
        .collect()
}

pub fn int_list_default() -> Vec<i64> {
    Vec::new()
}

/// `k:v,k:v` map of signed integers, e.g. `"1:10,2:20"`.
pub fn int_int_map(raw: &str) -> Result<std::collections::HashMap<i64, i64>> {
    if raw.trim().is_empty() {
        return Ok(int_int_map_default());
    }
    let mut map = std::collections::HashMap::new();
    for part in raw.split(',') {
        let (k, v) = part.split_once(':').ok_or_else(|| parse_error(raw, "int-int map"))?;
        let k = k.trim().parse::<i64>().map_err(|_| parse_error(raw, "int-int map"))?;
        let v = v.trim().parse::<i64>().map_err(|_| parse_error(raw, "int-int map"))?;
        map.insert(k, v);
    }
    Ok(map)
}

pub fn int_int_map_default() -> std::collections::HashMap<i64, i64> {
    std::collections::HashMap::new()
}

/// 2D int array: rows separated by `;`, columns within a row by `,`, e.g.
/// `"1,2,3;4,5"`.
pub fn int_grid(raw: &str) -> Result<Vec<Vec<i64>>> {
    if raw.trim().is_empty() {
        return Ok(int_grid_default());
    }
    raw.split(';').map(int_list).collect()
}

pub fn int_grid_default() -> Vec<Vec<i64>> {
    Vec::new()
}

/// Comma-separated list of strings, e.g. `"fire,ice,poison"`.
pub fn string_list(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return string_list_default();
    }
    raw.split(',').map(|part| part.trim().to_string()).collect()
}

pub fn string_list_default() -> Vec<String> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_list_parses_and_defaults_on_empty() {
        assert_eq!(int_list("1,2,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(int_list("").unwrap(), int_list_default());
        assert_eq!(int_list("  ").unwrap(), int_list_default());
    }

    #[test]
    fn int_int_map_parses_pairs() {
        let map = int_int_map("1:10,2:20").unwrap();
        assert_eq!(map.get(&1), Some(&10));
        assert_eq!(map.get(&2), Some(&20));
        assert_eq!(int_int_map("").unwrap(), int_int_map_default());
    }

    #[test]
    fn int_grid_splits_rows_then_columns() {
        let grid = int_grid("1,2,3;4,5").unwrap();
        assert_eq!(grid, vec![vec![1, 2, 3], vec![4, 5]]);
        assert_eq!(int_grid("").unwrap(), int_grid_default());
    }

    #[test]
    fn string_list_trims_each_entry() {
        assert_eq!(string_list("fire, ice , poison"), vec!["fire", "ice", "poison"]);
        assert_eq!(string_list(""), string_list_default());
    }

    #[test]
    fn malformed_input_is_tagged_config_parse() {
        let err = int_list("1,x,3").unwrap_err();
        assert_eq!(common::errors::kind_of(&err), common::ErrorKind::ConfigParse);
    }
}
