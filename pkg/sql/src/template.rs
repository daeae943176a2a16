//! Per-entity-type statement templates, precomputed once and cached
//! (§4.J "per-entity-type metadata cache").

use std::any::TypeId;
use std::collections::HashMap;

use parking_lot::RwLock;

#[derive(Debug, Clone)]
pub struct Templates {
    pub table_name: &'static str,
    pub pk_column: &'static str,
    pub columns: &'static [&'static str],
    pub insert_sql: String,
    pub full_update_sql: String,
    pub delete_sql: String,
}

impl Templates {
    pub fn build(table_name: &'static str, pk_column: &'static str, columns: &'static [&'static str]) -> Self {
        let insert_sql = {
            let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${}", i)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table_name,
                columns.join(", "),
                placeholders.join(", ")
            )
        };

        let full_update_sql = {
            let assignments: Vec<String> = columns
                .iter()
                .enumerate()
                .filter(|(_, c)| **c != pk_column)
                .map(|(i, c)| format!("{} = ${}", c, i + 1))
                .collect();
            format!(
                "UPDATE {} SET {} WHERE {} = ${}",
                table_name,
                assignments.join(", "),
                pk_column,
                columns.iter().filter(|c| **c != pk_column).count() + 1
            )
        };

        let delete_sql = format!("DELETE FROM {} WHERE {} = $1", table_name, pk_column);

        Self {
            table_name,
            pk_column,
            columns,
            insert_sql,
            full_update_sql,
            delete_sql,
        }
    }

    /// Rebuilds the SET list from the entity's current dirty-field-set;
    /// called fresh on every partial update since the dirty set changes
    /// call to call (§4.J "Partial update rebuilds the SET list each
    /// call").
    pub fn partial_update_sql(&self, dirty_fields: &[&str]) -> String {
        let assignments: Vec<String> = dirty_fields
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = ${}", c, i + 1))
            .collect();
        format!(
            "UPDATE {} SET {} WHERE {} = ${}",
            self.table_name,
            assignments.join(", "),
            self.pk_column,
            dirty_fields.len() + 1
        )
    }
}

#[derive(Default)]
pub struct TemplateCache {
    templates: RwLock<HashMap<TypeId, Templates>>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build<T: 'static>(
        &self,
        table_name: &'static str,
        pk_column: &'static str,
        columns: &'static [&'static str],
    ) -> Templates {
        let type_id = TypeId::of::<T>();
        if let Some(templates) = self.templates.read().get(&type_id) {
            return templates.clone();
        }
        let templates = Templates::build(table_name, pk_column, columns);
        self.templates.write().insert(type_id, templates.clone());
        templates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_insert_and_update_templates() {
        let templates = Templates::build("players", "id", &["id", "name", "level"]);
        assert_eq!(
            templates.insert_sql,
            "INSERT INTO players (id, name, level) VALUES ($1, $2, $3)"
        );
        assert_eq!(
            templates.full_update_sql,
            "UPDATE players SET name = $1, level = $2 WHERE id = $3"
        );
        assert_eq!(templates.delete_sql, "DELETE FROM players WHERE id = $1");
    }

    #[test]
    fn partial_update_only_touches_dirty_columns() {
        let templates = Templates::build("players", "id", &["id", "name", "level"]);
        let sql = templates.partial_update_sql(&["level"]);
        assert_eq!(sql, "UPDATE players SET level = $1 WHERE id = $2");
    }
}
