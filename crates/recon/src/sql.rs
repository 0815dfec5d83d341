use crate::model::AppliedChange;

/// Where a job's changes land, for static statement output.
#[derive(Debug, Clone)]
pub struct SqlTarget {
    pub table: String,
    pub id_column: String,
    pub state_column: String,
    pub field: String,
    pub eligible_state: String,
}

/// Render one guarded, idempotent `UPDATE` per change. Re-running the file
/// is a no-op: rows already holding the value or no longer eligible are
/// left alone.
pub fn render_update_sql(target: &SqlTarget, changes: &[AppliedChange], generated_at: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "-- {} change(s) to {}.{}\n-- generated {generated_at}\n\n",
        changes.len(),
        target.table,
        target.field
    ));

    for change in changes {
        if let Some(name) = &change.display_name {
            out.push_str(&format!("-- row {}: {}\n", change.row, name.replace('\n', " ")));
        } else {
            out.push_str(&format!("-- row {}\n", change.row));
        }
        out.push_str(&format!(
            "UPDATE {table} SET {field} = {value} WHERE {id} = {id_value} AND {state} = {eligible} AND {field} IS DISTINCT FROM {value};\n",
            table = quote_ident(&target.table),
            field = quote_ident(&target.field),
            value = quote_literal(&change.new),
            id = quote_ident(&target.id_column),
            id_value = quote_literal(change.identifier.as_str()),
            state = quote_ident(&target.state_column),
            eligible = quote_literal(&target.eligible_state),
        ));
    }
    out
}

/// Single-quoted literal with embedded quotes doubled.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Plain identifiers pass through; anything else is double-quoted.
pub fn quote_ident(name: &str) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Identifier;

    fn target() -> SqlTarget {
        SqlTarget {
            table: "swimmers".into(),
            id_column: "id".into(),
            state_column: "enrollment_status".into(),
            field: "parent_name".into(),
            eligible_state: "pending_enrollment".into(),
        }
    }

    #[test]
    fn renders_guarded_update() {
        let changes = vec![AppliedChange {
            row: 4,
            identifier: Identifier::new("0f8fad5b-d9cb-469f-a165-70867728950e"),
            display_name: Some("Ava Lee".into()),
            old: Some("Nobody".into()),
            new: "Mary O'Brien".into(),
        }];
        let sql = render_update_sql(&target(), &changes, "2024-01-01T00:00:00Z");
        assert!(sql.starts_with("-- 1 change(s) to swimmers.parent_name"));
        assert!(sql.contains("-- row 4: Ava Lee"));
        assert!(sql.contains(
            "UPDATE swimmers SET parent_name = 'Mary O''Brien' \
             WHERE id = '0f8fad5b-d9cb-469f-a165-70867728950e' \
             AND enrollment_status = 'pending_enrollment' \
             AND parent_name IS DISTINCT FROM 'Mary O''Brien';"
        ));
    }

    #[test]
    fn empty_change_list_is_header_only() {
        let sql = render_update_sql(&target(), &[], "now");
        assert_eq!(sql.lines().filter(|l| l.starts_with("UPDATE")).count(), 0);
    }

    #[test]
    fn identifiers_quoted_when_needed() {
        assert_eq!(quote_ident("parent_name"), "parent_name");
        assert_eq!(quote_ident("Parent Name"), "\"Parent Name\"");
        assert_eq!(quote_ident("1st"), "\"1st\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
