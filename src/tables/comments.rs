use sqlite::Connection;

use crate::codec::{ColumnKind, DateTimePrecision};
use crate::column::Column;
use crate::error::Result;
use crate::selector::Selector;
use crate::table::{InsertMode, Table};
use crate::types::{entry_get, entry_insert, Entry, EntryValue, Value};

pub struct CommentsTable {
    table: Table,
}

impl CommentsTable {
    pub fn new() -> Self {
        let columns = vec![
            Column::new("ID", ColumnKind::Int).key(true).check("{name} > 0"),
            Column::new("PARENT_TABLE", ColumnKind::Text)
                .key(true)
                .check("{name} in ('SUBMISSIONS', 'JOURNALS')"),
            Column::new("PARENT_ID", ColumnKind::Int).key(true).check("{name} > 0"),
            Column::new("REPLY_TO", ColumnKind::Int)
                .not_null(false)
                .check("{name} is null or {name} > 0"),
            Column::new("AUTHOR", ColumnKind::Text).check("length({name}) >= 1"),
            Column::new("DATE", ColumnKind::DateTime(DateTimePrecision::Seconds)),
            Column::new("TEXT", ColumnKind::Text)
                .not_null(false)
                .default(EntryValue::Text(String::new())),
        ];
        CommentsTable {
            table: Table::new("COMMENTS", columns),
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn save_comment(&self, conn: &Connection, entry: &Entry, exist_ok: bool) -> Result<()> {
        let mode = if exist_ok {
            InsertMode::IgnoreExisting
        } else {
            InsertMode::Insert
        };
        self.table.insert(conn, entry, mode)
    }

    /// All comments for the given parent, ordered by ID ascending.
    pub fn get_comments(&self, conn: &Connection, parent_table: &str, parent_id: i64) -> Result<Vec<Entry>> {
        let selector = Selector::And(vec![
            Selector::Eq("PARENT_TABLE".into(), Value::Text(parent_table.to_string())),
            Selector::Eq("PARENT_ID".into(), Value::Int(parent_id)),
        ]);
        self.table.select(conn, Some(&selector), &["ID"], None, None)
    }

    /// A forest: roots have `REPLY_TO = null`; every node gains a `REPLIES`
    /// list of its direct children, built recursively.
    pub fn get_comments_tree(
        &self,
        conn: &Connection,
        parent_table: &str,
        parent_id: i64,
    ) -> Result<Vec<Entry>> {
        let flat = self.get_comments(conn, parent_table, parent_id)?;
        let roots: Vec<i64> = flat
            .iter()
            .filter(|c| entry_get(c, "REPLY_TO").map(EntryValue::is_null).unwrap_or(true))
            .filter_map(|c| entry_get(c, "ID").and_then(EntryValue::as_int))
            .collect();
        Ok(roots.into_iter().map(|id| build_node(&flat, id)).collect())
    }
}

fn build_node(flat: &[Entry], id: i64) -> Entry {
    let mut node = flat
        .iter()
        .find(|c| entry_get(c, "ID").and_then(EntryValue::as_int) == Some(id))
        .cloned()
        .expect("id drawn from flat list");
    let children: Vec<i64> = flat
        .iter()
        .filter(|c| entry_get(c, "REPLY_TO").and_then(EntryValue::as_int) == Some(id))
        .filter_map(|c| entry_get(c, "ID").and_then(EntryValue::as_int))
        .collect();
    let replies: Vec<Entry> = children.into_iter().map(|child_id| build_node(flat, child_id)).collect();
    entry_insert(&mut node, "REPLIES", EntryValue::Json(replies_to_json(&replies)));
    node
}

fn replies_to_json(replies: &[Entry]) -> serde_json::Value {
    serde_json::Value::Array(
        replies
            .iter()
            .map(|r| {
                let mut map = serde_json::Map::new();
                for (k, v) in r {
                    map.insert(k.clone(), entry_value_to_json(v));
                }
                serde_json::Value::Object(map)
            })
            .collect(),
    )
}

fn entry_value_to_json(value: &EntryValue) -> serde_json::Value {
    match value {
        EntryValue::Null => serde_json::Value::Null,
        EntryValue::Int(i) => serde_json::Value::from(*i),
        EntryValue::Real(r) => serde_json::Value::from(*r),
        EntryValue::Bool(b) => serde_json::Value::from(*b),
        EntryValue::Text(s) | EntryValue::DateTime(s) => serde_json::Value::from(s.clone()),
        EntryValue::List(v) | EntryValue::Set(v) => serde_json::Value::from(v.clone()),
        EntryValue::Json(j) => j.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: i64, reply_to: Option<i64>) -> Entry {
        let mut entry = Entry::new();
        entry_insert(&mut entry, "ID", id.into());
        entry_insert(&mut entry, "PARENT_TABLE", "SUBMISSIONS".into());
        entry_insert(&mut entry, "PARENT_ID", 1i64.into());
        entry_insert(
            &mut entry,
            "REPLY_TO",
            match reply_to {
                Some(r) => r.into(),
                None => EntryValue::Null,
            },
        );
        entry_insert(&mut entry, "AUTHOR", "u".into());
        entry_insert(&mut entry, "DATE", "2024-01-01T00:00:00".into());
        entry_insert(&mut entry, "TEXT", "t".into());
        entry
    }

    #[test]
    fn comments_tree_nests_replies() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("t.db")).unwrap();
        let table = CommentsTable::new();
        table.table().create(&conn).unwrap();
        table.save_comment(&conn, &comment(1, None), false).unwrap();
        table.save_comment(&conn, &comment(2, Some(1)), false).unwrap();
        table.save_comment(&conn, &comment(3, Some(2)), false).unwrap();

        let tree = table.get_comments_tree(&conn, "SUBMISSIONS", 1).unwrap();
        assert_eq!(tree.len(), 1);
        let root_replies = entry_get(&tree[0], "REPLIES").unwrap();
        let EntryValue::Json(serde_json::Value::Array(replies)) = root_replies else {
            panic!("expected a replies array");
        };
        assert_eq!(replies.len(), 1);
        let grandchild_replies = replies[0].get("REPLIES").unwrap().as_array().unwrap();
        assert_eq!(grandchild_replies.len(), 1);
    }
}
