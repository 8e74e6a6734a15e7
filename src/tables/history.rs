use chrono::Utc;
use sqlite::Connection;

use crate::codec::{ColumnKind, DateTimePrecision};
use crate::column::Column;
use crate::error::Result;
use crate::table::Table;
use crate::types::{entry_insert, Entry};

pub struct HistoryTable {
    table: Table,
}

impl HistoryTable {
    pub fn new() -> Self {
        let columns = vec![
            Column::new("TIME", ColumnKind::DateTime(DateTimePrecision::Micros))
                .key(true)
                .unique(true),
            Column::new("EVENT", ColumnKind::Text),
        ];
        HistoryTable {
            table: Table::new("HISTORY", columns),
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    /// `time` defaults to now (microsecond precision) when absent.
    pub fn add_event(&self, conn: &Connection, event: &str, time: Option<&str>) -> Result<()> {
        let stamp = match time {
            Some(t) => t.to_string(),
            None => Utc::now().format(DateTimePrecision::Micros.format()).to_string(),
        };
        let mut entry = Entry::new();
        entry_insert(&mut entry, "TIME", stamp.into());
        entry_insert(&mut entry, "EVENT", event.into());
        self.table.insert(conn, &entry, crate::table::InsertMode::Insert)
    }

    /// Always ordered ascending by TIME.
    pub fn iter(&self, conn: &Connection) -> Result<Vec<Entry>> {
        self.table.select(conn, None, &["TIME"], None, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iter_orders_ascending_by_time() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("t.db")).unwrap();
        let table = HistoryTable::new();
        table.table().create(&conn).unwrap();
        table.add_event(&conn, "second", Some("2024-01-02T00:00:00.000000")).unwrap();
        table.add_event(&conn, "first", Some("2024-01-01T00:00:00.000000")).unwrap();
        let events = table.iter(&conn).unwrap();
        let names: Vec<&str> = events
            .iter()
            .map(|e| crate::types::entry_get(e, "EVENT").and_then(crate::types::EntryValue::as_text).unwrap())
            .collect();
        assert_eq!(names, vec!["first", "second"]);
    }
}
