//! Safety checks run before a crawl writes to its database.
//!
//! Saving drops and recreates the `vertices` and `edges` tables, so pointing
//! the crawler at an unrelated SQLite file would destroy data. These checks
//! refuse to proceed unless the database is empty or already looks like a
//! crawl graph.

use anyhow::{bail, Result};
use rusqlite::Connection;
use std::path::Path;

use crate::persistence::{table_columns, table_names, EDGES_TABLE, VERTICES_TABLE};

/// Validates that the database at `path` is safe to overwrite with a graph.
///
/// Checks:
/// - The path is not a directory
/// - The database holds no tables besides `vertices` and `edges`
/// - An existing `vertices` table carries the fixed vertex columns
/// - An existing `edges` table carries `source` and `target`
pub fn validate_graph_db(path: &Path, conn: &Connection) -> Result<()> {
    if path.is_dir() {
        bail!("Safety check failed: '{}' is a directory", path.display());
    }

    for table in table_names(conn)? {
        if table != VERTICES_TABLE && table != EDGES_TABLE {
            bail!(
                "Safety check failed: '{}' contains table '{}' and does not look like a crawl graph",
                path.display(),
                table
            );
        }
        let required: &[&str] = if table == VERTICES_TABLE {
            &["id", "name", "node_type"]
        } else {
            &["source", "target"]
        };
        let columns = table_columns(conn, &table)?;
        for column in required {
            if !columns.iter().any(|c| c == column) {
                bail!(
                    "Safety check failed: table '{}' in '{}' has no '{}' column",
                    table,
                    path.display(),
                    column
                );
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::persistence::save_graph;
    use std::path::PathBuf;

    fn db_path() -> PathBuf {
        PathBuf::from("/tmp/artist-graph.sqlite3")
    }

    #[test]
    fn test_empty_database_is_safe() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(validate_graph_db(&db_path(), &conn).is_ok());
    }

    #[test]
    fn test_graph_database_is_safe() {
        let mut conn = Connection::open_in_memory().unwrap();
        save_graph(&mut conn, &Graph::new()).unwrap();
        assert!(validate_graph_db(&db_path(), &conn).is_ok());
    }

    #[test]
    fn test_foreign_table_blocked() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE tracks (id INTEGER PRIMARY KEY, title TEXT);")
            .unwrap();
        let result = validate_graph_db(&db_path(), &conn);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("contains table 'tracks'"));
    }

    #[test]
    fn test_foreign_vertices_table_blocked() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE vertices (x INTEGER, y INTEGER);")
            .unwrap();
        let result = validate_graph_db(&db_path(), &conn);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("has no 'id' column"));
    }

    #[test]
    fn test_directory_blocked() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(validate_graph_db(&std::env::temp_dir(), &conn).is_err());
    }
}
