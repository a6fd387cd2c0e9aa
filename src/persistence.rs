//! SQLite persistence for the graph relations.
//!
//! The database holds exactly two tables, `vertices` and `edges`, laid out as
//! described in [`crate::relations`]. Attribute cells are stored as JSON text
//! so lists and flags survive the round trip. Saving replaces both tables in
//! a single transaction.

use anyhow::{Context, Result};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::graph::Graph;
use crate::models::AttrValue;
use crate::progress::{create_progress_bar, Phase};
use crate::relations::{EdgeRow, LoadReport, Relations, VertexRow, Vertices, ATTR_PREFIX};

pub const VERTICES_TABLE: &str = "vertices";
pub const EDGES_TABLE: &str = "edges";

/// Fixed vertex columns, in storage order
const VERTEX_COLUMNS: [&str; 5] = ["id", "name", "node_type", "album", "album_type"];

/// Quote an identifier. Attribute columns contain a dot.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Connection settings for a crawl database
pub fn configure(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(())
}

/// Names of user tables in the database
pub(crate) fn table_names(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
         ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(names)
}

/// Column names of `table`, in declaration order
pub(crate) fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| row.get(1))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(columns)
}

fn encode_cell(value: &AttrValue) -> Result<String> {
    serde_json::to_string(value).context("Failed to encode attribute cell")
}

/// Decode one stored attribute cell. None for null and for cells that do not
/// hold a supported value.
fn decode_cell(id: &str, column: &str, cell: Value) -> Option<AttrValue> {
    match cell {
        Value::Null => None,
        Value::Integer(n) => Some(AttrValue::Number(n as f64)),
        Value::Real(n) => Some(AttrValue::Number(n)),
        Value::Text(text) => match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Vertex {} has undecodable {} ({}); treating as null", id, column, e);
                None
            }
        },
        Value::Blob(_) => {
            warn!("Vertex {} has a blob in {}; treating as null", id, column);
            None
        }
    }
}

/// Replace the stored relations with `relations`.
pub fn save_relations(conn: &mut Connection, relations: &Relations) -> Result<()> {
    let attr_columns = relations.vertices.attr_columns();
    let all_columns: Vec<String> = VERTEX_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(attr_columns.iter().cloned())
        .collect();

    let attr_defs: String = attr_columns
        .iter()
        .map(|c| format!(",\n            {} TEXT", quote_ident(c)))
        .collect();

    let tx = conn.transaction()?;
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {vertices};
         DROP TABLE IF EXISTS {edges};

         CREATE TABLE {vertices} (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            node_type TEXT NOT NULL,
            album TEXT,
            album_type TEXT{attr_defs}
         );

         CREATE TABLE {edges} (
            source TEXT NOT NULL,
            target TEXT NOT NULL
         );",
        vertices = VERTICES_TABLE,
        edges = EDGES_TABLE,
        attr_defs = attr_defs,
    ))?;

    let total = (relations.vertices.len() + relations.edges.len()) as u64;
    let pb = create_progress_bar(Phase::Save, total, "Saving graph");
    {
        let placeholders: Vec<String> = (1..=all_columns.len()).map(|i| format!("?{}", i)).collect();
        let quoted: Vec<String> = all_columns.iter().map(|c| quote_ident(c)).collect();
        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {} ({}) VALUES ({})",
            VERTICES_TABLE,
            quoted.join(", "),
            placeholders.join(", ")
        ))?;

        for row in &relations.vertices.rows {
            let mut values: Vec<Option<String>> = vec![
                Some(row.id.clone()),
                Some(row.name.clone()),
                Some(row.node_type.clone()),
                row.album.clone(),
                row.album_type.clone(),
            ];
            for column in &attr_columns {
                let cell = match row.attrs.get(column) {
                    Some(value) => Some(encode_cell(value)?),
                    None => None,
                };
                values.push(cell);
            }
            stmt.execute(params_from_iter(values.iter()))
                .with_context(|| format!("Failed to write vertex {}", row.id))?;
            pb.inc(1);
        }

        let mut stmt = tx.prepare(&format!(
            "INSERT INTO {} (source, target) VALUES (?1, ?2)",
            EDGES_TABLE
        ))?;
        for edge in &relations.edges {
            stmt.execute(params![edge.source, edge.target])?;
            pb.inc(1);
        }
    }
    tx.commit()?;

    pb.finish_with_message(format!(
        "Saved {} vertices and {} edges",
        relations.vertices.len(),
        relations.edges.len()
    ));
    info!(
        "Saved {} vertices, {} edges ({} attribute columns)",
        relations.vertices.len(),
        relations.edges.len(),
        attr_columns.len()
    );
    Ok(())
}

/// Read one text cell. Numbers are rendered as text; NULL and blobs yield None.
fn text_cell(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match row.get::<_, Value>(idx)? {
        Value::Text(text) => Some(text),
        Value::Integer(n) => Some(n.to_string()),
        Value::Real(n) => Some(n.to_string()),
        Value::Null | Value::Blob(_) => None,
    })
}

/// Read the stored relations. None when the database has no graph yet.
///
/// Rows missing an id, name, node type or edge endpoint are logged and
/// skipped; the returned report counts them in `vertices_skipped` and
/// `edges_skipped`.
pub fn load_relations(conn: &Connection) -> Result<Option<(Relations, LoadReport)>> {
    let tables = table_names(conn)?;
    let has = |name: &str| tables.iter().any(|t| t == name);
    if !has(VERTICES_TABLE) || !has(EDGES_TABLE) {
        return Ok(None);
    }

    let stored_columns = table_columns(conn, VERTICES_TABLE)?;
    let attr_columns: Vec<String> = stored_columns
        .iter()
        .filter(|c| c.starts_with(ATTR_PREFIX))
        .cloned()
        .collect();

    // Fixed columns a foreign writer left out read as NULL
    let select_columns: Vec<String> = VERTEX_COLUMNS
        .iter()
        .map(|c| {
            if stored_columns.iter().any(|s| s == c) {
                quote_ident(c)
            } else {
                "NULL".to_string()
            }
        })
        .chain(attr_columns.iter().map(|c| quote_ident(c)))
        .collect();
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} ORDER BY rowid",
        select_columns.join(", "),
        VERTICES_TABLE
    ))?;

    let mut report = LoadReport::default();
    let mut rows = Vec::new();
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        let (id, name, node_type) = (text_cell(row, 0)?, text_cell(row, 1)?, text_cell(row, 2)?);
        let (Some(id), Some(name), Some(node_type)) = (id.clone(), name, node_type) else {
            warn!(
                "Vertex {} is missing its id, name or node_type; skipping",
                id.as_deref().unwrap_or("<null>")
            );
            report.vertices_skipped += 1;
            continue;
        };

        let mut attrs = BTreeMap::new();
        for (offset, column) in attr_columns.iter().enumerate() {
            let cell: Value = row.get(VERTEX_COLUMNS.len() + offset)?;
            if let Some(value) = decode_cell(&id, column, cell) {
                attrs.insert(column.clone(), value);
            }
        }
        rows.push(VertexRow {
            id,
            name,
            node_type,
            album: text_cell(row, 3)?,
            album_type: text_cell(row, 4)?,
            attrs,
        });
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT source, target FROM {} ORDER BY rowid",
        EDGES_TABLE
    ))?;
    let mut edges = Vec::new();
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        match (text_cell(row, 0)?, text_cell(row, 1)?) {
            (Some(source), Some(target)) => edges.push(EdgeRow { source, target }),
            (source, target) => {
                warn!(
                    "Edge {} - {} has a null endpoint; skipping",
                    source.as_deref().unwrap_or("<null>"),
                    target.as_deref().unwrap_or("<null>")
                );
                report.edges_skipped += 1;
            }
        }
    }

    let relations = Relations {
        vertices: Vertices { rows },
        edges,
    };
    Ok(Some((relations, report)))
}

pub fn save_graph(conn: &mut Connection, graph: &Graph) -> Result<()> {
    save_relations(conn, &graph.to_relations())
}

/// Rebuild the stored graph. None when the database has no graph yet.
pub fn load_graph(conn: &Connection) -> Result<Option<(Graph, LoadReport)>> {
    let Some((relations, stored)) = load_relations(conn)? else {
        return Ok(None);
    };
    let (graph, mut report) = Graph::with_relations(&relations);
    report.vertices_skipped += stored.vertices_skipped;
    report.edges_skipped += stored.edges_skipped;
    Ok(Some((graph, report)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::fixture_tracks;
    use crate::models::{Artist, Attrs, GENRES, POPULARITY};

    fn crawled_graph() -> Graph {
        let mut graph = Graph::new();
        for (mut track, mut artists) in fixture_tracks() {
            let mut features = Attrs::new();
            features.insert("danceability", 0.71);
            features.insert("key", 5.0);
            track.set_attrs(features);

            let mut attrs = Attrs::new();
            attrs.insert(POPULARITY, 64.0);
            attrs.insert(GENRES, vec!["chicago rap".to_string(), "indie soul".to_string()]);
            artists[0].set_attrs(attrs);
            graph.put_track(track, artists);
        }
        let mut noname = Artist::new("0001", "Noname");
        noname.mark_seen();
        graph.mark_seen(&noname);
        graph
    }

    #[test]
    fn test_empty_database_has_no_graph() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(load_graph(&conn).unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_graph() {
        let mut conn = Connection::open_in_memory().unwrap();
        let graph = crawled_graph();
        save_graph(&mut conn, &graph).unwrap();

        let (restored, report) = load_graph(&conn).unwrap().unwrap();
        assert_eq!(report.vertices_loaded, 8);
        assert_eq!(report.edges_loaded, 7);
        for node in graph.nodes() {
            assert_eq!(restored.node(node.id()), Some(node));
        }
        assert!(restored.is_seen("0001"));
        assert!(!restored.is_seen("0002"));
        assert_eq!(
            restored.artist("0001").and_then(|a| a.genres()).map(|g| g.len()),
            Some(2)
        );
    }

    #[test]
    fn test_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        save_graph(&mut conn, &crawled_graph()).unwrap();

        assert_eq!(table_names(&conn).unwrap(), vec!["edges", "vertices"]);
        assert_eq!(
            table_columns(&conn, VERTICES_TABLE).unwrap(),
            vec![
                "id",
                "name",
                "node_type",
                "album",
                "album_type",
                "attr.danceability",
                "attr.genres",
                "attr.key",
                "attr.popularity",
                "attr.seen",
            ]
        );

        // Attributes that a node lacks are stored as null
        let popularity: Option<String> = conn
            .query_row(
                "SELECT \"attr.popularity\" FROM vertices WHERE id = '000'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(popularity, None);

        let genres: String = conn
            .query_row(
                "SELECT \"attr.genres\" FROM vertices WHERE id = '0001'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(genres, r#"["chicago rap","indie soul"]"#);
    }

    #[test]
    fn test_save_replaces_previous_graph() {
        let mut conn = Connection::open_in_memory().unwrap();
        save_graph(&mut conn, &crawled_graph()).unwrap();
        save_graph(&mut conn, &Graph::new()).unwrap();

        let (restored, _) = load_graph(&conn).unwrap().unwrap();
        assert!(restored.is_empty());
        assert_eq!(table_columns(&conn, VERTICES_TABLE).unwrap().len(), 5);
    }

    #[test]
    fn test_rows_with_null_cells_are_skipped() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE vertices (id TEXT, name TEXT, node_type TEXT, album TEXT, album_type TEXT, \"attr.seen\" TEXT);
             CREATE TABLE edges (source TEXT, target TEXT);
             INSERT INTO vertices VALUES
                ('000', 'Diddy Bop', 'track', 'Telefone', 'album', NULL),
                ('0001', 'Noname', 'artist', NULL, NULL, 'true'),
                ('0002', NULL, 'artist', NULL, NULL, NULL),
                (NULL, 'Nobody', 'artist', NULL, NULL, NULL);
             INSERT INTO edges VALUES ('000', '0001'), ('000', NULL), ('000', '0002');",
        )
        .unwrap();

        let (graph, report) = load_graph(&conn).unwrap().unwrap();
        assert_eq!(report.vertices_loaded, 2);
        assert_eq!(report.vertices_skipped, 2);
        assert_eq!(report.edges_loaded, 1);
        assert_eq!(report.edges_skipped, 2);
        assert!(graph.is_seen("0001"));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_missing_album_columns_read_as_null() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE vertices (id TEXT, name TEXT, node_type TEXT);
             CREATE TABLE edges (source TEXT, target TEXT);
             INSERT INTO vertices VALUES ('0001', 'Noname', 'artist');",
        )
        .unwrap();

        let (graph, report) = load_graph(&conn).unwrap().unwrap();
        assert_eq!(report.vertices_loaded, 1);
        assert_eq!(graph.artist("0001").map(|a| a.name.as_str()), Some("Noname"));
    }

    #[test]
    fn test_loose_cells_are_tolerated() {
        let mut conn = Connection::open_in_memory().unwrap();
        save_graph(&mut conn, &crawled_graph()).unwrap();
        conn.execute_batch(
            "UPDATE vertices SET \"attr.popularity\" = 'not json' WHERE id = '0001';
             UPDATE vertices SET \"attr.key\" = 7 WHERE id = '111';",
        )
        .unwrap();

        let (restored, _) = load_graph(&conn).unwrap().unwrap();
        assert_eq!(restored.artist("0001").and_then(|a| a.popularity()), None);
        assert_eq!(
            restored.track("111").and_then(|t| t.attrs.get("key")),
            Some(&AttrValue::Number(7.0))
        );
    }
}
