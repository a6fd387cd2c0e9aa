//! Tabular projection of the graph: one `vertices` relation and one `edges`
//! relation.
//!
//! ## Vertices
//!
//! | column       | track        | artist |
//! |--------------|--------------|--------|
//! | `id`         | track id     | artist id |
//! | `name`       | display name | display name |
//! | `node_type`  | `track`      | `artist` |
//! | `album`      | album name   | null |
//! | `album_type` | album type   | null |
//! | `attr.<key>` | feature      | `popularity`, `genres`, `seen` |
//!
//! A null `attr.*` cell means the key is absent from the node's attributes.
//!
//! ## Edges
//!
//! One `(source, target)` row per edge where `source` is the track id and
//! `target` the artist id.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use rustc_hash::FxHashSet;
use tracing::{info, warn};

use crate::graph::{Graph, Node, NodeKind};
use crate::models::{AlbumType, Artist, AttrValue, Attrs, Track};

/// Prefix for namespaced attribute columns
pub const ATTR_PREFIX: &str = "attr.";

/// Column name for an attribute key
pub fn attr_column(key: &str) -> String {
    format!("{}{}", ATTR_PREFIX, key)
}

/// One vertex row. `node_type` is kept raw so unrecognized values survive
/// until reconstruction decides to skip them.
#[derive(Clone, Debug, PartialEq)]
pub struct VertexRow {
    pub id: String,
    pub name: String,
    pub node_type: String,
    pub album: Option<String>,
    pub album_type: Option<String>,
    /// Non-null attribute cells keyed by full column name (`attr.<key>`)
    pub attrs: BTreeMap<String, AttrValue>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Vertices {
    pub rows: Vec<VertexRow>,
}

impl Vertices {
    /// Sorted union of the attribute columns used by any row
    pub fn attr_columns(&self) -> Vec<String> {
        let columns: BTreeSet<&String> = self.rows.iter().flat_map(|r| r.attrs.keys()).collect();
        columns.into_iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EdgeRow {
    pub source: String,
    pub target: String,
}

/// Both relations together, as persisted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Relations {
    pub vertices: Vertices,
    pub edges: Vec<EdgeRow>,
}

/// Outcome of rebuilding a graph from relations.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoadReport {
    pub vertices_loaded: usize,
    pub vertices_skipped: usize,
    pub edges_loaded: usize,
    pub edges_skipped: usize,
}

fn flatten_attrs(attrs: &Attrs) -> BTreeMap<String, AttrValue> {
    attrs
        .iter()
        .map(|(k, v)| (attr_column(k), v.clone()))
        .collect()
}

fn unflatten_attrs(cells: &BTreeMap<String, AttrValue>) -> Attrs {
    cells
        .iter()
        .filter_map(|(column, value)| {
            column
                .strip_prefix(ATTR_PREFIX)
                .map(|key| (key.to_string(), value.clone()))
        })
        .collect()
}

impl VertexRow {
    fn from_node(node: &Node) -> Self {
        match node {
            Node::Track(t) => VertexRow {
                id: t.id.clone(),
                name: t.name.clone(),
                node_type: NodeKind::Track.as_str().to_string(),
                album: Some(t.album.clone()),
                album_type: t.album_type.as_str().map(str::to_string),
                attrs: flatten_attrs(&t.attrs),
            },
            Node::Artist(a) => VertexRow {
                id: a.id.clone(),
                name: a.name.clone(),
                node_type: NodeKind::Artist.as_str().to_string(),
                album: None,
                album_type: None,
                attrs: flatten_attrs(&a.attrs),
            },
        }
    }

    fn to_node(&self) -> Option<Node> {
        let attrs = unflatten_attrs(&self.attrs);
        match NodeKind::parse(&self.node_type)? {
            NodeKind::Track => Some(Node::Track(
                Track::new(
                    self.id.clone(),
                    self.name.clone(),
                    self.album.clone().unwrap_or_default(),
                    AlbumType::from(self.album_type.as_deref()),
                )
                .with_attrs(attrs),
            )),
            NodeKind::Artist => Some(Node::Artist(
                Artist::new(self.id.clone(), self.name.clone()).with_attrs(attrs),
            )),
        }
    }
}

impl Graph {
    /// Project the graph onto (vertices, edges). Tracks come first.
    pub fn to_relations(&self) -> Relations {
        let tracks = self.nodes().filter(|n| n.kind() == NodeKind::Track);
        let artists = self.nodes().filter(|n| n.kind() == NodeKind::Artist);
        let rows = tracks.chain(artists).map(VertexRow::from_node).collect();

        let edges = self
            .edges()
            .map(|(track_id, artist_id)| EdgeRow {
                source: track_id.to_string(),
                target: artist_id.to_string(),
            })
            .collect();

        Relations {
            vertices: Vertices { rows },
            edges,
        }
    }

    /// Replace the whole graph with the one described by `vertices` and `edges`.
    ///
    /// Rows with an unknown `node_type` or a duplicate id are skipped, as are
    /// edges that do not join a known track to a known artist.
    pub fn from_relations(&mut self, vertices: &Vertices, edges: &[EdgeRow]) -> LoadReport {
        self.clear();
        let mut report = LoadReport::default();

        for row in &vertices.rows {
            if self.contains(&row.id) {
                warn!("Duplicate vertex {} found; skipping", row.id);
                report.vertices_skipped += 1;
                continue;
            }
            match row.to_node() {
                Some(node) => {
                    self.add_node(node);
                    report.vertices_loaded += 1;
                }
                None => {
                    warn!(
                        "Vertex {} has unknown node_type '{}'; skipping",
                        row.id, row.node_type
                    );
                    report.vertices_skipped += 1;
                }
            }
        }

        let mut loaded: FxHashSet<(&str, &str)> = FxHashSet::default();
        for edge in edges {
            let endpoints = (
                self.node(&edge.source).map(Node::kind),
                self.node(&edge.target).map(Node::kind),
            );
            let valid = matches!(
                endpoints,
                (Some(NodeKind::Track), Some(NodeKind::Artist))
                    | (Some(NodeKind::Artist), Some(NodeKind::Track))
            );
            if !valid {
                warn!(
                    "Edge {} - {} does not join a known track and artist; skipping",
                    edge.source, edge.target
                );
                report.edges_skipped += 1;
                continue;
            }

            if let (Some(a), Some(b)) = (self.index_of(&edge.source), self.index_of(&edge.target)) {
                self.add_edge(a, b);
            }
            if loaded.insert((edge.source.as_str(), edge.target.as_str())) {
                report.edges_loaded += 1;
            }
        }

        info!(
            "Loaded graph: {} vertices ({} skipped), {} edges ({} skipped)",
            report.vertices_loaded,
            report.vertices_skipped,
            report.edges_loaded,
            report.edges_skipped
        );
        report
    }

    /// Build a fresh graph from relations.
    pub fn with_relations(relations: &Relations) -> (Self, LoadReport) {
        let mut graph = Graph::new();
        let report = graph.from_relations(&relations.vertices, &relations.edges);
        (graph, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::fixture_tracks;
    use crate::models::{GENRES, POPULARITY};

    fn crawled_graph() -> Graph {
        let mut graph = Graph::new();
        for (mut track, mut artists) in fixture_tracks() {
            let mut features = Attrs::new();
            features.insert("danceability", 0.71);
            features.insert("energy", 0.52);
            track.set_attrs(features);

            let mut first = Attrs::new();
            first.insert(POPULARITY, 64.0);
            first.insert(GENRES, vec!["chicago rap".to_string(), "indie soul".to_string()]);
            artists[0].set_attrs(first);
            graph.put_track(track, artists);
        }
        let mut raury = Artist::new("0003", "Raury");
        raury.mark_seen();
        graph.mark_seen(&raury);
        graph
    }

    fn sorted_edges(graph: &Graph) -> Vec<(String, String)> {
        let mut edges: Vec<(String, String)> = graph
            .edges()
            .map(|(t, a)| (t.to_string(), a.to_string()))
            .collect();
        edges.sort();
        edges
    }

    #[test]
    fn test_to_relations_shape() {
        let graph = crawled_graph();
        let relations = graph.to_relations();

        let ids: Vec<&str> = relations.vertices.rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["000", "111", "222", "0001", "0002", "0003", "2222", "2223"]);

        let diddy = &relations.vertices.rows[0];
        assert_eq!(diddy.node_type, "track");
        assert_eq!(diddy.album.as_deref(), Some("Telefone"));
        assert_eq!(diddy.album_type.as_deref(), Some("album"));
        assert_eq!(diddy.attrs.get("attr.danceability"), Some(&AttrValue::Number(0.71)));

        let noname = &relations.vertices.rows[3];
        assert_eq!(noname.node_type, "artist");
        assert_eq!(noname.album, None);
        assert_eq!(noname.album_type, None);
        assert_eq!(noname.attrs.get("attr.popularity"), Some(&AttrValue::Number(64.0)));

        assert_eq!(
            relations.vertices.attr_columns(),
            vec!["attr.danceability", "attr.energy", "attr.genres", "attr.popularity", "attr.seen"]
        );
        assert_eq!(relations.edges.len(), 7);
    }

    #[test]
    fn test_round_trip() {
        let graph = crawled_graph();
        let relations = graph.to_relations();

        let (restored, report) = Graph::with_relations(&relations);
        assert_eq!(report.vertices_loaded, 8);
        assert_eq!(report.vertices_skipped, 0);
        assert_eq!(report.edges_loaded, 7);

        assert_eq!(restored.node_count(), graph.node_count());
        for node in graph.nodes() {
            assert_eq!(restored.node(node.id()), Some(node));
        }
        assert_eq!(sorted_edges(&restored), sorted_edges(&graph));
        assert!(restored.is_seen("0003"));
        assert!(!restored.is_seen("0001"));
    }

    #[test]
    fn test_album_types_round_trip() {
        let mut graph = Graph::new();
        graph.put_track(
            Track::new("t1", "Untitled", "Loose", AlbumType::Unknown),
            vec![Artist::new("a1", "Someone")],
        );
        graph.put_track(
            Track::new("t2", "Guest Verse", "Compilation Vol. 2", AlbumType::Other("appears_on".to_string())),
            vec![Artist::new("a1", "Someone")],
        );

        let relations = graph.to_relations();
        assert_eq!(relations.vertices.rows[0].album_type, None);
        assert_eq!(relations.vertices.rows[1].album_type.as_deref(), Some("appears_on"));

        let (restored, _) = Graph::with_relations(&relations);
        assert_eq!(restored.track("t1").map(|t| &t.album_type), Some(&AlbumType::Unknown));
        assert_eq!(
            restored.track("t2").map(|t| &t.album_type),
            Some(&AlbumType::Other("appears_on".to_string()))
        );
    }

    #[test]
    fn test_from_relations_replaces_graph() {
        let mut graph = crawled_graph();
        let mut other = Graph::new();
        other.put_track(
            Track::new("x", "Other", "Elsewhere", AlbumType::Single),
            vec![Artist::new("y", "Somebody")],
        );
        let relations = other.to_relations();

        graph.from_relations(&relations.vertices, &relations.edges);
        assert_eq!(graph.node_count(), 2);
        assert!(!graph.contains("000"));
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let mut relations = crawled_graph().to_relations();
        relations.vertices.rows.push(VertexRow {
            id: "weird".to_string(),
            name: "Weird".to_string(),
            node_type: "podcast".to_string(),
            album: None,
            album_type: None,
            attrs: BTreeMap::new(),
        });
        relations.edges.push(EdgeRow {
            source: "000".to_string(),
            target: "weird".to_string(),
        });
        relations.edges.push(EdgeRow {
            source: "000".to_string(),
            target: "111".to_string(),
        });

        let (graph, report) = Graph::with_relations(&relations);
        assert_eq!(report.vertices_skipped, 1);
        assert_eq!(report.edges_skipped, 2);
        assert_eq!(graph.node_count(), 8);
        assert_eq!(graph.edge_count(), 7);
    }
}
