//! Deduplicated bipartite track/artist graph.
//!
//! Nodes are keyed by catalog ID. Track IDs and artist IDs are assumed to be
//! disjoint; callers must not feed the graph a track and an artist sharing an
//! ID.
//!
//! ## Insertion rules
//!
//! - A track is inserted at most once. Re-inserting a known track ID is a
//!   no-op, including its edges.
//! - An artist keeps the attribute snapshot it was first inserted with. A
//!   later insertion carrying `seen = true` still sets the sticky seen flag.
//! - Edges only ever connect a track to an artist.

use petgraph::graph::{NodeIndex, UnGraph};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::models::{dedup_by_identity, Artist, Track};

/// Node discriminator, persisted as the `node_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Track,
    Artist,
}

impl NodeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Track => "track",
            NodeKind::Artist => "artist",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "track" => Some(NodeKind::Track),
            "artist" => Some(NodeKind::Artist),
            _ => None,
        }
    }
}

/// Node payload: exactly one of track or artist.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Track(Track),
    Artist(Artist),
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Track(t) => &t.id,
            Node::Artist(a) => &a.id,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Track(_) => NodeKind::Track,
            Node::Artist(_) => NodeKind::Artist,
        }
    }
}

pub struct Graph {
    inner: UnGraph<Node, ()>,
    index: FxHashMap<String, NodeIndex>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            inner: UnGraph::default(),
            index: FxHashMap::default(),
        }
    }

    /// Insert a track and its credited artists.
    ///
    /// No-op if the track ID is already present. Otherwise new artists are
    /// inserted with their current attributes, existing artists keep theirs
    /// (apart from the seen flag), and a track–artist edge is added for each.
    pub fn put_track(&mut self, track: Track, artists: Vec<Artist>) {
        if self.index.contains_key(&track.id) {
            return;
        }

        let track_id = track.id.clone();
        let track_idx = self.add_node(Node::Track(track));

        for artist in artists {
            let artist_idx = match self.index_of(&artist.id) {
                Some(idx) => {
                    match &mut self.inner[idx] {
                        Node::Artist(stored) => {
                            if artist.is_seen() && !stored.is_seen() {
                                stored.mark_seen();
                            }
                        }
                        Node::Track(_) => {
                            warn!(
                                "Artist id {} collides with a track node; skipping edge from {}",
                                artist.id, track_id
                            );
                            continue;
                        }
                    }
                    idx
                }
                None => self.add_node(Node::Artist(artist)),
            };
            self.inner.update_edge(track_idx, artist_idx, ());
        }

        debug!("Inserted track {}", track_id);
    }

    /// Dedupe `artists` by identity and drop those already marked seen.
    pub fn unseen_artists(&self, artists: Vec<Artist>) -> Vec<Artist> {
        let seen = self.seen_ids();
        dedup_by_identity(artists)
            .into_iter()
            .filter(|artist| !seen.contains(artist.id.as_str()))
            .collect()
    }

    /// Set the sticky seen flag for `artist`.
    /// An artist not yet in the graph is inserted as an isolated node.
    pub fn mark_seen(&mut self, artist: &Artist) {
        match self.index_of(&artist.id) {
            Some(idx) => match &mut self.inner[idx] {
                Node::Artist(stored) => stored.mark_seen(),
                Node::Track(_) => {
                    warn!("Cannot mark {} seen: id belongs to a track", artist.id);
                }
            },
            None => {
                let mut artist = artist.clone();
                artist.mark_seen();
                self.add_node(Node::Artist(artist));
            }
        }
    }

    pub fn is_seen(&self, id: &str) -> bool {
        self.artist(id).map_or(false, Artist::is_seen)
    }

    /// IDs of all artist nodes currently carrying `seen = true`
    pub fn seen_ids(&self) -> FxHashSet<&str> {
        self.artists()
            .filter(|a| a.is_seen())
            .map(|a| a.id.as_str())
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&idx| &self.inner[idx])
    }

    pub fn track(&self, id: &str) -> Option<&Track> {
        match self.node(id) {
            Some(Node::Track(t)) => Some(t),
            _ => None,
        }
    }

    pub fn artist(&self, id: &str) -> Option<&Artist> {
        match self.node(id) {
            Some(Node::Artist(a)) => Some(a),
            _ => None,
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.inner.node_weights()
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.nodes().filter_map(|n| match n {
            Node::Track(t) => Some(t),
            Node::Artist(_) => None,
        })
    }

    pub fn artists(&self) -> impl Iterator<Item = &Artist> {
        self.nodes().filter_map(|n| match n {
            Node::Artist(a) => Some(a),
            Node::Track(_) => None,
        })
    }

    /// Edges as (track id, artist id) pairs, in no particular order.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.edge_indices().filter_map(move |e| {
            let (a, b) = self.inner.edge_endpoints(e)?;
            match (&self.inner[a], &self.inner[b]) {
                (Node::Track(t), Node::Artist(ar)) | (Node::Artist(ar), Node::Track(t)) => {
                    Some((t.id.as_str(), ar.id.as_str()))
                }
                _ => None,
            }
        })
    }

    /// Neighbors of a node (artists of a track, or tracks of an artist).
    pub fn neighbors(&self, id: &str) -> Vec<&Node> {
        match self.index.get(id) {
            Some(&idx) => self.inner.neighbors(idx).map(|n| &self.inner[n]).collect(),
            None => Vec::new(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.node_count() == 0
    }

    pub fn clear(&mut self) {
        self.inner.clear();
        self.index.clear();
    }

    /// Insert a node unconditionally. Callers check the index first.
    pub(crate) fn add_node(&mut self, node: Node) -> NodeIndex {
        let id = node.id().to_string();
        let idx = self.inner.add_node(node);
        self.index.insert(id, idx);
        idx
    }

    pub(crate) fn index_of(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub(crate) fn add_edge(&mut self, a: NodeIndex, b: NodeIndex) {
        self.inner.update_edge(a, b, ());
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
