//! View services: Browse, BrowseNext, TranslateBrowsePathsToNodeIds.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::address_space::{BrowseIter, BrowsePathResult};
use crate::model::{BrowseDescription, NodeId, QualifiedName, ReferenceDescription, StatusCode};
use crate::runtime::{ServerRuntime, SessionId};
use crate::{Error, Result};

/// Open browse continuations a session may hold.
pub const MAX_BROWSE_CONTINUATION_POINTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeToBrowse {
    pub node_id: NodeId,
    pub description: BrowseDescription,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowseRequest {
    /// 0 means no limit.
    pub max_references_per_node: u32,
    pub nodes_to_browse: Vec<NodeToBrowse>,
}

impl BrowseRequest {
    pub fn new(max_references_per_node: u32) -> Self {
        Self { max_references_per_node, nodes_to_browse: Vec::new() }
    }

    pub fn node(mut self, node_id: NodeId, description: BrowseDescription) -> Self {
        self.nodes_to_browse.push(NodeToBrowse { node_id, description });
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrowseContinuationPoint(pub u64);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowseResult {
    pub status: StatusCode,
    pub continuation_point: Option<BrowseContinuationPoint>,
    pub references: Vec<ReferenceDescription>,
}

impl BrowseResult {
    fn failed(status: StatusCode) -> Self {
        Self { status, continuation_point: None, references: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowseResponse {
    pub results: Vec<BrowseResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowseNextRequest {
    /// Free the continuation points without reading further.
    pub release_continuation_points: bool,
    pub continuation_points: Vec<BrowseContinuationPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowsePath {
    pub starting_node: NodeId,
    pub relative_path: Vec<QualifiedName>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateBrowsePathsRequest {
    pub browse_paths: Vec<BrowsePath>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateBrowsePathsResponse {
    pub results: Vec<BrowsePathResult>,
}

// ============================================================================
// Continuation points
// ============================================================================

struct Cursor {
    id: BrowseContinuationPoint,
    node_id: NodeId,
    description: BrowseDescription,
    max_references: usize,
    position: usize,
}

/// Open browse continuations, per session.
#[derive(Default)]
pub(crate) struct BrowseCursors {
    sessions: Mutex<HashMap<SessionId, Vec<Cursor>>>,
    next_id: AtomicU64,
}

impl BrowseCursors {
    fn open(&self, session: SessionId, node_id: NodeId, description: BrowseDescription, max_references: usize, position: usize) -> Result<BrowseContinuationPoint> {
        let mut sessions = self.sessions.lock();
        let cursors = sessions.entry(session).or_default();
        if cursors.len() >= MAX_BROWSE_CONTINUATION_POINTS {
            return Err(Error::InvalidContinuationPoint);
        }
        let id = BrowseContinuationPoint(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        cursors.push(Cursor { id, node_id, description, max_references, position });
        Ok(id)
    }

    fn take(&self, session: SessionId, id: BrowseContinuationPoint) -> Option<Cursor> {
        let mut sessions = self.sessions.lock();
        let cursors = sessions.get_mut(&session)?;
        let index = cursors.iter().position(|c| c.id == id)?;
        Some(cursors.remove(index))
    }

    pub fn release_session(&self, session: SessionId) {
        self.sessions.lock().remove(&session);
    }
}

// ============================================================================
// Handlers
// ============================================================================

impl ServerRuntime {
    pub fn browse(&self, session: SessionId, request: &BrowseRequest) -> Result<BrowseResponse> {
        self.check_session(session)?;
        let access = self.access();
        let max = request.max_references_per_node as usize;
        let results = request
            .nodes_to_browse
            .iter()
            .map(|n| {
                if !access.allow_browse_node(session, &n.node_id) {
                    return BrowseResult::failed(StatusCode::BAD_USER_ACCESS_DENIED);
                }
                match self.space.browse(&n.node_id, n.description.clone()) {
                    Ok(iter) => self.browse_page(session, iter, &n.node_id, &n.description, max),
                    Err(e) => BrowseResult::failed(e.status_code()),
                }
            })
            .collect();
        Ok(BrowseResponse { results })
    }

    pub fn browse_next(&self, session: SessionId, request: &BrowseNextRequest) -> Result<BrowseResponse> {
        self.check_session(session)?;
        let results = request
            .continuation_points
            .iter()
            .map(|cp| {
                let Some(cursor) = self.browse_cursors.take(session, *cp) else {
                    return BrowseResult::failed(StatusCode::BAD_CONTINUATION_POINT_INVALID);
                };
                if request.release_continuation_points {
                    return BrowseResult::failed(StatusCode::GOOD);
                }
                match self.space.browse(&cursor.node_id, cursor.description.clone()) {
                    Ok(mut iter) => {
                        iter.resume_at(cursor.position);
                        self.browse_page(session, iter, &cursor.node_id, &cursor.description, cursor.max_references)
                    }
                    Err(e) => BrowseResult::failed(e.status_code()),
                }
            })
            .collect();
        Ok(BrowseResponse { results })
    }

    /// Up to `max` rows (0: all); opens a continuation point if more remain.
    fn browse_page(
        &self,
        session: SessionId,
        mut iter: BrowseIter<'_>,
        node_id: &NodeId,
        description: &BrowseDescription,
        max: usize,
    ) -> BrowseResult {
        let mut references = Vec::new();
        loop {
            if max > 0 && references.len() == max {
                let resume = iter.position();
                if iter.next().is_none() {
                    break;
                }
                return match self.browse_cursors.open(session, node_id.clone(), description.clone(), max, resume) {
                    Ok(cp) => BrowseResult { status: StatusCode::GOOD, continuation_point: Some(cp), references },
                    Err(_) => BrowseResult::failed(StatusCode::BAD_NO_CONTINUATION_POINTS),
                };
            }
            match iter.next() {
                Some(r) => references.push(r),
                None => break,
            }
        }
        BrowseResult { status: StatusCode::GOOD, continuation_point: None, references }
    }

    pub fn translate_browse_paths(&self, session: SessionId, request: &TranslateBrowsePathsRequest) -> Result<TranslateBrowsePathsResponse> {
        self.check_session(session)?;
        let results = request
            .browse_paths
            .iter()
            .map(|p| self.space.translate_browse_path(&p.starting_node, &p.relative_path))
            .collect();
        Ok(TranslateBrowsePathsResponse { results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::model::ids;

    fn session(rt: &ServerRuntime) -> SessionId {
        let s = rt.create_session("s", 0.0).unwrap();
        rt.activate_session(s.id, None).unwrap();
        s.id
    }

    #[test]
    fn test_paged_browse_with_continuation() {
        let rt = ServerRuntime::new(ServerConfig::default()).unwrap();
        let s = session(&rt);
        let folder = rt.address_space().add_folder(&NodeId::OBJECTS, "Tags", 1).unwrap();
        for i in 0..5i32 {
            rt.address_space().add_variable(&folder, &format!("T{i}"), i, 1).unwrap();
        }
        let request = BrowseRequest::new(2).node(folder.clone(), BrowseDescription::forward(ids::HAS_COMPONENT));

        let first = rt.browse(s, &request).unwrap().results.remove(0);
        assert_eq!(first.references.len(), 2);
        let mut cp = first.continuation_point.expect("more rows");
        let mut seen = first.references.len();
        loop {
            let next = rt
                .browse_next(s, &BrowseNextRequest { release_continuation_points: false, continuation_points: vec![cp] })
                .unwrap()
                .results
                .remove(0);
            assert_eq!(next.status, StatusCode::GOOD);
            seen += next.references.len();
            match next.continuation_point {
                Some(p) => cp = p,
                None => break,
            }
        }
        assert_eq!(seen, 5);
        assert_eq!(rt.browse_cursors.sessions.lock().get(&s).map_or(0, Vec::len), 0);

        let stale = rt
            .browse_next(s, &BrowseNextRequest { release_continuation_points: false, continuation_points: vec![cp] })
            .unwrap();
        assert_eq!(stale.results[0].status, StatusCode::BAD_CONTINUATION_POINT_INVALID);
    }

    #[test]
    fn test_continuation_points_are_bounded_per_session() {
        let rt = ServerRuntime::new(ServerConfig::default()).unwrap();
        let s = session(&rt);
        let folder = rt.address_space().add_folder(&NodeId::OBJECTS, "Tags", 1).unwrap();
        for i in 0..3i32 {
            rt.address_space().add_variable(&folder, &format!("T{i}"), i, 1).unwrap();
        }
        let request = BrowseRequest::new(1).node(folder, BrowseDescription::forward(ids::HAS_COMPONENT));
        for _ in 0..MAX_BROWSE_CONTINUATION_POINTS {
            assert!(rt.browse(s, &request).unwrap().results[0].continuation_point.is_some());
        }
        let over = rt.browse(s, &request).unwrap();
        assert_eq!(over.results[0].status, StatusCode::BAD_NO_CONTINUATION_POINTS);

        rt.close_session(s).unwrap();
        assert_eq!(rt.browse_cursors.sessions.lock().get(&s).map_or(0, Vec::len), 0);
    }
}
