//! C4: Traversal Engine. The hardest subsystem.
//!
//! Given a start node, performs a bounded breadth-first walk following
//! edges of a caller-chosen type and direction, cycle-safe via a
//! process-call-local visited set, yielding a flat node set, a set of
//! shortest paths, a single shortest path, or all simple paths to a target
//! (depth-limited DFS).

use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use rusqlite::{params, OptionalExtension};

use crate::db::GraphHandle;
use crate::error::{GraphError, GraphResult, WithOp};
use crate::store;
use crate::types::{Direction, Node, NodeId};

/// A bounded BFS plan rooted at `start`. Each chaining call consumes and
/// returns `self`, matching the builder discipline used by
/// [`crate::query::NodeQuery`].
pub struct Traversal<'a, H: GraphHandle> {
    handle: &'a H,
    start: NodeId,
    direction: Direction,
    edge_type: Option<String>,
    node_type_filter: Option<String>,
    min_depth: i64,
    max_depth: i64,
    unique: bool,
    user_filter: Option<Rc<dyn Fn(&Node) -> bool>>,
}

/// Bounds for [`Traversal::paths`]. `max_depth` of `None` falls back to the
/// builder's configured `max_depth` for this call only (spec §4.4);
/// `max_paths` of `None` falls back to a finite default cap of 1000 rather
/// than being unbounded, since `paths()` is DFS over simple paths and an
/// unbounded cap on a dense graph can blow up exponentially (spec §9 Open
/// Question).
#[derive(Debug, Clone, Copy, Default)]
pub struct PathsOptions {
    pub max_paths: Option<usize>,
    pub max_depth: Option<i64>,
}

const DEFAULT_MAX_PATHS: usize = 1000;

impl<'a, H: GraphHandle> Traversal<'a, H> {
    pub(crate) fn new(handle: &'a H, start: NodeId) -> GraphResult<Self> {
        let exists = handle.with_conn(|conn| store::get_node(conn, start))?;
        if exists.is_none() {
            return Err(GraphError::StartNotFound(start));
        }
        Ok(Self {
            handle,
            start,
            direction: Direction::Out,
            edge_type: None,
            node_type_filter: None,
            min_depth: 1,
            max_depth: 1,
            unique: true,
            user_filter: None,
        })
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn edge_type(mut self, edge_type: impl Into<String>) -> Self {
        self.edge_type = Some(edge_type.into());
        self
    }

    pub fn any_edge_type(mut self) -> Self {
        self.edge_type = None;
        self
    }

    /// Follow outgoing edges of `edge_type`.
    pub fn out(self, edge_type: impl Into<String>) -> Self {
        self.direction(Direction::Out).edge_type(edge_type)
    }

    /// Follow incoming edges of `edge_type`.
    pub fn incoming(self, edge_type: impl Into<String>) -> Self {
        self.direction(Direction::In).edge_type(edge_type)
    }

    /// Follow edges of `edge_type` in either direction.
    pub fn both(self, edge_type: impl Into<String>) -> Self {
        self.direction(Direction::Both).edge_type(edge_type)
    }

    pub fn node_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type_filter = Some(node_type.into());
        self
    }

    pub fn min_depth(mut self, depth: i64) -> Self {
        self.min_depth = depth;
        self
    }

    pub fn max_depth(mut self, depth: i64) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn filter(mut self, predicate: impl Fn(&Node) -> bool + 'static) -> Self {
        self.user_filter = Some(Rc::new(predicate));
        self
    }

    fn check_depth_bounds(&self, min_depth: i64, max_depth: i64) -> GraphResult<()> {
        if min_depth < 0 || max_depth < 0 || min_depth > max_depth {
            return Err(GraphError::InvalidDepth {
                min_depth,
                max_depth,
            });
        }
        Ok(())
    }

    /// Edges incident to `node` matching `edge_type`/`direction`, as far
    /// endpoints (spec §4.4 step 2).
    fn incident(&self, node: NodeId) -> GraphResult<Vec<NodeId>> {
        self.handle.with_conn(|conn| {
            let far_column = match self.direction {
                Direction::Out => "to_id",
                Direction::In => "from_id",
                Direction::Both => "CASE WHEN from_id = ?1 THEN to_id ELSE from_id END",
            };
            let direction_clause = match self.direction {
                Direction::Out => "from_id = ?1",
                Direction::In => "to_id = ?1",
                Direction::Both => "(from_id = ?1 OR to_id = ?1)",
            };

            let mut far_ids = Vec::new();
            match &self.edge_type {
                Some(edge_type) => {
                    let sql = format!(
                        "SELECT {far_column} FROM edges WHERE {direction_clause} AND type = ?2"
                    );
                    let mut stmt = conn.prepare_cached(&sql).with_op("traversal: prepare incident")?;
                    let ids = stmt
                        .query_map(params![node, edge_type], |row| row.get::<_, NodeId>(0))
                        .with_op("traversal: query incident")?
                        .collect::<rusqlite::Result<Vec<_>>>()
                        .with_op("traversal: collect incident")?;
                    far_ids.extend(ids);
                }
                None => {
                    let sql = format!("SELECT {far_column} FROM edges WHERE {direction_clause}");
                    let mut stmt = conn.prepare_cached(&sql).with_op("traversal: prepare incident")?;
                    let ids = stmt
                        .query_map(params![node], |row| row.get::<_, NodeId>(0))
                        .with_op("traversal: query incident")?
                        .collect::<rusqlite::Result<Vec<_>>>()
                        .with_op("traversal: collect incident")?;
                    far_ids.extend(ids);
                }
            }
            Ok(far_ids)
        })
    }

    fn matches_node_type(&self, node_id: NodeId) -> GraphResult<bool> {
        let Some(expected) = &self.node_type_filter else {
            return Ok(true);
        };
        let node = self.handle.with_conn(|conn| store::get_node(conn, node_id))?;
        Ok(node.map(|n| &n.node_type == expected).unwrap_or(false))
    }

    /// Run the bounded BFS described in spec §4.4. Returns the emission
    /// order (respecting `unique` and `minDepth`/`maxDepth`) and a parent
    /// map for path reconstruction (first-discovery wins, which BFS
    /// guarantees is a shortest route).
    fn bfs(&self) -> GraphResult<(Vec<NodeId>, HashMap<NodeId, NodeId>)> {
        self.check_depth_bounds(self.min_depth, self.max_depth)?;

        // Cycle guard: always active regardless of `unique`, so the walk
        // always terminates in O(|V|+|E|) (spec P5) even when `unique` is
        // turned off for the *emitted* result set.
        let mut visited_for_expansion: HashSet<NodeId> = HashSet::new();
        visited_for_expansion.insert(self.start);
        let mut emitted: HashSet<NodeId> = HashSet::new();
        let mut parent: HashMap<NodeId, NodeId> = HashMap::new();
        let mut order: Vec<NodeId> = Vec::new();
        let mut queue: VecDeque<(NodeId, i64)> = VecDeque::new();
        queue.push_back((self.start, 0));

        while let Some((node, depth)) = queue.pop_front() {
            if depth == self.max_depth {
                continue;
            }
            for far in self.incident(node)? {
                if !self.matches_node_type(far)? {
                    continue;
                }
                let next_depth = depth + 1;
                // The start id is always excluded from the emitted set, even
                // when a cycle routes back to it (spec invariant I6).
                if far != self.start
                    && next_depth >= self.min_depth
                    && (!self.unique || emitted.insert(far))
                {
                    order.push(far);
                }
                if !visited_for_expansion.contains(&far) {
                    visited_for_expansion.insert(far);
                    parent.entry(far).or_insert(node);
                    queue.push_back((far, next_depth));
                }
            }
        }

        Ok((order, parent))
    }

    fn materialize(&self, ids: &[NodeId]) -> GraphResult<Vec<Node>> {
        let nodes: Vec<Node> = ids
            .iter()
            .map(|id| {
                self.handle
                    .with_conn(|conn| store::get_node(conn, *id))
                    .transpose()
            })
            .filter_map(|r| r)
            .collect::<GraphResult<Vec<_>>>()?;

        Ok(match &self.user_filter {
            Some(predicate) => nodes.into_iter().filter(|n| predicate(n)).collect(),
            None => nodes,
        })
    }

    /// Flat ordered list of reached nodes (BFS order).
    pub fn to_array(&self) -> GraphResult<Vec<Node>> {
        let (order, _) = self.bfs()?;
        self.materialize(&order)
    }

    fn reconstruct(&self, parent: &HashMap<NodeId, NodeId>, target: NodeId) -> Vec<NodeId> {
        let mut path = vec![target];
        let mut current = target;
        while let Some(&prev) = parent.get(&current) {
            path.push(prev);
            current = prev;
            if current == self.start {
                break;
            }
        }
        path.reverse();
        path
    }

    /// One path per reached node, start→node, reconstructed from BFS
    /// parent pointers (so each is a shortest route; when multiple
    /// equally-short routes exist only the first-discovered is kept).
    pub fn to_paths(&self) -> GraphResult<Vec<Vec<Node>>> {
        let (order, parent) = self.bfs()?;
        order
            .into_iter()
            .collect::<HashSet<_>>()
            .into_iter()
            .map(|id| {
                let path_ids = self.reconstruct(&parent, id);
                self.materialize(&path_ids)
            })
            .collect()
    }

    /// The unique shortest start→target path, or `None` if unreachable
    /// within the configured depth bounds. Ties are broken by first
    /// discovery order (BFS processes nodes in increasing depth order, so
    /// the first parent recorded for a node is along a shortest route).
    pub fn shortest_path(&self, target: NodeId) -> GraphResult<Option<Vec<Node>>> {
        if target == self.start {
            return Ok(None);
        }
        let (order, parent) = self.bfs()?;
        if !order.contains(&target) {
            return Ok(None);
        }
        let path_ids = self.reconstruct(&parent, target);
        Ok(Some(self.materialize(&path_ids)?))
    }

    /// Enumerate simple (acyclic) paths start→target within depth bounds,
    /// shortest-first, capped at `options.max_paths`. Implemented as
    /// depth-limited DFS with a per-path visited stack distinct from the
    /// BFS cycle guard (different paths may revisit the same intermediate
    /// node, just not within the same path).
    pub fn paths(&self, target: NodeId, options: PathsOptions) -> GraphResult<Vec<Vec<Node>>> {
        let max_depth = options.max_depth.unwrap_or(self.max_depth);
        let max_paths = options.max_paths.unwrap_or(DEFAULT_MAX_PATHS);
        self.check_depth_bounds(0, max_depth)?;

        let mut found: Vec<Vec<NodeId>> = Vec::new();
        let mut stack_path = vec![self.start];
        let mut on_stack: HashSet<NodeId> = HashSet::from([self.start]);
        self.dfs_paths(
            self.start,
            target,
            max_depth,
            &mut stack_path,
            &mut on_stack,
            &mut found,
            max_paths,
        )?;

        found.sort_by_key(|p| p.len());
        found.truncate(max_paths);
        found.into_iter().map(|ids| self.materialize(&ids)).collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn dfs_paths(
        &self,
        node: NodeId,
        target: NodeId,
        remaining_depth: i64,
        stack_path: &mut Vec<NodeId>,
        on_stack: &mut HashSet<NodeId>,
        found: &mut Vec<Vec<NodeId>>,
        max_paths: usize,
    ) -> GraphResult<()> {
        if found.len() >= max_paths {
            return Ok(());
        }
        if remaining_depth == 0 {
            return Ok(());
        }
        for far in self.incident(node)? {
            if found.len() >= max_paths {
                return Ok(());
            }
            if !self.matches_node_type(far)? {
                continue;
            }
            if on_stack.contains(&far) {
                continue;
            }
            stack_path.push(far);
            on_stack.insert(far);

            if far == target {
                found.push(stack_path.clone());
            } else {
                self.dfs_paths(
                    far,
                    target,
                    remaining_depth - 1,
                    stack_path,
                    on_stack,
                    found,
                    max_paths,
                )?;
            }

            on_stack.remove(&far);
            stack_path.pop();
        }
        Ok(())
    }
}
