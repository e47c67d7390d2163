//! Reply tree builder - turns a flat snapshot into a forest of nested replies
//!
//! The forest is an arena: nodes live in one vector (in creation order) and
//! reference each other by index, so building, walking, flattening and the
//! serialized view never recurse on the native stack no matter how deep a
//! thread goes.

use std::collections::HashMap;

use serde::Serialize;

use crate::model::{Reply, ReplyId};

/// Index of a node inside a [`ReplyForest`]
pub type NodeIx = usize;

/// A reply plus its position in the tree
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedReply {
    pub reply: Reply,
    pub parent: Option<NodeIx>,
    /// Children in creation-time order
    pub children: Vec<NodeIx>,
    pub depth: usize,
}

/// Forest of replies derived from one snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyForest {
    nodes: Vec<ProcessedReply>,
    roots: Vec<NodeIx>,
    index: HashMap<ReplyId, NodeIx>,
}

impl ReplyForest {
    /// Build a forest from replies in any order.
    ///
    /// Replies without a parent, or whose parent is absent from the input,
    /// become roots. Replies caught in a parent cycle are promoted too, so
    /// every distinct reply id appears exactly once. When an id repeats, the
    /// later record replaces the earlier one.
    pub fn build(replies: impl IntoIterator<Item = Reply>) -> Self {
        let mut replies = dedup_last_wins(replies);
        replies.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let index: HashMap<ReplyId, NodeIx> = replies
            .iter()
            .enumerate()
            .map(|(ix, reply)| (reply.id.clone(), ix))
            .collect();

        let mut nodes: Vec<ProcessedReply> = replies
            .into_iter()
            .map(|reply| ProcessedReply {
                reply,
                parent: None,
                children: Vec::new(),
                depth: 0,
            })
            .collect();

        let mut roots = Vec::new();
        for ix in 0..nodes.len() {
            let parent = nodes[ix]
                .reply
                .parent_reply_id
                .as_ref()
                .and_then(|parent_id| index.get(parent_id))
                .copied()
                .filter(|&parent| parent != ix);

            match parent {
                Some(parent) => {
                    nodes[ix].parent = Some(parent);
                    nodes[parent].children.push(ix);
                }
                None => roots.push(ix),
            }
        }

        // Anything not reachable from a root sits on a cycle; cut it loose at
        // its earliest member.
        let mut reachable = vec![false; nodes.len()];
        mark_reachable(&nodes, &roots, &mut reachable);
        for ix in 0..nodes.len() {
            if reachable[ix] {
                continue;
            }
            if let Some(parent) = nodes[ix].parent.take() {
                nodes[parent].children.retain(|&child| child != ix);
            }
            tracing::warn!(reply_id = %nodes[ix].reply.id, "Promoting reply caught in a parent cycle");
            roots.push(ix);
            mark_reachable(&nodes, &[ix], &mut reachable);
        }
        roots.sort_unstable();

        let mut stack: Vec<(NodeIx, usize)> = roots.iter().map(|&root| (root, 0)).collect();
        while let Some((ix, depth)) = stack.pop() {
            nodes[ix].depth = depth;
            for i in 0..nodes[ix].children.len() {
                stack.push((nodes[ix].children[i], depth + 1));
            }
        }

        Self {
            nodes,
            roots,
            index,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Root nodes in creation-time order
    pub fn roots(&self) -> &[NodeIx] {
        &self.roots
    }

    pub fn node(&self, ix: NodeIx) -> &ProcessedReply {
        &self.nodes[ix]
    }

    pub fn contains(&self, id: &ReplyId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &ReplyId) -> Option<&ProcessedReply> {
        self.index.get(id).map(|&ix| &self.nodes[ix])
    }

    /// Mutable access to a reply record; the tree shape itself is fixed
    pub fn reply_mut(&mut self, id: &ReplyId) -> Option<&mut Reply> {
        let ix = *self.index.get(id)?;
        Some(&mut self.nodes[ix].reply)
    }

    pub fn children(&self, ix: NodeIx) -> impl Iterator<Item = &ProcessedReply> {
        self.nodes[ix]
            .children
            .iter()
            .map(move |&child| &self.nodes[child])
    }

    /// Number of nodes below `ix`
    pub fn descendant_count(&self, ix: NodeIx) -> usize {
        let mut count = 0;
        let mut stack = self.nodes[ix].children.clone();
        while let Some(next) = stack.pop() {
            count += 1;
            stack.extend_from_slice(&self.nodes[next].children);
        }
        count
    }

    /// Depth-first, pre-order traversal in display order
    pub fn walk(&self) -> Walk<'_> {
        Walk {
            forest: self,
            stack: self.roots.iter().rev().copied().collect(),
        }
    }

    /// Inverse of [`ReplyForest::build`]: every record once, in display order
    pub fn flatten(&self) -> Vec<Reply> {
        self.walk().map(|node| node.reply.clone()).collect()
    }

    /// Pre-order entries for JSON output.
    ///
    /// The tree shape is carried by `depth` and `tree_parent` rather than by
    /// nesting, so serializing a deep thread stays flat.
    pub fn entries(&self) -> Vec<ThreadEntry> {
        self.walk()
            .map(|node| ThreadEntry {
                reply: node.reply.clone(),
                depth: node.depth,
                tree_parent: node
                    .parent
                    .map(|parent| self.nodes[parent].reply.id.clone()),
                child_count: node.children.len(),
            })
            .collect()
    }
}

fn dedup_last_wins(replies: impl IntoIterator<Item = Reply>) -> Vec<Reply> {
    let mut positions: HashMap<ReplyId, usize> = HashMap::new();
    let mut unique: Vec<Reply> = Vec::new();
    for reply in replies {
        match positions.get(&reply.id) {
            Some(&pos) => {
                tracing::warn!(reply_id = %reply.id, "Duplicate reply id in snapshot, keeping the later record");
                unique[pos] = reply;
            }
            None => {
                positions.insert(reply.id.clone(), unique.len());
                unique.push(reply);
            }
        }
    }
    unique
}

fn mark_reachable(nodes: &[ProcessedReply], from: &[NodeIx], reachable: &mut [bool]) {
    let mut stack = from.to_vec();
    while let Some(ix) = stack.pop() {
        if reachable[ix] {
            continue;
        }
        reachable[ix] = true;
        stack.extend_from_slice(&nodes[ix].children);
    }
}

/// Pre-order iterator over a forest
pub struct Walk<'a> {
    forest: &'a ReplyForest,
    stack: Vec<NodeIx>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a ProcessedReply;

    fn next(&mut self) -> Option<Self::Item> {
        let ix = self.stack.pop()?;
        let node = &self.forest.nodes[ix];
        self.stack.extend(node.children.iter().rev().copied());
        Some(node)
    }
}

/// One reply in display order with its place in the forest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadEntry {
    #[serde(flatten)]
    pub reply: Reply,
    pub depth: usize,
    /// Parent as placed in the forest; `None` for roots and promoted orphans
    pub tree_parent: Option<ReplyId>,
    pub child_count: usize,
}
