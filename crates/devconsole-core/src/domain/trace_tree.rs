//! Parent/child reconstruction over flat trace lists.

use std::collections::{HashMap, HashSet};

use super::messages::TraceMessage;

/// A span and its children, ordered by start timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanNode {
    pub trace: TraceMessage,
    pub children: Vec<SpanNode>,
}

impl SpanNode {
    /// Number of spans in this subtree, including this one.
    pub fn span_count(&self) -> usize {
        1 + self.children.iter().map(SpanNode::span_count).sum::<usize>()
    }

    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(SpanNode::depth).max().unwrap_or(0)
    }
}

/// Forest of spans. Spans whose parent is unknown become roots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpanTree {
    pub roots: Vec<SpanNode>,
}

impl SpanTree {
    pub fn build(traces: &[TraceMessage]) -> Self {
        let known: HashSet<&str> = traces.iter().map(|t| t.span_id.as_str()).collect();
        let mut by_parent: HashMap<Option<&str>, Vec<&TraceMessage>> = HashMap::new();
        for trace in traces {
            let parent = trace
                .parent_span_id
                .as_deref()
                .filter(|p| known.contains(p) && *p != trace.span_id);
            by_parent.entry(parent).or_default().push(trace);
        }

        let mut visited = HashSet::new();
        let roots = children_of(None, &by_parent, &mut visited);
        Self { roots }
    }

    /// Depth-first walk yielding `(depth, trace)`.
    pub fn walk(&self) -> Vec<(usize, &TraceMessage)> {
        fn visit<'a>(node: &'a SpanNode, depth: usize, out: &mut Vec<(usize, &'a TraceMessage)>) {
            out.push((depth, &node.trace));
            for child in &node.children {
                visit(child, depth + 1, out);
            }
        }
        let mut out = Vec::new();
        for root in &self.roots {
            visit(root, 0, &mut out);
        }
        out
    }
}

fn children_of<'a>(
    parent: Option<&'a str>,
    by_parent: &HashMap<Option<&'a str>, Vec<&'a TraceMessage>>,
    visited: &mut HashSet<&'a str>,
) -> Vec<SpanNode> {
    let Some(candidates) = by_parent.get(&parent) else {
        return Vec::new();
    };
    let fresh: Vec<&TraceMessage> = candidates
        .iter()
        .copied()
        .filter(|t| visited.insert(t.span_id.as_str()))
        .collect();
    let mut nodes: Vec<SpanNode> = fresh
        .into_iter()
        .map(|trace| SpanNode {
            trace: trace.clone(),
            children: children_of(Some(trace.span_id.as_str()), by_parent, visited),
        })
        .collect();
    nodes.sort_by_key(|n| n.trace.timestamp);
    nodes
}
