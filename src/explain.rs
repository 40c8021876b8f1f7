//! Query-plan trees.
//!
//! `EXPLAIN QUERY PLAN` rows come back as `[id, parent, notused, detail]`
//! and nest by parent id. Plain `EXPLAIN` output (the opcode listing) has
//! no tree structure and falls back to a flat rendering.

use std::fmt;

const MAX_TREE_DEPTH: usize = 64;

/// One node of a query plan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExplainNode {
    pub id: i64,
    pub detail: String,
    pub children: Vec<ExplainNode>,
}

/// Parsed result of an explain call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExplainPlan {
    roots: Vec<ExplainNode>,
}

impl ExplainPlan {
    pub fn roots(&self) -> &[ExplainNode] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// The formatted tree, two spaces of indent per level.
    pub fn render(&self) -> String {
        self.to_string()
    }

    pub(crate) fn from_rows(rows: &[Vec<serde_json::Value>]) -> Self {
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let parsed = (row.len() == 4)
                .then(|| {
                    Some((
                        row[0].as_i64()?,
                        row[1].as_i64()?,
                        row[3].as_str()?.to_owned(),
                    ))
                })
                .flatten();
            match parsed {
                Some(entry) => entries.push(entry),
                None => return Self::listing(rows),
            }
        }
        let roots = build_children(&entries, 0, MAX_TREE_DEPTH);
        if roots.is_empty() && !entries.is_empty() {
            // Orphaned parent ids; degrade to a flat view.
            return Self::listing(rows);
        }
        Self { roots }
    }

    /// Flat fallback for opcode listings and unexpected shapes.
    fn listing(rows: &[Vec<serde_json::Value>]) -> Self {
        let roots = rows
            .iter()
            .enumerate()
            .map(|(index, row)| ExplainNode {
                id: index as i64,
                detail: row
                    .iter()
                    .map(cell_text)
                    .collect::<Vec<_>>()
                    .join(" "),
                children: Vec::new(),
            })
            .collect();
        Self { roots }
    }
}

fn build_children(
    entries: &[(i64, i64, String)],
    parent: i64,
    depth_left: usize,
) -> Vec<ExplainNode> {
    if depth_left == 0 {
        return Vec::new();
    }
    entries
        .iter()
        .filter(|(id, entry_parent, _)| *entry_parent == parent && *id != parent)
        .map(|(id, _, detail)| ExplainNode {
            id: *id,
            detail: detail.clone(),
            children: build_children(entries, *id, depth_left - 1),
        })
        .collect()
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl fmt::Display for ExplainPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_node(
            f: &mut fmt::Formatter<'_>,
            node: &ExplainNode,
            depth: usize,
        ) -> fmt::Result {
            writeln!(f, "{:indent$}{}", "", node.detail, indent = depth * 2)?;
            for child in &node.children {
                write_node(f, child, depth + 1)?;
            }
            Ok(())
        }
        for root in &self.roots {
            write_node(f, root, 0)?;
        }
        Ok(())
    }
}
