//! In-memory hierarchical model with stable keys.
//!
//! Mutations take an observer that receives the same notifications a real
//! source would send: `RowsAboutToBe*` before the data changes, the
//! confirming event after. Wiring a [`Reflector`](crate::Reflector) in is a
//! one-line closure:
//!
//! ```ignore
//! model.remove_rows(None, 0, 2, |m, e| reflector.handle_event(m, e))?;
//! ```

use std::collections::HashMap;

use partree_core::model::{ModelEvent, NodeKey, TreeModel, moved_block_start};

#[derive(Debug, Clone)]
struct Entry {
    label: String,
    parent: Option<NodeKey>,
    children: Vec<NodeKey>,
}

/// Mutable tree of labelled rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryModel {
    nodes: HashMap<NodeKey, Entry>,
    roots: Vec<NodeKey>,
    next_key: u64,
}

impl MemoryModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `rows` top-level rows labelled `0..rows`.
    #[must_use]
    pub fn flat(rows: usize) -> Self {
        Self::balanced(&[rows])
    }

    /// Full tree with `fanout[d]` children per node at depth `d`.
    ///
    /// Labels are dotted row paths, e.g. `"3.0.7"`.
    #[must_use]
    pub fn balanced(fanout: &[usize]) -> Self {
        let mut model = Self::new();
        let mut level: Vec<(Option<NodeKey>, String)> = vec![(None, String::new())];
        for &count in fanout {
            let mut next = Vec::with_capacity(level.len() * count);
            for (parent, prefix) in &level {
                for row in 0..count {
                    let label = if prefix.is_empty() {
                        row.to_string()
                    } else {
                        format!("{prefix}.{row}")
                    };
                    if let Some(key) = model.push(*parent, label.clone()) {
                        next.push((Some(key), label));
                    }
                }
            }
            level = next;
        }
        model
    }

    /// Append a row without notifying anyone. `None` if `parent` is unknown.
    pub fn push(&mut self, parent: Option<NodeKey>, label: impl Into<String>) -> Option<NodeKey> {
        let key = NodeKey(self.next_key);
        self.children_mut(parent)?.push(key);
        self.next_key += 1;
        self.nodes.insert(
            key,
            Entry {
                label: label.into(),
                parent,
                children: Vec::new(),
            },
        );
        Some(key)
    }

    /// Number of nodes in the whole hierarchy.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn contains(&self, key: NodeKey) -> bool {
        self.nodes.contains_key(&key)
    }

    #[must_use]
    pub fn label(&self, key: NodeKey) -> Option<&str> {
        self.nodes.get(&key).map(|entry| entry.label.as_str())
    }

    /// Parent of `key`: `Some(None)` for top-level rows, `None` if unknown.
    #[must_use]
    pub fn parent_of(&self, key: NodeKey) -> Option<Option<NodeKey>> {
        self.nodes.get(&key).map(|entry| entry.parent)
    }

    #[must_use]
    pub fn row_of(&self, key: NodeKey) -> Option<usize> {
        let parent = self.parent_of(key)?;
        self.children_of(parent).iter().position(|&k| k == key)
    }

    /// Children of `parent` in row order (empty if unknown).
    #[must_use]
    pub fn children_of(&self, parent: Option<NodeKey>) -> &[NodeKey] {
        match parent {
            None => &self.roots,
            Some(key) => self.nodes.get(&key).map_or(&[], |entry| &entry.children),
        }
    }

    /// Keys in depth-first pre-order, skipping children of `collapsed(key)`.
    pub fn preorder(&self, mut collapsed: impl FnMut(NodeKey) -> bool) -> Vec<NodeKey> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeKey> = self.roots.iter().rev().copied().collect();
        while let Some(key) = stack.pop() {
            out.push(key);
            if collapsed(key) {
                continue;
            }
            stack.extend(self.children_of(Some(key)).iter().rev().copied());
        }
        out
    }

    fn children_mut(&mut self, parent: Option<NodeKey>) -> Option<&mut Vec<NodeKey>> {
        match parent {
            None => Some(&mut self.roots),
            Some(key) => self.nodes.get_mut(&key).map(|entry| &mut entry.children),
        }
    }

    fn is_within(&self, key: Option<NodeKey>, ancestor: NodeKey) -> bool {
        let mut cursor = key;
        while let Some(k) = cursor {
            if k == ancestor {
                return true;
            }
            cursor = self.parent_of(k).flatten();
        }
        false
    }

    fn drop_subtree(&mut self, key: NodeKey) {
        let mut stack = vec![key];
        while let Some(k) = stack.pop() {
            if let Some(entry) = self.nodes.remove(&k) {
                stack.extend(entry.children);
            }
        }
    }

    /// Insert rows at `first` under `parent`, then emit `RowsInserted`.
    ///
    /// Returns the new keys; an unknown parent, an out-of-range `first`, or
    /// no labels is a no-op.
    pub fn insert_rows<E, L>(
        &mut self,
        parent: Option<NodeKey>,
        first: usize,
        labels: impl IntoIterator<Item = L>,
        mut observer: impl FnMut(&Self, &ModelEvent) -> Result<(), E>,
    ) -> Result<Vec<NodeKey>, E>
    where
        L: Into<String>,
    {
        let Some(len) = self.children_mut(parent).map(|children| children.len()) else {
            return Ok(Vec::new());
        };
        if first > len {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for label in labels {
            let key = NodeKey(self.next_key);
            self.next_key += 1;
            self.nodes.insert(
                key,
                Entry {
                    label: label.into(),
                    parent,
                    children: Vec::new(),
                },
            );
            keys.push(key);
        }
        if keys.is_empty() {
            return Ok(keys);
        }
        if let Some(children) = self.children_mut(parent) {
            children.splice(first..first, keys.iter().copied());
        }
        let event = ModelEvent::RowsInserted {
            parent,
            first,
            last: first + keys.len() - 1,
        };
        observer(self, &event)?;
        Ok(keys)
    }

    /// Append rows under `parent`.
    pub fn append_rows<E, L>(
        &mut self,
        parent: Option<NodeKey>,
        labels: impl IntoIterator<Item = L>,
        observer: impl FnMut(&Self, &ModelEvent) -> Result<(), E>,
    ) -> Result<Vec<NodeKey>, E>
    where
        L: Into<String>,
    {
        let first = self.children_of(parent).len();
        self.insert_rows(parent, first, labels, observer)
    }

    /// Emit `RowsAboutToBeRemoved`, then drop rows `first..=last` and their
    /// descendants. Invalid ranges are a no-op.
    pub fn remove_rows<E>(
        &mut self,
        parent: Option<NodeKey>,
        first: usize,
        last: usize,
        mut observer: impl FnMut(&Self, &ModelEvent) -> Result<(), E>,
    ) -> Result<(), E> {
        let len = self.children_of(parent).len();
        if parent.is_some_and(|key| !self.contains(key)) || first > last || last >= len {
            return Ok(());
        }
        observer(
            self,
            &ModelEvent::RowsAboutToBeRemoved {
                parent,
                first,
                last,
            },
        )?;
        let removed: Vec<NodeKey> = self
            .children_mut(parent)
            .map(|children| children.drain(first..=last).collect())
            .unwrap_or_default();
        for key in removed {
            self.drop_subtree(key);
        }
        Ok(())
    }

    /// Move rows `first..=last` of `source` before row `dest_row` of `dest`
    /// (pre-move coordinates), emitting the announce/confirm pair.
    ///
    /// Returns false without notifying for invalid or no-op moves,
    /// including moving a node into its own subtree.
    pub fn move_rows<E>(
        &mut self,
        source: Option<NodeKey>,
        first: usize,
        last: usize,
        dest: Option<NodeKey>,
        dest_row: usize,
        mut observer: impl FnMut(&Self, &ModelEvent) -> Result<(), E>,
    ) -> Result<bool, E> {
        let source_len = self.children_of(source).len();
        let dest_len = self.children_of(dest).len();
        let known = |key: Option<NodeKey>| key.is_none_or(|k| self.contains(k));
        if !known(source) || !known(dest) || first > last || last >= source_len || dest_row > dest_len
        {
            return Ok(false);
        }
        if source == dest && (first..=last + 1).contains(&dest_row) {
            return Ok(false);
        }
        let moving = &self.children_of(source)[first..=last];
        if moving.iter().any(|&key| self.is_within(dest, key)) {
            return Ok(false);
        }

        let announce = ModelEvent::RowsAboutToBeMoved {
            source_parent: source,
            first,
            last,
            dest_parent: dest,
            dest_row,
        };
        observer(self, &announce)?;

        let moved: Vec<NodeKey> = self
            .children_mut(source)
            .map(|children| children.drain(first..=last).collect())
            .unwrap_or_default();
        let start = moved_block_start(source, first, last, dest, dest_row);
        for key in &moved {
            if let Some(entry) = self.nodes.get_mut(key) {
                entry.parent = dest;
            }
        }
        if let Some(children) = self.children_mut(dest) {
            children.splice(start..start, moved);
        }

        let confirm = ModelEvent::RowsMoved {
            source_parent: source,
            first,
            last,
            dest_parent: dest,
            dest_row,
        };
        observer(self, &confirm)?;
        Ok(true)
    }

    /// Replace the whole hierarchy with fresh top-level rows and emit `Reset`.
    pub fn reset<E, L>(
        &mut self,
        labels: impl IntoIterator<Item = L>,
        mut observer: impl FnMut(&Self, &ModelEvent) -> Result<(), E>,
    ) -> Result<Vec<NodeKey>, E>
    where
        L: Into<String>,
    {
        self.nodes.clear();
        self.roots.clear();
        let keys = labels
            .into_iter()
            .filter_map(|label| self.push(None, label))
            .collect();
        observer(self, &ModelEvent::Reset)?;
        Ok(keys)
    }
}

impl TreeModel for MemoryModel {
    fn row_count(&self, parent: Option<NodeKey>) -> usize {
        self.children_of(parent).len()
    }

    fn index(&self, parent: Option<NodeKey>, row: usize, _column: usize) -> Option<NodeKey> {
        self.children_of(parent).get(row).copied()
    }

    fn has_children(&self, key: NodeKey) -> bool {
        !self.children_of(Some(key)).is_empty()
    }
}
