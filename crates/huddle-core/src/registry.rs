use crate::row::Row;

/// Ordered collection of roster rows. The position of a row in the
/// registry is its display position.
///
/// Holds at most one row per peer identity.
#[derive(Debug, Clone, Default)]
pub struct RowRegistry {
    rows: Vec<Row>,
}

impl RowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row_at(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    pub fn index_of(&self, peer: &str) -> Option<usize> {
        self.rows.iter().position(|r| r.peer() == peer)
    }

    pub fn contains(&self, peer: &str) -> bool {
        self.index_of(peer).is_some()
    }

    pub fn find(&self, peer: &str) -> Option<&Row> {
        self.rows.iter().find(|r| r.peer() == peer)
    }

    pub fn find_mut(&mut self, peer: &str) -> Option<&mut Row> {
        self.rows.iter_mut().find(|r| r.peer() == peer)
    }

    /// Insert at the top. Returns `false` if the peer already has a row.
    pub fn prepend(&mut self, row: Row) -> bool {
        if self.contains(row.peer()) {
            tracing::debug!("row for {} already present, not prepending", row.peer());
            return false;
        }
        self.rows.insert(0, row);
        true
    }

    /// Insert at the bottom. Returns `false` if the peer already has a row.
    pub fn append(&mut self, row: Row) -> bool {
        if self.contains(row.peer()) {
            tracing::debug!("row for {} already present, not appending", row.peer());
            return false;
        }
        self.rows.push(row);
        true
    }

    pub fn remove(&mut self, peer: &str) -> Option<Row> {
        let index = self.index_of(peer)?;
        Some(self.rows.remove(index))
    }

    /// Stable sort, highest key first. Rows with equal keys keep their
    /// relative order.
    pub fn sort_by_key_desc<K, F>(&mut self, mut key: F)
    where
        K: Ord,
        F: FnMut(&Row) -> K,
    {
        if self.rows.len() < 2 {
            return;
        }
        self.rows.sort_by_cached_key(|row| std::cmp::Reverse(key(row)));
    }

    /// Stable partition: rows matching `front` first, the rest after, both
    /// groups keeping their relative order.
    pub fn partition<F>(&mut self, front: F)
    where
        F: Fn(&Row) -> bool,
    {
        if self.rows.len() < 2 {
            return;
        }
        let (mut head, tail): (Vec<Row>, Vec<Row>) =
            std::mem::take(&mut self.rows).into_iter().partition(|r| front(r));
        head.extend(tail);
        self.rows = head;
    }

    /// Peer identities in display order.
    pub fn order(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.peer().to_string()).collect()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}
