//! Node/key match classification.

/// How a node's key fragment relates to the part of a query key that
/// starts at the node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MatchKind {
    /// First bytes differ; nothing overlaps.
    None,
    /// The whole fragment matched and the query continues past it.
    Partial,
    /// The whole fragment matched and the query ends exactly with it.
    Full,
    /// Only a strict prefix of the fragment matched.
    Subset,
    /// The comparison stopped at a wildcard marker.
    Wildcard,
}

/// Result of [`classify`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match {
    pub kind: MatchKind,
    /// For `Subset`/`None`: the first mismatching position. For
    /// `Partial`/`Full`: the fragment length. For `Wildcard`: the position
    /// just before the marker (clamped at 0).
    pub index: usize,
}

impl Match {
    #[inline]
    fn new(kind: MatchKind, index: usize) -> Self {
        Self { kind, index }
    }
}

/// Compare `node_key` against `query` position by position.
///
/// With `wildcard` set, a marker on exactly one side at some position
/// ends the comparison as [`MatchKind::Wildcard`]; a marker on both sides
/// is an ordinary equal byte. A query that runs out before `node_key` does
/// counts as a mismatch at that position.
pub fn classify(node_key: &[u8], query: &[u8], wildcard: Option<u8>) -> Match {
    for (i, &n) in node_key.iter().enumerate() {
        let q = query.get(i).copied();

        if let Some(w) = wildcard {
            if (n == w) != (q == Some(w)) {
                return Match::new(MatchKind::Wildcard, i.saturating_sub(1));
            }
        }

        if q != Some(n) {
            let kind = if i == 0 {
                MatchKind::None
            } else {
                MatchKind::Subset
            };
            return Match::new(kind, i);
        }
    }

    let kind = if query.len() == node_key.len() {
        MatchKind::Full
    } else {
        MatchKind::Partial
    };
    Match::new(kind, node_key.len())
}
