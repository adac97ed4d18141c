//! Lock markers and their ordering.
//!
//! Every contender for key `k` creates an ephemeral sequential child
//! `<root>/k/lock-<seq>`. The service assigns `<seq>`, a strictly increasing
//! counter per parent, so markers are totally ordered by it.

use std::cmp::Ordering;
use std::fmt;

use crate::error::{LockError, LockResult};

/// Name prefix of every marker node.
pub const MARKER_PREFIX: &str = "lock-";

/// Reject keys that are not a single usable path segment.
pub fn validate_key(key: &str) -> LockResult<()> {
    if key.is_empty() || key == "." || key == ".." || key.contains('/') {
        return Err(LockError::InvalidKey(key.to_owned()));
    }
    Ok(())
}

/// Parent node that holds every marker for `key`.
pub fn lock_parent(root: &str, key: &str) -> String {
    format!("{}/{key}", root.trim_end_matches('/'))
}

/// One contender's place in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Marker {
    path: String,
    sequence: u64,
}

impl Marker {
    /// Parse child `name` of `parent`. Names without the marker prefix or
    /// with a non-numeric suffix are not markers.
    pub fn parse(parent: &str, name: &str) -> Option<Self> {
        let digits = name.strip_prefix(MARKER_PREFIX)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let sequence = digits.parse().ok()?;
        Some(Self {
            path: format!("{}/{name}", parent.trim_end_matches('/')),
            sequence,
        })
    }

    /// Parse a full path as returned by a sequential create.
    pub fn from_path(path: &str) -> Option<Self> {
        let (parent, name) = path.rsplit_once('/')?;
        let parent = if parent.is_empty() { "/" } else { parent };
        Self::parse(parent, name)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path
            .rsplit_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.path)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Ord for Marker {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence
            .cmp(&other.sequence)
            .then_with(|| self.path.cmp(&other.path))
    }
}

impl PartialOrd for Marker {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Where a marker stands among its siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Standing<'a> {
    /// Lowest sequence: the lock belongs to this marker.
    Holder,
    /// Waiting behind `predecessor`, with `ahead` markers in front in total.
    Behind { predecessor: &'a Marker, ahead: usize },
    /// The marker is not among the siblings.
    Missing,
}

/// Markers under one lock parent, ordered by sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiblingSet {
    markers: Vec<Marker>,
}

impl SiblingSet {
    /// Build from a raw child listing; non-marker children are skipped.
    pub fn from_children<I, S>(parent: &str, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut markers = names
            .into_iter()
            .filter_map(|name| Marker::parse(parent, name.as_ref()))
            .collect::<Vec<_>>();
        markers.sort();
        Self { markers }
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Current holder, if any marker exists.
    pub fn first(&self) -> Option<&Marker> {
        self.markers.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Marker> {
        self.markers.iter()
    }

    pub fn standing(&self, own: &Marker) -> Standing<'_> {
        match self.markers.binary_search(own) {
            Ok(0) => Standing::Holder,
            Ok(idx) => Standing::Behind {
                predecessor: &self.markers[idx - 1],
                ahead: idx,
            },
            Err(_) => Standing::Missing,
        }
    }
}
