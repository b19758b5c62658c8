//! The address book: a shared map from back-end node IDs to their
//! HTTP addresses, with a distinguished subset of bootstrap nodes.
//!
//! The book is process-wide shared state. All operations take `&self`
//! and synchronize internally; callers hold it behind an `Arc`.

use std::collections::HashMap;
use std::sync::RwLock;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use url::Url;

/// Identifies a single back-end node.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

/// A store of back-end node addresses.
///
/// Insertion order is not observable; random selection is uniform and
/// without replacement. The bootstrap subset is fixed at construction,
/// although bootstrap addresses themselves may be updated through
/// [`insert`](AddressBook::insert).
#[derive(Debug)]
pub struct AddressBook {
    addrs: RwLock<HashMap<NodeId, Url>>,
    bootstrap_ids: Vec<NodeId>,
}

impl AddressBook {
    /// Constructs a book seeded with the given bootstrap nodes.
    pub fn new(bootstrap: Vec<(NodeId, Url)>) -> Self {
        let bootstrap_ids = bootstrap.iter().map(|(id, _)| id.clone()).collect();
        Self { addrs: RwLock::new(bootstrap.into_iter().collect()), bootstrap_ids }
    }

    pub fn get(&self, id: &NodeId) -> Option<Url> {
        self.addrs.read().expect("address book lock poisoned").get(id).cloned()
    }

    pub fn insert(&self, id: NodeId, addr: Url) {
        self.addrs.write().expect("address book lock poisoned").insert(id, addr);
    }

    pub fn remove(&self, id: &NodeId) -> Option<Url> {
        self.addrs.write().expect("address book lock poisoned").remove(id)
    }

    pub fn len(&self) -> usize {
        self.addrs.read().expect("address book lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every known node, in unspecified order.
    pub fn all(&self) -> Vec<(NodeId, Url)> {
        self.addrs.read().expect("address book lock poisoned").iter().map(|(id, a)| (id.clone(), a.clone())).collect()
    }

    /// Up to `n` distinct nodes, selected uniformly at random.
    pub fn sample(&self, n: usize) -> Vec<(NodeId, Url)> {
        let mut all = self.all();
        let mut rng = rand::thread_rng();
        all.shuffle(&mut rng);
        all.truncate(n);
        all
    }

    /// Up to `n` distinct bootstrap nodes, selected uniformly at
    /// random. Bootstrap IDs whose address has been removed are
    /// skipped.
    pub fn sample_bootstrap(&self, n: usize) -> Vec<(NodeId, Url)> {
        let mut ids: Vec<&NodeId> = self.bootstrap_ids.iter().collect();
        let mut rng = rand::thread_rng();
        ids.shuffle(&mut rng);

        let addrs = self.addrs.read().expect("address book lock poisoned");
        ids.into_iter()
            .filter_map(|id| addrs.get(id).map(|addr| (id.clone(), addr.clone())))
            .take(n)
            .collect()
    }

    /// All bootstrap nodes still present in the book.
    pub fn bootstrap_all(&self) -> Vec<(NodeId, Url)> {
        self.sample_bootstrap(self.bootstrap_ids.len())
    }
}
