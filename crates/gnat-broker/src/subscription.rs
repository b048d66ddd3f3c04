//! Subscription management
//!
//! Subscriptions are indexed by a trie keyed on subject tokens. A node owns
//! its children; each node holds the subscriptions whose pattern ends there.
//! The whole trie sits behind one lock, so a publish sees either all or none
//! of a concurrent subscribe/unsubscribe.

use gnat_core::subject::{FULL_WILDCARD, SINGLE_WILDCARD};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

use crate::session::ConnectionId;

/// A subscription entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    /// Subscriber id chosen by the client (unique per connection)
    pub subscriber_id: u32,
    /// Connection that owns this subscription
    pub connection_id: ConnectionId,
}

impl Subscription {
    pub fn new(subscriber_id: u32, connection_id: ConnectionId) -> Self {
        Self {
            subscriber_id,
            connection_id,
        }
    }
}

#[derive(Debug, Default)]
struct Node {
    children: HashMap<String, Node>,
    subscriptions: HashSet<Subscription>,
}

impl Node {
    fn collect_all(&self, out: &mut HashSet<Subscription>) {
        out.extend(self.subscriptions.iter().copied());
        for child in self.children.values() {
            child.collect_all(out);
        }
    }

    fn count(&self) -> usize {
        self.subscriptions.len() + self.children.values().map(Node::count).sum::<usize>()
    }
}

/// Subject trie
#[derive(Debug, Default)]
pub struct SubjectTrie {
    root: Mutex<Node>,
}

impl SubjectTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `subscription` under a tokenized subscribe subject
    pub fn add(&self, subscription: Subscription, tokens: &[String]) {
        let mut root = self.root.lock();
        let mut node = &mut *root;
        for token in tokens {
            node = node.children.entry(token.clone()).or_default();
        }
        node.subscriptions.insert(subscription);
    }

    /// Remove `subscription` from the node at `tokens`.
    ///
    /// Nothing happens if the path does not exist. Emptied nodes are left in
    /// place.
    pub fn remove(&self, subscription: &Subscription, tokens: &[String]) {
        let mut root = self.root.lock();
        let mut node = &mut *root;
        for token in tokens {
            match node.children.get_mut(token) {
                Some(child) => node = child,
                None => return,
            }
        }
        node.subscriptions.remove(subscription);
    }

    /// Remove a batch of subscriptions under a single lock acquisition
    pub fn remove_batch<'a, I>(&self, entries: I)
    where
        I: IntoIterator<Item = (&'a Subscription, &'a [String])>,
    {
        let mut root = self.root.lock();
        'entries: for (subscription, tokens) in entries {
            let mut node = &mut *root;
            for token in tokens {
                match node.children.get_mut(token) {
                    Some(child) => node = child,
                    None => continue 'entries,
                }
            }
            node.subscriptions.remove(subscription);
        }
    }

    /// All subscriptions whose pattern matches a tokenized publish subject.
    ///
    /// Each subscription appears at most once however many of its patterns
    /// match.
    pub fn match_for_publish(&self, tokens: &[String]) -> HashSet<Subscription> {
        let root = self.root.lock();
        let mut matched = HashSet::new();
        let mut frontier: Vec<&Node> = vec![&*root];

        for token in tokens {
            let mut next = Vec::new();
            for node in frontier {
                if let Some(child) = node.children.get(token.as_str()) {
                    next.push(child);
                }
                if let Some(child) = node.children.get(SINGLE_WILDCARD) {
                    next.push(child);
                }
                if let Some(child) = node.children.get(FULL_WILDCARD) {
                    child.collect_all(&mut matched);
                }
            }
            if next.is_empty() {
                return matched;
            }
            frontier = next;
        }

        for node in frontier {
            matched.extend(node.subscriptions.iter().copied());
        }
        matched
    }

    /// Number of registered subscriptions
    pub fn len(&self) -> usize {
        self.root.lock().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
