//! One-to-many links between collections.
//!
//! Linking a *source* collection to a *target* collection on a foreign key
//! gives every source item an attribute holding the branch of target items
//! whose foreign key equals the source item's primary key, and optionally
//! gives every target item a pointer back to its source item. Both sides
//! are kept current as items are added.
//!
//! Each link keeps a fan-out index from foreign-key value to target keys,
//! so wiring a new source item costs the number of items it owns.

use super::{Attribute, Collection, Item, Joined, Root};
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use rowlive_store::Key;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Target keys grouped by foreign-key value.
type FanOut = Arc<Mutex<HashMap<Key, Vec<Key>>>>;

/// How a link names the pointer from target items back to their owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum ParentPointer {
    /// Use the foreign key name when the context enables parent pointers.
    #[default]
    Default,
    /// Use this name.
    Named(String),
    /// No pointer.
    Disabled,
}

/// Describes a link on a foreign key.
#[derive(Debug, Clone)]
pub struct LinkSpec {
    key: String,
    attribute: Option<String>,
    parent: ParentPointer,
}

impl LinkSpec {
    /// Links on the target column `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            attribute: None,
            parent: ParentPointer::Default,
        }
    }

    /// Names the attribute installed on source items.
    ///
    /// Defaults to the target table name.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>) -> Self {
        self.attribute = Some(name.into());
        self
    }

    /// Names the pointer installed on target items.
    #[must_use]
    pub fn parent(mut self, name: impl Into<String>) -> Self {
        self.parent = ParentPointer::Named(name.into());
        self
    }

    /// Installs no pointer on target items.
    #[must_use]
    pub fn no_parent(mut self) -> Self {
        self.parent = ParentPointer::Disabled;
        self
    }
}

/// A link as recorded on its source collection.
pub(super) struct OutboundLink {
    target: Weak<Root>,
    key: String,
    attribute: String,
    parent: Option<String>,
    fan_out: FanOut,
}

/// A link as recorded on its target collection.
pub(super) struct InboundLink {
    source: Weak<Root>,
    key: String,
    attribute: String,
    parent: Option<String>,
    fan_out: FanOut,
}

fn point_to_parent(child: &Item, name: &str, parent: &Arc<Item>) {
    if !child.set_attribute_if_absent(name, Attribute::Single(Arc::downgrade(parent))) {
        warn!(
            table = %child.record().table(),
            key = %child.key(),
            attribute = name,
            "parent pointer already set, keeping the existing one"
        );
    }
}

impl Collection {
    /// Links this collection to `target` on the foreign key named by `spec`.
    ///
    /// Every item of this collection gets an attribute holding the target
    /// items whose foreign key equals its primary key. Unless disabled, every
    /// joined target item gets a pointer back to its owner.
    ///
    /// # Errors
    ///
    /// Nothing is changed when an error is returned.
    /// - [`CoreError::BranchMutation`] if either side is a branch
    /// - [`CoreError::DuplicateLink`] if the two are already linked on the key
    /// - [`CoreError::MissingKey`] if a target item lacks the key field
    /// - [`CoreError::AttributeCollision`] if a source item already has the
    ///   attribute
    pub fn link(&self, target: &Collection, spec: LinkSpec) -> CoreResult<()> {
        for side in [self, target] {
            if side.branch {
                return Err(CoreError::BranchMutation {
                    table: side.table().to_string(),
                    operation: "link",
                });
            }
        }
        self.root.session.ensure_open()?;

        let attribute = spec.attribute.unwrap_or_else(|| target.table().to_string());
        let parent = match spec.parent {
            ParentPointer::Default => self
                .root
                .session
                .config
                .point_to_parent
                .then(|| spec.key.clone()),
            ParentPointer::Named(name) => Some(name),
            ParentPointer::Disabled => None,
        };

        let duplicate = target
            .root
            .inbound
            .read()
            .iter()
            .any(|l| l.key == spec.key && l.source.as_ptr() == Arc::as_ptr(&self.root));
        if duplicate {
            return Err(CoreError::DuplicateLink {
                source_table: self.table().to_string(),
                target_table: target.table().to_string(),
                key: spec.key,
            });
        }

        let mut groups: HashMap<Key, Vec<(Key, Arc<Item>)>> = HashMap::new();
        for (key, item) in target.entries() {
            let Some(fk) = item.get(&spec.key) else {
                return Err(CoreError::MissingKey {
                    table: target.table().to_string(),
                    key: key.to_string(),
                    column: spec.key,
                });
            };
            groups.entry(Key::new(&fk)).or_default().push((key, item));
        }

        let sources = self.entries();
        if let Some((key, _)) = sources.iter().find(|(_, i)| i.has_attribute(&attribute)) {
            return Err(CoreError::AttributeCollision {
                table: self.table().to_string(),
                key: key.to_string(),
                attribute,
            });
        }

        let index: HashMap<Key, Vec<Key>> = groups
            .iter()
            .map(|(fk, members)| {
                let keys = members.iter().map(|(k, _)| k.clone()).collect();
                (fk.clone(), keys)
            })
            .collect();
        let fan_out: FanOut = Arc::new(Mutex::new(index));
        self.root.outbound.write().push(OutboundLink {
            target: Arc::downgrade(&target.root),
            key: spec.key.clone(),
            attribute: attribute.clone(),
            parent: parent.clone(),
            fan_out: Arc::clone(&fan_out),
        });
        target.root.inbound.write().push(InboundLink {
            source: Arc::downgrade(&self.root),
            key: spec.key.clone(),
            attribute: attribute.clone(),
            parent: parent.clone(),
            fan_out,
        });

        for (key, source) in sources {
            let joined = groups.remove(&key).unwrap_or_default();
            if let Some(name) = &parent {
                for (_, child) in &joined {
                    point_to_parent(child, name, &source);
                }
            }
            source.set_attribute(&attribute, Attribute::Many(Joined::new(&target.root, joined)));
        }
        if !groups.is_empty() {
            debug!(
                source = %self.table(),
                target = %target.table(),
                orphans = groups.values().map(Vec::len).sum::<usize>(),
                "target items without a source item"
            );
        }

        debug!(
            source = %self.table(),
            target = %target.table(),
            key = %spec.key,
            attribute = %attribute,
            "collections linked"
        );
        Ok(())
    }
}

/// Wires a freshly added item into every link its collection takes part in.
pub(super) fn attach(root: &Arc<Root>, item: &Arc<Item>) {
    let outbound: Vec<_> = root
        .outbound
        .read()
        .iter()
        .filter_map(|l| {
            l.target.upgrade().map(|t| {
                (t, l.key.clone(), l.attribute.clone(), l.parent.clone(), Arc::clone(&l.fan_out))
            })
        })
        .collect();
    let own_key = item.key();
    for (target, key, attribute, parent, fan_out) in outbound {
        let members = fan_out.lock().get(&own_key).cloned().unwrap_or_default();
        let joined: Vec<_> = {
            let items = target.items.read();
            members
                .into_iter()
                .filter_map(|k| items.get(&k).map(|t| (k, Arc::clone(t))))
                .filter(|(_, t)| t.get(&key).is_some_and(|fk| Key::new(&fk) == own_key))
                .collect()
        };
        if let Some(name) = &parent {
            for (_, child) in &joined {
                point_to_parent(child, name, item);
            }
        }
        let derived = Attribute::Many(Joined::new(&target, joined));
        if !item.set_attribute_if_absent(&attribute, derived) {
            warn!(
                table = %root.table(),
                key = %own_key,
                attribute = %attribute,
                "attribute already set"
            );
        }
    }

    let inbound: Vec<_> = root
        .inbound
        .read()
        .iter()
        .filter_map(|l| {
            l.source.upgrade().map(|s| {
                (s, l.key.clone(), l.attribute.clone(), l.parent.clone(), Arc::clone(&l.fan_out))
            })
        })
        .collect();
    for (source, key, attribute, parent, fan_out) in inbound {
        let Some(fk) = item.get(&key) else {
            warn!(
                table = %root.table(),
                key = %own_key,
                column = %key,
                "added item lacks the link key"
            );
            continue;
        };
        let fk = Key::new(&fk);
        fan_out.lock().entry(fk.clone()).or_default().push(own_key.clone());
        let Some(owner) = source.items.read().get(&fk).cloned() else {
            continue;
        };
        if let Some(Attribute::Many(joined)) = owner.attribute(&attribute) {
            joined.insert(own_key.clone(), Arc::clone(item));
        }
        if let Some(name) = &parent {
            point_to_parent(item, name, &owner);
        }
    }
}

/// Drops a removed item from the fan-out of every link it is a target of.
pub(super) fn forget(root: &Root, item: &Item) {
    let own_key = item.key();
    for link in root.inbound.read().iter() {
        let Some(fk) = item.get(&link.key) else {
            continue;
        };
        let fk = Key::new(&fk);
        let mut fan_out = link.fan_out.lock();
        if let Some(members) = fan_out.get_mut(&fk) {
            members.retain(|k| k != &own_key);
            if members.is_empty() {
                fan_out.remove(&fk);
            }
        }
    }
}
