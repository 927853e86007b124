//! Collection items and their link attributes.

use super::{Collection, Items, Root};
use crate::error::CoreResult;
use crate::record::Record;
use parking_lot::RwLock;
use rowlive_store::{Key, Value};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Builds the user extension attached to each item of a collection.
pub type Constructor = Arc<dyn Fn(&Arc<Record>) -> Box<dyn Any + Send + Sync> + Send + Sync>;

/// The items of a linked collection owned by one item.
///
/// The linked collection's root is held weakly: once every handle to it is
/// dropped, [`Joined::collection`] returns `None`.
#[derive(Clone)]
pub struct Joined {
    root: Weak<Root>,
    items: Items,
}

impl Joined {
    pub(crate) fn new<I>(root: &Arc<Root>, entries: I) -> Self
    where
        I: IntoIterator<Item = (Key, Arc<Item>)>,
    {
        Self {
            root: Arc::downgrade(root),
            items: Arc::new(RwLock::new(entries.into_iter().collect())),
        }
    }

    /// Returns the joined items as a branch of the linked collection.
    pub fn collection(&self) -> Option<Collection> {
        let root = self.root.upgrade()?;
        Some(Collection {
            root,
            items: Arc::clone(&self.items),
            branch: true,
        })
    }

    /// Returns the number of joined items.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Returns true if no items are joined.
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub(crate) fn insert(&self, key: Key, item: Arc<Item>) {
        self.items.write().insert(key, item);
    }
}

impl std::fmt::Debug for Joined {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Joined")
            .field("len", &self.len())
            .field("live", &(self.root.strong_count() > 0))
            .finish()
    }
}

/// A derived attribute installed on an item by a link.
#[derive(Clone)]
pub enum Attribute {
    /// The joined items of the linked collection owned by this item.
    Many(Joined),
    /// The item owning this one through a link.
    Single(Weak<Item>),
}

impl Attribute {
    /// Returns the joined collection, if this is a `Many` attribute whose
    /// collection is still mirrored.
    pub fn as_collection(&self) -> Option<Collection> {
        match self {
            Attribute::Many(joined) => joined.collection(),
            Attribute::Single(_) => None,
        }
    }

    /// Returns the owning item, if this is a live `Single` attribute.
    pub fn parent(&self) -> Option<Arc<Item>> {
        match self {
            Attribute::Single(parent) => parent.upgrade(),
            Attribute::Many(_) => None,
        }
    }
}

impl std::fmt::Debug for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Attribute::Many(joined) => f.debug_tuple("Many").field(joined).finish(),
            Attribute::Single(parent) => match parent.upgrade() {
                Some(item) => f.debug_tuple("Single").field(&item.key()).finish(),
                None => f.write_str("Single(<dropped>)"),
            },
        }
    }
}

/// One member of a collection: a record plus the attributes links derive
/// for it.
pub struct Item {
    record: Arc<Record>,
    attributes: RwLock<HashMap<String, Attribute>>,
    extension: Option<Box<dyn Any + Send + Sync>>,
}

impl Item {
    pub(crate) fn new(record: Arc<Record>, constructor: Option<&Constructor>) -> Self {
        let extension = constructor.map(|build| build(&record));
        Self {
            record,
            attributes: RwLock::new(HashMap::new()),
            extension,
        }
    }

    /// Returns the mirrored record.
    pub fn record(&self) -> &Arc<Record> {
        &self.record
    }

    /// Returns the collection key.
    pub fn key(&self) -> Key {
        self.record.key()
    }

    /// Shorthand for [`Record::get`].
    pub fn get(&self, field: &str) -> Option<Value> {
        self.record.get(field)
    }

    /// Shorthand for [`Record::set`].
    ///
    /// # Errors
    ///
    /// See [`Record::set`].
    pub fn set(&self, field: &str, value: impl Into<Value>) -> CoreResult<()> {
        self.record.set(field, value)
    }

    /// Returns the attribute `name`.
    pub fn attribute(&self, name: &str) -> Option<Attribute> {
        self.attributes.read().get(name).cloned()
    }

    /// Returns true if a link installed `name` on this item.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.read().contains_key(name)
    }

    /// Returns the attribute names.
    pub fn attribute_names(&self) -> Vec<String> {
        self.attributes.read().keys().cloned().collect()
    }

    /// Returns the joined collection stored under `name`.
    pub fn joined(&self, name: &str) -> Option<Collection> {
        match self.attributes.read().get(name) {
            Some(Attribute::Many(joined)) => joined.collection(),
            _ => None,
        }
    }

    /// Returns the owning item stored under `name`.
    pub fn parent(&self, name: &str) -> Option<Arc<Item>> {
        self.attributes.read().get(name).and_then(Attribute::parent)
    }

    /// Returns the extension built by the collection's constructor.
    pub fn extension<T: Any>(&self) -> Option<&T> {
        self.extension.as_ref()?.downcast_ref::<T>()
    }

    pub(crate) fn set_attribute(&self, name: &str, attribute: Attribute) {
        self.attributes.write().insert(name.to_string(), attribute);
    }

    pub(crate) fn clear_attributes(&self) {
        let cleared = std::mem::take(&mut *self.attributes.write());
        drop(cleared);
    }

    /// Installs `attribute` unless `name` is taken; returns whether it was.
    pub(crate) fn set_attribute_if_absent(&self, name: &str, attribute: Attribute) -> bool {
        let mut attributes = self.attributes.write();
        if attributes.contains_key(name) {
            return false;
        }
        attributes.insert(name.to_string(), attribute);
        true
    }
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Item")
            .field("record", &self.record)
            .field("attributes", &self.attribute_names())
            .finish_non_exhaustive()
    }
}
