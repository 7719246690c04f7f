//! Read-only lookup into the item catalog.
//!
//! The catalog itself (CRUD, moderation, images) lives outside the
//! settlement core; this trait is the only view the core has of it. The core
//! never mutates catalog data.

use std::sync::Arc;

use crate::ids::{
    ItemId,
    UserId,
};

/// A catalog item as seen by the settlement core.
#[derive(Clone, Debug)]
pub struct CatalogItem {
    pub item_id: ItemId,
    pub seller_id: UserId,
    pub title: String,
}

pub trait ItemCatalog: Send + Sync {
    fn get(&self, item_id: ItemId) -> Option<CatalogItem>;
}

/// A fixed in-memory catalog for tests and embedders without a real catalog
/// service.
pub struct InMemoryCatalog {
    items: papaya::HashMap<ItemId, CatalogItem>,
}

impl InMemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: papaya::HashMap::new(),
        }
    }

    pub fn insert(&self, item: CatalogItem) {
        self.items.pin().insert(item.item_id, item);
    }

    #[must_use]
    pub fn with_items(items: impl IntoIterator<Item = CatalogItem>) -> Arc<Self> {
        let catalog = Self::new();
        for item in items {
            catalog.insert(item);
        }
        Arc::new(catalog)
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemCatalog for InMemoryCatalog {
    fn get(&self, item_id: ItemId) -> Option<CatalogItem> {
        self.items.pin().get(&item_id).cloned()
    }
}
