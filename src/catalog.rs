//! Product identity lookup.
//!
//! The ledger does not own product metadata.  Recording only needs to know
//! whether an id refers to a product the deployment tracks.

use std::collections::HashSet;

pub trait ProductCatalog: Send + Sync {
    fn contains(&self, product_id: u64) -> bool;
}

/// Fixed set of known product ids, or an open catalog that accepts any
/// non-zero id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    ids: HashSet<u64>,
    open: bool,
}

impl InMemoryCatalog {
    pub fn new(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            ids: ids.into_iter().filter(|&id| id != 0).collect(),
            open: false,
        }
    }

    pub fn open() -> Self {
        Self {
            ids: HashSet::new(),
            open: true,
        }
    }

    /// Catalog for configured ids; an empty list means open.
    pub fn from_config(ids: &[u64]) -> Self {
        if ids.is_empty() {
            Self::open()
        } else {
            Self::new(ids.iter().copied())
        }
    }

    pub fn insert(&mut self, product_id: u64) {
        if product_id != 0 {
            self.ids.insert(product_id);
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl ProductCatalog for InMemoryCatalog {
    fn contains(&self, product_id: u64) -> bool {
        product_id != 0 && (self.open || self.ids.contains(&product_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_catalog_checks_membership() {
        let mut c = InMemoryCatalog::new([42, 7]);
        assert!(c.contains(42));
        assert!(!c.contains(8));
        c.insert(8);
        assert!(c.contains(8));
    }

    #[test]
    fn zero_is_never_a_product() {
        let mut c = InMemoryCatalog::new([0]);
        c.insert(0);
        assert!(!c.contains(0));
        assert!(!InMemoryCatalog::open().contains(0));
    }

    #[test]
    fn empty_config_means_open() {
        assert!(InMemoryCatalog::from_config(&[]).is_open());
        assert!(InMemoryCatalog::from_config(&[]).contains(123_456));
        assert!(!InMemoryCatalog::from_config(&[1]).contains(2));
    }
}
