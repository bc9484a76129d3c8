//! The boundary to the backing store that holds products and sales.
//!
//! The expensive read queries of an [`InventoryStore`] are memoized by the
//! [`CatalogService`](crate::catalog::CatalogService), its writes trigger cache invalidation.

use async_trait::async_trait;

use crate::types::{
    BrandFilter, DashboardSummary, NewProduct, Product, ProductId, Sale, StatsWindow,
};

mod memory;

pub use memory::InMemoryStore;

/// Errors raised by an [`InventoryStore`].
///
/// These are cloneable so that a single failure can be handed to every caller waiting on the same
/// cache computation.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or did not respond.
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
    /// The referenced product does not exist.
    #[error("product {0} not found")]
    NotFound(ProductId),
    /// A sale asked for more units than are in stock.
    #[error("insufficient stock for product {product}: requested {requested}, available {available}")]
    InsufficientStock {
        product: ProductId,
        requested: u32,
        available: u32,
    },
    /// The submitted data was rejected.
    #[error("invalid input: {0}")]
    Invalid(String),
}

/// Queries and mutations of the inventory.
#[async_trait]
pub trait InventoryStore: Send + Sync + 'static {
    /// Returns the sorted, distinct model names of all products passing `filter`.
    async fn distinct_models(&self, filter: &BrandFilter) -> Result<Vec<String>, StoreError>;

    /// Returns the sorted, distinct colors that `model` is available in.
    async fn distinct_colors(&self, model: &str) -> Result<Vec<String>, StoreError>;

    /// Aggregates the dashboard numbers for the given time window.
    async fn dashboard_summary(&self, window: StatsWindow)
    -> Result<DashboardSummary, StoreError>;

    /// Inserts a new product, returning it with its assigned id.
    async fn insert_product(&self, product: NewProduct) -> Result<Product, StoreError>;

    /// Sets the units in stock of a product.
    async fn update_stock(&self, id: ProductId, stock: u32) -> Result<Product, StoreError>;

    /// Deletes a product, returning it.
    async fn delete_product(&self, id: ProductId) -> Result<Product, StoreError>;

    /// Records a sale of `quantity` units, taking them out of stock.
    async fn record_sale(&self, id: ProductId, quantity: u32) -> Result<Sale, StoreError>;
}
