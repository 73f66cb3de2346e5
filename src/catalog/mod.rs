//! Read-only access to the product catalog (component A).

mod store;

pub use store::CatalogStore;
