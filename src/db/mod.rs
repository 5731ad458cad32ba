pub mod entities;
pub mod enums;
pub mod json_file;
pub mod models;
pub mod store;

pub use store::{NewTarget, StoreError, UrlStore};
