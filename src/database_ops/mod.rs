pub mod catalog;
pub mod db;
pub mod store;

pub use db::Db;
pub use store::{Document, DocumentStore, Filter, GroupLeader, ID_FIELD};
