pub mod catalog;
pub mod config;
pub mod credentials;
pub mod database;
pub mod error;
pub mod model;
pub mod search;
pub mod session;
pub mod store;

pub use error::{Error, Result};
pub use store::{Context, Page, Store};
