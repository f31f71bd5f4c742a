pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use memory::InMemoryAccountStore;
pub use models::{Account, NewAccount, Role, Subscription};
pub use postgres::PgAccountStore;
pub use store::{AccountStore, StoreError};
