pub mod store;

pub use store::{PendingConfig, PendingRegistrationStore};
