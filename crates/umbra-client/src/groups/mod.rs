//! Group lifecycle: creation, membership, promotion, key rotation.

pub mod debounce;
pub mod manager;

pub use debounce::FailureDebouncer;
pub use manager::GroupManager;
