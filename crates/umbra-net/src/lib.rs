// HTTPS clients for the swarm storage network and community servers.

pub mod auth;
pub mod backend;
pub mod community;
pub mod snode;

mod error;

pub use auth::{verify_request, RequestAuth};
pub use backend::{Backend, HttpBackend, HttpRequest, HttpResponse, Method, MockBackend};
pub use community::{CommunityClient, InboxMessage, RoomMessage, CAPABILITY_BLIND};
pub use error::{ErrorClass, NetError, Result};
pub use snode::{SnodeClient, StoredMessage};
