// HTTP APIs: credentials CRUD, tracker reads/writes, magic-link issuance

pub mod credentials;
pub mod magic_link;
pub mod tracker;

pub use credentials::{create_credentials_router, CredentialsAppState};
pub use magic_link::{create_magic_link_router, LinkSender, LogSender, MagicLinkAppState};
pub use tracker::{create_tracker_router, TrackerAppState};
