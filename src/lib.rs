// HTTP APIs: credentials, tracker reads/writes, magic-link issuance
pub mod api;

// Caller identity resolution
pub mod auth;

// Per-user scoped caching with tag invalidation
pub mod cache;

// Configuration and secrets
pub mod config;

// Envelope encryption, credential records, and the vault
pub mod credentials;

// Credential-gated tracker access
pub mod gateway;

// Magic-link issuance rate limiting
pub mod ratelimit;

// Shared key-value store abstraction
pub mod store;

// Tracker (Redmine-compatible) client and types
pub mod tracker;
