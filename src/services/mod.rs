pub mod ai;
pub mod cache;
pub mod claims;
pub mod events;
pub mod fingerprint;
pub mod guard;
pub mod lock;
pub mod media;
pub mod pipeline;
pub mod queue;
pub mod retry;
