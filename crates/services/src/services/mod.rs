pub mod beads;
pub mod config;
pub mod docs;
pub mod http;
pub mod huly;
pub mod letta;
pub mod mappers;
pub mod sync;
pub mod vibe;
pub mod watchers;
