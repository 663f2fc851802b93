pub mod api;
pub mod import;
pub mod job;
pub mod snapshot;
pub mod validation;
