//! Application-level wiring.

#[allow(clippy::module_inception)]
mod app;

pub use app::{
    App, AppContext, AppError, Result, BRANCHES_RESOURCE, COMMITS_RESOURCE, PIPELINES_RESOURCE,
    RECORD_CACHE_NAME,
};
