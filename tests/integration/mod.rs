//! End-to-end tests driving [`reforge::service::UpdaterService`] against
//! local git repositories.

#[path = "../common/mod.rs"]
mod common;

mod pr_lifecycle;
mod rollback;
mod update_flow;
