//! HTTP surface of cmsync: JSON API, CMS webhook and health check.
//!
//! The `cmsync` binary mounts [`server::build_router`] under `cmsync serve`;
//! integration tests drive the same router with `tower::ServiceExt::oneshot`.

pub mod server;
