//! Core ring logic - pure computation with no direct I/O.
//!
//! Contains the request handler (`server`), the iterative owner lookup (`router`),
//! the value `store` and the stabilization schedule (`maintenance`).
//! All I/O orchestration lives in `actor/`, which calls into this module.

pub(crate) mod maintenance;
pub(crate) mod router;
pub(crate) mod server;
pub(crate) mod store;
