//! Strata core: overlay registry and synchronization engine
//!
//! - [`overlay`]: catalog model, merge and the catalog document codec
//! - [`remote`]: remote catalog fetching with a URL-keyed cache
//! - [`backend`]: add/sync/delete backends dispatched by source type
//! - [`conf`]: package manager config fragments
//! - [`installed`]: the persisted installed overlay set
//! - [`api`]: the operations behind the `strata` command

pub mod api;
pub mod backend;
pub mod conf;
pub mod config;
pub mod error;
pub mod guard;
pub mod installed;
pub mod overlay;
pub mod remote;

mod fsutil;

pub use api::{RegistryApi, Selection};
pub use config::Config;
pub use error::{OverlayError, RegistryError};
