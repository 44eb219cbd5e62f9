//! Lists completed downloads on remote download boxes, dedups them against
//! the local catalogs and fetches selected items, unpacking archives on the
//! box first.

pub mod catalog;
pub mod config;
pub mod error;
pub mod host_group;
pub mod listing;
pub mod media;
pub mod models;
pub mod remote;
pub mod unpack;

pub use error::{Error, Result};
pub use host_group::{DownloadPlan, GroupOptions, HostGroup};
pub use listing::{ItemKey, Listing, ListingItem};
pub use models::{HostConfig, MediaType};
pub use remote::RemoteHost;
pub use unpack::UnpackProgressParser;
