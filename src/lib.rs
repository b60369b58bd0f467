//! Client-side core of the Rumbo passenger app: REST access, the realtime
//! trip channel, trip state synchronization, location enhancement and route
//! fetching with bounded retry. The UI layer observes these stores and
//! renders; nothing in this crate draws.

pub mod channel;
pub mod config;
pub mod core;
pub mod error;
pub mod location;
pub mod rest;
pub mod route;
pub mod storage;
pub mod store;
pub mod types;
pub mod util;

pub use crate::config::Config;
pub use crate::core::ClientCore;
pub use crate::error::{ChannelError, CoreError, HttpError, StoreError};
