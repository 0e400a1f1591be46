#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod auth;
pub mod error;
pub mod http;
#[cfg(feature = "ws")]
pub mod notify;
#[cfg(feature = "ws")]
pub(crate) mod serde_helpers;
pub mod storage;
#[cfg(feature = "ws")]
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;
