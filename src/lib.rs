#![doc = include_str!("../README.md")]

mod config;
mod error;

pub mod crc;
pub mod framing;
pub mod lrit;
pub mod msdu;
pub mod pipeline;
pub mod seq;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
