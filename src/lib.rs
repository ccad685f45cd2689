#![forbid(unsafe_code)]

pub mod build;
pub mod cli;
pub mod config;
pub mod deliver;
pub mod digest;
pub mod document;
pub mod epub;
pub mod extract;
pub mod fetch;
pub mod formats;
pub mod listing;
pub mod logging;
pub mod select;
