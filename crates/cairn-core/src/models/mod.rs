//! Data models
//!
//! Workers, files and their bindings, transfers, and paging.

mod file;
mod page;
mod transfer;
mod worker;

pub use file::*;
pub use page::*;
pub use transfer::*;
pub use worker::*;
