//! Persistence for the Cairn master: worker registry, file metadata, file to
//! worker bindings and transfer tracking.

pub mod db;

pub use db::*;
