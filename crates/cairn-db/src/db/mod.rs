//! Repositories for the data access layer
//!
//! Each store is described by a trait so the broker can run against
//! PostgreSQL (`Pg*Repository`) or the in-process [`memory::MemoryStore`].

pub mod binding;
pub mod file;
pub mod memory;
pub mod transfer;
pub mod worker;

pub use binding::{BindingRepository, PgBindingRepository};
pub use file::{FileRepository, PgFileRepository};
pub use memory::MemoryStore;
pub use transfer::{PgTransferRepository, TransferRepository};
pub use worker::{PgWorkerRepository, WorkerRepository};
