//! Scheduling and proxying of file operations on the master.
//!
//! [`FileBroker`] picks a worker for new files through a [`WorkerSelector`],
//! finds the owning worker of existing files through [`BindingResolver`], and
//! forwards the work with a `cairn_proxy::WorkerClient`.

pub mod broker;
pub mod resolver;
pub mod retention;
pub mod selector;
mod transfer;

pub use broker::{BrokerRepositories, FileBroker, NamedDownload};
pub use resolver::BindingResolver;
pub use retention::{RetentionConfig, RetentionSweeper};
pub use selector::{build_selector, OperationKind, StaticWorkerSelector, WorkerSelector};
