//! [`ServiceSupervisor`](crate::installer::ServiceSupervisor) implementations.

mod file;
mod memory;

pub use file::FileSupervisor;
pub use memory::MemorySupervisor;
