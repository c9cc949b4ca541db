mod file;
mod memory;

pub use file::FileSpool;
pub use memory::MemorySpool;
