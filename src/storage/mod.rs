pub mod buffer;
pub mod memory;
pub mod positions;
pub mod traits;

pub use buffer::FileBufferStore;
pub use memory::MemoryBufferStore;
pub use positions::{FilePositionRecord, PositionError, PositionStore};
pub use traits::{BufferStore, StorageError};
