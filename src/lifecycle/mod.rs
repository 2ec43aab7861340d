//! Extract lifecycle: creation, snapshot download, timestamp alignment and
//! incremental updates.
//!
//! ```text
//! ABSENT --create--> CREATED --download--> POPULATED --update--> POPULATED
//! CREATED / POPULATED --delete--> ABSENT
//! ```

pub mod locks;
pub mod manager;
pub mod timestamp;

pub use manager::{ExtractManager, OpenFile};
