// Snapshot builder - pages in, sorted TSV files out

pub mod layout;
pub mod paginator;
pub mod table;
pub mod writer;

pub use layout::PlaylistFile;
pub use paginator::{Collected, PagePolicy, PageSource};
