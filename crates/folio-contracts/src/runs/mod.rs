pub mod previews;
pub mod summary;

pub use previews::{render_gallery, write_gallery, Preview};
pub use summary::{write_summary, RunSummary};
