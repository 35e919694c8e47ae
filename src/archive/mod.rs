mod engine;
mod flush;
mod handle;

pub use engine::Archive;
pub use flush::{backup_path, staging_path, FlushReport};
pub use handle::{MemberReader, MemberWriter};
