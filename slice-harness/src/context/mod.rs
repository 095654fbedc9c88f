//! Identity and context records shared with stages.

mod identity;
mod locations;

pub use identity::{SliceIdentity, StageContext};
pub use locations::{DirectoryResolver, PolicyDirectories, DB_URL_KEY, NAMED_DIRECTORIES};
