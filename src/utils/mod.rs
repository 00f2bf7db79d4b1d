//! Small shared utilities.

pub mod mime;
pub mod path;
pub mod plural;

pub use path::normalize_path;
pub use plural::plural_s;
