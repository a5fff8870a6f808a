pub mod pdar;

pub use crate::pdar::archive::{Archive, ArchiveHeader};
pub use crate::pdar::digest::DigestAlgorithm;
pub use crate::pdar::entry::Entry;
pub use crate::pdar::error::*;
pub use crate::pdar::patcher::{DefaultErrorHandler, ErrorHandler, LenientErrorHandler, Patcher};
pub use crate::pdar::planner::plan;
