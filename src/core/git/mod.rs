mod classify;
mod repo;

pub use classify::*;
pub use repo::*;
