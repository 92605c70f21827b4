pub mod workspace;

pub use workspace::{WorkArea, Workspace};
