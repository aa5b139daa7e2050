pub mod cli;

pub use cli::{Cli, Commands, LabelKind, SohModeArg};
