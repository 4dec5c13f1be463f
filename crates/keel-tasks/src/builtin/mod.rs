//! Concrete tasks driven by the project file

mod classpath;
mod command;

pub use classpath::ClasspathTask;
pub use command::CommandTask;
