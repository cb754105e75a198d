pub mod init;
pub mod run;

pub use init::{init, InitArgs};
pub use run::{run, RunArgs};
