mod dispatch;
pub mod init;
pub(crate) mod run;
pub(crate) mod store;

pub use dispatch::dispatch;
