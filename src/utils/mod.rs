pub mod cancellation;
pub mod file;
pub mod paths;
pub mod retry;
