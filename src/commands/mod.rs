pub mod call_api;
pub mod device_api;

pub use call_api::CallHost;
