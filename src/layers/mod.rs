pub mod listener;
pub mod rpc;
pub mod session;
