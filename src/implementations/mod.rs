pub mod actions;
pub mod balance;
pub mod classifier;
pub mod contracts;
pub mod network;
pub mod refresh;
