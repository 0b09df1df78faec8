pub mod config;
pub mod invoker;
