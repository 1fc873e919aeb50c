pub mod config;
pub mod messages;
pub mod motor;
pub mod runtime;
pub mod supervisor;
