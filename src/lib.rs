pub mod backend;
pub mod core;
pub mod learn;
pub mod session;
