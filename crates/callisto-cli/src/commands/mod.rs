pub mod config;
pub mod crop;
pub mod extract;
pub mod info;
