pub mod banner;
pub mod config;
