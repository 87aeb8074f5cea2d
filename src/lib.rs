pub mod cli;
pub mod collector;
pub mod config;
pub mod delivery;
pub mod source;
pub mod storage;
