pub mod cli;
pub mod constants;
pub mod docker;
pub mod errors;
pub mod managers;
pub mod output;
pub mod services;
pub mod ssh;
pub mod utils;
