pub mod args;
pub mod config;
pub mod db;
pub mod service;
pub mod util;
