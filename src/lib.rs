pub mod chat;
pub mod cli;
pub mod config;
pub mod driver;
pub mod generator;
pub mod models;
pub mod store;
pub mod youtube;
