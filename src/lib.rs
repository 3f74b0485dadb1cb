pub mod app;
pub mod catalog;
pub mod config;
pub mod context;
pub mod db;
pub mod domain;
pub mod error;
pub mod isbndb;
pub mod output;
pub mod retry;
pub mod shelves;
pub mod users;
