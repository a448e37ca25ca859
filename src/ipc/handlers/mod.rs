pub mod activities;
pub mod auth;
pub mod catalog;
pub mod core;
pub mod evaluations;
pub mod import;
pub mod skills;
pub mod students;
