pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod models;
pub mod repos;
pub mod routes;
pub mod state;
pub mod upload;
pub mod usecase;
