pub mod auth;
pub mod config;
pub mod request;
pub mod resource;
pub mod tenant;
