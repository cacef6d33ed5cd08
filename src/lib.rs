//! Photo booth stylization service
//!
//! Receives a visitor photo and nickname, runs it through an external
//! image-generation API one request at a time, and stores the original and
//! the illustration in blob storage (Dropbox or Cloudflare R2).

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
