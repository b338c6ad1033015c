//! tumorscan - brain MRI tumor classification web app
//!
//! This library provides the web application (accounts, uploads, history)
//! and the classifier it serves, together with the dataset preparation and
//! training code used by the offline tools.

pub mod api;
pub mod classifier;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod theme;
