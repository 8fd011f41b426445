pub mod app;
pub mod bot_detection;
pub mod error;
pub mod geoip;
pub mod routes;
pub mod state;
pub mod tracker;
