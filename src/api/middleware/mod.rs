pub mod auth;
pub mod kiosk;
pub mod session;
