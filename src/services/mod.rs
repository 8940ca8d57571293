// Services module - Business logic

pub mod attendance;
pub mod dds;
pub mod import;
pub mod live;
pub mod lockup;
pub mod password;
pub mod visitors;
