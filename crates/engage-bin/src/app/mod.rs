//! Application wiring and command handlers.

mod commands;
mod init;

pub use commands::{
    clear_campaign, drain, login, logout, parse_attribute, status, track_event, track_open,
};
pub use init::{Engage, RunOptions};
