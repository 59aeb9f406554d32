//! # IonWatcher Telegram Bot
//!
//! A Telegram bot that lets a lab team follow their sequencing instruments:
//! a membership queue moderated by administrators, optional PIN checks and
//! run reports pulled from the instruments' web dashboards.

pub mod access;
pub mod bot;
pub mod config;
pub mod credentials;
pub mod dashboard;
pub mod errors;
pub mod localization;
pub mod session;
pub mod ticker;
