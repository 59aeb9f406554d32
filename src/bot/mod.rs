//! Bot module for handling Telegram interactions
//!
//! This module is split into several submodules:
//! - `action`: Commands, callback data and the actions they map to
//! - `menu`: Decides which options a chat is offered
//! - `ui_builder`: Creates keyboards and formats messages
//! - `transport`: Outbound messages, behind a trait
//! - `context`: Shared state handed to the handlers
//! - `dialogue_manager`: Access gate, PIN protocols and action handlers
//! - `message_handler`: Handles incoming text messages and commands
//! - `callback_handler`: Handles inline keyboard callback queries

pub mod action;
pub mod callback_handler;
pub mod context;
pub mod dialogue_manager;
pub mod menu;
pub mod message_handler;
pub mod transport;
pub mod ui_builder;

// Re-export main handler functions for use in main.rs
pub use callback_handler::{callback_handler, handle_callback_data};
pub use message_handler::{handle_text, message_handler};

pub use action::{Action, Callback, Command};
pub use context::{Actor, AppContext, Instrument};
pub use transport::{TelegramTransport, Transport};
