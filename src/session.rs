//! Chat session module holding per-user conversation state and the PIN protocols.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::info;

/// Number of digits in a PIN
pub const PIN_LENGTH: usize = 4;

/// Wrong PIN entries tolerated before the user is returned to the queue
pub const MAX_PIN_TRIES: u8 = 3;

/// Represents where a chat currently is in the menu flow
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ChatStatus {
    #[default]
    Start,
    Join,
    Admin,
    Instr,
    Back,
    Bye,
    NewPin,
    PinCheck,
}

impl ChatStatus {
    pub fn is_pin_entry(self) -> bool {
        matches!(self, ChatStatus::NewPin | ChatStatus::PinCheck)
    }
}

/// What a single keypad digit did to the session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PinOutcome {
    /// Digit arrived outside the PIN states; nothing changed
    NotEnteringPin,
    /// Not a decimal digit; nothing changed
    InvalidDigit,
    /// Buffer not full yet
    Collecting,
    /// First entry of a new PIN stored; waiting for the confirmation
    ConfirmNewPin,
    /// Both entries matched; the caller persists `hash`
    PinSaved { hash: String },
    /// Both entries differed; setup restarts
    PinMismatch,
    Verified,
    /// Wrong PIN, `attempt` of [`MAX_PIN_TRIES`]
    WrongPin { attempt: u8 },
    /// Third wrong PIN; the caller returns the user to the queue
    LockedOut,
}

impl PinOutcome {
    /// Whether the reply should offer a keyboard again
    pub fn offers_keyboard(&self) -> bool {
        !matches!(
            self,
            PinOutcome::NotEnteringPin | PinOutcome::InvalidDigit | PinOutcome::Collecting | PinOutcome::LockedOut
        )
    }
}

/// Conversation state for one Telegram user
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatSession {
    pub user_id: u64,
    /// Chat the user last wrote from; replies and notices go there
    pub chat_id: i64,
    pub username: String,
    pub status: ChatStatus,
    /// Instrument id while inside an instrument menu
    pub context: Option<String>,
    pub pin_buffer: String,
    /// First-entry hash during PIN setup
    pub pending_hash: Option<String>,
    pub retry_count: u8,
    pub last_verified_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(user_id: u64, chat_id: i64, username: impl Into<String>) -> Self {
        Self {
            user_id,
            chat_id,
            username: username.into(),
            status: ChatStatus::Start,
            context: None,
            pin_buffer: String::new(),
            pending_hash: None,
            retry_count: 0,
            last_verified_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn set_status(&mut self, status: ChatStatus) {
        self.status = status;
        if status.is_pin_entry() {
            self.pin_buffer.clear();
            self.pending_hash = None;
        }
        if status == ChatStatus::Bye {
            self.last_verified_at = DateTime::<Utc>::UNIX_EPOCH;
        }
    }

    /// Enter an instrument menu, remembering which instrument
    pub fn enter_instrument(&mut self, instrument_id: impl Into<String>) {
        self.context = Some(instrument_id.into());
        self.set_status(ChatStatus::Instr);
    }

    /// Feed one keypad digit into the PIN protocols.
    ///
    /// `stored_hash` is the user's persisted credential, compared during
    /// verification. Nothing is hashed until exactly [`PIN_LENGTH`] digits
    /// have been collected.
    pub fn handle_pin_digit(&mut self, digit: char, stored_hash: Option<&str>, now: DateTime<Utc>) -> PinOutcome {
        if !self.status.is_pin_entry() {
            return PinOutcome::NotEnteringPin;
        }
        if !digit.is_ascii_digit() {
            return PinOutcome::InvalidDigit;
        }

        self.pin_buffer.push(digit);
        if self.pin_buffer.len() < PIN_LENGTH {
            return PinOutcome::Collecting;
        }

        let hash = hash_pin(&self.pin_buffer);
        self.pin_buffer.clear();

        match self.status {
            ChatStatus::NewPin => match self.pending_hash.take() {
                None => {
                    self.pending_hash = Some(hash);
                    PinOutcome::ConfirmNewPin
                }
                Some(first) if first == hash => {
                    self.mark_verified(now);
                    PinOutcome::PinSaved { hash }
                }
                Some(_) => PinOutcome::PinMismatch,
            },
            _ => {
                if stored_hash == Some(hash.as_str()) {
                    self.mark_verified(now);
                    return PinOutcome::Verified;
                }
                self.retry_count += 1;
                if self.retry_count < MAX_PIN_TRIES {
                    PinOutcome::WrongPin {
                        attempt: self.retry_count,
                    }
                } else {
                    self.retry_count = 0;
                    PinOutcome::LockedOut
                }
            }
        }
    }

    fn mark_verified(&mut self, now: DateTime<Utc>) {
        self.set_status(ChatStatus::Start);
        self.last_verified_at = now;
        self.retry_count = 0;
    }
}

/// Hex-encoded SHA-256 of the PIN digits
pub fn hash_pin(pin: &str) -> String {
    hex::encode(Sha256::digest(pin.as_bytes()))
}

/// In-memory sessions keyed by Telegram user id, living for the whole process.
///
/// Group members share a chat id, so the chat is only where replies go.
#[derive(Debug, Default)]
pub struct SessionTable {
    users: HashMap<u64, ChatSession>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the session of a user, creating it on first contact.
    ///
    /// The reply chat and username follow the latest update.
    pub fn entry(&mut self, user_id: u64, chat_id: i64, username: &str) -> &mut ChatSession {
        let session = self.users.entry(user_id).or_insert_with(|| {
            info!(user = %username, user_id, chat_id, "Initiated chat with user");
            ChatSession::new(user_id, chat_id, username)
        });
        session.chat_id = chat_id;
        if session.username != username {
            session.username = username.to_string();
        }
        session
    }

    pub fn get(&self, user_id: u64) -> Option<&ChatSession> {
        self.users.get(&user_id)
    }

    /// Chat id of the most recent session opened by `username`, if any
    pub fn chat_of(&self, username: &str) -> Option<i64> {
        self.users
            .values()
            .find(|session| session.username == username)
            .map(|session| session.chat_id)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn enter(session: &mut ChatSession, pin: &str, stored: Option<&str>) -> PinOutcome {
        let now = Utc::now();
        let mut outcome = PinOutcome::Collecting;
        for digit in pin.chars() {
            outcome = session.handle_pin_digit(digit, stored, now);
        }
        outcome
    }

    #[test]
    fn test_default_status() {
        let session = ChatSession::new(1, 1, "alice");
        assert_eq!(session.status, ChatStatus::Start);
        assert_eq!(session.last_verified_at, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(ChatStatus::default(), ChatStatus::Start);
    }

    #[test]
    fn test_pin_states_reset_buffers() {
        let mut session = ChatSession::new(1, 1, "alice");
        session.set_status(ChatStatus::NewPin);
        enter(&mut session, "1234", None);
        assert!(session.pending_hash.is_some());
        session.handle_pin_digit('5', None, Utc::now());

        session.set_status(ChatStatus::PinCheck);
        assert!(session.pin_buffer.is_empty());
        assert!(session.pending_hash.is_none());
    }

    #[test]
    fn test_bye_resets_verification_time() {
        let mut session = ChatSession::new(1, 1, "alice");
        session.last_verified_at = Utc::now();
        session.set_status(ChatStatus::Bye);
        assert_eq!(session.last_verified_at, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_digits_outside_pin_states_rejected() {
        let mut session = ChatSession::new(1, 1, "alice");
        let before = session.clone();
        assert_eq!(session.handle_pin_digit('1', None, Utc::now()), PinOutcome::NotEnteringPin);
        assert_eq!(session, before);
    }

    #[test]
    fn test_partial_pin_is_silent() {
        let mut session = ChatSession::new(1, 1, "alice");
        session.set_status(ChatStatus::PinCheck);
        assert_eq!(enter(&mut session, "123", None), PinOutcome::Collecting);
        assert_eq!(session.pin_buffer, "123");
        assert_eq!(session.retry_count, 0);
    }

    #[test]
    fn test_non_digit_rejected() {
        let mut session = ChatSession::new(1, 1, "alice");
        session.set_status(ChatStatus::NewPin);
        assert_eq!(session.handle_pin_digit('x', None, Utc::now()), PinOutcome::InvalidDigit);
        assert!(session.pin_buffer.is_empty());
    }

    #[test]
    fn test_new_pin_match() {
        let mut session = ChatSession::new(1, 1, "alice");
        session.set_status(ChatStatus::NewPin);
        let before = Utc::now();
        assert_eq!(enter(&mut session, "4821", None), PinOutcome::ConfirmNewPin);
        let outcome = enter(&mut session, "4821", None);
        assert_eq!(
            outcome,
            PinOutcome::PinSaved {
                hash: hash_pin("4821")
            }
        );
        assert_eq!(session.status, ChatStatus::Start);
        assert!(session.last_verified_at >= before);
    }

    #[test]
    fn test_new_pin_mismatch_restarts() {
        for (first, second) in [("1111", "2222"), ("0000", "0001"), ("9876", "6789")] {
            let mut session = ChatSession::new(1, 1, "alice");
            session.set_status(ChatStatus::NewPin);
            enter(&mut session, first, None);
            assert_eq!(enter(&mut session, second, None), PinOutcome::PinMismatch);
            assert_eq!(session.status, ChatStatus::NewPin);
            assert!(session.pending_hash.is_none());
            assert!(session.pin_buffer.is_empty());
        }
    }

    #[test]
    fn test_pin_check_success_resets_tries() {
        let stored = hash_pin("2468");
        let mut session = ChatSession::new(1, 1, "alice");
        session.set_status(ChatStatus::PinCheck);
        assert_eq!(enter(&mut session, "1111", Some(&stored)), PinOutcome::WrongPin { attempt: 1 });
        assert_eq!(enter(&mut session, "2468", Some(&stored)), PinOutcome::Verified);
        assert_eq!(session.retry_count, 0);
        assert_eq!(session.status, ChatStatus::Start);
        assert!(Utc::now() - session.last_verified_at < Duration::minutes(1));
    }

    #[test]
    fn test_three_wrong_pins_lock_out() {
        let stored = hash_pin("2468");
        let mut session = ChatSession::new(1, 1, "alice");
        session.set_status(ChatStatus::PinCheck);
        assert_eq!(enter(&mut session, "0000", Some(&stored)), PinOutcome::WrongPin { attempt: 1 });
        assert_eq!(enter(&mut session, "0000", Some(&stored)), PinOutcome::WrongPin { attempt: 2 });
        assert_eq!(enter(&mut session, "0000", Some(&stored)), PinOutcome::LockedOut);
        assert_eq!(session.retry_count, 0);
        assert!(session.pin_buffer.is_empty());
    }

    #[test]
    fn test_hash_pin_is_sha256_hex() {
        assert_eq!(
            hash_pin("1234"),
            "03ac674216f3e15c761ee1a5e255f067953623c8b388b4459e13f978d7c846f4"
        );
    }

    #[test]
    fn test_session_table_creates_once() {
        let mut table = SessionTable::new();
        table.entry(7, 7, "alice").set_status(ChatStatus::Join);
        assert_eq!(table.entry(7, 7, "alice").status, ChatStatus::Join);
        assert_eq!(table.len(), 1);
        assert_eq!(table.chat_of("alice"), Some(7));
        assert_eq!(table.chat_of("bob"), None);
    }

    #[test]
    fn test_group_members_get_separate_sessions() {
        let mut table = SessionTable::new();
        table.entry(7, -100, "alice").set_status(ChatStatus::Admin);
        table.entry(8, -100, "bob");
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(7).map(|s| s.status), Some(ChatStatus::Admin));
        assert_eq!(table.get(8).map(|s| s.status), Some(ChatStatus::Start));
        assert_eq!(table.get(8).map(|s| s.username.as_str()), Some("bob"));

        // Moving to a private chat keeps the state and follows the chat
        table.entry(7, 7, "alice");
        assert_eq!(table.get(7).map(|s| s.status), Some(ChatStatus::Admin));
        assert_eq!(table.chat_of("alice"), Some(7));
    }
}
