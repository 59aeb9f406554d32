//! Menu presenter: which options to offer for a chat's current state.
//!
//! Pure mapping; rendering is left to `ui_builder` and the transport.

use crate::credentials::Membership;
use crate::session::ChatStatus;

use super::action::{Callback, InstrumentCommand};

/// Run buttons per keyboard row
const RUNS_PER_ROW: usize = 4;

/// Heading shown above a menu
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MenuHeading {
    /// "How can I help you, <first name>?"
    Greeting,
    AdminMenu,
    ChooseAction,
    EnterPin,
}

/// Button label, resolved through the message catalog by `ui_builder`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ButtonLabel {
    Administration,
    Exit,
    Back,
    JoinQueue,
    Approve(String),
    Block,
    StartTicking,
    StopTicking,
    ViewQueue,
    DownloadLog,
    Kill,
    Monitor,
    /// Used verbatim (instrument names, run ids, digits)
    Text(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MenuButton {
    pub label: ButtonLabel,
    pub callback: Callback,
}

impl MenuButton {
    pub fn new(label: ButtonLabel, callback: Callback) -> Self {
        Self { label, callback }
    }
}

/// Menu contract: a heading and rows of buttons
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Menu {
    pub heading: MenuHeading,
    pub rows: Vec<Vec<MenuButton>>,
}

impl Menu {
    pub fn buttons(&self) -> impl Iterator<Item = &MenuButton> {
        self.rows.iter().flatten()
    }
}

/// Everything the presenter looks at
#[derive(Clone, Debug)]
pub struct MenuView<'a> {
    pub status: ChatStatus,
    pub membership: Membership,
    pub queue: Vec<&'a str>,
    /// (id, display name) of every configured instrument
    pub instruments: Vec<(&'a str, &'a str)>,
    /// Instrument the chat is inside, with its cached run ids
    pub current_instrument: Option<(&'a str, Vec<u64>)>,
}

/// Options to offer, or `None` when nothing should be shown at all
pub fn present(view: &MenuView<'_>) -> Option<Menu> {
    if view.membership == Membership::Blocked {
        return None;
    }

    let mut heading = MenuHeading::Greeting;
    let mut rows: Vec<Vec<MenuButton>> = Vec::new();
    let is_admin = view.membership == Membership::Admin;
    let is_user = view.membership.is_user();

    match view.status {
        ChatStatus::Start => {
            if view.membership == Membership::Queued {
                return None;
            }
            if is_admin {
                rows.push(vec![MenuButton::new(ButtonLabel::Administration, Callback::Administration)]);
            }
            if is_user {
                for (id, name) in &view.instruments {
                    rows.push(vec![MenuButton::new(
                        ButtonLabel::Text(name.to_string()),
                        Callback::OpenInstrument(id.to_string()),
                    )]);
                }
                rows.push(vec![MenuButton::new(ButtonLabel::Exit, Callback::Exit)]);
            } else {
                rows.push(vec![MenuButton::new(ButtonLabel::JoinQueue, Callback::ViewQueue)]);
            }
        }
        ChatStatus::Join => {
            if is_admin {
                heading = MenuHeading::ChooseAction;
                for queued in &view.queue {
                    rows.push(vec![
                        MenuButton::new(
                            ButtonLabel::Approve(queued.to_string()),
                            Callback::Approve(queued.to_string()),
                        ),
                        MenuButton::new(ButtonLabel::Block, Callback::Block(queued.to_string())),
                    ]);
                }
            }
        }
        ChatStatus::Instr => {
            if let (true, Some((id, runs))) = (is_user, &view.current_instrument) {
                rows.push(vec![MenuButton::new(
                    ButtonLabel::Monitor,
                    Callback::Instrument {
                        id: id.to_string(),
                        command: InstrumentCommand::Monitor,
                    },
                )]);
                for chunk in runs.chunks(RUNS_PER_ROW) {
                    rows.push(
                        chunk
                            .iter()
                            .map(|run| {
                                MenuButton::new(
                                    ButtonLabel::Text(run.to_string()),
                                    Callback::Instrument {
                                        id: id.to_string(),
                                        command: InstrumentCommand::Run(*run),
                                    },
                                )
                            })
                            .collect(),
                    );
                }
            }
        }
        ChatStatus::Admin => {
            heading = MenuHeading::AdminMenu;
            if is_admin {
                rows.push(vec![
                    MenuButton::new(ButtonLabel::StartTicking, Callback::StartTicking),
                    MenuButton::new(ButtonLabel::StopTicking, Callback::StopTicking),
                ]);
                rows.push(vec![
                    MenuButton::new(ButtonLabel::ViewQueue, Callback::ViewQueue),
                    MenuButton::new(ButtonLabel::DownloadLog, Callback::SendLog),
                ]);
                rows.push(vec![MenuButton::new(ButtonLabel::Kill, Callback::KillWarning)]);
            }
        }
        ChatStatus::NewPin | ChatStatus::PinCheck => {
            heading = MenuHeading::EnterPin;
            rows = ['0', '5']
                .iter()
                .map(|first| {
                    (0..5)
                        .filter_map(|offset| char::from_digit(first.to_digit(10).unwrap_or(0) + offset, 10))
                        .map(|digit| MenuButton::new(ButtonLabel::Text(digit.to_string()), Callback::PinDigit(digit)))
                        .collect()
                })
                .collect();
        }
        ChatStatus::Back | ChatStatus::Bye => {}
    }

    if !matches!(view.status, ChatStatus::Start | ChatStatus::NewPin | ChatStatus::PinCheck) {
        rows.push(vec![MenuButton::new(ButtonLabel::Back, Callback::Back)]);
    }

    Some(Menu { heading, rows })
}
