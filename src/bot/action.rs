//! Commands, inline-button callbacks and the actions they trigger

use std::fmt;

use teloxide::utils::command::BotCommands;

use crate::access::Clearance;

/// Text commands understood by the bot
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
pub enum Command {
    #[command(description = "start a conversation and show the menu.")]
    Start,
    #[command(description = "show this text.")]
    Help,
    #[command(description = "ask to join, or view the queue as an administrator.")]
    Join,
    #[command(description = "end the conversation.")]
    Bye,
    #[command(description = "report uptime every 30 minutes (admins).")]
    Tick,
    #[command(description = "stop reporting uptime (admins).")]
    Untick,
    #[command(description = "download the bot log (admins).")]
    Log,
    #[command(description = "stop the bot (admins).")]
    Kill,
}

/// Commands offered inside an instrument menu
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InstrumentCommand {
    Monitor,
    Run(u64),
}

/// Everything a user can ask the bot to do
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Start,
    Help,
    Join,
    Bye,
    Admin,
    Approve(String),
    Block(String),
    Kill,
    KillWarning,
    SendLog,
    Tick,
    Untick,
    OpenInstrument(String),
    Instrument { id: String, command: InstrumentCommand },
}

impl Action {
    /// Clearance each action is registered with
    pub fn clearance(&self) -> Clearance {
        match self {
            Action::Start | Action::Help | Action::Join => Clearance::Any,
            Action::Bye | Action::OpenInstrument(_) | Action::Instrument { .. } => Clearance::User,
            Action::Admin
            | Action::Approve(_)
            | Action::Block(_)
            | Action::Kill
            | Action::KillWarning
            | Action::SendLog
            | Action::Tick
            | Action::Untick => Clearance::Admin,
        }
    }
}

impl From<Command> for Action {
    fn from(command: Command) -> Self {
        match command {
            Command::Start => Action::Start,
            Command::Help => Action::Help,
            Command::Join => Action::Join,
            Command::Bye => Action::Bye,
            Command::Tick => Action::Tick,
            Command::Untick => Action::Untick,
            Command::Log => Action::SendLog,
            Command::Kill => Action::Kill,
        }
    }
}

/// Data carried by inline keyboard buttons
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Callback {
    Administration,
    SendLog,
    ViewQueue,
    KillWarning,
    StartTicking,
    StopTicking,
    Exit,
    Back,
    Approve(String),
    Block(String),
    PinDigit(char),
    OpenInstrument(String),
    Instrument { id: String, command: InstrumentCommand },
}

impl Callback {
    /// Parse callback data produced by [`Callback::encode`]
    pub fn parse(data: &str) -> Option<Self> {
        let callback = match data {
            "A" => Callback::Administration,
            "L" => Callback::SendLog,
            "Q" => Callback::ViewQueue,
            "K" => Callback::KillWarning,
            "T" => Callback::StartTicking,
            "U" => Callback::StopTicking,
            "E" => Callback::Exit,
            "B" => Callback::Back,
            _ => {
                let (prefix, rest) = data.split_once('_')?;
                match prefix {
                    "App" if !rest.is_empty() => Callback::Approve(rest.to_string()),
                    "Blo" if !rest.is_empty() => Callback::Block(rest.to_string()),
                    "Pin" => {
                        let mut chars = rest.chars();
                        match (chars.next(), chars.next()) {
                            (Some(digit), None) if digit.is_ascii_digit() => Callback::PinDigit(digit),
                            _ => return None,
                        }
                    }
                    "Ins" if !rest.is_empty() => Callback::OpenInstrument(rest.to_string()),
                    "Cmd" => {
                        let (id, command) = rest.split_once(':')?;
                        let command = match command {
                            "Monitor" => InstrumentCommand::Monitor,
                            _ => InstrumentCommand::Run(command.strip_prefix("Run_")?.parse().ok()?),
                        };
                        Callback::Instrument {
                            id: id.to_string(),
                            command,
                        }
                    }
                    _ => return None,
                }
            }
        };
        Some(callback)
    }

    pub fn encode(&self) -> String {
        match self {
            Callback::Administration => "A".to_string(),
            Callback::SendLog => "L".to_string(),
            Callback::ViewQueue => "Q".to_string(),
            Callback::KillWarning => "K".to_string(),
            Callback::StartTicking => "T".to_string(),
            Callback::StopTicking => "U".to_string(),
            Callback::Exit => "E".to_string(),
            Callback::Back => "B".to_string(),
            Callback::Approve(name) => format!("App_{}", name),
            Callback::Block(name) => format!("Blo_{}", name),
            Callback::PinDigit(digit) => format!("Pin_{}", digit),
            Callback::OpenInstrument(id) => format!("Ins_{}", id),
            Callback::Instrument {
                id,
                command: InstrumentCommand::Monitor,
            } => format!("Cmd_{}:Monitor", id),
            Callback::Instrument {
                id,
                command: InstrumentCommand::Run(run),
            } => format!("Cmd_{}:Run_{}", id, run),
        }
    }

    /// The action behind the button; PIN digits are handled separately
    pub fn into_action(self) -> Option<Action> {
        let action = match self {
            Callback::Administration => Action::Admin,
            Callback::SendLog => Action::SendLog,
            Callback::ViewQueue => Action::Join,
            Callback::KillWarning => Action::KillWarning,
            Callback::StartTicking => Action::Tick,
            Callback::StopTicking => Action::Untick,
            Callback::Exit => Action::Bye,
            Callback::Back => Action::Start,
            Callback::Approve(name) => Action::Approve(name),
            Callback::Block(name) => Action::Block(name),
            Callback::PinDigit(_) => return None,
            Callback::OpenInstrument(id) => Action::OpenInstrument(id),
            Callback::Instrument { id, command } => Action::Instrument { id, command },
        };
        Some(action)
    }
}

impl fmt::Display for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Button_{}]", self.encode())
    }
}
