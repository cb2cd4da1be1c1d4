//! Terminal front end: renders element updates as text lines and turns typed
//! lines into [`UiCommand`]s.

use std::io::Write;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::common::{dashboard, login};
use super::{MessageKind, RenderSink, Screen};
use crate::mqtt::message_manager::LogDirection;

pub const HELP: &str = "\
Login:
  login <email> <senha>
  register <email> <senha> <confirmar> <nome...>
  reset <email>
  google
Dashboard:
  logout
  connect | disconnect
  led <on|off>
  motor <on|off>
  rgb <#RRGGBB>
  clear
Geral:
  help | quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiCommand {
    Login {
        email: String,
        password: String,
    },
    Register {
        name: String,
        email: String,
        password: String,
        confirm_password: String,
    },
    ResetPassword {
        email: String,
    },
    FederatedLogin,
    Logout,
    Connect,
    Disconnect,
    Led(String),
    Motor(String),
    Rgb(String),
    ClearLog,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("unknown command '{0}', type 'help'")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),
}

impl UiCommand {
    /// Commands that act on the broker; only meaningful on the dashboard.
    pub fn needs_dashboard(&self) -> bool {
        matches!(
            self,
            UiCommand::Connect
                | UiCommand::Disconnect
                | UiCommand::Led(_)
                | UiCommand::Motor(_)
                | UiCommand::Rgb(_)
                | UiCommand::ClearLog
        )
    }
}

impl FromStr for UiCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Err(CommandError::Empty);
        };
        let args: Vec<&str> = words.collect();

        match (command.to_lowercase().as_str(), args.as_slice()) {
            ("login", [email, password]) => Ok(UiCommand::Login {
                email: email.to_string(),
                password: password.to_string(),
            }),
            ("login", _) => Err(CommandError::Usage("login <email> <senha>")),
            ("register", [email, password, confirm, name @ ..]) if !name.is_empty() => {
                Ok(UiCommand::Register {
                    name: name.join(" "),
                    email: email.to_string(),
                    password: password.to_string(),
                    confirm_password: confirm.to_string(),
                })
            }
            ("register", _) => Err(CommandError::Usage(
                "register <email> <senha> <confirmar> <nome...>",
            )),
            ("reset", [email]) => Ok(UiCommand::ResetPassword {
                email: email.to_string(),
            }),
            ("reset", []) => Ok(UiCommand::ResetPassword {
                email: String::new(),
            }),
            ("reset", _) => Err(CommandError::Usage("reset <email>")),
            ("google", []) => Ok(UiCommand::FederatedLogin),
            ("logout", []) => Ok(UiCommand::Logout),
            ("connect", []) => Ok(UiCommand::Connect),
            ("disconnect", []) => Ok(UiCommand::Disconnect),
            ("led", [state]) => Ok(UiCommand::Led(state.to_uppercase())),
            ("led", _) => Err(CommandError::Usage("led <on|off>")),
            ("motor", [state]) => Ok(UiCommand::Motor(state.to_uppercase())),
            ("motor", _) => Err(CommandError::Usage("motor <on|off>")),
            ("rgb", [color]) => Ok(UiCommand::Rgb(color.to_string())),
            ("rgb", _) => Err(CommandError::Usage("rgb <#RRGGBB>")),
            ("clear", []) => Ok(UiCommand::ClearLog),
            ("help", _) | ("?", _) => Ok(UiCommand::Help),
            ("quit", _) | ("exit", _) => Ok(UiCommand::Quit),
            (other, _) => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// Reads commands from stdin until EOF or until the receiver is gone.
///
/// Lines that do not parse are answered on the sink and never forwarded.
pub fn spawn_stdin_reader(
    commands: mpsc::Sender<UiCommand>,
    sink: Arc<dyn RenderSink>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("stdin closed");
                    break;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            };

            match line.parse::<UiCommand>() {
                Ok(command) => {
                    if commands.send(command).await.is_err() {
                        break;
                    }
                }
                Err(CommandError::Empty) => {}
                Err(e) => sink.show_message(&e.to_string(), MessageKind::Warning),
            }
        }
    })
}

/// [`RenderSink`] writing to a terminal (or any writer).
pub struct ConsoleRenderer<W: Write + Send> {
    out: Mutex<W>,
}

impl ConsoleRenderer<std::io::Stdout> {
    pub fn stdout() -> Self {
        ConsoleRenderer::new(std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleRenderer<W> {
    pub fn new(out: W) -> Self {
        ConsoleRenderer {
            out: Mutex::new(out),
        }
    }

    fn line(&self, text: &str) {
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = writeln!(out, "{text}").and_then(|_| out.flush()) {
            warn!("Console write failed: {}", e);
        }
    }
}

fn label(element_id: &str) -> &str {
    match element_id {
        dashboard::USER_EMAIL => "Usuário",
        dashboard::MQTT_STATUS => "MQTT",
        dashboard::COLOR_STATUS => "Cor",
        other => other,
    }
}

impl<W: Write + Send> RenderSink for ConsoleRenderer<W> {
    fn set_text(&self, element_id: &str, value: &str) {
        self.line(&format!("  {}: {}", label(element_id), value));
    }

    fn set_class(&self, element_id: &str, class_name: &str) {
        trace!("class of {} -> {}", element_id, class_name);
    }

    fn set_enabled(&self, element_id: &str, enabled: bool) {
        trace!("{} enabled: {}", element_id, enabled);
    }

    fn set_visible(&self, element_id: &str, visible: bool) {
        if element_id == login::LOADING && visible {
            self.line("  ...");
        } else {
            trace!("{} visible: {}", element_id, visible);
        }
    }

    fn show_screen(&self, screen: Screen) {
        let title = match screen {
            Screen::Login => "== Login ==",
            Screen::Dashboard => "== Dashboard IoT ==",
        };
        self.line(title);
    }

    fn append_log_line(&self, text: &str, kind: LogDirection) {
        self.line(&format!("  {:<8} {}", kind.css_class(), text));
    }

    fn clear_log(&self) {
        self.line("  (log limpo)");
    }

    fn show_message(&self, text: &str, kind: MessageKind) {
        self.line(&format!("[{}] {}", kind.css_class(), text));
    }

    fn hide_message(&self) {
        trace!("message hidden");
    }

    fn reset_form(&self, form_id: &str) {
        trace!("form {} reset", form_id);
    }
}
