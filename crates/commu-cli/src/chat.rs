//! Interactive line-based chat over a session.
//!
//! Plain lines are sent as questions by the host and as free text by the
//! guest. Slash commands:
//!
//! | command          | sends                        |
//! |------------------|------------------------------|
//! | `/yes` `/no`     | canned answer                |
//! | `/maybe`         | canned answer                |
//! | `/refuse`        | "I'd rather not answer"      |
//! | `/answer <text>` | free-form answer             |
//! | `/ask <text>`    | question                     |
//! | `/msg <text>`    | free text                    |
//! | `/quit`          | leaves the session           |

use commu_link::Role;
use commu_protocol::{AnswerKind, Message, Payload};
use commu_session::{Dispatcher, SessionHandle, SessionState};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{CliError, CliResult};

const HELP: &str = "\
commands: /yes /no /maybe /refuse /answer <text> /ask <text> /msg <text> /quit";

/// What the user typed.
#[derive(Debug, PartialEq, Eq)]
pub enum ChatInput {
    Send(Message),
    Help,
    Quit,
    Empty,
    Unknown(String),
}

/// Parses one input line.
pub fn parse_line(line: &str, role: Role) -> ChatInput {
    let line = line.trim();
    if line.is_empty() {
        return ChatInput::Empty;
    }

    let Some(command) = line.strip_prefix('/') else {
        return ChatInput::Send(match role {
            Role::Host => Message::question(line),
            Role::Guest => Message::text(line),
        });
    };

    let (name, rest) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(name, rest)| (name, rest.trim()));

    let with_text = |make: fn(&str) -> Message| {
        if rest.is_empty() {
            ChatInput::Unknown(format!("/{name} needs some text"))
        } else {
            ChatInput::Send(make(rest))
        }
    };

    match name {
        "yes" => ChatInput::Send(Message::answer(AnswerKind::Yes)),
        "no" => ChatInput::Send(Message::answer(AnswerKind::No)),
        "maybe" => ChatInput::Send(Message::answer(AnswerKind::Maybe)),
        "refuse" => ChatInput::Send(Message::answer(AnswerKind::Refuse)),
        "answer" => with_text(|t| Message::answer_with_text(AnswerKind::Text, t)),
        "ask" => with_text(|t| Message::question(t)),
        "msg" => with_text(|t| Message::text(t)),
        "help" => ChatInput::Help,
        "quit" | "exit" => ChatInput::Quit,
        other => ChatInput::Unknown(format!("unknown command /{other}")),
    }
}

/// One line of transcript for an inbound message, if it is worth showing.
pub fn render(message: &Message) -> Option<String> {
    match &message.payload {
        Payload::Question(q) => Some(format!("? {}", q.text)),
        Payload::Answer(a) => Some(format!("> {}", a.text)),
        Payload::Text(t) => Some(format!("peer: {}", t.text)),
        Payload::ConnectionEstablished(c) => Some(format!("* connected to {}", c.device_id)),
        Payload::Disconnect(d) => Some(match &d.reason {
            Some(reason) => format!("* peer is leaving ({reason})"),
            None => "* peer is leaving".to_string(),
        }),
        Payload::ParticipantJoined(p) => Some(format!("* {:?} joined room {}", p.role, p.room_id)),
        Payload::ParticipantLeft(p) => Some(format!("* {:?} left room {}", p.role, p.room_id)),
        Payload::RoomCreated(_) | Payload::RoomJoined(_) | Payload::RoomFull(_) => None,
    }
}

/// Something the chat loop should show.
#[derive(Debug)]
pub enum ChatEvent {
    Message(Message),
    State(SessionState, Option<String>),
    Error(String),
}

/// Dispatcher forwarding everything into the chat loop.
pub fn dispatcher(events: mpsc::UnboundedSender<ChatEvent>) -> Dispatcher {
    let (messages, states, errors) = (events.clone(), events.clone(), events);
    Dispatcher::new()
        .on_message(move |msg| {
            let _ = messages.send(ChatEvent::Message(msg.clone()));
        })
        .on_connection_change(move |state, detail| {
            let _ = states.send(ChatEvent::State(state, detail.map(str::to_string)));
        })
        .on_error(move |err| {
            let _ = errors.send(ChatEvent::Error(err.to_string()));
        })
}

/// Runs the chat until the user quits or the session ends.
pub async fn run(
    handle: &SessionHandle,
    role: Role,
    mut events: mpsc::UnboundedReceiver<ChatEvent>,
) -> CliResult<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut was_open = handle.state().await == SessionState::Open;
    println!("{HELP}");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("stdin closed");
                    return Ok(());
                };
                match parse_line(&line, role) {
                    ChatInput::Send(message) => {
                        if let Err(e) = handle.send_message(message).await {
                            println!("! {e}");
                        }
                    }
                    ChatInput::Help => println!("{HELP}"),
                    ChatInput::Quit => return Ok(()),
                    ChatInput::Empty => {}
                    ChatInput::Unknown(msg) => println!("! {msg}"),
                }
            }
            event = events.recv() => {
                let Some(event) = event else {
                    return Err(CliError::Link("session ended".to_string()));
                };
                match event {
                    ChatEvent::Message(message) => {
                        if let Some(line) = render(&message) {
                            println!("{line}");
                        }
                    }
                    ChatEvent::State(state, detail) => {
                        let detail = detail.map(|d| format!(" ({d})")).unwrap_or_default();
                        println!("* {state}{detail}");
                        match state {
                            SessionState::Open => was_open = true,
                            SessionState::Failed => {
                                return Err(CliError::Link("connection lost".to_string()));
                            }
                            SessionState::Idle if was_open => return Ok(()),
                            _ => {}
                        }
                    }
                    ChatEvent::Error(e) => println!("! {e}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commu_protocol::{Answer, Disconnect, MessageKind, TextMessage};

    fn sent(input: ChatInput) -> Message {
        match input {
            ChatInput::Send(message) => message,
            other => panic!("expected a message, got {other:?}"),
        }
    }

    #[test]
    fn plain_lines_depend_on_role() {
        let host = sent(parse_line("  Pizza tonight?  ", Role::Host));
        assert_eq!(host.kind(), MessageKind::Question);

        let guest = sent(parse_line("sounds good", Role::Guest));
        assert_eq!(
            guest.payload,
            Payload::Text(TextMessage {
                text: "sounds good".to_string()
            })
        );
    }

    #[test]
    fn canned_answers() {
        let msg = sent(parse_line("/refuse", Role::Guest));
        assert_eq!(
            msg.payload,
            Payload::Answer(Answer {
                text: "I'd rather not answer".to_string(),
                kind: AnswerKind::Refuse,
                sound: None,
            })
        );
        assert_eq!(sent(parse_line("/yes", Role::Host)).kind(), MessageKind::Answer);
    }

    #[test]
    fn commands_with_text() {
        let msg = sent(parse_line("/answer only on weekends", Role::Guest));
        assert!(matches!(
            msg.payload,
            Payload::Answer(Answer { ref text, kind: AnswerKind::Text, .. }) if text == "only on weekends"
        ));
        assert_eq!(sent(parse_line("/ask Tea?", Role::Guest)).kind(), MessageKind::Question);
        assert!(matches!(parse_line("/msg", Role::Host), ChatInput::Unknown(_)));
    }

    #[test]
    fn control_lines() {
        assert_eq!(parse_line("", Role::Host), ChatInput::Empty);
        assert_eq!(parse_line("/quit", Role::Host), ChatInput::Quit);
        assert_eq!(parse_line("/help", Role::Guest), ChatInput::Help);
        assert!(matches!(parse_line("/dance", Role::Guest), ChatInput::Unknown(_)));
    }

    #[test]
    fn rendering() {
        assert_eq!(render(&Message::question("Tea?")).unwrap(), "? Tea?");
        assert_eq!(render(&Message::answer(AnswerKind::No)).unwrap(), "> No");
        assert_eq!(
            render(&Message::new(Payload::Disconnect(Disconnect {
                reason: Some("bedtime".to_string())
            })))
            .unwrap(),
            "* peer is leaving (bedtime)"
        );
    }
}
