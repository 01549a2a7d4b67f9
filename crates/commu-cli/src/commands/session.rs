//! Host, join and demo commands.

use std::sync::Arc;
use std::time::Duration;

use commu_link::{DirectLink, FileStore, Relay, Role, SignalingStore, TransportKind};
use commu_protocol::{AnswerKind, Message, MessageKind, Payload};
use commu_session::{Dispatcher, Session, SessionHandle, SessionState};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::chat;
use crate::config::CommuConfig;
use crate::error::{CliError, CliResult};

fn direct_link(config: &CommuConfig) -> CliResult<DirectLink> {
    match config.transport.kind {
        TransportKind::Direct => {}
        TransportKind::Relay => {
            return Err(CliError::Config(
                "relay is in-process only; use `commu demo`".to_string(),
            ));
        }
        other => other.ensure_available()?,
    }
    let store: Arc<dyn SignalingStore> = Arc::new(FileStore::open(config.signaling_dir())?);
    Ok(DirectLink::new(config.direct_config()?, store))
}

async fn finish(handle: &SessionHandle) {
    if let Err(e) = handle.disconnect().await {
        debug!(error = %e, "Disconnect on exit failed");
    }
    let _ = handle.shutdown().await;
}

/// Host a session and chat as the questioner.
pub async fn host(config: &CommuConfig) -> CliResult<()> {
    let link = direct_link(config)?;
    let (events_tx, events) = mpsc::unbounded_channel();
    let session = Session::new(config.session_config(), link, chat::dispatcher(events_tx))?;
    let (handle, task) = session.spawn();

    let code = handle.create_host().await?;
    println!("connection code: {code}");
    println!("waiting for the answerer to join...");

    let result = chat::run(&handle, Role::Host, events).await;
    finish(&handle).await;
    let _ = task.await;
    result
}

/// Join a hosted session and chat as the answerer.
pub async fn join(config: &CommuConfig, code: &str) -> CliResult<()> {
    let link = direct_link(config)?;
    let (events_tx, events) = mpsc::unbounded_channel();
    let session = Session::new(config.session_config(), link, chat::dispatcher(events_tx))?;
    let (handle, task) = session.spawn();

    handle.connect_to_peer(code).await?;
    println!("connected to {}", code.trim().to_ascii_uppercase());

    let result = chat::run(&handle, Role::Guest, events).await;
    finish(&handle).await;
    let _ = task.await;
    result
}

const DEMO_SCRIPT: [(&str, AnswerKind); 3] = [
    ("Do you like tea?", AnswerKind::Yes),
    ("Shall we go for a walk in the rain?", AnswerKind::Maybe),
    ("Can I borrow your toothbrush?", AnswerKind::Refuse),
];

fn forward(kind: MessageKind, tx: mpsc::UnboundedSender<Message>) -> Dispatcher {
    Dispatcher::new().on(kind, move |msg| {
        let _ = tx.send(msg.clone());
    })
}

async fn wait_open(
    states: &mut mpsc::UnboundedReceiver<SessionState>,
    timeout: Duration,
) -> CliResult<()> {
    let open = async {
        while let Some(state) = states.recv().await {
            if state == SessionState::Open {
                return true;
            }
        }
        false
    };
    match tokio::time::timeout(timeout, open).await {
        Ok(true) => Ok(()),
        _ => Err(CliError::Link("host never saw the guest".to_string())),
    }
}

async fn expect(rx: &mut mpsc::UnboundedReceiver<Message>) -> CliResult<Message> {
    rx.recv()
        .await
        .ok_or_else(|| CliError::Link("session ended mid-demo".to_string()))
}

/// Play a scripted exchange between a host and a guest in one process.
///
/// Returns the transcript.
pub async fn demo(config: &CommuConfig) -> CliResult<Vec<String>> {
    let relay = Relay::new();
    let session_config = config.session_config();

    let (answers_tx, mut answers) = mpsc::unbounded_channel();
    let (states_tx, mut host_states) = mpsc::unbounded_channel();
    let host_dispatcher =
        forward(MessageKind::Answer, answers_tx).on_connection_change(move |state, _| {
            let _ = states_tx.send(state);
        });
    let (host, host_task) =
        Session::new(session_config.clone(), relay.link(), host_dispatcher)?.spawn();

    let (questions_tx, mut questions) = mpsc::unbounded_channel();
    let (guest, guest_task) = Session::new(
        session_config.clone(),
        relay.link(),
        forward(MessageKind::Question, questions_tx),
    )?
    .spawn();

    let mut transcript = Vec::new();
    let id = host.create_host().await?;
    transcript.push(format!("host advertising as {id}"));
    guest.connect_to_peer(&id).await?;
    wait_open(&mut host_states, session_config.connect_timeout).await?;
    transcript.push("guest connected".to_string());

    for (question, answer) in DEMO_SCRIPT {
        host.send_message(Message::question(question)).await?;
        if let Payload::Question(q) = expect(&mut questions).await?.payload {
            transcript.push(format!("host asks: {}", q.text));
        }

        guest.send_message(Message::answer(answer)).await?;
        if let Payload::Answer(a) = expect(&mut answers).await?.payload {
            transcript.push(format!("guest answers: {}", a.text));
        }
    }

    guest.disconnect().await?;
    transcript.push("guest left".to_string());
    info!(exchanges = DEMO_SCRIPT.len(), "Demo finished");

    for handle in [&host, &guest] {
        let _ = handle.shutdown().await;
    }
    let _ = tokio::join!(host_task, guest_task);
    Ok(transcript)
}
