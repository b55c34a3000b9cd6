use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncWrite, BufReader},
    net::TcpStream,
    select,
};
use tracing::{debug, info};

use crate::{
    hub::{ConnectionId, HubHandle, Participant},
    mailbox::{self, Delivery, Inbox},
    message::{
        BANNER, INVALID_NICK, InboundMessage, LANGUAGE_PROMPT, NICK_PROMPT, read_line,
        skipped_notice, welcome, write_text,
    },
};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mailbox_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    pub name: String,
    pub language: String,
}

/// Drives one accepted connection from login until it closes.
pub async fn run(
    stream: TcpStream,
    id: ConnectionId,
    hub: HubHandle,
    config: SessionConfig,
) -> Result<()> {
    let peer = stream.peer_addr().ok();
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let Some(login) = perform_login(&mut reader, &mut writer).await? else {
        debug!(?peer, "login abandoned");
        return Ok(());
    };

    let (mailbox, inbox) = mailbox::channel(config.mailbox_capacity);
    hub.join(Participant {
        id,
        name: login.name.clone(),
        language: login.language.clone(),
        mailbox,
    })
    .await?;
    info!(?peer, name = %login.name, language = %login.language, "client joined");

    let outcome = chat(&mut reader, writer, inbox, &hub, &login).await;
    leave(&hub, id, &login, peer).await;
    outcome
}

/// Prompts for a nick and a language. `Ok(None)` means the peer hung up or
/// was turned away; nothing was registered with the hub.
pub async fn perform_login<R, W>(reader: &mut R, writer: &mut W) -> Result<Option<Login>>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    write_text(writer, BANNER).await?;
    write_text(writer, NICK_PROMPT).await?;
    let Some(name) = read_line(reader).await.context("failed to read nick")? else {
        return Ok(None);
    };
    let name = name.trim().to_string();
    if name.is_empty() {
        write_text(writer, INVALID_NICK).await?;
        return Ok(None);
    }

    write_text(writer, LANGUAGE_PROMPT).await?;
    let Some(language) = read_line(reader).await.context("failed to read language")? else {
        return Ok(None);
    };

    Ok(Some(Login {
        name,
        language: language.trim().to_string(),
    }))
}

async fn chat<R, W>(
    reader: &mut R,
    mut writer: W,
    inbox: Inbox,
    hub: &HubHandle,
    login: &Login,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    write_text(&mut writer, &welcome(&login.name)).await?;
    let mut write_path = tokio::spawn(forward_inbox(inbox, writer));
    hub.broadcast(InboundMessage::user_joined(&login.name)).await?;

    let outcome = select! {
        read = publish_lines(reader, hub, login) => read,
        written = &mut write_path => {
            debug!(name = %login.name, ?written, "write path finished");
            Ok(())
        }
    };
    write_path.abort();
    outcome
}

/// Read path: every line the client sends becomes a broadcast.
async fn publish_lines<R>(reader: &mut R, hub: &HubHandle, login: &Login) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = match read_line(reader).await {
            Ok(Some(line)) => line,
            Ok(None) => return Ok(()),
            Err(err) => {
                debug!(name = %login.name, error = ?err, "read failed; closing session");
                return Ok(());
            }
        };
        hub.broadcast(InboundMessage::chat(
            login.language.as_str(),
            login.name.as_str(),
            line.trim(),
        ))
        .await?;
    }
}

/// Write path: copies mailbox lines to the socket until either side gives up.
async fn forward_inbox<W>(mut inbox: Inbox, mut writer: W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let text = match inbox.recv().await {
            Delivery::Line(line) => line.to_string(),
            Delivery::Skipped(skipped) => {
                debug!(skipped, "mailbox overflowed");
                skipped_notice(skipped)
            }
            Delivery::Closed => return Ok(()),
        };
        if let Err(err) = write_text(&mut writer, &text).await {
            debug!(?err, "failed to deliver line to client");
            return Err(err);
        }
    }
}

async fn leave(hub: &HubHandle, id: ConnectionId, login: &Login, peer: Option<SocketAddr>) {
    // The hub may already be gone during shutdown; there is nobody left to tell.
    let _ = hub.broadcast(InboundMessage::user_left(&login.name)).await;
    let _ = hub.leave(id).await;
    info!(?peer, name = %login.name, "client left");
}
