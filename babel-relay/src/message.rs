use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Longest line `read_line` returns in one piece. Longer input is split.
pub const MAX_LINE_BYTES: usize = 4096;

/// Sender name used for announcements the relay makes on its own behalf.
pub const ADMIN_SENDER: &str = "admin";
/// Language the relay's own announcements are written in.
pub const ADMIN_LANGUAGE: &str = "en";

const HIGHLIGHT: &str = "\x1b[1;33;40m";
const RESET: &str = "\x1b[m";

pub const BANNER: &str = "\x1b[1;30;41mWelcome to the multilingual chat!\x1b[0m\n";
pub const NICK_PROMPT: &str = "What is your nick?\n";
pub const LANGUAGE_PROMPT: &str = "What language would you like to chat in?\n";
pub const INVALID_NICK: &str = "Invalid username\n";

/// One chat line on its way through the hub, tagged with the language it was
/// written in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub language: String,
    pub text: String,
    pub sender: String,
}

impl InboundMessage {
    pub fn chat(language: impl Into<String>, sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            text: text.into(),
            sender: sender.into(),
        }
    }

    pub fn announcement(text: impl Into<String>) -> Self {
        Self::chat(ADMIN_LANGUAGE, ADMIN_SENDER, text)
    }

    pub fn user_joined(name: &str) -> Self {
        Self::announcement(format!("New user {name} has joined the room."))
    }

    pub fn user_left(name: &str) -> Self {
        Self::announcement(format!("User {name} has left the room."))
    }
}

/// Renders a delivered chat line exactly as clients see it on the wire.
pub fn render_line(sender: &str, text: &str) -> String {
    format!("{HIGHLIGHT}{sender}: {text}{RESET}\r\n")
}

pub fn welcome(name: &str) -> String {
    format!("Welcome, {name}!\n\n")
}

pub fn skipped_notice(skipped: u64) -> String {
    format!("*** {skipped} messages were skipped because your connection fell behind\r\n")
}

/// Reads one line, returning it without its terminator. `None` means the peer
/// closed the stream.
///
/// At most [`MAX_LINE_BYTES`] are consumed per call, so an unterminated flood
/// comes back as several lines instead of growing the buffer. Bytes that are
/// not valid UTF-8 are replaced with U+FFFD.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let bytes = (&mut *reader)
        .take(MAX_LINE_BYTES as u64)
        .read_until(b'\n', &mut line)
        .await?;
    if bytes == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(&line);
    Ok(Some(line.trim_end_matches(LINE_ENDINGS).to_string()))
}

pub async fn write_text<W>(writer: &mut W, text: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // Flush every write so prompts show up before we block on the reply.
    writer.write_all(text.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
