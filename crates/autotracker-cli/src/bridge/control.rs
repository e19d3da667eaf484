//! Line-based control commands read from stdin.

use std::str::FromStr;

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A control command from the rendering layer or the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    Connect,
    Disconnect,
    /// Manual click on an entity.
    Toggle(String),
    Status,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}', expected toggle, status, connect, disconnect or quit")]
    Unknown(String),
    #[error("toggle needs an identifier, e.g. 'toggle pendant'")]
    MissingIdentifier,
}

impl FromStr for Control {
    type Err = ControlParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let command = words.next().ok_or(ControlParseError::Empty)?;

        match command.to_ascii_lowercase().as_str() {
            "connect" => Ok(Control::Connect),
            "disconnect" => Ok(Control::Disconnect),
            "status" => Ok(Control::Status),
            "quit" | "exit" => Ok(Control::Quit),
            // Identifiers are case-sensitive, only the verb is not
            "toggle" => words
                .next()
                .map(|id| Control::Toggle(id.to_string()))
                .ok_or(ControlParseError::MissingIdentifier),
            other => Err(ControlParseError::Unknown(other.to_string())),
        }
    }
}

/// Forward parsed commands from `reader` until EOF or the receiver is gone.
///
/// Blank lines are skipped and malformed ones logged.
pub async fn forward_lines<R>(reader: R, tx: mpsc::Sender<Control>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Control input closed");
                break;
            }
            Err(e) => {
                warn!("Failed to read control input: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Control>() {
            Ok(control) => {
                if tx.send(control).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("Ignoring control line '{}': {}", line.trim(), e),
        }
    }
}

/// Spawn a task feeding stdin into a control channel.
pub fn spawn_stdin() -> mpsc::Receiver<Control> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        forward_lines(stdin, tx).await;
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!("connect".parse::<Control>(), Ok(Control::Connect));
        assert_eq!("  disconnect ".parse::<Control>(), Ok(Control::Disconnect));
        assert_eq!("STATUS".parse::<Control>(), Ok(Control::Status));
        assert_eq!("quit".parse::<Control>(), Ok(Control::Quit));
        assert_eq!(
            "toggle Frog".parse::<Control>(),
            Ok(Control::Toggle("Frog".to_string()))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Control>(), Err(ControlParseError::Empty));
        assert_eq!(
            "toggle".parse::<Control>(),
            Err(ControlParseError::MissingIdentifier)
        );
        assert_eq!(
            "click pendant".parse::<Control>(),
            Err(ControlParseError::Unknown("click".to_string()))
        );
    }

    #[tokio::test]
    async fn test_forward_lines_skips_bad_input() {
        let input: &[u8] = b"toggle pendant\n\nbogus\nstatus\n";
        let (tx, mut rx) = mpsc::channel(8);

        forward_lines(input, tx).await;

        assert_eq!(rx.recv().await, Some(Control::Toggle("pendant".to_string())));
        assert_eq!(rx.recv().await, Some(Control::Status));
        assert_eq!(rx.recv().await, None);
    }
}
