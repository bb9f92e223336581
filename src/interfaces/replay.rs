use crate::domain::event::Event;
use crate::domain::session::Session;
use crate::error::{BotError, Result};
use crate::infrastructure::in_memory::Outbound;
use serde::Serialize;
use std::io::{BufRead, Write};

/// Reads inbound events from a JSON Lines source.
///
/// Blank lines and lines starting with `#` are skipped, so recorded
/// conversations can carry comments.
pub struct EventReader<R: BufRead> {
    source: R,
}

impl<R: BufRead> EventReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// Lazily parses events; a malformed line yields an error naming its line number.
    pub fn events(self) -> impl Iterator<Item = Result<Event>> {
        self.source
            .lines()
            .enumerate()
            .filter_map(|(index, line)| {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => return Some(Err(BotError::from(e))),
                };
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with('#') {
                    return None;
                }
                Some(
                    serde_json::from_str(trimmed)
                        .map_err(|e| BotError::Validation(format!("line {}: {e}", index + 1))),
                )
            })
    }
}

#[derive(Serialize)]
struct SessionLine<'a> {
    action: &'static str,
    #[serde(flatten)]
    session: &'a Session,
}

/// Writes outbound actions and final sessions as JSON Lines.
pub struct ReplayWriter<W: Write> {
    sink: W,
}

impl<W: Write> ReplayWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    pub fn write_outbound(&mut self, outbound: &[Outbound]) -> Result<()> {
        for action in outbound {
            serde_json::to_writer(&mut self.sink, action)?;
            writeln!(self.sink)?;
        }
        Ok(())
    }

    pub fn write_sessions(&mut self, sessions: &[Session]) -> Result<()> {
        for session in sessions {
            serde_json::to_writer(
                &mut self.sink,
                &SessionLine {
                    action: "session",
                    session,
                },
            )?;
            writeln!(self.sink)?;
        }
        self.sink.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::EventPayload;
    use crate::domain::message::OutgoingText;
    use crate::domain::session::{ChatId, State};

    #[test]
    fn test_reader_valid_stream() {
        let data = r#"
# greeting
{"chat_id": 1, "sender_name": "Ann", "type": "command", "name": "/start"}

{"chat_id": 1, "type": "callback", "query_id": "q1", "data": "HANDLE_MENU"}
"#;
        let events: Vec<Result<Event>> = EventReader::new(data.as_bytes()).events().collect();

        assert_eq!(events.len(), 2);
        let first = events[0].as_ref().unwrap();
        assert_eq!(first.sender_name.as_deref(), Some("Ann"));
        assert!(matches!(
            &events[1].as_ref().unwrap().payload,
            EventPayload::Callback { data, message_id: None, .. } if data == "HANDLE_MENU"
        ));
    }

    #[test]
    fn test_reader_malformed_line() {
        let data = concat!(
            r#"{"chat_id": 1, "type": "command", "name": "/start"}"#,
            "\n",
            r#"{"chat_id": 1, "type": "teleport"}"#,
        );
        let events: Vec<Result<Event>> = EventReader::new(data.as_bytes()).events().collect();

        assert!(events[0].is_ok());
        match &events[1] {
            Err(BotError::Validation(reason)) => assert!(reason.starts_with("line 2")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_writer_output() {
        let mut buffer = Vec::new();
        let mut writer = ReplayWriter::new(&mut buffer);
        writer
            .write_outbound(&[Outbound::Text {
                chat_id: ChatId(1),
                message: OutgoingText::plain("hi"),
            }])
            .unwrap();
        let mut session = Session::new(ChatId(1));
        session.state = State::Browsing;
        writer.write_sessions(&[session]).unwrap();

        let output = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"action\":\"text\""));
        assert!(lines[1].contains("\"action\":\"session\""));
        assert!(lines[1].contains("\"state\":\"BROWSING\""));
    }
}
