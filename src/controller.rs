use std::thread;
use std::time::Duration;

use ratatui::crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, trace};

use crate::domain::{Message, VipConfig};
use crate::service::Decision;

pub struct Controller {
    event_poll_time: u64,
}

impl Controller {
    pub fn new(cfg: &VipConfig) -> Self {
        Self {
            event_poll_time: cfg.event_poll_time,
        }
    }

    /// Reads terminal events on a dedicated thread and forwards them.
    ///
    /// Reading blocks, so it must stay off the runtime thread. The thread ends
    /// once the receiving side is gone.
    pub fn spawn_reader(&self, events: UnboundedSender<Event>) -> thread::JoinHandle<()> {
        let poll_time = Duration::from_millis(self.event_poll_time);
        thread::spawn(move || {
            while !events.is_closed() {
                match event::poll(poll_time) {
                    Ok(true) => match event::read() {
                        Ok(ev) => {
                            if events.send(ev).is_err() {
                                break;
                            }
                        }
                        Err(e) => error!("Reading terminal event failed: {e}"),
                    },
                    Ok(false) => {}
                    Err(e) => {
                        error!("Polling terminal events failed: {e}");
                        break;
                    }
                }
            }
            trace!("Terminal reader stopped");
        })
    }

    /// Maps a terminal event to a message. With `raw` set, key presses are
    /// passed through for the command line.
    pub fn handle_event(&self, event: Event, raw: bool) -> Option<Message> {
        match event {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                if raw {
                    Some(Message::RawKey(key))
                } else {
                    self.handle_key(key)
                }
            }
            Event::Resize(width, height) => Some(Message::Resize(width as usize, height as usize)),
            _ => None,
        }
    }

    fn handle_key(&self, key: KeyEvent) -> Option<Message> {
        let message = match (key.code, key.modifiers) {
            (KeyCode::Char('q'), _) => Some(Message::Quit),
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => Some(Message::Quit),
            (KeyCode::Esc, _) => Some(Message::Exit),
            (KeyCode::Char('?'), _) => Some(Message::Help),
            (KeyCode::Right | KeyCode::Char('l') | KeyCode::Char('n'), _) => {
                Some(Message::NextRecord)
            }
            (KeyCode::Left | KeyCode::Char('h') | KeyCode::Char('p'), _) => {
                Some(Message::PreviousRecord)
            }
            (KeyCode::Char('g'), _) => Some(Message::FirstRecord),
            (KeyCode::Char('G'), _) => Some(Message::LastRecord),
            (KeyCode::Char(':'), _) => Some(Message::GotoIndex),
            (KeyCode::Up | KeyCode::Char('k'), _) => Some(Message::MoveUp),
            (KeyCode::Down | KeyCode::Char('j'), _) => Some(Message::MoveDown),
            (KeyCode::PageUp, _) => Some(Message::MovePageUp),
            (KeyCode::PageDown, _) => Some(Message::MovePageDown),
            (KeyCode::Char('K'), _) => Some(Message::RelatedUp),
            (KeyCode::Char('J'), _) => Some(Message::RelatedDown),
            (KeyCode::Char('a'), _) => Some(Message::Decide(Decision::approved())),
            (KeyCode::Char('x'), _) => Some(Message::Decide(Decision::declined())),
            (KeyCode::Char('m'), _) => Some(Message::Decide(Decision::maybe())),
            (KeyCode::Char('d'), _) => Some(Message::EnterDecision),
            (KeyCode::Char('y'), _) => Some(Message::CopyRecord),
            (KeyCode::Char('s'), _) => Some(Message::Save),
            _ => None,
        };
        trace!("Mapped: {key:?} => {message:?}");
        message
    }
}
