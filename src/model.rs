use std::sync::Arc;

use arboard::Clipboard;
use ratatui::crossterm::event::KeyEvent;
use tracing::{debug, error, info, trace, warn};

use crate::domain::{CMDMode, HELP_TEXT, Message, VipConfig, VipError};
use crate::inputter::{InputResult, Inputter};
use crate::inspector::{Applied, Inspector, InspectorError, InspectorEvent};
use crate::service::{Decision, Record};
use crate::table::{DECISION_COLUMN, VariantTable};
use crate::ui::{BORDER_HEIGHT, CMDLINE_HEIGHT, RELATED_HEADER_HEIGHT, TITLE_HEIGHT};

const NULL_VALUE: &str = "∅";

#[derive(Debug, PartialEq)]
pub enum Status {
    LOADING,
    READY,
    QUITTING,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Modus {
    INSPECTOR,
    POPUP,
    CMDINPUT,
}

#[derive(Clone, Default, Debug)]
pub struct ColumnView {
    pub name: String,
    pub width: usize,
    pub data: Vec<String>,
}

struct RecordView {
    header_data: Vec<String>,
    row_data: Vec<String>,
    cursor_row: usize,
    cursor_offset: usize,
}

impl RecordView {
    fn empty() -> Self {
        RecordView {
            header_data: Vec::new(),
            row_data: Vec::new(),
            cursor_row: 0,
            cursor_offset: 0,
        }
    }
}

#[derive(Default, Clone, Debug)]
pub struct UILayout {
    pub width: usize,
    pub height: usize,
    pub record_pane_height: usize,
    pub related_pane_height: usize,
    pub record_height: usize,  // visible field rows
    pub related_height: usize, // visible related call rows
}

impl UILayout {
    pub fn from_values(ui_width: usize, ui_height: usize) -> Self {
        let body = ui_height.saturating_sub(TITLE_HEIGHT + CMDLINE_HEIGHT);
        let record_pane_height = body * 3 / 5;
        let related_pane_height = body - record_pane_height;
        let layout = UILayout {
            width: ui_width,
            height: ui_height,
            record_pane_height,
            related_pane_height,
            record_height: record_pane_height.saturating_sub(BORDER_HEIGHT),
            related_height: related_pane_height
                .saturating_sub(BORDER_HEIGHT + RELATED_HEADER_HEIGHT),
        };
        trace!("Build UILayout: {:?}", layout);
        layout
    }
}

/// Everything the ui needs to draw one frame.
pub struct UIData {
    pub name: String,
    pub position: String,
    pub decision: Option<String>,
    pub decided: usize,
    pub snapshots: usize,
    pub pending: usize,
    pub header_view: ColumnView,
    pub value_view: ColumnView,
    pub selected_row: usize,
    pub related_columns: Vec<String>,
    pub related_rows: Vec<Vec<String>>,
    pub related_offset: usize,
    pub related_total: usize,
    pub show_popup: bool,
    pub popup_message: String,
    pub layout: UILayout,
    pub cmdinput: InputResult,
    pub cmd_mode: Option<CMDMode>,
    pub active_cmdinput: bool,
    pub status_message: String,
}

impl UIData {
    pub fn empty() -> Self {
        UIData {
            name: String::new(),
            position: String::new(),
            decision: None,
            decided: 0,
            snapshots: 0,
            pending: 0,
            header_view: ColumnView::default(),
            value_view: ColumnView::default(),
            selected_row: 0,
            related_columns: Vec::new(),
            related_rows: Vec::new(),
            related_offset: 0,
            related_total: 0,
            show_popup: false,
            popup_message: String::new(),
            layout: UILayout::default(),
            cmdinput: InputResult::default(),
            cmd_mode: None,
            active_cmdinput: false,
            status_message: String::new(),
        }
    }
}

pub struct Model {
    config: VipConfig,
    pub status: Status,
    modus: Modus,
    previous_modus: Modus,
    inspector: Inspector,
    table: Arc<VariantTable>,
    pending_index: Option<usize>,
    record_view: RecordView,
    related_offset: usize,
    uilayout: UILayout,
    uidata: UIData,
    clipboard: Option<Clipboard>,
    input: Inputter,
    cmd_mode: Option<CMDMode>,
    last_input: InputResult,
    active_cmdinput: bool,
    status_message: String,
}

impl Model {
    pub fn init(
        config: &VipConfig,
        table: Arc<VariantTable>,
        ui_width: usize,
        ui_height: usize,
    ) -> Self {
        let clipboard = match Clipboard::new() {
            Ok(clipboard) => Some(clipboard),
            Err(e) => {
                warn!("Clipboard is not available: {e}");
                None
            }
        };
        let mut model = Self {
            config: config.clone(),
            status: Status::LOADING,
            modus: Modus::INSPECTOR,
            previous_modus: Modus::INSPECTOR,
            inspector: Inspector::new(table.clone()),
            table,
            pending_index: config.pending_index,
            record_view: RecordView::empty(),
            related_offset: 0,
            uilayout: UILayout::from_values(ui_width, ui_height),
            uidata: UIData::empty(),
            clipboard,
            input: Inputter::default(),
            cmd_mode: None,
            last_input: InputResult::default(),
            active_cmdinput: false,
            status_message: String::new(),
        };
        model.set_status_message("Started vip!");
        model
    }

    /// Kicks off loading. The pending index is used at most once.
    pub fn start(&mut self) {
        let pending_index = self.pending_index.take();
        self.status = Status::LOADING;
        self.inspector.initialize(pending_index);
        self.set_status_message("Loading ...");
    }

    pub async fn next_inspector_event(&mut self) -> Option<InspectorEvent> {
        self.inspector.next_event().await
    }

    pub fn apply_inspector_event(&mut self, event: InspectorEvent) {
        match self.inspector.apply(event) {
            Ok(Applied::Initialized) => {
                self.status = Status::READY;
                let size = self.inspector.size().unwrap_or(0);
                self.set_status_message(format!("Loaded {size} records"));
            }
            Ok(Applied::ViewLoaded(index)) => {
                trace!("Showing record {index}");
                self.related_offset = 0;
                self.build_record_view();
            }
            Ok(Applied::Stale(index)) => trace!("Ignored stale record {index}"),
            Ok(Applied::DecisionPersisted(index)) => {
                self.set_status_message(format!("Stored decision for record {}", index + 1));
            }
            Err(e) => {
                error!("{e}");
                if matches!(e, InspectorError::Load(_)) {
                    self.set_status_message(format!("{e}, press q to quit"));
                } else {
                    self.set_status_message(e.to_string());
                }
            }
        }
        self.update_uidata();
    }

    pub fn update(&mut self, message: Message) -> Result<(), VipError> {
        match self.modus {
            Modus::INSPECTOR => match message {
                Message::Quit => self.quit(),
                Message::Exit => {}
                Message::Help => self.show_help(),
                Message::NextRecord => self.next_record(),
                Message::PreviousRecord => self.previous_record(),
                Message::FirstRecord => self.move_to(0),
                Message::LastRecord => {
                    if let Some(size) = self.inspector.size()
                        && size > 0
                    {
                        self.move_to(size - 1);
                    }
                }
                Message::GotoIndex => self.enter_cmd_mode(CMDMode::GotoIndex),
                Message::EnterDecision => self.enter_cmd_mode(CMDMode::Decision),
                Message::Decide(decision) => self.decide(decision),
                Message::MoveUp => self.move_record_selection_up(1),
                Message::MoveDown => self.move_record_selection_down(1),
                Message::MovePageUp => {
                    self.move_record_selection_up(self.uilayout.record_height.max(1))
                }
                Message::MovePageDown => {
                    self.move_record_selection_down(self.uilayout.record_height.max(1))
                }
                Message::RelatedUp => self.related_offset = self.related_offset.saturating_sub(1),
                Message::RelatedDown => {
                    let visible = self.uilayout.related_height.max(1);
                    let total = self.inspector.related_records().len();
                    if self.related_offset + visible < total {
                        self.related_offset += 1;
                    }
                }
                Message::CopyRecord => self.copy_record(),
                Message::Save => self.save(),
                Message::Resize(width, height) => self.ui_resize(width, height),
                Message::RawKey(_) => {}
            },
            Modus::POPUP => match message {
                Message::Quit => self.quit(),
                Message::Exit | Message::Help => self.exit(),
                Message::Resize(width, height) => self.ui_resize(width, height),
                _ => (),
            },
            Modus::CMDINPUT => match message {
                Message::RawKey(key) => self.raw_input(key),
                Message::Resize(width, height) => self.ui_resize(width, height),
                _ => (),
            },
        }
        self.update_uidata();
        Ok(())
    }

    pub fn raw_keyevents(&self) -> bool {
        self.active_cmdinput
    }

    pub fn get_uidata(&self) -> &UIData {
        &self.uidata
    }

    pub fn quit(&mut self) {
        self.status = Status::QUITTING;
    }

    /// Lets outstanding work finish, then saves progress if a file is configured.
    pub async fn shutdown(&mut self) {
        for e in self.inspector.settle().await {
            warn!("While shutting down: {e}");
        }
        if self.config.progress_path.is_some() {
            self.save();
        }
    }

    // -------------------- Navigation and decisions ---------------------- //

    fn next_record(&mut self) {
        match (self.inspector.cursor(), self.inspector.size()) {
            (Some(_), Some(0)) => self.set_status_message("The table is empty"),
            (Some(cursor), Some(size)) if cursor + 1 < size => self.move_to(cursor + 1),
            (Some(cursor), Some(size)) if cursor >= size => self.set_status_message(format!(
                "Record {} is past the last record {size}, press G to go there",
                cursor + 1
            )),
            (Some(_), Some(_)) => self.set_status_message("Already at the last record"),
            _ => debug!("Not ready, ignoring next record"),
        }
    }

    fn previous_record(&mut self) {
        match (self.inspector.cursor(), self.inspector.size()) {
            // From beyond the end, step back onto the last record.
            (Some(cursor), Some(size)) if size > 0 && cursor >= size => self.move_to(size - 1),
            (Some(cursor), _) if cursor > 0 => self.move_to(cursor - 1),
            (Some(_), _) => self.set_status_message("Already at the first record"),
            _ => debug!("Not ready, ignoring previous record"),
        }
    }

    fn move_to(&mut self, index: usize) {
        self.inspector.set_cursor(index);
    }

    fn decide(&mut self, decision: Decision) {
        if let Err(e) = self.inspector.submit_decision(decision) {
            warn!("{e}");
            self.set_status_message(e.to_string());
        }
    }

    fn save(&mut self) {
        match self.table.save_progress() {
            Ok(count) => self.set_status_message(format!("Saved {count} decisions")),
            Err(e) => {
                error!("Saving progress failed: {e}");
                self.set_status_message(format!("Saving failed: {e}"));
            }
        }
    }

    fn copy_record(&mut self) {
        let Some(record) = self.inspector.current_record() else {
            self.set_status_message("Nothing to copy");
            return;
        };
        let content = record
            .iter()
            .map(|(name, value)| format!("{name}\t{}", value.unwrap_or_default()))
            .collect::<Vec<String>>()
            .join("\n");

        if self.clipboard.is_none() {
            self.set_status_message("Clipboard is not available");
            return;
        }
        let copied = self.clipboard.as_mut().map(|c| c.set_text(content));
        match copied.unwrap_or(Ok(())) {
            Ok(_) => self.set_status_message("Copied record to clipboard"),
            Err(e) => {
                trace!("Error copying to clipboard: {:?}", e);
                self.set_status_message("Copying to clipboard failed");
            }
        }
    }

    // -------------------- Record and related views ---------------------- //

    fn build_record_view(&mut self) {
        let Some(record) = self.inspector.current_record() else {
            self.record_view = RecordView::empty();
            return;
        };
        let max_width = self.config.max_column_width;
        let record_view = &mut self.record_view;
        record_view.header_data = record
            .iter()
            .map(|(name, _)| name.chars().take(max_width).collect::<String>())
            .collect();
        record_view.row_data = record.iter().map(|(_, value)| display_value(value)).collect();

        // Keep the selected field when flipping through records of the same shape.
        let last = record_view.row_data.len().saturating_sub(1);
        if record_view.cursor_offset + record_view.cursor_row > last {
            record_view.cursor_offset = 0;
            record_view.cursor_row = 0;
        }
    }

    fn move_record_selection_up(&mut self, size: usize) {
        let record = &mut self.record_view;
        if record.cursor_row > 0 {
            record.cursor_row = record.cursor_row.saturating_sub(size);
        } else if record.cursor_offset > 0 {
            record.cursor_offset = record.cursor_offset.saturating_sub(size);
        }
    }

    fn move_record_selection_down(&mut self, size: usize) {
        let height = self.uilayout.record_height.max(1);
        let record = &mut self.record_view;
        let last = record.row_data.len().saturating_sub(1);
        let selected = record.cursor_offset + record.cursor_row;
        if selected >= last {
            return;
        }
        let target = std::cmp::min(selected + size, last);
        if target < record.cursor_offset + height {
            record.cursor_row = target - record.cursor_offset;
        } else {
            record.cursor_offset = target + 1 - height;
            record.cursor_row = height - 1;
        }
    }

    fn update_uidata(&mut self) {
        let position = match (self.inspector.cursor(), self.inspector.size()) {
            _ if !self.inspector.is_ready() => "loading".to_string(),
            (_, Some(0)) => "empty table".to_string(),
            (Some(cursor), Some(size)) => format!("{}/{}", cursor + 1, size),
            _ => "loading".to_string(),
        };
        let decision = self
            .inspector
            .current_record()
            .and_then(|r| r.get(DECISION_COLUMN))
            .map(|d| d.to_string());

        let record = &self.record_view;
        let rbegin = std::cmp::min(record.cursor_offset, record.row_data.len());
        let rend = std::cmp::min(rbegin + self.uilayout.record_height, record.row_data.len());
        let header_width = record.header_data.iter().map(|h| h.chars().count()).max().unwrap_or(0);

        let related_columns = self.inspector.column_names().to_vec();
        let related = self.inspector.related_records();
        let related_rows = related
            .iter()
            .skip(self.related_offset)
            .take(self.uilayout.related_height)
            .map(|r| related_row(r, &related_columns))
            .collect();

        self.uidata = UIData {
            name: self.table.name(),
            position,
            decision,
            decided: self.table.decided(),
            snapshots: self.table.scheduled_snapshots().len(),
            pending: self.inspector.in_flight(),
            header_view: ColumnView {
                name: "Field".to_string(),
                width: header_width,
                data: record.header_data[rbegin..rend].to_vec(),
            },
            value_view: ColumnView {
                name: "Value".to_string(),
                width: self.uilayout.width.saturating_sub(header_width + 3),
                data: record.row_data[rbegin..rend].to_vec(),
            },
            selected_row: record.cursor_row,
            related_total: related.len(),
            related_columns,
            related_rows,
            related_offset: self.related_offset,
            show_popup: self.modus == Modus::POPUP,
            popup_message: self.uidata.popup_message.clone(),
            layout: self.uilayout.clone(),
            cmdinput: self.last_input.clone(),
            cmd_mode: self.cmd_mode,
            active_cmdinput: self.active_cmdinput,
            status_message: self.status_message.clone(),
        };
    }

    fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
        self.uidata.status_message = self.status_message.clone();
    }

    fn ui_resize(&mut self, width: usize, height: usize) {
        trace!(
            "UI was resized! w:{}->{}, h:{}->{}",
            self.uilayout.width, width, self.uilayout.height, height
        );
        self.uilayout = UILayout::from_values(width, height);
        let record = &mut self.record_view;
        record.cursor_offset += record.cursor_row;
        record.cursor_row = 0;
    }

    // -------------------- Popup and command line ---------------------- //

    fn show_help(&mut self) {
        self.previous_modus = self.modus;
        self.modus = Modus::POPUP;
        self.uidata.popup_message = HELP_TEXT.to_string();
    }

    fn exit(&mut self) {
        trace!("Close popup ...");
        self.modus = self.previous_modus;
        self.previous_modus = Modus::POPUP;
    }

    fn enter_cmd_mode(&mut self, mode: CMDMode) {
        trace!("Entering command mode {mode:?} ...");
        self.previous_modus = self.modus;
        self.modus = Modus::CMDINPUT;
        self.cmd_mode = Some(mode);
        self.active_cmdinput = true;
        self.input.clear();
        self.last_input = self.input.get();
    }

    fn raw_input(&mut self, key: KeyEvent) {
        if self.active_cmdinput {
            self.last_input = self.input.read(key);
            if self.last_input.finished {
                self.handle_cmd_input();
            }
        }
    }

    fn handle_cmd_input(&mut self) {
        trace!("Handle cmd input {}", self.last_input.input);
        self.active_cmdinput = false;
        self.modus = self.previous_modus;
        self.previous_modus = Modus::CMDINPUT;
        let mode = self.cmd_mode.take();

        if self.last_input.canceled {
            return;
        }
        match mode {
            Some(CMDMode::GotoIndex) => match self.last_input.as_index() {
                Some(index) => self.move_to(index),
                None => self.set_status_message(format!(
                    "'{}' is not a record number",
                    self.last_input.input
                )),
            },
            Some(CMDMode::Decision) => match self.last_input.as_decision() {
                Some(decision) => self.decide(decision),
                None => self.set_status_message("Empty decision, nothing stored"),
            },
            None => info!("Cmd mode is none!"),
        }
    }
}

fn display_value(value: Option<&str>) -> String {
    match value {
        Some(s) => s.replace("\r\n", " ↵ ").replace('\n', " ↵ "),
        None => NULL_VALUE.to_string(),
    }
}

fn related_row(record: &Record, columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .map(|c| display_value(record.get(c)))
        .collect()
}
