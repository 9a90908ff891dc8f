use ratatui::{
    Frame,
    layout::{Constraint, Layout, Rect},
    style::{Modifier, Style, Stylize},
    symbols::border,
    text::{Line, Span},
    widgets::{Block, Cell, Clear, Paragraph, Row, Table, Wrap},
};

use crate::model::UIData;

pub const TITLE_HEIGHT: usize = 1;
pub const CMDLINE_HEIGHT: usize = 1;
pub const BORDER_HEIGHT: usize = 2;
pub const RELATED_HEADER_HEIGHT: usize = 1;

const POPUP_WIDTH: u16 = 50;
const POPUP_HEIGHT: u16 = 26;

#[derive(Debug, Default)]
pub struct InspectorUI {}

impl InspectorUI {
    pub fn new() -> Self {
        Self {}
    }

    pub fn draw(&mut self, uidata: &UIData, frame: &mut Frame) {
        let layout = &uidata.layout;
        let [title_area, record_area, related_area, cmdline_area] = Layout::vertical([
            Constraint::Length(TITLE_HEIGHT as u16),
            Constraint::Length(layout.record_pane_height as u16),
            Constraint::Length(layout.related_pane_height as u16),
            Constraint::Length(CMDLINE_HEIGHT as u16),
        ])
        .areas(frame.area());

        self.draw_title(uidata, frame, title_area);
        self.draw_record(uidata, frame, record_area);
        self.draw_related(uidata, frame, related_area);
        self.draw_cmdline(uidata, frame, cmdline_area);

        if uidata.show_popup {
            self.draw_popup(&uidata.popup_message, frame);
        }
    }

    fn draw_title(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let decision = match &uidata.decision {
            Some(d) => Span::from(d.clone()).green().bold(),
            None => Span::from("undecided").dark_gray(),
        };
        let mut title = Line::from(vec![
            format!(" {} ", uidata.name).bold(),
            " record ".into(),
            uidata.position.clone().yellow().bold(),
            "  decision: ".into(),
            decision,
            format!("  decided: {}", uidata.decided).into(),
            format!("  snapshots queued: {}", uidata.snapshots).dark_gray(),
        ]);
        if uidata.pending > 0 {
            title.push_span(format!("  pending: {}", uidata.pending).yellow());
        }
        frame.render_widget(Paragraph::new(title).reversed(), area);
    }

    fn draw_record(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let header = &uidata.header_view;
        let values = &uidata.value_view;
        let rows = header
            .data
            .iter()
            .zip(values.data.iter())
            .enumerate()
            .map(|(idx, (name, value))| {
                let row = Row::new(vec![
                    Cell::from(name.clone()).bold(),
                    Cell::from(value.clone()),
                ]);
                if idx == uidata.selected_row {
                    row.style(Style::default().add_modifier(Modifier::REVERSED))
                } else {
                    row
                }
            });

        let table = Table::new(
            rows,
            [
                Constraint::Length(header.width as u16),
                Constraint::Min(values.width.min(u16::MAX as usize) as u16),
            ],
        )
        .column_spacing(2)
        .block(
            Block::bordered()
                .title(Line::from(format!(" {} / {} ", header.name, values.name)))
                .border_set(border::THICK),
        );
        frame.render_widget(table, area);
    }

    fn draw_related(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        let widths = uidata
            .related_columns
            .iter()
            .enumerate()
            .map(|(cidx, name)| {
                let widest = uidata
                    .related_rows
                    .iter()
                    .filter_map(|r| r.get(cidx))
                    .map(|v| v.chars().count())
                    .max()
                    .unwrap_or(0);
                Constraint::Length(std::cmp::max(widest, name.chars().count()) as u16)
            })
            .collect::<Vec<Constraint>>();

        let header = Row::new(uidata.related_columns.iter().map(|c| Cell::from(c.clone())))
            .style(Style::default().add_modifier(Modifier::BOLD | Modifier::UNDERLINED));
        let rows = uidata
            .related_rows
            .iter()
            .map(|r| Row::new(r.iter().map(|v| Cell::from(v.clone()))));

        let shown_end = uidata.related_offset + uidata.related_rows.len();
        let title = if uidata.related_total == 0 {
            " Related calls ".to_string()
        } else {
            format!(
                " Related calls {}-{} of {} ",
                uidata.related_offset + 1,
                shown_end,
                uidata.related_total
            )
        };

        let table = Table::new(rows, widths)
            .header(header)
            .column_spacing(1)
            .block(Block::bordered().title(title).border_set(border::PLAIN));
        frame.render_widget(table, area);
    }

    fn draw_cmdline(&self, uidata: &UIData, frame: &mut Frame, area: Rect) {
        match (uidata.active_cmdinput, uidata.cmd_mode) {
            (true, Some(mode)) => {
                let prompt = mode.prompt();
                let line = Line::from(vec![
                    prompt.bold(),
                    Span::from(uidata.cmdinput.input.clone()),
                ]);
                frame.render_widget(Paragraph::new(line), area);
                let cursor_x = area.x
                    + (prompt.chars().count() + uidata.cmdinput.cursor_pos)
                        .min(area.width as usize) as u16;
                frame.set_cursor_position((cursor_x, area.y));
            }
            _ => {
                let line = Line::from(vec![
                    uidata.status_message.clone().into(),
                    "  (? help, q quit)".dark_gray(),
                ]);
                frame.render_widget(Paragraph::new(line), area);
            }
        }
    }

    fn draw_popup(&self, message: &str, frame: &mut Frame) {
        let area = Self::centered(frame.area(), POPUP_WIDTH, POPUP_HEIGHT);
        let popup = Paragraph::new(message.to_string())
            .wrap(Wrap { trim: false })
            .block(
                Block::bordered()
                    .title(Line::from(" Help ".bold()).centered())
                    .title_bottom(Line::from(" <Esc> close ").centered())
                    .border_set(border::DOUBLE),
            );
        frame.render_widget(Clear, area);
        frame.render_widget(popup, area);
    }

    fn centered(area: Rect, width: u16, height: u16) -> Rect {
        let width = width.min(area.width);
        let height = height.min(area.height);
        Rect {
            x: area.x + (area.width - width) / 2,
            y: area.y + (area.height - height) / 2,
            width,
            height,
        }
    }
}
