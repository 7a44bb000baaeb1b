use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    BarChart, Block, Borders, Cell, Clear, List, ListItem, Paragraph, Row, Table, TableState, Tabs,
    Wrap,
};
use ratatui::{Frame, Terminal};
use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use sv_core::{
    format_long_date, parse_date, NewVisit, Recurrence, TimeOfDay, VisitId, VisitPatch,
    VisitRecord, VisitRepository, VisitStatus,
};
use sv_export::{export, ExportFormat};
use sv_store::MemoryStore;
use sv_utils::truncate;
use sv_views::{group_by, month_view, monthly_trend, summarize, GroupField, YearMonth};

const TICK_RATE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    Visits,
    Calendar,
    Analytics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    None,
    Search,
    Form,
    Confirm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormField {
    ContractorName,
    Company,
    JobType,
    Description,
    Date,
    TimeIn,
    TimeOut,
    Status,
    Recurrence,
    NextScheduled,
    ContactEmail,
    ContactPhone,
}

impl FormField {
    const ALL: [FormField; 12] = [
        FormField::ContractorName,
        FormField::Company,
        FormField::JobType,
        FormField::Description,
        FormField::Date,
        FormField::TimeIn,
        FormField::TimeOut,
        FormField::Status,
        FormField::Recurrence,
        FormField::NextScheduled,
        FormField::ContactEmail,
        FormField::ContactPhone,
    ];

    fn label(self) -> &'static str {
        match self {
            FormField::ContractorName => "Contractor Name",
            FormField::Company => "Company",
            FormField::JobType => "Job Type",
            FormField::Description => "Description",
            FormField::Date => "Date (YYYY-MM-DD)",
            FormField::TimeIn => "Time In (HH:MM)",
            FormField::TimeOut => "Time Out (HH:MM)",
            FormField::Status => "Status (Completed/In Progress/Scheduled/Cancelled)",
            FormField::Recurrence => "Recurrence (One-time/Daily/Weekly/Monthly/Quarterly)",
            FormField::NextScheduled => "Next Scheduled (YYYY-MM-DD, optional)",
            FormField::ContactEmail => "Contact Email",
            FormField::ContactPhone => "Contact Phone",
        }
    }

    fn value_of(self, visit: &VisitRecord) -> String {
        match self {
            FormField::ContractorName => visit.contractor_name.clone(),
            FormField::Company => visit.company.clone(),
            FormField::JobType => visit.job_type.clone(),
            FormField::Description => visit.description.clone(),
            FormField::Date => visit.date.to_string(),
            FormField::TimeIn => visit.time_in.to_string(),
            FormField::TimeOut => visit.time_out.to_string(),
            FormField::Status => visit.status.to_string(),
            FormField::Recurrence => visit.recurrence.to_string(),
            FormField::NextScheduled => visit
                .next_scheduled
                .map(|date| date.to_string())
                .unwrap_or_default(),
            FormField::ContactEmail => visit.contact_email.clone(),
            FormField::ContactPhone => visit.contact_phone.clone(),
        }
    }

    fn check(self, value: &str) -> Result<(), String> {
        let result = match self {
            FormField::Date => parse_date(value).map(|_| ()),
            FormField::TimeIn | FormField::TimeOut => value.parse::<TimeOfDay>().map(|_| ()),
            FormField::Status => value.parse::<VisitStatus>().map(|_| ()),
            FormField::Recurrence => value.parse::<Recurrence>().map(|_| ()),
            FormField::NextScheduled if value.trim().is_empty() => Ok(()),
            FormField::NextScheduled => parse_date(value).map(|_| ()),
            _ if value.trim().is_empty() => {
                return Err(format!("{} is required", self.label()));
            }
            _ => Ok(()),
        };
        result.map_err(|err| err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FormMode {
    Add,
    Edit(VisitId),
}

#[derive(Debug, Clone)]
struct VisitForm {
    mode: FormMode,
    step: usize,
    values: Vec<String>,
    input: TextInput,
}

impl VisitForm {
    fn add(today: NaiveDate) -> Self {
        let values = FormField::ALL
            .iter()
            .map(|field| match field {
                FormField::Date => today.to_string(),
                FormField::Status => VisitStatus::default().to_string(),
                FormField::Recurrence => Recurrence::default().to_string(),
                _ => String::new(),
            })
            .collect::<Vec<_>>();
        Self::with_values(FormMode::Add, values)
    }

    fn edit(visit: &VisitRecord) -> Self {
        let values = FormField::ALL
            .iter()
            .map(|field| field.value_of(visit))
            .collect();
        Self::with_values(FormMode::Edit(visit.id.clone()), values)
    }

    fn with_values(mode: FormMode, values: Vec<String>) -> Self {
        let input = TextInput::with_content(values[0].clone());
        Self {
            mode,
            step: 0,
            values,
            input,
        }
    }

    fn field(&self) -> FormField {
        FormField::ALL[self.step]
    }

    fn is_last(&self) -> bool {
        self.step + 1 == FormField::ALL.len()
    }

    fn go_to(&mut self, step: usize) {
        self.values[self.step] = self.input.content.clone();
        self.step = step;
        self.input = TextInput::with_content(self.values[step].clone());
    }

    fn value(&self, field: FormField) -> &str {
        let index = FormField::ALL
            .iter()
            .position(|candidate| *candidate == field)
            .unwrap_or(0);
        self.values[index].trim()
    }

    fn to_new_visit(&self) -> sv_core::CoreResult<NewVisit> {
        let next = self.value(FormField::NextScheduled);
        let next = if next.is_empty() {
            None
        } else {
            Some(parse_date(next)?)
        };
        Ok(NewVisit::new(
            self.value(FormField::ContractorName),
            self.value(FormField::Company),
            self.value(FormField::JobType),
            self.value(FormField::Description),
            parse_date(self.value(FormField::Date))?,
            self.value(FormField::TimeIn).parse()?,
            self.value(FormField::TimeOut).parse()?,
            self.value(FormField::ContactEmail),
            self.value(FormField::ContactPhone),
        )?
        .with_status(self.value(FormField::Status).parse()?)
        .with_recurrence(self.value(FormField::Recurrence).parse()?)
        .with_next_scheduled(next))
    }
}

struct App {
    store: MemoryStore,
    tab: Tab,
    table_state: TableState,
    input_mode: InputMode,
    search_input: TextInput,
    active_search: Option<String>,
    form: Option<VisitForm>,
    pending_delete: Option<VisitId>,
    month: YearMonth,
    today: NaiveDate,
    status: Option<String>,
    show_help: bool,
    export_dir: PathBuf,
}

#[derive(Debug, Default, Clone)]
struct TextInput {
    content: String,
    // Cursor position in characters.
    cursor: usize,
}

impl TextInput {
    fn with_content(content: String) -> Self {
        let cursor = content.chars().count();
        Self { content, cursor }
    }

    fn byte_index(&self) -> usize {
        self.content
            .char_indices()
            .nth(self.cursor)
            .map_or(self.content.len(), |(index, _)| index)
    }

    fn insert(&mut self, c: char) {
        let index = self.byte_index();
        self.content.insert(index, c);
        self.cursor += 1;
    }

    fn delete_back(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let index = self.byte_index();
            self.content.remove(index);
        }
    }

    fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    fn move_right(&mut self) {
        if self.cursor < self.content.chars().count() {
            self.cursor += 1;
        }
    }

    fn move_home(&mut self) {
        self.cursor = 0;
    }

    fn move_end(&mut self) {
        self.cursor = self.content.chars().count();
    }

    fn reset(&mut self) {
        self.content.clear();
        self.cursor = 0;
    }

    // Shared line-editing keys. Returns false when the key was not handled.
    fn handle_edit_key(&mut self, key: KeyEvent) -> bool {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('a') => self.move_home(),
                KeyCode::Char('e') => self.move_end(),
                KeyCode::Char('u') => self.reset(),
                _ => return false,
            }
            return true;
        }
        match key.code {
            KeyCode::Char(c) => self.insert(c),
            KeyCode::Backspace => self.delete_back(),
            KeyCode::Left => self.move_left(),
            KeyCode::Right => self.move_right(),
            KeyCode::Home => self.move_home(),
            KeyCode::End => self.move_end(),
            _ => return false,
        }
        true
    }
}

impl App {
    fn new(store: MemoryStore, today: NaiveDate, export_dir: PathBuf) -> Self {
        let mut table_state = TableState::default();
        if !store.is_empty() {
            table_state.select(Some(0));
        }
        Self {
            store,
            tab: Tab::Visits,
            table_state,
            input_mode: InputMode::None,
            search_input: TextInput::default(),
            active_search: None,
            form: None,
            pending_delete: None,
            month: YearMonth::from_date(today),
            today,
            status: None,
            show_help: false,
            export_dir,
        }
    }

    fn filtered_visits(&self) -> Vec<&VisitRecord> {
        self.store
            .search(self.active_search.as_deref().unwrap_or_default())
    }

    fn selected_visit(&self) -> Option<&VisitRecord> {
        let index = self.table_state.selected()?;
        self.filtered_visits().get(index).copied()
    }

    fn next_tab(&mut self) {
        self.tab = match self.tab {
            Tab::Visits => Tab::Calendar,
            Tab::Calendar => Tab::Analytics,
            Tab::Analytics => Tab::Visits,
        };
    }

    fn prev_tab(&mut self) {
        self.tab = match self.tab {
            Tab::Visits => Tab::Analytics,
            Tab::Calendar => Tab::Visits,
            Tab::Analytics => Tab::Calendar,
        };
    }

    fn move_selection(&mut self, movement: Move) {
        let len = self.filtered_visits().len();
        if len == 0 {
            self.table_state.select(None);
            return;
        }
        let current = self.table_state.selected().unwrap_or(0);
        let next = match movement {
            Move::Up => {
                if current == 0 {
                    len - 1
                } else {
                    current - 1
                }
            }
            Move::Down => {
                if current + 1 >= len {
                    0
                } else {
                    current + 1
                }
            }
            Move::PageUp => current.saturating_sub(5),
            Move::PageDown => (current + 5).min(len - 1),
            Move::First => 0,
            Move::Last => len - 1,
        };
        self.table_state.select(Some(next));
    }

    // Keep the selection inside the filtered list after it changes size.
    fn clamp_selection(&mut self) {
        let len = self.filtered_visits().len();
        match self.table_state.selected() {
            _ if len == 0 => self.table_state.select(None),
            Some(selected) if selected >= len => self.table_state.select(Some(len - 1)),
            None => self.table_state.select(Some(0)),
            Some(_) => {}
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Move {
    Up,
    Down,
    PageUp,
    PageDown,
    First,
    Last,
}

/// Run the interactive dashboard over `store` until the user quits.
pub fn run(store: MemoryStore, export_dir: PathBuf) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(store, Local::now().date_naive(), export_dir);
    let result = event_loop(&mut terminal, &mut app);

    restore_terminal(terminal)?;
    result
}

fn event_loop(
    terminal: &mut Terminal<ratatui::backend::CrosstermBackend<Stdout>>,
    app: &mut App,
) -> Result<()> {
    let mut last_tick = Instant::now();
    loop {
        terminal.draw(|frame| render_app(frame, app))?;

        let timeout = TICK_RATE.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && handle_key(app, key)? {
                    return Ok(());
                }
            }
        }

        if last_tick.elapsed() >= TICK_RATE {
            last_tick = Instant::now();
        }
    }
}

fn handle_key(app: &mut App, key: KeyEvent) -> Result<bool> {
    match app.input_mode {
        InputMode::Search => return Ok(handle_search_input(app, key)),
        InputMode::Form => return Ok(handle_form_input(app, key)),
        InputMode::Confirm => return Ok(handle_confirm_input(app, key)),
        InputMode::None => {}
    }

    if app.show_help {
        if matches!(key.code, KeyCode::Char('?') | KeyCode::Esc) {
            app.show_help = false;
        }
        return Ok(false);
    }

    if key.modifiers.contains(KeyModifiers::CONTROL) {
        match key.code {
            KeyCode::Char('c') => return Ok(true),
            KeyCode::Char('u') => app.move_selection(Move::PageUp),
            KeyCode::Char('d') => app.move_selection(Move::PageDown),
            _ => {}
        }
        return Ok(false);
    }

    match key.code {
        KeyCode::Char('q') => return Ok(true),
        KeyCode::Char('?') => app.show_help = true,
        KeyCode::Right | KeyCode::Tab => app.next_tab(),
        KeyCode::Left | KeyCode::BackTab => app.prev_tab(),
        KeyCode::Char('1') => app.tab = Tab::Visits,
        KeyCode::Char('2') => app.tab = Tab::Calendar,
        KeyCode::Char('3') => app.tab = Tab::Analytics,
        KeyCode::Char('a') => open_add_form(app),
        KeyCode::Char('w') => handle_export(app, ExportFormat::Csv),
        KeyCode::Char('W') => handle_export(app, ExportFormat::Tsv),
        _ => match app.tab {
            Tab::Visits => handle_visits_key(app, key),
            Tab::Calendar => handle_calendar_key(app, key),
            Tab::Analytics => {}
        },
    }
    Ok(false)
}

fn handle_visits_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('j') | KeyCode::Down => app.move_selection(Move::Down),
        KeyCode::Char('k') | KeyCode::Up => app.move_selection(Move::Up),
        KeyCode::PageDown => app.move_selection(Move::PageDown),
        KeyCode::PageUp => app.move_selection(Move::PageUp),
        KeyCode::Home | KeyCode::Char('g') => app.move_selection(Move::First),
        KeyCode::End | KeyCode::Char('G') => app.move_selection(Move::Last),
        KeyCode::Char('/') => {
            app.input_mode = InputMode::Search;
            app.search_input = TextInput::with_content(app.active_search.clone().unwrap_or_default());
        }
        KeyCode::Esc => {
            app.active_search = None;
            app.search_input.reset();
            app.clamp_selection();
        }
        KeyCode::Char('e') | KeyCode::Enter => open_edit_form(app),
        KeyCode::Char('s') => cycle_status(app),
        KeyCode::Char('x') | KeyCode::Delete => {
            if let Some(visit) = app.selected_visit() {
                app.pending_delete = Some(visit.id.clone());
                app.input_mode = InputMode::Confirm;
            }
        }
        _ => {}
    }
}

fn handle_calendar_key(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('h') | KeyCode::Char('k') | KeyCode::Up => app.month = app.month.prev(),
        KeyCode::Char('l') | KeyCode::Char('j') | KeyCode::Down => app.month = app.month.next(),
        KeyCode::Char('t') => app.month = YearMonth::from_date(app.today),
        _ => {}
    }
}

fn handle_search_input(app: &mut App, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Esc => {
            app.input_mode = InputMode::None;
            app.active_search = None;
            app.search_input.reset();
        }
        KeyCode::Enter => app.input_mode = InputMode::None,
        _ => {
            if !app.search_input.handle_edit_key(key) {
                return false;
            }
            app.active_search = if app.search_input.content.is_empty() {
                None
            } else {
                Some(app.search_input.content.clone())
            };
            app.table_state.select(Some(0));
        }
    }
    app.clamp_selection();
    false
}

fn handle_confirm_input(app: &mut App, key: KeyEvent) -> bool {
    match key.code {
        KeyCode::Char('y') | KeyCode::Char('Y') => {
            if let Some(id) = app.pending_delete.take() {
                match app.store.remove(&id) {
                    Ok(removed) => {
                        app.status = Some(format!("Deleted visit by {}", removed.contractor_name));
                    }
                    Err(err) => {
                        warn!(error = %err, "delete failed");
                        app.status = Some(err.to_string());
                    }
                }
            }
            app.input_mode = InputMode::None;
            app.clamp_selection();
        }
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
            app.pending_delete = None;
            app.input_mode = InputMode::None;
            app.status = Some("Delete cancelled".into());
        }
        _ => {}
    }
    false
}

fn open_add_form(app: &mut App) {
    app.form = Some(VisitForm::add(app.today));
    app.input_mode = InputMode::Form;
}

fn open_edit_form(app: &mut App) {
    if let Some(visit) = app.selected_visit() {
        app.form = Some(VisitForm::edit(visit));
        app.input_mode = InputMode::Form;
    }
}

fn close_form(app: &mut App) {
    app.form = None;
    app.input_mode = InputMode::None;
}

fn handle_form_input(app: &mut App, key: KeyEvent) -> bool {
    let Some(form) = app.form.as_mut() else {
        app.input_mode = InputMode::None;
        return false;
    };
    match key.code {
        KeyCode::Esc => {
            close_form(app);
            app.status = Some("Form cancelled".into());
        }
        KeyCode::BackTab | KeyCode::Up => {
            if form.step > 0 {
                form.go_to(form.step - 1);
            }
        }
        KeyCode::Enter | KeyCode::Tab | KeyCode::Down => {
            if let Err(message) = form.field().check(&form.input.content) {
                app.status = Some(message);
                return false;
            }
            if form.is_last() {
                form.go_to(form.step);
                submit_form(app);
            } else {
                form.go_to(form.step + 1);
                app.status = None;
            }
        }
        _ => {
            form.input.handle_edit_key(key);
        }
    }
    false
}

fn submit_form(app: &mut App) {
    let Some(form) = app.form.clone() else {
        return;
    };
    let outcome = form.to_new_visit().and_then(|visit| match &form.mode {
        FormMode::Add => app
            .store
            .add(visit)
            .map(|added| format!("Added visit by {}", added.contractor_name)),
        FormMode::Edit(id) => {
            let Some(existing) = app.store.get(id) else {
                return Err(sv_core::CoreError::NotFound(id.clone()));
            };
            let edited = VisitRecord::from_new(id.clone(), visit);
            let patch = VisitPatch::diff(existing, &edited);
            if patch.is_empty() {
                return Ok("No changes".to_string());
            }
            app.store
                .update(id, &patch)
                .map(|updated| format!("Updated visit by {}", updated.contractor_name))
        }
    });
    match outcome {
        Ok(message) => {
            app.status = Some(message);
            close_form(app);
            app.clamp_selection();
        }
        Err(err) => app.status = Some(err.to_string()),
    }
}

fn cycle_status(app: &mut App) {
    let Some(visit) = app.selected_visit() else {
        return;
    };
    let id = visit.id.clone();
    let patch = VisitPatch::status(visit.status.cycle());
    app.status = Some(match app.store.update(&id, &patch) {
        Ok(updated) => format!("{} is now {}", updated.contractor_name, updated.status),
        Err(err) => err.to_string(),
    });
}

fn handle_export(app: &mut App, format: ExportFormat) {
    let visits: Vec<VisitRecord> = app.filtered_visits().into_iter().cloned().collect();
    app.status = Some(match write_export(&app.export_dir, &visits, format) {
        Ok(path) => {
            info!(path = %path.display(), rows = visits.len(), "export written");
            format!("Exported {} visit(s) to {}", visits.len(), path.display())
        }
        Err(err) => {
            let message = format!("{err:#}");
            warn!(dir = %app.export_dir.display(), error = %message, "export failed");
            format!("Export failed: {message}")
        }
    });
}

fn write_export(dir: &Path, visits: &[VisitRecord], format: ExportFormat) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).context("failed to create export directory")?;
    let path = dir.join(format.default_file_name());
    let contents = export(visits, format).context("failed to render export")?;
    std::fs::write(&path, contents).context("failed to write export")?;
    Ok(path)
}

fn status_color(status: VisitStatus) -> Color {
    match status {
        VisitStatus::Completed => Color::Green,
        VisitStatus::InProgress => Color::Blue,
        VisitStatus::Scheduled => Color::Yellow,
        VisitStatus::Cancelled => Color::Red,
    }
}

fn render_app(frame: &mut Frame, app: &App) {
    let size = frame.size();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(3)].as_ref())
        .split(size);

    let titles = ["Visits", "Calendar", "Analytics"]
        .iter()
        .map(|title| Line::from(Span::styled(*title, Style::default())))
        .collect::<Vec<_>>();

    let tabs = Tabs::new(titles)
        .select(match app.tab {
            Tab::Visits => 0,
            Tab::Calendar => 1,
            Tab::Analytics => 2,
        })
        .block(Block::default().borders(Borders::ALL).title("Contractor Visits"))
        .highlight_style(Style::default().add_modifier(Modifier::BOLD));
    frame.render_widget(tabs, chunks[0]);

    match app.tab {
        Tab::Visits => render_visits(frame, chunks[1], app),
        Tab::Calendar => render_calendar(frame, chunks[1], app),
        Tab::Analytics => render_analytics(frame, chunks[1], app),
    }

    render_guide_bar(frame, chunks[2], app);

    match app.input_mode {
        InputMode::Search => render_search_popup(frame, app),
        InputMode::Form => render_form_popup(frame, size, app),
        InputMode::Confirm => render_confirm_popup(frame, size, app),
        InputMode::None => {}
    }

    if app.show_help {
        render_help_popup(frame, size, help_text(app));
    }
}

fn render_visits(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(5), Constraint::Length(7)].as_ref())
        .split(area);

    let visits = app.filtered_visits();
    let search_line = match &app.active_search {
        Some(query) => format!(
            " Search: {query}  ({} of {} visits)",
            visits.len(),
            app.store.len()
        ),
        None => format!(" {} of {} visits", visits.len(), app.store.len()),
    };
    frame.render_widget(
        Paragraph::new(search_line).style(Style::default().fg(Color::DarkGray)),
        chunks[0],
    );

    let header = Row::new(["Contractor", "Company", "Job Type", "Date", "Time", "Status", "Recurrence", "Next"])
        .style(Style::default().add_modifier(Modifier::BOLD));
    let rows = visits
        .iter()
        .map(|visit| {
            Row::new(vec![
                Cell::from(truncate(&visit.contractor_name, 20)),
                Cell::from(truncate(&visit.company, 22)),
                Cell::from(truncate(&visit.job_type, 18)),
                Cell::from(visit.date.to_string()),
                Cell::from(format!("{}-{}", visit.time_in, visit.time_out)),
                Cell::from(Span::styled(
                    visit.status.label(),
                    Style::default().fg(status_color(visit.status)),
                )),
                Cell::from(visit.recurrence.label()),
                Cell::from(
                    visit
                        .next_scheduled
                        .map(|date| date.to_string())
                        .unwrap_or_else(|| "-".into()),
                ),
            ])
        })
        .collect::<Vec<_>>();
    let widths = [
        Constraint::Length(20),
        Constraint::Length(22),
        Constraint::Length(18),
        Constraint::Length(10),
        Constraint::Length(11),
        Constraint::Length(11),
        Constraint::Length(10),
        Constraint::Length(10),
    ];
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title("Visits"))
        .highlight_style(Style::default().bg(Color::DarkGray));
    frame.render_stateful_widget(table, chunks[1], &mut app.table_state.clone());

    let detail = match app.selected_visit() {
        Some(visit) => {
            let lines = vec![
                Line::from(Span::styled(
                    format!("{} · {}", visit.contractor_name, visit.company),
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(format!(
                    "{}  {} - {}",
                    format_long_date(visit.date),
                    visit.time_in.to_12h(),
                    visit.time_out.to_12h()
                )),
                Line::from(format!("{}: {}", visit.job_type, visit.description)),
                Line::from(format!(
                    "Contact: {}  {}",
                    visit.contact_email, visit.contact_phone
                )),
            ];
            Paragraph::new(lines).wrap(Wrap { trim: true })
        }
        None => Paragraph::new("No visit selected"),
    };
    frame.render_widget(
        detail.block(Block::default().borders(Borders::ALL).title("Details")),
        chunks[2],
    );
}

fn render_calendar(frame: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)].as_ref())
        .split(area);

    let visits = app.store.list();
    let view = month_view(visits, app.month);

    let header = Row::new(["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"])
        .style(Style::default().add_modifier(Modifier::BOLD));
    let rows = view
        .grid
        .weeks()
        .into_iter()
        .map(|week| {
            let cells = week.into_iter().map(|slot| {
                let Some(day) = slot else {
                    return Cell::from("");
                };
                let count = view.day(day).map_or(0, |entry| entry.visits.len());
                let text = if count > 0 {
                    format!("{day:>2} •{count}")
                } else {
                    format!("{day:>2}")
                };
                let mut style = Style::default();
                if count > 0 {
                    style = style.fg(Color::Cyan).add_modifier(Modifier::BOLD);
                }
                if app.month.date(day) == Some(app.today) {
                    style = style.add_modifier(Modifier::REVERSED);
                }
                Cell::from(Span::styled(text, style))
            });
            Row::new(cells.collect::<Vec<_>>()).height(2)
        })
        .collect::<Vec<_>>();
    let grid = Table::new(rows, [Constraint::Ratio(1, 7); 7])
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(app.month.long_label()),
        );
    frame.render_widget(grid, chunks[0]);

    let items = view
        .agenda
        .iter()
        .map(|visit| {
            let shown = if app.month.contains(visit.date) {
                visit.date
            } else {
                visit.next_scheduled.unwrap_or(visit.date)
            };
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{} ", shown.format("%b %d")),
                    Style::default().fg(Color::Blue),
                ),
                Span::raw(format!("{} - {} ", visit.contractor_name, visit.job_type)),
                Span::styled(
                    visit.status.label(),
                    Style::default().fg(status_color(visit.status)),
                ),
            ]))
        })
        .collect::<Vec<_>>();
    let agenda = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("Visits in {} ({})", app.month.label(), view.agenda.len())),
    );
    frame.render_widget(agenda, chunks[1]);
}

fn render_analytics(frame: &mut Frame, area: Rect, app: &App) {
    let visits = app.store.list();
    let summary = summarize(visits);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(5), Constraint::Min(8), Constraint::Min(8)].as_ref())
        .split(area);

    let card_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(25); 4].as_ref())
        .split(chunks[0]);
    let cards = [
        ("Total Visits", summary.total.to_string(), "All contractor visits".to_string(), Color::Cyan),
        (
            "Completed",
            summary.completed.to_string(),
            format!("{}% completion rate", summary.completion_rate),
            Color::Green,
        ),
        ("Upcoming", summary.scheduled.to_string(), "Scheduled visits".to_string(), Color::Yellow),
        ("In Progress", summary.in_progress.to_string(), "Active contractors".to_string(), Color::Blue),
    ];
    for ((title, value, caption, color), card_area) in cards.into_iter().zip(card_chunks.iter()) {
        let card = Paragraph::new(vec![
            Line::from(Span::styled(value, Style::default().fg(color).add_modifier(Modifier::BOLD))),
            Line::from(Span::styled(caption, Style::default().fg(Color::DarkGray))),
        ])
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title(title));
        frame.render_widget(card, *card_area);
    }

    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(chunks[1]);
    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)].as_ref())
        .split(chunks[2]);

    let distribution = |field: GroupField| -> Vec<(String, u64)> {
        group_by(visits, field)
            .into_iter()
            .map(|group| (group.value, group.count as u64))
            .collect()
    };
    let trend = monthly_trend(visits)
        .into_iter()
        .map(|point| (point.period.label(), point.count as u64))
        .collect::<Vec<_>>();

    render_bars(frame, top[0], "Job Type Distribution", &distribution(GroupField::JobType), Color::Blue);
    render_bars(frame, top[1], "Status Distribution", &distribution(GroupField::Status), Color::Green);
    render_bars(frame, bottom[0], "Monthly Visits Trend", &trend, Color::Magenta);
    render_bars(frame, bottom[1], "Recurrence Patterns", &distribution(GroupField::Recurrence), Color::Yellow);
}

fn render_bars(frame: &mut Frame, area: Rect, title: &str, data: &[(String, u64)], color: Color) {
    let bars = data
        .iter()
        .map(|(label, value)| (label.as_str(), *value))
        .collect::<Vec<_>>();
    let chart = BarChart::default()
        .block(Block::default().title(title.to_string()).borders(Borders::ALL))
        .data(bars.as_slice())
        .bar_width(9)
        .bar_gap(1)
        .bar_style(Style::default().fg(color))
        .value_style(Style::default().fg(Color::Black).bg(color));
    frame.render_widget(chart, area);
}

fn render_search_popup(frame: &mut Frame, app: &App) {
    let area = centered_rect(60, 20, frame.size());
    let r = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(1)].as_ref())
        .split(area);

    frame.render_widget(Clear, r[0]);

    let input = Paragraph::new(app.search_input.content.as_str())
        .style(Style::default().fg(Color::Yellow))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Search contractors, companies, or job types"),
        );
    frame.render_widget(input, r[0]);

    frame.set_cursor(cursor_x(r[0], app.search_input.cursor), r[0].y + 1);
}

fn render_form_popup(frame: &mut Frame, area: Rect, app: &App) {
    let Some(form) = &app.form else {
        return;
    };
    let popup_area = centered_rect(80, 80, area);
    frame.render_widget(Clear, popup_area);
    let title = match form.mode {
        FormMode::Add => "Add Contractor Visit",
        FormMode::Edit(_) => "Edit Contractor Visit",
    };
    let block = Block::default().borders(Borders::ALL).title(title);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(4), Constraint::Length(3), Constraint::Length(2)].as_ref())
        .margin(1)
        .split(popup_area);

    let lines = FormField::ALL
        .iter()
        .enumerate()
        .map(|(index, field)| {
            let value = if index == form.step {
                form.input.content.as_str()
            } else {
                form.values[index].as_str()
            };
            let style = if index == form.step {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            let name = field.label().split(" (").next().unwrap_or_default();
            Line::from(vec![
                Span::styled(format!("{name:>16}: "), style),
                Span::raw(value.to_string()),
            ])
        })
        .collect::<Vec<_>>();
    frame.render_widget(Paragraph::new(lines), chunks[0]);

    let input = Paragraph::new(form.input.content.as_str())
        .block(Block::default().borders(Borders::ALL).title(form.field().label()));
    frame.render_widget(input, chunks[1]);
    frame.set_cursor(cursor_x(chunks[1], form.input.cursor), chunks[1].y + 1);

    let help = app
        .status
        .clone()
        .unwrap_or_else(|| "Enter: Next | Shift+Tab: Back | Esc: Cancel".into());
    frame.render_widget(
        Paragraph::new(help).style(Style::default().fg(Color::DarkGray)),
        chunks[2],
    );

    frame.render_widget(block, popup_area);
}

fn render_confirm_popup(frame: &mut Frame, area: Rect, app: &App) {
    let popup_area = centered_rect(60, 18, area);
    frame.render_widget(Clear, popup_area);
    let block = Block::default().borders(Borders::ALL).title("Confirm Delete");

    let message = match app.pending_delete.as_ref().and_then(|id| app.store.get(id)) {
        Some(visit) => format!(
            "Delete the visit by {} ({}) on {}?\nThis cannot be undone.",
            visit.contractor_name, visit.company, visit.date
        ),
        None => "No pending action.".to_string(),
    };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(2), Constraint::Length(1)].as_ref())
        .margin(1)
        .split(popup_area);

    frame.render_widget(Paragraph::new(message).wrap(Wrap { trim: true }), chunks[0]);
    frame.render_widget(
        Paragraph::new("y: Delete | n/Esc: Cancel").style(Style::default().fg(Color::DarkGray)),
        chunks[1],
    );
    frame.render_widget(block, popup_area);
}

fn render_guide_bar(frame: &mut Frame, area: Rect, app: &App) {
    let mut spans: Vec<Span> = get_key_hints(app)
        .iter()
        .flat_map(|(key, desc)| {
            vec![
                Span::styled(
                    format!(" [{key}] "),
                    Style::default().add_modifier(Modifier::BOLD).fg(Color::Cyan),
                ),
                Span::raw(format!("{desc}  ")),
            ]
        })
        .collect();
    if let Some(status) = app.status.as_ref().filter(|_| app.input_mode == InputMode::None) {
        spans.push(Span::styled(status.clone(), Style::default().fg(Color::Yellow)));
    }

    let guide = Paragraph::new(Line::from(spans))
        .block(Block::default().borders(Borders::ALL).title("Guide"));
    frame.render_widget(guide, area);
}

fn get_key_hints(app: &App) -> Vec<(&'static str, &'static str)> {
    match app.input_mode {
        InputMode::Search => return vec![("Enter", "Apply"), ("Esc", "Clear")],
        InputMode::Form => return vec![("Enter", "Next"), ("S-Tab", "Back"), ("Esc", "Cancel")],
        InputMode::Confirm => return vec![("y", "Delete"), ("n", "Cancel")],
        InputMode::None => {}
    }
    if app.show_help {
        return vec![("?", "Close Help")];
    }

    let mut hints = vec![("q", "Quit"), ("?", "Help"), ("←/→", "Tabs"), ("a", "Add")];
    match app.tab {
        Tab::Visits => hints.extend_from_slice(&[
            ("/", "Search"),
            ("e", "Edit"),
            ("s", "Status"),
            ("x", "Delete"),
            ("w/W", "Export"),
        ]),
        Tab::Calendar => hints.extend_from_slice(&[("h/l", "Month"), ("t", "Today")]),
        Tab::Analytics => hints.extend_from_slice(&[("w/W", "Export")]),
    }
    hints
}

fn help_text(app: &App) -> &'static str {
    match app.tab {
        Tab::Visits => {
            "/: search by contractor, company, job type\nesc: clear search\na: add visit\ne/enter: edit visit\ns: cycle status\nx: delete visit (asks first)\nw: export CSV\nW: export TSV\nj/k: move\nleft/right: switch tabs\nq: quit"
        }
        Tab::Calendar => {
            "h/l: previous/next month\nt: back to this month\na: add visit\nleft/right: switch tabs\nq: quit"
        }
        Tab::Analytics => "a: add visit\nw/W: export CSV/TSV\nleft/right: switch tabs\nq: quit",
    }
}

fn render_help_popup(frame: &mut Frame, area: Rect, content: &str) {
    let popup_area = centered_rect(70, 50, area);
    frame.render_widget(Clear, popup_area);
    let block = Block::default().borders(Borders::ALL).title("Help");
    let help = Paragraph::new(content).block(block).wrap(Wrap { trim: true });
    frame.render_widget(help, popup_area);
}

fn cursor_x(area: Rect, cursor: usize) -> u16 {
    let offset = u16::try_from(cursor).unwrap_or(u16::MAX);
    area.x + 1 + offset.min(area.width.saturating_sub(3))
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Percentage((100 - percent_y) / 2),
                Constraint::Percentage(percent_y),
                Constraint::Percentage((100 - percent_y) / 2),
            ]
            .as_ref(),
        )
        .split(r);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints(
            [
                Constraint::Percentage((100 - percent_x) / 2),
                Constraint::Percentage(percent_x),
                Constraint::Percentage((100 - percent_x) / 2),
            ]
            .as_ref(),
        )
        .split(popup_layout[1])[1]
}

fn restore_terminal(mut terminal: Terminal<ratatui::backend::CrosstermBackend<Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use tempfile::TempDir;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_text(app: &mut App, text: &str) {
        for ch in text.chars() {
            handle_key(app, key(KeyCode::Char(ch))).unwrap();
        }
    }

    fn demo_app() -> App {
        let store = sv_store::open_store(None).unwrap();
        let today = parse_date("2025-03-10").unwrap();
        App::new(store, today, PathBuf::from("."))
    }

    fn render(app: &App) -> String {
        let backend = TestBackend::new(120, 40);
        let mut terminal = Terminal::new(backend).expect("terminal");
        terminal
            .draw(|frame| render_app(frame, app))
            .expect("render");
        buffer_to_string(terminal.backend().buffer())
    }

    fn buffer_to_string(buffer: &ratatui::buffer::Buffer) -> String {
        let mut lines = Vec::new();
        for y in 0..buffer.area.height {
            let mut line = String::new();
            for x in 0..buffer.area.width {
                let cell = buffer.get(x, y);
                line.push_str(cell.symbol());
            }
            lines.push(line.trim_end().to_string());
        }
        lines.join("\n")
    }

    #[test]
    fn visits_tab_renders_table_and_count() {
        let app = demo_app();
        let screen = render(&app);
        assert!(screen.contains("Mike Johnson"));
        assert!(screen.contains("10 of 10 visits"));
        assert!(screen.contains("Details"));
    }

    #[test]
    fn search_filters_rows() {
        let mut app = demo_app();
        handle_key(&mut app, key(KeyCode::Char('/'))).unwrap();
        type_text(&mut app, "LANDSC");
        handle_key(&mut app, key(KeyCode::Enter)).unwrap();
        assert_eq!(app.filtered_visits().len(), 2);
        assert!(render(&app).contains("2 of 10 visits"));

        handle_key(&mut app, key(KeyCode::Esc)).unwrap();
        assert_eq!(app.filtered_visits().len(), 10);
    }

    #[test]
    fn delete_requires_confirmation() {
        let mut app = demo_app();
        handle_key(&mut app, key(KeyCode::Char('x'))).unwrap();
        assert_eq!(app.input_mode, InputMode::Confirm);
        assert!(render(&app).contains("Confirm Delete"));
        handle_key(&mut app, key(KeyCode::Char('n'))).unwrap();
        assert_eq!(app.store.len(), 10);

        handle_key(&mut app, key(KeyCode::Char('x'))).unwrap();
        handle_key(&mut app, key(KeyCode::Char('y'))).unwrap();
        assert_eq!(app.store.len(), 9);
        assert!(app.store.get(&VisitId::new("1")).is_none());
        assert_eq!(app.table_state.selected(), Some(0));
    }

    #[test]
    fn status_cycles_on_selected_visit() {
        let mut app = demo_app();
        handle_key(&mut app, key(KeyCode::Char('s'))).unwrap();
        let first = &app.store.list()[0];
        assert_eq!(first.status, VisitStatus::InProgress);
    }

    #[test]
    fn add_form_creates_visit() {
        let mut app = demo_app();
        handle_key(&mut app, key(KeyCode::Char('a'))).unwrap();
        assert_eq!(app.input_mode, InputMode::Form);

        let answers = [
            "Nina Park", "Bright Windows", "Window Cleaning", "Exterior glass",
            "", "08:00", "12:00", "", "", "", "nina@bright.test", "555-0199",
        ];
        for answer in answers {
            type_text(&mut app, answer);
            handle_key(&mut app, key(KeyCode::Enter)).unwrap();
        }

        assert_eq!(app.input_mode, InputMode::None);
        assert_eq!(app.store.len(), 11);
        let added = app.store.list().last().unwrap();
        assert_eq!(added.contractor_name, "Nina Park");
        assert_eq!(added.date, app.today);
        assert_eq!(added.status, VisitStatus::Scheduled);
        assert_eq!(added.recurrence, Recurrence::OneTime);
    }

    #[test]
    fn form_stays_on_invalid_field() {
        let mut app = demo_app();
        handle_key(&mut app, key(KeyCode::Char('a'))).unwrap();
        handle_key(&mut app, key(KeyCode::Enter)).unwrap();
        assert_eq!(app.form.as_ref().unwrap().step, 0);
        assert!(app.status.as_deref().unwrap_or_default().contains("required"));

        handle_key(&mut app, key(KeyCode::Esc)).unwrap();
        assert!(app.form.is_none());
        assert_eq!(app.store.len(), 10);
    }

    #[test]
    fn edit_form_updates_only_changed_fields() {
        let mut app = demo_app();
        handle_key(&mut app, key(KeyCode::Char('e'))).unwrap();
        // Skip to the company field and replace it.
        handle_key(&mut app, key(KeyCode::Enter)).unwrap();
        handle_key(&mut app, KeyEvent::new(KeyCode::Char('u'), KeyModifiers::CONTROL)).unwrap();
        type_text(&mut app, "Arctic Air");
        for _ in 1..FormField::ALL.len() {
            handle_key(&mut app, key(KeyCode::Enter)).unwrap();
        }
        let visit = app.store.get(&VisitId::new("1")).unwrap();
        assert_eq!(visit.company, "Arctic Air");
        assert_eq!(visit.contractor_name, "Mike Johnson");
        assert_eq!(app.status.as_deref(), Some("Updated visit by Mike Johnson"));
    }

    #[test]
    fn calendar_navigates_months() {
        let mut app = demo_app();
        handle_key(&mut app, key(KeyCode::Char('2'))).unwrap();
        let screen = render(&app);
        assert!(screen.contains("March 2025"));
        assert!(screen.contains("Visits in Mar 2025"));

        handle_key(&mut app, key(KeyCode::Char('l'))).unwrap();
        assert_eq!(app.month, YearMonth::new(2025, 4).unwrap());
        handle_key(&mut app, key(KeyCode::Char('h'))).unwrap();
        handle_key(&mut app, key(KeyCode::Char('h'))).unwrap();
        assert_eq!(app.month, YearMonth::new(2025, 2).unwrap());
        handle_key(&mut app, key(KeyCode::Char('t'))).unwrap();
        assert_eq!(app.month, YearMonth::new(2025, 3).unwrap());
    }

    #[test]
    fn analytics_shows_summary_cards() {
        let mut app = demo_app();
        handle_key(&mut app, key(KeyCode::Char('3'))).unwrap();
        let screen = render(&app);
        assert!(screen.contains("Total Visits"));
        assert!(screen.contains("40% completion rate"));
        assert!(screen.contains("Monthly Visits Trend"));
    }

    #[test]
    fn export_writes_file() {
        let temp = TempDir::new().expect("temp dir");
        let mut app = demo_app();
        app.export_dir = temp.path().join("exports");
        handle_key(&mut app, key(KeyCode::Char('w'))).unwrap();
        let written = std::fs::read_to_string(app.export_dir.join("contractor-visits.csv")).unwrap();
        assert_eq!(written.lines().count(), 11);
        assert!(app.status.as_deref().unwrap_or_default().starts_with("Exported 10 visit(s)"));
    }

    #[test]
    fn export_failure_keeps_session_open() {
        let temp = TempDir::new().expect("temp dir");
        let blocker = temp.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();
        let mut app = demo_app();
        app.export_dir = blocker.join("sub");

        let quit = handle_key(&mut app, key(KeyCode::Char('w'))).unwrap();
        assert!(!quit);
        assert!(app
            .status
            .as_deref()
            .unwrap_or_default()
            .starts_with("Export failed: failed to create export directory"));

        handle_key(&mut app, key(KeyCode::Char('s'))).unwrap();
        assert_eq!(app.store.len(), 10);
    }

    #[test]
    fn text_input_handles_multibyte() {
        let mut input = TextInput::with_content("café".into());
        input.delete_back();
        input.insert('e');
        assert_eq!(input.content, "cafe");
        input.move_home();
        input.insert('X');
        assert_eq!(input.content, "Xcafe");
    }
}
