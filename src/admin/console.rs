use std::{
    error::Error,
    io::{self, Stdout},
    time::Duration,
};

use chrono::Utc;
use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::{Alignment, Constraint, CrosstermBackend, Direction, Layout},
    style::{Color, Modifier, Style, Stylize},
    text::Line,
    widgets::{Block, BorderType, Borders, Cell, Paragraph, Row, Table, TableState},
    Terminal,
};
use tracing::{info, warn};

use super::{
    change_list, display_value, AdminError, AdminSite, ChangeList, ChangeListQuery, Ordering,
    TODO_MODEL,
};
use crate::{
    database::Database,
    model::{NewTodo, TodoChanges, TodoField},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputField {
    Search,
    NewTitle,
    EditTitle(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    List,
    Input(InputField),
    ConfirmDelete(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Console {
    db: Database,
    site: AdminSite,
    pub state: AppState,
    pub query: ChangeListQuery,
    pub input: String,
    pub message: Option<String>,
    pub table_state: TableState,
    pub change_list: Option<ChangeList>,
}

impl Console {
    pub fn new(db: Database, site: AdminSite) -> Result<Console, AdminError> {
        site.model_admin(TODO_MODEL)?;
        let mut console = Console {
            db,
            site,
            state: AppState::List,
            query: ChangeListQuery::default(),
            input: String::new(),
            message: None,
            table_state: TableState::default(),
            change_list: None,
        };
        console.refresh()?;
        Ok(console)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Re-runs the change list query. A page that no longer exists after a
    /// delete or a new filter falls back to the first page.
    pub fn refresh(&mut self) -> Result<(), AdminError> {
        let admin = self.site.model_admin(TODO_MODEL)?;
        let today = Utc::now().date_naive();
        let result = change_list(&self.db, admin, &self.query, today);
        let list = match result {
            Err(AdminError::InvalidPage { .. }) if self.query.page != 1 => {
                self.query.page = 1;
                change_list(&self.db, admin, &self.query, today)?
            }
            other => other?,
        };

        let selected = match self.table_state.selected() {
            _ if list.rows.is_empty() => None,
            Some(index) => Some(index.min(list.rows.len() - 1)),
            None => Some(0),
        };
        self.table_state.select(selected);
        self.change_list = Some(list);
        Ok(())
    }

    fn selected_id(&self) -> Option<i64> {
        let list = self.change_list.as_ref()?;
        let index = self.table_state.selected()?;
        list.rows.get(index).map(|todo| todo.id)
    }

    fn default_ordering(&self) -> Ordering {
        self.change_list
            .as_ref()
            .map(|list| list.ordering)
            .unwrap_or(Ordering {
                field: TodoField::Id,
                descending: true,
            })
    }

    pub fn handle_key(&mut self, code: KeyCode) -> Result<Flow, AdminError> {
        match self.state {
            AppState::List => return self.handle_list_key(code),
            AppState::Input(field) => self.handle_input_key(field, code)?,
            AppState::ConfirmDelete(id) => {
                if let KeyCode::Char('y') = code {
                    if self.db.delete_todo(id)? {
                        info!(id, "admin deleted todo");
                        self.message = Some(format!("Deleted todo {id}"));
                    }
                    self.refresh()?;
                } else {
                    self.message = Some("Delete cancelled".to_string());
                }
                self.state = AppState::List;
            }
        }
        Ok(Flow::Continue)
    }

    fn handle_list_key(&mut self, code: KeyCode) -> Result<Flow, AdminError> {
        self.message = None;
        match code {
            KeyCode::Char('q') => return Ok(Flow::Quit),
            KeyCode::Char('j') | KeyCode::Down => self.move_down(),
            KeyCode::Char('k') | KeyCode::Up => self.move_up(),
            KeyCode::Char('/') => {
                self.input = self.query.search.clone();
                self.state = AppState::Input(InputField::Search);
            }
            KeyCode::Char('a') => {
                self.input.clear();
                self.state = AppState::Input(InputField::NewTitle);
            }
            KeyCode::Char('e') => {
                if let Some(id) = self.selected_id() {
                    self.input = self
                        .db
                        .fetch_todo(id)?
                        .map(|todo| todo.title)
                        .unwrap_or_default();
                    self.state = AppState::Input(InputField::EditTitle(id));
                }
            }
            KeyCode::Char(' ') => {
                if let Some(id) = self.selected_id() {
                    if let Some(todo) = self.db.fetch_todo(id)? {
                        self.db.toggle_todo_completion(id, !todo.completed)?;
                        info!(id, completed = !todo.completed, "admin toggled todo");
                    }
                    self.refresh()?;
                }
            }
            KeyCode::Char('D') => {
                if let Some(id) = self.selected_id() {
                    self.state = AppState::ConfirmDelete(id);
                }
            }
            KeyCode::Char('c') => {
                self.query.completed = self.query.completed.next();
                self.query.page = 1;
                self.refresh()?;
            }
            KeyCode::Char('d') => {
                self.query.created = self.query.created.next();
                self.query.page = 1;
                self.refresh()?;
            }
            KeyCode::Char('o') => {
                let current = self.query.ordering.unwrap_or_else(|| self.default_ordering());
                let columns = self
                    .change_list
                    .as_ref()
                    .map(|list| list.columns.clone())
                    .unwrap_or_default();
                let position = columns.iter().position(|field| *field == current.field);
                let next = position
                    .and_then(|index| columns.get((index + 1) % columns.len()))
                    .copied()
                    .unwrap_or(TodoField::Id);
                self.query.ordering = Some(Ordering {
                    field: next,
                    descending: false,
                });
                self.refresh()?;
            }
            KeyCode::Char('O') => {
                let current = self.query.ordering.unwrap_or_else(|| self.default_ordering());
                self.query.ordering = Some(current.reversed());
                self.refresh()?;
            }
            KeyCode::Char('n') => {
                let num_pages = self.change_list.as_ref().map_or(1, |list| list.num_pages);
                if self.query.page < num_pages {
                    self.query.page += 1;
                    self.table_state.select(Some(0));
                    self.refresh()?;
                }
            }
            KeyCode::Char('p') => {
                if self.query.page > 1 {
                    self.query.page -= 1;
                    self.table_state.select(Some(0));
                    self.refresh()?;
                }
            }
            _ => {}
        }
        Ok(Flow::Continue)
    }

    fn handle_input_key(&mut self, field: InputField, code: KeyCode) -> Result<(), AdminError> {
        match code {
            KeyCode::Char(c) => self.input.push(c),
            KeyCode::Backspace => {
                self.input.pop();
            }
            KeyCode::Esc => {
                if field == InputField::Search {
                    self.query.search.clear();
                    self.query.page = 1;
                    self.refresh()?;
                }
                self.input.clear();
                self.state = AppState::List;
            }
            KeyCode::Enter => {
                let text = std::mem::take(&mut self.input);
                match field {
                    InputField::Search => {
                        self.query.search = text;
                        self.query.page = 1;
                    }
                    InputField::NewTitle | InputField::EditTitle(_) if text.trim().is_empty() => {
                        warn!("admin rejected blank title");
                        self.message = Some("Title may not be blank".to_string());
                        self.state = AppState::List;
                        return Ok(());
                    }
                    InputField::NewTitle => {
                        let todo = self.db.add_todo(&NewTodo::titled(text.trim()))?;
                        info!(id = todo.id, "admin added todo");
                        self.message = Some(format!("Added todo {}", todo.id));
                    }
                    InputField::EditTitle(id) => {
                        let changes = TodoChanges {
                            title: Some(text.trim().to_string()),
                            ..TodoChanges::default()
                        };
                        if self.db.update_todo(id, &changes)?.is_some() {
                            info!(id, "admin renamed todo");
                            self.message = Some(format!("Updated todo {id}"));
                        }
                    }
                }
                self.state = AppState::List;
                self.refresh()?;
            }
            _ => {}
        }
        Ok(())
    }

    fn move_down(&mut self) {
        let len = self.change_list.as_ref().map_or(0, |list| list.rows.len());
        if len == 0 {
            return;
        }
        match self.table_state.selected() {
            Some(v) => self.table_state.select(Some((v + 1).min(len - 1))),
            None => self.table_state.select(Some(0)),
        }
    }

    fn move_up(&mut self) {
        match self.table_state.selected() {
            Some(v) => self.table_state.select(Some(v.saturating_sub(1))),
            None => self.table_state.select(Some(0)),
        }
    }
}

pub fn run(db: Database, site: AdminSite) -> Result<(), Box<dyn Error>> {
    let mut console = Console::new(db, site)?;
    let mut terminal = setup_terminal()?;
    let result = event_loop(&mut terminal, &mut console);
    restore_terminal(&mut terminal)?;
    result
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, Box<dyn Error>> {
    let mut stdout = io::stdout();
    enable_raw_mode()?;
    execute!(stdout, EnterAlternateScreen)?;
    Ok(Terminal::new(CrosstermBackend::new(stdout))?)
}

fn restore_terminal(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
) -> Result<(), Box<dyn Error>> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    Ok(terminal.show_cursor()?)
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    console: &mut Console,
) -> Result<(), Box<dyn Error>> {
    loop {
        draw(terminal, console)?;

        if event::poll(Duration::from_millis(250))? {
            if let Event::Key(key) = event::read()? {
                match console.handle_key(key.code) {
                    Ok(Flow::Quit) => return Ok(()),
                    Ok(Flow::Continue) => {}
                    Err(AdminError::Database(err)) => return Err(err.into()),
                    Err(err) => {
                        warn!(error = %err, "admin action failed");
                        console.message = Some(err.to_string());
                        console.state = AppState::List;
                    }
                }
            }
        }
    }
}

fn header_label(field: TodoField, ordering: Ordering) -> String {
    match (field == ordering.field, ordering.descending) {
        (true, true) => format!("{field} v"),
        (true, false) => format!("{field} ^"),
        (false, _) => field.to_string(),
    }
}

fn draw(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    console: &mut Console,
) -> Result<(), Box<dyn Error>> {
    let (rows, header, widths, title) = match &console.change_list {
        Some(list) => {
            let rows: Vec<Row> = list
                .rows
                .iter()
                .map(|todo| {
                    Row::new(
                        list.columns
                            .iter()
                            .map(|field| Cell::from(display_value(todo, *field))),
                    )
                })
                .collect();
            let header = Row::new(
                list.columns
                    .iter()
                    .map(|field| Cell::from(header_label(*field, list.ordering))),
            )
            .style(Style::default().add_modifier(Modifier::BOLD));
            let widths: Vec<Constraint> = list
                .columns
                .iter()
                .map(|field| match field {
                    TodoField::Id => Constraint::Length(6),
                    TodoField::Completed => Constraint::Length(11),
                    TodoField::CreatedAt | TodoField::UpdatedAt => Constraint::Length(21),
                    TodoField::Title | TodoField::Description => Constraint::Min(20),
                })
                .collect();
            let title = format!(
                "Todos: {}, page {} of {}",
                list.summary(),
                list.page,
                list.num_pages
            );
            (rows, header, widths, title)
        }
        None => (vec![], Row::new(Vec::<Cell>::new()), vec![], "Todos".to_string()),
    };

    let search_text = match console.state {
        AppState::Input(InputField::Search) => format!("{}_", console.input),
        _ => console.query.search.clone(),
    };

    let sidebar = vec![
        Line::from("By completed".bold()),
        Line::from(format!("  {}", console.query.completed.label())),
        Line::from(""),
        Line::from("By created at".bold()),
        Line::from(format!("  {}", console.query.created.label())),
        Line::from(""),
        Line::from("(c) completed".italic()),
        Line::from("(d) created at".italic()),
        Line::from("(o/O) order".italic()),
    ];

    let status = match console.state {
        AppState::Input(InputField::NewTitle) => format!("New title: {}_", console.input),
        AppState::Input(InputField::EditTitle(id)) => {
            format!("Title for {id}: {}_", console.input)
        }
        AppState::ConfirmDelete(id) => format!("Delete todo {id}? (y) to confirm"),
        _ => console.message.clone().unwrap_or_else(|| {
            "(/) search  (a) add  (e) edit  (space) toggle  (D) delete  (n/p) page  (q) quit"
                .to_string()
        }),
    };

    let table = Table::new(rows)
        .header(header)
        .widths(&widths)
        .block(Block::default().title(title).borders(Borders::ALL))
        .style(Style::default().fg(Color::White))
        .highlight_style(Style::default().add_modifier(Modifier::ITALIC))
        .highlight_symbol(">>");

    terminal.draw(|frame| {
        let size = frame.size();
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints(
                [
                    Constraint::Length(3),
                    Constraint::Min(5),
                    Constraint::Length(3),
                ]
                .as_ref(),
            )
            .split(size);
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(40), Constraint::Length(24)].as_ref())
            .split(rows[1]);

        frame.render_widget(
            Paragraph::new(search_text).block(
                Block::default()
                    .title("Search title")
                    .borders(Borders::ALL)
                    .border_type(BorderType::Rounded),
            ),
            rows[0],
        );
        frame.render_stateful_widget(table, columns[0], &mut console.table_state);
        frame.render_widget(
            Paragraph::new(sidebar).block(Block::default().title("Filter").borders(Borders::ALL)),
            columns[1],
        );
        frame.render_widget(
            Paragraph::new(status)
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .border_type(BorderType::Rounded),
                )
                .alignment(Alignment::Center),
            rows[2],
        );
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn console_with(titles: &[&str]) -> Console {
        let mut db = Database::open_in_memory().unwrap();
        for title in titles {
            db.add_todo(&NewTodo::titled(*title)).unwrap();
        }
        Console::new(db, AdminSite::todo_site().unwrap()).unwrap()
    }

    fn type_text(console: &mut Console, text: &str) {
        for c in text.chars() {
            console.handle_key(KeyCode::Char(c)).unwrap();
        }
    }

    fn listed(console: &Console) -> Vec<String> {
        console
            .change_list
            .as_ref()
            .unwrap()
            .rows
            .iter()
            .map(|todo| todo.title.clone())
            .collect()
    }

    #[test]
    fn starts_on_the_newest_todo() {
        let console = console_with(&["buy milk", "walk the dog"]);
        assert_eq!(listed(&console), vec!["walk the dog", "buy milk"]);
        assert_eq!(console.selected_id(), Some(2));
    }

    #[test]
    fn search_box_filters_and_escape_clears() {
        let mut console = console_with(&["buy milk", "walk the dog", "oat milk"]);
        console.handle_key(KeyCode::Char('/')).unwrap();
        type_text(&mut console, "milk");
        console.handle_key(KeyCode::Enter).unwrap();
        assert_eq!(console.state, AppState::List);
        assert_eq!(listed(&console), vec!["oat milk", "buy milk"]);

        console.handle_key(KeyCode::Char('/')).unwrap();
        console.handle_key(KeyCode::Esc).unwrap();
        assert_eq!(listed(&console).len(), 3);
    }

    #[test]
    fn add_edit_toggle_and_delete() {
        let mut console = console_with(&[]);
        console.handle_key(KeyCode::Char('a')).unwrap();
        type_text(&mut console, "buy milk");
        console.handle_key(KeyCode::Enter).unwrap();
        assert_eq!(listed(&console), vec!["buy milk"]);

        console.handle_key(KeyCode::Char('e')).unwrap();
        assert_eq!(console.input, "buy milk");
        console.handle_key(KeyCode::Backspace).unwrap();
        console.handle_key(KeyCode::Backspace).unwrap();
        console.handle_key(KeyCode::Backspace).unwrap();
        console.handle_key(KeyCode::Backspace).unwrap();
        type_text(&mut console, "bread");
        console.handle_key(KeyCode::Enter).unwrap();
        assert_eq!(listed(&console), vec!["buy bread"]);

        console.handle_key(KeyCode::Char(' ')).unwrap();
        let todo = console.database().fetch_todo(1).unwrap().unwrap();
        assert!(todo.completed);
        assert!(todo.updated_at >= todo.created_at);

        console.handle_key(KeyCode::Char('D')).unwrap();
        assert_eq!(console.state, AppState::ConfirmDelete(1));
        console.handle_key(KeyCode::Char('y')).unwrap();
        assert!(listed(&console).is_empty());
        assert_eq!(console.selected_id(), None);
    }

    #[test]
    fn delete_needs_confirmation() {
        let mut console = console_with(&["buy milk"]);
        console.handle_key(KeyCode::Char('D')).unwrap();
        console.handle_key(KeyCode::Char('n')).unwrap();
        assert_eq!(console.state, AppState::List);
        assert_eq!(listed(&console), vec!["buy milk"]);
    }

    #[test]
    fn blank_titles_are_not_saved() {
        let mut console = console_with(&[]);
        console.handle_key(KeyCode::Char('a')).unwrap();
        type_text(&mut console, "   ");
        console.handle_key(KeyCode::Enter).unwrap();
        assert!(listed(&console).is_empty());
        assert_eq!(console.message.as_deref(), Some("Title may not be blank"));
    }

    #[test]
    fn completed_filter_cycles() {
        let mut console = console_with(&["buy milk", "walk the dog"]);
        console.handle_key(KeyCode::Char(' ')).unwrap();

        console.handle_key(KeyCode::Char('c')).unwrap();
        assert_eq!(listed(&console), vec!["walk the dog"]);
        console.handle_key(KeyCode::Char('c')).unwrap();
        assert_eq!(listed(&console), vec!["buy milk"]);
        console.handle_key(KeyCode::Char('c')).unwrap();
        assert_eq!(listed(&console).len(), 2);
    }

    #[test]
    fn created_filter_today_keeps_new_todos() {
        let mut console = console_with(&["buy milk"]);
        console.handle_key(KeyCode::Char('d')).unwrap();
        assert_eq!(listed(&console), vec!["buy milk"]);
    }

    #[test]
    fn ordering_cycles_through_columns() {
        let mut console = console_with(&["b", "a", "c"]);
        console.handle_key(KeyCode::Char('o')).unwrap();
        assert_eq!(
            console.query.ordering,
            Some(Ordering {
                field: TodoField::Title,
                descending: false
            })
        );
        assert_eq!(listed(&console), vec!["a", "b", "c"]);

        console.handle_key(KeyCode::Char('O')).unwrap();
        assert_eq!(listed(&console), vec!["c", "b", "a"]);
    }

    #[test]
    fn selection_stays_in_bounds() {
        let mut console = console_with(&["a", "b"]);
        console.handle_key(KeyCode::Char('k')).unwrap();
        assert_eq!(console.table_state.selected(), Some(0));
        console.handle_key(KeyCode::Char('j')).unwrap();
        console.handle_key(KeyCode::Char('j')).unwrap();
        assert_eq!(console.table_state.selected(), Some(1));
    }

    #[test]
    fn quit_ends_the_loop() {
        let mut console = console_with(&[]);
        assert_eq!(console.handle_key(KeyCode::Char('q')).unwrap(), Flow::Quit);
    }
}
