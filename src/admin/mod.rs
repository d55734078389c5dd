//! Admin registration for [`Todo`] and the change list that applies it.
//!
//! A [`ModelAdmin`] declares which columns the admin listing shows, which
//! fields the search box looks in, and which fields get a filter. The
//! [`AdminSite`] validates those names against the `todos` table when the
//! model is registered. [`change_list`] evaluates a [`ChangeListQuery`]
//! (search text, filters, ordering, page) against the database.

pub mod console;

use std::{collections::BTreeMap, fmt, str::FromStr};

use chrono::{Datelike, Days, Months, NaiveDate, NaiveTime};
use thiserror::Error;
use tracing::debug;

use crate::{
    database::{Database, DatabaseError, OrderBy, TodoFilter},
    model::{parse_flag, Todo, TodoField},
};

pub const TODO_MODEL: &str = "todo";

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{model}: unknown field `{field}` in {option}")]
    UnknownField {
        model: String,
        option: &'static str,
        field: String,
    },

    #[error("model `{0}` is already registered")]
    AlreadyRegistered(String),

    #[error("model `{0}` is not registered")]
    NotRegistered(String),

    #[error("cannot order by `{0}`")]
    InvalidOrdering(String),

    #[error("invalid page {page}, expected 1..={num_pages}")]
    InvalidPage { page: usize, num_pages: usize },

    #[error("invalid {filter} filter value `{value}`")]
    InvalidFilter { filter: &'static str, value: String },

    #[error("filtering on `{0}` is not enabled")]
    FilterNotAllowed(&'static str),

    #[error("date out of range")]
    DateOutOfRange,

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// How a model is presented in the admin console.
pub trait ModelAdmin: Send + Sync {
    fn model_name(&self) -> &str;

    /// Columns of the change list.
    fn list_display(&self) -> Vec<&str> {
        vec!["id"]
    }

    /// Fields offered as filters in the sidebar.
    fn list_filter(&self) -> Vec<&str> {
        vec![]
    }

    /// Fields the search box matches against.
    fn search_fields(&self) -> Vec<&str> {
        vec![]
    }

    /// Default ordering, `-` prefix for descending.
    fn ordering(&self) -> Vec<&str> {
        vec!["-id"]
    }

    fn list_per_page(&self) -> usize {
        100
    }
}

pub struct TodoAdmin;

impl ModelAdmin for TodoAdmin {
    fn model_name(&self) -> &str {
        TODO_MODEL
    }

    fn list_display(&self) -> Vec<&str> {
        vec!["id", "title", "completed", "created_at", "updated_at"]
    }

    fn list_filter(&self) -> Vec<&str> {
        vec!["completed", "created_at"]
    }

    fn search_fields(&self) -> Vec<&str> {
        vec!["title"]
    }
}

#[derive(Default)]
pub struct AdminSite {
    registry: BTreeMap<String, Box<dyn ModelAdmin>>,
}

impl AdminSite {
    pub fn new() -> AdminSite {
        AdminSite::default()
    }

    /// The site with `Todo` registered.
    pub fn todo_site() -> Result<AdminSite, AdminError> {
        let mut site = AdminSite::new();
        site.register(Box::new(TodoAdmin))?;
        Ok(site)
    }

    pub fn register(&mut self, admin: Box<dyn ModelAdmin>) -> Result<(), AdminError> {
        let model = admin.model_name().to_string();
        if self.registry.contains_key(&model) {
            return Err(AdminError::AlreadyRegistered(model));
        }

        let options = [
            ("list_display", admin.list_display()),
            ("list_filter", admin.list_filter()),
            ("search_fields", admin.search_fields()),
            (
                "ordering",
                admin
                    .ordering()
                    .into_iter()
                    .map(|name| name.trim_start_matches('-'))
                    .collect(),
            ),
        ];
        for (option, fields) in options {
            if let Some(field) = fields.iter().find(|name| TodoField::from_name(name).is_none()) {
                return Err(AdminError::UnknownField {
                    model,
                    option,
                    field: field.to_string(),
                });
            }
        }

        debug!(%model, "registered model admin");
        self.registry.insert(model, admin);
        Ok(())
    }

    pub fn model_admin(&self, model: &str) -> Result<&dyn ModelAdmin, AdminError> {
        self.registry
            .get(model)
            .map(|admin| admin.as_ref())
            .ok_or_else(|| AdminError::NotRegistered(model.to_string()))
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.registry.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompletedFilter {
    #[default]
    All,
    Yes,
    No,
}

impl CompletedFilter {
    pub fn next(self) -> CompletedFilter {
        match self {
            CompletedFilter::All => CompletedFilter::Yes,
            CompletedFilter::Yes => CompletedFilter::No,
            CompletedFilter::No => CompletedFilter::All,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            CompletedFilter::All => "All",
            CompletedFilter::Yes => "Yes",
            CompletedFilter::No => "No",
        }
    }

    fn value(self) -> Option<bool> {
        match self {
            CompletedFilter::All => None,
            CompletedFilter::Yes => Some(true),
            CompletedFilter::No => Some(false),
        }
    }
}

impl FromStr for CompletedFilter {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("all") {
            return Ok(CompletedFilter::All);
        }
        match parse_flag(s) {
            Some(true) => Ok(CompletedFilter::Yes),
            Some(false) => Ok(CompletedFilter::No),
            None => Err(AdminError::InvalidFilter {
                filter: "completed",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CreatedFilter {
    #[default]
    AnyDate,
    Today,
    PastSevenDays,
    ThisMonth,
    ThisYear,
    On(NaiveDate),
}

impl CreatedFilter {
    /// Cycles through the sidebar choices; a specific day falls back to any date.
    pub fn next(self) -> CreatedFilter {
        match self {
            CreatedFilter::AnyDate => CreatedFilter::Today,
            CreatedFilter::Today => CreatedFilter::PastSevenDays,
            CreatedFilter::PastSevenDays => CreatedFilter::ThisMonth,
            CreatedFilter::ThisMonth => CreatedFilter::ThisYear,
            CreatedFilter::ThisYear | CreatedFilter::On(_) => CreatedFilter::AnyDate,
        }
    }

    pub fn label(self) -> String {
        match self {
            CreatedFilter::AnyDate => "Any date".to_string(),
            CreatedFilter::Today => "Today".to_string(),
            CreatedFilter::PastSevenDays => "Past 7 days".to_string(),
            CreatedFilter::ThisMonth => "This month".to_string(),
            CreatedFilter::ThisYear => "This year".to_string(),
            CreatedFilter::On(day) => day.format("%Y-%m-%d").to_string(),
        }
    }

    /// Half-open day range `[start, end)` relative to `today`.
    pub fn days(self, today: NaiveDate) -> Result<Option<(NaiveDate, NaiveDate)>, AdminError> {
        let range = match self {
            CreatedFilter::AnyDate => return Ok(None),
            CreatedFilter::Today => (today, next_day(today)?),
            CreatedFilter::PastSevenDays => (
                today
                    .checked_sub_days(Days::new(7))
                    .ok_or(AdminError::DateOutOfRange)?,
                next_day(today)?,
            ),
            CreatedFilter::ThisMonth => {
                let start = today.with_day(1).ok_or(AdminError::DateOutOfRange)?;
                let end = start
                    .checked_add_months(Months::new(1))
                    .ok_or(AdminError::DateOutOfRange)?;
                (start, end)
            }
            CreatedFilter::ThisYear => {
                let start = today.with_ordinal(1).ok_or(AdminError::DateOutOfRange)?;
                let end = start
                    .checked_add_months(Months::new(12))
                    .ok_or(AdminError::DateOutOfRange)?;
                (start, end)
            }
            CreatedFilter::On(day) => (day, next_day(day)?),
        };
        Ok(Some(range))
    }
}

fn next_day(day: NaiveDate) -> Result<NaiveDate, AdminError> {
    day.succ_opt().ok_or(AdminError::DateOutOfRange)
}

impl FromStr for CreatedFilter {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" | "any-date" => Ok(CreatedFilter::AnyDate),
            "today" => Ok(CreatedFilter::Today),
            "past-7-days" | "week" => Ok(CreatedFilter::PastSevenDays),
            "this-month" | "month" => Ok(CreatedFilter::ThisMonth),
            "this-year" | "year" => Ok(CreatedFilter::ThisYear),
            other => NaiveDate::parse_from_str(other, "%Y-%m-%d")
                .map(CreatedFilter::On)
                .map_err(|_| AdminError::InvalidFilter {
                    filter: "created_at",
                    value: s.to_string(),
                }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ordering {
    pub field: TodoField,
    pub descending: bool,
}

impl Ordering {
    pub fn reversed(self) -> Ordering {
        Ordering {
            descending: !self.descending,
            ..self
        }
    }
}

impl fmt::Display for Ordering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descending {
            f.write_str("-")?;
        }
        f.write_str(self.field.name())
    }
}

impl FromStr for Ordering {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (descending, name) = match s.strip_prefix('-') {
            Some(name) => (true, name),
            None => (false, s),
        };
        let field =
            TodoField::from_name(name).ok_or_else(|| AdminError::InvalidOrdering(s.to_string()))?;
        Ok(Ordering { field, descending })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeListQuery {
    pub search: String,
    pub completed: CompletedFilter,
    pub created: CreatedFilter,
    /// `None` uses the model admin's default ordering.
    pub ordering: Option<Ordering>,
    /// 1-based.
    pub page: usize,
}

impl Default for ChangeListQuery {
    fn default() -> Self {
        ChangeListQuery {
            search: String::new(),
            completed: CompletedFilter::All,
            created: CreatedFilter::AnyDate,
            ordering: None,
            page: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeList {
    pub columns: Vec<TodoField>,
    pub rows: Vec<Todo>,
    pub result_count: usize,
    pub full_count: usize,
    pub page: usize,
    pub num_pages: usize,
    pub ordering: Ordering,
}

/// Splits search text into terms. Whitespace separates terms unless it is
/// inside double quotes.
pub fn search_terms(search: &str) -> Vec<String> {
    let mut terms = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in search.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    terms.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        terms.push(current);
    }
    terms
}

fn resolve_fields(names: Vec<&str>) -> Vec<TodoField> {
    names.into_iter().filter_map(TodoField::from_name).collect()
}

fn ensure_filter(admin: &dyn ModelAdmin, field: TodoField) -> Result<(), AdminError> {
    if admin.list_filter().contains(&field.name()) {
        Ok(())
    } else {
        Err(AdminError::FilterNotAllowed(field.name()))
    }
}

pub fn change_list(
    db: &Database,
    admin: &dyn ModelAdmin,
    query: &ChangeListQuery,
    today: NaiveDate,
) -> Result<ChangeList, AdminError> {
    let columns = resolve_fields(admin.list_display());

    let mut filter = TodoFilter {
        search_terms: search_terms(&query.search),
        search_fields: resolve_fields(admin.search_fields()),
        ..TodoFilter::default()
    };
    if let Some(completed) = query.completed.value() {
        ensure_filter(admin, TodoField::Completed)?;
        filter.completed = Some(completed);
    }
    if let Some((start, end)) = query.created.days(today)? {
        ensure_filter(admin, TodoField::CreatedAt)?;
        filter.created_between = Some((
            start.and_time(NaiveTime::MIN).and_utc(),
            end.and_time(NaiveTime::MIN).and_utc(),
        ));
    }

    let ordering = match query.ordering {
        Some(ordering) => {
            if !columns.contains(&ordering.field) {
                return Err(AdminError::InvalidOrdering(ordering.to_string()));
            }
            ordering
        }
        None => admin
            .ordering()
            .first()
            .map(|name| name.parse())
            .transpose()?
            .unwrap_or(Ordering {
                field: TodoField::Id,
                descending: true,
            }),
    };

    let per_page = admin.list_per_page().max(1);
    let full_count = db.count_todos(&TodoFilter::default())?;
    let result_count = db.count_todos(&filter)?;
    let num_pages = result_count.div_ceil(per_page).max(1);
    if query.page == 0 || query.page > num_pages {
        return Err(AdminError::InvalidPage {
            page: query.page,
            num_pages,
        });
    }

    let rows = db.query_todos(
        &filter,
        OrderBy {
            field: ordering.field,
            descending: ordering.descending,
        },
        per_page,
        (query.page - 1) * per_page,
    )?;
    debug!(result_count, full_count, page = query.page, "built change list");

    Ok(ChangeList {
        columns,
        rows,
        result_count,
        full_count,
        page: query.page,
        num_pages,
        ordering,
    })
}

/// A cell of the change list as the admin shows it.
pub fn display_value(todo: &Todo, field: TodoField) -> String {
    match field {
        TodoField::Id => todo.id.to_string(),
        TodoField::Title => todo.title.clone(),
        TodoField::Description => todo.description.clone(),
        TodoField::Completed => String::from(if todo.completed { "yes" } else { "no" }),
        TodoField::CreatedAt => todo.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        TodoField::UpdatedAt => todo.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

impl ChangeList {
    pub fn summary(&self) -> String {
        let noun = if self.result_count == 1 { "result" } else { "results" };
        format!("{} {noun} ({} total)", self.result_count, self.full_count)
    }

    /// Plain-text rendering for the `list` command.
    pub fn render_table(&self) -> String {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|todo| {
                self.columns
                    .iter()
                    .map(|field| display_value(todo, *field))
                    .collect()
            })
            .collect();

        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, field)| {
                cells
                    .iter()
                    .map(|row| row[i].chars().count())
                    .chain(std::iter::once(field.name().len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = String::new();
        let header: Vec<&str> = self.columns.iter().map(|field| field.name()).collect();
        push_line(&mut out, header.iter().copied(), &widths);
        let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
        push_line(&mut out, rule.iter().map(String::as_str), &widths);
        for row in &cells {
            push_line(&mut out, row.iter().map(String::as_str), &widths);
        }
        out.push_str(&self.summary());
        if self.num_pages > 1 {
            out.push_str(&format!(", page {} of {}", self.page, self.num_pages));
        }
        out.push('\n');
        out
    }
}

fn push_line<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let line: Vec<String> = cells
        .zip(widths.iter().copied())
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect();
    out.push_str(line.join("  ").trim_end());
    out.push('\n');
}
