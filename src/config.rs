use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

use crate::{
    admin::{ChangeListQuery, CompletedFilter, CreatedFilter, Ordering},
    database::{default_path, DatabaseError},
};

#[derive(Debug, Parser)]
#[command(name = "todoinfo", version, about = "Todo REST API with an admin console")]
pub struct Cli {
    /// SQLite database file [default: $HOME/.todoinfo/todos.sqlite]
    #[arg(long, env = "TODOINFO_DATABASE", global = true)]
    pub database: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, env = "TODOINFO_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the REST API under /api/todoinfo/
    Serve(ServeArgs),
    /// Open the interactive admin console
    Admin,
    /// Print the admin change list
    List(ListArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long, env = "TODOINFO_BIND", default_value = "127.0.0.1:8000")]
    pub bind: SocketAddr,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Text to look for in titles; quote phrases to keep them together
    #[arg(long, short, default_value = "")]
    pub search: String,

    /// all, yes or no
    #[arg(long, default_value = "all")]
    pub completed: CompletedFilter,

    /// any, today, past-7-days, this-month, this-year or a YYYY-MM-DD day
    #[arg(long, default_value = "any")]
    pub created: CreatedFilter,

    /// A displayed column, prefixed with `-` for descending
    #[arg(long, allow_hyphen_values = true)]
    pub ordering: Option<Ordering>,

    #[arg(long, default_value_t = 1)]
    pub page: usize,
}

impl Cli {
    pub fn database_path(&self) -> Result<PathBuf, DatabaseError> {
        match &self.database {
            Some(path) => Ok(path.clone()),
            None => default_path(),
        }
    }
}

impl ListArgs {
    pub fn query(&self) -> ChangeListQuery {
        ChangeListQuery {
            search: self.search.clone(),
            completed: self.completed,
            created: self.created,
            ordering: self.ordering,
            page: self.page,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TodoField;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_defaults_to_localhost() {
        let cli = Cli::try_parse_from(["todoinfo", "--database", "/tmp/t.sqlite", "serve"]).unwrap();
        assert_eq!(cli.database_path().unwrap(), PathBuf::from("/tmp/t.sqlite"));
        match cli.command {
            Command::Serve(args) => assert_eq!(args.bind.to_string(), "127.0.0.1:8000"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn list_arguments_build_a_query() {
        let cli = Cli::try_parse_from([
            "todoinfo",
            "list",
            "--search",
            "milk",
            "--completed",
            "no",
            "--created",
            "today",
            "--ordering",
            "-created_at",
            "--page",
            "2",
        ])
        .unwrap();
        let Command::List(args) = cli.command else {
            panic!("expected list");
        };
        assert_eq!(
            args.query(),
            ChangeListQuery {
                search: "milk".into(),
                completed: CompletedFilter::No,
                created: CreatedFilter::Today,
                ordering: Some(Ordering {
                    field: TodoField::CreatedAt,
                    descending: true,
                }),
                page: 2,
            }
        );
    }

    #[test]
    fn invalid_filters_are_rejected() {
        assert!(Cli::try_parse_from(["todoinfo", "list", "--completed", "maybe"]).is_err());
        assert!(Cli::try_parse_from(["todoinfo", "list", "--created", "soon"]).is_err());
    }
}
