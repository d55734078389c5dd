use std::error::Error;

use chrono::Utc;
use clap::Parser;
use todoinfo::{
    admin::{self, console, AdminSite, TODO_MODEL},
    api,
    config::{Cli, Command},
    database::Database,
    telemetry::{self, LogTarget},
};

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let log_target = match (&cli.log_file, &cli.command) {
        (Some(path), _) => LogTarget::File(path.clone()),
        (None, Command::Admin) => LogTarget::Off,
        (None, _) => LogTarget::Stderr,
    };
    telemetry::init(log_target)?;

    let site = AdminSite::todo_site()?;
    let db = Database::open(&cli.database_path()?)?;

    match cli.command {
        Command::Serve(args) => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(api::serve(db, args.bind))
        }
        Command::Admin => console::run(db, site),
        Command::List(args) => {
            let model_admin = site.model_admin(TODO_MODEL)?;
            let list = admin::change_list(&db, model_admin, &args.query(), Utc::now().date_naive())?;
            print!("{}", list.render_table());
            Ok(())
        }
    }
}
