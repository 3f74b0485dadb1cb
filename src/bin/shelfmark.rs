use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use shelfmark::app::{App, ManualBook};
use shelfmark::catalog::SqliteCatalog;
use shelfmark::config::{ConfigLoader, ResolvedConfig};
use shelfmark::context::{Deadline, RequestContext};
use shelfmark::db::Database;
use shelfmark::domain::UserId;
use shelfmark::error::ShelfError;
use shelfmark::isbndb::IsbndbHttpClient;
use shelfmark::output::JsonOutput;
use shelfmark::shelves::SqliteShelves;
use shelfmark::users::{SqliteUsers, UserStore};

#[derive(Parser)]
#[command(name = "shelfmark")]
#[command(about = "Catalog books by ISBN onto personal shelves and track reading progress")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(subcommand, about = "Manage accounts")]
    User(UserCommand),
    #[command(subcommand, about = "Add books to shelves")]
    Book(BookCommand),
    #[command(subcommand, about = "Inspect shelves and record progress")]
    Shelf(ShelfCommand),
}

#[derive(Subcommand)]
enum UserCommand {
    #[command(about = "Create a user with the default shelves")]
    Add { name: String },
}

#[derive(Subcommand)]
enum BookCommand {
    #[command(about = "Resolve an ISBN and place the book on a shelf")]
    Add {
        isbn: String,
        #[command(flatten)]
        target: TargetArgs,
    },
    #[command(about = "Catalog a book from typed details and place it on a shelf")]
    AddManual(ManualArgs),
}

#[derive(Subcommand)]
enum ShelfCommand {
    #[command(about = "List every shelved book for a user")]
    List {
        #[arg(long)]
        user: String,
    },
    #[command(about = "List a user's shelf names")]
    Names {
        #[arg(long)]
        user: String,
    },
    #[command(about = "Record pages read")]
    Progress {
        isbn: String,
        #[command(flatten)]
        target: TargetArgs,
        #[arg(long)]
        pages: u32,
    },
}

#[derive(Args, Clone)]
struct TargetArgs {
    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    shelf: Option<String>,
}

#[derive(Args, Clone)]
struct ManualArgs {
    #[arg(long)]
    isbn: String,

    #[arg(long)]
    title: String,

    #[arg(long)]
    author: String,

    #[arg(long = "genre")]
    genres: Vec<String>,

    #[arg(long)]
    pages: Option<u32>,

    #[command(flatten)]
    target: TargetArgs,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<ShelfError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &ShelfError) -> u8 {
    match error {
        ShelfError::InvalidIsbn(_)
        | ShelfError::InvalidShelfName(_)
        | ShelfError::InvalidUserId(_)
        | ShelfError::MissingContext(_)
        | ShelfError::InvalidBook(_)
        | ShelfError::UnknownShelf { .. }
        | ShelfError::BookNotFound { .. }
        | ShelfError::EntryNotFound { .. } => 2,
        ShelfError::UpstreamUnavailable { .. }
        | ShelfError::UpstreamRejected { .. }
        | ShelfError::DeadlineExceeded { .. } => 3,
        ShelfError::StoreUnavailable { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(path) = cli.db {
        config.database_path = Utf8PathBuf::from(path);
    }

    let db = Database::open(&config.database_path)
        .map_err(|err| ShelfError::store(format!("opening {}", config.database_path), err))?;

    match cli.command {
        Commands::User(UserCommand::Add { name }) => {
            let users = SqliteUsers::new(db);
            let registered = users
                .register(&name, None)
                .map_err(|err| ShelfError::store(format!("registering {name}"), err))?;
            JsonOutput::print_user(&registered).into_diagnostic()
        }
        Commands::Book(BookCommand::Add { isbn, target }) => {
            let ctx = request_context(&target, &config)?;
            let app = build_app(db, &config)?;
            let result = app.add_book(&isbn, &ctx)?;
            JsonOutput::print_add(&result).into_diagnostic()
        }
        Commands::Book(BookCommand::AddManual(args)) => {
            let ctx = request_context(&args.target, &config)?;
            let app = offline_app(db, &config);
            let result = app.add_manual(
                ManualBook {
                    isbn: args.isbn,
                    title: args.title,
                    author: args.author,
                    genres: args.genres,
                    pages: args.pages,
                },
                &ctx,
            )?;
            JsonOutput::print_add(&result).into_diagnostic()
        }
        Commands::Shelf(ShelfCommand::List { user }) => {
            let user_id: UserId = user.parse()?;
            let app = offline_app(db, &config);
            JsonOutput::print_list(&app.list(user_id)?).into_diagnostic()
        }
        Commands::Shelf(ShelfCommand::Names { user }) => {
            let user_id: UserId = user.parse()?;
            let app = offline_app(db, &config);
            JsonOutput::print_shelf_names(&app.shelf_names(user_id)?).into_diagnostic()
        }
        Commands::Shelf(ShelfCommand::Progress {
            isbn,
            target,
            pages,
        }) => {
            let ctx = request_context(&target, &config)?;
            let app = offline_app(db, &config);
            let entry = app.update_progress(&isbn, &ctx, pages)?;
            JsonOutput::print_entry(&entry).into_diagnostic()
        }
    }
}

fn request_context(target: &TargetArgs, config: &ResolvedConfig) -> Result<RequestContext, ShelfError> {
    RequestContext::from_raw(
        target.user.as_deref(),
        target.shelf.as_deref(),
        Deadline::after(config.request_timeout),
    )
}

fn build_app(
    db: Database,
    config: &ResolvedConfig,
) -> Result<App<SqliteCatalog, SqliteShelves, IsbndbHttpClient>, ShelfError> {
    let client = IsbndbHttpClient::new(&config.isbndb)?;
    Ok(App::new(
        SqliteCatalog::new(db.clone()),
        SqliteShelves::new(db),
        client,
        config.retry,
    ))
}

fn offline_app(db: Database, config: &ResolvedConfig) -> App<SqliteCatalog, SqliteShelves, OfflineClient> {
    App::new(
        SqliteCatalog::new(db.clone()),
        SqliteShelves::new(db),
        OfflineClient,
        config.retry,
    )
}

/// Stand-in for commands that never reach the remote service, so they work
/// without an api key.
struct OfflineClient;

impl shelfmark::isbndb::BibliographicClient for OfflineClient {
    fn lookup_by_isbn(
        &self,
        _isbn: &shelfmark::domain::Isbn,
        _deadline: &Deadline,
    ) -> Result<shelfmark::isbndb::BookMetadata, shelfmark::error::LookupError> {
        Err(shelfmark::error::LookupError::Permanent {
            status: None,
            message: "remote lookups are disabled for this command".to_string(),
        })
    }
}
