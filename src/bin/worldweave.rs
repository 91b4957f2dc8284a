//! Worldweave CLI: manage worlds and their content from the shell.
//!
//! Usage:
//!   worldweave [--db path] [--config path] user create <name>
//!   worldweave --as <user> world create <title>
//!   worldweave --as <user> content create <world> page --title .. --body ..
//!   worldweave --as <user> --admin purge <world> <kind> <id> [--dry-run]
//!
//! `--admin` is trusted as given. The binary is local operator tooling; a
//! networked front end must derive the capability from its own auth.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use worldweave::api::{ErrorBody, LinkTarget, TimelineParams};
use worldweave::{
    Actor, ContentDraft, ContentKind, EngineConfig, LifecycleManager, OpenStore, SqliteStore, WeaveApi,
    WeaveEngine, WeaveError, WorldId,
};

#[derive(Parser)]
#[command(
    name = "worldweave",
    version,
    about = "Collaborative worldbuilding with immutable content"
)]
struct Cli {
    /// Path to SQLite database file
    #[arg(long, global = true, env = "WORLDWEAVE_DB")]
    db: Option<PathBuf>,

    /// Path to a YAML policy file
    #[arg(long, global = true, env = "WORLDWEAVE_CONFIG")]
    config: Option<PathBuf>,

    /// Username to act as
    #[arg(long = "as", global = true, env = "WORLDWEAVE_USER")]
    user: Option<String>,

    /// Act with administrative capability; unchecked, for trusted local use only
    ///
    /// The CLI takes this flag at face value. It is not an authorization
    /// check: anyone who can run the binary against a database may purge.
    #[arg(long, global = true)]
    admin: bool,

    /// Log filter (e.g. `info`, `worldweave=debug`); `RUST_LOG` takes precedence
    #[arg(long, global = true, env = "WORLDWEAVE_LOG", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage users
    User {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Manage worlds
    World {
        #[command(subcommand)]
        action: WorldAction,
    },
    /// Create and read content
    Content {
        #[command(subcommand)]
        action: ContentAction,
    },
    /// Attach tags to a content entity
    Tag {
        world: String,
        kind: String,
        id: String,
        /// Tag names (case-insensitive)
        #[arg(required = true)]
        names: Vec<String>,
    },
    /// Link a content entity to others in the same world
    Link {
        world: String,
        kind: String,
        id: String,
        /// Targets as `kind:id`
        #[arg(long = "to", required = true)]
        targets: Vec<String>,
    },
    /// Hide a content entity pending restore or purge
    SoftDelete { world: String, kind: String, id: String },
    /// Bring a soft-deleted entity back
    Restore { world: String, kind: String, id: String },
    /// Permanently remove a soft-deleted entity
    Purge {
        world: String,
        kind: String,
        id: String,
        /// Report what would be removed without removing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Purge every entity in a world whose retention window has elapsed
    PurgeExpired { world: String },
    /// List soft-deleted content in a world
    ListDeleted {
        world: String,
        #[arg(long)]
        kind: Option<String>,
    },
    /// Show a world's content, newest first
    Timeline {
        world: String,
        /// Comma-separated kinds
        #[arg(long)]
        kinds: Option<String>,
        /// Username or user id
        #[arg(long)]
        author: Option<String>,
        /// Comma-separated tag names
        #[arg(long)]
        tags: Option<String>,
        /// `any` or `all`
        #[arg(long = "match")]
        tag_match: Option<String>,
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        offset: Option<usize>,
        #[arg(long)]
        include_deleted: bool,
    },
    /// Attribution and collaboration report for a world
    Report { world: String },
    /// Summary statistics for a world
    Stats { world: String },
}

#[derive(Subcommand)]
enum UserAction {
    /// Register a user
    Create { username: String },
}

#[derive(Subcommand)]
enum WorldAction {
    /// Create a world owned by the acting user
    Create {
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Hide the world from other users
        #[arg(long)]
        private: bool,
    },
    /// List worlds visible to the acting user
    List,
}

#[derive(Subcommand)]
enum ContentAction {
    /// Create a content entity
    Create {
        world: String,
        /// page, essay, character, story or image
        kind: String,
        #[arg(long, required_unless_present = "from")]
        title: Option<String>,
        #[arg(long, required_unless_present = "from")]
        body: Option<String>,
        /// Character full name
        #[arg(long)]
        full_name: Option<String>,
        /// Image file reference
        #[arg(long)]
        file_ref: Option<String>,
        /// Image alt text
        #[arg(long)]
        alt_text: Option<String>,
        /// Read the whole draft as JSON from a file (`-` for stdin)
        #[arg(long, conflicts_with_all = ["title", "body"])]
        from: Option<PathBuf>,
    },
    /// Show one content entity with its links
    Show { world: String, kind: String, id: String },
}

/// Get the default database path (~/.local/share/worldweave/worldweave.db)
fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    let dir = data_dir.join("worldweave");
    std::fs::create_dir_all(&dir).ok();
    dir.join("worldweave.db")
}

fn init_logging(filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_engine(db: Option<PathBuf>, config: Option<&Path>) -> Result<WeaveEngine, String> {
    let db_path = db.unwrap_or_else(default_db_path);
    let store = SqliteStore::open(&db_path).map_err(|e| format!("Failed to open database: {}", e))?;
    let config = match config {
        Some(path) => EngineConfig::from_yaml_file(path).map_err(|e| format!("Failed to load config: {}", e))?,
        None => EngineConfig::default(),
    };
    Ok(WeaveEngine::with_config(Arc::new(store), config))
}

fn report_error(err: &WeaveError) -> i32 {
    let body = ErrorBody::from(err);
    eprintln!("Error ({}): {}", body.error, err);
    1
}

fn print_json<T: Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

/// The acting user named by `--as`
fn actor(engine: &WeaveEngine, username: Option<&str>, admin: bool) -> Result<Actor, String> {
    let username = username.ok_or("this command needs --as <username> (or WORLDWEAVE_USER)")?;
    let user = engine.user_by_name(username).map_err(|e| e.to_string())?;
    Ok(if admin { Actor::admin(user.id) } else { Actor::user(user.id) })
}

/// Accept a world id, or the title of a world the viewer can see
fn find_world(engine: &WeaveEngine, viewer: Option<&Actor>, world: &str) -> Result<String, String> {
    if world.parse::<WorldId>().is_ok() {
        return Ok(world.to_string());
    }
    let worlds = engine.list_worlds(viewer).map_err(|e| e.to_string())?;
    let mut matches = worlds.iter().filter(|w| w.title.eq_ignore_ascii_case(world.trim()));
    match (matches.next(), matches.next()) {
        (Some(w), None) => Ok(w.id.to_string()),
        (Some(_), Some(_)) => Err(format!("several worlds are titled '{}'; use the id", world)),
        (None, _) => Err(format!("world '{}' not found", world)),
    }
}

fn cmd_user_create(engine: &WeaveEngine, username: &str) -> i32 {
    match engine.create_user(username) {
        Ok(user) => {
            println!("Created user '{}' ({})", user.username, user.id);
            0
        }
        Err(e) => report_error(&e),
    }
}

fn cmd_world_create(engine: &WeaveEngine, actor: &Actor, title: &str, description: &str, private: bool) -> i32 {
    match engine.create_world(actor, title, description, !private) {
        Ok(world) => {
            println!("Created world '{}' ({})", world.title, world.id);
            0
        }
        Err(e) => report_error(&e),
    }
}

fn cmd_world_list(engine: &WeaveEngine, viewer: Option<&Actor>) -> i32 {
    match engine.list_worlds(viewer) {
        Ok(worlds) if worlds.is_empty() => {
            println!("No worlds.");
            0
        }
        Ok(worlds) => {
            for world in worlds {
                let visibility = if world.is_public { "public" } else { "private" };
                println!("  {} ({}, {})", world.title, world.id, visibility);
            }
            0
        }
        Err(e) => report_error(&e),
    }
}

struct DraftArgs {
    title: Option<String>,
    body: Option<String>,
    full_name: Option<String>,
    file_ref: Option<String>,
    alt_text: Option<String>,
    from: Option<PathBuf>,
}

fn build_draft(kind: &str, args: DraftArgs) -> Result<ContentDraft, String> {
    if let Some(path) = args.from {
        let mut raw = String::new();
        if path.as_os_str() == "-" {
            std::io::stdin().read_to_string(&mut raw).map_err(|e| e.to_string())?;
        } else {
            raw = std::fs::read_to_string(&path).map_err(|e| format!("{}: {}", path.display(), e))?;
        }
        return serde_json::from_str(&raw).map_err(|e| format!("invalid draft: {}", e));
    }

    let kind: ContentKind = kind.parse()?;
    let title = args.title.unwrap_or_default();
    let body = args.body.unwrap_or_default();
    Ok(match kind {
        ContentKind::Page => ContentDraft::page(title, body),
        ContentKind::Essay => ContentDraft::essay(title, body),
        ContentKind::Story => ContentDraft::story(title, body),
        ContentKind::Character => ContentDraft::character(title, body, args.full_name.unwrap_or_default()),
        ContentKind::Image => ContentDraft::image(
            title,
            body,
            args.file_ref.unwrap_or_default(),
            args.alt_text.unwrap_or_default(),
        ),
    })
}

fn cmd_content_create(api: &WeaveApi, actor: &Actor, world: &str, kind: &str, args: DraftArgs) -> i32 {
    let draft = match build_draft(kind, args) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match api.create_content(actor, world, kind, draft) {
        Ok(entity) => {
            println!("Created {} '{}' ({})", entity.kind(), entity.title(), entity.id());
            0
        }
        Err(e) => report_error(&e),
    }
}

fn cmd_content_show(api: &WeaveApi, world: &str, kind: &str, id: &str) -> i32 {
    let entity = match api.get_content(world, kind, id) {
        Ok(e) => e,
        Err(e) => return report_error(&e),
    };
    match api.related(world, kind, id) {
        Ok(related) => print_json(&serde_json::json!({ "entity": entity, "related": related })),
        Err(e) => report_error(&e),
    }
}

fn cmd_tag(api: &WeaveApi, world: &str, kind: &str, id: &str, names: &[String]) -> i32 {
    match api.add_tags(world, kind, id, names) {
        Ok(outcome) => {
            for tag in &outcome.added {
                println!("  + {}", tag.display_name);
            }
            for tag in &outcome.already_present {
                println!("  = {} (already tagged)", tag.display_name);
            }
            0
        }
        Err(e) => report_error(&e),
    }
}

fn cmd_link(api: &WeaveApi, world: &str, kind: &str, id: &str, targets: &[String]) -> i32 {
    let mut parsed = Vec::with_capacity(targets.len());
    for raw in targets {
        let Some((kind, id)) = raw.split_once(':') else {
            eprintln!("Error: link target '{}' is not in kind:id form", raw);
            return 1;
        };
        parsed.push(LinkTarget {
            kind: kind.to_string(),
            id: id.to_string(),
        });
    }
    match api.add_links(world, kind, id, &parsed) {
        Ok(batch) => {
            for link in &batch.added {
                let marker = if link.cross_author { " (cross-author)" } else { "" };
                println!("  + {} -> {}{}", link.source, link.target, marker);
            }
            for target in &batch.already_linked {
                println!("  = {} (already linked)", target);
            }
            0
        }
        Err(e) => report_error(&e),
    }
}

fn cmd_soft_delete(api: &WeaveApi, actor: &Actor, world: &str, kind: &str, id: &str) -> i32 {
    match api.soft_delete(actor, world, kind, id) {
        Ok(entity) => {
            println!("Soft-deleted {} '{}'", entity.content_ref(), entity.title());
            0
        }
        Err(e) => report_error(&e),
    }
}

fn cmd_restore(api: &WeaveApi, actor: &Actor, world: &str, kind: &str, id: &str) -> i32 {
    match api.restore(actor, world, kind, id) {
        Ok(entity) => {
            println!("Restored {} '{}'", entity.content_ref(), entity.title());
            0
        }
        Err(e) => report_error(&e),
    }
}

/// Dry run: what a purge would do right now
fn cmd_purge_plan(api: &WeaveApi, world: &str, kind: &str, id: &str) -> i32 {
    match api.purge_plan(world, kind, id) {
        Ok(plan) => print_json(&plan),
        Err(e) => report_error(&e),
    }
}

fn cmd_purge(api: &WeaveApi, actor: &Actor, world: &str, kind: &str, id: &str) -> i32 {
    match api.purge(actor, world, kind, id) {
        Ok(report) => {
            let removed = report.removed;
            println!(
                "Purged {} '{}': {} tag associations, {} outbound links, {} inbound links removed",
                report.target, report.title, removed.tag_associations, removed.outbound_links, removed.inbound_links
            );
            0
        }
        Err(e) => report_error(&e),
    }
}

fn cmd_purge_expired(engine: &WeaveEngine, actor: &Actor, world: &str) -> i32 {
    let world = match world.parse::<WorldId>() {
        Ok(w) => w,
        Err(_) => return report_error(&WeaveError::NotFound(format!("world {}", world))),
    };
    match LifecycleManager::new(engine, world).purge_expired(actor) {
        Ok(report) => print_json(&report),
        Err(e) => report_error(&e),
    }
}

fn cmd_list_deleted(engine: &WeaveEngine, world: &str, kind: Option<&str>) -> i32 {
    let world = match world.parse::<WorldId>() {
        Ok(w) => w,
        Err(_) => return report_error(&WeaveError::NotFound(format!("world {}", world))),
    };
    let kind = match kind.map(str::parse::<ContentKind>).transpose() {
        Ok(k) => k,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match LifecycleManager::new(engine, world).list_deleted(kind) {
        Ok(deleted) if deleted.is_empty() => {
            println!("No soft-deleted content.");
            0
        }
        Ok(deleted) => {
            for item in deleted {
                println!(
                    "  {} '{}' (purge eligible {})",
                    item.entity.content_ref(),
                    item.entity.title(),
                    item.purge_eligible_at.to_rfc3339()
                );
            }
            0
        }
        Err(e) => report_error(&e),
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let engine = match open_engine(cli.db, cli.config.as_deref()) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let api = WeaveApi::new(Arc::clone(&engine));

    // Commands that need no acting user
    if let Commands::User {
        action: UserAction::Create { username },
    } = &cli.command
    {
        std::process::exit(cmd_user_create(&engine, username));
    }

    let actor = actor(&engine, cli.user.as_deref(), cli.admin);
    let viewer = actor.as_ref().ok();
    let acting = || match &actor {
        Ok(a) => Some(a),
        Err(e) => {
            eprintln!("Error: {}", e);
            None
        }
    };
    let resolve_world = |world: &str| match find_world(&engine, viewer, world) {
        Ok(id) => Some(id),
        Err(e) => {
            eprintln!("Error: {}", e);
            None
        }
    };

    let code = match cli.command {
        Commands::User { .. } => 0,
        Commands::World { action } => match action {
            WorldAction::Create {
                title,
                description,
                private,
            } => match acting() {
                Some(a) => cmd_world_create(&engine, a, &title, &description, private),
                None => 1,
            },
            WorldAction::List => cmd_world_list(&engine, viewer),
        },
        Commands::Content { action } => match action {
            ContentAction::Create {
                world,
                kind,
                title,
                body,
                full_name,
                file_ref,
                alt_text,
                from,
            } => match (acting(), resolve_world(&world)) {
                (Some(a), Some(world)) => {
                    let args = DraftArgs {
                        title,
                        body,
                        full_name,
                        file_ref,
                        alt_text,
                        from,
                    };
                    cmd_content_create(&api, a, &world, &kind, args)
                }
                _ => 1,
            },
            ContentAction::Show { world, kind, id } => match resolve_world(&world) {
                Some(world) => cmd_content_show(&api, &world, &kind, &id),
                None => 1,
            },
        },
        Commands::Tag { world, kind, id, names } => match resolve_world(&world) {
            Some(world) => cmd_tag(&api, &world, &kind, &id, &names),
            None => 1,
        },
        Commands::Link {
            world,
            kind,
            id,
            targets,
        } => match resolve_world(&world) {
            Some(world) => cmd_link(&api, &world, &kind, &id, &targets),
            None => 1,
        },
        Commands::SoftDelete { world, kind, id } => match (acting(), resolve_world(&world)) {
            (Some(a), Some(world)) => cmd_soft_delete(&api, a, &world, &kind, &id),
            _ => 1,
        },
        Commands::Restore { world, kind, id } => match (acting(), resolve_world(&world)) {
            (Some(a), Some(world)) => cmd_restore(&api, a, &world, &kind, &id),
            _ => 1,
        },
        Commands::Purge {
            world,
            kind,
            id,
            dry_run,
        } if dry_run => match resolve_world(&world) {
            Some(world) => cmd_purge_plan(&api, &world, &kind, &id),
            None => 1,
        },
        Commands::Purge { world, kind, id, .. } => match (acting(), resolve_world(&world)) {
            (Some(a), Some(world)) => cmd_purge(&api, a, &world, &kind, &id),
            _ => 1,
        },
        Commands::PurgeExpired { world } => match (acting(), resolve_world(&world)) {
            (Some(a), Some(world)) => cmd_purge_expired(&engine, a, &world),
            _ => 1,
        },
        Commands::ListDeleted { world, kind } => match resolve_world(&world) {
            Some(world) => cmd_list_deleted(&engine, &world, kind.as_deref()),
            None => 1,
        },
        Commands::Timeline {
            world,
            kinds,
            author,
            tags,
            tag_match,
            since,
            until,
            search,
            limit,
            offset,
            include_deleted,
        } => match resolve_world(&world) {
            Some(world) => {
                let params = TimelineParams {
                    content_types: kinds,
                    author,
                    tags,
                    tag_match,
                    start_date: since,
                    end_date: until,
                    search,
                    limit,
                    offset,
                    include_deleted,
                };
                match api.timeline(&world, &params) {
                    Ok(page) => print_json(&page),
                    Err(e) => report_error(&e),
                }
            }
            None => 1,
        },
        Commands::Report { world } => match resolve_world(&world) {
            Some(world) => match api.attribution(&world) {
                Ok(report) => print_json(&report),
                Err(e) => report_error(&e),
            },
            None => 1,
        },
        Commands::Stats { world } => match resolve_world(&world) {
            Some(world) => match api.statistics(&world) {
                Ok(stats) => print_json(&stats),
                Err(e) => report_error(&e),
            },
            None => 1,
        },
    };
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_admin_flag_documents_trust() {
        let command = Cli::command();
        let admin = command
            .get_arguments()
            .find(|arg| arg.get_id() == "admin")
            .unwrap();
        let short = admin.get_help().unwrap().to_string();
        assert!(short.contains("unchecked"));
        let long = admin.get_long_help().unwrap().to_string();
        assert!(long.contains("not an authorization"));
    }

    #[test]
    fn test_admin_flag_parses_globally() {
        let cli = Cli::try_parse_from(["worldweave", "--as", "root", "purge", "eldoria", "page", "x", "--admin"]);
        assert!(cli.is_ok_and(|cli| cli.admin));
    }
}
