//! SQLite storage backend

use super::traits::{
    ContentStore, ContentWrite, EntityFilter, LinkWrite, OpenStore, PurgeCounts, PurgeWrite, PurgedRecord,
    StorageError, StorageResult, TagWrite,
};
use crate::graph::{
    ContentDetails, ContentEntity, ContentKind, ContentRef, EntityId, Lifecycle, LinkAssociation,
    PurgeBlockReason, Tag, TagId, TagName, User, UserId, Visibility, World, WorldId,
};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

const ENTITY_COLUMNS: &str =
    "c.id, c.kind, c.world_id, c.author_id, c.title, c.body, c.details_json, c.created_at, c.deleted_at, c.deleted_by";

/// Raw columns of one `content` row, in `ENTITY_COLUMNS` order
type EntityRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
);

/// Raw columns of one `content_links` row
type LinkRow = (String, String, String, String, String, bool, String);

/// SQLite-backed content store
///
/// Uses a single SQLite database file. Thread-safe via an internal mutex on
/// the connection; check-then-write operations additionally run inside
/// `IMMEDIATE` transactions so that several processes sharing one database
/// file are serialized by SQLite's write lock.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- WAL keeps readers unblocked while a purge or tag batch writes
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE COLLATE NOCASE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS worlds (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                creator_id TEXT NOT NULL REFERENCES users(id),
                is_public INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            -- One table for every content kind; `kind` is the type tag of
            -- the polymorphic (kind, id) reference
            CREATE TABLE IF NOT EXISTS content (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                world_id TEXT NOT NULL REFERENCES worlds(id) ON DELETE CASCADE,
                author_id TEXT NOT NULL REFERENCES users(id),
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                details_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                deleted_at TEXT,
                deleted_by TEXT,
                UNIQUE (kind, id)
            );

            CREATE INDEX IF NOT EXISTS idx_content_world_created
                ON content(world_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_content_world_author
                ON content(world_id, author_id);
            CREATE INDEX IF NOT EXISTS idx_content_world_kind
                ON content(world_id, kind);

            -- Active titles are unique per world and kind; soft-deleted rows
            -- keep theirs without blocking reuse
            CREATE UNIQUE INDEX IF NOT EXISTS idx_content_active_title
                ON content(world_id, kind, lower(title)) WHERE deleted_at IS NULL;

            -- Author, world, kind and creation time never change, even on
            -- the administrative force-update path
            CREATE TRIGGER IF NOT EXISTS content_identity_immutable
            BEFORE UPDATE ON content
            WHEN NEW.id IS NOT OLD.id
              OR NEW.kind IS NOT OLD.kind
              OR NEW.world_id IS NOT OLD.world_id
              OR NEW.author_id IS NOT OLD.author_id
              OR NEW.created_at IS NOT OLD.created_at
            BEGIN
                SELECT RAISE(ABORT, 'content identity is immutable');
            END;

            CREATE TABLE IF NOT EXISTS tags (
                id TEXT PRIMARY KEY,
                world_id TEXT NOT NULL REFERENCES worlds(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                display_name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (world_id, name)
            );

            -- Primary key serves tag -> entities, the index entity -> tags
            CREATE TABLE IF NOT EXISTS content_tags (
                tag_id TEXT NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                target_kind TEXT NOT NULL,
                target_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (tag_id, target_kind, target_id)
            );

            CREATE INDEX IF NOT EXISTS idx_content_tags_target
                ON content_tags(target_kind, target_id);

            -- Primary key serves outbound traversal, the index inbound
            CREATE TABLE IF NOT EXISTS content_links (
                world_id TEXT NOT NULL REFERENCES worlds(id) ON DELETE CASCADE,
                source_kind TEXT NOT NULL,
                source_id TEXT NOT NULL,
                target_kind TEXT NOT NULL,
                target_id TEXT NOT NULL,
                cross_author INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (source_kind, source_id, target_kind, target_id),
                CHECK (source_id <> target_id)
            );

            CREATE INDEX IF NOT EXISTS idx_content_links_target
                ON content_links(target_kind, target_id);
            CREATE INDEX IF NOT EXISTS idx_content_links_world
                ON content_links(world_id);

            CREATE TABLE IF NOT EXISTS purged_content (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                world_id TEXT NOT NULL,
                author_id TEXT NOT NULL,
                title TEXT NOT NULL,
                purged_at TEXT NOT NULL,
                purged_by TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_purged_world
                ON purged_content(world_id);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Deserialize an entity from database columns
    fn row_to_entity(row: EntityRow) -> StorageResult<ContentEntity> {
        let (id, kind, world_id, author_id, title, body, details_json, created_at, deleted_at, deleted_by) =
            row;
        let kind = parse_kind(&kind)?;
        let details: ContentDetails = serde_json::from_str(&details_json)?;
        if details.kind() != kind {
            return Err(StorageError::Corrupt(format!(
                "content {} is stored as {} but carries {} details",
                id,
                kind,
                details.kind()
            )));
        }
        let lifecycle = match deleted_at {
            Some(at) => Lifecycle::SoftDeleted {
                at: parse_time(&at)?,
                by: deleted_by.as_deref().map(parse_id).transpose()?,
            },
            None => Lifecycle::Active,
        };
        Ok(ContentEntity::from_parts(
            parse_id(&id)?,
            parse_id(&world_id)?,
            parse_id(&author_id)?,
            title,
            body,
            parse_time(&created_at)?,
            details,
            lifecycle,
        ))
    }

    fn map_entity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
            row.get(9)?,
        ))
    }

    fn row_to_link(row: LinkRow) -> StorageResult<LinkAssociation> {
        let (world_id, source_kind, source_id, target_kind, target_id, cross_author, created_at) = row;
        Ok(LinkAssociation {
            world_id: parse_id(&world_id)?,
            source: ContentRef::new(parse_kind(&source_kind)?, parse_id(&source_id)?),
            target: ContentRef::new(parse_kind(&target_kind)?, parse_id(&target_id)?),
            cross_author,
            created_at: parse_time(&created_at)?,
        })
    }

    fn map_link_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LinkRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
        ))
    }

    fn query_links<P: rusqlite::Params>(&self, sql: &str, args: P) -> StorageResult<Vec<LinkAssociation>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(args, Self::map_link_row)?;
        let mut links = Vec::new();
        for row in rows {
            links.push(Self::row_to_link(row?)?);
        }
        Ok(links)
    }

    fn row_to_tag(row: (String, String, String, String, String)) -> StorageResult<Tag> {
        let (id, world_id, name, display_name, created_at) = row;
        Ok(Tag {
            id: parse_id(&id)?,
            world_id: parse_id(&world_id)?,
            name,
            display_name,
            created_at: parse_time(&created_at)?,
        })
    }

    fn map_tag_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, String, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    }

    /// Get-or-create inside an existing connection or transaction
    ///
    /// The `(world_id, name)` uniqueness constraint resolves concurrent
    /// creators: the losing insert is ignored and both read the same row.
    fn ensure_tag_on(conn: &Connection, world: &WorldId, name: &TagName) -> StorageResult<Tag> {
        let candidate = Tag::new(*world, name);
        conn.execute(
            r#"
            INSERT INTO tags (id, world_id, name, display_name, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(world_id, name) DO NOTHING
            "#,
            params![
                candidate.id.to_string(),
                world.to_string(),
                candidate.name,
                candidate.display_name,
                format_time(&candidate.created_at),
            ],
        )?;
        Self::find_tag_on(conn, world, &name.key)?
            .ok_or_else(|| StorageError::Corrupt(format!("tag {} vanished after insert", name.key)))
    }

    fn find_tag_on(conn: &Connection, world: &WorldId, key: &str) -> StorageResult<Option<Tag>> {
        let row = conn
            .query_row(
                "SELECT id, world_id, name, display_name, created_at FROM tags WHERE world_id = ?1 AND name = ?2",
                params![world.to_string(), key],
                Self::map_tag_row,
            )
            .optional()?;
        row.map(Self::row_to_tag).transpose()
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }
}

impl ContentStore for SqliteStore {
    // === Users ===

    fn insert_user(&self, user: &User) -> StorageResult<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(username) DO NOTHING",
            params![user.id.to_string(), user.username, format_time(&user.created_at)],
        )?;
        Ok(rows > 0)
    }

    fn load_user(&self, id: &UserId) -> StorageResult<Option<User>> {
        let conn = self.lock()?;
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT id, username, created_at FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        row.map(row_to_user).transpose()
    }

    fn find_user_by_name(&self, username: &str) -> StorageResult<Option<User>> {
        let conn = self.lock()?;
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT id, username, created_at FROM users WHERE username = ?1",
                params![username],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        row.map(row_to_user).transpose()
    }

    // === Worlds ===

    fn save_world(&self, world: &World) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO worlds (id, title, description, creator_id, is_public, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                is_public = excluded.is_public,
                updated_at = excluded.updated_at
            "#,
            params![
                world.id.to_string(),
                world.title,
                world.description,
                world.creator.to_string(),
                world.is_public,
                format_time(&world.created_at),
                format_time(&world.updated_at),
            ],
        )?;
        Ok(())
    }

    fn load_world(&self, id: &WorldId) -> StorageResult<Option<World>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, title, description, creator_id, is_public, created_at, updated_at
                 FROM worlds WHERE id = ?1",
                params![id.to_string()],
                map_world_row,
            )
            .optional()?;
        row.map(row_to_world).transpose()
    }

    fn list_worlds(&self) -> StorageResult<Vec<World>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, description, creator_id, is_public, created_at, updated_at
             FROM worlds ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], map_world_row)?;
        let mut worlds = Vec::new();
        for row in rows {
            worlds.push(row_to_world(row?)?);
        }
        Ok(worlds)
    }

    // === Content ===

    fn insert_entity(&self, entity: &ContentEntity) -> StorageResult<ContentWrite> {
        let conn = self.lock()?;
        let (deleted_at, deleted_by) = lifecycle_columns(&entity.lifecycle());
        let written = conn.execute(
            r#"
            INSERT INTO content (id, kind, world_id, author_id, title, body, details_json,
                                 created_at, deleted_at, deleted_by)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO NOTHING
            "#,
            params![
                entity.id().to_string(),
                entity.kind().as_str(),
                entity.world_id().to_string(),
                entity.author().to_string(),
                entity.title(),
                entity.body(),
                serde_json::to_string(entity.details())?,
                format_time(&entity.created_at()),
                deleted_at,
                deleted_by,
            ],
        );
        content_write(written)
    }

    fn load_entity(&self, target: &ContentRef) -> StorageResult<Option<ContentEntity>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {ENTITY_COLUMNS} FROM content c WHERE c.id = ?1 AND c.kind = ?2"),
                params![target.id.to_string(), target.kind.as_str()],
                Self::map_entity_row,
            )
            .optional()?;
        row.map(Self::row_to_entity).transpose()
    }

    fn find_entities(&self, world: &WorldId, filter: &EntityFilter) -> StorageResult<Vec<ContentEntity>> {
        let conn = self.lock()?;

        let mut sql = format!("SELECT {ENTITY_COLUMNS} FROM content c WHERE c.world_id = ?");
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(world.to_string())];

        if !filter.kinds.is_empty() {
            let placeholders = vec!["?"; filter.kinds.len()].join(", ");
            sql.push_str(&format!(" AND c.kind IN ({placeholders})"));
            for kind in &filter.kinds {
                params_vec.push(Box::new(kind.as_str()));
            }
        }

        if let Some(author) = &filter.author {
            sql.push_str(" AND c.author_id = ?");
            params_vec.push(Box::new(author.to_string()));
        }

        if filter.visibility == Visibility::Active {
            sql.push_str(" AND c.deleted_at IS NULL");
        }

        if let Some(since) = &filter.since {
            sql.push_str(" AND c.created_at >= ?");
            params_vec.push(Box::new(format_time(since)));
        }

        if let Some(until) = &filter.until {
            sql.push_str(" AND c.created_at <= ?");
            params_vec.push(Box::new(format_time(until)));
        }

        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            sql.push_str(" AND (c.title LIKE ? ESCAPE '\\' OR c.body LIKE ? ESCAPE '\\')");
            let pattern = format!("%{}%", escape_like(search));
            params_vec.push(Box::new(pattern.clone()));
            params_vec.push(Box::new(pattern));
        }

        sql.push_str(" ORDER BY c.created_at DESC, c.rowid DESC");

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(params_refs.as_slice(), Self::map_entity_row)?;

        let mut entities = Vec::new();
        for row in rows {
            entities.push(Self::row_to_entity(row?)?);
        }
        Ok(entities)
    }

    fn replace_substance(&self, entity: &ContentEntity) -> StorageResult<ContentWrite> {
        let conn = self.lock()?;
        let written = conn.execute(
            "UPDATE content SET title = ?1, body = ?2, details_json = ?3 WHERE id = ?4 AND kind = ?5",
            params![
                entity.title(),
                entity.body(),
                serde_json::to_string(entity.details())?,
                entity.id().to_string(),
                entity.kind().as_str(),
            ],
        );
        content_write(written)
    }

    fn set_lifecycle(&self, target: &ContentRef, lifecycle: &Lifecycle) -> StorageResult<ContentWrite> {
        let conn = self.lock()?;
        let (deleted_at, deleted_by) = lifecycle_columns(lifecycle);
        let written = conn.execute(
            "UPDATE content SET deleted_at = ?1, deleted_by = ?2 WHERE id = ?3 AND kind = ?4",
            params![deleted_at, deleted_by, target.id.to_string(), target.kind.as_str()],
        );
        content_write(written)
    }

    // === Tags ===

    fn ensure_tag(&self, world: &WorldId, name: &TagName) -> StorageResult<Tag> {
        let conn = self.lock()?;
        Self::ensure_tag_on(&conn, world, name)
    }

    fn find_tag(&self, world: &WorldId, key: &str) -> StorageResult<Option<Tag>> {
        let conn = self.lock()?;
        Self::find_tag_on(&conn, world, key)
    }

    fn list_tags(&self, world: &WorldId) -> StorageResult<Vec<Tag>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, world_id, name, display_name, created_at FROM tags WHERE world_id = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![world.to_string()], Self::map_tag_row)?;
        let mut tags = Vec::new();
        for row in rows {
            tags.push(Self::row_to_tag(row?)?);
        }
        Ok(tags)
    }

    fn apply_tags(
        &self,
        world: &WorldId,
        target: &ContentRef,
        names: &[TagName],
        cap: usize,
    ) -> StorageResult<TagWrite> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let target_id = target.id.to_string();
        let target_kind = target.kind.as_str();

        let active: bool = tx
            .query_row(
                "SELECT deleted_at IS NULL FROM content WHERE id = ?1 AND kind = ?2 AND world_id = ?3",
                params![target_id, target_kind, world.to_string()],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(false);
        if !active {
            return Ok(TagWrite::TargetUnavailable);
        }

        // Split the batch before writing anything, so a rejected batch
        // leaves no trace (not even new vocabulary rows)
        let mut already_present = Vec::new();
        let mut pending = Vec::new();
        for name in names {
            let existing = Self::find_tag_on(&tx, world, &name.key)?;
            match existing {
                Some(tag) => {
                    let attached: bool = tx.query_row(
                        "SELECT EXISTS(SELECT 1 FROM content_tags
                         WHERE tag_id = ?1 AND target_kind = ?2 AND target_id = ?3)",
                        params![tag.id.to_string(), target_kind, target_id],
                        |row| row.get(0),
                    )?;
                    if attached {
                        already_present.push(tag);
                    } else {
                        pending.push(name);
                    }
                }
                None => pending.push(name),
            }
        }

        let existing: i64 = tx.query_row(
            "SELECT COUNT(*) FROM content_tags WHERE target_kind = ?1 AND target_id = ?2",
            params![target_kind, target_id],
            |row| row.get(0),
        )?;
        let existing = existing as usize;
        if existing + pending.len() > cap {
            return Ok(TagWrite::LimitExceeded {
                existing,
                requested_new: pending.len(),
            });
        }

        let now = format_time(&Utc::now());
        let mut added = Vec::new();
        for name in pending {
            let tag = Self::ensure_tag_on(&tx, world, name)?;
            let rows = tx.execute(
                "INSERT OR IGNORE INTO content_tags (tag_id, target_kind, target_id, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![tag.id.to_string(), target_kind, target_id, now],
            )?;
            if rows > 0 {
                added.push(tag);
            } else {
                already_present.push(tag);
            }
        }

        tx.commit()?;
        Ok(TagWrite::Applied {
            added,
            already_present,
        })
    }

    fn tags_for(&self, target: &ContentRef) -> StorageResult<Vec<Tag>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT t.id, t.world_id, t.name, t.display_name, t.created_at
            FROM content_tags ct JOIN tags t ON t.id = ct.tag_id
            WHERE ct.target_kind = ?1 AND ct.target_id = ?2
            ORDER BY t.name
            "#,
        )?;
        let rows = stmt.query_map(params![target.kind.as_str(), target.id.to_string()], Self::map_tag_row)?;
        let mut tags = Vec::new();
        for row in rows {
            tags.push(Self::row_to_tag(row?)?);
        }
        Ok(tags)
    }

    fn entities_tagged(&self, tag: &TagId, visibility: Visibility) -> StorageResult<Vec<ContentEntity>> {
        let conn = self.lock()?;
        let mut sql = format!(
            "SELECT {ENTITY_COLUMNS} FROM content_tags ct
             JOIN content c ON c.kind = ct.target_kind AND c.id = ct.target_id
             WHERE ct.tag_id = ?1"
        );
        if visibility == Visibility::Active {
            sql.push_str(" AND c.deleted_at IS NULL");
        }
        sql.push_str(" ORDER BY c.created_at DESC, c.rowid DESC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![tag.to_string()], Self::map_entity_row)?;
        let mut entities = Vec::new();
        for row in rows {
            entities.push(Self::row_to_entity(row?)?);
        }
        Ok(entities)
    }

    fn tag_usage(&self, world: &WorldId) -> StorageResult<Vec<(Tag, usize)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT t.id, t.world_id, t.name, t.display_name, t.created_at,
                   COUNT(c.id) AS usage
            FROM tags t
            LEFT JOIN content_tags ct ON ct.tag_id = t.id
            LEFT JOIN content c
                ON c.kind = ct.target_kind AND c.id = ct.target_id AND c.deleted_at IS NULL
            WHERE t.world_id = ?1
            GROUP BY t.id
            ORDER BY usage DESC, t.name ASC
            "#,
        )?;
        let rows = stmt.query_map(params![world.to_string()], |row| {
            Ok((Self::map_tag_row(row)?, row.get::<_, i64>(5)?))
        })?;
        let mut usage = Vec::new();
        for row in rows {
            let (tag_row, count) = row?;
            usage.push((Self::row_to_tag(tag_row)?, count as usize));
        }
        Ok(usage)
    }

    // === Links ===

    fn insert_link(&self, link: &LinkAssociation) -> StorageResult<LinkWrite> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        for endpoint in [&link.source, &link.target] {
            let active: Option<bool> = tx
                .query_row(
                    "SELECT deleted_at IS NULL FROM content WHERE id = ?1 AND kind = ?2",
                    params![endpoint.id.to_string(), endpoint.kind.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            match active {
                None => return Ok(LinkWrite::EndpointMissing(*endpoint)),
                Some(false) => return Ok(LinkWrite::EndpointInactive(*endpoint)),
                Some(true) => {}
            }
        }

        let rows = tx.execute(
            r#"
            INSERT OR IGNORE INTO content_links
                (world_id, source_kind, source_id, target_kind, target_id, cross_author, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                link.world_id.to_string(),
                link.source.kind.as_str(),
                link.source.id.to_string(),
                link.target.kind.as_str(),
                link.target.id.to_string(),
                link.cross_author,
                format_time(&link.created_at),
            ],
        )?;
        tx.commit()?;

        Ok(if rows > 0 {
            LinkWrite::Inserted
        } else {
            LinkWrite::Duplicate
        })
    }

    fn links_from(&self, source: &ContentRef) -> StorageResult<Vec<LinkAssociation>> {
        self.query_links(
            "SELECT world_id, source_kind, source_id, target_kind, target_id, cross_author, created_at
             FROM content_links WHERE source_kind = ?1 AND source_id = ?2
             ORDER BY created_at",
            params![source.kind.as_str(), source.id.to_string()],
        )
    }

    fn links_to(&self, target: &ContentRef) -> StorageResult<Vec<LinkAssociation>> {
        self.query_links(
            "SELECT world_id, source_kind, source_id, target_kind, target_id, cross_author, created_at
             FROM content_links WHERE target_kind = ?1 AND target_id = ?2
             ORDER BY created_at",
            params![target.kind.as_str(), target.id.to_string()],
        )
    }

    fn links_in_world(&self, world: &WorldId) -> StorageResult<Vec<LinkAssociation>> {
        self.query_links(
            "SELECT world_id, source_kind, source_id, target_kind, target_id, cross_author, created_at
             FROM content_links WHERE world_id = ?1
             ORDER BY created_at",
            params![world.to_string()],
        )
    }

    // === Purge ===

    fn purge_entity(
        &self,
        target: &ContentRef,
        retention: Duration,
        now: DateTime<Utc>,
        purged_by: &UserId,
    ) -> StorageResult<PurgeWrite> {
        let mut conn = self.lock()?;
        // IMMEDIATE takes the write lock up front: no link can be inserted
        // between the reference check and the delete
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let target_id = target.id.to_string();
        let target_kind = target.kind.as_str();

        let row: Option<(String, String, String, Option<String>)> = tx
            .query_row(
                "SELECT world_id, author_id, title, deleted_at FROM content WHERE id = ?1 AND kind = ?2",
                params![target_id, target_kind],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        let Some((world_id, author_id, title, deleted_at)) = row else {
            return Ok(PurgeWrite::Missing);
        };

        let Some(deleted_at) = deleted_at else {
            return Ok(PurgeWrite::Blocked(PurgeBlockReason::NotSoftDeleted));
        };
        let eligible_at = parse_time(&deleted_at)?
            .checked_add_signed(retention)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if eligible_at > now {
            return Ok(PurgeWrite::Blocked(PurgeBlockReason::RetentionPending { eligible_at }));
        }

        let referrers = {
            let mut stmt = tx.prepare(
                r#"
                SELECT l.source_kind, l.source_id
                FROM content_links l
                JOIN content s ON s.kind = l.source_kind AND s.id = l.source_id
                WHERE l.target_kind = ?1 AND l.target_id = ?2 AND s.deleted_at IS NULL
                ORDER BY l.created_at
                "#,
            )?;
            let rows = stmt.query_map(params![target_kind, target_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut referrers = Vec::new();
            for row in rows {
                let (kind, id) = row?;
                referrers.push(ContentRef::new(parse_kind(&kind)?, parse_id(&id)?));
            }
            referrers
        };
        if !referrers.is_empty() {
            return Ok(PurgeWrite::Blocked(PurgeBlockReason::Referenced { referrers }));
        }

        let tag_associations = tx.execute(
            "DELETE FROM content_tags WHERE target_kind = ?1 AND target_id = ?2",
            params![target_kind, target_id],
        )?;
        let outbound_links = tx.execute(
            "DELETE FROM content_links WHERE source_kind = ?1 AND source_id = ?2",
            params![target_kind, target_id],
        )?;
        let inbound_links = tx.execute(
            "DELETE FROM content_links WHERE target_kind = ?1 AND target_id = ?2",
            params![target_kind, target_id],
        )?;
        tx.execute(
            "DELETE FROM content WHERE id = ?1 AND kind = ?2",
            params![target_id, target_kind],
        )?;
        tx.execute(
            r#"
            INSERT INTO purged_content (id, kind, world_id, author_id, title, purged_at, purged_by)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                target_id,
                target_kind,
                world_id,
                author_id,
                title,
                format_time(&now),
                purged_by.to_string()
            ],
        )?;
        tx.commit()?;

        Ok(PurgeWrite::Purged(PurgeCounts {
            tag_associations,
            outbound_links,
            inbound_links,
        }))
    }

    fn purged_record(&self, target: &ContentRef) -> StorageResult<Option<PurgedRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, kind, world_id, author_id, title, purged_at, purged_by
                 FROM purged_content WHERE id = ?1 AND kind = ?2",
                params![target.id.to_string(), target.kind.as_str()],
                map_purged_row,
            )
            .optional()?;
        row.map(row_to_purged).transpose()
    }

    fn list_purged(&self, world: &WorldId) -> StorageResult<Vec<PurgedRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, kind, world_id, author_id, title, purged_at, purged_by
             FROM purged_content WHERE world_id = ?1 ORDER BY purged_at DESC",
        )?;
        let rows = stmt.query_map(params![world.to_string()], map_purged_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row_to_purged(row?)?);
        }
        Ok(records)
    }
}

// === Column codecs ===

/// Fixed-width UTC timestamps so that text order equals time order
fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(text: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::DateParse(e.to_string()))
}

fn parse_id<T: FromStr>(text: &str) -> StorageResult<T> {
    text.parse()
        .map_err(|_| StorageError::Corrupt(format!("invalid identifier: {}", text)))
}

fn parse_kind(text: &str) -> StorageResult<ContentKind> {
    text.parse().map_err(StorageError::Corrupt)
}

/// Map a single-row content write onto its outcome
///
/// The only uniqueness constraint an insert or update can still trip is the
/// active-title index; an id clash on insert is absorbed by `DO NOTHING`.
fn content_write(written: rusqlite::Result<usize>) -> StorageResult<ContentWrite> {
    match written {
        Ok(0) => Ok(ContentWrite::Unchanged),
        Ok(_) => Ok(ContentWrite::Written),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            Ok(ContentWrite::TitleTaken)
        }
        Err(err) => Err(err.into()),
    }
}

fn lifecycle_columns(lifecycle: &Lifecycle) -> (Option<String>, Option<String>) {
    match lifecycle {
        Lifecycle::Active => (None, None),
        Lifecycle::SoftDeleted { at, by } => (Some(format_time(at)), by.map(|u| u.to_string())),
    }
}

fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn row_to_user((id, username, created_at): (String, String, String)) -> StorageResult<User> {
    Ok(User {
        id: parse_id(&id)?,
        username,
        created_at: parse_time(&created_at)?,
    })
}

type WorldRow = (String, String, String, String, bool, String, String);

fn map_world_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorldRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn row_to_world(row: WorldRow) -> StorageResult<World> {
    let (id, title, description, creator, is_public, created_at, updated_at) = row;
    Ok(World {
        id: parse_id(&id)?,
        title,
        description,
        creator: parse_id(&creator)?,
        is_public,
        created_at: parse_time(&created_at)?,
        updated_at: parse_time(&updated_at)?,
    })
}

type PurgedRow = (String, String, String, String, String, String, String);

fn map_purged_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PurgedRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn row_to_purged(row: PurgedRow) -> StorageResult<PurgedRecord> {
    let (id, kind, world_id, author_id, title, purged_at, purged_by) = row;
    Ok(PurgedRecord {
        target: ContentRef::new(parse_kind(&kind)?, parse_id::<EntityId>(&id)?),
        world_id: parse_id(&world_id)?,
        author: parse_id(&author_id)?,
        title,
        purged_at: parse_time(&purged_at)?,
        purged_by: parse_id(&purged_by)?,
    })
}
