//! Common test utilities for worldweave integration tests
//!
//! `WorldFixture` builds an engine with one world and a few named users,
//! and offers shortcuts for creating content in that world.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use worldweave::lifecycle::LifecycleManager;
use worldweave::{
    Actor, ContentDraft, ContentRef, EngineConfig, LinkGraph, OpenStore, SqliteStore, TagGraph,
    WeaveEngine, WorldId,
};

/// An engine, one world, and the users acting in it
pub struct WorldFixture {
    pub engine: Arc<WeaveEngine>,
    pub world: WorldId,
    users: HashMap<String, Actor>,
}

impl WorldFixture {
    /// In-memory world "Eldoria" created by alice, with bob as a second user
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = SqliteStore::open_in_memory().expect("in-memory store");
        Self::build(Arc::new(WeaveEngine::with_config(Arc::new(store), config)))
    }

    /// World backed by a database file, so other connections can share it
    pub fn on_disk(path: &Path, config: EngineConfig) -> Self {
        let store = SqliteStore::open(path).expect("file store");
        Self::build(Arc::new(WeaveEngine::with_config(Arc::new(store), config)))
    }

    fn build(engine: Arc<WeaveEngine>) -> Self {
        let mut users = HashMap::new();
        for name in ["alice", "bob"] {
            let user = engine.create_user(name).expect("create user");
            users.insert(name.to_string(), Actor::user(user.id));
        }
        let admin = engine.create_user("root").expect("create admin");
        users.insert("root".to_string(), Actor::admin(admin.id));

        let world = engine
            .create_world(&users["alice"], "Eldoria", "A world of misty isles", true)
            .expect("create world")
            .id;
        Self { engine, world, users }
    }

    /// Open a second engine on the same database file
    pub fn reopen(&self, path: &Path) -> Arc<WeaveEngine> {
        let store = SqliteStore::open(path).expect("reopen store");
        Arc::new(WeaveEngine::with_config(Arc::new(store), self.engine.config().clone()))
    }

    pub fn actor(&self, name: &str) -> Actor {
        self.users[name]
    }

    pub fn alice(&self) -> Actor {
        self.actor("alice")
    }

    pub fn bob(&self) -> Actor {
        self.actor("bob")
    }

    pub fn admin(&self) -> Actor {
        self.actor("root")
    }

    pub fn create(&self, author: &Actor, draft: ContentDraft) -> ContentRef {
        self.engine
            .create_content(author, &self.world, draft)
            .expect("create content")
            .content_ref()
    }

    pub fn page(&self, author: &Actor, title: &str) -> ContentRef {
        self.create(author, ContentDraft::page(title, format!("{} is a place in the isles.", title)))
    }

    pub fn character(&self, author: &Actor, title: &str) -> ContentRef {
        self.create(
            author,
            ContentDraft::character(title, format!("{} sails the outer isles.", title), title),
        )
    }

    /// A second world, created by bob
    pub fn other_world(&self) -> WorldId {
        self.engine
            .create_world(&self.bob(), "Ashfall", "A world under volcanic skies", true)
            .expect("create world")
            .id
    }

    pub fn tags(&self) -> TagGraph<'_> {
        TagGraph::new(&self.engine, self.world)
    }

    pub fn links(&self) -> LinkGraph<'_> {
        LinkGraph::new(&self.engine, self.world)
    }

    pub fn lifecycle(&self) -> LifecycleManager<'_> {
        LifecycleManager::new(&self.engine, self.world)
    }
}
