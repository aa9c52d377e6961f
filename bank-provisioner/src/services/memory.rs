//! In-memory provisioning target for tests.
//!
//! Mirrors the server behavior the provisioner depends on: implicit database
//! and collection creation, per-database users, the `_id_` index, and unique
//! index enforcement on both index build and insert.

use crate::models::{IndexSpec, RoleGrant, UserSpec};
use crate::services::target::{IndexInfo, ProvisionTarget};
use async_trait::async_trait;
use dashmap::DashMap;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use provision_core::error::AppError;
use secrecy::{ExposeSecret, Secret};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};

/// Database context for [`InMemoryTarget`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryHandle {
    name: String,
}

impl MemoryHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct StoredUser {
    password: String,
    roles: Vec<RoleGrant>,
}

struct CollectionState {
    documents: Vec<Document>,
    indexes: Vec<IndexInfo>,
}

impl Default for CollectionState {
    fn default() -> Self {
        Self {
            documents: Vec::new(),
            indexes: vec![IndexInfo {
                name: "_id_".to_string(),
                keys: doc! { "_id": 1 },
                unique: false,
            }],
        }
    }
}

#[derive(Default)]
struct DatabaseState {
    collections: BTreeMap<String, CollectionState>,
    users: HashMap<String, StoredUser>,
}

#[derive(Default)]
pub struct InMemoryTarget {
    databases: DashMap<String, DatabaseState>,
    failing_pings: AtomicU32,
    pings: AtomicU32,
}

impl InMemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` pings fail with `ConnectionFailure`.
    pub fn with_failing_pings(count: u32) -> Self {
        let target = Self::default();
        target.failing_pings.store(count, Ordering::SeqCst);
        target
    }

    pub fn ping_count(&self) -> u32 {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn user_roles(&self, db: &str, username: &str) -> Option<Vec<RoleGrant>> {
        self.databases
            .get(db)
            .and_then(|state| state.users.get(username).map(|u| u.roles.clone()))
    }

    /// Add `index` to `collection` as is, creating the collection if needed.
    /// Stored documents are not checked against it.
    pub fn seed_index(&self, db: &str, collection: &str, index: IndexInfo) {
        self.databases
            .entry(db.to_string())
            .or_default()
            .collections
            .entry(collection.to_string())
            .or_default()
            .indexes
            .push(index);
    }

    pub fn document_count(&self, db: &str, collection: &str) -> usize {
        self.databases
            .get(db)
            .and_then(|state| state.collections.get(collection).map(|c| c.documents.len()))
            .unwrap_or(0)
    }
}

fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut value = document.get(parts.next()?)?;
    for part in parts {
        value = value.as_document()?.get(part)?;
    }
    Some(value)
}

/// Missing fields index as null, so two documents without the field collide.
fn key_of(document: &Document, field: &str) -> Bson {
    lookup(document, field).cloned().unwrap_or(Bson::Null)
}

fn indexed_field(index: &IndexInfo) -> Option<&str> {
    if index.keys.len() == 1 {
        index.keys.keys().next().map(String::as_str)
    } else {
        None
    }
}

fn duplicate_key(db: &str, collection: &str, index: &str, field: &str, value: &Bson) -> AppError {
    AppError::ConstraintViolation(anyhow::anyhow!(
        "E11000 duplicate key error collection: {}.{} index: {} dup key: {{ {}: {} }}",
        db,
        collection,
        index,
        field,
        value
    ))
}

#[async_trait]
impl ProvisionTarget for InMemoryTarget {
    type Handle = MemoryHandle;

    async fn ping(&self) -> Result<(), AppError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_pings.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_pings.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::ConnectionFailure(anyhow::anyhow!(
                "Server selection timeout: no available servers"
            )));
        }
        Ok(())
    }

    fn database(&self, name: &str) -> MemoryHandle {
        MemoryHandle {
            name: name.to_string(),
        }
    }

    async fn user_exists(&self, db: &MemoryHandle, username: &str) -> Result<bool, AppError> {
        Ok(self
            .databases
            .get(&db.name)
            .is_some_and(|state| state.users.contains_key(username)))
    }

    async fn create_user(&self, db: &MemoryHandle, user: &UserSpec) -> Result<(), AppError> {
        let mut state = self.databases.entry(db.name.clone()).or_default();
        if state.users.contains_key(&user.username) {
            return Err(AppError::AlreadyExists(anyhow::anyhow!(
                "User \"{}@{}\" already exists",
                user.username,
                db.name
            )));
        }
        state.users.insert(
            user.username.clone(),
            StoredUser {
                password: user.password.expose_secret().clone(),
                roles: user.roles.clone(),
            },
        );
        Ok(())
    }

    async fn collection_names(&self, db: &MemoryHandle) -> Result<Vec<String>, AppError> {
        Ok(self
            .databases
            .get(&db.name)
            .map(|state| state.collections.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_collection(&self, db: &MemoryHandle, name: &str) -> Result<(), AppError> {
        let mut state = self.databases.entry(db.name.clone()).or_default();
        if state.collections.contains_key(name) {
            return Err(AppError::AlreadyExists(anyhow::anyhow!(
                "Collection {}.{} already exists.",
                db.name,
                name
            )));
        }
        state
            .collections
            .insert(name.to_string(), CollectionState::default());
        Ok(())
    }

    async fn list_indexes(
        &self,
        db: &MemoryHandle,
        collection: &str,
    ) -> Result<Vec<IndexInfo>, AppError> {
        Ok(self
            .databases
            .get(&db.name)
            .and_then(|state| state.collections.get(collection).map(|c| c.indexes.clone()))
            .unwrap_or_default())
    }

    async fn create_unique_index(
        &self,
        db: &MemoryHandle,
        index: &IndexSpec,
    ) -> Result<(), AppError> {
        let name = index.index_name();
        let mut state = self.databases.entry(db.name.clone()).or_default();
        let collection = state
            .collections
            .entry(index.collection.clone())
            .or_default();

        if let Some(existing) = collection
            .indexes
            .iter()
            .find(|i| i.name == name || indexed_field(i) == Some(index.field.as_str()))
        {
            if existing.name == name && existing.is_unique_ascending_on(&index.field) {
                return Ok(());
            }
            return Err(AppError::IndexConflict(anyhow::anyhow!(
                "An existing index has the same name or key as the requested index: {}",
                existing.name
            )));
        }

        let mut seen: Vec<Bson> = Vec::with_capacity(collection.documents.len());
        for document in &collection.documents {
            let key = key_of(document, &index.field);
            if seen.contains(&key) {
                return Err(duplicate_key(
                    &db.name,
                    &index.collection,
                    &name,
                    &index.field,
                    &key,
                ));
            }
            seen.push(key);
        }

        let mut keys = Document::new();
        keys.insert(index.field.as_str(), 1);
        collection.indexes.push(IndexInfo {
            name,
            keys,
            unique: true,
        });
        Ok(())
    }

    async fn insert_one(
        &self,
        db: &MemoryHandle,
        collection: &str,
        mut document: Document,
    ) -> Result<(), AppError> {
        if !document.contains_key("_id") {
            document.insert("_id", ObjectId::new());
        }

        let mut state = self.databases.entry(db.name.clone()).or_default();
        let target = state.collections.entry(collection.to_string()).or_default();

        for index in &target.indexes {
            let Some(field) = indexed_field(index) else {
                continue;
            };
            if !index.unique && field != "_id" {
                continue;
            }
            let key = key_of(&document, field);
            if target
                .documents
                .iter()
                .any(|existing| key_of(existing, field) == key)
            {
                return Err(duplicate_key(&db.name, collection, &index.name, field, &key));
            }
        }

        target.documents.push(document);
        Ok(())
    }

    async fn authenticate(
        &self,
        db: &MemoryHandle,
        username: &str,
        password: &Secret<String>,
    ) -> Result<(), AppError> {
        let authenticated = self.databases.get(&db.name).is_some_and(|state| {
            state
                .users
                .get(username)
                .is_some_and(|user| &user.password == password.expose_secret())
        });

        if authenticated {
            Ok(())
        } else {
            Err(AppError::AuthenticationFailed(anyhow::anyhow!(
                "Authentication failed."
            )))
        }
    }
}
