//! Database seam used by the provisioner.
//!
//! `MongoTarget` talks to a real server; `InMemoryTarget` mimics the server's
//! observable behavior for tests.

use crate::models::{IndexSpec, UserSpec};
use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use provision_core::error::AppError;
use secrecy::Secret;

/// An index as reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub keys: Document,
    pub unique: bool,
}

impl IndexInfo {
    /// True when this is an ascending unique index on exactly `field`.
    pub fn is_unique_ascending_on(&self, field: &str) -> bool {
        self.unique
            && self.keys.len() == 1
            && self
                .keys
                .get(field)
                .is_some_and(is_ascending)
    }
}

fn is_ascending(direction: &Bson) -> bool {
    match direction {
        Bson::Int32(v) => *v == 1,
        Bson::Int64(v) => *v == 1,
        Bson::Double(v) => *v == 1.0,
        _ => false,
    }
}

#[async_trait]
pub trait ProvisionTarget: Send + Sync {
    /// Explicit database context threaded through every call.
    type Handle: Send + Sync;

    /// Round trip to the server's `admin` database.
    async fn ping(&self) -> Result<(), AppError>;

    /// Select a database. Nothing is sent to the server.
    fn database(&self, name: &str) -> Self::Handle;

    async fn user_exists(&self, db: &Self::Handle, username: &str) -> Result<bool, AppError>;

    /// Fails with `AlreadyExists` when the user is already defined in `db`.
    async fn create_user(&self, db: &Self::Handle, user: &UserSpec) -> Result<(), AppError>;

    async fn collection_names(&self, db: &Self::Handle) -> Result<Vec<String>, AppError>;

    /// Fails with `AlreadyExists` when the collection is present.
    async fn create_collection(&self, db: &Self::Handle, name: &str) -> Result<(), AppError>;

    /// Indexes of `collection`; empty when the collection does not exist.
    async fn list_indexes(
        &self,
        db: &Self::Handle,
        collection: &str,
    ) -> Result<Vec<IndexInfo>, AppError>;

    /// Fails with `ConstraintViolation` when stored documents already share a
    /// value for the field, and with `IndexConflict` when an index with the
    /// same name or key but different options exists.
    async fn create_unique_index(&self, db: &Self::Handle, index: &IndexSpec)
        -> Result<(), AppError>;

    /// Fails with `ConstraintViolation` when a unique index rejects the document.
    async fn insert_one(
        &self,
        db: &Self::Handle,
        collection: &str,
        document: Document,
    ) -> Result<(), AppError>;

    /// Authenticate as `username` against the database the user is defined in.
    async fn authenticate(
        &self,
        db: &Self::Handle,
        username: &str,
        password: &Secret<String>,
    ) -> Result<(), AppError>;
}
