use crate::config::MongoConfig;
use crate::models::{IndexSpec, UserSpec};
use crate::services::target::{IndexInfo, ProvisionTarget};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Document},
    error::ErrorKind,
    options::{ClientOptions, Credential, IndexOptions},
    Client as MongoClient, Database, IndexModel,
};
use provision_core::error::{codes, AppError};
use secrecy::{ExposeSecret, Secret};

const APP_NAME: &str = "bank-provisioner";

#[derive(Clone)]
pub struct MongoTarget {
    client: MongoClient,
    options: ClientOptions,
}

impl MongoTarget {
    /// Build a client for `config`. The driver connects lazily, so an
    /// unreachable server only surfaces on the first round trip.
    pub async fn connect(config: &MongoConfig) -> Result<Self, AppError> {
        tracing::info!(
            connect_timeout_secs = config.connect_timeout.as_secs(),
            "Configuring MongoDB client"
        );

        let mut options = ClientOptions::parse(config.uri.expose_secret())
            .await
            .map_err(|e| {
                tracing::error!("Failed to parse MongoDB connection string: {}", e);
                if matches!(e.kind.as_ref(), ErrorKind::InvalidArgument { .. }) {
                    AppError::ConfigError(anyhow::Error::new(e))
                } else {
                    AppError::from(e)
                }
            })?;
        options.app_name = Some(APP_NAME.to_string());
        options.connect_timeout = Some(config.connect_timeout);
        options.server_selection_timeout = Some(config.connect_timeout);

        if let Some(user) = &config.root_user {
            options.credential = Some(credential(
                user,
                config.root_password.as_ref().map(|p| p.expose_secret().as_str()),
                "admin",
            ));
        }

        let client = MongoClient::with_options(options.clone()).map_err(|e| {
            tracing::error!("Failed to create MongoDB client: {}", e);
            AppError::from(e)
        })?;

        Ok(Self { client, options })
    }

    pub fn client(&self) -> &MongoClient {
        &self.client
    }
}

fn credential(username: &str, password: Option<&str>, source: &str) -> Credential {
    let mut credential = Credential::default();
    credential.username = Some(username.to_string());
    credential.password = password.map(str::to_string);
    credential.source = Some(source.to_string());
    credential
}

fn is_namespace_not_found(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Command(command) if command.code == codes::NAMESPACE_NOT_FOUND
    )
}

#[async_trait]
impl ProvisionTarget for MongoTarget {
    type Handle = Database;

    async fn ping(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB ping failed: {}", e);
                AppError::from(e)
            })?;
        Ok(())
    }

    fn database(&self, name: &str) -> Database {
        self.client.database(name)
    }

    async fn user_exists(&self, db: &Database, username: &str) -> Result<bool, AppError> {
        let reply = db
            .run_command(doc! { "usersInfo": username }, None)
            .await?;
        Ok(reply
            .get_array("users")
            .map(|users| !users.is_empty())
            .unwrap_or(false))
    }

    async fn create_user(&self, db: &Database, user: &UserSpec) -> Result<(), AppError> {
        let roles: Vec<Document> = user
            .roles
            .iter()
            .map(|grant| doc! { "role": grant.role.as_str(), "db": grant.db.as_str() })
            .collect();

        db.run_command(
            doc! {
                "createUser": user.username.as_str(),
                "pwd": user.password.expose_secret().as_str(),
                "roles": roles,
            },
            None,
        )
        .await?;
        Ok(())
    }

    async fn collection_names(&self, db: &Database) -> Result<Vec<String>, AppError> {
        Ok(db.list_collection_names(None).await?)
    }

    async fn create_collection(&self, db: &Database, name: &str) -> Result<(), AppError> {
        db.create_collection(name, None).await?;
        Ok(())
    }

    async fn list_indexes(&self, db: &Database, collection: &str) -> Result<Vec<IndexInfo>, AppError> {
        let cursor = match db
            .collection::<Document>(collection)
            .list_indexes(None)
            .await
        {
            Ok(cursor) => cursor,
            Err(e) if is_namespace_not_found(&e) => return Ok(Vec::new()),
            Err(e) => return Err(AppError::from(e)),
        };

        let models: Vec<IndexModel> = cursor.try_collect().await?;
        Ok(models
            .into_iter()
            .map(|model| {
                let (name, unique) = model
                    .options
                    .map(|o| (o.name.unwrap_or_default(), o.unique.unwrap_or(false)))
                    .unwrap_or_default();
                IndexInfo {
                    name,
                    keys: model.keys,
                    unique,
                }
            })
            .collect())
    }

    async fn create_unique_index(&self, db: &Database, index: &IndexSpec) -> Result<(), AppError> {
        let mut keys = Document::new();
        keys.insert(index.field.as_str(), 1);

        let model = IndexModel::builder()
            .keys(keys)
            .options(
                IndexOptions::builder()
                    .name(index.index_name())
                    .unique(true)
                    .build(),
            )
            .build();

        db.collection::<Document>(&index.collection)
            .create_index(model, None)
            .await?;
        Ok(())
    }

    async fn insert_one(
        &self,
        db: &Database,
        collection: &str,
        document: Document,
    ) -> Result<(), AppError> {
        db.collection::<Document>(collection)
            .insert_one(document, None)
            .await?;
        Ok(())
    }

    async fn authenticate(
        &self,
        db: &Database,
        username: &str,
        password: &Secret<String>,
    ) -> Result<(), AppError> {
        let mut options = self.options.clone();
        options.credential = Some(credential(
            username,
            Some(password.expose_secret().as_str()),
            db.name(),
        ));

        let client = MongoClient::with_options(options)?;
        let result = client
            .database(db.name())
            .run_command(doc! { "ping": 1 }, None)
            .await;
        client.shutdown().await;
        result?;
        Ok(())
    }
}
