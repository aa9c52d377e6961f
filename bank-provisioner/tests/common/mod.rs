use bank_provisioner::config::MongoConfig;
use bank_provisioner::services::{MongoTarget, ProvisionTarget};
use mongodb::bson::doc;
use mongodb::Database;
use secrecy::Secret;
use std::time::Duration;
use uuid::Uuid;

/// A MongoTarget bound to a throwaway database on the test server.
pub struct TestMongo {
    pub target: MongoTarget,
    pub db_name: String,
}

impl TestMongo {
    pub async fn spawn() -> Self {
        let config = MongoConfig {
            uri: Secret::new(
                std::env::var("TEST_MONGODB_URI")
                    .unwrap_or_else(|_| "mongodb://localhost:27017".to_string()),
            ),
            root_user: std::env::var("TEST_MONGODB_ROOT_USER").ok(),
            root_password: std::env::var("TEST_MONGODB_ROOT_PASSWORD")
                .ok()
                .map(Secret::new),
            connect_timeout: Duration::from_secs(5),
        };

        let target = MongoTarget::connect(&config)
            .await
            .expect("Failed to configure MongoDB client");
        target.ping().await.expect("MongoDB is not reachable");

        TestMongo {
            target,
            db_name: format!("bank_test_{}", Uuid::new_v4().simple()),
        }
    }

    pub fn database(&self) -> Database {
        self.target.database(&self.db_name)
    }

    /// Drop the users defined in the test database, then the database itself.
    pub async fn cleanup(&self) -> Result<(), mongodb::error::Error> {
        let db = self.database();
        db.run_command(doc! { "dropAllUsersFromDatabase": 1 }, None)
            .await?;
        db.drop(None).await
    }
}
