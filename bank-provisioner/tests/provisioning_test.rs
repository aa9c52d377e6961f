//! Provisioning behavior against the in-memory target.

use bank_provisioner::models::{IndexSpec, Outcome, ProvisionPlan, RoleGrant, Step, UserSpec};
use bank_provisioner::services::{IndexInfo, InMemoryTarget, ProvisionTarget, Provisioner};
use mongodb::bson::doc;
use provision_core::error::AppError;
use secrecy::Secret;

fn bank_plan() -> ProvisionPlan {
    ProvisionPlan::bank(Secret::new("dev".to_string()))
}

#[tokio::test]
async fn provisions_bank_layout_end_to_end() {
    let target = InMemoryTarget::new();
    let report = Provisioner::new(&target).run(&bank_plan()).await.unwrap();

    let bank = target.database("bank");
    assert_eq!(
        target.collection_names(&bank).await.unwrap(),
        vec!["accounts", "transfers"]
    );

    let indexes = target.list_indexes(&bank, "accounts").await.unwrap();
    let cpf = indexes
        .iter()
        .find(|i| i.name == "cpf_1")
        .expect("accounts should have a cpf index");
    assert!(cpf.is_unique_ascending_on("cpf"));

    assert_eq!(
        target.user_roles("bank", "dev"),
        Some(vec![RoleGrant::new("root", "admin")])
    );
    assert!(target
        .authenticate(&bank, "dev", &Secret::new("dev".to_string()))
        .await
        .is_ok());

    assert_eq!(report.database, "bank");
    assert_eq!(report.outcome_of(&Step::CreateUser), Some(Outcome::Created));
    assert_eq!(
        report.outcome_of(&Step::EnsureUniqueIndex),
        Some(Outcome::Created)
    );
}

#[tokio::test]
async fn second_run_changes_nothing() {
    let target = InMemoryTarget::new();
    let provisioner = Provisioner::new(&target);

    let first = provisioner.run(&bank_plan()).await.unwrap();
    assert!(!first.is_noop());

    let second = provisioner.run(&bank_plan()).await.unwrap();
    assert!(second.is_noop());
    for step in [
        Step::CreateUser,
        Step::EnsureCollection("accounts".into()),
        Step::EnsureCollection("transfers".into()),
        Step::EnsureUniqueIndex,
    ] {
        assert_eq!(second.outcome_of(&step), Some(Outcome::AlreadyPresent), "{}", step);
    }

    let bank = target.database("bank");
    assert_eq!(target.collection_names(&bank).await.unwrap().len(), 2);
    assert_eq!(target.list_indexes(&bank, "accounts").await.unwrap().len(), 2);
}

#[tokio::test]
async fn unique_index_rejects_duplicate_cpf() {
    let target = InMemoryTarget::new();
    Provisioner::new(&target).run(&bank_plan()).await.unwrap();
    let bank = target.database("bank");

    target
        .insert_one(&bank, "accounts", doc! { "name": "Ana", "cpf": "070.910.584-24" })
        .await
        .unwrap();
    let err = target
        .insert_one(&bank, "accounts", doc! { "name": "Bia", "cpf": "070.910.584-24" })
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ConstraintViolation(_)));
    assert_eq!(target.document_count("bank", "accounts"), 1);
}

#[tokio::test]
async fn without_unique_index_duplicate_cpf_is_accepted() {
    let target = InMemoryTarget::new();
    let plan = bank_plan().without_unique_index();
    let report = Provisioner::new(&target).run(&plan).await.unwrap();
    assert_eq!(report.outcome_of(&Step::EnsureUniqueIndex), None);

    let bank = target.database("bank");
    for name in ["Ana", "Bia"] {
        target
            .insert_one(&bank, "accounts", doc! { "name": name, "cpf": "070.910.584-24" })
            .await
            .unwrap();
    }

    assert_eq!(target.document_count("bank", "accounts"), 2);
    let indexes = target.list_indexes(&bank, "accounts").await.unwrap();
    assert!(indexes.iter().all(|i| i.name == "_id_"));
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let target = InMemoryTarget::new();
    Provisioner::new(&target).run(&bank_plan()).await.unwrap();

    let err = target
        .authenticate(
            &target.database("bank"),
            "dev",
            &Secret::new("not-dev".to_string()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::AuthenticationFailed(_)));
}

#[tokio::test]
async fn existing_user_is_left_unchanged() {
    let target = InMemoryTarget::new();
    let bank = target.database("bank");
    target
        .create_user(
            &bank,
            &UserSpec::new("dev", Secret::new("old".to_string()), vec![]),
        )
        .await
        .unwrap();

    let report = Provisioner::new(&target).run(&bank_plan()).await.unwrap();

    assert_eq!(
        report.outcome_of(&Step::CreateUser),
        Some(Outcome::AlreadyPresent)
    );
    assert!(target
        .authenticate(&bank, "dev", &Secret::new("old".to_string()))
        .await
        .is_ok());
    assert_eq!(target.user_roles("bank", "dev"), Some(vec![]));
}

#[tokio::test]
async fn existing_collection_is_tolerated() {
    let target = InMemoryTarget::new();
    let bank = target.database("bank");
    target.create_collection(&bank, "transfers").await.unwrap();

    let report = Provisioner::new(&target).run(&bank_plan()).await.unwrap();

    assert_eq!(
        report.outcome_of(&Step::EnsureCollection("accounts".into())),
        Some(Outcome::Created)
    );
    assert_eq!(
        report.outcome_of(&Step::EnsureCollection("transfers".into())),
        Some(Outcome::AlreadyPresent)
    );
}

#[tokio::test]
async fn duplicate_data_fails_at_index_step() {
    let target = InMemoryTarget::new();
    let bank = target.database("bank");
    for name in ["Ana", "Bia"] {
        target
            .insert_one(&bank, "accounts", doc! { "name": name, "cpf": "1" })
            .await
            .unwrap();
    }

    let err = Provisioner::new(&target)
        .run(&bank_plan())
        .await
        .unwrap_err();

    assert_eq!(err.step, Step::EnsureUniqueIndex);
    assert!(matches!(err.source, AppError::ConstraintViolation(_)));
    assert_eq!(err.exit_code(), 5);
    // Earlier steps stay applied.
    assert!(target.user_exists(&bank, "dev").await.unwrap());
    assert_eq!(
        target.collection_names(&bank).await.unwrap(),
        vec!["accounts", "transfers"]
    );
}

#[tokio::test]
async fn every_collection_exists_exactly_once() {
    let lists: Vec<Vec<&str>> = vec![
        vec![],
        vec!["accounts"],
        vec!["accounts", "transfers", "audit"],
        vec!["transfers", "transfers"],
    ];

    for list in lists {
        let target = InMemoryTarget::new();
        let mut plan = bank_plan().without_unique_index();
        plan.collections = list.iter().map(|c| c.to_string()).collect();

        let provisioner = Provisioner::new(&target);
        provisioner.run(&plan).await.unwrap();
        provisioner.run(&plan).await.unwrap();

        let mut expected: Vec<String> = list.iter().map(|c| c.to_string()).collect();
        expected.sort();
        expected.dedup();
        let names = target
            .collection_names(&target.database("bank"))
            .await
            .unwrap();
        assert_eq!(names, expected, "collections for {:?}", list);
    }
}

#[tokio::test]
async fn indexed_collection_is_created_when_not_listed() {
    let target = InMemoryTarget::new();
    let mut plan = bank_plan();
    plan.collections = vec!["transfers".into()];

    let report = Provisioner::new(&target).run(&plan).await.unwrap();

    assert_eq!(
        report.outcome_of(&Step::EnsureCollection("accounts".into())),
        Some(Outcome::Created)
    );
    assert_eq!(
        target
            .collection_names(&target.database("bank"))
            .await
            .unwrap(),
        vec!["accounts", "transfers"]
    );
}

#[tokio::test]
async fn custom_index_spec_is_honored() {
    let target = InMemoryTarget::new();
    let mut plan = bank_plan();
    plan.unique_index = Some(IndexSpec::new("transfers", "reference"));

    Provisioner::new(&target).run(&plan).await.unwrap();

    let bank = target.database("bank");
    let transfers = target.list_indexes(&bank, "transfers").await.unwrap();
    assert!(transfers
        .iter()
        .any(|i| i.name == "reference_1" && i.is_unique_ascending_on("reference")));
    let accounts = target.list_indexes(&bank, "accounts").await.unwrap();
    assert!(accounts.iter().all(|i| i.name == "_id_"));
}

#[tokio::test]
async fn verify_login_step_runs_when_enabled() {
    let target = InMemoryTarget::new();
    let mut plan = bank_plan();
    plan.verify_login = true;

    let report = Provisioner::new(&target).run(&plan).await.unwrap();

    assert_eq!(
        report.outcome_of(&Step::VerifyLogin),
        Some(Outcome::Verified)
    );
    assert_eq!(report.steps.last().map(|s| &s.step), Some(&Step::VerifyLogin));
}

#[tokio::test]
async fn equivalent_index_under_other_name_is_reused() {
    let target = InMemoryTarget::new();
    target.seed_index(
        "bank",
        "accounts",
        IndexInfo {
            name: "cpf_unique".into(),
            keys: doc! { "cpf": 1 },
            unique: true,
        },
    );

    let report = Provisioner::new(&target).run(&bank_plan()).await.unwrap();

    assert_eq!(
        report.outcome_of(&Step::EnsureUniqueIndex),
        Some(Outcome::AlreadyPresent)
    );
    let indexes = target
        .list_indexes(&target.database("bank"), "accounts")
        .await
        .unwrap();
    let names: Vec<&str> = indexes.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["_id_", "cpf_unique"]);

    let bank = target.database("bank");
    target
        .insert_one(&bank, "accounts", doc! { "cpf": "070.910.584-24" })
        .await
        .unwrap();
    let err = target
        .insert_one(&bank, "accounts", doc! { "cpf": "070.910.584-24" })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ConstraintViolation(_)));
}

#[tokio::test]
async fn non_unique_index_on_field_is_a_conflict() {
    let target = InMemoryTarget::new();
    target.seed_index(
        "bank",
        "accounts",
        IndexInfo {
            name: "cpf_lookup".into(),
            keys: doc! { "cpf": 1 },
            unique: false,
        },
    );

    let err = Provisioner::new(&target)
        .run(&bank_plan())
        .await
        .unwrap_err();

    assert_eq!(err.step, Step::EnsureUniqueIndex);
    assert!(matches!(err.source, AppError::IndexConflict(_)));
    assert_eq!(err.exit_code(), 4);
}
