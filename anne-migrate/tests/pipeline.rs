//! End-to-end phase runs against an in-memory dump source and the local store

use anne_core::config::{MigrationSettings, VerificationSettings};
use anne_core::{
    Document, DocumentStore, IndexDefinition, InsertManyOutcome, LocalStore, ObjectId,
    StorageError, Value, WriteError,
};
use anne_migrate::{
    DumpSource, Entity, EntityKind, MigrationContext, Migrator, Phase, PhaseStatus, SourceRow,
    StatusStore,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Local store that can fail a whole bulk insert or reject single documents
struct FlakyStore {
    inner: LocalStore,
    /// Fail the n-th `insert_many` call (1-based) on a collection
    fail_batch: Option<(&'static str, usize)>,
    /// Reject the document with this `legacyId` in a collection
    reject: Option<(&'static str, i64)>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: LocalStore::in_memory(),
            fail_batch: None,
            reject: None,
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn failing_batch(mut self, collection: &'static str, call: usize) -> Self {
        self.fail_batch = Some((collection, call));
        self
    }

    fn rejecting(mut self, collection: &'static str, legacy_id: i64) -> Self {
        self.reject = Some((collection, legacy_id));
        self
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    fn backend(&self) -> &'static str {
        "flaky"
    }

    async fn clear_collection(&self, collection: &str) -> Result<u64, StorageError> {
        self.inner.clear_collection(collection).await
    }

    async fn drop_indexes(&self, collection: &str) -> Result<(), StorageError> {
        self.inner.drop_indexes(collection).await
    }

    async fn create_indexes(
        &self,
        collection: &str,
        indexes: &[IndexDefinition],
    ) -> Result<(), StorageError> {
        self.inner.create_indexes(collection, indexes).await
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<InsertManyOutcome, StorageError> {
        let call = {
            let mut calls = self.calls.lock();
            let count = calls.entry(collection.to_string()).or_default();
            *count += 1;
            *count
        };
        if self.fail_batch == Some((collection, call)) {
            return Err(StorageError::Backend("connection reset".to_string()));
        }

        let mut rejected = Vec::new();
        let mut accepted = Vec::new();
        for (index, doc) in documents.into_iter().enumerate() {
            let legacy_id = doc.get("legacyId").and_then(Value::as_i64);
            match self.reject {
                Some((target, id)) if target == collection && legacy_id == Some(id) => {
                    rejected.push(WriteError {
                        index,
                        id: doc.id,
                        message: "rejected by test store".to_string(),
                    })
                }
                _ => accepted.push(doc),
            }
        }

        let mut outcome = self.inner.insert_many(collection, accepted).await?;
        outcome.write_errors.extend(rejected);
        Ok(outcome)
    }

    async fn count(&self, collection: &str) -> Result<u64, StorageError> {
        self.inner.count(collection).await
    }

    async fn count_embedded(
        &self,
        collection: &str,
        array_field: &str,
    ) -> Result<u64, StorageError> {
        self.inner.count_embedded(collection, array_field).await
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Document>, StorageError> {
        self.inner.find_all(collection).await
    }

    async fn find_one(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Option<Document>, StorageError> {
        self.inner.find_one(collection, field, value).await
    }

    async fn upsert_by(
        &self,
        collection: &str,
        key_field: &str,
        document: Document,
    ) -> Result<(), StorageError> {
        self.inner.upsert_by(collection, key_field, document).await
    }
}

fn row() -> SourceRow {
    SourceRow::new()
}

/// Reference data every phase needs: two countries, one zone, English
fn reference_source() -> DumpSource {
    DumpSource::new("oc_")
        .with_empty_tables()
        .with_table(
            "country",
            vec![
                row().set("country_id", 1).set("name", "Iran").set("iso_code_2", "IR"),
                row().set("country_id", 2).set("name", "Turkey").set("iso_code_2", "TR"),
            ],
        )
        .with_table(
            "zone",
            vec![row().set("zone_id", 10).set("country_id", 1).set("name", "Tehran")],
        )
        .with_table(
            "language",
            vec![row()
                .set("language_id", 1)
                .set("name", "English")
                .set("code", "en-gb")
                .set("status", 1)],
        )
}

fn settings(batch_size: usize) -> MigrationSettings {
    MigrationSettings {
        batch_size,
        phase_pause_ms: 0,
        ..MigrationSettings::default()
    }
}

fn migrator(source: DumpSource, store: Arc<dyn DocumentStore>, batch_size: usize) -> Migrator {
    let ctx = MigrationContext::new(
        Arc::new(source),
        store,
        settings(batch_size),
        VerificationSettings::default(),
    )
    .without_log_files();
    Migrator::new(ctx).unwrap()
}

async fn documents(store: &dyn DocumentStore, collection: &str) -> Vec<Document> {
    store.find_all(collection).await.unwrap()
}

fn customers(n: i64) -> Vec<SourceRow> {
    (1..=n)
        .map(|i| {
            row()
                .set("customer_id", i)
                .set("firstname", "Customer")
                .set("email", format!("customer{i}@example.com"))
                .set("status", 1)
        })
        .collect()
}

fn products(n: i64) -> Vec<SourceRow> {
    (1..=n)
        .map(|i| {
            row()
                .set("product_id", i)
                .set("model", format!("EMB-{i}"))
                .set("price", 12.5)
                .set("status", 1)
        })
        .collect()
}

#[tokio::test]
async fn test_zone_with_unknown_country_is_skipped() {
    let source = reference_source().with_table(
        "zone",
        vec![
            row().set("zone_id", 10).set("country_id", 1).set("name", "Tehran"),
            row().set("zone_id", 11).set("country_id", 999).set("name", "Nowhere"),
        ],
    );
    let store = Arc::new(LocalStore::in_memory());
    let mut migrator = migrator(source, store.clone(), 100);

    assert!(migrator.run_phase(Phase::Phase1).await);

    let zones = documents(store.as_ref(), "zones").await;
    assert_eq!(zones.len(), 1);
    assert_eq!(zones[0].get("legacyId").and_then(Value::as_i64), Some(10));

    let iran = migrator.context().mappings.get(EntityKind::Country, 1).unwrap();
    assert_eq!(zones[0].get("country").and_then(Value::as_object_id), Some(iran));
    assert!(migrator.context().mappings.get(EntityKind::Zone, 11).is_none());
    assert_eq!(migrator.outcomes()[0].stats.skipped, 1);
}

#[tokio::test]
async fn test_failing_row_does_not_stop_the_entity() {
    let source = reference_source().with_table(
        "language",
        vec![
            row().set("language_id", 1).set("name", "English").set("code", "en-gb"),
            row().set("language_id", 2).set("name", "Broken").set("code", "  "),
            row().set("language_id", 3).set("name", "Deutsch").set("code", "DE-DE"),
        ],
    );
    let store = Arc::new(LocalStore::in_memory());
    let mut migrator = migrator(source, store.clone(), 100);

    assert!(migrator.run_phase(Phase::Phase1).await);

    let languages = documents(store.as_ref(), "languages").await;
    assert_eq!(languages.len(), 2);
    assert!(languages
        .iter()
        .any(|doc| doc.get("code").and_then(Value::as_str) == Some("de-de")));
    assert!(migrator.context().mappings.get(EntityKind::Language, 2).is_none());
    assert_eq!(migrator.outcomes()[0].stats.failed, 1);
}

#[tokio::test]
async fn test_failed_batch_does_not_stop_the_entity() {
    let countries: Vec<SourceRow> = (1..=5)
        .map(|i| row().set("country_id", i).set("name", format!("Country {i}")))
        .collect();
    let source = reference_source()
        .with_table("country", countries)
        .with_table("zone", vec![]);
    let store = Arc::new(FlakyStore::new().failing_batch("countries", 2));
    let mut migrator = migrator(source, store.clone(), 2);

    assert!(migrator.run_phase(Phase::Phase1).await);

    assert_eq!(store.count("countries").await.unwrap(), 3);
    let mappings = &migrator.context().mappings;
    for id in [1, 2, 5] {
        assert!(mappings.get(EntityKind::Country, id).is_some(), "country {id}");
    }
    for id in [3, 4] {
        assert!(mappings.get(EntityKind::Country, id).is_none(), "country {id}");
    }

    let stats = migrator.outcomes()[0].stats;
    assert_eq!(stats.failed, 2);
    // 3 countries and 1 language
    assert_eq!(stats.succeeded, 4);
}

#[tokio::test]
async fn test_unresolved_reference_is_stored_as_null() {
    let source = reference_source()
        .with_table("customer", customers(1))
        .with_table(
            "address",
            vec![row()
                .set("address_id", 7)
                .set("customer_id", 1)
                .set("country_id", 999)
                .set("zone_id", 10)
                .set("city", "Tehran")],
        );
    let store = Arc::new(LocalStore::in_memory());
    let mut migrator = migrator(source, store.clone(), 100);

    for phase in [Phase::Phase1, Phase::Phase2, Phase::Phase3] {
        assert!(migrator.run_phase(phase).await, "{phase}");
    }

    let customers = documents(store.as_ref(), "customers").await;
    let address = customers[0]
        .get_by_path("addresses.0")
        .and_then(|a| a.as_object().cloned())
        .unwrap();
    assert_eq!(address.get("country"), Some(&Value::Null));
    let tehran = migrator.context().mappings.get(EntityKind::Zone, 10).unwrap();
    assert_eq!(address.get("zone"), Some(&Value::ObjectId(tehran)));
}

#[tokio::test]
async fn test_customer_emails_are_generated_and_deduplicated() {
    let source = reference_source().with_table(
        "customer",
        vec![
            row().set("customer_id", 1).set("email", ""),
            row().set("customer_id", 2).set("email", "jane@example.com"),
            row().set("customer_id", 3).set("email", "JANE@example.com "),
        ],
    );
    let store = Arc::new(LocalStore::in_memory());
    let mut migrator = migrator(source, store.clone(), 100);

    for phase in [Phase::Phase1, Phase::Phase2, Phase::Phase3] {
        assert!(migrator.run_phase(phase).await, "{phase}");
    }

    let mut emails: HashMap<i64, String> = HashMap::new();
    for doc in documents(store.as_ref(), "customers").await {
        let id = doc.get("legacyId").and_then(Value::as_i64).unwrap();
        let email = doc.get("email").and_then(Value::as_str).unwrap().to_string();
        emails.insert(id, email);
    }
    assert_eq!(emails[&1], "customer_1@anne.com");
    assert_eq!(emails[&2], "jane@example.com");
    assert_eq!(emails[&3], "jane_3@example.com");
}

#[tokio::test]
async fn test_customer_count_mismatch_fails_the_phase() {
    let source = reference_source().with_table("customer", customers(100));
    let store = Arc::new(FlakyStore::new().rejecting("customers", 50));
    let mut migrator = migrator(source, store.clone(), 100);

    assert!(migrator.run_phase(Phase::Phase1).await);
    assert!(migrator.run_phase(Phase::Phase2).await);
    assert!(!migrator.run_phase(Phase::Phase3).await);

    assert_eq!(store.count("customers").await.unwrap(), 99);
    let record = StatusStore::new(store.as_ref())
        .get("phase3")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, PhaseStatus::Failed);
    let error = record.error.unwrap();
    assert!(error.contains("customers count mismatch"), "{error}");
    assert!(error.contains("100") && error.contains("99"), "{error}");
}

async fn run_wishlist_phase(products_in_source: i64) -> bool {
    let wishlist: Vec<SourceRow> = (1..=100)
        .map(|i| row().set("customer_id", 1).set("product_id", i))
        .collect();
    let source = reference_source()
        .with_table("customer", customers(1))
        .with_table("product", products(products_in_source))
        .with_table("customer_wishlist", wishlist);
    let store = Arc::new(LocalStore::in_memory());
    let mut migrator = migrator(source, store, 100);

    for phase in [Phase::Phase1, Phase::Phase2, Phase::Phase3, Phase::Phase4] {
        assert!(migrator.run_phase(phase).await, "{phase}");
    }
    migrator.run_phase(Phase::Phase5).await
}

#[tokio::test]
async fn test_wishlist_success_rate_above_threshold_passes() {
    assert!(run_wishlist_phase(91).await);
}

#[tokio::test]
async fn test_wishlist_success_rate_below_threshold_fails() {
    assert!(!run_wishlist_phase(85).await);
}

#[tokio::test]
async fn test_run_all_halts_at_the_first_failed_phase() {
    let source = reference_source()
        .with_table("customer", customers(3))
        .with_table("product", products(2));
    let store = Arc::new(FlakyStore::new().rejecting("customers", 2));
    let mut migrator = migrator(source, store.clone(), 100);

    assert!(!migrator.run_all().await);

    let invoked = migrator.invocations();
    assert!(invoked.contains(&Entity::Customers));
    assert!(!invoked.contains(&Entity::Products));
    assert!(!invoked.contains(&Entity::Orders));
    assert_eq!(store.count("products").await.unwrap(), 0);

    let statuses = StatusStore::new(store.as_ref());
    assert_eq!(
        statuses.get("phase2").await.unwrap().unwrap().status,
        PhaseStatus::Completed
    );
    assert_eq!(
        statuses.get("phase3").await.unwrap().unwrap().status,
        PhaseStatus::Failed
    );
    assert!(statuses.get("phase4").await.unwrap().is_none());

    let summary = migrator.summary();
    assert!(summary.contains("Duration"));
    assert!(summary.contains("Total duration: "));
    let phase3 = summary.lines().find(|l| l.starts_with("phase3")).unwrap();
    assert!(phase3.contains("failed"));
    assert!(phase3.trim_end().ends_with('s'));
    assert!(summary.lines().any(|l| l.starts_with("phase4") && l.contains("not run")));
}

#[tokio::test]
async fn test_phase_hydrates_mappings_from_an_earlier_run() {
    let source = reference_source().with_table("customer", customers(2));
    let store = Arc::new(LocalStore::in_memory());

    let mut first = migrator(source.clone(), store.clone(), 100);
    assert!(first.run_phase(Phase::Phase1).await);

    // A fresh process starts with an empty mapping table
    let mut second = migrator(source, store.clone(), 100);
    assert!(second.run_phase(Phase::Phase3).await);

    let iran = first.context().mappings.get(EntityKind::Country, 1);
    assert_eq!(second.context().mappings.get(EntityKind::Country, 1), iran);
    assert_eq!(store.count("customers").await.unwrap(), 2);
}

#[tokio::test]
async fn test_full_run_migrates_orders_with_references() {
    let source = reference_source()
        .with_table("option", vec![row().set("option_id", 5).set("type", "select")])
        .with_table(
            "option_description",
            vec![row().set("option_id", 5).set("language_id", 1).set("name", "Thread colour")],
        )
        .with_table(
            "option_value",
            vec![row().set("option_value_id", 50).set("option_id", 5)],
        )
        .with_table(
            "option_value_description",
            vec![row().set("option_value_id", 50).set("language_id", 1).set("name", "Gold")],
        )
        .with_table(
            "category",
            vec![
                row().set("category_id", 20).set("parent_id", 0),
                row().set("category_id", 21).set("parent_id", 20),
            ],
        )
        .with_table(
            "category_description",
            vec![
                row().set("category_id", 20).set("language_id", 1).set("name", "Embroidery"),
                row().set("category_id", 21).set("language_id", 1).set("name", "Cushions"),
            ],
        )
        .with_table(
            "user",
            vec![row().set("user_id", 1).set("username", "admin").set("email", "admin@anne.com")],
        )
        .with_table("customer", customers(1))
        .with_table(
            "address",
            vec![row()
                .set("address_id", 3)
                .set("customer_id", 1)
                .set("country_id", 1)
                .set("zone_id", 10)],
        )
        .with_table("product", products(1))
        .with_table(
            "product_description",
            vec![row().set("product_id", 1).set("language_id", 1).set("name", "Rose cushion")],
        )
        .with_table(
            "product_to_category",
            vec![row().set("product_id", 1).set("category_id", 21)],
        )
        .with_table(
            "product_option_value",
            vec![row()
                .set("product_option_value_id", 70)
                .set("product_option_id", 60)
                .set("product_id", 1)
                .set("option_id", 5)
                .set("option_value_id", 50)],
        )
        .with_table(
            "cart",
            vec![row()
                .set("cart_id", 1)
                .set("customer_id", 1)
                .set("product_id", 1)
                .set("option", r#"{"60":"70"}"#)
                .set("quantity", 2)],
        )
        .with_table(
            "customer_wishlist",
            vec![row().set("customer_id", 1).set("product_id", 1)],
        )
        .with_table(
            "order",
            vec![
                row()
                    .set("order_id", 100)
                    .set("customer_id", 1)
                    .set("invoice_prefix", "INV-")
                    .set("invoice_no", 7)
                    .set("total", 25.0)
                    .set("order_status_id", 5)
                    .set("payment_country", "Iran")
                    .set("date_added", "2023-04-01 10:00:00"),
                row()
                    .set("order_id", 101)
                    .set("customer_id", 0)
                    .set("total", 12.5)
                    .set("order_status_id", 42),
            ],
        )
        .with_table(
            "order_product",
            vec![row()
                .set("order_product_id", 900)
                .set("order_id", 100)
                .set("product_id", 1)
                .set("quantity", 2)
                .set("price", 12.5)
                .set("total", 25.0)],
        )
        .with_table(
            "order_option",
            vec![row()
                .set("order_option_id", 901)
                .set("order_product_id", 900)
                .set("product_option_value_id", 70)
                .set("name", "Thread colour")
                .set("value", "Gold")],
        )
        .with_table(
            "order_total",
            vec![row()
                .set("order_total_id", 1)
                .set("order_id", 100)
                .set("code", "total")
                .set("value", 25.0)],
        )
        .with_table(
            "order_history",
            vec![row()
                .set("order_history_id", 1)
                .set("order_id", 100)
                .set("order_status_id", 1)
                .set("date_added", "2023-04-01 10:00:00")],
        );
    let store = Arc::new(LocalStore::in_memory());
    let mut migrator = migrator(source, store.clone(), 100);

    assert!(migrator.run_all().await);
    assert_eq!(migrator.invocations(), Entity::ALL.as_slice());

    let statuses = StatusStore::new(store.as_ref());
    for phase in Phase::ALL {
        let record = statuses.get(phase.name()).await.unwrap().unwrap();
        assert_eq!(record.status, PhaseStatus::Completed, "{phase}");
    }

    let categories = documents(store.as_ref(), "categories").await;
    let parent: ObjectId = categories
        .iter()
        .find(|c| c.get("legacyId").and_then(Value::as_i64) == Some(20))
        .map(|c| c.id)
        .unwrap();
    let child = categories
        .iter()
        .find(|c| c.get("legacyId").and_then(Value::as_i64) == Some(21))
        .unwrap();
    assert_eq!(child.get("parent").and_then(Value::as_object_id), Some(parent));

    let product = &documents(store.as_ref(), "products").await[0];
    let option_value = product
        .get_by_path("options.0._id")
        .and_then(|v| v.as_object_id())
        .unwrap();
    let customer = &documents(store.as_ref(), "customers").await[0];

    let cart = &documents(store.as_ref(), "carts").await[0];
    assert_eq!(
        cart.get_by_path("options.0.value").and_then(|v| v.as_object_id()),
        Some(option_value)
    );

    let orders = documents(store.as_ref(), "orders").await;
    assert_eq!(orders.len(), 2);
    let order = orders
        .iter()
        .find(|o| o.get("legacyId").and_then(Value::as_i64) == Some(100))
        .unwrap();
    assert_eq!(order.get("customer").and_then(Value::as_object_id), Some(customer.id));
    assert_eq!(order.get("invoiceNo").and_then(Value::as_str), Some("INV-7"));
    assert_eq!(order.get("status").and_then(Value::as_str), Some("complete"));
    assert_eq!(
        order.get_by_path("products.0.product").and_then(|v| v.as_object_id()),
        Some(product.id)
    );
    assert_eq!(
        order
            .get_by_path("products.0.options.0.productOptionValue")
            .and_then(|v| v.as_object_id()),
        Some(option_value)
    );
    assert_eq!(
        order.get_by_path("history.0.status").and_then(|v| v.as_str().map(str::to_string)),
        Some("pending".to_string())
    );
    assert_eq!(
        order.get_by_path("paymentAddress.country").and_then(|v| v.as_str().map(str::to_string)),
        Some("Iran".to_string())
    );

    let guest = orders
        .iter()
        .find(|o| o.get("legacyId").and_then(Value::as_i64) == Some(101))
        .unwrap();
    assert_eq!(guest.get("customer"), Some(&Value::Null));
    assert_eq!(guest.get("status").and_then(Value::as_str), Some("unknown"));

    let wishlist = &documents(store.as_ref(), "wishlists").await[0];
    assert_eq!(wishlist.get("customer").and_then(Value::as_object_id), Some(customer.id));
}
