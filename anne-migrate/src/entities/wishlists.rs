use crate::context::MigrationContext;
use crate::error::MigrateError;
use crate::loader::{BatchLoader, LoadStats, RowOutcome, Transformed};
use crate::mapping::EntityKind;
use crate::models::{self, LEGACY_ID};
use crate::source::SourceRow;
use anne_core::{Document, MigrationLog, Value};
use std::collections::BTreeMap;

/// One wishlist per customer. Items whose customer or product was not
/// migrated are dropped; a wishlist left without items is not created.
pub(super) async fn load(
    ctx: &mut MigrationContext,
    log: &MigrationLog,
) -> Result<LoadStats, MigrateError> {
    let rows = ctx
        .source
        .select_all("customer_wishlist", &["customer_id", "product_id"])
        .await?;

    let mut by_customer: BTreeMap<i64, Vec<SourceRow>> = BTreeMap::new();
    for row in rows {
        by_customer
            .entry(row.int_or("customer_id", 0))
            .or_default()
            .push(row);
    }
    let schema = models::wishlists();

    BatchLoader::new(ctx.store.as_ref(), &schema, log, ctx.settings.batch_size)
        .run(
            &mut ctx.mappings,
            by_customer.into_iter().collect(),
            |mappings, customer_id, items: &Vec<SourceRow>| {
                let Some(customer) = mappings.get(EntityKind::Customer, customer_id) else {
                    return Ok(RowOutcome::Skip(format!(
                        "customer {customer_id} not found, {} items dropped",
                        items.len()
                    )));
                };

                let mut products = Vec::with_capacity(items.len());
                for item in items {
                    let product_id = item.int_or("product_id", 0);
                    match mappings.get(EntityKind::Product, product_id) {
                        Some(product) if !products.contains(&Value::ObjectId(product)) => {
                            products.push(Value::ObjectId(product))
                        }
                        Some(_) => log.warn(format!(
                            "Wishlist of customer {customer_id}: duplicate product {product_id} dropped"
                        )),
                        None => log.warn(format!(
                            "Wishlist of customer {customer_id}: product {product_id} not found, item dropped"
                        )),
                    }
                }

                if products.is_empty() {
                    return Ok(RowOutcome::Skip(format!(
                        "wishlist of customer {customer_id} has no valid items"
                    )));
                }

                let added: Vec<_> = items.iter().filter_map(|i| i.datetime("date_added")).collect();
                let doc = Document::new()
                    .field(LEGACY_ID, customer_id)
                    .field("customer", customer)
                    .field("products", products)
                    .field("createdAt", added.iter().min().copied())
                    .field("updatedAt", added.iter().max().copied());

                Ok(RowOutcome::Insert(Transformed::new(doc)))
            },
        )
        .await
}
