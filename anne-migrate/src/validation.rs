//! Post-phase verification
//!
//! Customers, products and orders must match the source exactly. Wishlists
//! tolerate dropped items down to a configured success rate. Everything else
//! is compared and reported without failing the phase.

use crate::entities::Entity;
use crate::error::MigrateError;
use crate::models;
use crate::source::SourceStore;
use anne_core::config::VerificationSettings;
use anne_core::{DocumentStore, MigrationLog};
use std::collections::HashSet;

/// Source and destination counts for one verified entity
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationReport {
    pub entity: Entity,
    pub source_count: u64,
    pub destination_count: u64,
}

/// How strictly an entity is verified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// Counts must match
    Critical,
    /// Ratio of migrated to source items must reach the configured rate
    Tolerant,
    /// Reported only
    Informational,
}

impl Strictness {
    pub fn of(entity: Entity) -> Self {
        match entity {
            Entity::Customers | Entity::Products | Entity::Orders => Strictness::Critical,
            Entity::Wishlists => Strictness::Tolerant,
            _ => Strictness::Informational,
        }
    }
}

pub struct Verifier<'a> {
    source: &'a dyn SourceStore,
    store: &'a dyn DocumentStore,
    settings: &'a VerificationSettings,
    log: &'a MigrationLog,
}

impl<'a> Verifier<'a> {
    pub fn new(
        source: &'a dyn SourceStore,
        store: &'a dyn DocumentStore,
        settings: &'a VerificationSettings,
        log: &'a MigrationLog,
    ) -> Self {
        Self {
            source,
            store,
            settings,
            log,
        }
    }

    /// Verify the entities of a phase, stopping at the first failure
    pub async fn verify_all(
        &self,
        entities: &[Entity],
    ) -> Result<Vec<VerificationReport>, MigrateError> {
        let mut reports = Vec::with_capacity(entities.len());
        for entity in entities {
            reports.push(self.verify(*entity).await?);
        }
        Ok(reports)
    }

    pub async fn verify(&self, entity: Entity) -> Result<VerificationReport, MigrateError> {
        match Strictness::of(entity) {
            Strictness::Critical => self.verify_exact(entity).await,
            Strictness::Tolerant => self.verify_wishlists().await,
            Strictness::Informational => {
                let report = self.counts(entity).await?;
                if report.source_count == report.destination_count {
                    self.log.info(format!(
                        "{entity}: {} of {} migrated",
                        report.destination_count, report.source_count
                    ));
                } else {
                    self.log.warn(format!(
                        "{entity}: {} of {} migrated",
                        report.destination_count, report.source_count
                    ));
                }
                Ok(report)
            }
        }
    }

    async fn counts(&self, entity: Entity) -> Result<VerificationReport, MigrateError> {
        Ok(VerificationReport {
            entity,
            source_count: self.source.count(entity.source_table()).await?,
            destination_count: self.store.count(entity.collection()).await?,
        })
    }

    async fn verify_exact(&self, entity: Entity) -> Result<VerificationReport, MigrateError> {
        let report = self.counts(entity).await?;
        ensure_equal(entity.name(), report.source_count, report.destination_count)?;

        if entity == Entity::Customers {
            let (source_addresses, migrated_addresses) = self.address_counts().await?;
            ensure_equal("addresses", source_addresses, migrated_addresses)?;
            self.log.info(format!(
                "addresses verified: {migrated_addresses} of {source_addresses}"
            ));
        }

        self.log.info(format!(
            "{entity} verified: {} of {}",
            report.destination_count, report.source_count
        ));
        Ok(report)
    }

    /// Source address rows and the addresses embedded in migrated customers.
    /// Addresses of unknown customers stay in the source count, so they
    /// surface as a mismatch.
    async fn address_counts(&self) -> Result<(u64, u64), MigrateError> {
        let customers: HashSet<i64> = self
            .source
            .select_all("customer", &["customer_id"])
            .await?
            .iter()
            .map(|row| row.int_or("customer_id", 0))
            .collect();
        let addresses = self.source.select_all("address", &["address_id"]).await?;
        let orphans = addresses
            .iter()
            .filter(|row| !customers.contains(&row.int_or("customer_id", 0)))
            .count();
        if orphans > 0 {
            self.log.warn(format!(
                "{orphans} source addresses belong to no customer"
            ));
        }

        let migrated = self
            .store
            .count_embedded(models::CUSTOMERS, "addresses")
            .await?;
        Ok((addresses.len() as u64, migrated))
    }

    async fn verify_wishlists(&self) -> Result<VerificationReport, MigrateError> {
        let source_count = self.source.count(Entity::Wishlists.source_table()).await?;
        let migrated = self
            .store
            .count_embedded(models::WISHLISTS, "products")
            .await?;
        let report = VerificationReport {
            entity: Entity::Wishlists,
            source_count,
            destination_count: migrated,
        };

        if source_count == 0 {
            self.log.info("wishlists: source is empty, nothing to verify");
            return Ok(report);
        }

        let rate = migrated as f64 / source_count as f64;
        let threshold = self.settings.wishlist_min_success_rate;
        if rate < threshold {
            return Err(MigrateError::WishlistBelowThreshold {
                migrated,
                source_count,
                rate: rate * 100.0,
                threshold: threshold * 100.0,
            });
        }
        if migrated < source_count {
            self.log.warn(format!(
                "wishlists: {migrated} of {source_count} items migrated ({:.1}%)",
                rate * 100.0
            ));
        } else {
            self.log.info(format!("wishlists verified: {migrated} of {source_count} items"));
        }
        Ok(report)
    }
}

fn ensure_equal(entity: &str, source_count: u64, destination_count: u64) -> Result<(), MigrateError> {
    if source_count != destination_count {
        return Err(MigrateError::CountMismatch {
            entity: entity.to_string(),
            source_count,
            destination_count,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{DumpSource, SourceRow};
    use anne_core::{Document, LocalStore, ObjectId};

    fn wishlist_rows(n: i64) -> Vec<SourceRow> {
        (1..=n)
            .map(|i| SourceRow::new().set("customer_id", 1).set("product_id", i))
            .collect()
    }

    async fn store_wishlist(store: &LocalStore, items: usize) {
        let products: Vec<ObjectId> = (0..items).map(|_| ObjectId::new()).collect();
        let doc = Document::new()
            .field("legacyId", 1i64)
            .field("customer", ObjectId::new())
            .field(
                "products",
                products.into_iter().map(Into::into).collect::<Vec<anne_core::Value>>(),
            );
        store.insert_many(models::WISHLISTS, vec![doc]).await.unwrap();
    }

    #[tokio::test]
    async fn test_customer_count_mismatch_fails() {
        let source = DumpSource::new("oc_")
            .with_table(
                "customer",
                (1..=3).map(|i| SourceRow::new().set("customer_id", i)).collect(),
            )
            .with_table("address", vec![]);
        let store = LocalStore::in_memory();
        store
            .insert_many(
                models::CUSTOMERS,
                vec![Document::new().field("addresses", Vec::<anne_core::Value>::new())],
            )
            .await
            .unwrap();

        let settings = VerificationSettings::default();
        let log = MigrationLog::console("phase3");
        let result = Verifier::new(&source, &store, &settings, &log)
            .verify(Entity::Customers)
            .await;

        assert!(matches!(
            result,
            Err(MigrateError::CountMismatch { source_count: 3, destination_count: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_orphan_addresses_fail_the_address_check() {
        let source = DumpSource::new("oc_")
            .with_table("customer", vec![SourceRow::new().set("customer_id", 1)])
            .with_table(
                "address",
                vec![
                    SourceRow::new().set("address_id", 1).set("customer_id", 1),
                    SourceRow::new().set("address_id", 2).set("customer_id", 99),
                ],
            );
        let store = LocalStore::in_memory();
        let address = anne_core::object([("_id", ObjectId::new().into())]);
        store
            .insert_many(
                models::CUSTOMERS,
                vec![Document::new().field("addresses", vec![address])],
            )
            .await
            .unwrap();

        let settings = VerificationSettings::default();
        let log = MigrationLog::console("phase3");
        let result = Verifier::new(&source, &store, &settings, &log)
            .verify(Entity::Customers)
            .await;
        assert!(matches!(
            result,
            Err(MigrateError::CountMismatch { ref entity, source_count: 2, destination_count: 1 })
                if entity == "addresses"
        ));
    }

    #[tokio::test]
    async fn test_wishlist_tolerance() {
        let settings = VerificationSettings::default();
        let log = MigrationLog::console("phase5");

        for (migrated, passes) in [(100, true), (91, true), (90, true), (85, false)] {
            let source = DumpSource::new("oc_").with_table("customer_wishlist", wishlist_rows(100));
            let store = LocalStore::in_memory();
            store_wishlist(&store, migrated).await;

            let result = Verifier::new(&source, &store, &settings, &log)
                .verify(Entity::Wishlists)
                .await;
            assert_eq!(result.is_ok(), passes, "{migrated} of 100");
        }
    }

    #[tokio::test]
    async fn test_empty_wishlist_source_passes() {
        let source = DumpSource::new("oc_").with_table("customer_wishlist", vec![]);
        let store = LocalStore::in_memory();
        let settings = VerificationSettings::default();
        let log = MigrationLog::console("phase5");

        let report = Verifier::new(&source, &store, &settings, &log)
            .verify(Entity::Wishlists)
            .await
            .unwrap();
        assert_eq!(report.source_count, 0);
    }

    #[tokio::test]
    async fn test_informational_mismatch_does_not_fail() {
        let source = DumpSource::new("oc_").with_table(
            "zone",
            vec![
                SourceRow::new().set("zone_id", 1),
                SourceRow::new().set("zone_id", 2),
            ],
        );
        let store = LocalStore::in_memory();
        let settings = VerificationSettings::default();
        let log = MigrationLog::console("phase1");

        let report = Verifier::new(&source, &store, &settings, &log)
            .verify(Entity::Zones)
            .await
            .unwrap();
        assert_eq!(report.source_count, 2);
        assert_eq!(report.destination_count, 0);
    }
}
