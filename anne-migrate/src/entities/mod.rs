//! Entity loaders
//!
//! One module per migrated entity. Each reads its source tables, joins them in
//! memory and hands the rows to the shared [`BatchLoader`](crate::loader::BatchLoader).

mod admins;
mod carts;
mod categories;
mod countries;
mod customers;
mod languages;
mod options;
mod orders;
mod products;
mod wishlists;
mod zones;

pub use customers::EmailAssigner;

use crate::context::MigrationContext;
use crate::error::MigrateError;
use crate::loader::LoadStats;
use crate::mapping::EntityKind;
use crate::models;
use crate::source::SourceRow;
use anne_core::{MigrationLog, Schema};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A loader, in the order the full run invokes them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Entity {
    Countries,
    Zones,
    Languages,
    ProductOptions,
    Categories,
    Admins,
    Customers,
    Products,
    Carts,
    Wishlists,
    Orders,
}

impl Entity {
    pub const ALL: [Entity; 11] = [
        Entity::Countries,
        Entity::Zones,
        Entity::Languages,
        Entity::ProductOptions,
        Entity::Categories,
        Entity::Admins,
        Entity::Customers,
        Entity::Products,
        Entity::Carts,
        Entity::Wishlists,
        Entity::Orders,
    ];

    pub fn name(self) -> &'static str {
        self.collection()
    }

    pub fn collection(self) -> &'static str {
        match self {
            Entity::Countries => models::COUNTRIES,
            Entity::Zones => models::ZONES,
            Entity::Languages => models::LANGUAGES,
            Entity::ProductOptions => models::PRODUCT_OPTIONS,
            Entity::Categories => models::CATEGORIES,
            Entity::Admins => models::ADMINS,
            Entity::Customers => models::CUSTOMERS,
            Entity::Products => models::PRODUCTS,
            Entity::Carts => models::CARTS,
            Entity::Wishlists => models::WISHLISTS,
            Entity::Orders => models::ORDERS,
        }
    }

    pub fn schema(self) -> Schema {
        match self {
            Entity::Countries => models::countries(),
            Entity::Zones => models::zones(),
            Entity::Languages => models::languages(),
            Entity::ProductOptions => models::product_options(),
            Entity::Categories => models::categories(),
            Entity::Admins => models::admins(),
            Entity::Customers => models::customers(),
            Entity::Products => models::products(),
            Entity::Carts => models::carts(),
            Entity::Wishlists => models::wishlists(),
            Entity::Orders => models::orders(),
        }
    }

    /// Main source table, used for verification counts
    pub fn source_table(self) -> &'static str {
        match self {
            Entity::Countries => "country",
            Entity::Zones => "zone",
            Entity::Languages => "language",
            Entity::ProductOptions => "option",
            Entity::Categories => "category",
            Entity::Admins => "user",
            Entity::Customers => "customer",
            Entity::Products => "product",
            Entity::Carts => "cart",
            Entity::Wishlists => "customer_wishlist",
            Entity::Orders => "order",
        }
    }

    /// Mappings this loader records
    pub fn produces(self) -> &'static [EntityKind] {
        match self {
            Entity::Countries => &[EntityKind::Country],
            Entity::Zones => &[EntityKind::Zone],
            Entity::Languages => &[EntityKind::Language],
            Entity::ProductOptions => &[EntityKind::ProductOption],
            Entity::Categories => &[EntityKind::Category],
            Entity::Customers => &[EntityKind::Customer],
            Entity::Products => &[EntityKind::Product, EntityKind::ProductOptionValue],
            Entity::Admins | Entity::Carts | Entity::Wishlists | Entity::Orders => &[],
        }
    }

    /// Mappings this loader reads
    pub fn dependencies(self) -> &'static [EntityKind] {
        match self {
            Entity::Countries | Entity::Languages | Entity::Admins => &[],
            Entity::Zones => &[EntityKind::Country],
            Entity::ProductOptions | Entity::Categories => &[EntityKind::Language],
            Entity::Customers => &[EntityKind::Country, EntityKind::Zone, EntityKind::Language],
            Entity::Products => &[
                EntityKind::Language,
                EntityKind::Category,
                EntityKind::ProductOption,
            ],
            Entity::Carts => &[
                EntityKind::Customer,
                EntityKind::Product,
                EntityKind::ProductOptionValue,
            ],
            Entity::Wishlists => &[EntityKind::Customer, EntityKind::Product],
            Entity::Orders => &[
                EntityKind::Customer,
                EntityKind::Product,
                EntityKind::ProductOptionValue,
                EntityKind::Language,
            ],
        }
    }

    /// Run this entity's load
    pub async fn load(
        self,
        ctx: &mut MigrationContext,
        log: &MigrationLog,
    ) -> Result<LoadStats, MigrateError> {
        match self {
            Entity::Countries => countries::load(ctx, log).await,
            Entity::Zones => zones::load(ctx, log).await,
            Entity::Languages => languages::load(ctx, log).await,
            Entity::ProductOptions => options::load(ctx, log).await,
            Entity::Categories => categories::load(ctx, log).await,
            Entity::Admins => admins::load(ctx, log).await,
            Entity::Customers => customers::load(ctx, log).await,
            Entity::Products => products::load(ctx, log).await,
            Entity::Carts => carts::load(ctx, log).await,
            Entity::Wishlists => wishlists::load(ctx, log).await,
            Entity::Orders => orders::load(ctx, log).await,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pair each row with its primary key
fn keyed(rows: Vec<SourceRow>, pk: &str) -> Vec<(i64, SourceRow)> {
    rows.into_iter().map(|row| (row.int_or(pk, 0), row)).collect()
}

/// Group rows by a foreign key, keeping source order within a group
fn group_by(rows: Vec<SourceRow>, column: &str) -> HashMap<i64, Vec<SourceRow>> {
    let mut groups: HashMap<i64, Vec<SourceRow>> = HashMap::new();
    for row in rows {
        groups.entry(row.int_or(column, 0)).or_default().push(row);
    }
    groups
}

/// Description rows keyed by `key`, preferring `language_id` and falling back
/// to the first other language found
fn descriptions(rows: Vec<SourceRow>, key: &str, language_id: i64) -> HashMap<i64, SourceRow> {
    let mut chosen: BTreeMap<i64, SourceRow> = BTreeMap::new();
    for row in rows {
        let id = row.int_or(key, 0);
        let preferred = row.int_or("language_id", 0) == language_id;
        match chosen.get(&id) {
            Some(existing) if existing.int_or("language_id", 0) == language_id => {}
            Some(_) if !preferred => {}
            _ => {
                chosen.insert(id, row);
            }
        }
    }
    chosen.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_dependency_is_produced_somewhere() {
        let produced: HashSet<EntityKind> = Entity::ALL
            .iter()
            .flat_map(|e| e.produces().iter().copied())
            .collect();
        for entity in Entity::ALL {
            for dep in entity.dependencies() {
                assert!(produced.contains(dep), "{entity} depends on unproduced {dep}");
            }
        }
    }

    #[test]
    fn test_descriptions_prefer_language() {
        let rows = vec![
            SourceRow::new().set("category_id", 1).set("language_id", 2).set("name", "Stickerei"),
            SourceRow::new().set("category_id", 1).set("language_id", 1).set("name", "Embroidery"),
            SourceRow::new().set("category_id", 2).set("language_id", 2).set("name", "Nur Deutsch"),
        ];
        let chosen = descriptions(rows, "category_id", 1);
        assert_eq!(chosen[&1].text("name"), "Embroidery");
        assert_eq!(chosen[&2].text("name"), "Nur Deutsch");
    }
}
