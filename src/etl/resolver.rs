//! Dimension key resolution
//!
//! Maps the natural keys carried by order records to the surrogate keys the
//! warehouse assigned to the matching dimension rows.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::error::LookupError;
use crate::source::OrderRecord;

/// The four dimensions an order references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Customer,
    Product,
    Payment,
    Date,
}

impl Dimension {
    pub const ALL: [Dimension; 4] = [
        Dimension::Customer,
        Dimension::Product,
        Dimension::Payment,
        Dimension::Date,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            Dimension::Customer => "dim_customer",
            Dimension::Product => "dim_product",
            Dimension::Payment => "dim_payment",
            Dimension::Date => "dim_date",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Customer => "customer",
            Dimension::Product => "product",
            Dimension::Payment => "payment",
            Dimension::Date => "date",
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Surrogate keys of every dimension row an order references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedKeys {
    pub customer_key: i64,
    pub product_key: i64,
    pub payment_key: i64,
    pub date_key: i32,
}

/// Natural key to surrogate key lookup
pub trait KeyResolver {
    fn resolve(&self, dimension: Dimension, natural_key: &str) -> Result<i64, LookupError>;

    /// Resolve all four references of an order, failing on the first miss
    fn resolve_order(&self, order: &OrderRecord) -> Result<ResolvedKeys, LookupError> {
        let date_natural = order.order_date_key();
        let date_key = self.resolve(Dimension::Date, &date_natural)?;
        let date_key = i32::try_from(date_key).map_err(|_| LookupError::InvalidKey {
            dimension: Dimension::Date,
            natural_key: date_natural,
        })?;

        Ok(ResolvedKeys {
            customer_key: self.resolve(Dimension::Customer, &order.customer_id)?,
            product_key: self.resolve(Dimension::Product, &order.product_id)?,
            payment_key: self.resolve(Dimension::Payment, &order.payment_method)?,
            date_key,
        })
    }
}

/// In-memory snapshot of the dimension keys, read once after the dimension load
#[derive(Debug, Default, Clone)]
pub struct SurrogateKeyMap {
    keys: HashMap<Dimension, HashMap<String, i64>>,
}

impl SurrogateKeyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key. Returns false and keeps the first key if the natural key
    /// was already mapped.
    pub fn insert(&mut self, dimension: Dimension, natural_key: impl Into<String>, key: i64) -> bool {
        let entries = self.keys.entry(dimension).or_default();
        match entries.entry(natural_key.into()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(key);
                true
            }
        }
    }

    pub fn len(&self, dimension: Dimension) -> usize {
        self.keys.get(&dimension).map(HashMap::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.values().all(HashMap::is_empty)
    }
}

impl KeyResolver for SurrogateKeyMap {
    fn resolve(&self, dimension: Dimension, natural_key: &str) -> Result<i64, LookupError> {
        self.keys
            .get(&dimension)
            .and_then(|entries| entries.get(natural_key))
            .copied()
            .ok_or_else(|| LookupError::Missing {
                dimension,
                natural_key: natural_key.to_string(),
            })
    }
}

#[cfg(feature = "database")]
impl SurrogateKeyMap {
    /// Read the current natural/surrogate key pairs of all four dimensions
    pub async fn load(conn: &mut sqlx::PgConnection) -> Result<Self, sqlx::Error> {
        let mut map = Self::new();
        let mut repo = crate::database::DimensionRepository::new(conn);
        for dimension in Dimension::ALL {
            for (natural_key, key) in repo.fetch_keys(dimension).await? {
                map.insert(dimension, natural_key, key);
            }
        }
        tracing::info!(
            "Fetched surrogate key mappings: {} customers, {} products, {} payment methods, {} dates",
            map.len(Dimension::Customer),
            map.len(Dimension::Product),
            map.len(Dimension::Payment),
            map.len(Dimension::Date)
        );
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn order(customer: &str) -> OrderRecord {
        OrderRecord {
            order_id: "O1".into(),
            customer_id: customer.into(),
            product_id: "P1".into(),
            payment_method: "card".into(),
            order_date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            quantity: 1,
            price: Decimal::new(1000, 2),
            discount: Decimal::ZERO,
            total_amount: Decimal::new(1000, 2),
        }
    }

    fn populated() -> SurrogateKeyMap {
        let mut map = SurrogateKeyMap::new();
        map.insert(Dimension::Customer, "C1", 1);
        map.insert(Dimension::Product, "P1", 7);
        map.insert(Dimension::Payment, "card", 3);
        map.insert(Dimension::Date, "2024-03-15", 20240315);
        map
    }

    #[test]
    fn test_resolves_customer_to_surrogate_key() {
        let keys = populated().resolve_order(&order("C1")).unwrap();
        assert_eq!(
            keys,
            ResolvedKeys {
                customer_key: 1,
                product_key: 7,
                payment_key: 3,
                date_key: 20240315,
            }
        );
    }

    #[test]
    fn test_unknown_natural_key_is_lookup_error() {
        let err = populated().resolve_order(&order("C404")).unwrap_err();
        assert_eq!(
            err,
            LookupError::Missing {
                dimension: Dimension::Customer,
                natural_key: "C404".into(),
            }
        );
    }

    #[test]
    fn test_missing_date_row() {
        let mut map = populated();
        map.keys.get_mut(&Dimension::Date).unwrap().clear();
        let err = map.resolve_order(&order("C1")).unwrap_err();
        assert!(matches!(err, LookupError::Missing { dimension: Dimension::Date, .. }));
    }

    #[test]
    fn test_first_key_wins() {
        let mut map = SurrogateKeyMap::new();
        assert!(map.insert(Dimension::Payment, "card", 1));
        assert!(!map.insert(Dimension::Payment, "card", 2));
        assert_eq!(map.resolve(Dimension::Payment, "card"), Ok(1));
        assert_eq!(map.len(Dimension::Payment), 1);
    }
}
