//! Fact assembly and insertion
//!
//! Turns a validated order plus its resolved dimension keys into an immutable
//! `fact_orders` row and appends it to the store.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::etl::resolver::ResolvedKeys;
use crate::source::OrderRecord;

/// `quantity × price − discount`, `None` if the arithmetic overflows.
///
/// Exact for cent amounts, which is all record validation lets through.
pub fn compute_total(quantity: i32, price: Decimal, discount: Decimal) -> Option<Decimal> {
    Decimal::from(quantity).checked_mul(price)?.checked_sub(discount)
}

/// A fully resolved row of the fact table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderFactRow {
    pub order_id: String,
    pub keys: ResolvedKeys,
    pub quantity: i32,
    pub price: Decimal,
    pub discount: Decimal,
    pub total_amount: Decimal,
}

impl OrderFactRow {
    pub fn assemble(order: &OrderRecord, keys: ResolvedKeys) -> Self {
        Self {
            order_id: order.order_id.clone(),
            keys,
            quantity: order.quantity,
            price: order.price,
            discount: order.discount,
            total_amount: order.total_amount,
        }
    }
}

#[cfg(feature = "database")]
pub use store::FactLoader;

#[cfg(feature = "database")]
mod store {
    use sqlx::{Connection, PgConnection};
    use tracing::debug;

    use super::OrderFactRow;
    use crate::database::fact_repository;
    use crate::error::LoadError;
    use crate::etl::resolver::ResolvedKeys;
    use crate::source::OrderRecord;

    /// Appends fact rows on a run's connection, one savepoint per row so a
    /// rejected row leaves the surrounding transaction usable.
    pub struct FactLoader<'c> {
        conn: &'c mut PgConnection,
        inserted: usize,
    }

    impl<'c> FactLoader<'c> {
        pub fn new(conn: &'c mut PgConnection) -> Self {
            Self { conn, inserted: 0 }
        }

        /// Compute the total and insert one row. Returns the new `order_key`.
        pub async fn load(
            &mut self,
            order: &OrderRecord,
            keys: ResolvedKeys,
        ) -> Result<i64, LoadError> {
            let row = OrderFactRow::assemble(order, keys);

            let mut savepoint = self.conn.begin().await?;
            match fact_repository::insert_order_fact(&mut savepoint, &row).await {
                Ok(order_key) => {
                    savepoint.commit().await?;
                    self.inserted += 1;
                    debug!("Inserted order {} as order_key {}", row.order_id, order_key);
                    Ok(order_key)
                }
                Err(e) => {
                    savepoint.rollback().await?;
                    Err(LoadError::from_insert("fact_orders", e))
                }
            }
        }

        pub fn inserted(&self) -> usize {
            self.inserted
        }
    }
}
