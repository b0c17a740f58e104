//! Fact repository for `fact_orders`

use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{FromRow, PgConnection};

use crate::etl::fact_loader::OrderFactRow;

/// A stored fact row
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct FactOrderRow {
    pub order_key: i64,
    pub order_id: String,
    pub customer_key: i64,
    pub product_key: i64,
    pub payment_key: i64,
    pub date_key: i32,
    pub quantity: i32,
    pub price: Decimal,
    pub discount: Decimal,
    pub total_amount: Decimal,
}

/// Insert one fact row and return its `order_key`
pub async fn insert_order_fact(
    conn: &mut PgConnection,
    row: &OrderFactRow,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        r#"INSERT INTO fact_orders (
               order_id, customer_key, product_key, payment_key, date_key,
               quantity, price, discount, total_amount
           ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
           RETURNING order_key"#,
    )
    .bind(&row.order_id)
    .bind(row.keys.customer_key)
    .bind(row.keys.product_key)
    .bind(row.keys.payment_key)
    .bind(row.keys.date_key)
    .bind(row.quantity)
    .bind(row.price)
    .bind(row.discount)
    .bind(row.total_amount)
    .fetch_one(conn)
    .await
}

pub async fn list_order_facts(conn: &mut PgConnection) -> Result<Vec<FactOrderRow>, sqlx::Error> {
    sqlx::query_as::<_, FactOrderRow>(
        r#"SELECT order_key, order_id, customer_key, product_key, payment_key, date_key,
                  quantity, price, discount, total_amount
           FROM fact_orders
           ORDER BY order_key"#,
    )
    .fetch_all(conn)
    .await
}

pub async fn count_order_facts(conn: &mut PgConnection) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM fact_orders")
        .fetch_one(conn)
        .await
}

/// Fact rows whose dimension references do not resolve. Always zero while the
/// foreign keys are in place.
pub async fn count_orphaned_facts(conn: &mut PgConnection) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        r#"SELECT COUNT(*)
           FROM fact_orders f
           LEFT JOIN dim_customer c ON c.customer_key = f.customer_key
           LEFT JOIN dim_product p ON p.product_key = f.product_key
           LEFT JOIN dim_payment m ON m.payment_key = f.payment_key
           LEFT JOIN dim_date d ON d.date_key = f.date_key
           WHERE c.customer_key IS NULL
              OR p.product_key IS NULL
              OR m.payment_key IS NULL
              OR d.date_key IS NULL"#,
    )
    .fetch_one(conn)
    .await
}

/// Fact rows whose stored total differs from `quantity × price − discount`
pub async fn count_mismatched_totals(conn: &mut PgConnection) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM fact_orders WHERE total_amount <> quantity * price - discount",
    )
    .fetch_one(conn)
    .await
}
