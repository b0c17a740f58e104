//! Dimension repository: inserts and key lookups for the four dimension tables
//!
//! Inserts are append-only. A natural key that is already present keeps its
//! existing row and surrogate key; the insert reports `false` instead.

use sqlx::PgConnection;

use crate::etl::resolver::Dimension;
use crate::source::{CalendarDate, CustomerRecord, PaymentRecord, ProductRecord};

pub struct DimensionRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> DimensionRepository<'c> {
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }

    pub async fn insert_customer(&mut self, customer: &CustomerRecord) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"INSERT INTO dim_customer (customer_id, name, email, phone, city, signup_date)
               VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (customer_id) DO NOTHING"#,
        )
        .bind(&customer.customer_id)
        .bind(&customer.name)
        .bind(&customer.email)
        .bind(&customer.phone)
        .bind(&customer.city)
        .bind(customer.signup_date)
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_product(&mut self, product: &ProductRecord) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"INSERT INTO dim_product (product_id, product_name, category, brand, price)
               VALUES ($1, $2, $3, $4, $5)
               ON CONFLICT (product_id) DO NOTHING"#,
        )
        .bind(&product.product_id)
        .bind(&product.product_name)
        .bind(&product.category)
        .bind(&product.brand)
        .bind(product.price)
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_payment(&mut self, payment: &PaymentRecord) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"INSERT INTO dim_payment (payment_method)
               VALUES ($1)
               ON CONFLICT (payment_method) DO NOTHING"#,
        )
        .bind(&payment.payment_method)
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn insert_date(&mut self, date: &CalendarDate) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"INSERT INTO dim_date (date_key, full_date, year, month, day, quarter)
               VALUES ($1, $2, $3, $4, $5, $6)
               ON CONFLICT (date_key) DO NOTHING"#,
        )
        .bind(date.date_key)
        .bind(date.full_date)
        .bind(date.year)
        .bind(date.month)
        .bind(date.day)
        .bind(date.quarter)
        .execute(&mut *self.conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All `(natural key, surrogate key)` pairs of one dimension
    pub async fn fetch_keys(&mut self, dimension: Dimension) -> Result<Vec<(String, i64)>, sqlx::Error> {
        let sql = match dimension {
            Dimension::Customer => "SELECT customer_id, customer_key FROM dim_customer",
            Dimension::Product => "SELECT product_id, product_key FROM dim_product",
            Dimension::Payment => "SELECT payment_method, payment_key FROM dim_payment",
            Dimension::Date => {
                "SELECT to_char(full_date, 'YYYY-MM-DD'), date_key::bigint FROM dim_date"
            }
        };
        sqlx::query_as::<_, (String, i64)>(sql)
            .fetch_all(&mut *self.conn)
            .await
    }

    pub async fn count(&mut self, dimension: Dimension) -> Result<i64, sqlx::Error> {
        let sql = format!("SELECT COUNT(*) FROM {}", dimension.table());
        sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&mut *self.conn)
            .await
    }
}
