//! Analytical queries over the star schema
//!
//! A fixed catalogue of read-only aggregates joining `fact_orders` to its
//! dimensions by surrogate key. Results come back as a [`ReportTable`] so the
//! CLI can print any of them the same way.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use tracing::info;

/// The available analytic queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyticQuery {
    RevenueByCategory,
    MonthlyRevenue,
    PaymentMix,
    TopCustomers,
    QuarterlyBrand,
}

impl AnalyticQuery {
    pub const ALL: [AnalyticQuery; 5] = [
        AnalyticQuery::RevenueByCategory,
        AnalyticQuery::MonthlyRevenue,
        AnalyticQuery::PaymentMix,
        AnalyticQuery::TopCustomers,
        AnalyticQuery::QuarterlyBrand,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AnalyticQuery::RevenueByCategory => "revenue-by-category",
            AnalyticQuery::MonthlyRevenue => "monthly-revenue",
            AnalyticQuery::PaymentMix => "payment-mix",
            AnalyticQuery::TopCustomers => "top-customers",
            AnalyticQuery::QuarterlyBrand => "quarterly-brand",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AnalyticQuery::RevenueByCategory => "Revenue by product category",
            AnalyticQuery::MonthlyRevenue => "Revenue by month",
            AnalyticQuery::PaymentMix => "Orders by payment method",
            AnalyticQuery::TopCustomers => "Top customers by revenue",
            AnalyticQuery::QuarterlyBrand => "Brand revenue by quarter",
        }
    }
}

impl fmt::Display for AnalyticQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AnalyticQuery {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        AnalyticQuery::ALL
            .into_iter()
            .find(|q| q.name() == s)
            .ok_or_else(|| {
                let names: Vec<_> = AnalyticQuery::ALL.iter().map(|q| q.name()).collect();
                format!("unknown query '{}', expected one of: {}", s, names.join(", "))
            })
    }
}

/// Column-oriented result of one analytic query
#[derive(Debug, Clone, Serialize)]
pub struct ReportTable {
    pub query: String,
    pub title: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ReportTable {
    fn new(query: AnalyticQuery, columns: &[&str]) -> Self {
        Self {
            query: query.name().to_string(),
            title: query.title().to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }
}

impl fmt::Display for ReportTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut widths: Vec<usize> = self.columns.iter().map(String::len).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(cell.len());
                }
            }
        }

        writeln!(f, "{}", self.title)?;
        let header: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", c, width = *w))
            .collect();
        writeln!(f, "{}", header.join("  "))?;
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        writeln!(f, "{}", rule.join("  "))?;
        for row in &self.rows {
            let cells: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{:<width$}", c, width = *w))
                .collect();
            writeln!(f, "{}", cells.join("  "))?;
        }
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct CategoryRevenue {
    category: String,
    units: i64,
    revenue: Decimal,
}

#[derive(Debug, FromRow)]
struct MonthRevenue {
    year: i32,
    month: i32,
    orders: i64,
    revenue: Decimal,
}

#[derive(Debug, FromRow)]
struct PaymentShare {
    payment_method: String,
    orders: i64,
    revenue: Decimal,
}

#[derive(Debug, FromRow)]
struct CustomerRevenue {
    customer_id: String,
    name: String,
    orders: i64,
    revenue: Decimal,
}

#[derive(Debug, FromRow)]
struct BrandQuarter {
    brand: String,
    year: i32,
    quarter: i32,
    revenue: Decimal,
}

/// Runs analytic queries against the warehouse
pub struct AnalyticsService {
    pool: PgPool,
}

impl AnalyticsService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Execute one query. `limit` applies to `top-customers` (default 10).
    pub async fn run(&self, query: AnalyticQuery, limit: Option<i64>) -> Result<ReportTable> {
        info!("Running analytic query {}", query);
        match query {
            AnalyticQuery::RevenueByCategory => self.revenue_by_category().await,
            AnalyticQuery::MonthlyRevenue => self.monthly_revenue().await,
            AnalyticQuery::PaymentMix => self.payment_mix().await,
            AnalyticQuery::TopCustomers => self.top_customers(limit.unwrap_or(10)).await,
            AnalyticQuery::QuarterlyBrand => self.quarterly_brand().await,
        }
    }

    async fn revenue_by_category(&self) -> Result<ReportTable> {
        let rows = sqlx::query_as::<_, CategoryRevenue>(
            r#"SELECT COALESCE(p.category, 'Uncategorised') AS category,
                      SUM(f.quantity)::bigint AS units,
                      SUM(f.total_amount) AS revenue
               FROM fact_orders f
               JOIN dim_product p ON p.product_key = f.product_key
               GROUP BY 1
               ORDER BY revenue DESC"#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to query revenue by category")?;

        let mut table = ReportTable::new(
            AnalyticQuery::RevenueByCategory,
            &["category", "units", "revenue"],
        );
        table.rows = rows
            .into_iter()
            .map(|r| vec![r.category, r.units.to_string(), r.revenue.to_string()])
            .collect();
        Ok(table)
    }

    async fn monthly_revenue(&self) -> Result<ReportTable> {
        let rows = sqlx::query_as::<_, MonthRevenue>(
            r#"SELECT d.year, d.month,
                      COUNT(*) AS orders,
                      SUM(f.total_amount) AS revenue
               FROM fact_orders f
               JOIN dim_date d ON d.date_key = f.date_key
               GROUP BY d.year, d.month
               ORDER BY d.year, d.month"#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to query monthly revenue")?;

        let mut table = ReportTable::new(
            AnalyticQuery::MonthlyRevenue,
            &["month", "orders", "revenue"],
        );
        table.rows = rows
            .into_iter()
            .map(|r| {
                vec![
                    format!("{}-{:02}", r.year, r.month),
                    r.orders.to_string(),
                    r.revenue.to_string(),
                ]
            })
            .collect();
        Ok(table)
    }

    async fn payment_mix(&self) -> Result<ReportTable> {
        let rows = sqlx::query_as::<_, PaymentShare>(
            r#"SELECT m.payment_method,
                      COUNT(*) AS orders,
                      SUM(f.total_amount) AS revenue
               FROM fact_orders f
               JOIN dim_payment m ON m.payment_key = f.payment_key
               GROUP BY m.payment_method
               ORDER BY orders DESC, m.payment_method"#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to query payment mix")?;

        let mut table = ReportTable::new(
            AnalyticQuery::PaymentMix,
            &["payment_method", "orders", "revenue"],
        );
        table.rows = rows
            .into_iter()
            .map(|r| vec![r.payment_method, r.orders.to_string(), r.revenue.to_string()])
            .collect();
        Ok(table)
    }

    async fn top_customers(&self, limit: i64) -> Result<ReportTable> {
        let rows = sqlx::query_as::<_, CustomerRevenue>(
            r#"SELECT c.customer_id, c.name,
                      COUNT(*) AS orders,
                      SUM(f.total_amount) AS revenue
               FROM fact_orders f
               JOIN dim_customer c ON c.customer_key = f.customer_key
               GROUP BY c.customer_id, c.name
               ORDER BY revenue DESC, c.customer_id
               LIMIT $1"#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to query top customers")?;

        let mut table = ReportTable::new(
            AnalyticQuery::TopCustomers,
            &["customer_id", "name", "orders", "revenue"],
        );
        table.rows = rows
            .into_iter()
            .map(|r| {
                vec![
                    r.customer_id,
                    r.name,
                    r.orders.to_string(),
                    r.revenue.to_string(),
                ]
            })
            .collect();
        Ok(table)
    }

    async fn quarterly_brand(&self) -> Result<ReportTable> {
        let rows = sqlx::query_as::<_, BrandQuarter>(
            r#"SELECT COALESCE(p.brand, 'Unbranded') AS brand,
                      d.year, d.quarter,
                      SUM(f.total_amount) AS revenue
               FROM fact_orders f
               JOIN dim_product p ON p.product_key = f.product_key
               JOIN dim_date d ON d.date_key = f.date_key
               GROUP BY 1, d.year, d.quarter
               ORDER BY d.year, d.quarter, revenue DESC"#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to query brand revenue by quarter")?;

        let mut table = ReportTable::new(
            AnalyticQuery::QuarterlyBrand,
            &["brand", "quarter", "revenue"],
        );
        table.rows = rows
            .into_iter()
            .map(|r| {
                vec![
                    r.brand,
                    format!("{}-Q{}", r.year, r.quarter),
                    r.revenue.to_string(),
                ]
            })
            .collect();
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_names_round_trip() {
        for query in AnalyticQuery::ALL {
            assert_eq!(query.name().parse::<AnalyticQuery>(), Ok(query));
        }
        let err = "revenue".parse::<AnalyticQuery>().unwrap_err();
        assert!(err.contains("top-customers"));
    }

    #[test]
    fn test_report_table_aligns_columns() {
        let mut table = ReportTable::new(AnalyticQuery::PaymentMix, &["payment_method", "orders"]);
        table.rows.push(vec!["card".into(), "12".into()]);
        table.rows.push(vec!["bank_transfer_long".into(), "3".into()]);

        let text = table.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Orders by payment method");
        assert!(lines[1].starts_with("payment_method    "));
        assert_eq!(lines[3], format!("{:<18}  {:<6}", "card", "12"));
    }
}
