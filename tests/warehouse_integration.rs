//! Warehouse load integration tests
//!
//! These tests run full loads against a live PostgreSQL and check the
//! warehouse invariants: one dimension row per natural key, one fact row per
//! accepted order, correct totals, no orphaned facts, and a repeatable reload.
//!
//! Each test works in its own throwaway schema. Run with:
//!   TEST_DATABASE_URL=postgresql:///etl_test cargo test --test warehouse_integration -- --ignored

#[cfg(feature = "database")]
mod warehouse_tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::str::FromStr;
    use std::time::{SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use rust_decimal::Decimal;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use sqlx::PgPool;
    use tempfile::TempDir;

    use star_etl::database::{fact_repository, DimensionRepository, Warehouse};
    use chrono::NaiveDate;
    use star_etl::etl::{Dimension, FactLoader, LoadOptions, Pipeline, RejectionStage, ResolvedKeys};
    use star_etl::{EtlError, LoadError, OrderRecord};

    // =========================================================================
    // TEST INFRASTRUCTURE
    // =========================================================================

    struct TestDb {
        admin: PgPool,
        warehouse: Warehouse,
        schema: String,
    }

    impl TestDb {
        async fn new() -> Result<Self> {
            let url = std::env::var("TEST_DATABASE_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .unwrap_or_else(|_| "postgresql:///etl_test".into());

            let nanos = SystemTime::now().duration_since(UNIX_EPOCH)?.subsec_nanos();
            let schema = format!("etl_test_{}_{}", std::process::id(), nanos);

            let admin = PgPool::connect(&url).await?;
            sqlx::query(&format!("CREATE SCHEMA {}", schema))
                .execute(&admin)
                .await?;

            let options =
                PgConnectOptions::from_str(&url)?.options([("search_path", schema.as_str())]);
            let pool = PgPoolOptions::new()
                .max_connections(2)
                .connect_with(options)
                .await?;

            let warehouse = Warehouse::from_pool(pool);
            warehouse.apply_schema().await?;

            Ok(Self {
                admin,
                warehouse,
                schema,
            })
        }

        async fn count(&self, dimension: Dimension) -> Result<i64> {
            let mut conn = self.warehouse.pool().acquire().await?;
            Ok(DimensionRepository::new(&mut conn).count(dimension).await?)
        }

        async fn fact_count(&self) -> Result<i64> {
            let mut conn = self.warehouse.pool().acquire().await?;
            Ok(fact_repository::count_order_facts(&mut conn).await?)
        }

        async fn cleanup(self) -> Result<()> {
            self.warehouse.close().await;
            sqlx::query(&format!("DROP SCHEMA {} CASCADE", self.schema))
                .execute(&self.admin)
                .await?;
            Ok(())
        }
    }

    fn sample_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data")
    }

    /// Copy the sample data into a temp dir, replacing the given files
    fn data_dir_with(overrides: &[(&str, &str)]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for entry in fs::read_dir(sample_dir()).unwrap() {
            let path = entry.unwrap().path();
            fs::copy(&path, dir.path().join(path.file_name().unwrap())).unwrap();
        }
        for (name, content) in overrides {
            fs::write(dir.path().join(name), content).unwrap();
        }
        dir
    }

    async fn load(db: &TestDb, dir: &Path, options: LoadOptions) -> Result<star_etl::LoadReport, EtlError> {
        Pipeline::new(&db.warehouse, options).run(dir).await
    }

    // =========================================================================
    // TESTS
    // =========================================================================

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_full_load_counts_and_integrity() -> Result<()> {
        let db = TestDb::new().await?;

        let report = load(&db, &sample_dir(), LoadOptions::default()).await?;
        assert!(report.is_clean(), "{:?}", report.rejections);
        assert_eq!(report.orders.inserted, 8);

        assert_eq!(db.count(Dimension::Customer).await?, 5);
        assert_eq!(db.count(Dimension::Product).await?, 5);
        assert_eq!(db.count(Dimension::Payment).await?, 4);
        assert_eq!(db.count(Dimension::Date).await?, 6);
        assert_eq!(db.fact_count().await?, 8);

        let mut conn = db.warehouse.pool().acquire().await?;
        assert_eq!(fact_repository::count_orphaned_facts(&mut conn).await?, 0);
        assert_eq!(fact_repository::count_mismatched_totals(&mut conn).await?, 0);

        for fact in fact_repository::list_order_facts(&mut conn).await? {
            assert_eq!(
                fact.total_amount,
                Decimal::from(fact.quantity) * fact.price - fact.discount
            );
        }
        drop(conn);

        db.cleanup().await
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_order_resolves_to_customer_surrogate_key() -> Result<()> {
        let db = TestDb::new().await?;
        load(&db, &sample_dir(), LoadOptions::default()).await?;

        let (customer_key,): (i64,) =
            sqlx::query_as("SELECT customer_key FROM dim_customer WHERE customer_id = 'C1'")
                .fetch_one(db.warehouse.pool())
                .await?;
        let fact_customer: Option<i64> =
            sqlx::query_scalar("SELECT customer_key FROM fact_orders WHERE order_id = 'O1001'")
                .fetch_one(db.warehouse.pool())
                .await?;
        assert_eq!(fact_customer, Some(customer_key));

        db.cleanup().await
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_reload_is_repeatable() -> Result<()> {
        let db = TestDb::new().await?;

        load(&db, &sample_dir(), LoadOptions::default()).await?;
        let mut conn = db.warehouse.pool().acquire().await?;
        let first = fact_repository::list_order_facts(&mut conn).await?;
        drop(conn);

        load(&db, &sample_dir(), LoadOptions::default()).await?;
        let mut conn = db.warehouse.pool().acquire().await?;
        let second = fact_repository::list_order_facts(&mut conn).await?;
        drop(conn);

        assert_eq!(db.count(Dimension::Customer).await?, 5);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.order_key, b.order_key);
            assert_eq!(a.customer_key, b.customer_key);
            assert_eq!(a.total_amount, b.total_amount);
        }

        db.cleanup().await
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_unresolved_reference_rejects_only_that_order() -> Result<()> {
        let db = TestDb::new().await?;
        let dir = data_dir_with(&[(
            "fact_orders.csv",
            "order_id,customer_id,product_id,payment_method,order_date,quantity,price,discount\n\
             O1,C1,P1,card,2024-01-05,1,24.99,0\n\
             O2,C99,P1,card,2024-01-05,1,24.99,0\n\
             O3,C2,P1,crypto,2024-01-05,1,24.99,0\n\
             O4,C2,P2,card,2024-01-05,1,89.00,0\n",
        )]);

        let report = load(&db, dir.path(), LoadOptions::default()).await?;
        assert_eq!(report.orders.inserted, 2);
        assert_eq!(report.orders.rejected, 2);
        assert_eq!(report.rejections.len(), 2);
        assert!(report
            .rejections
            .iter()
            .all(|r| r.stage == RejectionStage::Lookup));
        assert_eq!(report.rejections[0].natural_key.as_deref(), Some("O2"));
        assert_eq!(report.rejections[0].line, Some(3));
        assert_eq!(db.fact_count().await?, 2);

        db.cleanup().await
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_duplicate_order_id_is_constraint_rejection() -> Result<()> {
        let db = TestDb::new().await?;
        let dir = data_dir_with(&[(
            "fact_orders.csv",
            "order_id,customer_id,product_id,payment_method,order_date,quantity,price,discount\n\
             O1,C1,P1,card,2024-01-05,1,24.99,0\n\
             O1,C2,P2,card,2024-01-18,1,89.00,0\n\
             O2,C3,P3,paypal,2024-02-12,1,149.50,0\n",
        )]);

        let report = load(&db, dir.path(), LoadOptions::default()).await?;
        assert_eq!(report.orders.inserted, 2);
        assert_eq!(report.rejections.len(), 1);
        assert_eq!(report.rejections[0].stage, RejectionStage::Constraint);
        assert_eq!(db.fact_count().await?, 2);

        db.cleanup().await
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_duplicate_dimension_keys_load_once() -> Result<()> {
        let db = TestDb::new().await?;
        let dir = data_dir_with(&[(
            "dim_payment.csv",
            "payment_method\ncard\npaypal\ncard\nbank_transfer\ncash_on_delivery\npaypal\n",
        )]);

        let report = load(&db, dir.path(), LoadOptions::default()).await?;
        assert_eq!(report.payments.read, 6);
        assert_eq!(report.payments.inserted, 4);
        assert_eq!(report.payments.duplicates, 2);
        assert_eq!(db.count(Dimension::Payment).await?, 4);
        assert_eq!(report.orders.inserted, 8);

        db.cleanup().await
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_strict_run_halts_and_rolls_back() -> Result<()> {
        let db = TestDb::new().await?;
        load(&db, &sample_dir(), LoadOptions::default()).await?;

        let dir = data_dir_with(&[(
            "fact_orders.csv",
            "order_id,customer_id,product_id,payment_method,order_date,quantity,price,discount\n\
             O1,C1,P1,card,2024-01-05,1,24.99,0\n\
             O2,C99,P1,card,2024-01-05,1,24.99,0\n",
        )]);
        let options = LoadOptions {
            strict: true,
            dry_run: false,
        };
        let result = load(&db, dir.path(), options).await;
        assert!(matches!(result, Err(EtlError::Halted(_))));

        // The previous load is still in place
        assert_eq!(db.fact_count().await?, 8);

        db.cleanup().await
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_malformed_rows_are_reported() -> Result<()> {
        let db = TestDb::new().await?;
        let dir = data_dir_with(&[(
            "dim_customer.csv",
            "customer_id,name,email,phone,city,signup_date\n\
             C1,Alice Martin,alice@example.com,,Boston,2023-01-15\n\
             C2,,bruno@example.com,,Chicago,2023-02-03\n\
             C3,Chen Wei,chen@example.com,,Seattle,21/03/2023\n\
             C4,Dana Okafor,dana@example.com,,Austin,2023-05-09\n\
             C5,Eva Novak,,,Denver,\n",
        )]);

        let report = load(&db, dir.path(), LoadOptions::default()).await?;
        assert_eq!(report.customers.read, 5);
        assert_eq!(report.customers.rejected, 2);
        assert_eq!(report.customers.inserted, 3);

        // Orders for the rejected customers cannot resolve
        let lookups = report
            .rejections
            .iter()
            .filter(|r| r.stage == RejectionStage::Lookup)
            .count();
        assert_eq!(lookups, 4);
        assert_eq!(report.orders.inserted, 4);

        let mut conn = db.warehouse.pool().acquire().await?;
        assert_eq!(fact_repository::count_orphaned_facts(&mut conn).await?, 0);
        drop(conn);

        db.cleanup().await
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_orders_keyed_by_date_key_load() -> Result<()> {
        let db = TestDb::new().await?;
        let dir = data_dir_with(&[(
            "fact_orders.csv",
            "order_id,customer_id,product_id,payment_method,date_key,quantity,price,discount\n\
             O1,C1,P1,card,20240105,2,24.99,0\n\
             O2,C2,P3,paypal,20240522,1,149.50,10.00\n\
             O3,C3,P2,card,20240101,1,89.00,0\n",
        )]);

        let report = load(&db, dir.path(), LoadOptions::default()).await?;
        assert_eq!(report.orders.inserted, 2);
        assert_eq!(report.rejections.len(), 1);
        assert_eq!(report.rejections[0].stage, RejectionStage::Lookup);
        assert_eq!(report.rejections[0].natural_key.as_deref(), Some("O3"));

        let date_key: i32 =
            sqlx::query_scalar("SELECT date_key FROM fact_orders WHERE order_id = 'O2'")
                .fetch_one(db.warehouse.pool())
                .await?;
        assert_eq!(date_key, 20240522);

        db.cleanup().await
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_out_of_range_value_rejects_only_that_row() -> Result<()> {
        let db = TestDb::new().await?;
        load(&db, &sample_dir(), LoadOptions::default()).await?;

        let keys: (i64, i64, i64) = sqlx::query_as(
            "SELECT customer_key, product_key, payment_key FROM fact_orders WHERE order_id = 'O1001'",
        )
        .fetch_one(db.warehouse.pool())
        .await?;
        let keys = ResolvedKeys {
            customer_key: keys.0,
            product_key: keys.1,
            payment_key: keys.2,
            date_key: 20240105,
        };

        // Built directly: record validation never lets this amount through
        let too_large = Decimal::new(1_000_000_000_000, 2);
        let order = OrderRecord {
            order_id: "O9999".into(),
            customer_id: "C1".into(),
            product_id: "P1".into(),
            payment_method: "card".into(),
            order_date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
            quantity: 1,
            price: too_large,
            discount: Decimal::ZERO,
            total_amount: too_large,
        };

        let mut tx = db.warehouse.pool().begin().await?;
        let mut loader = FactLoader::new(&mut tx);
        let err = loader.load(&order, keys).await.unwrap_err();
        assert!(matches!(err, LoadError::InvalidData { .. }), "{}", err);
        assert!(err.is_record_level());

        // The savepoint kept the surrounding transaction usable
        let mut ok = order.clone();
        ok.order_id = "O9998".into();
        ok.price = Decimal::new(500, 2);
        ok.total_amount = ok.price;
        loader.load(&ok, keys).await?;
        assert_eq!(loader.inserted(), 1);
        tx.rollback().await?;

        db.cleanup().await
    }
}
