//! Typed source records
//!
//! Each CSV file deserializes into a raw, all-text row which is then validated
//! into a typed record. Validation failures become [`RecordError`]s so the
//! reader can reject the row with a precise cause.

use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::RecordError;
use crate::etl::fact_loader::compute_total;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A record type loaded from one fixed CSV file
pub trait SourceRecord: Sized {
    /// File name under the data directory
    const FILE: &'static str;
    /// Columns that must be present in the header row
    const REQUIRED_COLUMNS: &'static [&'static str];

    /// Column groups of which at least one must be present
    const ONE_OF_COLUMNS: &'static [&'static [&'static str]] = &[];

    type Raw: DeserializeOwned;

    fn validate(raw: Self::Raw) -> Result<Self, RecordError>;

    /// Natural identifier used for deduplication and reporting
    fn natural_key(&self) -> String;
}

// ============================================================================
// Field helpers
// ============================================================================

fn required(field: &'static str, value: String) -> Result<String, RecordError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(RecordError::MissingField(field));
    }
    Ok(value.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_date(field: &'static str, value: &str) -> Result<NaiveDate, RecordError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| RecordError::InvalidDate {
        field,
        value: value.to_string(),
    })
}

fn parse_decimal(field: &'static str, value: &str) -> Result<Decimal, RecordError> {
    Decimal::from_str(value.trim()).map_err(|_| RecordError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn parse_int(field: &'static str, value: &str) -> Result<i32, RecordError> {
    value.trim().parse().map_err(|_| RecordError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn non_negative(field: &'static str, value: Decimal) -> Result<Decimal, RecordError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(RecordError::OutOfRange {
            field,
            reason: format!("{} is negative", value),
        });
    }
    Ok(value)
}

/// Largest value of a NUMERIC(12, 2) column (unit prices, discounts)
pub fn max_amount() -> Decimal {
    Decimal::new(999_999_999_999, 2)
}

/// Largest value of a NUMERIC(14, 2) column (order totals)
pub fn max_total() -> Decimal {
    Decimal::new(99_999_999_999_999, 2)
}

/// A non-negative money amount in whole cents that fits NUMERIC(12, 2)
fn amount(field: &'static str, value: &str) -> Result<Decimal, RecordError> {
    let value = non_negative(field, parse_decimal(field, value)?)?;
    if value.normalize().scale() > 2 {
        return Err(RecordError::OutOfRange {
            field,
            reason: format!("{} has more than 2 decimal places", value),
        });
    }
    if value > max_amount() {
        return Err(RecordError::OutOfRange {
            field,
            reason: format!("{} exceeds {}", value, max_amount()),
        });
    }
    Ok(value)
}

/// Check an optional derived column against the value computed from the row
fn derived(field: &'static str, given: Option<String>, expected: i32) -> Result<(), RecordError> {
    if let Some(given) = optional(given) {
        let given = parse_int(field, &given)?;
        if given != expected {
            return Err(RecordError::CalendarMismatch {
                field,
                given,
                expected,
            });
        }
    }
    Ok(())
}

// ============================================================================
// Customer
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RawCustomer {
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub signup_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerRecord {
    pub customer_id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub signup_date: Option<NaiveDate>,
}

impl SourceRecord for CustomerRecord {
    const FILE: &'static str = "dim_customer.csv";
    const REQUIRED_COLUMNS: &'static [&'static str] = &["customer_id", "name"];

    type Raw = RawCustomer;

    fn validate(raw: RawCustomer) -> Result<Self, RecordError> {
        let signup_date = match optional(raw.signup_date) {
            Some(value) => Some(parse_date("signup_date", &value)?),
            None => None,
        };
        Ok(Self {
            customer_id: required("customer_id", raw.customer_id)?,
            name: required("name", raw.name)?,
            email: optional(raw.email),
            phone: optional(raw.phone),
            city: optional(raw.city),
            signup_date,
        })
    }

    fn natural_key(&self) -> String {
        self.customer_id.clone()
    }
}

// ============================================================================
// Product
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RawProduct {
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub product_name: String,
    pub category: Option<String>,
    pub brand: Option<String>,
    #[serde(default)]
    pub price: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductRecord {
    pub product_id: String,
    pub product_name: String,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub price: Decimal,
}

impl SourceRecord for ProductRecord {
    const FILE: &'static str = "dim_products.csv";
    const REQUIRED_COLUMNS: &'static [&'static str] = &["product_id", "product_name", "price"];

    type Raw = RawProduct;

    fn validate(raw: RawProduct) -> Result<Self, RecordError> {
        let price = required("price", raw.price)?;
        Ok(Self {
            product_id: required("product_id", raw.product_id)?,
            product_name: required("product_name", raw.product_name)?,
            category: optional(raw.category),
            brand: optional(raw.brand),
            price: amount("price", &price)?,
        })
    }

    fn natural_key(&self) -> String {
        self.product_id.clone()
    }
}

// ============================================================================
// Payment method
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RawPayment {
    #[serde(default)]
    pub payment_method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRecord {
    pub payment_method: String,
}

impl SourceRecord for PaymentRecord {
    const FILE: &'static str = "dim_payment.csv";
    const REQUIRED_COLUMNS: &'static [&'static str] = &["payment_method"];

    type Raw = RawPayment;

    fn validate(raw: RawPayment) -> Result<Self, RecordError> {
        Ok(Self {
            payment_method: required("payment_method", raw.payment_method)?,
        })
    }

    fn natural_key(&self) -> String {
        self.payment_method.clone()
    }
}

// ============================================================================
// Calendar date
// ============================================================================

/// Encode a date as its `YYYYMMDD` integer key
pub fn date_key(date: NaiveDate) -> i32 {
    date.year() * 10_000 + date.month() as i32 * 100 + date.day() as i32
}

/// Decode a `YYYYMMDD` key, `None` if it names no calendar day
pub fn date_from_key(key: i32) -> Option<NaiveDate> {
    if key <= 0 {
        return None;
    }
    NaiveDate::from_ymd_opt(key / 10_000, (key / 100 % 100) as u32, (key % 100) as u32)
}

#[derive(Debug, Deserialize)]
pub struct RawDate {
    #[serde(default)]
    pub full_date: String,
    pub date_key: Option<String>,
    pub year: Option<String>,
    pub month: Option<String>,
    pub day: Option<String>,
    pub quarter: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CalendarDate {
    pub date_key: i32,
    pub full_date: NaiveDate,
    pub year: i32,
    pub month: i32,
    pub day: i32,
    pub quarter: i32,
}

impl CalendarDate {
    pub fn from_date(full_date: NaiveDate) -> Self {
        let month = full_date.month() as i32;
        Self {
            date_key: date_key(full_date),
            full_date,
            year: full_date.year(),
            month,
            day: full_date.day() as i32,
            quarter: (month - 1) / 3 + 1,
        }
    }
}

impl SourceRecord for CalendarDate {
    const FILE: &'static str = "dim_date.csv";
    const REQUIRED_COLUMNS: &'static [&'static str] = &["full_date"];

    type Raw = RawDate;

    fn validate(raw: RawDate) -> Result<Self, RecordError> {
        let full_date = required("full_date", raw.full_date)?;
        let date = Self::from_date(parse_date("full_date", &full_date)?);

        derived("date_key", raw.date_key, date.date_key)?;
        derived("year", raw.year, date.year)?;
        derived("month", raw.month, date.month)?;
        derived("day", raw.day, date.day)?;
        derived("quarter", raw.quarter, date.quarter)?;
        Ok(date)
    }

    fn natural_key(&self) -> String {
        self.full_date.format(DATE_FORMAT).to_string()
    }
}

// ============================================================================
// Order (fact source)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RawOrder {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub customer_id: String,
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub payment_method: String,
    pub order_date: Option<String>,
    pub date_key: Option<String>,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub price: String,
    pub discount: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub customer_id: String,
    pub product_id: String,
    pub payment_method: String,
    pub order_date: NaiveDate,
    pub quantity: i32,
    pub price: Decimal,
    pub discount: Decimal,
    pub total_amount: Decimal,
}

impl OrderRecord {
    /// Natural key of the referenced calendar date
    pub fn order_date_key(&self) -> String {
        self.order_date.format(DATE_FORMAT).to_string()
    }
}

impl SourceRecord for OrderRecord {
    const FILE: &'static str = "fact_orders.csv";
    const REQUIRED_COLUMNS: &'static [&'static str] = &[
        "order_id",
        "customer_id",
        "product_id",
        "payment_method",
        "quantity",
        "price",
    ];
    const ONE_OF_COLUMNS: &'static [&'static [&'static str]] = &[&["order_date", "date_key"]];

    type Raw = RawOrder;

    fn validate(raw: RawOrder) -> Result<Self, RecordError> {
        let order_date = order_date(raw.order_date, raw.date_key)?;
        let quantity = required("quantity", raw.quantity)?;
        let price = required("price", raw.price)?;

        let quantity: i32 = quantity.parse().map_err(|_| RecordError::InvalidNumber {
            field: "quantity",
            value: quantity.clone(),
        })?;
        if quantity <= 0 {
            return Err(RecordError::OutOfRange {
                field: "quantity",
                reason: format!("{} is not positive", quantity),
            });
        }

        let price = amount("price", &price)?;
        let discount = match optional(raw.discount) {
            Some(value) => amount("discount", &value)?,
            None => Decimal::ZERO,
        };
        let gross = Decimal::from(quantity)
            .checked_mul(price)
            .filter(|gross| *gross <= max_total())
            .ok_or_else(|| RecordError::OutOfRange {
                field: "price",
                reason: format!("{} x {} exceeds {}", quantity, price, max_total()),
            })?;
        if discount > gross {
            return Err(RecordError::OutOfRange {
                field: "discount",
                reason: format!("{} exceeds gross amount {}", discount, gross),
            });
        }
        let total_amount = compute_total(quantity, price, discount).ok_or_else(|| {
            RecordError::OutOfRange {
                field: "price",
                reason: format!("total of {} x {} overflows", quantity, price),
            }
        })?;

        Ok(Self {
            order_id: required("order_id", raw.order_id)?,
            customer_id: required("customer_id", raw.customer_id)?,
            product_id: required("product_id", raw.product_id)?,
            payment_method: required("payment_method", raw.payment_method)?,
            order_date,
            quantity,
            price,
            discount,
            total_amount,
        })
    }

    fn natural_key(&self) -> String {
        self.order_id.clone()
    }
}

/// Order date from `order_date`, or from an encoded `date_key` when that is
/// all the row carries. When both are given they must agree.
fn order_date(order_date: Option<String>, key: Option<String>) -> Result<NaiveDate, RecordError> {
    match (optional(order_date), optional(key)) {
        (Some(value), key) => {
            let date = parse_date("order_date", &value)?;
            derived("date_key", key, date_key(date))?;
            Ok(date)
        }
        (None, Some(key)) => {
            let key = parse_int("date_key", &key)?;
            date_from_key(key).ok_or_else(|| RecordError::OutOfRange {
                field: "date_key",
                reason: format!("{} is not a YYYYMMDD date", key),
            })
        }
        (None, None) => Err(RecordError::MissingField("order_date")),
    }
}
