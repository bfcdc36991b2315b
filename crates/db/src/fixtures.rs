//! Demo ERP dataset for local development and repository tests.

use chrono::{Duration, Utc};

use crate::DbPool;

/// Seed a small parts catalog with purchase history. `ZR-900` deliberately
/// has no orders so the no-supplier path can be exercised.
pub async fn seed_demo_catalog(pool: &DbPool) -> Result<(), sqlx::Error> {
    let parts: &[(&str, &str)] = &[
        ("HX-200", "hydraulic actuator, 200mm stroke"),
        ("HX-210", "hydraulic actuator, 210mm stroke, stainless"),
        ("BRG-6204", "deep groove ball bearing 6204-2RS"),
        ("GSK-V8", "viton gasket set, 8-bolt flange"),
        ("ZR-900", "zirconia sensor probe, 900C rated"),
    ];

    for (part_number, part_description) in parts {
        sqlx::query(
            "INSERT INTO parts (part_number, part_description) VALUES (?, ?) \
             ON CONFLICT(part_number) DO NOTHING",
        )
        .bind(part_number)
        .bind(part_description)
        .execute(pool)
        .await?;
    }

    let now = Utc::now();
    let orders: &[(&str, &str, &str, i64, i64, f64)] = &[
        ("Acme Industrial", "sales@acme.com", "HX-200", 120, 50, 445.0),
        ("Borealis Supply", "quotes@borealis.io", "HX-200", 30, 25, 452.5),
        ("Acme Industrial", "sales@acme.com", "HX-210", 200, 10, 489.0),
        ("Crown Bearings", "orders@crownbearings.com", "BRG-6204", 15, 500, 3.2),
        ("Borealis Supply", "quotes@borealis.io", "GSK-V8", 60, 40, 18.75),
    ];

    for (supplier_name, supplier_email, part_number, days_ago, quantity, price) in orders {
        sqlx::query(
            "INSERT INTO purchase_orders \
             (supplier_name, supplier_email, part_number, order_date, quantity, price) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(supplier_name)
        .bind(supplier_email)
        .bind(part_number)
        .bind((now - Duration::days(*days_ago)).to_rfc3339())
        .bind(quantity)
        .bind(price)
        .execute(pool)
        .await?;
    }

    Ok(())
}
