use async_trait::async_trait;

use scout_core::domain::supplier::PurchaseOrder;

use super::{OrderRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn append(&self, order: &PurchaseOrder) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO purchase_orders (
                supplier_name, supplier_email, part_number, order_date, quantity, price
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&order.supplier_name)
        .bind(&order.supplier_email)
        .bind(&order.part_number)
        .bind(order.order_date.to_rfc3339())
        .bind(order.quantity)
        .bind(order.price)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sqlx::Row;

    use scout_core::domain::supplier::PurchaseOrder;

    use crate::connect_with_settings;
    use crate::migrations::run_pending;
    use crate::repositories::{OrderRepository, SqlOrderRepository};

    #[tokio::test]
    async fn placed_orders_land_in_the_ledger() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        let repository = SqlOrderRepository::new(pool.clone());

        let order = PurchaseOrder {
            supplier_name: "Acme Industrial".to_string(),
            supplier_email: "sales@acme.com".to_string(),
            part_number: "HX-200".to_string(),
            order_date: Utc::now(),
            quantity: 40,
            price: 12.5,
        };
        repository.append(&order).await.expect("append");
        repository.append(&order).await.expect("append again");

        let count = sqlx::query("SELECT COUNT(*) AS count FROM purchase_orders")
            .fetch_one(&pool)
            .await
            .expect("count")
            .get::<i64, _>("count");

        // Two identical orders are two ledger rows, not an upsert.
        assert_eq!(count, 2);
    }
}
