use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, EntityTrait};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::entities::menu_item::{self, Entity as MenuItemEntity};
use crate::errors::ServiceError;
use crate::services::pricing::PricedLine;

/// Read access to the menu.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Catalog: Send + Sync {
    /// The item when it exists and is currently orderable.
    async fn get_available_item(&self, id: Uuid) -> Result<Option<menu_item::Model>, ServiceError>;
}

/// Prices a normalized cart against the catalog. Any missing or unavailable
/// item rejects the whole cart.
pub async fn price_cart(
    catalog: &dyn Catalog,
    cart: &[(Uuid, i32)],
) -> Result<Vec<PricedLine>, ServiceError> {
    let mut lines = Vec::with_capacity(cart.len());
    for (menu_item_id, quantity) in cart {
        let item = catalog
            .get_available_item(*menu_item_id)
            .await?
            .ok_or_else(|| {
                warn!(%menu_item_id, "Cart rejected; item unavailable");
                ServiceError::Unavailable(format!("Menu item {} is unavailable", menu_item_id))
            })?;
        lines.push(PricedLine {
            menu_item_id: item.id,
            name: item.name,
            unit_amount_cents: item.price_cents,
            quantity: *quantity,
        });
    }
    Ok(lines)
}

pub(crate) async fn find_available<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> Result<Option<menu_item::Model>, ServiceError> {
    let item = MenuItemEntity::find_by_id(id).one(conn).await?;
    Ok(item.filter(|item| item.is_available && item.stock_quantity.map_or(true, |q| q > 0)))
}

/// Catalog backed by the `menu_items` table.
#[derive(Clone)]
pub struct DbCatalog {
    db: Arc<DatabaseConnection>,
}

impl DbCatalog {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Catalog for DbCatalog {
    #[instrument(skip(self))]
    async fn get_available_item(&self, id: Uuid) -> Result<Option<menu_item::Model>, ServiceError> {
        find_available(&*self.db, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use mockall::predicate::eq;

    fn item(id: Uuid, price: i64) -> menu_item::Model {
        menu_item::Model {
            id,
            name: "Soup".into(),
            price_cents: price,
            is_available: true,
            stock_quantity: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn prices_come_from_the_catalog() {
        let id = Uuid::new_v4();
        let mut catalog = MockCatalog::new();
        catalog
            .expect_get_available_item()
            .with(eq(id))
            .returning(move |id| Ok(Some(item(id, 750))));

        let lines = price_cart(&catalog, &[(id, 2)]).await.unwrap();
        assert_eq!(lines[0].unit_amount_cents, 750);
        assert_eq!(lines[0].line_total_cents(), 1_500);
    }

    #[tokio::test]
    async fn one_unavailable_item_rejects_the_cart() {
        let ok = Uuid::new_v4();
        let gone = Uuid::new_v4();
        let mut catalog = MockCatalog::new();
        catalog
            .expect_get_available_item()
            .returning(move |id| Ok(if id == ok { Some(item(id, 100)) } else { None }));

        let err = price_cart(&catalog, &[(ok, 1), (gone, 1)]).await.unwrap_err();
        assert_matches!(err, ServiceError::Unavailable(_));
    }
}
