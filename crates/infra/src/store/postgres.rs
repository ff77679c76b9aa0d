//! Postgres-backed store.
//!
//! ## Atomicity
//!
//! Every mutating method runs in a single transaction. Ledger postings lock
//! the `product_stock` rows of every touched product (`SELECT … FOR UPDATE`,
//! in product-id order so concurrent batches cannot deadlock each other),
//! apply the costing rules against the locked snapshot and write the entries
//! and the new snapshots before committing.
//!
//! ## Error mapping
//!
//! | Postgres error | SQLSTATE | StoreError |
//! |---|---|---|
//! | unique violation on a business key (product, category or warehouse code, reversal) | `23505` | `Duplicate` |
//! | unique violation on a document number | `23505` | `NumberTaken` |
//! | any other unique violation (guard, ledger sequence) | `23505` | `Concurrency` |
//! | serialization failure / deadlock | `40001` / `40P01` | `Concurrency` |
//! | anything else | | `Database` |

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;
use uuid::Uuid;

use gestio_causali::{CausaleRegistry, Direction, DocumentCausale, MovementCausale};
use gestio_core::{AggregateId, AggregateRoot, DocumentNumber, SequenceKey, TenantId};
use gestio_inventory::{
    LedgerEntry, LedgerEntryId, PostingRequest, ProductStock, SourceDocument, SourceKind, StockPolicy, WarehouseStock,
};
use gestio_invoicing::{DeliveryNote, DeliveryNoteId, Invoice, InvoiceId, PaymentMethod, ScheduleEntry};
use gestio_orders::{Order, OrderId};
use gestio_parties::{Subject, SubjectCategory, SubjectCategoryId, SubjectId};
use gestio_products::{Product, ProductId, VatCode, Warehouse, WarehouseId};

use super::schema::{
    self, CATEGORIES_NAME_KEY, LEDGER_SINGLE_REVERSAL, NUMBER_KEYS, PRODUCTS_CODE_KEY, WAREHOUSES_CODE_KEY,
};
use super::{
    apply_postings, CatalogStore, Deletion, DeliveryIssue, DocumentGuard, DocumentStore, InvoiceIssue, LedgerStore,
    StockTransition, StoreError, StoreResult,
};

type Tx<'a> = Transaction<'a, Postgres>;

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub async fn ensure_schema(&self) -> StoreResult<()> {
        schema::ensure_schema(&self.pool).await
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> StoreResult<Tx<'static>> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    async fn load_doc<T, K>(&self, operation: &str, sql: &str, tenant_id: TenantId, key: K) -> StoreResult<Option<T>>
    where
        T: DeserializeOwned,
        K: for<'q> sqlx::Encode<'q, Postgres> + sqlx::Type<Postgres> + Send + 'static,
    {
        let row = sqlx::query(sql)
            .bind(tenant_id.as_uuid())
            .bind(key)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        row.map(|row| doc(&row)).transpose()
    }

    /// Demote the current primary when `warehouse` is primary, then run
    /// `statement` in the same transaction.
    async fn write_warehouse(&self, warehouse: &Warehouse, statement: &str, operation: &str) -> StoreResult<()> {
        let mut tx = self.begin().await?;
        if warehouse.primary {
            sqlx::query(
                r#"
                UPDATE warehouses
                SET is_primary = FALSE, doc = jsonb_set(doc, '{primary}', 'false')
                WHERE tenant_id = $1 AND id <> $2 AND is_primary
                "#,
            )
            .bind(warehouse.tenant_id.as_uuid())
            .bind(warehouse.id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(&format!("{operation}.demote"), e))?;
        }

        sqlx::query(statement)
            .bind(warehouse.tenant_id.as_uuid())
            .bind(warehouse.id.as_uuid())
            .bind(&warehouse.code)
            .bind(warehouse.primary)
            .bind(json(warehouse))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        commit(tx).await
    }
}

/// An `ON CONFLICT DO NOTHING` insert that wrote nothing hit an existing key.
fn inserted(rows_affected: u64, what: &str, code: &str) -> StoreResult<()> {
    if rows_affected == 0 {
        return Err(StoreError::Duplicate(format!("{what} '{code}' already exists")));
    }
    Ok(())
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            let code = db_err.code().map(|c| c.into_owned());
            match code.as_deref() {
                Some("23505") => match db_err.constraint() {
                    Some(PRODUCTS_CODE_KEY | CATEGORIES_NAME_KEY | WAREHOUSES_CODE_KEY | LEDGER_SINGLE_REVERSAL) => {
                        StoreError::Duplicate(msg)
                    }
                    Some(name) if NUMBER_KEYS.contains(&name) => StoreError::NumberTaken(msg),
                    _ => StoreError::Concurrency(msg),
                },
                Some("40001") | Some("40P01") => StoreError::Concurrency(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::Database(format!("connection pool closed in {operation}")),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Serialization(format!("failed to decode row in {operation}: {err}"))
        }
        other => StoreError::Database(format!("{operation}: {other}")),
    }
}

fn decode(err: sqlx::Error) -> StoreError {
    StoreError::Serialization(err.to_string())
}

fn doc<T: DeserializeOwned>(row: &PgRow) -> StoreResult<T> {
    let Json(value): Json<T> = row.try_get("doc").map_err(decode)?;
    Ok(value)
}

fn json<T: Serialize>(value: &T) -> Json<&T> {
    Json(value)
}

fn require_tenant(tenant_id: Option<TenantId>) -> StoreResult<TenantId> {
    tenant_id.ok_or_else(|| StoreError::TenantIsolation("document carries no tenant".into()))
}

fn require_number(number: Option<&DocumentNumber>) -> StoreResult<&DocumentNumber> {
    number.ok_or_else(|| StoreError::Serialization("document has no number".into()))
}

fn count(row: &PgRow) -> StoreResult<u64> {
    let n: i64 = row.try_get("n").map_err(decode)?;
    Ok(n.max(0) as u64)
}

fn entry_from_row(row: &PgRow) -> StoreResult<LedgerEntry> {
    let direction: String = row.try_get("direction").map_err(decode)?;
    let source_kind: Option<String> = row.try_get("source_kind").map_err(decode)?;
    let source_id: Option<Uuid> = row.try_get("source_id").map_err(decode)?;
    let source_line: Option<i32> = row.try_get("source_line").map_err(decode)?;
    let source = match (source_kind, source_id) {
        (Some(kind), Some(id)) => Some(SourceDocument {
            kind: SourceKind::parse(&kind)?,
            document_id: AggregateId::from_uuid(id),
            line_no: source_line.map(|n| n as u32),
        }),
        _ => None,
    };
    let sequence: i64 = row.try_get("sequence").map_err(decode)?;

    Ok(LedgerEntry {
        id: LedgerEntryId::from(row.try_get::<Uuid, _>("id").map_err(decode)?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(decode)?),
        product_id: ProductId::from(row.try_get::<Uuid, _>("product_id").map_err(decode)?),
        warehouse_id: WarehouseId::from(row.try_get::<Uuid, _>("warehouse_id").map_err(decode)?),
        causale_code: row.try_get("causale_code").map_err(decode)?,
        direction: Direction::parse(&direction)?,
        updates_average_cost: row.try_get("updates_average_cost").map_err(decode)?,
        sequence: sequence as u64,
        quantity: row.try_get("quantity").map_err(decode)?,
        unit_cost: row.try_get("unit_cost").map_err(decode)?,
        average_cost_after: row.try_get("average_cost_after").map_err(decode)?,
        on_hand_after: row.try_get("on_hand_after").map_err(decode)?,
        source,
        counterparty: row
            .try_get::<Option<Uuid>, _>("counterparty")
            .map_err(decode)?
            .map(SubjectId::from),
        reverses: row
            .try_get::<Option<Uuid>, _>("reverses")
            .map_err(decode)?
            .map(LedgerEntryId::from),
        posted_at: row.try_get("posted_at").map_err(decode)?,
    })
}

fn stock_from_row(tenant_id: TenantId, row: &PgRow) -> StoreResult<ProductStock> {
    let last_sequence: i64 = row.try_get("last_sequence").map_err(decode)?;
    Ok(ProductStock {
        tenant_id,
        product_id: ProductId::from(row.try_get::<Uuid, _>("product_id").map_err(decode)?),
        on_hand: row.try_get("on_hand").map_err(decode)?,
        average_cost: row.try_get("average_cost").map_err(decode)?,
        last_purchase_cost: row.try_get("last_purchase_cost").map_err(decode)?,
        last_sequence: last_sequence as u64,
    })
}

fn position_from_row(tenant_id: TenantId, row: &PgRow) -> StoreResult<WarehouseStock> {
    Ok(WarehouseStock {
        tenant_id,
        product_id: ProductId::from(row.try_get::<Uuid, _>("product_id").map_err(decode)?),
        warehouse_id: WarehouseId::from(row.try_get::<Uuid, _>("warehouse_id").map_err(decode)?),
        quantity: row.try_get("quantity").map_err(decode)?,
    })
}

fn sorted_ids(ids: impl Iterator<Item = Uuid>) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = ids.collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Post a batch inside `tx`: validate references, lock snapshots, apply the
/// costing rules, write entries and snapshots.
async fn post_in_tx(
    tx: &mut Tx<'_>,
    tenant_id: TenantId,
    postings: &[PostingRequest],
    policy: StockPolicy,
    posted_at: DateTime<Utc>,
) -> StoreResult<Vec<LedgerEntry>> {
    if postings.is_empty() {
        return Ok(Vec::new());
    }
    let product_ids = sorted_ids(postings.iter().map(|p| *p.product_id.as_uuid()));
    let warehouse_ids = sorted_ids(postings.iter().map(|p| *p.warehouse_id.as_uuid()));

    let known = sqlx::query("SELECT COUNT(*) AS n FROM products WHERE tenant_id = $1 AND id = ANY($2)")
        .bind(tenant_id.as_uuid())
        .bind(&product_ids)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("post.products", e))?;
    if count(&known)? != product_ids.len() as u64 {
        return Err(StoreError::NotFound("product".into()));
    }
    let known = sqlx::query("SELECT COUNT(*) AS n FROM warehouses WHERE tenant_id = $1 AND id = ANY($2)")
        .bind(tenant_id.as_uuid())
        .bind(&warehouse_ids)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("post.warehouses", e))?;
    if count(&known)? != warehouse_ids.len() as u64 {
        return Err(StoreError::NotFound("warehouse".into()));
    }

    for product_id in &product_ids {
        sqlx::query(
            "INSERT INTO product_stock (tenant_id, product_id) VALUES ($1, $2) ON CONFLICT (tenant_id, product_id) DO NOTHING",
        )
        .bind(tenant_id.as_uuid())
        .bind(product_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("post.init_stock", e))?;
    }

    let rows = sqlx::query(
        r#"
        SELECT product_id, on_hand, average_cost, last_purchase_cost, last_sequence
        FROM product_stock
        WHERE tenant_id = $1 AND product_id = ANY($2)
        ORDER BY product_id
        FOR UPDATE
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(&product_ids)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("post.lock_stock", e))?;
    let mut stocks = HashMap::with_capacity(rows.len());
    for row in &rows {
        let stock = stock_from_row(tenant_id, row)?;
        stocks.insert(stock.product_id, stock);
    }

    let rows = sqlx::query(
        "SELECT product_id, warehouse_id, quantity FROM warehouse_stock WHERE tenant_id = $1 AND product_id = ANY($2)",
    )
    .bind(tenant_id.as_uuid())
    .bind(&product_ids)
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("post.positions", e))?;
    let mut positions = HashMap::with_capacity(rows.len());
    for row in &rows {
        let position = position_from_row(tenant_id, row)?;
        positions.insert((position.product_id, position.warehouse_id), position);
    }

    let entries = apply_postings(tenant_id, &mut stocks, &mut positions, postings, policy, posted_at)?;

    for entry in &entries {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                id, tenant_id, product_id, warehouse_id, causale_code, direction,
                updates_average_cost, sequence, quantity, unit_cost, average_cost_after,
                on_hand_after, source_kind, source_id, source_line, counterparty, reverses, posted_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(tenant_id.as_uuid())
        .bind(entry.product_id.as_uuid())
        .bind(entry.warehouse_id.as_uuid())
        .bind(&entry.causale_code)
        .bind(entry.direction.as_str())
        .bind(entry.updates_average_cost)
        .bind(entry.sequence as i64)
        .bind(entry.quantity)
        .bind(entry.unit_cost)
        .bind(entry.average_cost_after)
        .bind(entry.on_hand_after)
        .bind(entry.source.as_ref().map(|s| s.kind.as_str()))
        .bind(entry.source.as_ref().map(|s| *s.document_id.as_uuid()))
        .bind(entry.source.as_ref().and_then(|s| s.line_no).map(|n| n as i32))
        .bind(entry.counterparty.map(|s| *s.as_uuid()))
        .bind(entry.reverses.map(|r| *r.as_uuid()))
        .bind(entry.posted_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("post.insert_entry", e))?;
    }

    for stock in stocks.values() {
        sqlx::query(
            r#"
            UPDATE product_stock
            SET on_hand = $3, average_cost = $4, last_purchase_cost = $5, last_sequence = $6
            WHERE tenant_id = $1 AND product_id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(stock.product_id.as_uuid())
        .bind(stock.on_hand)
        .bind(stock.average_cost)
        .bind(stock.last_purchase_cost)
        .bind(stock.last_sequence as i64)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("post.update_stock", e))?;
    }

    for position in positions.values() {
        sqlx::query(
            r#"
            INSERT INTO warehouse_stock (tenant_id, product_id, warehouse_id, quantity)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, product_id, warehouse_id) DO UPDATE SET quantity = EXCLUDED.quantity
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(position.product_id.as_uuid())
        .bind(position.warehouse_id.as_uuid())
        .bind(position.quantity)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("post.update_position", e))?;
    }

    Ok(entries)
}

/// Replace an order row if its version is still `expected_version`.
async fn update_order_in_tx(tx: &mut Tx<'_>, order: &Order, expected_version: u64) -> StoreResult<()> {
    let tenant_id = require_tenant(order.tenant_id())?;
    let result = sqlx::query(
        r#"
        UPDATE orders
        SET doc = $3, version = $4, warehouse_id = $5
        WHERE tenant_id = $1 AND id = $2 AND version = $6
        "#,
    )
    .bind(tenant_id.as_uuid())
    .bind(order.id_typed().as_uuid())
    .bind(json(order))
    .bind(order.version() as i64)
    .bind(order.warehouse_id().map(|w| *w.as_uuid()))
    .bind(expected_version as i64)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update_order", e))?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Concurrency(format!(
            "order {} is missing or no longer at version {expected_version}",
            order.id_typed()
        )));
    }
    Ok(())
}

async fn insert_guard_in_tx(tx: &mut Tx<'_>, tenant_id: TenantId, guard: &DocumentGuard) -> StoreResult<()> {
    sqlx::query("INSERT INTO document_guards (tenant_id, order_id, family) VALUES ($1, $2, $3)")
        .bind(tenant_id.as_uuid())
        .bind(guard.order_id.as_uuid())
        .bind(guard.family.as_str())
        .execute(&mut **tx)
        .await
        .map_err(|e| match map_sqlx_error("insert_guard", e) {
            StoreError::Concurrency(_) => StoreError::Concurrency(format!(
                "order {} already has a '{}' document",
                guard.order_id, guard.family
            )),
            other => other,
        })?;
    Ok(())
}

async fn replace_schedule_in_tx(
    tx: &mut Tx<'_>,
    tenant_id: TenantId,
    invoice_id: InvoiceId,
    schedule: &[ScheduleEntry],
) -> StoreResult<()> {
    sqlx::query("DELETE FROM payment_schedules WHERE tenant_id = $1 AND invoice_id = $2")
        .bind(tenant_id.as_uuid())
        .bind(invoice_id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("delete_schedule", e))?;

    for entry in schedule {
        sqlx::query(
            r#"
            INSERT INTO payment_schedules (tenant_id, invoice_id, installment, due_date, amount)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(entry.invoice_id.as_uuid())
        .bind(entry.installment as i32)
        .bind(entry.due_date)
        .bind(entry.amount)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_schedule", e))?;
    }
    Ok(())
}

async fn commit(tx: Tx<'_>) -> StoreResult<()> {
    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("commit_transaction", e))
}

#[async_trait]
impl CatalogStore for PostgresStore {
    #[instrument(skip(self, subject), fields(tenant_id = %subject.tenant_id, subject_id = %subject.id), err)]
    async fn upsert_subject(&self, subject: &Subject) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subjects (tenant_id, id, category_id, roles, doc)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, id)
            DO UPDATE SET category_id = EXCLUDED.category_id, roles = EXCLUDED.roles, doc = EXCLUDED.doc
            "#,
        )
        .bind(subject.tenant_id.as_uuid())
        .bind(subject.id.as_uuid())
        .bind(subject.category_id.map(|c| *c.as_uuid()))
        .bind(subject.roles.bits())
        .bind(json(subject))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_subject", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn subject(&self, tenant_id: TenantId, id: SubjectId) -> StoreResult<Option<Subject>> {
        self.load_doc(
            "subject",
            "SELECT doc FROM subjects WHERE tenant_id = $1 AND id = $2",
            tenant_id,
            *id.as_uuid(),
        )
        .await
    }

    #[instrument(skip(self, category), fields(tenant_id = %category.tenant_id), err)]
    async fn insert_subject_category(&self, category: &SubjectCategory) -> StoreResult<()> {
        sqlx::query("INSERT INTO subject_categories (tenant_id, id, name) VALUES ($1, $2, $3)")
            .bind(category.tenant_id.as_uuid())
            .bind(category.id.as_uuid())
            .bind(&category.name)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("insert_subject_category", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn subject_categories(&self, tenant_id: TenantId) -> StoreResult<Vec<SubjectCategory>> {
        let rows = sqlx::query("SELECT id, name FROM subject_categories WHERE tenant_id = $1 ORDER BY name")
            .bind(tenant_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("subject_categories", e))?;
        rows.iter()
            .map(|row| {
                Ok(SubjectCategory {
                    id: SubjectCategoryId::from(row.try_get::<Uuid, _>("id").map_err(decode)?),
                    tenant_id,
                    name: row.try_get("name").map_err(decode)?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, category_id = %id), err)]
    async fn delete_subject_category(&self, tenant_id: TenantId, id: SubjectCategoryId) -> StoreResult<Deletion> {
        let mut tx = self.begin().await?;
        let exists = sqlx::query("SELECT id FROM subject_categories WHERE tenant_id = $1 AND id = $2 FOR UPDATE")
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_subject_category", e))?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!("subject category {id}")));
        }

        let row = sqlx::query("SELECT COUNT(*) AS n FROM subjects WHERE tenant_id = $1 AND category_id = $2")
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_subject_category.count", e))?;
        let assigned = count(&row)?;
        if assigned > 0 {
            return Ok(Deletion::InUse(assigned));
        }

        sqlx::query("DELETE FROM subject_categories WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_subject_category", e))?;
        commit(tx).await?;
        Ok(Deletion::Deleted)
    }

    #[instrument(skip(self, product), fields(tenant_id = %product.tenant_id, code = %product.code), err)]
    async fn upsert_product(&self, product: &Product) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO products (tenant_id, id, code, doc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, id) DO UPDATE SET code = EXCLUDED.code, doc = EXCLUDED.doc
            "#,
        )
        .bind(product.tenant_id.as_uuid())
        .bind(product.id.as_uuid())
        .bind(&product.code)
        .bind(json(product))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_product", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn product(&self, tenant_id: TenantId, id: ProductId) -> StoreResult<Option<Product>> {
        self.load_doc(
            "product",
            "SELECT doc FROM products WHERE tenant_id = $1 AND id = $2",
            tenant_id,
            *id.as_uuid(),
        )
        .await
    }

    #[instrument(skip(self, warehouse), fields(tenant_id = %warehouse.tenant_id, warehouse_id = %warehouse.id), err)]
    async fn upsert_warehouse(&self, warehouse: &Warehouse) -> StoreResult<()> {
        self.write_warehouse(
            warehouse,
            r#"
            INSERT INTO warehouses (tenant_id, id, code, is_primary, doc)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (tenant_id, id)
            DO UPDATE SET code = EXCLUDED.code, is_primary = EXCLUDED.is_primary, doc = EXCLUDED.doc
            "#,
            "upsert_warehouse",
        )
        .await
    }

    #[instrument(skip(self, warehouse), fields(tenant_id = %warehouse.tenant_id, code = %warehouse.code), err)]
    async fn insert_warehouse(&self, warehouse: &Warehouse) -> StoreResult<()> {
        self.write_warehouse(
            warehouse,
            r#"
            INSERT INTO warehouses (tenant_id, id, code, is_primary, doc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
            "insert_warehouse",
        )
        .await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn warehouses(&self, tenant_id: TenantId) -> StoreResult<Vec<Warehouse>> {
        let rows = sqlx::query("SELECT doc FROM warehouses WHERE tenant_id = $1 ORDER BY code")
            .bind(tenant_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("warehouses", e))?;
        rows.iter().map(doc).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, warehouse_id = %id), err)]
    async fn delete_warehouse(&self, tenant_id: TenantId, id: WarehouseId) -> StoreResult<Deletion> {
        let mut tx = self.begin().await?;
        let exists = sqlx::query("SELECT id FROM warehouses WHERE tenant_id = $1 AND id = $2 FOR UPDATE")
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_warehouse", e))?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!("warehouse {id}")));
        }

        let line_ref = serde_json::json!([{ "warehouse_id": id }]);
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM ledger_entries WHERE tenant_id = $1 AND warehouse_id = $2)
              + (SELECT COUNT(*) FROM orders
                   WHERE tenant_id = $1 AND (warehouse_id = $2 OR doc -> 'lines' @> $3))
                AS n
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(id.as_uuid())
        .bind(Json(line_ref))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("delete_warehouse.count", e))?;
        let references = count(&row)?;
        if references > 0 {
            return Ok(Deletion::InUse(references));
        }

        sqlx::query("DELETE FROM warehouses WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_warehouse", e))?;
        commit(tx).await?;
        Ok(Deletion::Deleted)
    }

    #[instrument(skip(self, vat), fields(tenant_id = %vat.tenant_id, code = %vat.code), err)]
    async fn upsert_vat_code(&self, vat: &VatCode) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO vat_codes (tenant_id, code, doc) VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id, code) DO UPDATE SET doc = EXCLUDED.doc
            "#,
        )
        .bind(vat.tenant_id.as_uuid())
        .bind(&vat.code)
        .bind(json(vat))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_vat_code", e))?;
        Ok(())
    }

    #[instrument(skip(self, vat), fields(tenant_id = %vat.tenant_id, code = %vat.code), err)]
    async fn insert_vat_code(&self, vat: &VatCode) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO vat_codes (tenant_id, code, doc) VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id, code) DO NOTHING
            "#,
        )
        .bind(vat.tenant_id.as_uuid())
        .bind(&vat.code)
        .bind(json(vat))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_vat_code", e))?;
        inserted(result.rows_affected(), "VAT code", &vat.code)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn vat_codes(&self, tenant_id: TenantId) -> StoreResult<Vec<VatCode>> {
        let rows = sqlx::query("SELECT doc FROM vat_codes WHERE tenant_id = $1 ORDER BY code")
            .bind(tenant_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("vat_codes", e))?;
        rows.iter().map(doc).collect()
    }

    #[instrument(skip(self, method), fields(tenant_id = %method.tenant_id, code = %method.code), err)]
    async fn upsert_payment_method(&self, method: &PaymentMethod) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_methods (tenant_id, code, doc) VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id, code) DO UPDATE SET doc = EXCLUDED.doc
            "#,
        )
        .bind(method.tenant_id.as_uuid())
        .bind(&method.code)
        .bind(json(method))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_payment_method", e))?;
        Ok(())
    }

    #[instrument(skip(self, method), fields(tenant_id = %method.tenant_id, code = %method.code), err)]
    async fn insert_payment_method(&self, method: &PaymentMethod) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_methods (tenant_id, code, doc) VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id, code) DO NOTHING
            "#,
        )
        .bind(method.tenant_id.as_uuid())
        .bind(&method.code)
        .bind(json(method))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_payment_method", e))?;
        inserted(result.rows_affected(), "payment method", &method.code)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn payment_method(&self, tenant_id: TenantId, code: &str) -> StoreResult<Option<PaymentMethod>> {
        self.load_doc(
            "payment_method",
            "SELECT doc FROM payment_methods WHERE tenant_id = $1 AND code = $2",
            tenant_id,
            code.trim().to_uppercase(),
        )
        .await
    }

    #[instrument(skip(self, causale), fields(tenant_id = %causale.tenant_id, code = %causale.code), err)]
    async fn upsert_movement_causale(&self, causale: &MovementCausale) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO movement_causali (tenant_id, code, inverse_code, doc) VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, code) DO UPDATE SET inverse_code = EXCLUDED.inverse_code, doc = EXCLUDED.doc
            "#,
        )
        .bind(causale.tenant_id.as_uuid())
        .bind(&causale.code)
        .bind(causale.inverse_code.as_deref())
        .bind(json(causale))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_movement_causale", e))?;
        Ok(())
    }

    #[instrument(skip(self, causale), fields(tenant_id = %causale.tenant_id, code = %causale.code), err)]
    async fn upsert_document_causale(&self, causale: &DocumentCausale) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO document_causali (tenant_id, code, movement_code, doc) VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, code) DO UPDATE SET movement_code = EXCLUDED.movement_code, doc = EXCLUDED.doc
            "#,
        )
        .bind(causale.tenant_id.as_uuid())
        .bind(&causale.code)
        .bind(causale.movement_causale.as_deref())
        .bind(json(causale))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_document_causale", e))?;
        Ok(())
    }

    #[instrument(skip(self, causale), fields(tenant_id = %causale.tenant_id, code = %causale.code), err)]
    async fn insert_movement_causale(&self, causale: &MovementCausale) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO movement_causali (tenant_id, code, inverse_code, doc) VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, code) DO NOTHING
            "#,
        )
        .bind(causale.tenant_id.as_uuid())
        .bind(&causale.code)
        .bind(causale.inverse_code.as_deref())
        .bind(json(causale))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_movement_causale", e))?;
        inserted(result.rows_affected(), "movement causale", &causale.code)
    }

    #[instrument(skip(self, causale), fields(tenant_id = %causale.tenant_id, code = %causale.code), err)]
    async fn insert_document_causale(&self, causale: &DocumentCausale) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO document_causali (tenant_id, code, movement_code, doc) VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, code) DO NOTHING
            "#,
        )
        .bind(causale.tenant_id.as_uuid())
        .bind(&causale.code)
        .bind(causale.movement_causale.as_deref())
        .bind(json(causale))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_document_causale", e))?;
        inserted(result.rows_affected(), "document causale", &causale.code)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn causale_registry(&self, tenant_id: TenantId) -> StoreResult<CausaleRegistry> {
        let movement_rows = sqlx::query("SELECT doc FROM movement_causali WHERE tenant_id = $1")
            .bind(tenant_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("causale_registry.movements", e))?;
        let document_rows = sqlx::query("SELECT doc FROM document_causali WHERE tenant_id = $1")
            .bind(tenant_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("causale_registry.documents", e))?;

        let movements = movement_rows.iter().map(doc).collect::<StoreResult<Vec<MovementCausale>>>()?;
        let documents = document_rows.iter().map(doc).collect::<StoreResult<Vec<DocumentCausale>>>()?;
        Ok(CausaleRegistry::from_parts(tenant_id, movements, documents))
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn delete_movement_causale(&self, tenant_id: TenantId, code: &str) -> StoreResult<Deletion> {
        let code = code.to_uppercase();
        let mut tx = self.begin().await?;
        let exists = sqlx::query("SELECT code FROM movement_causali WHERE tenant_id = $1 AND code = $2 FOR UPDATE")
            .bind(tenant_id.as_uuid())
            .bind(&code)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_movement_causale", e))?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!("movement causale '{code}'")));
        }

        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM ledger_entries WHERE tenant_id = $1 AND causale_code = $2)
              + (SELECT COUNT(*) FROM document_causali WHERE tenant_id = $1 AND movement_code = $2)
              + (SELECT COUNT(*) FROM movement_causali WHERE tenant_id = $1 AND inverse_code = $2)
                AS n
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(&code)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("delete_movement_causale.count", e))?;
        let references = count(&row)?;
        if references > 0 {
            return Ok(Deletion::InUse(references));
        }

        sqlx::query("DELETE FROM movement_causali WHERE tenant_id = $1 AND code = $2")
            .bind(tenant_id.as_uuid())
            .bind(&code)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_movement_causale", e))?;
        commit(tx).await?;
        Ok(Deletion::Deleted)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn delete_document_causale(&self, tenant_id: TenantId, code: &str) -> StoreResult<Deletion> {
        let code = code.to_uppercase();
        let mut tx = self.begin().await?;
        let exists = sqlx::query("SELECT code FROM document_causali WHERE tenant_id = $1 AND code = $2 FOR UPDATE")
            .bind(tenant_id.as_uuid())
            .bind(&code)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_document_causale", e))?;
        if exists.is_none() {
            return Err(StoreError::NotFound(format!("document causale '{code}'")));
        }

        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM orders WHERE tenant_id = $1 AND causale_code = $2)
              + (SELECT COUNT(*) FROM invoices WHERE tenant_id = $1 AND causale_code = $2)
              + (SELECT COUNT(*) FROM delivery_notes WHERE tenant_id = $1 AND causale_code = $2)
                AS n
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(&code)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("delete_document_causale.count", e))?;
        let references = count(&row)?;
        if references > 0 {
            return Ok(Deletion::InUse(references));
        }

        sqlx::query("DELETE FROM document_causali WHERE tenant_id = $1 AND code = $2")
            .bind(tenant_id.as_uuid())
            .bind(&code)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_document_causale", e))?;
        commit(tx).await?;
        Ok(Deletion::Deleted)
    }
}

#[async_trait]
impl LedgerStore for PostgresStore {
    #[instrument(skip(self, postings), fields(tenant_id = %tenant_id, postings = postings.len()), err)]
    async fn post(
        &self,
        tenant_id: TenantId,
        postings: Vec<PostingRequest>,
        policy: StockPolicy,
        posted_at: DateTime<Utc>,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let mut tx = self.begin().await?;
        let entries = post_in_tx(&mut tx, tenant_id, &postings, policy, posted_at).await?;
        commit(tx).await?;
        Ok(entries)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, entry_id = %id), err)]
    async fn entry(&self, tenant_id: TenantId, id: LedgerEntryId) -> StoreResult<Option<LedgerEntry>> {
        let row = sqlx::query("SELECT * FROM ledger_entries WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id.as_uuid())
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("entry", e))?;
        row.as_ref().map(entry_from_row).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, product_id = %product_id), err)]
    async fn entries(&self, tenant_id: TenantId, product_id: ProductId) -> StoreResult<Vec<LedgerEntry>> {
        let rows = sqlx::query("SELECT * FROM ledger_entries WHERE tenant_id = $1 AND product_id = $2 ORDER BY sequence")
            .bind(tenant_id.as_uuid())
            .bind(product_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("entries", e))?;
        rows.iter().map(entry_from_row).collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, product_id = %product_id), err)]
    async fn product_stock(&self, tenant_id: TenantId, product_id: ProductId) -> StoreResult<Option<ProductStock>> {
        let row = sqlx::query(
            r#"
            SELECT product_id, on_hand, average_cost, last_purchase_cost, last_sequence
            FROM product_stock
            WHERE tenant_id = $1 AND product_id = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(product_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("product_stock", e))?;
        row.map(|row| stock_from_row(tenant_id, &row)).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, product_id = %product_id), err)]
    async fn warehouse_stock(&self, tenant_id: TenantId, product_id: ProductId) -> StoreResult<Vec<WarehouseStock>> {
        let rows = sqlx::query(
            "SELECT product_id, warehouse_id, quantity FROM warehouse_stock WHERE tenant_id = $1 AND product_id = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(product_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("warehouse_stock", e))?;
        rows.iter().map(|row| position_from_row(tenant_id, row)).collect()
    }
}

#[async_trait]
impl DocumentStore for PostgresStore {
    #[instrument(skip(self), fields(tenant_id = %tenant_id, sequence = %sequence), err)]
    async fn next_number(&self, tenant_id: TenantId, sequence: &SequenceKey, year: i32) -> StoreResult<DocumentNumber> {
        let row = sqlx::query(
            r#"
            INSERT INTO numbering_counters (tenant_id, sequence, year, last_number)
            VALUES ($1, $2, $3, 1)
            ON CONFLICT (tenant_id, sequence, year)
            DO UPDATE SET last_number = numbering_counters.last_number + 1
            RETURNING last_number
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(sequence.as_str())
        .bind(year)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("next_number", e))?;
        let number: i64 = row.try_get("last_number").map_err(decode)?;
        Ok(DocumentNumber::new(sequence.clone(), year, number as u64)?)
    }

    #[instrument(skip(self, order), fields(order_id = %order.id_typed()), err)]
    async fn insert_order(&self, order: &Order) -> StoreResult<()> {
        let tenant_id = require_tenant(order.tenant_id())?;
        let number = require_number(order.number())?;
        sqlx::query(
            r#"
            INSERT INTO orders (tenant_id, id, causale_code, sequence, year, number, warehouse_id, version, doc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(order.id_typed().as_uuid())
        .bind(order.causale_code())
        .bind(number.sequence.as_str())
        .bind(number.year)
        .bind(number.number as i64)
        .bind(order.warehouse_id().map(|w| *w.as_uuid()))
        .bind(order.version() as i64)
        .bind(json(order))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, order_id = %id), err)]
    async fn order(&self, tenant_id: TenantId, id: OrderId) -> StoreResult<Option<Order>> {
        self.load_doc(
            "order",
            "SELECT doc FROM orders WHERE tenant_id = $1 AND id = $2",
            tenant_id,
            *id.as_uuid(),
        )
        .await
    }

    #[instrument(skip(self, order), fields(order_id = %order.id_typed()), err)]
    async fn save_order(&self, order: &Order, expected_version: u64) -> StoreResult<()> {
        let mut tx = self.begin().await?;
        update_order_in_tx(&mut tx, order, expected_version).await?;
        commit(tx).await
    }

    #[instrument(
        skip(self, transition),
        fields(
            order_id = %transition.order.id_typed(),
            family = %transition.guard.family,
            postings = transition.postings.len()
        ),
        err
    )]
    async fn commit_stock_transition(&self, transition: StockTransition) -> StoreResult<Vec<LedgerEntry>> {
        let tenant_id = require_tenant(transition.order.tenant_id())?;
        let mut tx = self.begin().await?;
        insert_guard_in_tx(&mut tx, tenant_id, &transition.guard).await?;
        update_order_in_tx(&mut tx, &transition.order, transition.expected_version).await?;
        let entries = post_in_tx(
            &mut tx,
            tenant_id,
            &transition.postings,
            transition.policy,
            transition.posted_at,
        )
        .await?;
        commit(tx).await?;
        Ok(entries)
    }

    #[instrument(skip(self, issue), fields(invoice_id = %issue.invoice.id_typed(), order_id = %issue.order.id_typed()), err)]
    async fn insert_invoice(&self, issue: InvoiceIssue) -> StoreResult<()> {
        let tenant_id = require_tenant(issue.invoice.tenant_id())?;
        if issue.order.tenant_id() != Some(tenant_id) {
            return Err(StoreError::TenantIsolation("invoice and order belong to different tenants".into()));
        }
        let number = require_number(issue.invoice.number())?;

        let mut tx = self.begin().await?;
        insert_guard_in_tx(&mut tx, tenant_id, &issue.guard).await?;
        update_order_in_tx(&mut tx, &issue.order, issue.expected_order_version).await?;
        sqlx::query(
            r#"
            INSERT INTO invoices (tenant_id, id, causale_code, sequence, year, number, source_order, version, doc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(issue.invoice.id_typed().as_uuid())
        .bind(issue.invoice.causale_code())
        .bind(number.sequence.as_str())
        .bind(number.year)
        .bind(number.number as i64)
        .bind(issue.invoice.source_order().map(|o| *o.as_uuid()))
        .bind(issue.invoice.version() as i64)
        .bind(json(&issue.invoice))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_invoice", e))?;
        replace_schedule_in_tx(&mut tx, tenant_id, issue.invoice.id_typed(), &issue.schedule).await?;
        commit(tx).await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %id), err)]
    async fn invoice(&self, tenant_id: TenantId, id: InvoiceId) -> StoreResult<Option<Invoice>> {
        self.load_doc(
            "invoice",
            "SELECT doc FROM invoices WHERE tenant_id = $1 AND id = $2",
            tenant_id,
            *id.as_uuid(),
        )
        .await
    }

    #[instrument(skip(self, invoice, schedule), fields(invoice_id = %invoice.id_typed()), err)]
    async fn save_invoice(&self, invoice: &Invoice, expected_version: u64, schedule: &[ScheduleEntry]) -> StoreResult<()> {
        let tenant_id = require_tenant(invoice.tenant_id())?;
        let mut tx = self.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE invoices SET doc = $3, version = $4
            WHERE tenant_id = $1 AND id = $2 AND version = $5
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(invoice.id_typed().as_uuid())
        .bind(json(invoice))
        .bind(invoice.version() as i64)
        .bind(expected_version as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("save_invoice", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Concurrency(format!(
                "invoice {} is missing or no longer at version {expected_version}",
                invoice.id_typed()
            )));
        }
        replace_schedule_in_tx(&mut tx, tenant_id, invoice.id_typed(), schedule).await?;
        commit(tx).await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, invoice_id = %invoice_id), err)]
    async fn schedule(&self, tenant_id: TenantId, invoice_id: InvoiceId) -> StoreResult<Vec<ScheduleEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT installment, due_date, amount FROM payment_schedules
            WHERE tenant_id = $1 AND invoice_id = $2
            ORDER BY installment
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(invoice_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("schedule", e))?;

        rows.iter()
            .map(|row| {
                let installment: i32 = row.try_get("installment").map_err(decode)?;
                let due_date: NaiveDate = row.try_get("due_date").map_err(decode)?;
                let amount: Decimal = row.try_get("amount").map_err(decode)?;
                Ok(ScheduleEntry {
                    invoice_id,
                    installment: installment as u32,
                    due_date,
                    amount,
                })
            })
            .collect()
    }

    #[instrument(skip(self, issue), fields(note_id = %issue.note.id, order_id = %issue.note.source_order), err)]
    async fn insert_delivery_note(&self, issue: DeliveryIssue) -> StoreResult<()> {
        let note = &issue.note;
        let mut tx = self.begin().await?;
        insert_guard_in_tx(&mut tx, note.tenant_id, &issue.guard).await?;
        sqlx::query(
            r#"
            INSERT INTO delivery_notes (tenant_id, id, causale_code, sequence, year, number, source_order, doc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(note.tenant_id.as_uuid())
        .bind(note.id.as_uuid())
        .bind(&note.causale_code)
        .bind(note.number.sequence.as_str())
        .bind(note.number.year)
        .bind(note.number.number as i64)
        .bind(note.source_order.as_uuid())
        .bind(json(note))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("insert_delivery_note", e))?;
        commit(tx).await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, note_id = %id), err)]
    async fn delivery_note(&self, tenant_id: TenantId, id: DeliveryNoteId) -> StoreResult<Option<DeliveryNote>> {
        self.load_doc(
            "delivery_note",
            "SELECT doc FROM delivery_notes WHERE tenant_id = $1 AND id = $2",
            tenant_id,
            *id.as_uuid(),
        )
        .await
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id, order_id = %order_id), err)]
    async fn delivery_note_for_order(&self, tenant_id: TenantId, order_id: OrderId) -> StoreResult<Option<DeliveryNote>> {
        self.load_doc(
            "delivery_note_for_order",
            "SELECT doc FROM delivery_notes WHERE tenant_id = $1 AND source_order = $2",
            tenant_id,
            *order_id.as_uuid(),
        )
        .await
    }
}
