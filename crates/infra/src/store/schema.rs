//! Schema bootstrap for [`super::PostgresStore`].
//!
//! Every statement is idempotent so `ensure_schema` can run at each startup.
//! Reference records and documents are stored whole as JSONB next to the
//! columns that constraints, locks and dependent counts need.

use sqlx::PgPool;
use tracing::instrument;

use super::postgres::map_sqlx_error;
use super::StoreResult;

pub const PRODUCTS_CODE_KEY: &str = "products_code_key";
pub const CATEGORIES_NAME_KEY: &str = "subject_categories_name_key";
pub const WAREHOUSES_CODE_KEY: &str = "warehouses_code_key";
pub const LEDGER_SINGLE_REVERSAL: &str = "ledger_entries_single_reversal";
pub const NUMBER_KEYS: [&str; 3] = ["orders_number_key", "invoices_number_key", "delivery_notes_number_key"];

pub(crate) const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS subject_categories (
        tenant_id UUID NOT NULL,
        id UUID NOT NULL,
        name TEXT NOT NULL,
        PRIMARY KEY (tenant_id, id)
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS subject_categories_name_key
        ON subject_categories (tenant_id, lower(name))
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subjects (
        tenant_id UUID NOT NULL,
        id UUID NOT NULL,
        category_id UUID,
        roles SMALLINT NOT NULL,
        doc JSONB NOT NULL,
        PRIMARY KEY (tenant_id, id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS products (
        tenant_id UUID NOT NULL,
        id UUID NOT NULL,
        code TEXT NOT NULL,
        doc JSONB NOT NULL,
        PRIMARY KEY (tenant_id, id),
        CONSTRAINT products_code_key UNIQUE (tenant_id, code)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS warehouses (
        tenant_id UUID NOT NULL,
        id UUID NOT NULL,
        code TEXT NOT NULL,
        is_primary BOOLEAN NOT NULL DEFAULT FALSE,
        doc JSONB NOT NULL,
        PRIMARY KEY (tenant_id, id)
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS warehouses_code_key
        ON warehouses (tenant_id, lower(code))
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS warehouses_single_primary
        ON warehouses (tenant_id) WHERE is_primary
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS vat_codes (
        tenant_id UUID NOT NULL,
        code TEXT NOT NULL,
        doc JSONB NOT NULL,
        PRIMARY KEY (tenant_id, code)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS payment_methods (
        tenant_id UUID NOT NULL,
        code TEXT NOT NULL,
        doc JSONB NOT NULL,
        PRIMARY KEY (tenant_id, code)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS movement_causali (
        tenant_id UUID NOT NULL,
        code TEXT NOT NULL,
        inverse_code TEXT,
        doc JSONB NOT NULL,
        PRIMARY KEY (tenant_id, code)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS document_causali (
        tenant_id UUID NOT NULL,
        code TEXT NOT NULL,
        movement_code TEXT,
        doc JSONB NOT NULL,
        PRIMARY KEY (tenant_id, code)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS numbering_counters (
        tenant_id UUID NOT NULL,
        sequence TEXT NOT NULL,
        year INTEGER NOT NULL,
        last_number BIGINT NOT NULL,
        PRIMARY KEY (tenant_id, sequence, year)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS orders (
        tenant_id UUID NOT NULL,
        id UUID NOT NULL,
        causale_code TEXT NOT NULL,
        sequence TEXT NOT NULL,
        year INTEGER NOT NULL,
        number BIGINT NOT NULL,
        warehouse_id UUID,
        version BIGINT NOT NULL,
        doc JSONB NOT NULL,
        PRIMARY KEY (tenant_id, id),
        CONSTRAINT orders_number_key UNIQUE (tenant_id, sequence, year, number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invoices (
        tenant_id UUID NOT NULL,
        id UUID NOT NULL,
        causale_code TEXT NOT NULL,
        sequence TEXT NOT NULL,
        year INTEGER NOT NULL,
        number BIGINT NOT NULL,
        source_order UUID,
        version BIGINT NOT NULL,
        doc JSONB NOT NULL,
        PRIMARY KEY (tenant_id, id),
        CONSTRAINT invoices_number_key UNIQUE (tenant_id, sequence, year, number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS payment_schedules (
        tenant_id UUID NOT NULL,
        invoice_id UUID NOT NULL,
        installment INTEGER NOT NULL,
        due_date DATE NOT NULL,
        amount NUMERIC(18, 2) NOT NULL,
        PRIMARY KEY (tenant_id, invoice_id, installment)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS delivery_notes (
        tenant_id UUID NOT NULL,
        id UUID NOT NULL,
        causale_code TEXT NOT NULL,
        sequence TEXT NOT NULL,
        year INTEGER NOT NULL,
        number BIGINT NOT NULL,
        source_order UUID NOT NULL,
        doc JSONB NOT NULL,
        PRIMARY KEY (tenant_id, id),
        CONSTRAINT delivery_notes_number_key UNIQUE (tenant_id, sequence, year, number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS document_guards (
        tenant_id UUID NOT NULL,
        order_id UUID NOT NULL,
        family TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (tenant_id, order_id, family)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ledger_entries (
        id UUID PRIMARY KEY,
        tenant_id UUID NOT NULL,
        product_id UUID NOT NULL,
        warehouse_id UUID NOT NULL,
        causale_code TEXT NOT NULL,
        direction TEXT NOT NULL,
        updates_average_cost BOOLEAN NOT NULL,
        sequence BIGINT NOT NULL,
        quantity NUMERIC NOT NULL,
        unit_cost NUMERIC NOT NULL,
        average_cost_after NUMERIC NOT NULL,
        on_hand_after NUMERIC NOT NULL,
        source_kind TEXT,
        source_id UUID,
        source_line INTEGER,
        counterparty UUID,
        reverses UUID,
        posted_at TIMESTAMPTZ NOT NULL,
        CONSTRAINT ledger_entries_sequence_key UNIQUE (tenant_id, product_id, sequence)
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS ledger_entries_single_reversal
        ON ledger_entries (tenant_id, reverses) WHERE reverses IS NOT NULL
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS ledger_entries_by_causale
        ON ledger_entries (tenant_id, causale_code)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS product_stock (
        tenant_id UUID NOT NULL,
        product_id UUID NOT NULL,
        on_hand NUMERIC NOT NULL DEFAULT 0,
        average_cost NUMERIC NOT NULL DEFAULT 0,
        last_purchase_cost NUMERIC,
        last_sequence BIGINT NOT NULL DEFAULT 0,
        PRIMARY KEY (tenant_id, product_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS warehouse_stock (
        tenant_id UUID NOT NULL,
        product_id UUID NOT NULL,
        warehouse_id UUID NOT NULL,
        quantity NUMERIC NOT NULL DEFAULT 0,
        PRIMARY KEY (tenant_id, product_id, warehouse_id)
    )
    "#,
];

/// Create every table and index the store relies on.
#[instrument(skip(pool), err)]
pub async fn ensure_schema(pool: &PgPool) -> StoreResult<()> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statements_are_idempotent() {
        for statement in STATEMENTS {
            let statement = statement.trim_start();
            assert!(
                statement.starts_with("CREATE TABLE IF NOT EXISTS")
                    || statement.starts_with("CREATE UNIQUE INDEX IF NOT EXISTS")
                    || statement.starts_with("CREATE INDEX IF NOT EXISTS"),
                "not idempotent: {statement}"
            );
        }
    }

    #[test]
    fn named_constraints_exist() {
        let all = STATEMENTS.concat();
        let keys = [
            PRODUCTS_CODE_KEY,
            CATEGORIES_NAME_KEY,
            WAREHOUSES_CODE_KEY,
            LEDGER_SINGLE_REVERSAL,
        ];
        for name in keys.into_iter().chain(NUMBER_KEYS) {
            assert!(all.contains(name), "{name} missing from schema");
        }
    }
}
