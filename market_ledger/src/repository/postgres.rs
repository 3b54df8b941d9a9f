//! PostgreSQL implementation of `LedgerRepository`.
//!
//! Wallet rows are locked with `SELECT ... FOR UPDATE` for the duration of a
//! mutation, so concurrent writers to one wallet serialize and every entry's
//! `balance_before` matches the row it was computed from.
#![allow(clippy::needless_raw_string_hashes)]

use super::{LedgerRepository, OrderHolding, ensure_not_duplicate};
use crate::config::PlatformConfig;
use crate::ledger::{
    Bucket, EntryFilter, EntryType, LedgerEntry, LedgerError, LedgerResult, NewLedgerEntry, Page,
    Reference, ReferenceType, WalletKind,
};
use crate::refund::models::{
    CustomerDebt, NewCustomerDebt, NewRefund, RefundFilter, RefundRequest, RefundTransition,
    completed_total, ensure_fits_order,
};
use crate::wallet::models::{CustomerWallet, PLATFORM_WALLET_KEY, PlatformWallet, ShopWallet};
use crate::wallet::mutation::{MutationOutcome, WalletMutation, WalletSnapshot};
use crate::withdrawal::models::{
    BankAccount, NewWithdrawal, WithdrawalFilter, WithdrawalRequest, WithdrawalTransition,
};
use crate::db::timeouts::{DEFAULT_TRANSACTION_TIMEOUT, with_timeout};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use std::time::Duration;

/// Repository over a PostgreSQL pool
#[derive(Clone)]
pub struct PgLedgerRepository {
    pool: PgPool,
    transaction_timeout: Duration,
}

impl PgLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
        }
    }

    /// Bound every locking transaction by `timeout`; an expired one is
    /// rolled back and reported as `LedgerError::Timeout`
    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn utc(row: &PgRow, column: &str) -> DateTime<Utc> {
    row.get::<NaiveDateTime, _>(column).and_utc()
}

fn utc_opt(row: &PgRow, column: &str) -> Option<DateTime<Utc>> {
    row.get::<Option<NaiveDateTime>, _>(column)
        .map(|t| t.and_utc())
}

fn shop_from_row(row: &PgRow) -> ShopWallet {
    ShopWallet {
        shop_id: row.get("shop_id"),
        available_balance: row.get("available_balance"),
        pending_balance: row.get("pending_balance"),
        total_earned: row.get("total_earned"),
        total_withdrawn: row.get("total_withdrawn"),
        total_refunded: row.get("total_refunded"),
        created_at: utc(row, "created_at"),
        last_updated: utc(row, "last_updated"),
    }
}

fn customer_from_row(row: &PgRow) -> CustomerWallet {
    CustomerWallet {
        customer_id: row.get("customer_id"),
        balance: row.get("balance"),
        total_refunded: row.get("total_refunded"),
        total_spent: row.get("total_spent"),
        total_withdrawn: row.get("total_withdrawn"),
        created_at: utc(row, "created_at"),
        last_updated: utc(row, "last_updated"),
    }
}

fn platform_from_row(row: &PgRow) -> PlatformWallet {
    PlatformWallet {
        balance: row.get("balance"),
        total_commission_earned: row.get("total_commission_earned"),
        total_commission_refunded: row.get("total_commission_refunded"),
        total_payout: row.get("total_payout"),
        created_at: utc(row, "created_at"),
        last_updated: utc(row, "last_updated"),
    }
}

fn entry_from_row(row: &PgRow) -> LedgerResult<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.get("id"),
        wallet_kind: row.get::<String, _>("wallet_kind").parse()?,
        wallet_id: row.get("wallet_id"),
        entry_type: row.get::<String, _>("entry_type").parse()?,
        bucket: row.get::<String, _>("bucket").parse()?,
        amount: row.get("amount"),
        balance_before: row.get("balance_before"),
        balance_after: row.get("balance_after"),
        reference_id: row.get("reference_id"),
        reference_type: row.get::<String, _>("reference_type").parse()?,
        description: row.get("description"),
        created_at: utc(row, "created_at"),
    })
}

fn withdrawal_from_row(row: &PgRow) -> LedgerResult<WithdrawalRequest> {
    Ok(WithdrawalRequest {
        id: row.get("id"),
        owner_kind: row.get::<String, _>("owner_kind").parse()?,
        owner_id: row.get("owner_id"),
        amount: row.get("amount"),
        bank: BankAccount {
            bank_name: row.get("bank_name"),
            account_number: row.get("account_number"),
            account_holder: row.get("account_holder"),
        },
        status: row.get::<String, _>("status").parse()?,
        requested_at: utc(row, "requested_at"),
        approved_by: row.get("approved_by"),
        approved_at: utc_opt(row, "approved_at"),
        admin_note: row.get("admin_note"),
        processed_at: utc_opt(row, "processed_at"),
        completed_at: utc_opt(row, "completed_at"),
        failure_reason: row.get("failure_reason"),
        transaction_reference: row.get("transaction_reference"),
        updated_at: utc(row, "updated_at"),
    })
}

fn refund_from_row(row: &PgRow) -> LedgerResult<RefundRequest> {
    Ok(RefundRequest {
        id: row.get("id"),
        order_id: row.get("order_id"),
        requested_by: row.get("requested_by"),
        recipient: row.get::<String, _>("recipient").parse()?,
        reason_type: row.get::<String, _>("reason_type").parse()?,
        reason: row.get("reason"),
        refund_amount: row.get("refund_amount"),
        status: row.get::<String, _>("status").parse()?,
        shop_response: row.get("shop_response"),
        responded_at: utc_opt(row, "responded_at"),
        admin_id: row.get("admin_id"),
        admin_note: row.get("admin_note"),
        approved_at: utc_opt(row, "approved_at"),
        completed_at: utc_opt(row, "completed_at"),
        failure_reason: row.get("failure_reason"),
        created_at: utc(row, "created_at"),
        updated_at: utc(row, "updated_at"),
    })
}

fn debt_from_row(row: &PgRow) -> CustomerDebt {
    CustomerDebt {
        id: row.get("id"),
        customer_id: row.get("customer_id"),
        refund_id: row.get("refund_id"),
        order_id: row.get("order_id"),
        amount: row.get("amount"),
        created_at: utc(row, "created_at"),
    }
}

const WITHDRAWAL_COLUMNS: &str = "id, owner_kind, owner_id, amount, bank_name, account_number, \
     account_holder, status, requested_at, approved_by, approved_at, admin_note, processed_at, \
     completed_at, failure_reason, transaction_reference, updated_at";

const REFUND_COLUMNS: &str = "id, order_id, requested_by, recipient, reason_type, reason, \
     refund_amount, status, shop_response, responded_at, admin_id, admin_note, approved_at, \
     completed_at, failure_reason, created_at, updated_at";

const ENTRY_COLUMNS: &str = "id, wallet_kind, wallet_id, entry_type, bucket, amount, \
     balance_before, balance_after, reference_id, reference_type, description, created_at";

/// Fetch the wallet a mutation targets, creating it if needed.
///
/// With `lock` set the row stays locked until the surrounding transaction ends.
async fn load_wallet(
    conn: &mut PgConnection,
    kind: WalletKind,
    wallet_id: i64,
    lock: bool,
) -> LedgerResult<WalletSnapshot> {
    let suffix = if lock { " FOR UPDATE" } else { "" };

    let snapshot = match kind {
        WalletKind::Shop => {
            sqlx::query("INSERT INTO shop_wallets (shop_id) VALUES ($1) ON CONFLICT (shop_id) DO NOTHING")
                .bind(wallet_id)
                .execute(&mut *conn)
                .await?;
            let row = sqlx::query(&format!(
                "SELECT shop_id, available_balance, pending_balance, total_earned, total_withdrawn,
                        total_refunded, created_at, last_updated
                 FROM shop_wallets WHERE shop_id = $1{suffix}"
            ))
            .bind(wallet_id)
            .fetch_one(&mut *conn)
            .await?;
            WalletSnapshot::Shop(shop_from_row(&row))
        }
        WalletKind::Customer => {
            sqlx::query("INSERT INTO customer_wallets (customer_id) VALUES ($1) ON CONFLICT (customer_id) DO NOTHING")
                .bind(wallet_id)
                .execute(&mut *conn)
                .await?;
            let row = sqlx::query(&format!(
                "SELECT customer_id, balance, total_refunded, total_spent, total_withdrawn,
                        created_at, last_updated
                 FROM customer_wallets WHERE customer_id = $1{suffix}"
            ))
            .bind(wallet_id)
            .fetch_one(&mut *conn)
            .await?;
            WalletSnapshot::Customer(customer_from_row(&row))
        }
        WalletKind::Platform => {
            sqlx::query("INSERT INTO platform_wallet (wallet_key) VALUES ($1) ON CONFLICT (wallet_key) DO NOTHING")
                .bind(PLATFORM_WALLET_KEY)
                .execute(&mut *conn)
                .await?;
            let row = sqlx::query(&format!(
                "SELECT balance, total_commission_earned, total_commission_refunded, total_payout,
                        created_at, last_updated
                 FROM platform_wallet WHERE wallet_key = $1{suffix}"
            ))
            .bind(PLATFORM_WALLET_KEY)
            .fetch_one(&mut *conn)
            .await?;
            WalletSnapshot::Platform(platform_from_row(&row))
        }
    };

    Ok(snapshot)
}

async fn store_wallet(conn: &mut PgConnection, wallet: &WalletSnapshot) -> LedgerResult<()> {
    match wallet {
        WalletSnapshot::Shop(w) => {
            sqlx::query(
                r#"
                UPDATE shop_wallets
                SET available_balance = $2, pending_balance = $3, total_earned = $4,
                    total_withdrawn = $5, total_refunded = $6, last_updated = $7
                WHERE shop_id = $1
                "#,
            )
            .bind(w.shop_id)
            .bind(w.available_balance)
            .bind(w.pending_balance)
            .bind(w.total_earned)
            .bind(w.total_withdrawn)
            .bind(w.total_refunded)
            .bind(w.last_updated.naive_utc())
            .execute(&mut *conn)
            .await?;
        }
        WalletSnapshot::Customer(w) => {
            sqlx::query(
                r#"
                UPDATE customer_wallets
                SET balance = $2, total_refunded = $3, total_spent = $4, total_withdrawn = $5,
                    last_updated = $6
                WHERE customer_id = $1
                "#,
            )
            .bind(w.customer_id)
            .bind(w.balance)
            .bind(w.total_refunded)
            .bind(w.total_spent)
            .bind(w.total_withdrawn)
            .bind(w.last_updated.naive_utc())
            .execute(&mut *conn)
            .await?;
        }
        WalletSnapshot::Platform(w) => {
            sqlx::query(
                r#"
                UPDATE platform_wallet
                SET balance = $2, total_commission_earned = $3, total_commission_refunded = $4,
                    total_payout = $5, last_updated = $6
                WHERE wallet_key = $1
                "#,
            )
            .bind(PLATFORM_WALLET_KEY)
            .bind(w.balance)
            .bind(w.total_commission_earned)
            .bind(w.total_commission_refunded)
            .bind(w.total_payout)
            .bind(w.last_updated.naive_utc())
            .execute(&mut *conn)
            .await?;
        }
    }
    Ok(())
}

async fn insert_entry(
    conn: &mut PgConnection,
    kind: WalletKind,
    wallet_id: i64,
    draft: NewLedgerEntry,
    now: DateTime<Utc>,
) -> LedgerResult<LedgerEntry> {
    let row = sqlx::query(
        r#"
        INSERT INTO ledger_entries
            (wallet_kind, wallet_id, entry_type, bucket, amount, balance_before, balance_after,
             reference_id, reference_type, description, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING id
        "#,
    )
    .bind(kind.as_str())
    .bind(wallet_id)
    .bind(draft.entry_type.as_str())
    .bind(draft.bucket.as_str())
    .bind(draft.amount)
    .bind(draft.balance_before)
    .bind(draft.balance_after)
    .bind(draft.reference.id)
    .bind(draft.reference.kind.as_str())
    .bind(&draft.description)
    .bind(now.naive_utc())
    .fetch_one(&mut *conn)
    .await?;

    Ok(draft.into_entry(row.get("id"), kind, wallet_id, now))
}

/// Count revenue and reversal entries for an order on one wallet
async fn revenue_counts(
    conn: &mut PgConnection,
    mutation: &WalletMutation,
    reference: Reference,
) -> LedgerResult<(i64, i64)> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) FILTER (WHERE entry_type = $5) AS booked,
            COUNT(*) FILTER (WHERE entry_type = $6) AS reversed
        FROM ledger_entries
        WHERE wallet_kind = $1 AND wallet_id = $2 AND reference_id = $3 AND reference_type = $4
        "#,
    )
    .bind(mutation.wallet_kind().as_str())
    .bind(mutation.wallet_id())
    .bind(reference.id)
    .bind(reference.kind.as_str())
    .bind(mutation.revenue_entry_type().as_str())
    .bind(EntryType::Reversal.as_str())
    .fetch_one(&mut *conn)
    .await?;

    Ok((row.get("booked"), row.get("reversed")))
}

/// Apply one mutation inside an open transaction
async fn apply_in_tx(
    conn: &mut PgConnection,
    mutation: &WalletMutation,
) -> LedgerResult<MutationOutcome> {
    let now = Utc::now();
    let (kind, wallet_id) = (mutation.wallet_kind(), mutation.wallet_id());

    let mut wallet = load_wallet(conn, kind, wallet_id, true).await?;

    // The wallet lock serializes this check with any concurrent credit
    if let Some(reference) = mutation.order_revenue_reference() {
        let (booked, reversed) = revenue_counts(conn, mutation, reference).await?;
        ensure_not_duplicate(mutation, reference.id, booked, reversed)?;
    }

    let drafts = mutation.apply_to(&mut wallet, now)?;
    store_wallet(conn, &wallet).await?;

    let mut entries = Vec::with_capacity(drafts.len());
    for draft in drafts {
        entries.push(insert_entry(conn, kind, wallet_id, draft, now).await?);
    }

    Ok(MutationOutcome { wallet, entries })
}

async fn lock_withdrawal(conn: &mut PgConnection, id: i64) -> LedgerResult<WithdrawalRequest> {
    let row = sqlx::query(&format!(
        "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawal_requests WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(LedgerError::NotFound {
        entity: "withdrawal",
        id,
    })?;

    withdrawal_from_row(&row)
}

async fn lock_refund(conn: &mut PgConnection, id: i64) -> LedgerResult<RefundRequest> {
    let row = sqlx::query(&format!(
        "SELECT {REFUND_COLUMNS} FROM refund_requests WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(LedgerError::NotFound { entity: "refund", id })?;

    refund_from_row(&row)
}

/// Lock every refund of the order that refund `id` belongs to, in id order
async fn lock_order_refunds(conn: &mut PgConnection, id: i64) -> LedgerResult<Vec<RefundRequest>> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {REFUND_COLUMNS} FROM refund_requests
        WHERE order_id = (SELECT order_id FROM refund_requests WHERE id = $1)
        ORDER BY id
        FOR UPDATE
        "#
    ))
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    if rows.is_empty() {
        return Err(LedgerError::NotFound { entity: "refund", id });
    }
    rows.iter().map(refund_from_row).collect()
}

fn find_refund(order_refunds: &[RefundRequest], id: i64) -> LedgerResult<RefundRequest> {
    order_refunds
        .iter()
        .find(|r| r.id == id)
        .cloned()
        .ok_or(LedgerError::NotFound { entity: "refund", id })
}

async fn store_refund(conn: &mut PgConnection, request: &RefundRequest) -> LedgerResult<()> {
    sqlx::query(
        r#"
        UPDATE refund_requests
        SET status = $2, shop_response = $3, responded_at = $4, admin_id = $5,
            admin_note = $6, approved_at = $7, completed_at = $8, failure_reason = $9,
            updated_at = $10
        WHERE id = $1
        "#,
    )
    .bind(request.id)
    .bind(request.status.as_str())
    .bind(&request.shop_response)
    .bind(request.responded_at.map(|t| t.naive_utc()))
    .bind(request.admin_id)
    .bind(&request.admin_note)
    .bind(request.approved_at.map(|t| t.naive_utc()))
    .bind(request.completed_at.map(|t| t.naive_utc()))
    .bind(&request.failure_reason)
    .bind(request.updated_at.naive_utc())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl LedgerRepository for PgLedgerRepository {
    async fn platform_config(&self) -> LedgerResult<PlatformConfig> {
        let row = sqlx::query(
            r#"
            SELECT min_withdrawal_amount, max_withdrawal_amount, order_holding_days, max_refund_days
            FROM platform_config
            WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => PlatformConfig {
                min_withdrawal_amount: row.get("min_withdrawal_amount"),
                max_withdrawal_amount: row.get("max_withdrawal_amount"),
                order_holding_days: row.get("order_holding_days"),
                max_refund_days: row.get("max_refund_days"),
            },
            None => PlatformConfig::default(),
        })
    }

    async fn update_platform_config(
        &self,
        config: &PlatformConfig,
    ) -> LedgerResult<PlatformConfig> {
        config.validate()?;

        sqlx::query(
            r#"
            INSERT INTO platform_config
                (id, min_withdrawal_amount, max_withdrawal_amount, order_holding_days,
                 max_refund_days, updated_at)
            VALUES (1, $1, $2, $3, $4, NOW())
            ON CONFLICT (id) DO UPDATE
            SET min_withdrawal_amount = EXCLUDED.min_withdrawal_amount,
                max_withdrawal_amount = EXCLUDED.max_withdrawal_amount,
                order_holding_days = EXCLUDED.order_holding_days,
                max_refund_days = EXCLUDED.max_refund_days,
                updated_at = NOW()
            "#,
        )
        .bind(config.min_withdrawal_amount)
        .bind(config.max_withdrawal_amount)
        .bind(config.order_holding_days)
        .bind(config.max_refund_days)
        .execute(&self.pool)
        .await?;

        Ok(*config)
    }

    async fn get_or_create_shop_wallet(&self, shop_id: i64) -> LedgerResult<ShopWallet> {
        let mut conn = self.pool.acquire().await?;
        load_wallet(&mut conn, WalletKind::Shop, shop_id, false)
            .await?
            .into_shop()
    }

    async fn get_or_create_customer_wallet(
        &self,
        customer_id: i64,
    ) -> LedgerResult<CustomerWallet> {
        let mut conn = self.pool.acquire().await?;
        load_wallet(&mut conn, WalletKind::Customer, customer_id, false)
            .await?
            .into_customer()
    }

    async fn get_or_create_platform_wallet(&self) -> LedgerResult<PlatformWallet> {
        let mut conn = self.pool.acquire().await?;
        load_wallet(&mut conn, WalletKind::Platform, 0, false)
            .await?
            .into_platform()
    }

    async fn apply_mutation(&self, mutation: &WalletMutation) -> LedgerResult<MutationOutcome> {
        with_timeout(self.transaction_timeout, async {
            let mut tx = self.pool.begin().await?;
            let outcome = apply_in_tx(&mut tx, mutation).await?;
            tx.commit().await?;
            Ok::<_, LedgerError>(outcome)
        })
        .await
    }

    async fn list_entries(&self, filter: &EntryFilter) -> LedgerResult<Page<LedgerEntry>> {
        const WHERE: &str = r#"
            WHERE ($1::TEXT IS NULL OR wallet_kind = $1)
              AND ($2::BIGINT IS NULL OR wallet_id = $2)
              AND ($3::TEXT IS NULL OR entry_type = $3)
              AND ($4::TIMESTAMP IS NULL OR created_at >= $4)
              AND ($5::TIMESTAMP IS NULL OR created_at < $5)
        "#;

        let kind = filter.wallet_kind.map(|k| k.as_str());
        let entry_type = filter.entry_type.map(|t| t.as_str());
        let from = filter.from.map(|t| t.naive_utc());
        let to = filter.to.map(|t| t.naive_utc());

        let total: i64 = sqlx::query(&format!("SELECT COUNT(*) AS total FROM ledger_entries {WHERE}"))
            .bind(kind)
            .bind(filter.wallet_id)
            .bind(entry_type)
            .bind(from)
            .bind(to)
            .fetch_one(&self.pool)
            .await?
            .get("total");

        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries {WHERE}
             ORDER BY created_at DESC, id DESC
             LIMIT $6 OFFSET $7"
        ))
        .bind(kind)
        .bind(filter.wallet_id)
        .bind(entry_type)
        .bind(from)
        .bind(to)
        .bind(filter.limit())
        .bind(filter.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items: rows.iter().map(entry_from_row).collect::<LedgerResult<_>>()?,
            total,
            limit: filter.limit(),
            offset: filter.offset(),
        })
    }

    async fn insert_withdrawal(&self, request: NewWithdrawal) -> LedgerResult<WithdrawalRequest> {
        let now = Utc::now().naive_utc();
        let row = sqlx::query(&format!(
            "INSERT INTO withdrawal_requests
                (owner_kind, owner_id, amount, bank_name, account_number, account_holder,
                 status, requested_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $7)
             RETURNING {WITHDRAWAL_COLUMNS}"
        ))
        .bind(request.owner_kind.as_str())
        .bind(request.owner_id)
        .bind(request.amount)
        .bind(&request.bank.bank_name)
        .bind(&request.bank.account_number)
        .bind(&request.bank.account_holder)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        withdrawal_from_row(&row)
    }

    async fn get_withdrawal(&self, id: i64) -> LedgerResult<WithdrawalRequest> {
        let row = sqlx::query(&format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawal_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::NotFound {
            entity: "withdrawal",
            id,
        })?;

        withdrawal_from_row(&row)
    }

    async fn list_withdrawals(
        &self,
        filter: &WithdrawalFilter,
    ) -> LedgerResult<Page<WithdrawalRequest>> {
        const WHERE: &str = r#"
            WHERE ($1::TEXT IS NULL OR status = $1)
              AND ($2::TEXT IS NULL OR owner_kind = $2)
              AND ($3::BIGINT IS NULL OR owner_id = $3)
        "#;

        let status = filter.status.map(|s| s.as_str());
        let owner_kind = filter.owner_kind.map(|k| k.as_str());

        let total: i64 = sqlx::query(&format!(
            "SELECT COUNT(*) AS total FROM withdrawal_requests {WHERE}"
        ))
        .bind(status)
        .bind(owner_kind)
        .bind(filter.owner_id)
        .fetch_one(&self.pool)
        .await?
        .get("total");

        let rows = sqlx::query(&format!(
            "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawal_requests {WHERE}
             ORDER BY requested_at DESC, id DESC
             LIMIT $4 OFFSET $5"
        ))
        .bind(status)
        .bind(owner_kind)
        .bind(filter.owner_id)
        .bind(filter.limit())
        .bind(filter.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items: rows
                .iter()
                .map(withdrawal_from_row)
                .collect::<LedgerResult<_>>()?,
            total,
            limit: filter.limit(),
            offset: filter.offset(),
        })
    }

    async fn transition_withdrawal(
        &self,
        id: i64,
        transition: &WithdrawalTransition,
        mutation: Option<&WalletMutation>,
    ) -> LedgerResult<WithdrawalRequest> {
        with_timeout(self.transaction_timeout, async {
            let mut tx = self.pool.begin().await?;

            let mut request = lock_withdrawal(&mut tx, id).await?;
            request.apply_transition(transition, Utc::now())?;

            if let Some(mutation) = mutation {
                apply_in_tx(&mut tx, mutation).await?;
            }

            sqlx::query(
                r#"
                UPDATE withdrawal_requests
                SET status = $2, approved_by = $3, approved_at = $4, admin_note = $5,
                    processed_at = $6, completed_at = $7, failure_reason = $8,
                    transaction_reference = $9, updated_at = $10
                WHERE id = $1
                "#,
            )
            .bind(request.id)
            .bind(request.status.as_str())
            .bind(request.approved_by)
            .bind(request.approved_at.map(|t| t.naive_utc()))
            .bind(&request.admin_note)
            .bind(request.processed_at.map(|t| t.naive_utc()))
            .bind(request.completed_at.map(|t| t.naive_utc()))
            .bind(&request.failure_reason)
            .bind(&request.transaction_reference)
            .bind(request.updated_at.naive_utc())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok::<_, LedgerError>(request)
        })
        .await
    }

    async fn insert_refund(&self, request: NewRefund) -> LedgerResult<RefundRequest> {
        let now = Utc::now().naive_utc();
        let row = sqlx::query(&format!(
            "INSERT INTO refund_requests
                (order_id, requested_by, recipient, reason_type, reason, refund_amount,
                 status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $7)
             RETURNING {REFUND_COLUMNS}"
        ))
        .bind(request.order_id)
        .bind(request.requested_by)
        .bind(request.reason_type.recipient().as_str())
        .bind(request.reason_type.as_str())
        .bind(&request.reason)
        .bind(request.refund_amount)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        refund_from_row(&row)
    }

    async fn get_refund(&self, id: i64) -> LedgerResult<RefundRequest> {
        let row = sqlx::query(&format!(
            "SELECT {REFUND_COLUMNS} FROM refund_requests WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::NotFound { entity: "refund", id })?;

        refund_from_row(&row)
    }

    async fn list_refunds(&self, filter: &RefundFilter) -> LedgerResult<Page<RefundRequest>> {
        const WHERE: &str = r#"
            WHERE ($1::TEXT IS NULL OR status = $1)
              AND ($2::BIGINT IS NULL OR order_id = $2)
        "#;

        let status = filter.status.map(|s| s.as_str());

        let total: i64 = sqlx::query(&format!(
            "SELECT COUNT(*) AS total FROM refund_requests {WHERE}"
        ))
        .bind(status)
        .bind(filter.order_id)
        .fetch_one(&self.pool)
        .await?
        .get("total");

        let rows = sqlx::query(&format!(
            "SELECT {REFUND_COLUMNS} FROM refund_requests {WHERE}
             ORDER BY created_at DESC, id DESC
             LIMIT $3 OFFSET $4"
        ))
        .bind(status)
        .bind(filter.order_id)
        .bind(filter.limit())
        .bind(filter.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items: rows
                .iter()
                .map(refund_from_row)
                .collect::<LedgerResult<_>>()?,
            total,
            limit: filter.limit(),
            offset: filter.offset(),
        })
    }

    async fn transition_refund(
        &self,
        id: i64,
        transition: &RefundTransition,
    ) -> LedgerResult<RefundRequest> {
        with_timeout(self.transaction_timeout, async {
            let mut tx = self.pool.begin().await?;

            let mut request = lock_refund(&mut tx, id).await?;
            request.apply_transition(transition, Utc::now())?;
            store_refund(&mut tx, &request).await?;

            tx.commit().await?;
            Ok::<_, LedgerError>(request)
        })
        .await
    }

    async fn approve_refund(
        &self,
        id: i64,
        order_total: i64,
        transition: &RefundTransition,
    ) -> LedgerResult<RefundRequest> {
        with_timeout(self.transaction_timeout, async {
            let mut tx = self.pool.begin().await?;

            let order_refunds = lock_order_refunds(&mut tx, id).await?;
            let mut request = find_refund(&order_refunds, id)?;
            request.apply_transition(transition, Utc::now())?;
            ensure_fits_order(&request, &order_refunds, order_total)?;
            store_refund(&mut tx, &request).await?;

            tx.commit().await?;
            Ok::<_, LedgerError>(request)
        })
        .await
    }

    async fn complete_refund(&self, id: i64) -> LedgerResult<(RefundRequest, i64)> {
        with_timeout(self.transaction_timeout, async {
            let mut tx = self.pool.begin().await?;

            let mut order_refunds = lock_order_refunds(&mut tx, id).await?;
            let mut request = find_refund(&order_refunds, id)?;
            request.apply_transition(&RefundTransition::Complete, Utc::now())?;
            store_refund(&mut tx, &request).await?;

            for sibling in &mut order_refunds {
                if sibling.id == id {
                    *sibling = request.clone();
                }
            }
            let total = completed_total(&order_refunds)?;

            tx.commit().await?;
            Ok::<_, LedgerError>((request, total))
        })
        .await
    }

    async fn completed_refund_total(&self, order_id: i64) -> LedgerResult<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(refund_amount), 0)::BIGINT AS total
            FROM refund_requests
            WHERE order_id = $1 AND status = 'completed'
            "#,
        )
        .bind(order_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("total"))
    }

    async fn order_holding(&self, shop_id: i64, order_id: i64) -> LedgerResult<OrderHolding> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(amount), 0)::BIGINT AS pending,
                COUNT(*) FILTER (WHERE reference_type = $4 AND entry_type = $6) AS booked,
                COUNT(*) FILTER (WHERE reference_type = $4 AND entry_type = $7) AS reversed
            FROM ledger_entries
            WHERE wallet_kind = $1 AND wallet_id = $2 AND bucket = $3
              AND (
                (reference_type = $4 AND reference_id = $8)
                OR (reference_type = $5
                    AND reference_id IN (SELECT id FROM refund_requests WHERE order_id = $8))
              )
            "#,
        )
        .bind(WalletKind::Shop.as_str())
        .bind(shop_id)
        .bind(Bucket::Pending.as_str())
        .bind(ReferenceType::Order.as_str())
        .bind(ReferenceType::RefundRequest.as_str())
        .bind(EntryType::OrderRevenue.as_str())
        .bind(EntryType::Reversal.as_str())
        .bind(order_id)
        .fetch_one(&self.pool)
        .await?;

        let booked: i64 = row.get("booked");
        let reversed: i64 = row.get("reversed");
        Ok(OrderHolding {
            revenue_booked: booked > reversed,
            pending: row.get("pending"),
        })
    }

    async fn insert_debt(&self, debt: NewCustomerDebt) -> LedgerResult<CustomerDebt> {
        let row = sqlx::query(
            r#"
            INSERT INTO customer_debts (customer_id, refund_id, order_id, amount, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, customer_id, refund_id, order_id, amount, created_at
            "#,
        )
        .bind(debt.customer_id)
        .bind(debt.refund_id)
        .bind(debt.order_id)
        .bind(debt.amount)
        .bind(Utc::now().naive_utc())
        .fetch_one(&self.pool)
        .await?;

        Ok(debt_from_row(&row))
    }

    async fn list_debts(&self, customer_id: i64) -> LedgerResult<Vec<CustomerDebt>> {
        let rows = sqlx::query(
            r#"
            SELECT id, customer_id, refund_id, order_id, amount, created_at
            FROM customer_debts
            WHERE customer_id = $1
            ORDER BY id
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(debt_from_row).collect())
    }
}
