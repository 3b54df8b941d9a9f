//! In-memory `LedgerRepository` used by tests and the demo server.
//!
//! All state lives behind one async mutex, which gives the same atomicity
//! the PostgreSQL implementation gets from row locks and transactions.

use super::{LedgerRepository, OrderHolding, ensure_not_duplicate};
use crate::config::PlatformConfig;
use crate::ledger::{
    Bucket, EntryFilter, EntryType, LedgerEntry, LedgerError, LedgerResult, Page, ReferenceType,
    WalletKind,
};
use crate::refund::models::{
    CustomerDebt, NewCustomerDebt, NewRefund, RefundFilter, RefundRequest, RefundStatus,
    RefundTransition, completed_total, ensure_fits_order,
};
use crate::wallet::models::{CustomerWallet, PlatformWallet, ShopWallet};
use crate::wallet::mutation::{MutationOutcome, WalletMutation, WalletSnapshot};
use crate::withdrawal::models::{
    NewWithdrawal, WithdrawalFilter, WithdrawalRequest, WithdrawalTransition,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    config: PlatformConfig,
    shops: BTreeMap<i64, ShopWallet>,
    customers: BTreeMap<i64, CustomerWallet>,
    platform: Option<PlatformWallet>,
    entries: Vec<LedgerEntry>,
    withdrawals: BTreeMap<i64, WithdrawalRequest>,
    refunds: BTreeMap<i64, RefundRequest>,
    debts: Vec<CustomerDebt>,
    next_withdrawal_id: i64,
    next_refund_id: i64,
}

impl State {
    fn wallet(&self, mutation: &WalletMutation) -> Option<WalletSnapshot> {
        match mutation {
            WalletMutation::Shop { shop_id, .. } => {
                self.shops.get(shop_id).cloned().map(WalletSnapshot::Shop)
            }
            WalletMutation::Customer { customer_id, .. } => self
                .customers
                .get(customer_id)
                .cloned()
                .map(WalletSnapshot::Customer),
            WalletMutation::Platform { .. } => {
                self.platform.clone().map(WalletSnapshot::Platform)
            }
        }
    }

    fn store_wallet(&mut self, wallet: WalletSnapshot) {
        match wallet {
            WalletSnapshot::Shop(w) => {
                self.shops.insert(w.shop_id, w);
            }
            WalletSnapshot::Customer(w) => {
                self.customers.insert(w.customer_id, w);
            }
            WalletSnapshot::Platform(w) => self.platform = Some(w),
        }
    }

    fn check_duplicate(&self, mutation: &WalletMutation) -> LedgerResult<()> {
        let Some(reference) = mutation.order_revenue_reference() else {
            return Ok(());
        };
        let revenue_type = mutation.revenue_entry_type();
        let (kind, wallet_id) = (mutation.wallet_kind(), mutation.wallet_id());

        let same_order = |entry: &&LedgerEntry| {
            entry.wallet_kind == kind
                && entry.wallet_id == wallet_id
                && entry.reference_id == reference.id
                && entry.reference_type == reference.kind
        };
        let booked = self
            .entries
            .iter()
            .filter(same_order)
            .filter(|e| e.entry_type == revenue_type)
            .count() as i64;
        let reversed = self
            .entries
            .iter()
            .filter(same_order)
            .filter(|e| e.entry_type == EntryType::Reversal)
            .count() as i64;

        ensure_not_duplicate(mutation, reference.id, booked, reversed)
    }

    /// Apply a mutation; state is untouched unless it succeeds
    fn apply(&mut self, mutation: &WalletMutation) -> LedgerResult<MutationOutcome> {
        let now = Utc::now();
        self.check_duplicate(mutation)?;

        let mut wallet = self
            .wallet(mutation)
            .unwrap_or_else(|| mutation.fresh_wallet(now));
        let drafts = mutation.apply_to(&mut wallet, now)?;

        let (kind, wallet_id) = (mutation.wallet_kind(), mutation.wallet_id());
        let first_id = self.entries.len() as i64 + 1;
        let entries: Vec<LedgerEntry> = drafts
            .into_iter()
            .enumerate()
            .map(|(i, draft)| draft.into_entry(first_id + i as i64, kind, wallet_id, now))
            .collect();

        self.entries.extend(entries.iter().cloned());
        self.store_wallet(wallet.clone());

        Ok(MutationOutcome { wallet, entries })
    }

    /// Every refund request of the order `id` belongs to
    fn order_refunds(&self, id: i64) -> LedgerResult<Vec<RefundRequest>> {
        let order_id = self
            .refunds
            .get(&id)
            .map(|r| r.order_id)
            .ok_or_else(|| refund_not_found(id))?;
        Ok(self
            .refunds
            .values()
            .filter(|r| r.order_id == order_id)
            .cloned()
            .collect())
    }
}

fn withdrawal_not_found(id: i64) -> LedgerError {
    LedgerError::NotFound {
        entity: "withdrawal",
        id,
    }
}

fn refund_not_found(id: i64) -> LedgerError {
    LedgerError::NotFound {
        entity: "refund",
        id,
    }
}

fn paginate<T: Clone>(items: Vec<T>, limit: i64, offset: i64) -> Page<T> {
    let total = items.len() as i64;
    let items = items
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect();
    Page {
        items,
        total,
        limit,
        offset,
    }
}

/// Repository backed by process memory
#[derive(Default)]
pub struct InMemoryLedgerRepository {
    state: Mutex<State>,
}

impl InMemoryLedgerRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository seeded with a platform configuration
    pub fn with_config(config: PlatformConfig) -> Self {
        Self {
            state: Mutex::new(State {
                config,
                ..State::default()
            }),
        }
    }

    /// Every entry written so far, oldest first
    pub async fn all_entries(&self) -> Vec<LedgerEntry> {
        self.state.lock().await.entries.clone()
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedgerRepository {
    async fn platform_config(&self) -> LedgerResult<PlatformConfig> {
        Ok(self.state.lock().await.config)
    }

    async fn update_platform_config(
        &self,
        config: &PlatformConfig,
    ) -> LedgerResult<PlatformConfig> {
        config.validate()?;
        let mut state = self.state.lock().await;
        state.config = *config;
        Ok(state.config)
    }

    async fn get_or_create_shop_wallet(&self, shop_id: i64) -> LedgerResult<ShopWallet> {
        let mut state = self.state.lock().await;
        Ok(state
            .shops
            .entry(shop_id)
            .or_insert_with(|| ShopWallet::new(shop_id, Utc::now()))
            .clone())
    }

    async fn get_or_create_customer_wallet(
        &self,
        customer_id: i64,
    ) -> LedgerResult<CustomerWallet> {
        let mut state = self.state.lock().await;
        Ok(state
            .customers
            .entry(customer_id)
            .or_insert_with(|| CustomerWallet::new(customer_id, Utc::now()))
            .clone())
    }

    async fn get_or_create_platform_wallet(&self) -> LedgerResult<PlatformWallet> {
        let mut state = self.state.lock().await;
        Ok(state
            .platform
            .get_or_insert_with(|| PlatformWallet::new(Utc::now()))
            .clone())
    }

    async fn apply_mutation(&self, mutation: &WalletMutation) -> LedgerResult<MutationOutcome> {
        self.state.lock().await.apply(mutation)
    }

    async fn list_entries(&self, filter: &EntryFilter) -> LedgerResult<Page<LedgerEntry>> {
        let state = self.state.lock().await;
        let mut matching: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(paginate(matching, filter.limit(), filter.offset()))
    }

    async fn insert_withdrawal(&self, request: NewWithdrawal) -> LedgerResult<WithdrawalRequest> {
        let mut state = self.state.lock().await;
        state.next_withdrawal_id += 1;
        let request = request.into_request(state.next_withdrawal_id, Utc::now());
        state.withdrawals.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get_withdrawal(&self, id: i64) -> LedgerResult<WithdrawalRequest> {
        self.state
            .lock()
            .await
            .withdrawals
            .get(&id)
            .cloned()
            .ok_or_else(|| withdrawal_not_found(id))
    }

    async fn list_withdrawals(
        &self,
        filter: &WithdrawalFilter,
    ) -> LedgerResult<Page<WithdrawalRequest>> {
        let state = self.state.lock().await;
        let mut matching: Vec<WithdrawalRequest> = state
            .withdrawals
            .values()
            .filter(|request| filter.matches(request))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.requested_at.cmp(&a.requested_at).then(b.id.cmp(&a.id)));
        Ok(paginate(matching, filter.limit(), filter.offset()))
    }

    async fn transition_withdrawal(
        &self,
        id: i64,
        transition: &WithdrawalTransition,
        mutation: Option<&WalletMutation>,
    ) -> LedgerResult<WithdrawalRequest> {
        let mut state = self.state.lock().await;
        let mut request = state
            .withdrawals
            .get(&id)
            .cloned()
            .ok_or_else(|| withdrawal_not_found(id))?;

        request.apply_transition(transition, Utc::now())?;
        if let Some(mutation) = mutation {
            state.apply(mutation)?;
        }
        state.withdrawals.insert(id, request.clone());
        Ok(request)
    }

    async fn insert_refund(&self, request: NewRefund) -> LedgerResult<RefundRequest> {
        let mut state = self.state.lock().await;
        state.next_refund_id += 1;
        let request = request.into_request(state.next_refund_id, Utc::now());
        state.refunds.insert(request.id, request.clone());
        Ok(request)
    }

    async fn get_refund(&self, id: i64) -> LedgerResult<RefundRequest> {
        self.state
            .lock()
            .await
            .refunds
            .get(&id)
            .cloned()
            .ok_or_else(|| refund_not_found(id))
    }

    async fn list_refunds(&self, filter: &RefundFilter) -> LedgerResult<Page<RefundRequest>> {
        let state = self.state.lock().await;
        let mut matching: Vec<RefundRequest> = state
            .refunds
            .values()
            .filter(|request| filter.matches(request))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(paginate(matching, filter.limit(), filter.offset()))
    }

    async fn transition_refund(
        &self,
        id: i64,
        transition: &RefundTransition,
    ) -> LedgerResult<RefundRequest> {
        let mut state = self.state.lock().await;
        let request = state
            .refunds
            .get_mut(&id)
            .ok_or_else(|| refund_not_found(id))?;
        let mut next = request.clone();
        next.apply_transition(transition, Utc::now())?;
        *request = next.clone();
        Ok(next)
    }

    async fn approve_refund(
        &self,
        id: i64,
        order_total: i64,
        transition: &RefundTransition,
    ) -> LedgerResult<RefundRequest> {
        let mut state = self.state.lock().await;
        let order_refunds = state.order_refunds(id)?;
        let mut request = state
            .refunds
            .get(&id)
            .cloned()
            .ok_or_else(|| refund_not_found(id))?;

        request.apply_transition(transition, Utc::now())?;
        ensure_fits_order(&request, &order_refunds, order_total)?;
        state.refunds.insert(id, request.clone());
        Ok(request)
    }

    async fn complete_refund(&self, id: i64) -> LedgerResult<(RefundRequest, i64)> {
        let mut state = self.state.lock().await;
        let mut request = state
            .refunds
            .get(&id)
            .cloned()
            .ok_or_else(|| refund_not_found(id))?;

        request.apply_transition(&RefundTransition::Complete, Utc::now())?;
        state.refunds.insert(id, request.clone());
        let total = completed_total(&state.order_refunds(id)?)?;
        Ok((request, total))
    }

    async fn order_holding(&self, shop_id: i64, order_id: i64) -> LedgerResult<OrderHolding> {
        let state = self.state.lock().await;
        let refund_ids: Vec<i64> = state
            .refunds
            .values()
            .filter(|r| r.order_id == order_id)
            .map(|r| r.id)
            .collect();

        let mut holding = OrderHolding::default();
        let (mut booked, mut reversed) = (0, 0);
        for entry in state.entries.iter().filter(|e| {
            e.wallet_kind == WalletKind::Shop && e.wallet_id == shop_id && e.bucket == Bucket::Pending
        }) {
            let Some(reference_id) = entry.reference_id else {
                continue;
            };
            let belongs = match entry.reference_type {
                ReferenceType::Order => reference_id == order_id,
                ReferenceType::RefundRequest => refund_ids.contains(&reference_id),
                _ => false,
            };
            if !belongs {
                continue;
            }

            if entry.reference_type == ReferenceType::Order {
                match entry.entry_type {
                    EntryType::OrderRevenue => booked += 1,
                    EntryType::Reversal => reversed += 1,
                    _ => {}
                }
            }
            holding.pending = holding
                .pending
                .checked_add(entry.amount)
                .ok_or(LedgerError::BalanceOverflow)?;
        }

        holding.revenue_booked = booked > reversed;
        Ok(holding)
    }

    async fn completed_refund_total(&self, order_id: i64) -> LedgerResult<i64> {
        let state = self.state.lock().await;
        state
            .refunds
            .values()
            .filter(|r| r.order_id == order_id && r.status == RefundStatus::Completed)
            .try_fold(0i64, |acc, r| {
                acc.checked_add(r.refund_amount)
                    .ok_or(LedgerError::BalanceOverflow)
            })
    }

    async fn insert_debt(&self, debt: NewCustomerDebt) -> LedgerResult<CustomerDebt> {
        let mut state = self.state.lock().await;
        let debt = CustomerDebt {
            id: state.debts.len() as i64 + 1,
            customer_id: debt.customer_id,
            refund_id: debt.refund_id,
            order_id: debt.order_id,
            amount: debt.amount,
            created_at: Utc::now(),
        };
        state.debts.push(debt.clone());
        Ok(debt)
    }

    async fn list_debts(&self, customer_id: i64) -> LedgerResult<Vec<CustomerDebt>> {
        let state = self.state.lock().await;
        Ok(state
            .debts
            .iter()
            .filter(|d| d.customer_id == customer_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Reference;
    use crate::wallet::models::{CustomerOp, ShopOp};
    use crate::withdrawal::models::{BankAccount, OwnerKind, WithdrawalStatus};

    fn add_pending(shop_id: i64, amount: i64, order_id: i64) -> WalletMutation {
        WalletMutation::Shop {
            shop_id,
            op: ShopOp::AddPending {
                amount,
                reference: Reference::order(order_id),
                description: "order revenue".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_apply_mutation_appends_entries_with_wallet_identity() {
        let repo = InMemoryLedgerRepository::new();
        let outcome = repo.apply_mutation(&add_pending(4, 950, 10)).await.unwrap();

        assert_eq!(outcome.entries.len(), 1);
        let entry = &outcome.entries[0];
        assert_eq!(entry.id, 1);
        assert_eq!(entry.wallet_kind, WalletKind::Shop);
        assert_eq!(entry.wallet_id, 4);
        assert_eq!(entry.bucket, Bucket::Pending);
        assert_eq!(entry.balance_after, 950);

        let wallet = repo.get_or_create_shop_wallet(4).await.unwrap();
        assert_eq!(wallet.pending_balance, 950);
        assert_eq!(wallet.total_earned, 950);
    }

    #[tokio::test]
    async fn test_second_revenue_credit_for_same_order_is_duplicate() {
        let repo = InMemoryLedgerRepository::new();
        repo.apply_mutation(&add_pending(4, 950, 10)).await.unwrap();

        let err = repo.apply_mutation(&add_pending(4, 950, 10)).await.unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateTransaction(_)));
        assert_eq!(repo.all_entries().await.len(), 1);

        // A different order is fine
        repo.apply_mutation(&add_pending(4, 50, 11)).await.unwrap();
    }

    #[tokio::test]
    async fn test_reversed_revenue_may_be_booked_again() {
        let repo = InMemoryLedgerRepository::new();
        let mutation = add_pending(4, 950, 10);
        let outcome = repo.apply_mutation(&mutation).await.unwrap();
        let reversal = mutation.reversal(&outcome, "compensation").unwrap();
        repo.apply_mutation(&reversal).await.unwrap();

        repo.apply_mutation(&mutation).await.unwrap();
        let wallet = repo.get_or_create_shop_wallet(4).await.unwrap();
        assert_eq!(wallet.pending_balance, 950);
        assert_eq!(wallet.total_earned, 950);
    }

    #[tokio::test]
    async fn test_failed_transition_leaves_wallet_untouched() {
        let repo = InMemoryLedgerRepository::new();
        let request = repo
            .insert_withdrawal(NewWithdrawal {
                owner_kind: OwnerKind::Customer,
                owner_id: 3,
                amount: 500,
                bank: BankAccount {
                    bank_name: "B".to_string(),
                    account_number: "1".to_string(),
                    account_holder: "H".to_string(),
                },
            })
            .await
            .unwrap();

        let debit = WalletMutation::Customer {
            customer_id: 3,
            op: CustomerOp::Debit {
                amount: 500,
                entry_type: EntryType::Withdrawal,
                reference: Reference::withdrawal(request.id),
                description: String::new(),
            },
        };
        let approve = WithdrawalTransition::Approve {
            admin_id: 1,
            note: None,
        };

        let err = repo
            .transition_withdrawal(request.id, &approve, Some(&debit))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

        let stored = repo.get_withdrawal(request.id).await.unwrap();
        assert_eq!(stored.status, WithdrawalStatus::Pending);
        assert!(repo.all_entries().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_entries_newest_first_with_total() {
        let repo = InMemoryLedgerRepository::new();
        for order_id in 1..=5 {
            repo.apply_mutation(&add_pending(1, 10, order_id)).await.unwrap();
        }
        let page = repo
            .list_entries(&EntryFilter {
                limit: Some(2),
                offset: Some(1),
                ..EntryFilter::for_wallet(WalletKind::Shop, 1)
            })
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert!(page.items[0].id > page.items[1].id);
    }
}
