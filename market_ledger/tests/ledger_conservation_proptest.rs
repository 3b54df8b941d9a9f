/// Property-based tests for ledger conservation using proptest
///
/// Random sequences of wallet operations, some of which fail, must leave
/// every wallet balance equal to the sum of its entries. Failed operations
/// must leave no trace and shop and customer balances never go negative.
use market_ledger::ledger::{Bucket, EntryType, FeeSplit, Reference, WalletKind};
use market_ledger::repository::{InMemoryLedgerRepository, LedgerRepository};
use market_ledger::wallet::{
    CustomerWalletStore, PLATFORM_WALLET_ID, PlatformWalletStore, ShopWalletStore,
};
use proptest::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Complete { shop: i64, amount: i64, fee_bps: i32 },
    Release { shop: i64, amount: i64 },
    ShopRefund { shop: i64, amount: i64 },
    Withdraw { shop: i64, amount: i64 },
    CustomerRefund { customer: i64, amount: i64 },
    CustomerSpend { customer: i64, amount: i64 },
    Payout { amount: i64 },
}

// Few wallets so operations collide on the same rows
fn op_strategy() -> impl Strategy<Value = Op> {
    let shop = 1i64..=3;
    let customer = 1i64..=3;
    let amount = 1i64..=2_000_000;

    prop_oneof![
        (shop.clone(), amount.clone(), 0i32..=3_000)
            .prop_map(|(shop, amount, fee_bps)| Op::Complete { shop, amount, fee_bps }),
        (shop.clone(), amount.clone()).prop_map(|(shop, amount)| Op::Release { shop, amount }),
        (shop.clone(), amount.clone()).prop_map(|(shop, amount)| Op::ShopRefund { shop, amount }),
        (shop, amount.clone()).prop_map(|(shop, amount)| Op::Withdraw { shop, amount }),
        (customer.clone(), amount.clone())
            .prop_map(|(customer, amount)| Op::CustomerRefund { customer, amount }),
        (customer, amount.clone())
            .prop_map(|(customer, amount)| Op::CustomerSpend { customer, amount }),
        amount.prop_map(|amount| Op::Payout { amount }),
    ]
}

struct Stores {
    repo: Arc<InMemoryLedgerRepository>,
    shops: ShopWalletStore,
    customers: CustomerWalletStore,
    platform: PlatformWalletStore,
}

impl Stores {
    fn new() -> Self {
        let repo = Arc::new(InMemoryLedgerRepository::new());
        Self {
            shops: ShopWalletStore::new(repo.clone()),
            customers: CustomerWalletStore::new(repo.clone()),
            platform: PlatformWalletStore::new(repo.clone()),
            repo,
        }
    }

    /// Apply one operation, returning whether it succeeded
    async fn apply(&self, index: i64, op: &Op) -> bool {
        match *op {
            Op::Complete {
                shop,
                amount,
                fee_bps,
            } => {
                let split = FeeSplit::compute(amount, fee_bps).unwrap();
                let mut ok = true;
                if split.shop_share > 0 {
                    ok &= self
                        .shops
                        .add_pending(shop, split.shop_share, index, "order")
                        .await
                        .is_ok();
                }
                if split.platform_share > 0 {
                    ok &= self
                        .platform
                        .add_commission(split.platform_share, index, "order")
                        .await
                        .is_ok();
                }
                ok
            }
            Op::Release { shop, amount } => self.shops.release(shop, amount, index).await.is_ok(),
            Op::ShopRefund { shop, amount } => self
                .shops
                .deduct(shop, amount, EntryType::Refund, Reference::refund(index), "refund")
                .await
                .is_ok(),
            Op::Withdraw { shop, amount } => self
                .shops
                .deduct_available_only(
                    shop,
                    amount,
                    EntryType::Withdrawal,
                    Reference::withdrawal(index),
                    "withdrawal",
                )
                .await
                .is_ok(),
            Op::CustomerRefund { customer, amount } => self
                .customers
                .add_balance(customer, amount, EntryType::Refund, Reference::refund(index), "refund")
                .await
                .is_ok(),
            Op::CustomerSpend { customer, amount } => self
                .customers
                .deduct_balance(customer, amount, EntryType::Refund, Reference::refund(index), "owed")
                .await
                .is_ok(),
            Op::Payout { amount } => self.platform.payout(amount, index, "payout").await.is_ok(),
        }
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_entries_always_sum_to_balances(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let stores = Stores::new();
        let rt = runtime();

        rt.block_on(async {
            for (index, op) in ops.iter().enumerate() {
                let before = stores.repo.all_entries().await.len();
                let ok = stores.apply(index as i64 + 1, op).await;
                let after = stores.repo.all_entries().await.len();
                if !ok && !matches!(op, Op::Complete { .. }) {
                    prop_assert_eq!(before, after, "failed {:?} left entries behind", op);
                }
            }

            let entries = stores.repo.all_entries().await;
            let sum = |kind: WalletKind, id: i64, bucket: Bucket| -> i64 {
                entries
                    .iter()
                    .filter(|e| e.wallet_kind == kind && e.wallet_id == id && e.bucket == bucket)
                    .map(|e| e.amount)
                    .sum()
            };

            for id in 1..=3 {
                let shop = stores.shops.get_or_create(id).await.unwrap();
                prop_assert!(shop.available_balance >= 0);
                prop_assert!(shop.pending_balance >= 0);
                prop_assert_eq!(sum(WalletKind::Shop, id, Bucket::Available), shop.available_balance);
                prop_assert_eq!(sum(WalletKind::Shop, id, Bucket::Pending), shop.pending_balance);

                let customer = stores.customers.get_or_create(id).await.unwrap();
                prop_assert!(customer.balance >= 0);
                prop_assert_eq!(sum(WalletKind::Customer, id, Bucket::Main), customer.balance);
            }

            let platform = stores.platform.get_or_create().await.unwrap();
            prop_assert_eq!(
                sum(WalletKind::Platform, PLATFORM_WALLET_ID, Bucket::Main),
                platform.balance
            );

            for entry in &entries {
                prop_assert_ne!(entry.amount, 0);
                prop_assert_eq!(entry.balance_after, entry.balance_before + entry.amount);
            }
            Ok(())
        })?;
    }

    #[test]
    fn test_fee_split_shares_sum_to_amount(amount in 0i64..=1_000_000_000_000, fee_bps in 0i32..=10_000) {
        let split = FeeSplit::compute(amount, fee_bps).unwrap();

        prop_assert_eq!(split.shop_share + split.platform_share, amount);
        prop_assert!(split.platform_share >= 0);
        prop_assert!(split.shop_share >= 0);

        // Within half a minor unit of the exact fee
        let exact = amount as i128 * fee_bps as i128;
        let diff = (split.platform_share as i128 * 10_000 - exact).abs();
        prop_assert!(diff <= 5_000);
    }

    #[test]
    fn test_fee_split_rejects_out_of_range_rates(amount in 1i64..=1_000_000, fee_bps in 10_001i32..=100_000) {
        prop_assert!(FeeSplit::compute(amount, fee_bps).is_err());
        prop_assert!(FeeSplit::compute(amount, -fee_bps).is_err());
    }
}

#[test]
fn test_fee_split_rounds_half_up() {
    // 5% of 10 is 0.5
    let split = FeeSplit::compute(10, 500).unwrap();
    assert_eq!(split.platform_share, 1);
    assert_eq!(split.shop_share, 9);

    let split = FeeSplit::compute(1_000_000, 500).unwrap();
    assert_eq!(split.platform_share, 50_000);
    assert_eq!(split.shop_share, 950_000);
}
