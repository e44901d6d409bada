//! Property tests: ledger conservation, entry chaining, and the reserve floor.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use std::sync::Arc;
use treasury_core::{
    Amount, BasisPoints, Clock, GovernanceLog, Ledger, ManualClock, MemoryAppendStore, Metadata,
    TreasuryError,
};

#[derive(Debug, Clone)]
enum Op {
    Deposit(u64),
    Withdraw(u64),
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..5_000_000).prop_map(Op::Deposit),
        (1u64..5_000_000).prop_map(Op::Withdraw),
    ]
}

fn arb_reserve() -> impl Strategy<Value = BasisPoints> {
    (0u32..=10_000).prop_map(BasisPoints::new)
}

fn setup(reserve: BasisPoints) -> (Ledger, GovernanceLog) {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
    ));
    let ledger = Ledger::new(
        Box::new(MemoryAppendStore::new()),
        reserve,
        BasisPoints::percent(7),
        clock.clone(),
    );
    let governance = GovernanceLog::new(Box::new(MemoryAppendStore::new()), clock);
    (ledger, governance)
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// The total always equals deposits minus accepted withdrawals, and entries chain.
    #[test]
    fn balance_is_conserved_and_entries_chain(
        reserve in arb_reserve(),
        ops in prop::collection::vec(arb_op(), 1..60),
    ) {
        let (mut ledger, mut governance) = setup(reserve);
        let mut expected: u64 = 0;

        for op in ops {
            match op {
                Op::Deposit(minor) => {
                    ledger
                        .deposit(Amount::from_minor(minor), "donor", Metadata::new(), &mut governance)
                        .unwrap();
                    expected += minor;
                }
                Op::Withdraw(minor) => {
                    if ledger
                        .withdraw(Amount::from_minor(minor), "dest", "ops", Metadata::new(), &mut governance)
                        .is_ok()
                    {
                        expected -= minor;
                    }
                }
            }
            prop_assert_eq!(ledger.total().minor(), expected);
        }

        let entries = ledger.entries();
        for pair in entries.windows(2) {
            prop_assert_eq!(pair[0].balance_after, pair[1].balance_before);
        }
        for entry in entries {
            prop_assert!(entry.hash_matches());
        }
        prop_assert_eq!(governance.len(), entries.len());
        prop_assert!(ledger.verify_entries().is_intact());
        prop_assert!(governance.verify_integrity().is_intact());
    }

    /// A withdrawal that would leave less than the reserve fails and changes nothing.
    #[test]
    fn reserve_breaches_are_rejected_without_side_effects(
        reserve in 1u32..=10_000,
        deposit in 100u64..10_000_000,
        fraction in 0u32..=10_000,
    ) {
        let reserve = BasisPoints::new(reserve);
        let (mut ledger, mut governance) = setup(reserve);
        ledger
            .deposit(Amount::from_minor(deposit), "donor", Metadata::new(), &mut governance)
            .unwrap();

        let before = ledger.balance();
        let request = Amount::from_minor(
            (u128::from(deposit) * u128::from(fraction) / 10_000).max(1) as u64,
        );
        let breaches = before.total.saturating_sub(request) < before.reserved;

        let result = ledger.withdraw(request, "dest", "ops", Metadata::new(), &mut governance);

        if breaches {
            let is_reserve_breach = matches!(result, Err(TreasuryError::ReserveBreach { .. }));
            prop_assert!(is_reserve_breach);
            prop_assert_eq!(ledger.balance(), before);
            prop_assert_eq!(ledger.entries().len(), 1);
            prop_assert_eq!(governance.len(), 1);
        } else {
            prop_assert!(result.is_ok());
            prop_assert!(ledger.total() >= before.reserved);
        }
        prop_assert!(ledger.balance().available <= ledger.balance().total);
    }
}
