//! Custom Test Assertions
//!
//! Assertion helpers for ledger types that give more meaningful failure
//! messages than plain `assert_eq!`.

use core_kernel::{LineItemId, Money};
use rust_decimal::Decimal;

use domain_billing::{AllocationEntry, BillStatus, LineItem};

/// Asserts that a line item's amounts and status are consistent
///
/// # Panics
///
/// Panics when `amount_paid + outstanding_amount != amount`, when either
/// balance is negative, or when the status does not match the amounts
pub fn assert_line_item_balanced(item: &LineItem) {
    assert!(
        !item.amount_paid.is_negative() && !item.outstanding_amount.is_negative(),
        "Line item {} has a negative balance: paid={}, outstanding={}",
        item.id,
        item.amount_paid,
        item.outstanding_amount
    );
    assert_eq!(
        item.amount_paid + item.outstanding_amount,
        item.amount,
        "Line item {}: paid {} + outstanding {} != amount {}",
        item.id,
        item.amount_paid,
        item.outstanding_amount,
        item.amount
    );
    assert_eq!(
        item.bill_status,
        BillStatus::derive(item.amount_paid, item.outstanding_amount),
        "Line item {} status does not match its amounts",
        item.id
    );
}

/// Asserts every line item of a visit is balanced
pub fn assert_all_balanced(items: &[LineItem]) {
    for item in items {
        assert_line_item_balanced(item);
    }
}

/// Asserts that a set of Money values sums to an expected total
pub fn assert_money_sum_equals(parts: &[Money], total: &Money) {
    let sum: Money = parts.iter().sum();
    assert_eq!(
        sum, *total,
        "Sum of parts ({}) does not equal total ({})",
        sum, total
    );
}

/// Asserts that each item's `amount_paid` equals the journal entries
/// recorded against it
pub fn assert_journal_matches(items: &[LineItem], entries: &[AllocationEntry]) {
    for item in items {
        let journaled: Money = entries
            .iter()
            .filter(|e| e.line_item_id == item.id)
            .map(|e| e.amount)
            .sum();
        assert_eq!(
            journaled, item.amount_paid,
            "Line item {} shows {} paid but the journal records {}",
            item.id, item.amount_paid, journaled
        );
    }
}

/// Asserts that a line item has the given paid amount and status
pub fn assert_paid(item: &LineItem, paid: Decimal, status: BillStatus) {
    assert_eq!(
        item.amount_paid,
        Money::new(paid),
        "Line item {} ({}) paid amount",
        item.id,
        item.service.code
    );
    assert_eq!(item.bill_status, status, "Line item {} ({}) status", item.id, item.service.code);
}

/// Finds a line item by id, panicking with the known ids when absent
pub fn find_item(items: &[LineItem], id: LineItemId) -> &LineItem {
    items.iter().find(|i| i.id == id).unwrap_or_else(|| {
        let known: Vec<String> = items.iter().map(|i| i.id.to_string()).collect();
        panic!("Line item {} not found among {:?}", id, known)
    })
}

/// Asserts that a result is Ok and returns the value
#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("{}: {:?}", $msg, e),
        }
    };
}

/// Asserts that an error matches a specific variant
#[macro_export]
macro_rules! assert_err_variant {
    ($result:expr, $pattern:pat) => {
        match $result {
            Ok(value) => panic!("Expected Err matching {}, got Ok({:?})", stringify!($pattern), value),
            Err(ref e) => {
                assert!(
                    matches!(e, $pattern),
                    "Error {:?} does not match pattern {}",
                    e,
                    stringify!($pattern)
                );
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::TestLineItemBuilder;
    use core_kernel::VisitId;
    use domain_billing::PaymentMethod;
    use rust_decimal_macros::dec;

    #[test]
    fn test_balanced_item_passes() {
        let item = TestLineItemBuilder::new(VisitId::new())
            .with_amount(dec!(1000))
            .paid(dec!(400), PaymentMethod::Cash)
            .build();
        assert_line_item_balanced(&item);
        assert_paid(&item, dec!(400), BillStatus::PartiallyPaid);
    }

    #[test]
    #[should_panic(expected = "!= amount")]
    fn test_unbalanced_item_fails() {
        let mut item = TestLineItemBuilder::new(VisitId::new()).with_amount(dec!(1000)).build();
        item.outstanding_amount = Money::new(dec!(900));
        assert_line_item_balanced(&item);
    }

    #[test]
    fn test_assert_money_sum_equals() {
        let parts = vec![
            Money::new(dec!(3333.34)),
            Money::new(dec!(3333.33)),
            Money::new(dec!(3333.33)),
        ];
        assert_money_sum_equals(&parts, &Money::new(dec!(10000.00)));
    }

    #[test]
    #[should_panic(expected = "not found among")]
    fn test_find_item_reports_missing_id() {
        let item = TestLineItemBuilder::new(VisitId::new()).build();
        find_item(&[item], LineItemId::new());
    }

    #[test]
    fn test_assert_ok_returns_value() {
        let value = assert_ok!(Ok::<_, String>(7));
        assert_eq!(value, 7);
    }
}
