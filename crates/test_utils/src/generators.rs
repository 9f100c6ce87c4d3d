//! Property-Based Test Generators
//!
//! Proptest strategies for ledger data that respects the domain's
//! invariants: positive two-decimal amounts, valid line item states,
//! known entity types.

use core_kernel::{Money, VisitId};
use proptest::prelude::*;
use rust_decimal::Decimal;

use domain_billing::{EntityType, LineItem, PaymentMethod, ServiceSnapshot};

/// Positive amounts in minor units, up to ten million
pub fn positive_amount_minor_strategy() -> impl Strategy<Value = i64> {
    1i64..1_000_000_000i64
}

/// Positive two-decimal amounts
pub fn positive_amount_strategy() -> impl Strategy<Value = Decimal> {
    positive_amount_minor_strategy().prop_map(|minor| Decimal::new(minor, 2))
}

pub fn positive_money_strategy() -> impl Strategy<Value = Money> {
    positive_amount_minor_strategy().prop_map(Money::from_minor)
}

/// Service tags with the default priority tags well represented
pub fn service_tag_strategy() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        Just(Some("registration".to_string())),
        Just(Some("consultation".to_string())),
        Just(Some("lab".to_string())),
        Just(Some("radiology".to_string())),
        Just(Some("pharmacy".to_string())),
        Just(None),
    ]
}

pub fn manual_method_strategy() -> impl Strategy<Value = PaymentMethod> {
    prop_oneof![
        Just(PaymentMethod::Cash),
        Just(PaymentMethod::Wallet),
        Just(PaymentMethod::Card),
    ]
}

pub fn entity_type_strategy() -> impl Strategy<Value = EntityType> {
    prop::sample::select(EntityType::ALL.to_vec())
}

/// A service snapshot with a generated code and tag
pub fn service_strategy() -> impl Strategy<Value = ServiceSnapshot> {
    ("[A-Z]{3}-[A-Z0-9]{2,5}", service_tag_strategy()).prop_map(|(code, tag)| {
        let service = ServiceSnapshot::new(code.clone(), format!("Service {}", code));
        match tag {
            Some(tag) => service.with_tag(tag),
            None => service,
        }
    })
}

/// An unpaid line item on `visit_id` of up to 100,000.00
pub fn pending_line_item_strategy(visit_id: VisitId) -> impl Strategy<Value = LineItem> {
    (service_strategy(), 1i64..10_000_000i64).prop_map(move |(service, minor)| {
        LineItem::new(visit_id, service, Money::from_minor(minor), None).expect("generated line item is valid")
    })
}

/// Line item amounts and service tags for building a whole visit
pub fn visit_bill_strategy() -> impl Strategy<Value = Vec<(Option<String>, Decimal)>> {
    prop::collection::vec(
        (service_tag_strategy(), (1i64..5_000_000i64).prop_map(|minor| Decimal::new(minor, 2))),
        1..8,
    )
}

/// A sequence of payment amounts
pub fn payment_sequence_strategy() -> impl Strategy<Value = Vec<Decimal>> {
    prop::collection::vec((1i64..5_000_000i64).prop_map(|minor| Decimal::new(minor, 2)), 1..6)
}

/// Provider references as the reconciler generates them
pub fn reference_strategy() -> impl Strategy<Value = String> {
    "[a-f0-9]{32}".prop_map(|hex| format!("CLN-{}", hex))
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain_billing::BillStatus;

    proptest! {
        #[test]
        fn positive_amounts_have_two_decimals(amount in positive_amount_strategy()) {
            prop_assert!(amount > Decimal::ZERO);
            prop_assert!(amount.scale() <= 2);
        }

        #[test]
        fn generated_line_items_are_pending(item in pending_line_item_strategy(VisitId::new())) {
            prop_assert_eq!(item.bill_status, BillStatus::Pending);
            prop_assert!(item.check_invariants().is_ok());
        }

        #[test]
        fn manual_methods_are_manual(method in manual_method_strategy()) {
            prop_assert!(method.is_manual());
        }

        #[test]
        fn entity_types_round_trip_through_wire_name(entity_type in entity_type_strategy()) {
            prop_assert_eq!(entity_type.as_str().parse::<EntityType>().unwrap(), entity_type);
        }
    }
}
