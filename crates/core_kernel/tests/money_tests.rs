//! Comprehensive unit tests for the Money module
//!
//! Tests cover money creation, precision handling at input boundaries,
//! arithmetic, minor-unit conversion, and serialization.

use core_kernel::{Money, MoneyError};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

mod creation {
    use super::*;

    #[test]
    fn test_new_creates_money_with_correct_amount() {
        let m = Money::new(dec!(5000.50));
        assert_eq!(m.amount(), dec!(5000.50));
    }

    #[test]
    fn test_new_rounds_half_to_even() {
        assert_eq!(Money::new(dec!(1.005)).amount(), dec!(1.00));
        assert_eq!(Money::new(dec!(1.015)).amount(), dec!(1.02));
    }

    #[test]
    fn test_from_minor_converts_kobo() {
        let m = Money::from_minor(1_000_000);
        assert_eq!(m.amount(), dec!(10000.00));
    }

    #[test]
    fn test_zero_and_default_agree() {
        assert_eq!(Money::zero(), Money::default());
        assert!(Money::zero().is_zero());
    }

    #[test]
    fn test_exact_accepts_whole_amounts() {
        let m = Money::exact(dec!(7000), 2).unwrap();
        assert_eq!(m.amount(), dec!(7000));
    }

    #[test]
    fn test_exact_rejects_sub_kobo_amounts() {
        let err = Money::exact(dec!(0.001), 2).unwrap_err();
        assert!(matches!(err, MoneyError::ExcessPrecision { max_decimals: 2, .. }));
    }

    #[test]
    fn test_exact_with_zero_decimals() {
        assert!(Money::exact(dec!(100), 0).is_ok());
        assert!(Money::exact(dec!(100.5), 0).is_err());
    }
}

mod predicates {
    use super::*;

    #[test]
    fn test_is_positive_false_for_zero() {
        assert!(!Money::zero().is_positive());
    }

    #[test]
    fn test_is_positive_true_for_one_kobo() {
        assert!(Money::from_minor(1).is_positive());
    }

    #[test]
    fn test_is_negative() {
        assert!(Money::new(dec!(-0.01)).is_negative());
        assert!(!Money::zero().is_negative());
    }

    #[test]
    fn test_ordering() {
        let small = Money::new(dec!(2000));
        let large = Money::new(dec!(8000));
        assert!(small < large);
        assert_eq!(large.min(small), small);
        assert_eq!(small.min(large), small);
    }

    #[test]
    fn test_equality_ignores_scale() {
        assert_eq!(Money::new(dec!(5000)), Money::new(dec!(5000.00)));
    }
}

mod arithmetic {
    use super::*;

    #[test]
    fn test_add_and_sub() {
        let a = Money::new(dec!(10000));
        let b = Money::new(dec!(2000));
        assert_eq!(a + b, Money::new(dec!(12000)));
        assert_eq!(a - b, Money::new(dec!(8000)));
    }

    #[test]
    fn test_assign_operators() {
        let mut remaining = Money::new(dec!(7000));
        remaining -= Money::new(dec!(5000));
        assert_eq!(remaining, Money::new(dec!(2000)));
        remaining += Money::new(dec!(1));
        assert_eq!(remaining, Money::new(dec!(2001)));
    }

    #[test]
    fn test_checked_add_overflow() {
        let max = Money::new(Decimal::MAX);
        assert_eq!(max.checked_add(&Money::from_minor(100)), Err(MoneyError::Overflow));
    }

    #[test]
    fn test_sum_of_references() {
        let items = vec![Money::new(dec!(5000)), Money::new(dec!(10000))];
        let total: Money = items.iter().sum();
        assert_eq!(total, Money::new(dec!(15000)));
    }

    #[test]
    fn test_sum_of_empty_is_zero() {
        let total: Money = Vec::<Money>::new().into_iter().sum();
        assert!(total.is_zero());
    }
}

mod conversion {
    use super::*;

    #[test]
    fn test_to_minor() {
        assert_eq!(Money::new(dec!(7000.25)).to_minor().unwrap(), 700_025);
    }

    #[test]
    fn test_display_uses_two_places() {
        assert_eq!(Money::new(dec!(5000)).to_string(), "5000.00");
        assert_eq!(Money::new(dec!(12.5)).to_string(), "12.50");
    }

    #[test]
    fn test_serde_round_trip() {
        let m = Money::new(dec!(12000.00));
        let json = serde_json::to_string(&m).unwrap();
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }

    #[test]
    fn test_decimal_conversions() {
        let m: Money = dec!(99.999).into();
        assert_eq!(m.amount(), dec!(100.00));
        let d: Decimal = m.into();
        assert_eq!(d, dec!(100.00));
    }
}
