//! Property sweeps for the identifier grammars.

use proptest::prelude::*;
use vaultry::domain::{validate_secret_key, validate_slug};

proptest! {
    #[test]
    fn valid_slugs_are_accepted(slug in "[a-z0-9-]{3,63}") {
        prop_assert!(validate_slug(&slug).is_ok());
    }

    #[test]
    fn slug_length_out_of_range_is_rejected(slug in "[a-z0-9-]{64,80}") {
        prop_assert!(validate_slug(&slug).is_err());
    }

    #[test]
    fn slugs_with_foreign_characters_are_rejected(
        prefix in "[a-z0-9-]{1,20}",
        bad in "[A-Z_ /.:@]",
        suffix in "[a-z0-9-]{1,20}",
    ) {
        let slug = format!("{}{}{}", prefix, bad, suffix);
        prop_assert!(validate_slug(&slug).is_err());
    }

    #[test]
    fn valid_secret_keys_are_accepted(key in "[A-Za-z0-9/_.-]{1,255}") {
        prop_assert!(validate_secret_key(&key).is_ok());
    }

    #[test]
    fn secret_key_length_out_of_range_is_rejected(key in "[A-Za-z0-9/_.-]{256,300}") {
        prop_assert!(validate_secret_key(&key).is_err());
    }

    #[test]
    fn secret_keys_with_foreign_characters_are_rejected(
        prefix in "[A-Za-z0-9/_.-]{0,20}",
        bad in "[ :!?*#$%&()=+]",
        suffix in "[A-Za-z0-9/_.-]{0,20}",
    ) {
        let key = format!("{}{}{}", prefix, bad, suffix);
        prop_assert!(validate_secret_key(&key).is_err());
    }
}
