// re-export so that they need not be imported by downstream users.
// hidden because they shouldn't be imported.
#[doc(hidden)]
pub use const_format::{
    concatcp as __concatcp,
    map_ascii_case as __map_ascii_case,
    Case as __Case,
};

/// Declare a `const` string slice, using the declaring crate's name as a
/// prefix and the variable name as a suffix.
///
/// This macro essentially performs this declaration:
/// ```text
/// METRIC_NAME := ${CARGO_CRATE_NAME}_metric_name;
/// ```
///
/// The purpose of this macro is to avoid accidental typos, ensuring that the
/// metric name matches the const variable name.
///
/// # Examples
/// ```
/// use voltbid_telemetry::metric_name;
/// metric_name!(pub const EXAMPLE_COUNTER);
/// // Note that this example has `voltbid_telemetry` as a prefix because
/// // this doctest is part of this crate.
/// // In your case, use your crate's `CARGO_CRATE_NAME` as prefix.
/// assert_eq!(EXAMPLE_COUNTER, "voltbid_telemetry_example_counter");
/// ```
#[macro_export]
macro_rules! metric_name {
    ($vis:vis const $($tt:tt)*) => {
        $crate::__metric_name_internal!(
            $vis [$($tt)*] [::core::stringify!($($tt)*)]
        );
    }
}

/// Declare a set of metric names via [`metric_name!`], together with a
/// `const` slice collecting all of them.
///
/// # Examples
/// ```
/// use voltbid_telemetry::metric_names;
/// metric_names!(pub const ALL_METRICS: FIRST_COUNTER, SECOND_COUNTER);
/// assert_eq!(
///     ALL_METRICS,
///     ["voltbid_telemetry_first_counter", "voltbid_telemetry_second_counter"],
/// );
/// ```
#[macro_export]
macro_rules! metric_names {
    ($vis:vis const $set_name:ident: $($name:ident),* $(,)?) => {
        $(
            $crate::metric_name!($vis const $name);
        )*
        $vis const $set_name: &[&str] = &[$($name),*];
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __metric_name_internal {
    ($vis:vis [$name:ident][$suffix:expr]) => {
        $vis const $name: &str = $crate::macros::__concatcp!(
            ::core::env!("CARGO_CRATE_NAME"),
            "_",
            $crate::macros::__map_ascii_case!($crate::macros::__Case::Lower, $suffix),
        );
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn gives_expected_const_and_value() {
        crate::metric_name!(const EXAMPLE_CONST);
        assert_eq!("voltbid_telemetry_example_const", EXAMPLE_CONST);
    }

    #[test]
    fn collects_all_names_in_declaration_order() {
        crate::metric_names!(const NAMES: EXAMPLE_ONE, EXAMPLE_TWO);
        assert_eq!(
            NAMES,
            [
                "voltbid_telemetry_example_one",
                "voltbid_telemetry_example_two"
            ],
        );
    }
}
