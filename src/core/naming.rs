//! Name transforms shared by column and table derivation

use convert_case::{Boundary, Case, Casing};

/// Word boundaries for Rust identifiers: underscores, lower-to-upper,
/// acronym ends and digit-to-upper. Digits stay attached to the word before.
const IDENT_BOUNDARIES: [Boundary; 4] = [
    Boundary::UNDERSCORE,
    Boundary::LOWER_UPPER,
    Boundary::ACRONYM,
    Boundary::DIGIT_UPPER,
];

/// Convert a camel-case or pascal-case identifier to snake_case.
///
/// Acronym runs stay together (`StopID` -> `stop_id`, `HTTPServer` ->
/// `http_server`) and names that are already snake_case pass through.
pub fn to_snake_case(name: &str) -> String {
    name.with_boundaries(&IDENT_BOUNDARIES).to_case(Case::Snake)
}

/// Derive a table name from a Rust type path such as
/// `app::models::FeedVersion` or `app::Wrapper<app::Stop>`.
///
/// Only the trailing segment of the outer type is used.
pub fn table_name_from_type(type_name: &str) -> String {
    let outer = type_name.split('<').next().unwrap_or(type_name);
    let last = outer.rsplit("::").next().unwrap_or(outer);
    to_snake_case(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case() {
        assert_eq!(to_snake_case("stopName"), "stop_name");
        assert_eq!(to_snake_case("StopName"), "stop_name");
        assert_eq!(to_snake_case("StopID"), "stop_id");
        assert_eq!(to_snake_case("HTTPServer"), "http_server");
        assert_eq!(to_snake_case("route2Stop"), "route2_stop");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
        assert_eq!(to_snake_case(""), "");
    }

    #[test]
    fn test_table_name_from_type() {
        assert_eq!(table_name_from_type("app::models::FeedVersion"), "feed_version");
        assert_eq!(table_name_from_type("Stop"), "stop");
        assert_eq!(table_name_from_type("app::Wrapper<app::Stop>"), "wrapper");
    }
}
