//! Channel-number allocation.
//!
//! Display numbers are rationals carried as strings so user-assigned
//! fractional numbers ("101.1") survive. The canonical form is the
//! `f64` Display rendering: integers print with no decimal point, so
//! `1000` never becomes `1000.0`.

use std::collections::HashSet;

/// Canonical string form of a channel number.
pub fn format_channel_number(number: f64) -> String {
    format!("{number}")
}

/// Parse a channel-number string back to its rational value.
pub fn parse_channel_number(number: &str) -> Option<f64> {
    number.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// The set of channel numbers in use, with monotonic allocation: the
/// candidate itself is tried first, then the integers above it.
#[derive(Debug, Default, Clone)]
pub struct NumberPool {
    used: HashSet<String>,
}

impl NumberPool {
    pub fn from_numbers<'a, I: IntoIterator<Item = &'a str>>(numbers: I) -> Self {
        Self {
            used: numbers.into_iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn contains(&self, number: &str) -> bool {
        self.used.contains(number)
    }

    pub fn insert(&mut self, number: &str) {
        self.used.insert(number.to_string());
    }

    /// Assign the first free number scanning upward from `start`: the
    /// exact start first (it may be fractional), then whole numbers
    /// above it. The returned number is marked used.
    pub fn allocate(&mut self, start: f64) -> String {
        let mut candidate = start;
        loop {
            let formatted = format_channel_number(candidate);
            if !self.used.contains(&formatted) {
                self.used.insert(formatted.clone());
                return formatted;
            }
            candidate = candidate.floor() + 1.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_elides_trailing_zeros() {
        assert_eq!(format_channel_number(1000.0), "1000");
        assert_eq!(format_channel_number(101.1), "101.1");
        assert_eq!(format_channel_number(42.0), "42");
    }

    #[test]
    fn allocates_smallest_free_integer_from_start() {
        let mut pool = NumberPool::from_numbers(["1000", "1001"]);
        assert_eq!(pool.allocate(1000.0), "1002");
        assert_eq!(pool.allocate(1000.0), "1003");
    }

    #[test]
    fn fractional_start_is_tried_exactly_then_integers() {
        let mut pool = NumberPool::default();
        assert_eq!(pool.allocate(101.1), "101.1");
        // 101.1 now taken: next allocation falls to the integer above.
        assert_eq!(pool.allocate(101.1), "102");
    }

    #[test]
    fn preserved_number_collision_takes_next_integer() {
        let mut pool = NumberPool::from_numbers(["42"]);
        assert_eq!(pool.allocate(42.0), "43");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse_channel_number("101.1"), Some(101.1));
        assert_eq!(parse_channel_number("abc"), None);
        assert_eq!(parse_channel_number("inf"), None);
    }
}
