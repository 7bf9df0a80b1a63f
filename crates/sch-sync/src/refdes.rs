//! Reference designator bookkeeping.
//!
//! Numbers are tracked per prefix across the whole design. Designators the
//! run must keep are reserved first; everything else is numbered afterwards
//! from the lowest free slot, in the natural order of the requesters.

use std::collections::{BTreeSet, HashMap};

/// A designator split into its letter prefix and number, e.g. `R12`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReference {
    pub prefix: String,
    pub number: u32,
}

/// Split `R12` into `("R", 12)`. Power references (`#PWR03`) keep the `#`.
pub fn parse_reference(reference: &str) -> Option<ParsedReference> {
    let first_digit = reference.find(|c: char| c.is_ascii_digit())?;
    let (prefix, digits) = reference.split_at(first_digit);
    if prefix.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let number: u32 = digits.parse().ok()?;
    (number > 0).then(|| ParsedReference {
        prefix: prefix.to_string(),
        number,
    })
}

#[derive(Debug, Clone, Default)]
pub struct RefdesAllocator {
    used: HashMap<String, BTreeSet<u32>>,
}

impl RefdesAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a designator as taken. Returns `false` if it already was.
    pub fn reserve(&mut self, reference: &str) -> bool {
        match parse_reference(reference) {
            Some(parsed) => self
                .used
                .entry(parsed.prefix)
                .or_default()
                .insert(parsed.number),
            // Unnumbered designators cannot collide with allocated ones.
            None => true,
        }
    }

    pub fn is_reserved(&self, reference: &str) -> bool {
        parse_reference(reference).is_some_and(|parsed| {
            self.used
                .get(&parsed.prefix)
                .is_some_and(|used| used.contains(&parsed.number))
        })
    }

    /// The lowest free number for `prefix`.
    pub fn next(&mut self, prefix: &str) -> String {
        let used = self.used.entry(prefix.to_string()).or_default();
        let mut number = 1;
        while used.contains(&number) {
            number += 1;
        }
        used.insert(number);
        format!("{prefix}{number}")
    }

    /// Power symbols count upwards from the highest number in use.
    pub fn next_power(&mut self) -> String {
        let used = self.used.entry("#PWR".to_string()).or_default();
        let number = used.last().map_or(1, |n| n + 1);
        used.insert(number);
        format!("#PWR{number:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_designators() {
        assert_eq!(
            parse_reference("R12"),
            Some(ParsedReference {
                prefix: "R".to_string(),
                number: 12
            })
        );
        assert_eq!(parse_reference("#PWR03").unwrap().prefix, "#PWR");
        assert_eq!(parse_reference("R0"), None);
        assert_eq!(parse_reference("R?"), None);
        assert_eq!(parse_reference("12"), None);
        assert_eq!(parse_reference("R1A"), None);
    }

    #[test]
    fn allocation_fills_gaps_after_reservations() {
        let mut alloc = RefdesAllocator::new();
        assert!(alloc.reserve("R1"));
        assert!(alloc.reserve("R3"));
        assert!(!alloc.reserve("R3"));
        assert!(alloc.is_reserved("R3"));
        assert_eq!(alloc.next("R"), "R2");
        assert_eq!(alloc.next("R"), "R4");
        assert_eq!(alloc.next("C"), "C1");
    }

    #[test]
    fn power_references_count_up() {
        let mut alloc = RefdesAllocator::new();
        alloc.reserve("#PWR07");
        assert_eq!(alloc.next_power(), "#PWR08");
        assert_eq!(RefdesAllocator::new().next_power(), "#PWR01");
    }
}
