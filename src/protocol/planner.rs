//! Read batching
//!
//! Scattered registers are coalesced into as few reads as possible: registers
//! of the same bank are merged while the hole in front of them stays below
//! `max_gap` words and the merged span fits in `max_regs_per_read`. Reading a
//! few unused words is cheaper than another round trip.

use serde::Serialize;

use super::register::{FunctionKind, RegisterDescriptor};

/// One bounded read covering a run of registers in a single bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadGroup {
    pub function_kind: FunctionKind,
    pub start_address: u16,
    pub total_word_count: u16,
    /// Member keys in address order.
    pub keys: Vec<String>,
}

impl ReadGroup {
    fn open(key: &str, descriptor: &RegisterDescriptor) -> Self {
        Self {
            function_kind: descriptor.function_kind,
            start_address: descriptor.address,
            total_word_count: descriptor.word_count(),
            keys: vec![key.to_string()],
        }
    }

    /// One past the last word covered by this group.
    pub fn end_address(&self) -> u32 {
        u32::from(self.start_address) + u32::from(self.total_word_count)
    }
}

impl std::fmt::Display for ReadGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}..{}] ({} keys)",
            self.function_kind,
            self.start_address,
            self.end_address(),
            self.keys.len()
        )
    }
}

/// Group registers into reads of at most `max_regs_per_read` words.
///
/// A register that alone exceeds `max_regs_per_read` still gets a group of
/// its own; nothing is ever dropped.
pub fn plan<'a, I>(registers: I, max_regs_per_read: u16, max_gap: u16) -> Vec<ReadGroup>
where
    I: IntoIterator<Item = (&'a str, &'a RegisterDescriptor)>,
{
    let mut sorted: Vec<(&str, &RegisterDescriptor)> = registers.into_iter().collect();
    sorted.sort_by(|(key_a, a), (key_b, b)| {
        a.function_kind
            .cmp(&b.function_kind)
            .then(a.address.cmp(&b.address))
            .then(key_a.cmp(key_b))
    });

    let mut groups = Vec::new();
    let mut current: Option<ReadGroup> = None;

    for (key, descriptor) in sorted {
        let Some(group) = current.as_mut() else {
            current = Some(ReadGroup::open(key, descriptor));
            continue;
        };

        if descriptor.function_kind != group.function_kind {
            groups.extend(current.replace(ReadGroup::open(key, descriptor)));
            continue;
        }

        // Same bank and sorted by address, so the span cannot go negative.
        let address = u32::from(descriptor.address);
        let merged_span = descriptor.end_address() - u32::from(group.start_address);

        let starts_new = address >= group.end_address() + u32::from(max_gap)
            || merged_span > u32::from(max_regs_per_read);

        if starts_new {
            groups.extend(current.replace(ReadGroup::open(key, descriptor)));
        } else {
            let span = merged_span.max(u32::from(group.total_word_count));
            group.total_word_count = u16::try_from(span).unwrap_or(u16::MAX);
            group.keys.push(key.to_string());
        }
    }

    groups.extend(current);
    log::debug!("Planned {} read groups", groups.len());
    groups
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::protocol::register::{RegisterMap, RegisterType};

    fn reg(address: u16, register_type: RegisterType) -> RegisterDescriptor {
        RegisterDescriptor::new(address, register_type)
    }

    #[test]
    fn test_empty_input() {
        let map = RegisterMap::new();
        assert!(plan(map.iter(), 100, 10).is_empty());
    }

    #[test]
    fn test_merges_within_gap_and_splits_beyond() {
        let map = RegisterMap::new()
            .with("a", reg(0, RegisterType::Uint16))
            .with("b", reg(3, RegisterType::Uint32))
            .with("c", reg(20, RegisterType::Uint16));

        let groups = plan(map.iter(), 100, 5);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].start_address, 0);
        assert_eq!(groups[0].total_word_count, 5);
        assert_eq!(groups[0].keys, vec!["a", "b"]);
        assert_eq!(groups[1].start_address, 20);
        assert_eq!(groups[1].total_word_count, 1);
    }

    #[test]
    fn test_splits_on_max_span() {
        let map = RegisterMap::new()
            .with("a", reg(0, RegisterType::Uint16))
            .with("b", reg(8, RegisterType::Uint32))
            .with("c", reg(9, RegisterType::Uint16));

        let groups = plan(map.iter(), 10, 10);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].total_word_count, 10);

        let groups = plan(map.iter(), 9, 10);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].keys, vec!["a"]);
        assert_eq!(groups[1].keys, vec!["b", "c"]);
        assert_eq!(groups[1].total_word_count, 2);
    }

    #[test]
    fn test_never_spans_function_kinds() {
        let map = RegisterMap::new()
            .with("h", reg(10, RegisterType::Uint16))
            .with(
                "i",
                reg(11, RegisterType::Uint16).with_function_kind(FunctionKind::Input),
            );

        let groups = plan(map.iter(), 100, 10);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].function_kind, FunctionKind::Holding);
        assert_eq!(groups[1].function_kind, FunctionKind::Input);
    }

    #[test]
    fn test_bank_change_to_lower_address() {
        let map = RegisterMap::new()
            .with("h", reg(100, RegisterType::Uint16))
            .with(
                "i",
                reg(5, RegisterType::Uint16).with_function_kind(FunctionKind::Input),
            );

        let groups = plan(map.iter(), 100, 10);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].function_kind, FunctionKind::Holding);
        assert_eq!(groups[0].start_address, 100);
        assert_eq!(groups[1].function_kind, FunctionKind::Input);
        assert_eq!(groups[1].start_address, 5);
        assert_eq!(groups[1].total_word_count, 1);
    }

    #[test]
    fn test_oversized_register_gets_own_group() {
        let map = RegisterMap::new()
            .with("a", reg(0, RegisterType::Uint16))
            .with("serial", reg(1, RegisterType::Ascii(20)))
            .with("b", reg(21, RegisterType::Uint16));

        let groups = plan(map.iter(), 8, 10);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups[1].keys, vec!["serial"]);
        assert_eq!(groups[1].total_word_count, 20);
    }

    #[test]
    fn test_overlapping_registers_share_group() {
        // Packed sub-byte fields alias the same word
        let map = RegisterMap::new()
            .with("status_word", reg(40, RegisterType::Uint32))
            .with("status_low", reg(41, RegisterType::Uint16));

        let groups = plan(map.iter(), 100, 1);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].total_word_count, 2);
    }

    #[test]
    fn test_batching_invariants_on_scattered_map() {
        // Deterministic pseudo-random layout
        let mut seed: u32 = 0x2545_F491;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            seed
        };

        let mut map = RegisterMap::new();
        for i in 0..200 {
            let register_type = match next() % 4 {
                0 => RegisterType::Uint16,
                1 => RegisterType::Int32,
                2 => RegisterType::Ascii((next() % 6 + 1) as u16),
                _ => RegisterType::Int16,
            };
            let kind = if next() % 3 == 0 {
                FunctionKind::Input
            } else {
                FunctionKind::Holding
            };
            let address = (next() % 1000) as u16;
            map.insert(
                format!("r{i}"),
                reg(address, register_type).with_function_kind(kind),
            );
        }

        let max_regs = 40;
        let groups = plan(map.iter(), max_regs, 6);

        let mut seen: HashMap<&str, usize> = HashMap::new();
        for group in &groups {
            assert!(group.total_word_count <= max_regs, "group {group} too large");

            let mut max_end = 0u32;
            for key in &group.keys {
                let descriptor = map.get(key).unwrap();
                assert_eq!(descriptor.function_kind, group.function_kind);
                assert!(descriptor.address >= group.start_address);
                max_end = max_end.max(descriptor.end_address());
                *seen.entry(key.as_str()).or_default() += 1;
            }
            assert_eq!(max_end, group.end_address());
        }

        assert_eq!(seen.len(), map.len());
        assert!(seen.values().all(|count| *count == 1));
    }

    #[test]
    fn test_close_registers_end_up_together() {
        let map = RegisterMap::new()
            .with("x", reg(100, RegisterType::Uint16))
            .with("y", reg(104, RegisterType::Uint16));

        // gap of 3 words is below max_gap 4, span of 5 fits in 5
        let groups = plan(map.iter(), 5, 4);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].keys, vec!["x", "y"]);
    }
}
