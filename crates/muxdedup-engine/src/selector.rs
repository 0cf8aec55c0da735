use std::cmp::Ordering;

use muxdedup_core::{Mux, ScanResult};
use serde::Serialize;

/// Which comparison established the canonical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    Created,
    ScanFirst,
    ScanLast,
}

impl TieBreak {
    pub fn as_str(self) -> &'static str {
        match self {
            TieBreak::Created => "created",
            TieBreak::ScanFirst => "scan_first",
            TieBreak::ScanLast => "scan_last",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    First,
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub newer: Side,
    /// `None` when all timestamps tie and the first record was taken by default.
    pub decided_by: Option<TieBreak>,
    pub allow_merge: bool,
}

impl Selection {
    pub fn indices(&self, first: usize, second: usize) -> (usize, usize) {
        match self.newer {
            Side::First => (first, second),
            Side::Second => (second, first),
        }
    }
}

/// Pick the canonical ("newer") record of a duplicate pair.
///
/// `created`, then `scan_first`, then `scan_last`; larger wins. A full tie keeps
/// the first record but forbids merging, as does a winner whose last scan was
/// not OK.
pub fn select(first: &Mux, second: &Mux) -> Selection {
    let chain = [
        (TieBreak::Created, first.created, second.created),
        (TieBreak::ScanFirst, first.scan_first, second.scan_first),
        (TieBreak::ScanLast, first.scan_last, second.scan_last),
    ];

    for (basis, a, b) in chain {
        let (newer, winner) = match a.cmp(&b) {
            Ordering::Greater => (Side::First, first),
            Ordering::Less => (Side::Second, second),
            Ordering::Equal => continue,
        };
        return Selection {
            newer,
            decided_by: Some(basis),
            allow_merge: winner.scan_result == ScanResult::Ok,
        };
    }

    Selection {
        newer: Side::First,
        decided_by: None,
        allow_merge: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::mux;

    fn dated(uuid: &str, created: i64, first: i64, last: i64, result: ScanResult) -> Mux {
        let mut m = mux(uuid, "19.2E", "H", 11_494_000);
        m.created = created;
        m.scan_first = first;
        m.scan_last = last;
        m.scan_result = result;
        m
    }

    #[test]
    fn chain_stops_at_first_decisive_comparison() {
        let a = dated("a", 200, 0, 0, ScanResult::Ok);
        let b = dated("b", 100, 999, 999, ScanResult::Ok);
        let sel = select(&a, &b);
        assert_eq!(sel.newer, Side::First);
        assert_eq!(sel.decided_by, Some(TieBreak::Created));
        assert!(sel.allow_merge);

        let a = dated("a", 100, 5, 0, ScanResult::Ok);
        let b = dated("b", 100, 6, 0, ScanResult::Ok);
        let sel = select(&a, &b);
        assert_eq!(sel.newer, Side::Second);
        assert_eq!(sel.decided_by, Some(TieBreak::ScanFirst));

        let a = dated("a", 100, 5, 9, ScanResult::Ok);
        let b = dated("b", 100, 5, 8, ScanResult::Ok);
        assert_eq!(select(&a, &b).decided_by, Some(TieBreak::ScanLast));
    }

    #[test]
    fn full_tie_keeps_first_and_forbids_merge() {
        let a = dated("a", 100, 5, 9, ScanResult::Ok);
        let b = dated("b", 100, 5, 9, ScanResult::Ok);
        let sel = select(&a, &b);
        assert_eq!(sel.newer, Side::First);
        assert_eq!(sel.decided_by, None);
        assert!(!sel.allow_merge);
        assert!(!select(&b, &a).allow_merge);
    }

    #[test]
    fn unvalidated_winner_never_merges() {
        for result in [
            ScanResult::None,
            ScanResult::Fail,
            ScanResult::Partial,
            ScanResult::Ignore,
        ] {
            let a = dated("a", 300, 0, 0, result);
            let b = dated("b", 100, 0, 0, ScanResult::Ok);
            let sel = select(&a, &b);
            assert_eq!(sel.newer, Side::First);
            assert!(!sel.allow_merge, "{result}");
        }
    }

    #[test]
    fn winner_does_not_depend_on_argument_order() {
        let stamps = [0i64, 100, 200];
        let results = [ScanResult::Ok, ScanResult::Fail];
        let mut checked = 0;
        for ca in stamps {
            for cb in stamps {
                for fa in stamps {
                    for fb in stamps {
                        for ra in results {
                            let a = dated("a", ca, fa, 50, ra);
                            let b = dated("b", cb, fb, 50, ScanResult::Ok);
                            let ab = select(&a, &b);
                            let ba = select(&b, &a);
                            if ab.decided_by.is_none() {
                                assert!(!ab.allow_merge && !ba.allow_merge);
                                continue;
                            }
                            let (newer_ab, _) = ab.indices(0, 1);
                            let (newer_ba, _) = ba.indices(0, 1);
                            assert_eq!([&a, &b][newer_ab].uuid, [&b, &a][newer_ba].uuid);
                            assert_eq!(ab.allow_merge, ba.allow_merge);
                            assert_eq!(ab.decided_by, ba.decided_by);
                            checked += 1;
                        }
                    }
                }
            }
        }
        assert!(checked > 0);
    }

    #[test]
    fn indices_follow_the_selected_side() {
        let sel = Selection {
            newer: Side::Second,
            decided_by: Some(TieBreak::Created),
            allow_merge: true,
        };
        assert_eq!(sel.indices(3, 7), (7, 3));
    }
}
