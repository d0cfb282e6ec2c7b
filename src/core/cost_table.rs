//! The per-node cost table (the "Q-register").

use std::fmt;

use crate::core::{id::Hop, traits::Egress};

/// One candidate next hop for a destination, with its current cost estimate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateEntry {
    pub(crate) hop: Hop,
    pub(crate) cost: u32,
    pub(crate) egress: Option<Egress>,
}

impl CandidateEntry {
    pub(crate) fn new(hop: Hop) -> Self {
        Self {
            hop,
            cost: 0,
            egress: None,
        }
    }

    pub fn hop(&self) -> &Hop {
        &self.hop
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    /// The resolved local egress, `None` if the neighbor isn't directly linked.
    pub fn egress(&self) -> Option<Egress> {
        self.egress
    }
}

/// The outcome of applying a cost report to a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The matching entry now holds the new cost.
    Updated { previous: u32, cost: u32 },
    /// The row index is past the end of the table.
    RowOutOfRange,
    /// No entry in the row names the sender.
    NoMatchingCandidate,
}

/// Candidate next hops and their costs, one row per destination in the shared node order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CostTable {
    rows: Vec<Vec<CandidateEntry>>,
}

impl CostTable {
    pub(crate) fn from_rows(rows: Vec<Vec<CandidateEntry>>) -> Self {
        Self { rows }
    }

    /// Returns the number of destination rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the candidates for the destination row, if it exists.
    pub fn row(&self, index: usize) -> Option<&[CandidateEntry]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[CandidateEntry]> {
        self.rows.iter().map(Vec::as_slice)
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = &mut CandidateEntry> {
        self.rows.iter_mut().flatten()
    }

    /// Returns the minimum cost over every candidate in the row, resolved or not; `None` for a
    /// missing or empty row.
    pub fn min_cost(&self, index: usize) -> Option<u32> {
        first_min(self.rows.get(index)?.iter()).map(|entry| entry.cost)
    }

    /// Returns the cheapest candidate with a resolved egress; earlier entries win ties.
    pub fn best_resolved(&self, index: usize) -> Option<&CandidateEntry> {
        first_min(
            self.rows
                .get(index)?
                .iter()
                .filter(|entry| entry.egress.is_some()),
        )
    }

    /// Sets the sender's entry in the row to `min_cost` plus the occupancy observed on its
    /// egress. `occupancy` is only consulted when the entry is matched.
    pub fn apply_report<F>(
        &mut self,
        index: usize,
        sender: &[u8],
        min_cost: u32,
        occupancy: F,
    ) -> Applied
    where
        F: FnOnce(Option<Egress>) -> u32,
    {
        let row = match self.rows.get_mut(index) {
            Some(row) => row,
            None => return Applied::RowOutOfRange,
        };

        match row.iter_mut().find(|entry| entry.hop.matches(sender)) {
            Some(entry) => {
                let previous = entry.cost;
                entry.cost = min_cost.saturating_add(occupancy(entry.egress));

                Applied::Updated {
                    previous,
                    cost: entry.cost,
                }
            }
            None => Applied::NoMatchingCandidate,
        }
    }
}

// Strict less-than: a later entry with an equal cost never replaces the current pick.
fn first_min<'a>(entries: impl Iterator<Item = &'a CandidateEntry>) -> Option<&'a CandidateEntry> {
    entries.fold(None, |best: Option<&CandidateEntry>, entry| match best {
        Some(best) if best.cost <= entry.cost => Some(best),
        _ => Some(entry),
    })
}

impl fmt::Display for CostTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.rows.iter().enumerate() {
            write!(f, "{i}:")?;
            for entry in row {
                match entry.egress {
                    Some(egress) => write!(f, " [{} q={} {}]", entry.hop, entry.cost, egress)?,
                    None => write!(f, " [{} q={} -]", entry.hop, entry.cost)?,
                }
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rand::{thread_rng, Rng};

    use super::*;

    fn entry(name: &str, cost: u32, egress: Option<u32>) -> CandidateEntry {
        CandidateEntry {
            hop: Hop::parse(name),
            cost,
            egress: egress.map(Egress),
        }
    }

    fn table() -> CostTable {
        CostTable::from_rows(vec![
            vec![entry("sink", 0, None)],
            vec![],
            vec![entry("X", 50, Some(1)), entry("Y", 30, None)],
            vec![entry("X", 7, Some(1)), entry("Z", 7, Some(2))],
        ])
    }

    #[test]
    fn best_resolved_skips_unresolved() {
        let table = table();
        let best = table.best_resolved(2).unwrap();

        assert_eq!(best.hop(), &Hop::parse("X"));
        assert_eq!(best.egress(), Some(Egress(1)));
        // The unresolved, cheaper candidate still counts towards the reported minimum.
        assert_eq!(table.min_cost(2), Some(30));
    }

    #[test]
    fn ties_pick_the_first_entry() {
        let table = table();

        assert_eq!(table.best_resolved(3).unwrap().hop(), &Hop::parse("X"));
        assert_eq!(table.min_cost(3), Some(7));
    }

    #[test]
    fn empty_and_sink_rows() {
        let table = table();

        assert_eq!(table.min_cost(0), Some(0));
        assert!(table.best_resolved(0).is_none());
        assert_eq!(table.min_cost(1), None);
        assert!(table.best_resolved(1).is_none());
        assert_eq!(table.min_cost(4), None);
        assert!(table.best_resolved(4).is_none());
    }

    #[test]
    fn apply_report_adds_occupancy() {
        let mut table = table();

        let applied = table.apply_report(2, b"X", 10, |egress| {
            assert_eq!(egress, Some(Egress(1)));
            4
        });

        assert_eq!(
            applied,
            Applied::Updated {
                previous: 50,
                cost: 14
            }
        );
        assert_eq!(table.row(2).unwrap()[0].cost(), 14);
    }

    #[test]
    fn apply_report_is_idempotent() {
        let mut rng = thread_rng();
        let mut table = table();

        let min_cost = rng.gen_range(0..1_000_000);
        let occupancy = rng.gen_range(0..1_000);

        table.apply_report(3, b"Z", min_cost, |_| occupancy);
        let once = table.clone();
        table.apply_report(3, b"Z", min_cost, |_| occupancy);

        assert_eq!(table, once);
        assert_eq!(table.row(3).unwrap()[1].cost(), min_cost + occupancy);
    }

    #[test]
    fn apply_report_out_of_range() {
        let mut table = table();
        let before = table.clone();

        let applied = table.apply_report(table.len(), b"X", 10, |_| unreachable!());

        assert_eq!(applied, Applied::RowOutOfRange);
        assert_eq!(table, before);
    }

    #[test]
    fn apply_report_unknown_sender() {
        let mut table = table();
        let before = table.clone();

        assert_eq!(
            table.apply_report(2, b"Q", 10, |_| unreachable!()),
            Applied::NoMatchingCandidate
        );
        // The sink can't be addressed by a report either.
        assert_eq!(
            table.apply_report(0, b"sink", 10, |_| unreachable!()),
            Applied::NoMatchingCandidate
        );
        assert_eq!(table, before);
    }

    #[test]
    fn apply_report_saturates() {
        let mut table = table();
        table.apply_report(2, b"X", u32::MAX - 1, |_| 5);

        assert_eq!(table.row(2).unwrap()[0].cost(), u32::MAX);
    }

    #[test]
    fn display() {
        let table = CostTable::from_rows(vec![vec![entry("sink", 0, None)], vec![entry("X", 3, Some(2))]]);

        assert_eq!(table.to_string(), "0: [sink q=0 -]\n1: [X q=3 if2]\n");
    }
}
