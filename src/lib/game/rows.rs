//! The built-in demo game: rows of tokens. A move removes one or two
//! adjacent tokens from a row, possibly splitting it in two. Rows are
//! independent lands, so positions decompose and the engine's subgame
//! machinery is exercised end to end. Grundy values of single rows are
//! the classic Kayles sequence, which the tests use as an oracle.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::game::Game;

/// A multiset of rows, kept sorted descending. A row of 0 is a dead land:
/// it has no moves but still counts as a land for decomposition, so
/// `0*2` is a two-subgame position while `0` alone is terminal.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Rows {
    rows: Vec<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Compact(String);

impl Rows {
    pub fn from_rows(mut rows: Vec<u32>) -> Self {
        rows.sort_unstable_by(|a, b| b.cmp(a));
        if rows.is_empty() {
            rows.push(0);
        }
        Rows { rows }
    }

    pub fn single(row: u32) -> Self {
        Rows { rows: vec![row] }
    }

    pub fn rows(&self) -> &[u32] {
        &self.rows
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let mut i = 0;
        while i < self.rows.len() {
            let mut j = i;
            while j < self.rows.len() && self.rows[j] == self.rows[i] {
                j += 1;
            }
            if !out.is_empty() {
                out.push('+');
            }
            out.push_str(&self.rows[i].to_string());
            if j - i > 1 {
                out.push('*');
                out.push_str(&(j - i).to_string());
            }
            i = j;
        }
        out
    }
}

fn parse_rows(s: &str) -> Result<Vec<u32>, Error> {
    let invalid = || Error::InvalidPosition(s.to_owned());
    if s.is_empty() {
        return Err(invalid());
    }
    let mut rows = Vec::new();
    for group in s.split('+') {
        let (row, count) = match group.split_once('*') {
            Some((row, count)) => (row, count),
            None => (group, "1"),
        };
        let row: u32 = row.trim().parse().map_err(|_| invalid())?;
        let count: usize = count.trim().parse().map_err(|_| invalid())?;
        if count == 0 {
            return Err(invalid());
        }
        rows.extend(std::iter::repeat(row).take(count));
    }
    Ok(rows)
}

impl fmt::Display for Compact {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Compact {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Compact {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        parse_rows(s).map(|rows| Rows::from_rows(rows).to_compact())
    }
}

impl fmt::Display for Rows {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

impl Game for Rows {
    const NORMAL_IMPARTIAL: bool = true;

    type Compact = Compact;

    fn from_compact(compact: &Compact) -> Self {
        match parse_rows(&compact.0) {
            Ok(rows) => Rows::from_rows(rows),
            Err(_) => panic!("corrupt compact position {:?}", compact.0),
        }
    }

    fn to_compact(&self) -> Compact {
        Compact(self.render())
    }

    fn lives(&self) -> u32 {
        self.rows.iter().sum()
    }

    fn is_terminal(&self) -> bool {
        !self.is_multi_land() && self.lives() == 0
    }

    fn is_multi_land(&self) -> bool {
        self.rows.len() > 1
    }

    fn subgames(&self) -> Vec<Self> {
        if !self.is_multi_land() {
            return Vec::new();
        }
        self.rows.iter().map(|&r| Rows::single(r)).collect()
    }

    fn subgames_number(&self) -> usize {
        self.rows.len()
    }

    fn from_subgames(subgames: Vec<Self>) -> Self {
        let mut rows = Vec::new();
        for sub in subgames {
            rows.extend(sub.rows);
        }
        Rows::from_rows(rows)
    }

    fn compute_children(&self) -> Vec<Self> {
        let mut seen = HashSet::new();
        let mut children = Vec::new();
        for (i, &row) in self.rows.iter().enumerate() {
            if row == 0 {
                continue;
            }
            let others: Vec<u32> = self
                .rows
                .iter()
                .enumerate()
                .filter(|&(j, &r)| j != i && r > 0)
                .map(|(_, &r)| r)
                .collect();
            for take in 1..=row.min(2) {
                let rest = row - take;
                for left in 0..=rest / 2 {
                    let right = rest - left;
                    let mut rows = others.clone();
                    if left > 0 {
                        rows.push(left);
                    }
                    if right > 0 {
                        rows.push(right);
                    }
                    let child = Rows::from_rows(rows);
                    if seen.insert(child.clone()) {
                        children.push(child);
                    }
                }
            }
        }
        children
    }

    fn estimate_children_number(&self) -> usize {
        self.rows.iter().map(|&r| r as usize).sum()
    }

    fn estimate_proof_depth(&self) -> usize {
        self.lives() as usize
    }

    fn estimate_disproof_depth(&self) -> usize {
        self.lives() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(s: &str) -> Rows {
        Rows::from_compact(&s.parse().unwrap())
    }

    #[test]
    fn test_compact_canonical() {
        assert_eq!("2+3".parse::<Compact>().unwrap().as_str(), "3+2");
        assert_eq!("3+3+1".parse::<Compact>().unwrap().as_str(), "3*2+1");
        assert_eq!("0*2".parse::<Compact>().unwrap().as_str(), "0*2");
        let c: Compact = "5+2*2".parse().unwrap();
        assert_eq!(c.to_string().parse::<Compact>().unwrap(), c);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Compact>().is_err());
        assert!("3+".parse::<Compact>().is_err());
        assert!("3*0".parse::<Compact>().is_err());
        assert!("a+2".parse::<Compact>().is_err());
    }

    #[test]
    fn test_terminal_and_lands() {
        let dead = pos("0");
        assert!(dead.is_terminal());
        assert!(!dead.is_multi_land());
        assert!(dead.subgames().is_empty());

        let two = pos("0*2");
        assert!(!two.is_terminal());
        assert!(two.is_multi_land());
        assert_eq!(two.subgames().len(), 2);
        assert!(two.subgames().iter().all(|s| s.is_terminal()));

        let mixed = pos("3+2");
        assert!(mixed.is_multi_land());
        assert_eq!(mixed.subgames_number(), 2);
    }

    #[test]
    fn test_children_of_small_rows() {
        // One token: the only move removes it.
        let children = pos("1").compute_children();
        assert_eq!(children.len(), 1);
        assert!(children[0].is_terminal());

        // Three tokens: take one end token (2), take the middle (1+1),
        // take two from an end (1), take the whole middle pair (1).
        let compacts: HashSet<String> = pos("3")
            .compute_children()
            .iter()
            .map(|c| c.to_compact().to_string())
            .collect();
        let expected: HashSet<String> =
            ["2", "1*2", "1"].iter().map(|s| s.to_string()).collect();
        assert_eq!(compacts, expected);
    }

    #[test]
    fn test_children_drop_dead_lands() {
        let children = pos("1+0").compute_children();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].to_compact().as_str(), "0");
    }

    #[test]
    fn test_from_subgames_roundtrip() {
        let p = pos("4+2*2");
        let rebuilt = Rows::from_subgames(p.subgames());
        assert_eq!(rebuilt, p);
        assert!(Rows::from_subgames(Vec::new()).is_terminal());
    }
}
