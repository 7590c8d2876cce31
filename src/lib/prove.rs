pub mod dfs;
pub mod dfpn;
pub mod group;
pub mod manager;
pub mod node;
pub mod pdfpn;
pub mod pn2s;
pub mod pns;
pub mod tree;

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::sync::Arc;

use crate::couple::Couple;
use crate::game::{Game, Outcome};
use crate::nimber::Nimber;
use crate::nimber_db::NimberDatabase;
use crate::prove::node::ExpansionInfo;

/// A proof or disproof number. `u64::MAX` denotes infinity; addition
/// saturates to infinity and subtraction clamps at zero. `INF - INF`
/// has no meaning and aborts.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PnValue(u64);

pub const INF: PnValue = PnValue(u64::MAX);

impl PnValue {
    pub const fn new(value: u64) -> Self {
        PnValue(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_inf(self) -> bool {
        self.0 == u64::MAX
    }

    /// Multiply by a factor, used for the df-pn epsilon widening.
    pub fn scale(self, factor: f64) -> PnValue {
        if self.is_inf() {
            return INF;
        }
        let scaled = self.0 as f64 * factor;
        if scaled >= u64::MAX as f64 {
            INF
        } else {
            PnValue(scaled as u64)
        }
    }
}

impl Add for PnValue {
    type Output = PnValue;

    fn add(self, rhs: PnValue) -> PnValue {
        if self.is_inf() || rhs.is_inf() {
            INF
        } else {
            PnValue(self.0.saturating_add(rhs.0))
        }
    }
}

impl Sub for PnValue {
    type Output = PnValue;

    fn sub(self, rhs: PnValue) -> PnValue {
        if self.is_inf() {
            if rhs.is_inf() {
                panic!("undefined proof-number arithmetic: INF - INF");
            }
            return INF;
        }
        if rhs.is_inf() {
            return PnValue(0);
        }
        PnValue(self.0.saturating_sub(rhs.0))
    }
}

impl AddAssign for PnValue {
    fn add_assign(&mut self, rhs: PnValue) {
        *self = *self + rhs;
    }
}

impl SubAssign for PnValue {
    fn sub_assign(&mut self, rhs: PnValue) {
        *self = *self - rhs;
    }
}

impl From<u64> for PnValue {
    fn from(value: u64) -> Self {
        PnValue(value)
    }
}

impl fmt::Display for PnValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_inf() {
            write!(f, "INF")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl fmt::Debug for PnValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ProofNumbers {
    pub proof: PnValue,
    pub disproof: PnValue,
}

impl ProofNumbers {
    pub fn new(proof: PnValue, disproof: PnValue) -> Self {
        ProofNumbers { proof, disproof }
    }

    pub fn unity() -> Self {
        ProofNumbers::new(PnValue::new(1), PnValue::new(1))
    }

    pub fn winning() -> Self {
        ProofNumbers::new(PnValue::new(0), INF)
    }

    pub fn losing() -> Self {
        ProofNumbers::new(INF, PnValue::new(0))
    }

    pub fn is_win(self) -> bool {
        self.proof == PnValue::new(0)
    }

    pub fn is_loss(self) -> bool {
        self.disproof == PnValue::new(0)
    }

    pub fn is_proved(self) -> bool {
        self.is_win() || self.is_loss()
    }

    pub fn outcome(self) -> Outcome {
        if self.is_win() {
            Outcome::Win
        } else if self.is_loss() {
            Outcome::Loss
        } else {
            Outcome::Unknown
        }
    }
}

impl Default for ProofNumbers {
    fn default() -> Self {
        ProofNumbers::unity()
    }
}

impl fmt::Debug for ProofNumbers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}, {})", self.proof, self.disproof)
    }
}

/// Common surface of the PNS-family solvers: expand a couple under an
/// iteration budget and report the resulting root expansion.
pub trait Expander<G: Game> {
    /// Expand the couple, spending at most `max_iterations` iterations
    /// (`0` = unlimited), and return the root's expansion info.
    fn expand_couple(&mut self, couple: &Couple<G>, max_iterations: u64) -> ExpansionInfo<G>;

    fn clear_tree(&mut self);
    fn tree_size(&self) -> usize;
    fn iterations(&self) -> u64;
    fn nimber_db(&self) -> &Arc<NimberDatabase<G>>;

    fn solve_couple(&mut self, couple: &Couple<G>) -> Outcome {
        self.expand_couple(couple, 0).pns.outcome()
    }

    fn solve_position(&mut self, position: &G) -> Outcome {
        self.solve_couple(&Couple::new(position.clone(), Nimber::new(0)))
    }

    fn clear_nimbers(&mut self) {
        self.nimber_db().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturating_add() {
        let x = PnValue::new(17);
        assert_eq!(x + INF, INF);
        assert_eq!(INF + x, INF);
        assert_eq!(PnValue::new(2) + PnValue::new(3), PnValue::new(5));
        assert_eq!(PnValue::new(u64::MAX - 2) + PnValue::new(100), INF);
    }

    #[test]
    fn test_saturating_sub() {
        assert_eq!(INF - PnValue::new(5), INF);
        assert_eq!(PnValue::new(3) - PnValue::new(5), PnValue::new(0));
        assert_eq!(PnValue::new(5) - INF, PnValue::new(0));
        assert_eq!(PnValue::new(5) - PnValue::new(2), PnValue::new(3));
    }

    #[test]
    #[should_panic(expected = "INF - INF")]
    fn test_inf_minus_inf_is_fatal() {
        let _ = INF - INF;
    }

    #[test]
    fn test_ordering() {
        let x = PnValue::new(12);
        assert!(INF >= x);
        assert_eq!(INF.min(x), x);
        assert_eq!(INF.max(x), INF);
    }

    #[test]
    fn test_proof_numbers() {
        assert!(ProofNumbers::winning().is_win());
        assert!(ProofNumbers::losing().is_loss());
        assert!(!ProofNumbers::unity().is_proved());
        assert_eq!(ProofNumbers::winning().outcome(), Outcome::Win);
        assert_eq!(ProofNumbers::losing().outcome(), Outcome::Loss);
        assert_eq!(ProofNumbers::unity().outcome(), Outcome::Unknown);
    }

    #[test]
    fn test_scale() {
        assert_eq!(PnValue::new(8).scale(1.25), PnValue::new(10));
        assert_eq!(INF.scale(2.0), INF);
    }
}
