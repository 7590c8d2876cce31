use std::cmp::Ordering;
use std::sync::Arc;

use crate::couple::Couple;
use crate::game::Game;
use crate::prove::{PnValue, ProofNumbers};

/// Order for subgames of a multi-land node: cheapest-looking land first.
pub fn game_order<G: Game>(a: &G, b: &G) -> Ordering {
    a.lives()
        .cmp(&b.lives())
        .then_with(|| a.estimate_children_number().cmp(&b.estimate_children_number()))
        .then_with(|| a.to_compact().cmp(&b.to_compact()))
}

/// Order for the children of a plain node.
pub fn couple_order<G: Game>(a: &Couple<G>, b: &Couple<G>) -> Ordering {
    const NIMBER_WEIGHT: u32 = 4;
    let a_lives = a.position.lives() + NIMBER_WEIGHT * a.nimber.value() as u32;
    let b_lives = b.position.lives() + NIMBER_WEIGHT * b.nimber.value() as u32;
    a_lives
        .cmp(&b_lives)
        .then_with(|| {
            if G::NORMAL_IMPARTIAL {
                // more lands first: decomposition pays off
                b.position
                    .subgames_number()
                    .cmp(&a.position.subgames_number())
            } else {
                Ordering::Equal
            }
        })
        .then_with(|| {
            a.position
                .estimate_children_number()
                .cmp(&b.position.estimate_children_number())
        })
        .then_with(|| a.to_compact().cmp(&b.to_compact()))
}

pub trait ProofNumberEstimator<G: Game>: Send + Sync {
    fn estimate(&self, couple: &Couple<G>) -> ProofNumbers;
}

pub type SharedEstimator<G> = Arc<dyn ProofNumberEstimator<G>>;

/// Every unexpanded node starts at (1, 1).
pub struct DefaultEstimator;

impl<G: Game> ProofNumberEstimator<G> for DefaultEstimator {
    fn estimate(&self, _couple: &Couple<G>) -> ProofNumbers {
        ProofNumbers::unity()
    }
}

/// Biases the search away from deep positions.
pub struct DepthEstimator;

impl<G: Game> ProofNumberEstimator<G> for DepthEstimator {
    fn estimate(&self, couple: &Couple<G>) -> ProofNumbers {
        ProofNumbers::new(
            PnValue::new(1 + couple.estimate_proof_depth() as u64),
            PnValue::new(1 + couple.estimate_disproof_depth() as u64),
        )
    }
}

pub fn default_estimator<G: Game>() -> SharedEstimator<G> {
    Arc::new(DefaultEstimator)
}

pub fn depth_estimator<G: Game>() -> SharedEstimator<G> {
    Arc::new(DepthEstimator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rows::Rows;

    fn couple(s: &str) -> Couple<Rows> {
        Couple::parse(s).unwrap()
    }

    #[test]
    fn test_game_order_by_lives() {
        let a = Rows::single(2);
        let b = Rows::single(5);
        assert_eq!(game_order(&a, &b), Ordering::Less);
        assert_eq!(game_order(&b, &a), Ordering::Greater);
        assert_eq!(game_order(&a, &a), Ordering::Equal);
    }

    #[test]
    fn test_couple_order_weighs_nimber() {
        // 1 live + 4*1 nimber = 5 > 4 lives + 0 nimber.
        let light = couple("4 0");
        let heavy = couple("1 1");
        assert_eq!(couple_order(&light, &heavy), Ordering::Less);
    }

    #[test]
    fn test_couple_order_prefers_more_lands() {
        let split = couple("2+2 0");
        let solid = couple("4 0");
        assert_eq!(couple_order(&split, &solid), Ordering::Less);
    }

    #[test]
    fn test_estimators() {
        let c = couple("3 1");
        let d = DefaultEstimator.estimate(&c);
        assert_eq!(d.proof, PnValue::new(1));
        let e = DepthEstimator.estimate(&c);
        assert_eq!(e.proof, PnValue::new(1 + 3 + 1));
    }
}
