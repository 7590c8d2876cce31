//! Shared behaviour of proof-number nodes: expansion, the update rules
//! for plain and multi-land states, win/loss collapse, and most-proving
//! child selection. `PnsNode` owns its children directly (the shape the
//! df-pn recursions need); the tree stores nodes in an arena and reuses
//! the same rules through `ChildSnapshot`s.

use rand::rngs::StdRng;
use rand::Rng;

use crate::couple::{Couple, CoupleCompact};
use crate::game::{Game, Outcome};
use crate::heuristics;
use crate::nimber::Nimber;
use crate::nimber_db::NimberDatabase;
use crate::prove::{PnValue, ProofNumbers, INF};

/// Result of expanding a node, handed between solver levels and between
/// master and workers.
#[derive(Clone, Debug)]
pub struct ExpansionInfo<G: Game> {
    pub parent: CoupleCompact<G>,
    pub pns: ProofNumbers,
    pub merged_nimber: Nimber,
    pub children: Vec<(CoupleCompact<G>, ProofNumbers)>,
}

#[derive(Clone, Debug)]
pub struct NodeState<G: Game> {
    pub compact: CoupleCompact<G>,
    pub lives: u32,
    pub multi_land: bool,
}

impl<G: Game> NodeState<G> {
    pub fn new(couple: &Couple<G>) -> Self {
        NodeState {
            compact: couple.to_compact(),
            lives: couple.position.lives(),
            multi_land: couple.position.is_multi_land(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeInfo {
    pub pns: ProofNumbers,
    pub iterations: u64,
    pub locked: bool,
    pub expanded: bool,
    pub overestimated: bool,
    /// Nimber accumulated from folded-away lands; multi-land nodes only.
    pub merged_nimber: Nimber,
}

impl NodeInfo {
    pub fn new(pns: ProofNumbers) -> Self {
        NodeInfo {
            pns,
            iterations: 0,
            locked: false,
            expanded: false,
            overestimated: false,
            merged_nimber: Nimber::new(0),
        }
    }

    pub fn has_updated(&self, previous: &NodeInfo) -> bool {
        self.pns != previous.pns || self.locked != previous.locked
    }
}

/// The per-child facts the update and selection rules consume.
#[derive(Copy, Clone, Debug)]
pub struct ChildSnapshot {
    pub pns: ProofNumbers,
    pub locked: bool,
    /// Workers currently exploring the child; zero outside parallel search.
    pub workers: usize,
}

/// Disproof number for a plain child, min(proof, disproof) for a land,
/// plus the contention penalty.
pub fn child_complexity(multi_land: bool, child: &ChildSnapshot) -> PnValue {
    let base = if multi_land {
        child.pns.proof.min(child.pns.disproof)
    } else {
        child.pns.disproof
    };
    base + PnValue::new(child.workers as u64)
}

/// The threshold at which the runner-up child would take over, tightened
/// by the number of workers already at the most-proving child.
pub fn switching_threshold(
    multi_land: bool,
    children: &[ChildSnapshot],
    mpn_idx: usize,
    mpn2_idx: usize,
) -> PnValue {
    let runner_up = child_complexity(multi_land, &children[mpn2_idx]);
    if runner_up.is_inf() {
        INF
    } else {
        runner_up + PnValue::new(1) - PnValue::new(children[mpn_idx].workers as u64)
    }
}

/// Picks the most-proving child and a runner-up among non-locked
/// children; ties are broken by the RNG when one is supplied. With
/// `land_switching` off, a multi-land node always descends into its
/// first non-locked land.
pub fn select_mpn(
    multi_land: bool,
    children: &[ChildSnapshot],
    mut rng: Option<&mut StdRng>,
    land_switching: bool,
) -> (usize, Option<usize>) {
    let mut best: Vec<usize> = Vec::new();
    let mut best_complexity = INF;
    let mut mpn2: Option<usize> = None;

    for (i, child) in children.iter().enumerate() {
        if !child.locked {
            let complexity = child_complexity(multi_land, child);
            if best.is_empty() || complexity < best_complexity {
                if !best.is_empty() {
                    mpn2 = Some(best[0]);
                }
                best_complexity = complexity;
                best.clear();
                best.push(i);
            } else if complexity == best_complexity {
                best.push(i);
            } else if mpn2.map_or(true, |j| complexity < child_complexity(multi_land, &children[j])) {
                mpn2 = Some(i);
            }

            if !land_switching && multi_land {
                break;
            }
        }
    }

    assert!(!best.is_empty(), "selecting an MPN on a fully locked node");

    let mpn = match rng.as_deref_mut() {
        Some(rng) if best.len() > 1 => best[rng.gen_range(0..best.len())],
        _ => best[0],
    };
    if best.len() > 1 {
        mpn2 = best.iter().copied().find(|&i| i != mpn);
    }
    (mpn, mpn2)
}

/// Recomputes a node's lock flag and proof numbers from its children.
/// Callers invoke this only on expanded, unproved nodes with at least
/// one child.
pub fn update_proof_numbers(info: &mut NodeInfo, multi_land: bool, children: &[ChildSnapshot]) {
    debug_assert!(!children.is_empty());
    info.locked = children.iter().all(|c| c.locked);

    if multi_land {
        if children.len() == 1 {
            info.pns = children[0].pns;
            return;
        }
        let mut proof = PnValue::new(0);
        for child in children {
            let complexity = child_complexity(true, child);
            if info.overestimated {
                proof = proof.max(complexity);
            } else {
                proof += complexity;
            }
        }
        if info.overestimated {
            proof += PnValue::new(children.len() as u64 - 1);
        }
        info.pns = ProofNumbers::new(proof, proof);
    } else {
        let mut proof = if info.locked { PnValue::new(0) } else { INF };
        let mut disproof = PnValue::new(0);
        for child in children {
            if info.overestimated {
                disproof = disproof.max(child.pns.proof);
            } else {
                disproof += child.pns.proof;
            }
            if info.locked {
                proof = proof.max(child.pns.disproof);
            } else if !child.locked {
                proof = proof.min(child.pns.disproof);
            }
        }
        if info.overestimated {
            disproof += PnValue::new(children.len() as u64 - 1);
        }
        info.pns = ProofNumbers::new(proof, disproof);
    }
}

/// A proof-number node owning its children, as used on the df-pn path.
pub struct PnsNode<G: Game> {
    pub state: NodeState<G>,
    pub info: NodeInfo,
    pub children: Vec<PnsNode<G>>,
    /// Workers currently exploring this node elsewhere (parallel search).
    pub workers: usize,
}

pub type ChildFactory<'a, G> = dyn FnMut(&Couple<G>) -> PnsNode<G> + 'a;

impl<G: Game> PnsNode<G> {
    pub fn new(couple: &Couple<G>) -> Self {
        Self::with_proof_numbers(couple, ProofNumbers::unity())
    }

    pub fn with_proof_numbers(couple: &Couple<G>, pns: ProofNumbers) -> Self {
        PnsNode {
            state: NodeState::new(couple),
            info: NodeInfo::new(pns),
            children: Vec::new(),
            workers: 0,
        }
    }

    pub fn with_stored(couple: &Couple<G>, pns: ProofNumbers, iterations: u64, workers: usize) -> Self {
        let mut node = Self::with_proof_numbers(couple, pns);
        node.info.iterations = iterations;
        node.workers = workers;
        node
    }

    pub fn couple(&self) -> Couple<G> {
        Couple::from_compact(&self.state.compact)
    }

    pub fn compact(&self) -> &CoupleCompact<G> {
        &self.state.compact
    }

    pub fn proof_numbers(&self) -> ProofNumbers {
        self.info.pns
    }

    pub fn is_multi_land(&self) -> bool {
        self.state.multi_land
    }

    pub fn is_expanded(&self) -> bool {
        self.info.expanded
    }

    pub fn is_proved(&self) -> bool {
        self.info.pns.is_proved()
    }

    pub fn is_locked(&self) -> bool {
        self.info.locked
    }

    pub fn set_overestimated(&mut self) {
        self.info.overestimated = true;
    }

    pub fn lock(&mut self) {
        self.info.locked = true;
    }

    pub fn unlock(&mut self) {
        self.info.locked = false;
    }

    pub fn add_iterations(&mut self, iterations: u64) {
        self.info.iterations += iterations;
    }

    /// Overwrite from a fresher transposition-table record.
    pub fn update_stored_info(&mut self, pns: ProofNumbers, iterations: u64, workers: usize) {
        self.info.pns = pns;
        self.info.iterations = iterations;
        self.workers = workers;
    }

    pub fn snapshots(&self) -> Vec<ChildSnapshot> {
        self.children
            .iter()
            .map(|child| ChildSnapshot {
                pns: child.info.pns,
                locked: child.info.locked,
                workers: child.workers,
            })
            .collect()
    }

    pub fn child_complexity(&self, idx: usize) -> PnValue {
        let child = &self.children[idx];
        child_complexity(
            self.state.multi_land,
            &ChildSnapshot {
                pns: child.info.pns,
                locked: child.info.locked,
                workers: child.workers,
            },
        )
    }

    pub fn switching_threshold(&self, mpn_idx: usize, mpn2_idx: usize) -> PnValue {
        switching_threshold(self.state.multi_land, &self.snapshots(), mpn_idx, mpn2_idx)
    }

    pub fn mpn_idx(&self, rng: Option<&mut StdRng>, land_switching: bool) -> (usize, Option<usize>) {
        select_mpn(self.state.multi_land, &self.snapshots(), rng, land_switching)
    }

    pub fn expand(&mut self, factory: &mut ChildFactory<G>, db: &NimberDatabase<G>) {
        debug_assert!(!self.info.expanded);
        self.info.expanded = true;
        if self.state.multi_land {
            self.expand_lands(factory);
        } else {
            self.expand_plain(factory, db);
        }
    }

    fn expand_lands(&mut self, factory: &mut ChildFactory<G>) {
        let couple = self.couple();
        self.info.merged_nimber = couple.nimber;
        let mut subgames = couple.position.subgames();
        subgames.sort_by(heuristics::game_order);
        for subgame in subgames {
            let child = factory(&Couple::new(subgame, Nimber::new(0)));
            self.children.push(child);
        }
    }

    fn expand_plain(&mut self, factory: &mut ChildFactory<G>, db: &NimberDatabase<G>) {
        let couple = self.couple();
        let (outcome, children) = couple.compute_children(db);
        match outcome {
            Outcome::Win => self.set_to_win(),
            Outcome::Loss => self.set_to_loss(),
            Outcome::Unknown => {
                for child in &children {
                    let node = factory(child);
                    self.children.push(node);
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.info.expanded = false;
        self.children.clear();
        self.info.merged_nimber = Nimber::new(0);
    }

    pub fn set_to_win(&mut self) {
        self.close();
        self.info.locked = false;
        self.info.pns = ProofNumbers::winning();
    }

    pub fn set_to_loss(&mut self) {
        self.close();
        self.info.locked = false;
        self.info.pns = ProofNumbers::losing();
    }

    pub fn set_proof_numbers(&mut self, pns: ProofNumbers) {
        if pns.is_win() {
            self.set_to_win();
        } else if pns.is_loss() {
            self.set_to_loss();
        } else {
            self.info.pns = pns;
        }
    }

    /// Re-derives the node from current child results: folds or drops
    /// settled children, then recomputes the proof numbers.
    pub fn update(&mut self, factory: &mut ChildFactory<G>, db: &NimberDatabase<G>) {
        if self.is_proved() || !self.info.expanded {
            return;
        }
        if self.state.multi_land {
            self.update_lands(factory, db);
        } else {
            self.update_plain_children();
        }
        if !self.is_proved() && self.info.expanded {
            let snapshots = self.snapshots();
            update_proof_numbers(&mut self.info, self.state.multi_land, &snapshots);
        }
    }

    fn update_plain_children(&mut self) {
        let mut i = 0;
        while i < self.children.len() {
            if self.children[i].info.pns.is_loss() {
                self.set_to_win();
                return;
            }
            if self.children[i].info.pns.is_win() {
                self.children.remove(i);
                continue;
            }
            i += 1;
        }
        if self.children.is_empty() {
            self.set_to_loss();
        }
    }

    fn update_lands(&mut self, factory: &mut ChildFactory<G>, db: &NimberDatabase<G>) {
        if self.children.len() > 1 {
            let mut i = 0;
            while i < self.children.len() {
                let compact = self.children[i].state.compact.clone();
                let pns = self.children[i].info.pns;

                if let Some(stored) = db.get(&compact.position) {
                    self.info.merged_nimber = Nimber::merge(self.info.merged_nimber, stored);
                    self.children.remove(i);
                    continue;
                }
                if pns.is_loss() {
                    self.info.merged_nimber =
                        Nimber::merge(self.info.merged_nimber, compact.nimber);
                    self.children.remove(i);
                    continue;
                }
                if pns.is_win() {
                    // This land needs a different nimber; try the next one.
                    let next = Couple::new(
                        G::from_compact(&compact.position),
                        compact.nimber.succ(),
                    );
                    self.children[i] = factory(&next);
                    continue;
                }
                i += 1;
            }
        }

        if self.children.len() == 1 {
            if self.children[0].state.compact.nimber != self.info.merged_nimber {
                let position = G::from_compact(&self.children[0].state.compact.position);
                self.children[0] = factory(&Couple::new(position, self.info.merged_nimber));
            }
            if self.children[0].info.pns.is_win() {
                self.set_to_win();
            } else if self.children[0].info.pns.is_loss() {
                self.set_to_loss();
            }
        } else if self.children.is_empty() {
            if self.info.merged_nimber.is_win() {
                self.set_to_win();
            } else {
                self.set_to_loss();
            }
        }
    }

    pub fn expansion_info(&self) -> ExpansionInfo<G> {
        ExpansionInfo {
            parent: self.state.compact.clone(),
            pns: self.info.pns,
            merged_nimber: self.info.merged_nimber,
            children: self
                .children
                .iter()
                .map(|child| (child.state.compact.clone(), child.info.pns))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rows::Rows;

    fn couple(s: &str) -> Couple<Rows> {
        Couple::parse(s).unwrap()
    }

    fn fresh_factory() -> impl FnMut(&Couple<Rows>) -> PnsNode<Rows> {
        |c: &Couple<Rows>| PnsNode::new(c)
    }

    #[test]
    fn test_collapse_is_absorbing() {
        let db = NimberDatabase::<Rows>::new(false);
        let mut factory = fresh_factory();
        let mut node = PnsNode::new(&couple("3 0"));
        node.expand(&mut factory, &db);
        assert!(node.is_expanded());
        node.set_to_win();
        assert!(node.children.is_empty());
        assert!(!node.is_expanded());
        assert_eq!(node.info.pns, ProofNumbers::winning());
        // Further updates leave the collapsed node untouched.
        node.update(&mut fresh_factory(), &db);
        assert_eq!(node.info.pns, ProofNumbers::winning());
        assert!(node.children.is_empty());
    }

    #[test]
    fn test_expand_collapses_immediate_win() {
        // "1 0" has the losing reply "0 0", so expansion proves a win.
        let db = NimberDatabase::<Rows>::new(false);
        let mut node = PnsNode::new(&couple("1 0"));
        node.expand(&mut fresh_factory(), &db);
        assert!(node.info.pns.is_win());
    }

    #[test]
    fn test_multi_land_expansion_orders_lands() {
        let db = NimberDatabase::<Rows>::new(false);
        let mut node = PnsNode::new(&couple("4+2 0"));
        node.expand(&mut fresh_factory(), &db);
        assert_eq!(node.children.len(), 2);
        // cheapest land first
        assert_eq!(node.children[0].compact().to_string(), "2 0");
        assert_eq!(node.children[1].compact().to_string(), "4 0");
        assert_eq!(node.info.merged_nimber, Nimber::new(0));
    }

    #[test]
    fn test_update_lands_folds_database_hits() {
        let db = NimberDatabase::<Rows>::new(false);
        let mut node = PnsNode::new(&couple("4+2 0"));
        node.expand(&mut fresh_factory(), &db);

        db.insert("2".parse().unwrap(), Nimber::new(2));
        db.insert("4".parse().unwrap(), Nimber::new(1));
        node.update(&mut fresh_factory(), &db);
        // 0 ^ 2 ^ 1 = 3, no lands left: a win.
        assert!(node.info.pns.is_win());
    }

    #[test]
    fn test_update_lands_retries_next_nimber() {
        let db = NimberDatabase::<Rows>::new(false);
        let mut node = PnsNode::new(&couple("4+2 0"));
        node.expand(&mut fresh_factory(), &db);
        // Pretend land "2" at nimber 0 was proved a win.
        node.children[0].set_to_win();
        node.update(&mut fresh_factory(), &db);
        assert_eq!(node.children[0].compact().to_string(), "2 1");
    }

    #[test]
    fn test_single_land_fixup_carries_merged_nimber() {
        let db = NimberDatabase::<Rows>::new(false);
        let mut node = PnsNode::new(&couple("4+2 0"));
        node.expand(&mut fresh_factory(), &db);
        // Land "2" proved a loss at nimber 0: folds 0 into the merged
        // nimber and leaves "4" carrying it.
        node.children[0].set_to_loss();
        node.update(&mut fresh_factory(), &db);
        assert_eq!(node.children.len(), 1);
        assert_eq!(node.children[0].compact().to_string(), "4 0");
    }

    #[test]
    fn test_plain_update_rules() {
        let db = NimberDatabase::<Rows>::new(false);
        let mut node = PnsNode::new(&couple("4 0"));
        node.expand(&mut fresh_factory(), &db);
        assert!(!node.is_proved());
        let before = node.children.len();
        assert!(before > 1);

        // A won child is dropped.
        node.children[0].set_to_win();
        node.update(&mut fresh_factory(), &db);
        assert_eq!(node.children.len(), before - 1);

        // A lost child proves the parent.
        node.children[0].set_to_loss();
        node.update(&mut fresh_factory(), &db);
        assert!(node.info.pns.is_win());
    }

    #[test]
    fn test_proof_number_sums() {
        let children = [
            ChildSnapshot {
                pns: ProofNumbers::new(PnValue::new(2), PnValue::new(3)),
                locked: false,
                workers: 0,
            },
            ChildSnapshot {
                pns: ProofNumbers::new(PnValue::new(5), PnValue::new(1)),
                locked: false,
                workers: 0,
            },
        ];
        let mut info = NodeInfo::new(ProofNumbers::unity());
        update_proof_numbers(&mut info, false, &children);
        // plain: proof = min of child disproofs, disproof = sum of proofs
        assert_eq!(info.pns.proof, PnValue::new(1));
        assert_eq!(info.pns.disproof, PnValue::new(7));

        let mut info = NodeInfo::new(ProofNumbers::unity());
        update_proof_numbers(&mut info, true, &children);
        // lands: sum of min(proof, disproof), symmetric
        assert_eq!(info.pns.proof, PnValue::new(3));
        assert_eq!(info.pns.disproof, PnValue::new(3));
    }

    #[test]
    fn test_select_mpn_skips_locked() {
        let children = [
            ChildSnapshot {
                pns: ProofNumbers::new(PnValue::new(1), PnValue::new(1)),
                locked: true,
                workers: 0,
            },
            ChildSnapshot {
                pns: ProofNumbers::new(PnValue::new(1), PnValue::new(9)),
                locked: false,
                workers: 0,
            },
            ChildSnapshot {
                pns: ProofNumbers::new(PnValue::new(1), PnValue::new(4)),
                locked: false,
                workers: 0,
            },
        ];
        let (mpn, mpn2) = select_mpn(false, &children, None, true);
        assert_eq!(mpn, 2);
        assert_eq!(mpn2, Some(1));
    }

    #[test]
    fn test_contention_penalty() {
        let busy = ChildSnapshot {
            pns: ProofNumbers::new(PnValue::new(1), PnValue::new(2)),
            locked: false,
            workers: 3,
        };
        assert_eq!(child_complexity(false, &busy), PnValue::new(5));
        assert_eq!(child_complexity(true, &busy), PnValue::new(4));
    }
}
