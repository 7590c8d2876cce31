//! The DAG of proof-number nodes used by best-first PNS, the sync tree
//! of the parallel df-pn, and the master tree of distributed search.
//! Nodes live in an arena and are addressed by `NodeId`; child edges and
//! parent back-links are id lists, so transpositions share one node per
//! (position, nimber) and every path to the root can be re-updated.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::rngs::StdRng;

use crate::couple::{Couple, CoupleCompact};
use crate::game::{Game, Outcome};
use crate::heuristics::{self, SharedEstimator};
use crate::nimber::Nimber;
use crate::nimber_db::NimberDatabase;
use crate::pns_db::{PnsDatabase, StoredInfo};
use crate::prove::node::{
    self, ChildSnapshot, ExpansionInfo, NodeInfo, NodeState,
};
use crate::prove::{PnValue, ProofNumbers};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u32);

struct TreeNode<G: Game> {
    state: NodeState<G>,
    info: NodeInfo,
    children: Vec<NodeId>,
    parents: Vec<NodeId>,
    flag: bool,
}

pub struct PnsTree<G: Game> {
    slots: Vec<Option<TreeNode<G>>>,
    free: Vec<NodeId>,
    index: HashMap<G::Compact, HashMap<Nimber, NodeId>>,
    root: Option<NodeId>,
    estimator: SharedEstimator<G>,
    len: usize,
}

impl<G: Game> PnsTree<G> {
    pub fn new(estimator: SharedEstimator<G>) -> Self {
        PnsTree {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            root: None,
            estimator,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.root = None;
        self.len = 0;
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn is_proved(&self) -> bool {
        self.root
            .map_or(false, |root| self.node(root).info.pns.is_proved())
    }

    pub fn set_root(&mut self, couple: &Couple<G>) {
        self.root = Some(self.get_or_create(couple, ProofNumbers::unity(), 0));
    }

    fn node(&self, id: NodeId) -> &TreeNode<G> {
        self.slots[id.0 as usize].as_ref().expect("stale node id")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut TreeNode<G> {
        self.slots[id.0 as usize].as_mut().expect("stale node id")
    }

    pub fn info(&self, id: NodeId) -> &NodeInfo {
        &self.node(id).info
    }

    pub fn state(&self, id: NodeId) -> &NodeState<G> {
        &self.node(id).state
    }

    pub fn compact(&self, id: NodeId) -> &CoupleCompact<G> {
        &self.node(id).state.compact
    }

    pub fn parents(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).parents
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.node(id).children
    }

    pub fn children_len(&self, id: NodeId) -> usize {
        self.node(id).children.len()
    }

    pub fn child_of(&self, id: NodeId, idx: usize) -> NodeId {
        self.node(id).children[idx]
    }

    pub fn get_node(&self, compact: &CoupleCompact<G>) -> Option<NodeId> {
        self.index
            .get(&compact.position)
            .and_then(|per_nimber| per_nimber.get(&compact.nimber))
            .copied()
    }

    /// All nodes carrying the given position, at any nimber.
    pub fn nodes_for_position(&self, position: &G::Compact) -> Vec<NodeId> {
        self.index
            .get(position)
            .map(|per_nimber| per_nimber.values().copied().collect())
            .unwrap_or_default()
    }

    pub fn locked_nodes(&self) -> usize {
        self.index
            .values()
            .flat_map(|per_nimber| per_nimber.values())
            .filter(|&&id| self.node(id).info.locked)
            .count()
    }

    fn alloc(&mut self, node: TreeNode<G>) -> NodeId {
        self.len += 1;
        match self.free.pop() {
            Some(id) => {
                self.slots[id.0 as usize] = Some(node);
                id
            }
            None => {
                let id = NodeId(self.slots.len() as u32);
                self.slots.push(Some(node));
                id
            }
        }
    }

    /// Inserts a node for the couple unless one already exists.
    fn get_or_create(&mut self, couple: &Couple<G>, pns: ProofNumbers, iterations: u64) -> NodeId {
        let compact = couple.to_compact();
        if let Some(id) = self.get_node(&compact) {
            return id;
        }
        let state = NodeState::new(couple);
        let mut info = NodeInfo::new(pns);
        info.iterations = iterations;
        let id = self.alloc(TreeNode {
            state,
            info,
            children: Vec::new(),
            parents: Vec::new(),
            flag: false,
        });
        self.index
            .entry(compact.position)
            .or_default()
            .insert(compact.nimber, id);
        id
    }

    /// The child factory of the tree: resolves the couple to its canonical
    /// node (estimating proof numbers when it is new) and records the
    /// parent back-link.
    fn make_child(&mut self, parent: NodeId, couple: &Couple<G>) -> NodeId {
        let id = match self.get_node(&couple.to_compact()) {
            Some(id) => id,
            None => {
                let pns = self.estimator.estimate(couple);
                self.get_or_create(couple, pns, 0)
            }
        };
        self.node_mut(id).parents.push(parent);
        id
    }

    fn unlink_child(&mut self, parent: NodeId, child: NodeId) {
        let parents = &mut self.node_mut(child).parents;
        if let Some(pos) = parents.iter().position(|&p| p == parent) {
            parents.remove(pos);
        }
    }

    /// Collapses the node back to un-expanded, severing child links.
    pub fn close(&mut self, id: NodeId) {
        let children = std::mem::take(&mut self.node_mut(id).children);
        for child in children {
            self.unlink_child(id, child);
        }
        let node = self.node_mut(id);
        node.info.expanded = false;
        node.info.merged_nimber = Nimber::new(0);
    }

    pub fn set_to_win(&mut self, id: NodeId) {
        self.close(id);
        let node = self.node_mut(id);
        node.info.locked = false;
        node.info.pns = ProofNumbers::winning();
    }

    pub fn set_to_loss(&mut self, id: NodeId) {
        self.close(id);
        let node = self.node_mut(id);
        node.info.locked = false;
        node.info.pns = ProofNumbers::losing();
    }

    pub fn set_proof_numbers(&mut self, id: NodeId, pns: ProofNumbers) {
        if pns.is_win() {
            self.set_to_win(id);
        } else if pns.is_loss() {
            self.set_to_loss(id);
        } else {
            self.node_mut(id).info.pns = pns;
        }
    }

    /// Switch the node to the overestimating update rules (max instead
    /// of sum plus a fan-out term).
    pub fn set_overestimated(&mut self, id: NodeId) {
        self.node_mut(id).info.overestimated = true;
    }

    pub fn lock(&mut self, id: NodeId) {
        self.node_mut(id).info.locked = true;
    }

    pub fn unlock(&mut self, id: NodeId) {
        self.node_mut(id).info.locked = false;
    }

    pub fn add_iterations(&mut self, id: NodeId, iterations: u64) {
        self.node_mut(id).info.iterations += iterations;
    }

    pub fn snapshots(&self, id: NodeId) -> Vec<ChildSnapshot> {
        self.node(id)
            .children
            .iter()
            .map(|&child| {
                let node = self.node(child);
                ChildSnapshot {
                    pns: node.info.pns,
                    locked: node.info.locked,
                    workers: 0,
                }
            })
            .collect()
    }

    pub fn mpn_idx(
        &self,
        id: NodeId,
        rng: Option<&mut StdRng>,
        land_switching: bool,
    ) -> (usize, Option<usize>) {
        node::select_mpn(
            self.node(id).state.multi_land,
            &self.snapshots(id),
            rng,
            land_switching,
        )
    }

    pub fn switching_threshold(&self, id: NodeId, mpn_idx: usize, mpn2_idx: usize) -> PnValue {
        node::switching_threshold(
            self.node(id).state.multi_land,
            &self.snapshots(id),
            mpn_idx,
            mpn2_idx,
        )
    }

    /// Walks from the root to the current most-proving leaf. Returns
    /// `None` when the root is missing, proved, or locked.
    pub fn get_mpn(&mut self, mut rng: Option<&mut StdRng>, land_switching: bool) -> Option<NodeId> {
        let root = self.root?;
        if self.node(root).info.pns.is_proved() || self.node(root).info.locked {
            return None;
        }
        let mut mpn = root;
        while self.node(mpn).info.expanded {
            self.node_mut(mpn).info.iterations += 1;
            let (idx, _) = self.mpn_idx(mpn, rng.as_deref_mut(), land_switching);
            mpn = self.node(mpn).children[idx];
        }
        Some(mpn)
    }

    /// Expands a leaf using the nimber database.
    pub fn expand_from_db(&mut self, id: NodeId, db: &NimberDatabase<G>) {
        debug_assert!(!self.node(id).info.expanded);
        self.node_mut(id).info.expanded = true;
        let couple = Couple::from_compact(&self.node(id).state.compact);
        if self.node(id).state.multi_land {
            self.node_mut(id).info.merged_nimber = couple.nimber;
            let mut subgames = couple.position.subgames();
            subgames.sort_by(heuristics::game_order);
            let mut children = Vec::with_capacity(subgames.len());
            for subgame in subgames {
                children.push(self.make_child(id, &Couple::new(subgame, Nimber::new(0))));
            }
            self.node_mut(id).children = children;
        } else {
            let (outcome, couples) = couple.compute_children(db);
            match outcome {
                Outcome::Win => self.set_to_win(id),
                Outcome::Loss => self.set_to_loss(id),
                Outcome::Unknown => {
                    let mut children = Vec::with_capacity(couples.len());
                    for child in &couples {
                        children.push(self.make_child(id, child));
                    }
                    self.node_mut(id).children = children;
                }
            }
        }
    }

    /// Grafts an expansion computed elsewhere onto the leaf.
    pub fn expand_info(&mut self, id: NodeId, info: &ExpansionInfo<G>) {
        if info.pns.is_win() {
            self.set_to_win(id);
        } else if info.pns.is_loss() {
            self.set_to_loss(id);
        } else {
            debug_assert!(!self.node(id).info.expanded);
            let mut children = Vec::with_capacity(info.children.len());
            for (compact, pns) in &info.children {
                let child = match self.get_node(compact) {
                    Some(child) => child,
                    None => self.get_or_create(&Couple::from_compact(compact), *pns, 0),
                };
                self.node_mut(child).parents.push(id);
                children.push(child);
            }
            let node = self.node_mut(id);
            node.info.expanded = true;
            node.info.merged_nimber = info.merged_nimber;
            node.children = children;
        }
    }

    /// Re-derives the node from its children and records a freshly proved
    /// single-land loss in the nimber database.
    pub fn update(&mut self, id: NodeId, db: &NimberDatabase<G>) {
        self.update_node(id, db);
        let node = self.node(id);
        if node.info.pns.is_loss() && !node.state.multi_land {
            db.insert(node.state.compact.position.clone(), node.state.compact.nimber);
        }
    }

    fn update_node(&mut self, id: NodeId, db: &NimberDatabase<G>) {
        if self.node(id).info.pns.is_proved() || !self.node(id).info.expanded {
            return;
        }
        if self.node(id).state.multi_land {
            self.update_lands(id, db);
        } else {
            self.update_plain(id);
        }
        let node = self.node(id);
        if !node.info.pns.is_proved() && node.info.expanded {
            let snapshots = self.snapshots(id);
            let node = self.node_mut(id);
            node::update_proof_numbers(&mut node.info, node.state.multi_land, &snapshots);
        }
    }

    fn update_plain(&mut self, id: NodeId) {
        let mut i = 0;
        loop {
            if i >= self.node(id).children.len() {
                break;
            }
            let child = self.node(id).children[i];
            let pns = self.node(child).info.pns;
            if pns.is_loss() {
                self.set_to_win(id);
                return;
            }
            if pns.is_win() {
                self.node_mut(id).children.remove(i);
                self.unlink_child(id, child);
                continue;
            }
            i += 1;
        }
        if self.node(id).children.is_empty() {
            self.set_to_loss(id);
        }
    }

    fn update_lands(&mut self, id: NodeId, db: &NimberDatabase<G>) {
        if self.node(id).children.len() > 1 {
            let mut i = 0;
            loop {
                if i >= self.node(id).children.len() {
                    break;
                }
                let child = self.node(id).children[i];
                let (compact, pns) = {
                    let node = self.node(child);
                    (node.state.compact.clone(), node.info.pns)
                };

                if let Some(stored) = db.get(&compact.position) {
                    let merged = Nimber::merge(self.node(id).info.merged_nimber, stored);
                    self.node_mut(id).info.merged_nimber = merged;
                    self.node_mut(id).children.remove(i);
                    self.unlink_child(id, child);
                    continue;
                }
                if pns.is_loss() {
                    let merged = Nimber::merge(self.node(id).info.merged_nimber, compact.nimber);
                    self.node_mut(id).info.merged_nimber = merged;
                    self.node_mut(id).children.remove(i);
                    self.unlink_child(id, child);
                    continue;
                }
                if pns.is_win() {
                    self.node_mut(id).children.remove(i);
                    self.unlink_child(id, child);
                    let next = Couple::new(
                        G::from_compact(&compact.position),
                        compact.nimber.succ(),
                    );
                    let replacement = self.make_child(id, &next);
                    self.node_mut(id).children.insert(i, replacement);
                    continue;
                }
                i += 1;
            }
        }

        if self.node(id).children.len() == 1 {
            let child = self.node(id).children[0];
            let merged = self.node(id).info.merged_nimber;
            let compact = self.node(child).state.compact.clone();
            if compact.nimber != merged {
                self.node_mut(id).children.remove(0);
                self.unlink_child(id, child);
                let rebuilt = Couple::new(G::from_compact(&compact.position), merged);
                let replacement = self.make_child(id, &rebuilt);
                self.node_mut(id).children.insert(0, replacement);
            }
            let child = self.node(id).children[0];
            let pns = self.node(child).info.pns;
            if pns.is_win() {
                self.set_to_win(id);
            } else if pns.is_loss() {
                self.set_to_loss(id);
            }
        } else if self.node(id).children.is_empty() {
            if self.node(id).info.merged_nimber.is_win() {
                self.set_to_win(id);
            } else {
                self.set_to_loss(id);
            }
        }
    }

    /// Recomputes every node from the given one toward the root, visiting
    /// deepest nodes first and re-pushing only parents whose info changed.
    pub fn update_paths(&mut self, start: NodeId, db: &NimberDatabase<G>) {
        let mut pending: HashSet<CoupleCompact<G>> = HashSet::new();
        let mut heap: BinaryHeap<(Reverse<(u32, u8)>, NodeId)> = BinaryHeap::new();

        pending.insert(self.node(start).state.compact.clone());
        heap.push(self.heap_entry(start));

        while let Some((_, id)) = heap.pop() {
            pending.remove(&self.node(id).state.compact);
            let previous = self.node(id).info.clone();
            self.update(id, db);
            if self.node(id).info.has_updated(&previous) || id == start {
                let parents = self.node(id).parents.clone();
                for parent in parents {
                    if pending.insert(self.node(parent).state.compact.clone()) {
                        heap.push(self.heap_entry(parent));
                    }
                }
            }
        }
    }

    fn heap_entry(&self, id: NodeId) -> (Reverse<(u32, u8)>, NodeId) {
        let state = &self.node(id).state;
        (Reverse((state.lives, state.compact.nimber.value())), id)
    }

    /// Mark-and-sweep from the root along child edges; drops everything
    /// unreachable and returns how many nodes were removed.
    pub fn prune_unreachable(&mut self) -> usize {
        let Some(root) = self.root else {
            return 0;
        };

        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if self.node(id).flag {
                continue;
            }
            self.node_mut(id).flag = true;
            let children = self.node(id).children.clone();
            for child in children {
                if !self.node(child).flag {
                    stack.push(child);
                }
            }
        }

        let mut doomed = Vec::new();
        for (i, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                Some(node) if !node.flag => doomed.push(NodeId(i as u32)),
                Some(node) => node.flag = false,
                None => {}
            }
        }

        for &id in &doomed {
            let node = self.slots[id.0 as usize].take().expect("doomed node");
            for child in &node.children {
                if let Some(child_node) = self.slots[child.0 as usize].as_mut() {
                    if let Some(pos) = child_node.parents.iter().position(|&p| p == id) {
                        child_node.parents.remove(pos);
                    }
                }
            }
            let compact = &node.state.compact;
            if let Some(per_nimber) = self.index.get_mut(&compact.position) {
                per_nimber.remove(&compact.nimber);
                if per_nimber.is_empty() {
                    self.index.remove(&compact.position);
                }
            }
            self.free.push(id);
            self.len -= 1;
        }
        doomed.len()
    }

    /// Copies every proved or expanded node into a transposition table,
    /// the handoff used when workers take over parts of the tree.
    pub fn update_pns_database<V: StoredInfo>(&self, pns_db: &PnsDatabase<G, V>) {
        for (position, per_nimber) in &self.index {
            for (&nimber, &id) in per_nimber {
                let node = self.node(id);
                if node.info.pns.is_proved() || node.info.expanded {
                    pns_db.insert(
                        CoupleCompact {
                            position: position.clone(),
                            nimber,
                        },
                        V::new(node.info.pns, node.info.iterations),
                    );
                }
            }
        }
    }

    pub fn expansion_info(&self, id: NodeId) -> ExpansionInfo<G> {
        let node = self.node(id);
        ExpansionInfo {
            parent: node.state.compact.clone(),
            pns: node.info.pns,
            merged_nimber: node.info.merged_nimber,
            children: node
                .children
                .iter()
                .map(|&child| {
                    let child = self.node(child);
                    (child.state.compact.clone(), child.info.pns)
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rows::Rows;
    use crate::heuristics::default_estimator;

    fn couple(s: &str) -> Couple<Rows> {
        Couple::parse(s).unwrap()
    }

    fn tree_with_root(s: &str) -> PnsTree<Rows> {
        let mut tree = PnsTree::new(default_estimator());
        tree.set_root(&couple(s));
        tree
    }

    /// Every back-link must match exactly the number of child edges
    /// pointing at the node.
    fn check_dag_integrity(tree: &PnsTree<Rows>) {
        for per_nimber in tree.index.values() {
            for &id in per_nimber.values() {
                let node = tree.node(id);
                for &parent in &node.parents {
                    let edges = tree
                        .node(parent)
                        .children
                        .iter()
                        .filter(|&&c| c == id)
                        .count();
                    let links = node.parents.iter().filter(|&&p| p == parent).count();
                    assert_eq!(edges, links, "asymmetric link {:?} -> {:?}", parent, id);
                }
            }
        }
    }

    #[test]
    fn test_nodes_are_unique_per_couple() {
        let mut tree = tree_with_root("4 0");
        let root = tree.root().unwrap();
        let again = tree.get_or_create(&couple("4 0"), ProofNumbers::unity(), 0);
        assert_eq!(root, again);
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn test_expand_links_parents() {
        let db = NimberDatabase::<Rows>::new(false);
        let mut tree = tree_with_root("4 0");
        let root = tree.root().unwrap();
        tree.expand_from_db(root, &db);
        assert!(tree.info(root).expanded);
        assert!(tree.children_len(root) > 0);
        for &child in tree.children(root) {
            assert!(tree.parents(child).contains(&root));
        }
        check_dag_integrity(&tree);
    }

    #[test]
    fn test_transpositions_share_nodes() {
        let db = NimberDatabase::<Rows>::new(false);
        // "2+2 0" and "3 0" both reach "2+1 0"; expanding both parents
        // must reuse the shared child node.
        let mut tree = tree_with_root("4 0");
        let root = tree.root().unwrap();
        tree.expand_from_db(root, &db);
        let before = tree.len();
        for &child in tree.children(root).to_vec().iter() {
            if !tree.info(child).expanded && !tree.info(child).pns.is_proved() {
                tree.expand_from_db(child, &db);
            }
        }
        check_dag_integrity(&tree);
        assert!(tree.len() > before);
    }

    #[test]
    fn test_update_paths_propagates_to_root() {
        let db = NimberDatabase::<Rows>::new(false);
        let mut tree = tree_with_root("1 0");
        let root = tree.root().unwrap();
        // "1 0" collapses to a win on expansion (its reply is a loss).
        tree.expand_from_db(root, &db);
        tree.update_paths(root, &db);
        assert!(tree.is_proved());
        assert!(tree.info(root).pns.is_win());
    }

    #[test]
    fn test_update_records_loss_in_db() {
        let db = NimberDatabase::<Rows>::new(false);
        let mut tree = tree_with_root("1 1");
        let root = tree.root().unwrap();
        tree.expand_from_db(root, &db);
        // children: nim child "1 0" (a win for the mover) and position
        // child "0 1" is terminal-win so dropped; child list = ["1 0"].
        let child = tree.children(root)[0];
        tree.expand_from_db(child, &db);
        tree.update_paths(child, &db);
        // "1 0" is a win, so it is dropped from the root's children and
        // the root "1 1" becomes a loss, recorded in the nimber DB.
        assert!(tree.info(root).pns.is_loss());
        assert_eq!(db.get(&"1".parse().unwrap()), Some(Nimber::new(1)));
    }

    #[test]
    fn test_prune_unreachable() {
        let db = NimberDatabase::<Rows>::new(false);
        let mut tree = tree_with_root("4 0");
        let root = tree.root().unwrap();
        tree.expand_from_db(root, &db);
        let child = tree.children(root)[0];
        tree.expand_from_db(child, &db);
        let total = tree.len();

        // Closing the root makes everything below unreachable.
        tree.close(root);
        let pruned = tree.prune_unreachable();
        assert_eq!(tree.len(), 1);
        assert_eq!(pruned, total - 1);
        assert!(tree.get_node(&couple("4 0").to_compact()).is_some());
        // Pruning again removes nothing.
        assert_eq!(tree.prune_unreachable(), 0);
        check_dag_integrity(&tree);
    }

    #[test]
    fn test_graft_expansion_info() {
        let db = NimberDatabase::<Rows>::new(false);
        let mut donor_tree = tree_with_root("4 0");
        let donor_root = donor_tree.root().unwrap();
        donor_tree.expand_from_db(donor_root, &db);
        let info = donor_tree.expansion_info(donor_root);

        let mut tree = tree_with_root("4 0");
        let root = tree.root().unwrap();
        tree.expand_info(root, &info);
        assert!(tree.info(root).expanded);
        assert_eq!(tree.children_len(root), info.children.len());
        check_dag_integrity(&tree);
    }

    #[test]
    fn test_update_pns_database_exports_expanded() {
        use crate::prove::dfpn::StoredNodeInfo;
        let db = NimberDatabase::<Rows>::new(false);
        let mut tree = tree_with_root("4 0");
        let root = tree.root().unwrap();
        tree.expand_from_db(root, &db);
        tree.update_paths(root, &db);

        let pns_db: PnsDatabase<Rows, StoredNodeInfo> = PnsDatabase::with_capacity(1 << 10);
        tree.update_pns_database(&pns_db);
        assert!(pns_db.find(&couple("4 0").to_compact()).is_some());
        // unexpanded leaves are not exported
        let leaf = tree.children(root)[0];
        assert!(pns_db.find(tree.compact(leaf)).is_none());
    }
}
