//! The wire surface between the master tree and remote workers. The
//! transport is left to the caller; these types serialize to JSON lines.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::couple::Couple;
use crate::error::Error;
use crate::game::Game;
use crate::nimber::Nimber;
use crate::prove::node::ExpansionInfo;
use crate::prove::{PnValue, ProofNumbers};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JobAssignment {
    pub couple: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChildEntry {
    pub couple: String,
    pub proof: u64,
    pub disproof: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CompletedJob {
    pub parent: String,
    pub proof: u64,
    pub disproof: u64,
    pub merged_nimber: u8,
    pub children: Vec<ChildEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ComputedNimbers {
    pub nimbers: HashMap<String, u8>,
}

impl JobAssignment {
    pub fn new<G: Game>(couple: &Couple<G>) -> Self {
        JobAssignment {
            couple: couple.to_compact().to_string(),
        }
    }

    pub fn couple<G: Game>(&self) -> Result<Couple<G>, Error> {
        Couple::parse(&self.couple)
    }
}

impl CompletedJob {
    pub fn from_info<G: Game>(info: &ExpansionInfo<G>) -> Self {
        CompletedJob {
            parent: info.parent.to_string(),
            proof: info.pns.proof.get(),
            disproof: info.pns.disproof.get(),
            merged_nimber: info.merged_nimber.value(),
            children: info
                .children
                .iter()
                .map(|(compact, pns)| ChildEntry {
                    couple: compact.to_string(),
                    proof: pns.proof.get(),
                    disproof: pns.disproof.get(),
                })
                .collect(),
        }
    }

    pub fn into_info<G: Game>(&self) -> Result<ExpansionInfo<G>, Error> {
        let mut children = Vec::with_capacity(self.children.len());
        for child in &self.children {
            children.push((
                child.couple.parse()?,
                ProofNumbers::new(PnValue::new(child.proof), PnValue::new(child.disproof)),
            ));
        }
        Ok(ExpansionInfo {
            parent: self.parent.parse()?,
            pns: ProofNumbers::new(PnValue::new(self.proof), PnValue::new(self.disproof)),
            merged_nimber: Nimber::new(self.merged_nimber),
            children,
        })
    }
}

impl ComputedNimbers {
    pub fn from_map<G: Game>(nimbers: &HashMap<G::Compact, Nimber>) -> Self {
        ComputedNimbers {
            nimbers: nimbers
                .iter()
                .map(|(compact, nimber)| (compact.to_string(), nimber.value()))
                .collect(),
        }
    }

    pub fn into_map<G: Game>(&self) -> Result<HashMap<G::Compact, Nimber>, Error> {
        let mut map = HashMap::with_capacity(self.nimbers.len());
        for (compact, &nimber) in &self.nimbers {
            map.insert(compact.parse()?, Nimber::new(nimber));
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rows::Rows;
    use crate::nimber_db::NimberDatabase;
    use crate::prove::node::PnsNode;

    #[test]
    fn test_completed_job_roundtrip() {
        let db = NimberDatabase::<Rows>::new(false);
        let couple = Couple::<Rows>::parse("4 0").unwrap();
        let mut node = PnsNode::new(&couple);
        node.expand(&mut |c: &Couple<Rows>| PnsNode::new(c), &db);
        let info = node.expansion_info();

        let job = CompletedJob::from_info(&info);
        let json = serde_json::to_string(&job).unwrap();
        let parsed: CompletedJob = serde_json::from_str(&json).unwrap();
        let back: ExpansionInfo<Rows> = parsed.into_info().unwrap();

        assert_eq!(back.parent, info.parent);
        assert_eq!(back.pns, info.pns);
        assert_eq!(back.merged_nimber, info.merged_nimber);
        assert_eq!(back.children.len(), info.children.len());
        for (a, b) in back.children.iter().zip(info.children.iter()) {
            assert_eq!(a.0, b.0);
            assert_eq!(a.1, b.1);
        }
    }

    #[test]
    fn test_infinity_survives_the_wire() {
        let info = ExpansionInfo::<Rows> {
            parent: "3 0".parse().unwrap(),
            pns: ProofNumbers::winning(),
            merged_nimber: Nimber::new(0),
            children: Vec::new(),
        };
        let job = CompletedJob::from_info(&info);
        let back: ExpansionInfo<Rows> = job.into_info().unwrap();
        assert!(back.pns.is_win());
        assert!(back.pns.disproof.is_inf());
    }

    #[test]
    fn test_job_assignment() {
        let couple = Couple::<Rows>::parse("5+2 1").unwrap();
        let job = JobAssignment::new(&couple);
        assert_eq!(job.couple, "5+2 1");
        assert_eq!(job.couple::<Rows>().unwrap(), couple);
    }

    #[test]
    fn test_computed_nimbers_roundtrip() {
        let mut map: HashMap<<Rows as Game>::Compact, Nimber> = HashMap::new();
        map.insert("3".parse().unwrap(), Nimber::new(3));
        map.insert("5".parse().unwrap(), Nimber::new(4));
        let wire = ComputedNimbers::from_map::<Rows>(&map);
        assert_eq!(wire.into_map::<Rows>().unwrap(), map);
    }
}
