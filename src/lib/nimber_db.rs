//! The database of proven nimbers: positions whose Grundy value is
//! known. Solvers fold database hits into couples, shortening every
//! later search by subgame decomposition.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use parking_lot::RwLock;

use crate::error::Error;
use crate::game::Game;
use crate::nimber::Nimber;

const IMPARTIAL_HEADER: &str = "[Positions+Nimber]";
const MISERE_HEADER: &str = "[WinLoss_Misere:Losing_Position]";

struct Inner<G: Game> {
    data: HashMap<G::Compact, Nimber>,
    tracked: HashMap<G::Compact, Nimber>,
    track_new: bool,
}

/// Thread-safe map from position to proven nimber, with an optional
/// mirror of fresh inserts for replication to peers.
pub struct NimberDatabase<G: Game> {
    inner: RwLock<Inner<G>>,
}

impl<G: Game> NimberDatabase<G> {
    pub fn new(track_new: bool) -> Self {
        NimberDatabase {
            inner: RwLock::new(Inner {
                data: HashMap::new(),
                tracked: HashMap::new(),
                track_new,
            }),
        }
    }

    pub fn from_file(path: &Path, track_new: bool) -> Result<Self, Error> {
        let db = Self::new(track_new);
        db.load(path)?;
        Ok(db)
    }

    pub fn len(&self) -> usize {
        self.inner.read().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.data.clear();
        inner.tracked.clear();
    }

    pub fn clear_tracked(&self) {
        self.inner.write().tracked.clear();
    }

    pub fn set_track_new(&self, track_new: bool) {
        self.inner.write().track_new = track_new;
    }

    pub fn insert(&self, compact: G::Compact, nimber: Nimber) {
        let mut inner = self.inner.write();
        if inner.track_new {
            inner.tracked.insert(compact.clone(), nimber);
        }
        inner.data.insert(compact, nimber);
    }

    pub fn insert_position(&self, position: &G, nimber: Nimber) {
        self.insert(position.to_compact(), nimber);
    }

    pub fn get(&self, compact: &G::Compact) -> Option<Nimber> {
        self.inner.read().data.get(compact).copied()
    }

    pub fn get_position(&self, position: &G) -> Option<Nimber> {
        self.get(&position.to_compact())
    }

    /// Bulk insert that never overwrites; returns how many entries were
    /// actually new. Additions are not mirrored into the tracked set.
    pub fn add_nimbers(&self, nimbers: HashMap<G::Compact, Nimber>) -> usize {
        let mut inner = self.inner.write();
        let mut inserted = 0;
        for (compact, nimber) in nimbers {
            if let Entry::Vacant(slot) = inner.data.entry(compact) {
                slot.insert(nimber);
                inserted += 1;
            }
        }
        inserted
    }

    pub fn tracked_nimbers(&self, clear: bool) -> HashMap<G::Compact, Nimber> {
        let mut inner = self.inner.write();
        if clear {
            std::mem::take(&mut inner.tracked)
        } else {
            inner.tracked.clone()
        }
    }

    pub fn snapshot(&self) -> HashMap<G::Compact, Nimber> {
        self.inner.read().data.clone()
    }

    pub fn store(&self, path: &Path, sort: bool) -> Result<(), Error> {
        let io_err = |source| Error::DbIo {
            path: path.to_owned(),
            source,
        };
        let file = File::create(path).map_err(io_err)?;
        let mut out = BufWriter::new(file);
        let header = if G::NORMAL_IMPARTIAL {
            IMPARTIAL_HEADER
        } else {
            MISERE_HEADER
        };
        writeln!(out, "{}", header).map_err(io_err)?;

        let inner = self.inner.read();
        let mut lines: Vec<String> = inner
            .data
            .iter()
            .map(|(compact, nimber)| {
                if G::NORMAL_IMPARTIAL {
                    format!("{} {}", compact, nimber)
                } else {
                    compact.to_string()
                }
            })
            .collect();
        if sort {
            lines.sort_unstable();
        }
        for line in lines {
            writeln!(out, "{}", line).map_err(io_err)?;
        }
        out.flush().map_err(io_err)
    }

    /// Loads new entries from a file, deduplicating against the current
    /// contents. Malformed lines are logged and skipped; the count of
    /// actually-new entries is returned.
    pub fn load(&self, path: &Path) -> Result<usize, Error> {
        let io_err = |source| Error::DbIo {
            path: path.to_owned(),
            source,
        };
        let file = File::open(path).map_err(io_err)?;
        let mut inserted = 0;
        let mut inner = self.inner.write();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(io_err)?;
            if line.is_empty() || line == IMPARTIAL_HEADER || line == MISERE_HEADER {
                continue;
            }
            match Self::parse_line(&line) {
                Ok((compact, nimber)) => {
                    if let Entry::Vacant(slot) = inner.data.entry(compact) {
                        slot.insert(nimber);
                        inserted += 1;
                    }
                }
                Err(err) => {
                    eprintln!("invalid line in the nimber database: {:?}: {}", line, err);
                }
            }
        }
        Ok(inserted)
    }

    fn parse_line(line: &str) -> Result<(G::Compact, Nimber), Error> {
        let (position, nimber) = if G::NORMAL_IMPARTIAL {
            line.split_once(' ')
                .ok_or_else(|| Error::InvalidCouple(line.to_owned()))?
        } else {
            (line, "0")
        };
        Ok((position.parse()?, nimber.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::rows::Rows;

    fn compact(s: &str) -> <Rows as Game>::Compact {
        s.parse().unwrap()
    }

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("nimlands-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_insert_get() {
        let db = NimberDatabase::<Rows>::new(false);
        assert!(db.get(&compact("3")).is_none());
        db.insert(compact("3"), Nimber::new(3));
        assert_eq!(db.get(&compact("3")), Some(Nimber::new(3)));
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_tracking() {
        let db = NimberDatabase::<Rows>::new(true);
        db.insert(compact("3"), Nimber::new(3));
        db.insert(compact("4"), Nimber::new(1));
        let tracked = db.tracked_nimbers(true);
        assert_eq!(tracked.len(), 2);
        assert!(db.tracked_nimbers(false).is_empty());
        // add_nimbers does not feed the tracked mirror
        let mut more = HashMap::new();
        more.insert(compact("5"), Nimber::new(4));
        assert_eq!(db.add_nimbers(more), 1);
        assert!(db.tracked_nimbers(false).is_empty());
    }

    #[test]
    fn test_add_nimbers_deduplicates() {
        let db = NimberDatabase::<Rows>::new(false);
        db.insert(compact("3"), Nimber::new(3));
        let mut batch = HashMap::new();
        batch.insert(compact("3"), Nimber::new(7));
        batch.insert(compact("4"), Nimber::new(1));
        assert_eq!(db.add_nimbers(batch), 1);
        // the existing entry was not overwritten
        assert_eq!(db.get(&compact("3")), Some(Nimber::new(3)));
    }

    #[test]
    fn test_store_load_roundtrip() {
        let path = temp_path("roundtrip.spr");
        let db = NimberDatabase::<Rows>::new(false);
        db.insert(compact("3"), Nimber::new(3));
        db.insert(compact("4"), Nimber::new(1));
        db.insert(compact("2+1"), Nimber::new(3));
        db.store(&path, true).unwrap();

        let loaded = NimberDatabase::<Rows>::from_file(&path, false).unwrap();
        assert_eq!(loaded.snapshot(), db.snapshot());
        // loading again inserts nothing new
        assert_eq!(loaded.load(&path).unwrap(), 0);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_load_skips_malformed_lines() {
        let path = temp_path("malformed.spr");
        std::fs::write(
            &path,
            "[Positions+Nimber]\n3 3\n\nnot a line\n4 nope\n5 4\n",
        )
        .unwrap();
        let db = NimberDatabase::<Rows>::new(false);
        assert_eq!(db.load(&path).unwrap(), 2);
        assert_eq!(db.get(&compact("3")), Some(Nimber::new(3)));
        assert_eq!(db.get(&compact("5")), Some(Nimber::new(4)));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let db = NimberDatabase::<Rows>::new(false);
        assert!(db.load(Path::new("/nonexistent/nimlands.spr")).is_err());
    }
}
