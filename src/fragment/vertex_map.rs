//! Global assignment of original ids to fragments and global ids.
//!
//! Inner local ids of a fragment follow the ascending order of the original
//! ids it owns, so every process that builds a `VertexMap` from the same
//! vertex list and partitioner derives identical gids.

use hashbrown::HashMap;
use itertools::Itertools;

use super::{Fid, Gid, IdParser, Oid};

#[derive(Debug, Clone)]
pub struct VertexMap {
    parser: IdParser,
    oid_to_gid: HashMap<Oid, Gid>,
    inner_oids: Vec<Vec<Oid>>,
}

impl VertexMap {
    /// Assigns each distinct oid to `partitioner(oid)`.
    ///
    /// # Panics
    /// Panics if the partitioner returns a fragment id `>= fnum`.
    pub fn new<I, P>(fnum: usize, oids: I, partitioner: P) -> Self
    where
        I: IntoIterator<Item = Oid>,
        P: Fn(Oid) -> Fid,
    {
        let parser = IdParser::new(fnum);
        let mut inner_oids: Vec<Vec<Oid>> = vec![Vec::new(); fnum];
        for oid in oids.into_iter().sorted_unstable().dedup() {
            let fid = partitioner(oid);
            assert!(fid < fnum, "partitioner returned fid {fid} for {fnum} fragments");
            inner_oids[fid].push(oid);
        }
        let mut oid_to_gid = HashMap::new();
        for (fid, oids) in inner_oids.iter().enumerate() {
            for (lid, &oid) in oids.iter().enumerate() {
                oid_to_gid.insert(oid, parser.gid(fid, lid as u64));
            }
        }
        Self {
            parser,
            oid_to_gid,
            inner_oids,
        }
    }

    /// `oid % fnum` placement.
    pub fn hash_partitioned<I>(fnum: usize, oids: I) -> Self
    where
        I: IntoIterator<Item = Oid>,
    {
        Self::new(fnum, oids, |oid| (oid % fnum as u64) as Fid)
    }

    pub fn fnum(&self) -> usize {
        self.inner_oids.len()
    }

    pub fn parser(&self) -> IdParser {
        self.parser
    }

    pub fn total_vertex_num(&self) -> usize {
        self.oid_to_gid.len()
    }

    pub fn inner_vertex_num(&self, fid: Fid) -> usize {
        self.inner_oids[fid].len()
    }

    /// Original ids owned by `fid`, in local id order.
    pub fn inner_oids(&self, fid: Fid) -> &[Oid] {
        &self.inner_oids[fid]
    }

    pub fn get_gid(&self, oid: Oid) -> Option<Gid> {
        self.oid_to_gid.get(&oid).copied()
    }

    pub fn get_oid(&self, gid: Gid) -> Option<Oid> {
        let fid = self.parser.fid(gid);
        let lid = self.parser.lid(gid) as usize;
        self.inner_oids.get(fid)?.get(lid).copied()
    }

    pub fn get_fragment_id(&self, oid: Oid) -> Option<Fid> {
        self.get_gid(oid).map(|gid| self.parser.fid(gid))
    }
}
