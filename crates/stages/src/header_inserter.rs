use crate::{DatabaseIntegrityError, StageError};
use hearth_db::{rawdb, DbTx, DbTxMut};
use hearth_primitives::{BlockNumber, SealedHeader, B256, U256};

/// Single-pass header inserter, created per stage invocation.
///
/// Appends headers one by one to the header tables, tracks the highest
/// header seen and whether the best chain changed, and computes the point at
/// which a competing chain forks off the canonical one. It never touches the
/// canonical-hash index itself; canonical fixup is a separate step.
#[derive(Debug)]
pub struct HeaderInserter {
    /// The stage progress at construction; an unwind is armed when a better
    /// chain forks below it.
    stage_progress: BlockNumber,
    /// The total difficulty of the local best chain.
    local_td: U256,
    highest: BlockNumber,
    highest_hash: B256,
    highest_timestamp: u64,
    unwind_point: Option<BlockNumber>,
    best_header_changed: bool,
}

impl HeaderInserter {
    /// Creates an inserter starting from the given stage progress.
    pub fn new(stage_progress: BlockNumber) -> Self {
        Self {
            stage_progress,
            local_td: U256::ZERO,
            highest: 0,
            highest_hash: B256::ZERO,
            highest_timestamp: 0,
            unwind_point: None,
            best_header_changed: false,
        }
    }

    /// Sets the total difficulty of the local chain tip, required for the
    /// PoW feed.
    pub fn with_local_td(mut self, local_td: U256) -> Self {
        self.local_td = local_td;
        self
    }

    /// Appends one PoS header.
    ///
    /// Writes the header and its hash-to-number index entry. A total
    /// difficulty row is carried over from the parent when the parent has
    /// one; PoS headers add no weight of their own.
    pub fn feed_header_pos<Tx: DbTx + DbTxMut>(
        &mut self,
        tx: &Tx,
        header: &SealedHeader,
    ) -> Result<(), StageError> {
        rawdb::write_header(tx, header)?;
        if let Some(parent_td) =
            rawdb::read_td(tx, header.parent_hash, header.number.saturating_sub(1))?
        {
            rawdb::write_td(tx, header.hash(), header.number, parent_td + header.difficulty)?;
        }
        self.update_highest(header);
        self.best_header_changed = true;
        Ok(())
    }

    /// Appends one PoW header, accounting its difficulty.
    ///
    /// The header becomes the new best when its cumulative difficulty exceeds
    /// the local chain's; if the new best forks below the stage progress, an
    /// unwind to the forking point is armed.
    pub fn feed_header_pow<Tx: DbTx + DbTxMut>(
        &mut self,
        tx: &Tx,
        header: &SealedHeader,
    ) -> Result<(), StageError> {
        let parent_number = header.number.saturating_sub(1);
        let parent_td =
            rawdb::read_td(tx, header.parent_hash, parent_number)?.ok_or_else(|| {
                DatabaseIntegrityError::TotalDifficulty {
                    number: parent_number,
                    hash: header.parent_hash,
                }
            })?;
        let td = parent_td + header.difficulty;

        rawdb::write_header(tx, header)?;
        rawdb::write_td(tx, header.hash(), header.number, td)?;

        if td > self.local_td {
            self.local_td = td;
            self.best_header_changed = true;
            self.update_highest(header);

            let forking_point = self.forking_point(tx, header)?;
            if forking_point < self.stage_progress {
                self.unwind_point = Some(
                    self.unwind_point.map_or(forking_point, |point| point.min(forking_point)),
                );
            }
        }
        Ok(())
    }

    /// Walks the ancestors of `header` until a hash matches the canonical
    /// chain at that height, returning the matching height.
    pub fn forking_point<Tx: DbTx>(
        &self,
        tx: &Tx,
        header: &SealedHeader,
    ) -> Result<BlockNumber, StageError> {
        if header.number == 0 {
            return Ok(0)
        }
        let mut ancestor_hash = header.parent_hash;
        let mut ancestor_height = header.number - 1;
        loop {
            if rawdb::read_canonical_hash(tx, ancestor_height)? == Some(ancestor_hash) {
                return Ok(ancestor_height)
            }
            if ancestor_height == 0 {
                return Ok(0)
            }
            let ancestor = rawdb::read_header(tx, ancestor_hash, ancestor_height)?.ok_or(
                DatabaseIntegrityError::Header { number: ancestor_height, hash: ancestor_hash },
            )?;
            ancestor_hash = ancestor.parent_hash;
            ancestor_height -= 1;
        }
    }

    fn update_highest(&mut self, header: &SealedHeader) {
        if header.number > self.highest {
            self.highest = header.number;
            self.highest_hash = header.hash();
            self.highest_timestamp = header.timestamp;
        }
    }

    /// Whether the best known header changed during this pass.
    pub fn best_header_changed(&self) -> bool {
        self.best_header_changed
    }

    /// Whether an unwind is required before the new best chain can apply.
    pub fn unwind(&self) -> bool {
        self.unwind_point.is_some()
    }

    /// The height to unwind to.
    pub fn unwind_point(&self) -> BlockNumber {
        self.unwind_point.unwrap_or_default()
    }

    /// The highest header number inserted.
    pub fn highest(&self) -> BlockNumber {
        self.highest
    }

    /// The hash of the highest header inserted.
    pub fn highest_hash(&self) -> B256 {
        self.highest_hash
    }

    /// The timestamp of the highest header inserted.
    pub fn highest_timestamp(&self) -> u64 {
        self.highest_timestamp
    }

    /// The cumulative difficulty after this pass.
    pub fn total_difficulty(&self) -> U256 {
        self.local_td
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_db::{Database, MemDb};
    use hearth_interfaces::test_utils::generators::{
        random_header, random_header_range, random_pow_header,
    };

    fn seed_chain(tx: &impl DbTxMut, count: u64) -> Vec<SealedHeader> {
        let headers = random_header_range(0..count + 1, B256::ZERO);
        let mut td = U256::ZERO;
        for header in &headers {
            td += header.difficulty;
            rawdb::write_header(tx, header).unwrap();
            rawdb::write_td(tx, header.hash(), header.number, td).unwrap();
            rawdb::write_canonical_hash(tx, header.number, header.hash()).unwrap();
        }
        headers
    }

    #[test]
    fn pos_feed_tracks_highest() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        let chain = seed_chain(&tx, 5);
        let mut inserter = HeaderInserter::new(5);

        let next = random_header(6, Some(chain[5].hash()));
        inserter.feed_header_pos(&tx, &next).unwrap();
        assert_eq!(inserter.highest(), 6);
        assert_eq!(inserter.highest_hash(), next.hash());
        assert_eq!(inserter.highest_timestamp(), next.timestamp);
        assert!(inserter.best_header_changed());
        assert!(!inserter.unwind());
        assert!(rawdb::read_header(&tx, next.hash(), 6).unwrap().is_some());
    }

    #[test]
    fn pos_feed_without_parent_td_skips_td_row() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        seed_chain(&tx, 5);
        let mut inserter = HeaderInserter::new(5);

        let orphan_side = random_header(4, None);
        inserter.feed_header_pos(&tx, &orphan_side).unwrap();
        assert_eq!(rawdb::read_td(&tx, orphan_side.hash(), 4).unwrap(), None);
    }

    #[test]
    fn forking_point_of_canonical_child_is_parent_height() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        let chain = seed_chain(&tx, 10);
        let inserter = HeaderInserter::new(10);

        let child = random_header(11, Some(chain[10].hash()));
        assert_eq!(inserter.forking_point(&tx, &child).unwrap(), 10);
    }

    #[test]
    fn forking_point_walks_side_chain() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        let chain = seed_chain(&tx, 10);
        let inserter = HeaderInserter::new(10);

        // side chain branching off height 7
        let side = random_header_range(8..11, chain[7].hash());
        for header in &side {
            rawdb::write_header(&tx, header).unwrap();
        }
        let tip = random_header(11, Some(side.last().unwrap().hash()));
        assert_eq!(inserter.forking_point(&tx, &tip).unwrap(), 7);
    }

    #[test]
    fn genesis_forking_point_is_zero() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        let inserter = HeaderInserter::new(0);
        let genesis = random_header(0, None);
        assert_eq!(inserter.forking_point(&tx, &genesis).unwrap(), 0);
    }

    #[test]
    fn heavier_pow_fork_arms_unwind() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        let chain = seed_chain(&tx, 10);
        let local_td = rawdb::read_td(&tx, chain[10].hash(), 10).unwrap().unwrap();
        let mut inserter = HeaderInserter::new(10).with_local_td(local_td);

        // a competing header on top of height 7 with overwhelming difficulty
        let mut heavy = random_pow_header(8, Some(chain[7].hash())).unseal();
        heavy.difficulty = local_td * U256::from(2);
        let heavy = heavy.seal_slow();

        inserter.feed_header_pow(&tx, &heavy).unwrap();
        assert!(inserter.best_header_changed());
        assert!(inserter.unwind());
        assert_eq!(inserter.unwind_point(), 7);
        assert_eq!(inserter.highest(), 8);
    }

    #[test]
    fn lighter_pow_header_is_stored_but_not_best() {
        let db = MemDb::new();
        let tx = db.tx_mut().unwrap();
        let chain = seed_chain(&tx, 10);
        let local_td = rawdb::read_td(&tx, chain[10].hash(), 10).unwrap().unwrap();
        let mut inserter = HeaderInserter::new(10).with_local_td(local_td);

        let mut light = random_pow_header(8, Some(chain[7].hash())).unseal();
        light.difficulty = U256::from(1);
        let light = light.seal_slow();

        inserter.feed_header_pow(&tx, &light).unwrap();
        assert!(!inserter.best_header_changed());
        assert!(!inserter.unwind());
        // stored regardless
        assert!(rawdb::read_header(&tx, light.hash(), 8).unwrap().is_some());
    }
}
