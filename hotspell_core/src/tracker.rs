//! The tracking engine - day-to-day object linking with split and merge
//! detection.
//!
//! Each day's objects are matched against the active track set by pixel
//! overlap. The per-day procedure:
//! 1. Adjacency gate: only tracks that reached yesterday participate.
//! 2. Overlap scoring of every (track, object) pair.
//! 3. Matching per track: one child continues the track, several children
//!    are absorbed as a recorded split.
//! 4. Merge resolution: a child claimed by several tracks keeps the first
//!    claimant; the others are archived on the spot.
//! 5. Birth: unclaimed children seed new tracks.
//! 6. Death: tracks that found no child are archived.
//!
//! The engine is strictly sequential in day order; within a day, scoring is
//! a parallel map with a serial apply pass. Feeding stops at any day
//! boundary: `finish` archives whatever is still active, so a cancelled run
//! yields a valid, truncated archive.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{Config, ConfigError};
use crate::grid::Grid;
use crate::label::{label_day, Blob};
use crate::mask::DayMask;

// ============================================================================
// OVERLAP KERNEL
// ============================================================================

/// Overlap ratio of two cell sets: `|A ∩ B| / min(|A|, |B|)`.
///
/// The `min` denominator deliberately favours matching a small child to a
/// large parent, which keeps fast-growing events attached to their track.
/// Symmetric, in [0, 1], and exactly 1 iff one operand contains the other.
pub fn overlap(a: &Blob, b: &Blob) -> f64 {
    let shared = a.intersection_count(b);
    shared as f64 / a.len().min(b.len()) as f64
}

// ============================================================================
// TRACK
// ============================================================================

/// One tracked event: a day-ordered sequence of objects plus lifecycle
/// metadata. Immutable once archived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    ori_day: u32,
    ori_order: u32,
    days: Vec<u32>,
    objects: Vec<Blob>,
    split_days: Vec<u32>,
    split_num: Vec<u32>,
}

impl Track {
    fn seed(day: u32, order: u32, blob: Blob) -> Self {
        Self {
            ori_day: day,
            ori_order: order,
            days: vec![day],
            objects: vec![blob],
            split_days: Vec::new(),
            split_num: Vec::new(),
        }
    }

    /// Assemble a finished track in one go (volume mode).
    pub(crate) fn from_parts(ori_day: u32, ori_order: u32, days: Vec<u32>, objects: Vec<Blob>) -> Self {
        debug_assert_eq!(days.len(), objects.len());
        debug_assert!(days.windows(2).all(|w| w[0] < w[1]));
        Self {
            ori_day,
            ori_order,
            days,
            objects,
            split_days: Vec::new(),
            split_num: Vec::new(),
        }
    }

    fn push(&mut self, day: u32, blob: Blob) {
        debug_assert!(self.days.last().map_or(true, |&last| day > last));
        self.days.push(day);
        self.objects.push(blob);
    }

    fn record_split(&mut self, day: u32, children: u32) {
        self.split_days.push(day);
        self.split_num.push(children);
    }

    /// First day the track was observed.
    pub fn ori_day(&self) -> u32 {
        self.ori_day
    }

    /// Index of the seeding object within its birth day's object list.
    pub fn ori_order(&self) -> u32 {
        self.ori_order
    }

    /// Days of the track, strictly increasing and gap-free while active.
    pub fn days(&self) -> &[u32] {
        &self.days
    }

    /// Per-day objects, aligned with [`Track::days`]. On a split day the
    /// stored object is the union of all absorbed children.
    pub fn objects(&self) -> &[Blob] {
        &self.objects
    }

    /// Days on which this track split.
    pub fn split_days(&self) -> &[u32] {
        &self.split_days
    }

    /// Child counts for each recorded split, aligned with
    /// [`Track::split_days`].
    pub fn split_num(&self) -> &[u32] {
        &self.split_num
    }

    pub fn last_day(&self) -> u32 {
        *self.days.last().expect("a track always has at least one day")
    }

    pub fn last_object(&self) -> &Blob {
        self.objects.last().expect("a track always has at least one object")
    }

    /// Lifetime in days, inclusive of both ends.
    pub fn duration(&self) -> u32 {
        self.last_day() - self.ori_day + 1
    }

    /// The object attached on a given day, if the track was alive then.
    pub fn object_on(&self, day: u32) -> Option<&Blob> {
        self.days
            .binary_search(&day)
            .ok()
            .map(|idx| &self.objects[idx])
    }
}

// ============================================================================
// TRACK SET
// ============================================================================

/// The finished archive. Archive order is not meaningful; use
/// [`TrackSet::same_tracks`] for order-insensitive comparison.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackSet {
    tracks: Vec<Track>,
}

impl TrackSet {
    pub(crate) fn from_tracks(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    /// Drop every track shorter than `min_days`.
    pub fn apply_cut_off(&mut self, min_days: u32) {
        self.tracks.retain(|t| t.duration() >= min_days);
    }

    /// Equality as a set of tracks, ignoring archive order.
    pub fn same_tracks(&self, other: &TrackSet) -> bool {
        if self.tracks.len() != other.tracks.len() {
            return false;
        }
        let key = |t: &Track| (t.ori_day(), t.ori_order(), t.last_day());
        let mut lhs: Vec<&Track> = self.tracks.iter().collect();
        let mut rhs: Vec<&Track> = other.tracks.iter().collect();
        lhs.sort_by_key(|t| key(t));
        rhs.sort_by_key(|t| key(t));
        lhs.into_iter().zip(rhs).all(|(a, b)| a == b)
    }
}

// ============================================================================
// TRACKER
// ============================================================================

/// The sequential day-linking engine.
///
/// Feed days in strictly increasing order with [`Tracker::advance`], then
/// call [`Tracker::finish`]. Stopping early is always safe: the archive is
/// simply truncated at the last day fed.
#[derive(Debug, Clone)]
pub struct Tracker {
    alpha: f64,
    cut_off: Option<u32>,
    search: Vec<Track>,
    archive: Vec<Track>,
    last_fed: Option<u32>,
}

impl Tracker {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            alpha: config.alpha,
            cut_off: config.cut_off,
            search: Vec::new(),
            archive: Vec::new(),
            last_fed: None,
        })
    }

    /// Number of currently active tracks.
    pub fn active(&self) -> usize {
        self.search.len()
    }

    /// Number of already archived tracks.
    pub fn archived(&self) -> usize {
        self.archive.len()
    }

    /// Ingest one day's objects and update the active and archived sets.
    pub fn advance(&mut self, day: u32, blobs: Vec<Blob>) {
        if let Some(last) = self.last_fed {
            assert!(day > last, "days must be fed in strictly increasing order");
        }
        self.last_fed = Some(day);

        // 1. adjacency gate: tracks that did not reach yesterday are done
        let mut eligible = Vec::with_capacity(self.search.len());
        for track in self.search.drain(..) {
            if track.last_day() + 1 == day {
                eligible.push(track);
            } else {
                self.archive.push(track);
            }
        }

        // 2. overlap scoring, parallel per track
        let alpha = self.alpha;
        let matches: Vec<Vec<usize>> = eligible
            .par_iter()
            .map(|track| {
                let last = track.last_object();
                blobs
                    .iter()
                    .enumerate()
                    .filter(|(_, blob)| overlap(last, blob) >= alpha)
                    .map(|(k, _)| k)
                    .collect()
            })
            .collect();

        // 3. matching per track: continuation or split
        let mut used = vec![0u32; blobs.len()];
        for (track, hit) in eligible.iter_mut().zip(&matches) {
            match hit.as_slice() {
                [] => {}
                [k] => {
                    track.push(day, blobs[*k].clone());
                    used[*k] += 1;
                }
                many => {
                    let parts: Vec<&Blob> = many.iter().map(|&k| &blobs[k]).collect();
                    track.push(day, Blob::union_of(&parts));
                    track.record_split(day, many.len() as u32);
                    for &k in many {
                        used[k] += 1;
                    }
                }
            }
        }

        // 4. merge resolution: a contested child keeps its first claimant,
        //    every other claimant is archived as completed today
        let mut retired = vec![false; eligible.len()];
        for (k, &claims) in used.iter().enumerate() {
            if claims < 2 {
                continue;
            }
            let mut survivor_seen = false;
            for (ti, hit) in matches.iter().enumerate() {
                if hit.contains(&k) {
                    if survivor_seen {
                        retired[ti] = true;
                    } else {
                        survivor_seen = true;
                    }
                }
            }
        }

        // 5 & 6. rebuild the active set, archive the dead and the merged
        let mut next = Vec::with_capacity(eligible.len() + blobs.len());
        for (ti, track) in eligible.into_iter().enumerate() {
            if track.last_day() == day && !retired[ti] {
                next.push(track);
            } else {
                self.archive.push(track);
            }
        }
        for (k, blob) in blobs.into_iter().enumerate() {
            if used[k] == 0 {
                next.push(Track::seed(day, k as u32, blob));
            }
        }
        self.search = next;

        tracing::debug!(
            day,
            active = self.search.len(),
            archived = self.archive.len(),
            "day advanced"
        );
    }

    /// Archive everything still active and return the final set.
    pub fn finish(mut self) -> TrackSet {
        self.archive.append(&mut self.search);
        let mut set = TrackSet::from_tracks(self.archive);
        if let Some(min_days) = self.cut_off {
            set.apply_cut_off(min_days);
        }
        set
    }
}

// ============================================================================
// DRIVERS
// ============================================================================

/// Link pre-labelled days into tracks.
pub fn track_days<I>(days: I, config: &Config) -> Result<TrackSet, ConfigError>
where
    I: IntoIterator<Item = (u32, Vec<Blob>)>,
{
    let mut tracker = Tracker::new(config)?;
    for (day, blobs) in days {
        tracker.advance(day, blobs);
    }
    Ok(tracker.finish())
}

/// Full pipeline: label each day's mask, then link. Masks are borrowed only
/// for the duration of their own labelling pass.
pub fn track_masks<I, M>(grid: &Grid, masks: I, config: &Config) -> Result<TrackSet, ConfigError>
where
    I: IntoIterator<Item = (u32, M)>,
    M: std::borrow::Borrow<DayMask>,
{
    let mut tracker = Tracker::new(config)?;
    for (day, mask) in masks {
        tracker.advance(day, label_day(grid, mask.borrow(), config));
    }
    Ok(tracker.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Cell;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn rect(i0: u32, i1: u32, j0: u32, j1: u32) -> Blob {
        let mut cells = Vec::new();
        for i in i0..=i1 {
            for j in j0..=j1 {
                cells.push(Cell::new(0, i, j));
            }
        }
        Blob::new(cells)
    }

    #[test]
    fn overlap_uses_the_smaller_operand() {
        let parent = rect(0, 9, 0, 9); // 100 cells
        let child = rect(0, 4, 0, 9); // 50 cells, fully inside
        assert_eq!(overlap(&parent, &child), 1.0);
        assert_eq!(overlap(&child, &parent), 1.0);

        let disjoint = rect(20, 24, 0, 9);
        assert_eq!(overlap(&parent, &disjoint), 0.0);
    }

    #[test]
    fn straight_continuation_yields_one_track() {
        let block = rect(99, 108, 39, 48);
        let days = (0..3u32).map(|d| (d, vec![block.clone()]));
        let set = track_days(days, &Config::default()).unwrap();

        assert_eq!(set.len(), 1);
        let track = &set.tracks()[0];
        assert_eq!(track.days(), &[0, 1, 2]);
        assert_eq!(track.ori_day(), 0);
        assert_eq!(track.ori_order(), 0);
        assert!(track.split_days().is_empty());
    }

    #[test]
    fn split_is_recorded_and_children_stay_absorbed() {
        // one wide parent, then two fully contained children per day
        let day0 = vec![rect(9, 29, 84, 94)];
        let day1 = vec![rect(9, 17, 84, 94), rect(21, 29, 84, 94)];
        let day2 = vec![rect(9, 14, 84, 94), rect(24, 29, 84, 94)];

        let set = track_days(
            [(0, day0), (1, day1), (2, day2)],
            &Config::default(),
        )
        .unwrap();

        assert_eq!(set.len(), 1);
        let track = &set.tracks()[0];
        assert_eq!(track.days(), &[0, 1, 2]);
        assert_eq!(track.split_days(), &[1, 2]);
        assert_eq!(track.split_num(), &[2, 2]);
        // the day-1 object is the union of both children
        assert_eq!(track.object_on(1).unwrap().len(), 2 * 9 * 11);
    }

    #[test]
    fn merge_keeps_first_claimant_and_archives_the_rest() {
        let day0 = vec![rect(9, 14, 39, 48), rect(24, 29, 39, 48)];
        let day1 = vec![rect(9, 17, 39, 48), rect(21, 29, 39, 48)];
        let day2 = vec![rect(9, 29, 39, 48)];

        let set = track_days(
            [(0, day0), (1, day1), (2, day2)],
            &Config::default(),
        )
        .unwrap();

        assert_eq!(set.len(), 2);
        let mut tracks: Vec<&Track> = set.iter().collect();
        tracks.sort_by_key(|t| t.ori_order());

        // both began on day 0 and both carry the merged day-2 object
        for track in &tracks {
            assert_eq!(track.ori_day(), 0);
            assert_eq!(track.days(), &[0, 1, 2]);
            assert_eq!(track.object_on(2).unwrap().len(), 21 * 10);
        }
        assert_eq!(tracks[0].ori_order(), 0);
        assert_eq!(tracks[1].ori_order(), 1);
    }

    #[test]
    fn empty_day_kills_every_active_track() {
        let block = rect(0, 9, 0, 9);
        let set = track_days(
            [
                (0, vec![block.clone()]),
                (1, Vec::new()),
                (2, vec![block.clone()]),
            ],
            &Config::default(),
        )
        .unwrap();

        // the original dies on the empty day; a fresh track is born on day 2
        assert_eq!(set.len(), 2);
        let mut days: Vec<&[u32]> = set.iter().map(|t| t.days()).collect();
        days.sort();
        assert_eq!(days, vec![&[0][..], &[2][..]]);
    }

    #[test]
    fn weak_overlap_starts_a_new_track_instead_of_continuing() {
        // successor shares only 2 of 10 columns: overlap 0.2 < 0.5
        let set = track_days(
            [
                (0, vec![rect(0, 9, 0, 0)]),
                (1, vec![rect(8, 17, 0, 0)]),
            ],
            &Config {
                minpix: 1,
                ..Config::default()
            },
        )
        .unwrap();

        assert_eq!(set.len(), 2);
        assert!(set.iter().any(|t| t.ori_day() == 1 && t.ori_order() == 0));
    }

    #[test]
    fn cut_off_filters_short_tracks_from_the_archive() {
        let long = rect(0, 9, 0, 9);
        let brief = rect(30, 39, 30, 39);
        let set = track_days(
            [
                (0, vec![long.clone(), brief.clone()]),
                (1, vec![long.clone()]),
                (2, vec![long.clone()]),
            ],
            &Config {
                cut_off: Some(2),
                ..Config::default()
            },
        )
        .unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(set.tracks()[0].duration(), 3);
    }

    #[test]
    fn finishing_early_truncates_but_stays_valid() {
        let block = rect(0, 9, 0, 9);
        let mut tracker = Tracker::new(&Config::default()).unwrap();
        tracker.advance(0, vec![block.clone()]);
        tracker.advance(1, vec![block.clone()]);
        // caller stops here instead of feeding the remaining days
        let set = tracker.finish();

        assert_eq!(set.len(), 1);
        assert_eq!(set.tracks()[0].days(), &[0, 1]);
    }

    #[test]
    fn repeated_runs_produce_identical_track_sets() {
        use crate::grid::Grid;
        use crate::mask::DayMask;

        let grid = Grid::cylindrical(40, 20).unwrap();
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut masks = Vec::new();
        for _ in 0..10 {
            let mut mask = DayMask::new(&grid);
            // a handful of random rectangles per day
            for _ in 0..4 {
                let i0 = rng.gen_range(0..36);
                let j0 = rng.gen_range(0..16);
                let (w, h) = (rng.gen_range(2..6), rng.gen_range(2..5));
                for i in i0..(i0 + w).min(40) {
                    for j in j0..(j0 + h).min(20) {
                        mask.set(Cell::new(0, i, j), true);
                    }
                }
            }
            masks.push(mask);
        }

        let config = Config {
            minpix: 4,
            ..Config::default()
        };
        let run = |masks: &[DayMask]| {
            track_masks(
                &grid,
                masks.iter().enumerate().map(|(d, m)| (d as u32, m)),
                &config,
            )
            .unwrap()
        };
        let first = run(&masks);
        let second = run(&masks);
        assert!(first.same_tracks(&second));
    }

    #[test]
    fn archives_round_trip_through_serde() {
        let block = rect(0, 9, 0, 9);
        let set = track_days(
            [(0, vec![block.clone()]), (1, vec![block])],
            &Config::default(),
        )
        .unwrap();

        let json = serde_json::to_string(&set).unwrap();
        let back: TrackSet = serde_json::from_str(&json).unwrap();
        assert!(set.same_tracks(&back));
    }

    #[test]
    fn track_days_rejects_bad_parameters() {
        let err = track_days(
            std::iter::empty::<(u32, Vec<Blob>)>(),
            &Config {
                alpha: 1.5,
                ..Config::default()
            },
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::Alpha(1.5));
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric_and_bounded(
            a in proptest::collection::btree_set((0u32..12, 0u32..12), 1..40),
            b in proptest::collection::btree_set((0u32..12, 0u32..12), 1..40),
        ) {
            let blob = |cells: &std::collections::BTreeSet<(u32, u32)>| {
                Blob::new(cells.iter().map(|&(i, j)| Cell::new(0, i, j)).collect())
            };
            let (x, y) = (blob(&a), blob(&b));
            let fwd = overlap(&x, &y);
            let rev = overlap(&y, &x);
            prop_assert!((fwd - rev).abs() < 1e-12);
            prop_assert!((0.0..=1.0).contains(&fwd));

            let subset = a.is_subset(&b) || b.is_subset(&a);
            prop_assert_eq!(fwd == 1.0, subset);
        }
    }
}
