//! # Piecewise trajectories
//!
//! A fitted track is not a single helix: every scattering layer, every field correction
//! changes the parameters. [`PieceTrajectory`] stores the resulting segments ordered in time,
//! each valid over its own half-open [`TimeRange`], and answers geometric queries by
//! delegating to the segment covering the requested time.
//!
//! Invariants maintained by [`PieceTrajectory::append`] and [`PieceTrajectory::prepend`]:
//!
//! * pieces are sorted by the start of their range,
//! * consecutive ranges do not overlap (a new piece truncates the one it starts inside),
//! * there is always at least one piece.
//!
//! Times before the first piece are served by the first piece, times after the last by the
//! last piece.

use std::collections::VecDeque;
use std::fmt;

use nalgebra::Vector3;

use crate::kinfit_errors::KinFitError;
use crate::particle_state::{ParticleState, ParticleStateMeasurement};
use crate::time_range::TimeRange;
use crate::trajectory::{KinematicTrajectory, MomentumBasis, Trajectory};

#[derive(Debug, Clone, PartialEq)]
pub struct PieceTrajectory<T> {
    pieces: VecDeque<T>,
}

impl<T: KinematicTrajectory> PieceTrajectory<T> {
    pub fn new(first: T) -> Self {
        PieceTrajectory {
            pieces: VecDeque::from([first]),
        }
    }

    /// Add a piece at the end.
    ///
    /// A piece starting at the same time as the last piece replaces it; a piece starting inside
    /// the last piece truncates it.
    ///
    /// Return
    /// ----------
    /// * `Err(KinFitError::PieceOrdering)` when the piece starts before the last piece.
    pub fn append(&mut self, piece: T) -> Result<(), KinFitError> {
        let begin = piece.range().begin;
        let last = self.back_mut();
        let last_range = last.range();
        if begin < last_range.begin {
            return Err(KinFitError::PieceOrdering {
                time: begin,
                last: last_range.begin,
            });
        }
        if begin == last_range.begin {
            *last = piece;
            return Ok(());
        }
        if begin < last_range.end {
            last.set_range(TimeRange::new(last_range.begin, begin));
        }
        self.pieces.push_back(piece);
        Ok(())
    }

    /// Add a piece at the front; the mirror image of [`PieceTrajectory::append`].
    pub fn prepend(&mut self, mut piece: T) -> Result<(), KinFitError> {
        let range = piece.range();
        let first_begin = self.front().range().begin;
        if range.begin > first_begin {
            return Err(KinFitError::PieceOrdering {
                time: range.begin,
                last: first_begin,
            });
        }
        if range.begin == first_begin {
            if let Some(first) = self.pieces.front_mut() {
                *first = piece;
            }
            return Ok(());
        }
        if range.end > first_begin {
            piece.set_range(TimeRange::new(range.begin, first_begin));
        }
        self.pieces.push_front(piece);
        Ok(())
    }

    /// Index of the piece covering `time`, clamped to the first and last pieces.
    pub fn nearest_index(&self, time: f64) -> usize {
        self.pieces
            .partition_point(|p| p.range().begin <= time)
            .saturating_sub(1)
    }

    pub fn nearest_piece(&self, time: f64) -> &T {
        &self.pieces[self.nearest_index(time)]
    }

    /// Piece covering the instant just before `time`: a piece starting exactly at `time` is
    /// skipped.
    pub fn piece_before(&self, time: f64) -> &T {
        let index = self
            .pieces
            .partition_point(|p| p.range().begin < time)
            .saturating_sub(1);
        &self.pieces[index]
    }

    pub fn piece(&self, index: usize) -> Option<&T> {
        self.pieces.get(index)
    }

    pub fn front(&self) -> &T {
        &self.pieces[0]
    }

    pub fn back(&self) -> &T {
        &self.pieces[self.pieces.len() - 1]
    }

    fn back_mut(&mut self) -> &mut T {
        let last = self.pieces.len() - 1;
        &mut self.pieces[last]
    }

    pub fn pieces(&self) -> impl Iterator<Item = &T> + '_ {
        self.pieces.iter()
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn momentum(&self, time: f64) -> Vector3<f64> {
        self.nearest_piece(time).momentum(time)
    }

    pub fn state(&self, time: f64) -> ParticleState {
        self.nearest_piece(time).state(time)
    }

    pub fn measurement_state(&self, time: f64) -> ParticleStateMeasurement {
        self.nearest_piece(time).measurement_state(time)
    }

    /// Nominal field of the piece covering `time`.
    pub fn bnom(&self, time: f64) -> Vector3<f64> {
        self.nearest_piece(time).bnom()
    }

    pub fn charge(&self) -> i32 {
        self.front().charge()
    }

    /// Largest position discontinuity between consecutive pieces at their boundaries.
    pub fn max_gap(&self) -> f64 {
        self.pieces
            .iter()
            .zip(self.pieces.iter().skip(1))
            .map(|(prev, next)| {
                let t = next.range().begin;
                (prev.position(t) - next.position(t)).norm()
            })
            .fold(0.0, f64::max)
    }
}

impl<T: KinematicTrajectory> Trajectory for PieceTrajectory<T> {
    fn position(&self, time: f64) -> Vector3<f64> {
        self.nearest_piece(time).position(time)
    }

    fn velocity(&self, time: f64) -> Vector3<f64> {
        self.nearest_piece(time).velocity(time)
    }

    fn speed(&self, time: f64) -> f64 {
        self.nearest_piece(time).speed(time)
    }

    fn direction(&self, time: f64, basis: MomentumBasis) -> Vector3<f64> {
        self.nearest_piece(time).direction(time, basis)
    }

    fn range(&self) -> TimeRange {
        TimeRange::new(self.front().range().begin, self.back().range().end)
    }
}

impl<T: KinematicTrajectory + fmt::Display> fmt::Display for PieceTrajectory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "PieceTrajectory with {} pieces over {}",
            self.pieces.len(),
            self.range()
        )?;
        if f.alternate() {
            for (i, piece) in self.pieces.iter().enumerate() {
                writeln!(f, "piece {i}: {piece}")?;
            }
        }
        Ok(())
    }
}
