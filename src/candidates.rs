//! Ranked mask candidates and user selection state

use crate::error::SegmentationError;
use crate::mask::MaskCandidate;

/// Holds the candidates of the most recently completed interactive job
/// and the user's selection. Stale candidates are never presented as
/// current: the session clears this whenever the annotation set is
/// replaced or a new interactive job is submitted.
#[derive(Debug, Default)]
pub struct CandidateSelector {
    candidates: Vec<MaskCandidate>,
    selected: Option<usize>,
}

impl CandidateSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the candidates of a freshly completed job. Candidates
    /// are expected in rank order (the gateway guarantees it); any
    /// previous selection is discarded.
    pub fn set_candidates(&mut self, candidates: Vec<MaskCandidate>) {
        self.candidates = candidates;
        self.selected = None;
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
        self.selected = None;
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn candidates(&self) -> &[MaskCandidate] {
        &self.candidates
    }

    /// Mark the candidate at `rank` as chosen
    pub fn select(&mut self, rank: usize) -> Result<(), SegmentationError> {
        if rank >= self.candidates.len() {
            return Err(SegmentationError::Input(format!(
                "Candidate rank {} out of range (have {})",
                rank,
                self.candidates.len()
            )));
        }
        self.selected = Some(rank);
        Ok(())
    }

    /// Rank of the chosen candidate, defaulting to the highest-ranked
    pub fn current_rank(&self) -> Option<usize> {
        if self.candidates.is_empty() {
            None
        } else {
            Some(self.selected.unwrap_or(0))
        }
    }

    /// The chosen candidate, or the highest-ranked one by default
    pub fn current(&self) -> Option<&MaskCandidate> {
        self.current_rank().map(|rank| &self.candidates[rank])
    }

    /// Mutable access to the chosen candidate, for boundary adjustment
    pub fn current_mut(&mut self) -> Option<&mut MaskCandidate> {
        let rank = self.current_rank()?;
        Some(&mut self.candidates[rank])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::MaskData;

    fn candidates(scores: &[f32]) -> Vec<MaskCandidate> {
        scores
            .iter()
            .enumerate()
            .map(|(rank, &score)| MaskCandidate {
                mask: MaskData::empty(2, 2),
                score,
                rank,
            })
            .collect()
    }

    #[test]
    fn test_empty_selector_has_no_current() {
        let selector = CandidateSelector::new();
        assert!(selector.is_empty());
        assert!(selector.current().is_none());
        assert!(selector.current_rank().is_none());
    }

    #[test]
    fn test_default_selection_is_rank_zero() {
        let mut selector = CandidateSelector::new();
        selector.set_candidates(candidates(&[0.9, 0.7, 0.4]));
        assert_eq!(selector.current_rank(), Some(0));
        assert_eq!(selector.current().unwrap().score, 0.9);
    }

    #[test]
    fn test_explicit_selection() {
        let mut selector = CandidateSelector::new();
        selector.set_candidates(candidates(&[0.9, 0.7, 0.4]));
        selector.select(2).unwrap();
        assert_eq!(selector.current_rank(), Some(2));
        assert_eq!(selector.current().unwrap().score, 0.4);
    }

    #[test]
    fn test_out_of_range_selection_rejected() {
        let mut selector = CandidateSelector::new();
        selector.set_candidates(candidates(&[0.9]));
        match selector.select(1) {
            Err(SegmentationError::Input(_)) => {}
            other => panic!("Expected Input error, got {:?}", other),
        }
        // Selection state untouched
        assert_eq!(selector.current_rank(), Some(0));
    }

    #[test]
    fn test_new_candidates_reset_selection() {
        let mut selector = CandidateSelector::new();
        selector.set_candidates(candidates(&[0.9, 0.7]));
        selector.select(1).unwrap();
        selector.set_candidates(candidates(&[0.8]));
        assert_eq!(selector.current_rank(), Some(0));
    }

    #[test]
    fn test_clear_removes_candidates() {
        let mut selector = CandidateSelector::new();
        selector.set_candidates(candidates(&[0.9]));
        selector.clear();
        assert!(selector.is_empty());
        assert!(selector.current().is_none());
    }
}
