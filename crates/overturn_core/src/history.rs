//! Two-deep snapshot ring for rollback and secant tangents.
//!
//! Every accepted (or attempted) step is stored before the predictor runs;
//! a rejected step restores from the newest slot. The previous slot exists
//! so a secant tangent can be rebuilt after a restore.

use crate::vector::Vector;

/// Full continuation point: state, parameter, tangent and the step size
/// that led to it.
#[derive(Clone)]
pub struct Snapshot<V: Vector> {
    pub state: V,
    pub par: f64,
    pub ds: f64,
    pub state_dot: V,
    pub par_dot: f64,
}

/// Ring buffer holding the two most recent snapshots.
pub struct History<V: Vector> {
    slots: [Option<Snapshot<V>>; 2],
}

impl<V: Vector> Default for History<V> {
    fn default() -> Self {
        Self {
            slots: [None, None],
        }
    }
}

impl<V: Vector> History<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a snapshot; the previous newest shifts down one slot and the
    /// oldest drops off.
    pub fn push(&mut self, snap: Snapshot<V>) {
        self.slots[1] = self.slots[0].take();
        self.slots[0] = Some(snap);
    }

    /// Most recently stored point.
    pub fn newest(&self) -> Option<&Snapshot<V>> {
        self.slots[0].as_ref()
    }

    /// The point before the most recent one.
    pub fn previous(&self) -> Option<&Snapshot<V>> {
        self.slots[1].as_ref()
    }

    /// Drop the newest snapshot, promoting the previous one. Used when a
    /// stored attempt is abandoned entirely.
    pub fn pop(&mut self) -> Option<Snapshot<V>> {
        let newest = self.slots[0].take();
        self.slots[0] = self.slots[1].take();
        newest
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots[0].is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    fn snap(par: f64) -> Snapshot<DVector<f64>> {
        Snapshot {
            state: DVector::from_vec(vec![par]),
            par,
            ds: 0.1,
            state_dot: DVector::from_vec(vec![1.0]),
            par_dot: 1.0,
        }
    }

    #[test]
    fn push_shifts_slots() {
        let mut h = History::new();
        assert!(h.is_empty());
        h.push(snap(1.0));
        h.push(snap(2.0));
        h.push(snap(3.0));
        assert_eq!(h.len(), 2);
        assert_eq!(h.newest().unwrap().par, 3.0);
        assert_eq!(h.previous().unwrap().par, 2.0);
    }

    #[test]
    fn pop_promotes_previous() {
        let mut h = History::new();
        h.push(snap(1.0));
        h.push(snap(2.0));
        let dropped = h.pop().unwrap();
        assert_eq!(dropped.par, 2.0);
        assert_eq!(h.newest().unwrap().par, 1.0);
        assert!(h.previous().is_none());
    }
}
