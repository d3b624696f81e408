use std::collections::BTreeMap;
use std::rc::Rc;

use crate::data::chain::{Chain, ChainRef};
use crate::data::effects::{Effect, EffectTime};
use crate::data::formulas::FormulaTime;
use crate::planner::GOAL_ID;

/// Minimum separation between distinct time points.
pub const THRESHOLD: f32 = 0.01;

/// A step has two time points.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StepPoint {
    Start,
    End,
}

/// Position relative to a time point.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StepRel {
    Before,
    At,
    After,
}

/// A time within a step, ordered lexicographically by point then relation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepTime {
    pub point: StepPoint,
    pub rel: StepRel,
}

impl StepTime {
    pub const AT_START: StepTime = StepTime { point: StepPoint::Start, rel: StepRel::At };
    pub const AFTER_START: StepTime = StepTime { point: StepPoint::Start, rel: StepRel::After };
    pub const BEFORE_END: StepTime = StepTime { point: StepPoint::End, rel: StepRel::Before };
    pub const AT_END: StepTime = StepTime { point: StepPoint::End, rel: StepRel::At };
}

/// The step time at which the given effect takes hold.
pub fn effect_time(effect: &Effect) -> StepTime {
    match effect.when {
        EffectTime::AtStart => StepTime::AT_START,
        EffectTime::AtEnd => StepTime::AT_END,
    }
}

/// The step time by which a condition with the given stamp must hold.
pub fn condition_end_time(when: FormulaTime) -> StepTime {
    match when {
        FormulaTime::AtStart => StepTime::AT_START,
        FormulaTime::AtEnd => StepTime::AT_END,
        FormulaTime::OverAll => StepTime::BEFORE_END,
    }
}

/// The step time from which a condition with the given stamp must hold.
pub fn condition_start_time(when: FormulaTime) -> StepTime {
    match when {
        FormulaTime::AtStart => StepTime::AT_START,
        FormulaTime::AtEnd => StepTime::AT_END,
        FormulaTime::OverAll => StepTime::AFTER_START,
    }
}

/// An ordering constraint between two step time points.
#[derive(Copy, Clone, Debug)]
pub struct Ordering {
    pub before_id: usize,
    pub before_time: StepTime,
    pub after_id: usize,
    pub after_time: StepTime,
}

impl Ordering {
    pub fn new(
        before_id: usize,
        before_time: StepTime,
        after_id: usize,
        after_time: StepTime,
    ) -> Ordering {
        Ordering { before_id, before_time, after_id, after_time }
    }
}

/// Lower bounds attached to a freshly created step in a temporal network.
#[derive(Copy, Clone, Debug)]
pub struct StepBounds {
    pub min_start: f32,
    pub min_end: f32,
    pub min_duration: f32,
    pub max_duration: f32,
}

/// An immutable collection of ordering constraints, in a binary or a
/// temporal flavour. Cloning shares the underlying rows; rows are copied on
/// first write.
#[derive(Clone, Debug)]
pub enum Orderings {
    Binary(BinaryOrderings),
    Temporal(TemporalOrderings),
}

impl Orderings {
    pub fn binary() -> Orderings {
        Orderings::Binary(BinaryOrderings::default())
    }

    pub fn temporal() -> Orderings {
        Orderings::Temporal(TemporalOrderings::default())
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, Orderings::Temporal(_))
    }

    pub fn possibly_before(&self, id1: usize, t1: StepTime, id2: usize, t2: StepTime) -> bool {
        match self {
            Orderings::Binary(o) => o.possibly_before(id1, id2),
            Orderings::Temporal(o) => o.possibly_before(id1, t1, id2, t2),
        }
    }

    pub fn possibly_after(&self, id1: usize, t1: StepTime, id2: usize, t2: StepTime) -> bool {
        match self {
            Orderings::Binary(o) => o.possibly_after(id1, id2),
            Orderings::Temporal(o) => o.possibly_after(id1, t1, id2, t2),
        }
    }

    /// Check if the first point could be at or after the second.
    pub fn possibly_not_before(&self, id1: usize, t1: StepTime, id2: usize, t2: StepTime) -> bool {
        match self {
            Orderings::Binary(o) => o.possibly_after(id1, id2),
            Orderings::Temporal(o) => o.possibly_not_before(id1, t1, id2, t2),
        }
    }

    /// Check if the first point could be at or before the second.
    pub fn possibly_not_after(&self, id1: usize, t1: StepTime, id2: usize, t2: StepTime) -> bool {
        match self {
            Orderings::Binary(o) => o.possibly_before(id1, id2),
            Orderings::Temporal(o) => o.possibly_not_after(id1, t1, id2, t2),
        }
    }

    /// Check if the two steps are possibly concurrent; on success the flags
    /// report which point pairs (ss, se, es, ee) may coincide.
    pub fn possibly_concurrent(&self, id1: usize, id2: usize) -> Option<[bool; 4]> {
        match self {
            Orderings::Binary(o) => o.possibly_concurrent(id1, id2),
            Orderings::Temporal(o) => o.possibly_concurrent(id1, id2),
        }
    }

    /// Return the orderings with the given constraint added, or `None` if
    /// that would make them inconsistent.
    pub fn refine(&self, ordering: &Ordering) -> Option<Orderings> {
        match self {
            Orderings::Binary(o) => o.refine(ordering).map(Orderings::Binary),
            Orderings::Temporal(o) => o.refine(ordering).map(Orderings::Temporal),
        }
    }

    /// Return the orderings with the given constraint and a new step added.
    /// Temporal orderings also receive the step's duration interval and
    /// heuristic lower bounds.
    pub fn refine_step(
        &self,
        ordering: &Ordering,
        step_id: usize,
        bounds: Option<StepBounds>,
    ) -> Option<Orderings> {
        match self {
            Orderings::Binary(o) => o.refine_step(ordering, step_id).map(Orderings::Binary),
            Orderings::Temporal(o) => {
                o.refine_step(ordering, step_id, bounds).map(Orderings::Temporal)
            }
        }
    }

    /// Tighten the lower bounds on a step's start and end times. A no-op
    /// for binary orderings.
    pub fn refine_bounds(&self, step_id: usize, min_start: f32, min_end: f32) -> Option<Orderings> {
        match self {
            Orderings::Binary(_) => Some(self.clone()),
            Orderings::Temporal(o) => {
                o.refine_bounds(step_id, min_start, min_end).map(Orderings::Temporal)
            }
        }
    }

    /// Fill the given tables with scheduled times and return the makespan.
    pub fn schedule(
        &self,
        start_times: &mut BTreeMap<usize, f32>,
        end_times: &mut BTreeMap<usize, f32>,
    ) -> f32 {
        match self {
            Orderings::Binary(o) => o.schedule(start_times, end_times),
            Orderings::Temporal(o) => o.schedule(start_times, end_times),
        }
    }

    /// Return the makespan, honouring per-point minimum times.
    pub fn makespan(&self, min_times: &BTreeMap<(usize, StepPoint), f32>) -> f32 {
        match self {
            Orderings::Binary(o) => o.makespan(min_times),
            Orderings::Temporal(o) => o.makespan(min_times),
        }
    }
}

/// Transitive closure of binary precedence constraints over step ids. Row
/// `i - 2` covers both directions between step `i` and every earlier step.
#[derive(Clone, Debug, Default)]
pub struct BinaryOrderings {
    before: Vec<Rc<Vec<bool>>>,
}

impl BinaryOrderings {
    fn step_count(&self) -> usize {
        self.before.len() + 1
    }

    fn is_before(&self, id1: usize, id2: usize) -> bool {
        if id1 == id2 {
            false
        } else if id1 < id2 {
            self.before[id2 - 2][id1 - 1]
        } else {
            self.before[id1 - 2][2 * id1 - 2 - id2]
        }
    }

    fn set_before(&mut self, id1: usize, id2: usize) {
        if id1 == id2 {
            return;
        }
        let row = id1.max(id2) - 2;
        let row = Rc::make_mut(&mut self.before[row]);
        if id1 < id2 {
            row[id1 - 1] = true;
        } else {
            row[2 * id1 - 2 - id2] = true;
        }
    }

    fn fill_transitive(&mut self, ordering: &Ordering) {
        let i = ordering.before_id;
        let j = ordering.after_id;
        if self.is_before(i, j) {
            return;
        }
        let n = self.step_count();
        for k in 1..=n {
            if (k == i || self.is_before(k, i)) && !self.is_before(k, j) {
                for l in 1..=n {
                    if (j == l || self.is_before(j, l)) && !self.is_before(k, l) {
                        self.set_before(k, l);
                    }
                }
            }
        }
    }

    pub fn possibly_before(&self, id1: usize, id2: usize) -> bool {
        if id1 == id2 {
            false
        } else if id1 == 0 || id2 == GOAL_ID {
            true
        } else if id1 == GOAL_ID || id2 == 0 {
            false
        } else {
            !self.is_before(id2, id1)
        }
    }

    pub fn possibly_after(&self, id1: usize, id2: usize) -> bool {
        if id1 == id2 || id1 == 0 || id2 == GOAL_ID {
            false
        } else if id1 == GOAL_ID || id2 == 0 {
            true
        } else {
            !self.is_before(id1, id2)
        }
    }

    pub fn possibly_concurrent(&self, id1: usize, id2: usize) -> Option<[bool; 4]> {
        if id1 == id2 || id1 == 0 || id1 == GOAL_ID || id2 == 0 || id2 == GOAL_ID {
            None
        } else if !self.is_before(id1, id2) && !self.is_before(id2, id1) {
            Some([true; 4])
        } else {
            None
        }
    }

    pub fn refine(&self, ordering: &Ordering) -> Option<BinaryOrderings> {
        if ordering.before_id != 0
            && ordering.after_id != GOAL_ID
            && self.possibly_after(ordering.before_id, ordering.after_id)
        {
            let mut orderings = self.clone();
            orderings.fill_transitive(ordering);
            Some(orderings)
        } else {
            Some(self.clone())
        }
    }

    pub fn refine_step(&self, ordering: &Ordering, step_id: usize) -> Option<BinaryOrderings> {
        if step_id == 0 || step_id == GOAL_ID {
            return Some(self.clone());
        }
        let mut orderings = self.clone();
        if step_id > self.step_count() && step_id > 1 {
            orderings.before.push(Rc::new(vec![false; 2 * step_id - 2]));
        }
        if ordering.before_id != 0 && ordering.after_id != GOAL_ID {
            orderings.fill_transitive(ordering);
        }
        Some(orderings)
    }

    fn schedule_step(
        &self,
        start_times: &mut BTreeMap<usize, f32>,
        end_times: &mut BTreeMap<usize, f32>,
        step_id: usize,
        min_times: Option<&BTreeMap<(usize, StepPoint), f32>>,
    ) -> f32 {
        if let Some(&t) = start_times.get(&step_id) {
            return t;
        }
        let unit = if min_times.is_some() { THRESHOLD } else { 1.0 };
        let mut sd = unit;
        for j in 1..=self.step_count() {
            if step_id != j && self.is_before(j, step_id) {
                let ed = unit + self.schedule_step(start_times, end_times, j, min_times);
                if ed > sd {
                    sd = ed;
                }
            }
        }
        if let Some(min_times) = min_times {
            let md = min_times
                .get(&(step_id, StepPoint::Start))
                .or_else(|| min_times.get(&(step_id, StepPoint::End)));
            if let Some(&md) = md {
                if md > sd {
                    sd = md;
                }
            }
        }
        start_times.insert(step_id, sd);
        end_times.insert(step_id, sd);
        sd
    }

    pub fn schedule(
        &self,
        start_times: &mut BTreeMap<usize, f32>,
        end_times: &mut BTreeMap<usize, f32>,
    ) -> f32 {
        let mut max_dist = 0.0f32;
        for i in 1..=self.step_count() {
            let ed = self.schedule_step(start_times, end_times, i, None);
            if ed > max_dist {
                max_dist = ed;
            }
        }
        max_dist
    }

    pub fn makespan(&self, min_times: &BTreeMap<(usize, StepPoint), f32>) -> f32 {
        let mut start_times = BTreeMap::new();
        let mut end_times = BTreeMap::new();
        let mut max_dist = 0.0f32;
        for i in 1..=self.step_count() {
            let ed = self.schedule_step(&mut start_times, &mut end_times, i, Some(min_times));
            if ed > max_dist {
                max_dist = ed;
            }
        }
        if let Some(&md) = min_times.get(&(GOAL_ID, StepPoint::Start)) {
            if md > max_dist {
                max_dist = md;
            }
        }
        max_dist
    }
}

const INF: i32 = i32::MAX;

fn units(time: f32) -> i32 {
    (time / THRESHOLD + 0.5) as i32
}

/// Minimal distance matrix of a simple temporal network over step time
/// nodes. Step `id` contributes nodes `2·id − 1` (start) and `2·id` (end);
/// node 0 is the origin. Distances are multiples of [`THRESHOLD`].
#[derive(Clone, Debug, Default)]
pub struct TemporalOrderings {
    distance: Vec<Rc<Vec<i32>>>,
    goal_achievers: ChainRef<usize>,
}

impl TemporalOrderings {
    fn step_count(&self) -> usize {
        self.distance.len() / 2
    }

    fn time_node(&self, id: usize, t: StepTime) -> usize {
        match t.point {
            StepPoint::Start => 2 * id - 1,
            StepPoint::End => 2 * id,
        }
    }

    /// Upper bound on `time(t2) − time(t1)`.
    fn get_distance(&self, t1: usize, t2: usize) -> i32 {
        if t1 == t2 {
            0
        } else if t1 < t2 {
            self.distance[t2 - 1][t1]
        } else {
            self.distance[t1 - 1][2 * t1 - 1 - t2]
        }
    }

    fn set_distance(&mut self, t1: usize, t2: usize, d: i32) {
        if t1 == t2 {
            return;
        }
        let row = t1.max(t2) - 1;
        let row = Rc::make_mut(&mut self.distance[row]);
        if t1 < t2 {
            row[t1] = d;
        } else {
            row[2 * t1 - 1 - t2] = d;
        }
    }

    /// Propagate the constraint `time(j) − time(i) ≥ dist`. Returns false
    /// if the network became inconsistent.
    fn fill_transitive(&mut self, i: usize, j: usize, dist: i32) -> bool {
        if self.get_distance(j, i) > -dist {
            let n = self.distance.len();
            for k in 0..=n {
                let d_ik = self.get_distance(i, k);
                if d_ik < INF && self.get_distance(j, k) > d_ik - dist {
                    for l in 0..=n {
                        let d_lj = self.get_distance(l, j);
                        if d_lj < INF {
                            let new_d = d_ik + d_lj - dist;
                            if self.get_distance(l, k) > new_d {
                                self.set_distance(l, k, new_d);
                                if -self.get_distance(k, l) > new_d {
                                    return false;
                                }
                            }
                        }
                    }
                }
            }
        }
        true
    }

    pub fn possibly_before(&self, id1: usize, t1: StepTime, id2: usize, t2: StepTime) -> bool {
        if id1 == id2 && t1 >= t2 {
            false
        } else if id1 == 0 || id2 == GOAL_ID {
            true
        } else if id1 == GOAL_ID || id2 == 0 {
            false
        } else {
            let d = self.get_distance(self.time_node(id1, t1), self.time_node(id2, t2));
            d > 0 || (d == 0 && t1.rel < t2.rel)
        }
    }

    pub fn possibly_not_before(&self, id1: usize, t1: StepTime, id2: usize, t2: StepTime) -> bool {
        if id1 == id2 && t1 < t2 {
            false
        } else if id1 == 0 || id2 == GOAL_ID {
            false
        } else if id1 == GOAL_ID || id2 == 0 {
            true
        } else {
            let d = self.get_distance(self.time_node(id2, t2), self.time_node(id1, t1));
            d > 0 || (d == 0 && t2.rel <= t1.rel)
        }
    }

    pub fn possibly_after(&self, id1: usize, t1: StepTime, id2: usize, t2: StepTime) -> bool {
        if id1 == id2 && t1 <= t2 {
            false
        } else if id1 == 0 || id2 == GOAL_ID {
            false
        } else if id1 == GOAL_ID || id2 == 0 {
            true
        } else {
            let d = self.get_distance(self.time_node(id2, t2), self.time_node(id1, t1));
            d > 0 || (d == 0 && t2.rel < t1.rel)
        }
    }

    pub fn possibly_not_after(&self, id1: usize, t1: StepTime, id2: usize, t2: StepTime) -> bool {
        if id1 == id2 && t1 > t2 {
            false
        } else if id1 == 0 || id2 == GOAL_ID {
            true
        } else if id1 == GOAL_ID || id2 == 0 {
            false
        } else {
            let d = self.get_distance(self.time_node(id1, t1), self.time_node(id2, t2));
            d > 0 || (d == 0 && t1.rel <= t2.rel)
        }
    }

    pub fn possibly_concurrent(&self, id1: usize, id2: usize) -> Option<[bool; 4]> {
        if id1 == id2 || id1 == 0 || id1 == GOAL_ID || id2 == 0 || id2 == GOAL_ID {
            return None;
        }
        let t1s = self.time_node(id1, StepTime::AT_START);
        let t1e = self.time_node(id1, StepTime::AT_END);
        let t2s = self.time_node(id2, StepTime::AT_START);
        let t2e = self.time_node(id2, StepTime::AT_END);
        let coincide = |a, b| self.get_distance(a, b) >= 0 && self.get_distance(b, a) >= 0;
        let flags = [
            coincide(t1s, t2s),
            coincide(t1s, t2e),
            coincide(t1e, t2s),
            coincide(t1e, t2e),
        ];
        flags.iter().any(|&f| f).then_some(flags)
    }

    pub fn refine(&self, ordering: &Ordering) -> Option<TemporalOrderings> {
        if ordering.before_id != 0
            && ordering.after_id != GOAL_ID
            && self.possibly_not_before(
                ordering.before_id,
                ordering.before_time,
                ordering.after_id,
                ordering.after_time,
            )
        {
            let mut orderings = self.clone();
            let i = self.time_node(ordering.before_id, ordering.before_time);
            let j = self.time_node(ordering.after_id, ordering.after_time);
            let dist = if ordering.before_time.rel < ordering.after_time.rel { 0 } else { 1 };
            orderings.fill_transitive(i, j, dist).then_some(orderings)
        } else {
            Some(self.clone())
        }
    }

    /// Tighten the lower bounds on a step's start and end times.
    pub fn refine_bounds(
        &self,
        step_id: usize,
        min_start: f32,
        min_end: f32,
    ) -> Option<TemporalOrderings> {
        if step_id == 0 || step_id == GOAL_ID {
            return Some(self.clone());
        }
        let i = self.time_node(step_id, StepTime::AT_START);
        let j = self.time_node(step_id, StepTime::AT_END);
        let start = units(min_start);
        let end = units(min_end);
        if -self.get_distance(i, 0) >= start && -self.get_distance(j, 0) >= end {
            Some(self.clone())
        } else if self.get_distance(0, i) < start || self.get_distance(0, j) < end {
            None
        } else {
            let mut orderings = self.clone();
            (orderings.fill_transitive(0, i, start) && orderings.fill_transitive(0, j, end))
                .then_some(orderings)
        }
    }

    /// Add a step pinned to an exact time, for timed initial literals. The
    /// step must be the newest.
    pub fn refine_timed(&self, time: f32, step_id: usize) -> TemporalOrderings {
        if step_id == 0 || step_id == GOAL_ID || step_id <= self.step_count() {
            return self.clone();
        }
        let itime = units(time);
        let mut orderings = self.clone();
        let mut start_row = vec![INF; 4 * step_id - 2];
        start_row[0] = itime;
        start_row[4 * step_id - 3] = -itime;
        for id in 1..step_id {
            let t = itime - self.distance[2 * id - 1][0];
            start_row[2 * id - 1] = t;
            start_row[2 * id] = t;
            start_row[4 * step_id - 2 * id - 2] = -t;
            start_row[4 * step_id - 2 * id - 3] = -t;
        }
        orderings.distance.push(Rc::new(start_row));
        let mut end_row = vec![INF; 4 * step_id];
        end_row[0] = itime;
        end_row[4 * step_id - 1] = -itime;
        for id in 1..step_id {
            let t = itime - self.distance[2 * id - 1][0];
            end_row[2 * id - 1] = t;
            end_row[2 * id] = t;
            end_row[4 * step_id - 2 * id] = -t;
            end_row[4 * step_id - 2 * id - 1] = -t;
        }
        end_row[2 * step_id - 1] = 0;
        end_row[2 * step_id] = 0;
        orderings.distance.push(Rc::new(end_row));
        orderings
    }

    pub fn refine_step(
        &self,
        ordering: &Ordering,
        step_id: usize,
        bounds: Option<StepBounds>,
    ) -> Option<TemporalOrderings> {
        if step_id == 0 || step_id == GOAL_ID {
            return Some(self.clone());
        }
        let mut orderings = self.clone();
        if step_id > self.step_count() {
            let bounds = bounds?;
            let mut start_row = vec![INF; 4 * step_id - 2];
            start_row[4 * step_id - 3] = -units(bounds.min_start);
            orderings.distance.push(Rc::new(start_row));
            let mut end_row = vec![INF; 4 * step_id];
            end_row[4 * step_id - 1] = -units(bounds.min_end);
            if bounds.max_duration != f32::INFINITY {
                end_row[2 * step_id - 1] = units(bounds.max_duration);
            }
            end_row[2 * step_id] = -units(bounds.min_duration);
            orderings.distance.push(Rc::new(end_row));
        }
        if ordering.before_id != 0 {
            if ordering.after_id != GOAL_ID {
                let i = orderings.time_node(ordering.before_id, ordering.before_time);
                let j = orderings.time_node(ordering.after_id, ordering.after_time);
                let dist =
                    if ordering.before_time.rel < ordering.after_time.rel { 0 } else { 1 };
                if !orderings.fill_transitive(i, j, dist) {
                    return None;
                }
            } else {
                orderings.goal_achievers =
                    Some(Chain::cons(ordering.before_id, orderings.goal_achievers));
            }
        }
        Some(orderings)
    }

    pub fn schedule(
        &self,
        start_times: &mut BTreeMap<usize, f32>,
        end_times: &mut BTreeMap<usize, f32>,
    ) -> f32 {
        let mut max_dist = 0.0f32;
        for i in 1..=self.step_count() {
            let sd = -self.get_distance(self.time_node(i, StepTime::AT_START), 0) as f32
                * THRESHOLD;
            start_times.insert(i, sd);
            let ed =
                -self.get_distance(self.time_node(i, StepTime::AT_END), 0) as f32 * THRESHOLD;
            end_times.insert(i, ed);
            if ed > max_dist && Chain::contains(&self.goal_achievers, &i) {
                max_dist = ed;
            }
        }
        max_dist
    }

    pub fn makespan(&self, _min_times: &BTreeMap<(usize, StepPoint), f32>) -> f32 {
        let mut max_dist = 0.0f32;
        for i in 1..=self.step_count() {
            let ed =
                -self.get_distance(self.time_node(i, StepTime::AT_END), 0) as f32 * THRESHOLD;
            if ed > max_dist && Chain::contains(&self.goal_achievers, &i) {
                max_dist = ed;
            }
        }
        max_dist
    }
}

#[cfg(test)]
mod tests {
    use super::{Ordering, Orderings, StepBounds, StepTime, THRESHOLD};
    use std::collections::BTreeMap;

    fn add_step(orderings: &Orderings, id: usize, duration: f32) -> Orderings {
        let ordering =
            Ordering::new(0, StepTime::AT_END, id, StepTime::AT_START);
        orderings
            .refine_step(
                &ordering,
                id,
                Some(StepBounds {
                    min_start: THRESHOLD,
                    min_end: THRESHOLD + duration,
                    min_duration: duration,
                    max_duration: duration,
                }),
            )
            .unwrap()
    }

    #[test]
    fn binary_possibly_before_is_irreflexive() {
        let o = Orderings::binary();
        assert!(!o.possibly_before(1, StepTime::AT_START, 1, StepTime::AT_END));
    }

    #[test]
    fn binary_orderings_close_transitively() {
        let mut o = Orderings::binary();
        for id in 1..=3 {
            o = o.refine_step(
                &Ordering::new(0, StepTime::AT_END, id, StepTime::AT_START),
                id,
                None,
            )
            .unwrap();
        }
        o = o
            .refine(&Ordering::new(1, StepTime::AT_END, 2, StepTime::AT_START))
            .unwrap();
        o = o
            .refine(&Ordering::new(2, StepTime::AT_END, 3, StepTime::AT_START))
            .unwrap();
        assert!(!o.possibly_after(1, StepTime::AT_START, 3, StepTime::AT_END));
        assert!(o.possibly_before(1, StepTime::AT_END, 3, StepTime::AT_START));
    }

    #[test]
    fn temporal_schedule_respects_fixed_durations() {
        let mut o = Orderings::temporal();
        o = add_step(&o, 1, 2.0);
        let mut starts = BTreeMap::new();
        let mut ends = BTreeMap::new();
        o.schedule(&mut starts, &mut ends);
        let dur = ends[&1] - starts[&1];
        assert!((dur - 2.0).abs() < THRESHOLD / 2.0);
    }

    #[test]
    fn temporal_ordering_separates_steps_by_threshold() {
        let mut o = Orderings::temporal();
        o = add_step(&o, 1, 2.0);
        o = add_step(&o, 2, 3.0);
        o = o
            .refine(&Ordering::new(1, StepTime::AT_END, 2, StepTime::AT_START))
            .unwrap();
        let mut starts = BTreeMap::new();
        let mut ends = BTreeMap::new();
        o.schedule(&mut starts, &mut ends);
        assert!(starts[&2] >= ends[&1] + THRESHOLD - 1e-6);
    }

    #[test]
    fn inconsistent_refinement_returns_none() {
        let mut o = Orderings::temporal();
        o = add_step(&o, 1, 1.0);
        o = add_step(&o, 2, 1.0);
        let o = o
            .refine(&Ordering::new(1, StepTime::AT_END, 2, StepTime::AT_START))
            .unwrap();
        // Ordering step 2 strictly before step 1 now closes a negative cycle.
        assert!(o
            .refine(&Ordering::new(2, StepTime::AT_END, 1, StepTime::AT_START))
            .is_none());
    }

    #[test]
    fn timed_step_is_pinned() {
        let o = Orderings::temporal();
        let Orderings::Temporal(t) = &o else { unreachable!() };
        let pinned = t.refine_timed(3.0, 1);
        let mut starts = BTreeMap::new();
        let mut ends = BTreeMap::new();
        Orderings::Temporal(pinned).schedule(&mut starts, &mut ends);
        assert!((starts[&1] - 3.0).abs() < THRESHOLD / 2.0);
        assert!((ends[&1] - 3.0).abs() < THRESHOLD / 2.0);
    }
}
