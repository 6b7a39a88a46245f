// src/manager.rs
//
// =============================================================================
// SPORELAB: SPORE MANAGER (v 0.1 )
// =============================================================================
//
// The Evolution Brain.
// Owns the real graph, the ordered spore roster, the candidate field and the
// sibling previews. One `generate_new_spore` call is the atomic unit of
// evolution: clone the last evolvable spore forward along its cached optimal
// step, merge into an existing spore if the new state lands inside the
// trajectory tolerance, otherwise insert it and link parent -> child.
//
// Candidates are Poisson-disk samples of the spawn region; activating one
// turns it into a normal spore, and the candidate-evolution iterator drives
// each activation to death or completion one step per next() call.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use crate::config::{CostFunction, EvolutionConfig, SpawnConfig};
use crate::graph::{GraphKind, Link, LinkType, SporeGraph};
use crate::ids::{CreatedGroup, IdManager, SporeId};
use crate::math::{dist, State2};
use crate::optimizer::SporeOptimizer;
use crate::pendulum::PendulumSystem;
use crate::spawn::SpawnArea;
use crate::spore::{Spore, SporeRole};
use crate::visual::{VisualKind, VisualRegistry};

// ============================================================================
// 1. SIBLING PREVIEWS
// ============================================================================

/// Ghost previews shown around the latest evolvable spore. Visualized but
/// never inserted into the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewKind {
    MaxPos,
    MaxNeg,
    Zero,
    Optimal,
}

#[derive(Debug, Clone)]
pub struct SiblingPreview {
    pub kind: PreviewKind,
    pub control: f64,
    pub state: State2,
}

// ============================================================================
// 2. THE MANAGER
// ============================================================================

pub struct SporeManager {
    pendulum: Arc<PendulumSystem>,
    optimizer: SporeOptimizer,
    cost: CostFunction,
    evolution: EvolutionConfig,

    pub graph: SporeGraph,
    /// Insertion order of graph spores; "last evolvable" walks this in
    /// reverse. Display ids (1-based index) come from here too.
    pub order: Vec<SporeId>,
    pub candidates: Vec<Spore>,
    pub previews: Vec<SiblingPreview>,

    pub spawn_area: SpawnArea,
    pub min_radius: f64,

    ids: Rc<RefCell<IdManager>>,
    visual: Rc<RefCell<VisualRegistry>>,
    rng: StdRng,
}

impl SporeManager {
    pub fn new(
        pendulum: Arc<PendulumSystem>,
        optimizer: SporeOptimizer,
        cost: CostFunction,
        evolution: EvolutionConfig,
        spawn: &SpawnConfig,
        ids: Rc<RefCell<IdManager>>,
        visual: Rc<RefCell<VisualRegistry>>,
    ) -> Self {
        let rng = match spawn.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            pendulum,
            optimizer,
            cost,
            evolution,
            graph: SporeGraph::new(GraphKind::Real),
            order: Vec::new(),
            candidates: Vec::new(),
            previews: Vec::new(),
            spawn_area: SpawnArea::new(spawn),
            min_radius: spawn.min_radius,
            ids,
            visual,
            rng,
        }
    }

    pub fn pendulum(&self) -> &PendulumSystem {
        &self.pendulum
    }

    pub fn ids(&self) -> Rc<RefCell<IdManager>> {
        self.ids.clone()
    }

    pub fn spore_count(&self) -> usize {
        self.order.len()
    }

    pub fn has_goal(&self) -> bool {
        self.graph.spores().any(|s| s.role == SporeRole::Goal)
    }

    /// 1-based display id, matching the snapshot index order used by the
    /// picker's reports.
    pub fn display_id(&self, id: SporeId) -> Option<usize> {
        self.order.iter().position(|&s| s == id).map(|i| i + 1)
    }

    // ========================================================================
    // 3. INSERTION
    // ========================================================================

    /// Builds a spore at `position`, runs the step optimizer on it and
    /// registers it. The returned id is final and never reused.
    pub fn create_spore(&mut self, position: State2, role: SporeRole) -> SporeId {
        let id = self.ids.borrow_mut().alloc_spore_id();
        let spore = Spore::new(
            id,
            self.evolution.dt,
            self.evolution.goal_position,
            position,
            self.cost,
        )
        .with_role(role);
        self.add_spore(spore)
    }

    pub fn add_spore(&mut self, mut spore: Spore) -> SporeId {
        let step = self.optimizer.find_optimal_step(&self.pendulum, &spore);
        spore.optimal_control = step.control;
        spore.optimal_dt = step.dt;
        spore.check_death();

        let id = spore.id;
        log::debug!(
            "spore {} added: pos=({:.4}, {:.4}) cost={:.6} u*={:+.3} dt*={:.4} alive={}",
            id,
            spore.state_2d[0],
            spore.state_2d[1],
            spore.cost,
            spore.optimal_control,
            spore.optimal_dt,
            spore.alive
        );

        self.graph.add_spore(spore);
        self.order.push(id);
        self.visual
            .borrow_mut()
            .register(format!("spore_{id}"), VisualKind::Spore);
        self.refresh_previews();
        id
    }

    /// Seeds the goal spore unless one exists already.
    pub fn ensure_goal_spore(&mut self) -> Option<SporeId> {
        if self.has_goal() {
            return None;
        }
        Some(self.create_spore(self.evolution.goal_position, SporeRole::Goal))
    }

    // ========================================================================
    // 4. EVOLUTION
    // ========================================================================

    /// The latest spore that can still evolve, if any.
    pub fn last_evolvable(&self) -> Option<SporeId> {
        self.order
            .iter()
            .rev()
            .find(|&&id| {
                self.graph
                    .spore(id)
                    .map(|s| s.can_evolve())
                    .unwrap_or(false)
            })
            .copied()
    }

    /// One evolution step. Returns the spore the trajectory arrived at
    /// (newly created or merged into), or None when no parent can evolve.
    pub fn generate_new_spore(&mut self) -> Option<SporeId> {
        let parent_id = self.last_evolvable()?;
        let parent = self.graph.spore(parent_id)?.clone();
        if !parent.can_evolve() {
            return None;
        }

        let next_state =
            self.pendulum
                .step(parent.state_2d, parent.optimal_control, parent.optimal_dt);

        // Trajectory-merge check against everything except the parent.
        // Dead spores stay eligible; the real graph holds no ghosts.
        let tolerance = self.evolution.trajectory_merge_tolerance;
        if let Some(existing) = self.find_nearby_spore(next_state, tolerance, Some(parent_id)) {
            let link_id = self.ids.borrow_mut().alloc_link_id();
            let link = Link::new(
                link_id,
                LinkType::Default,
                parent.optimal_dt,
                parent.optimal_control,
            );
            if let Err(e) = self.graph.add_edge(parent_id, existing, link) {
                log::error!("merge link rejected: {e}");
                return None;
            }
            if let Some(p) = self.graph.spore_mut(parent_id) {
                p.mark_completed(true);
            }
            log::info!(
                "🔗 trajectory merged: spore {parent_id} -> existing spore {existing}"
            );
            self.refresh_previews();
            return Some(existing);
        }

        // No neighbor: insert the new spore and link to it.
        let child_id = self.create_spore(next_state, SporeRole::Normal);
        let link_id = self.ids.borrow_mut().alloc_link_id();
        let link = Link::new(
            link_id,
            LinkType::Default,
            parent.optimal_dt,
            parent.optimal_control,
        );
        if let Err(e) = self.graph.add_edge(parent_id, child_id, link) {
            log::error!("evolution link rejected: {e}");
        }
        self.visual
            .borrow_mut()
            .register(format!("link_{parent_id}_{child_id}"), VisualKind::Link);
        Some(child_id)
    }

    /// Nearest registered spore within `tolerance` of `position`.
    pub fn find_nearby_spore(
        &self,
        position: State2,
        tolerance: f64,
        exclude: Option<SporeId>,
    ) -> Option<SporeId> {
        let mut best: Option<(SporeId, f64)> = None;
        for spore in self.graph.spores() {
            if Some(spore.id) == exclude || spore.role == SporeRole::Ghost {
                continue;
            }
            let d = dist(position, spore.state_2d);
            if d <= tolerance && best.map(|(_, bd)| d < bd).unwrap_or(true) {
                best = Some((spore.id, d));
            }
        }
        best.map(|(id, _)| id)
    }

    // ========================================================================
    // 5. CANDIDATES
    // ========================================================================

    /// Regenerates the candidate field via Poisson-disk sampling. An
    /// oversized radius simply yields zero candidates.
    pub fn generate_candidate_spores(&mut self) -> usize {
        self.clear_candidates();

        let positions = self
            .spawn_area
            .sample_poisson_disk(&mut self.rng, self.min_radius);
        if positions.is_empty() {
            log::warn!(
                "no candidates generated for radius {:.3}",
                self.min_radius
            );
            return 0;
        }

        for position in positions {
            let id = self.ids.borrow_mut().alloc_spore_id();
            let candidate = Spore::new(
                id,
                self.evolution.dt,
                self.evolution.goal_position,
                position,
                self.cost,
            )
            .with_role(SporeRole::Candidate);
            self.visual
                .borrow_mut()
                .register(format!("candidate_{id}"), VisualKind::Candidate);
            self.candidates.push(candidate);
        }

        log::info!(
            "🎯 candidate field: {} spores at radius {:.3}",
            self.candidates.len(),
            self.min_radius
        );
        self.candidates.len()
    }

    /// Multiplies the Poisson radius and regenerates on any significant
    /// change. The floor keeps the field physically meaningful.
    pub fn adjust_min_radius(&mut self, multiplier: f64) {
        let old = self.min_radius;
        self.min_radius = (self.min_radius * multiplier).max(0.05);
        if (self.min_radius - old).abs() > 1e-3 {
            log::info!("min radius {:.3} -> {:.3}", old, self.min_radius);
            self.generate_candidate_spores();
        }
    }

    /// Pops a random candidate and re-inserts it as a normal spore.
    pub fn activate_random_candidate(&mut self) -> Option<SporeId> {
        if self.candidates.is_empty() {
            log::warn!("no candidates available");
            return None;
        }
        let slot = self.rng.gen_range(0..self.candidates.len());
        let candidate = self.candidates.swap_remove(slot);
        self.visual
            .borrow_mut()
            .unregister(&format!("candidate_{}", candidate.id));

        let id = self.create_spore(candidate.state_2d, SporeRole::Normal);
        log::info!(
            "candidate {} activated as spore {id} ({} left)",
            candidate.id,
            self.candidates.len()
        );
        Some(id)
    }

    /// One uniform random spore inside the spawn region.
    pub fn generate_random_spore_in_spawn_area(&mut self) -> SporeId {
        let position = self.spawn_area.sample_random_point(&mut self.rng);
        self.create_spore(position, SporeRole::Normal)
    }

    fn clear_candidates(&mut self) {
        let mut visual = self.visual.borrow_mut();
        for candidate in &self.candidates {
            visual.unregister(&format!("candidate_{}", candidate.id));
        }
        drop(visual);
        self.candidates.clear();
    }

    // ========================================================================
    // 6. CANDIDATE EVOLUTION (iterator form)
    // ========================================================================

    /// Drives every candidate to death or completion, one evolution step per
    /// `next()` call, so a driver can interleave other work.
    pub fn evolve_candidates(&mut self) -> CandidateEvolution<'_> {
        let max_steps = self.evolution.max_steps_per_candidate;
        CandidateEvolution {
            manager: self,
            active: None,
            steps_taken: 0,
            max_steps,
        }
    }

    /// Synchronous convenience: drains the iterator, returns (candidates
    /// processed, evolution steps taken).
    pub fn evolve_all_candidates_to_completion(&mut self) -> (usize, usize) {
        let mut processed = 0;
        let mut steps = 0;
        for event in self.evolve_candidates() {
            match event {
                EvolutionEvent::CandidateActivated { .. } => processed += 1,
                EvolutionEvent::Stepped { .. } => steps += 1,
                EvolutionEvent::CandidateFinished { .. } => {}
            }
        }
        log::info!(
            "candidate evolution complete: {processed} candidates, {steps} steps"
        );
        (processed, steps)
    }

    // ========================================================================
    // 7. PREVIEWS
    // ========================================================================

    /// Ghost previews around the latest evolvable spore with the fixed
    /// control palette {+u_max, -u_max, 0, u*}.
    pub fn refresh_previews(&mut self) {
        self.previews.clear();
        let Some(id) = self.last_evolvable() else {
            return;
        };
        let Some(spore) = self.graph.spore(id) else {
            return;
        };

        let (u_min, u_max) = self.pendulum.control_bounds();
        let dt = if spore.optimal_dt != 0.0 {
            spore.optimal_dt
        } else {
            spore.dt_nominal
        };
        let palette = [
            (PreviewKind::MaxPos, u_max),
            (PreviewKind::MaxNeg, u_min),
            (PreviewKind::Zero, 0.0),
            (PreviewKind::Optimal, spore.optimal_control),
        ];
        for (kind, control) in palette {
            let state = self.pendulum.step(spore.state_2d, control, dt);
            self.previews.push(SiblingPreview {
                kind,
                control,
                state,
            });
        }

        let mut visual = self.visual.borrow_mut();
        for (i, _) in self.previews.iter().enumerate() {
            visual.register(format!("preview_{i}"), VisualKind::Preview);
        }
    }

    // ========================================================================
    // 8. UNDO & WIPE
    // ========================================================================

    /// Pops the most recent creation group and destroys exactly its spores
    /// and links. Returns false with no history.
    pub fn undo_last_group(&mut self) -> bool {
        let Some(group) = self.ids.borrow_mut().undo_last() else {
            log::warn!("undo requested with empty history");
            return false;
        };

        for link_id in &group.links {
            self.graph.remove_link(*link_id);
        }
        let mut visual = self.visual.borrow_mut();
        for spore_id in &group.spores {
            self.graph.remove_spore(*spore_id);
            self.order.retain(|id| id != spore_id);
            visual.unregister(&format!("spore_{spore_id}"));
        }
        drop(visual);

        log::info!(
            "undid group: {} spores, {} links removed",
            group.spores.len(),
            group.links.len()
        );
        self.refresh_previews();
        true
    }

    /// Destroys everything: spores, links, candidates, previews, visual
    /// registrations and the undo history. Ids keep counting.
    pub fn clear_all(&mut self) {
        self.graph.clear();
        self.order.clear();
        self.previews.clear();
        self.clear_candidates();
        self.ids.borrow_mut().clear_history();
        self.visual.borrow_mut().clear();
        log::info!("real graph cleared");
    }

    /// Records a creation group (used by materialization).
    pub fn push_group(&mut self, group: CreatedGroup) {
        self.ids.borrow_mut().push_group(group);
    }

    /// Writes into the shared visual table on behalf of collaborators.
    pub fn visual_register(&mut self, key: impl Into<String>, kind: VisualKind) {
        self.visual.borrow_mut().register(key, kind);
    }
}

// ============================================================================
// 9. THE EVOLUTION ITERATOR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvolutionEvent {
    CandidateActivated { spore: SporeId },
    Stepped { from: SporeId, to: SporeId },
    CandidateFinished { spore: SporeId, reason: FinishReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Died,
    Merged,
    StepLimit,
}

pub struct CandidateEvolution<'a> {
    manager: &'a mut SporeManager,
    active: Option<SporeId>,
    steps_taken: usize,
    max_steps: usize,
}

impl Iterator for CandidateEvolution<'_> {
    type Item = EvolutionEvent;

    fn next(&mut self) -> Option<EvolutionEvent> {
        // Activate the next candidate when nothing is in flight.
        let Some(current) = self.active else {
            let activated = self.manager.activate_random_candidate()?;
            self.active = Some(activated);
            self.steps_taken = 0;
            return Some(EvolutionEvent::CandidateActivated { spore: activated });
        };

        let finish = |reason: FinishReason| EvolutionEvent::CandidateFinished {
            spore: current,
            reason,
        };

        if self.steps_taken >= self.max_steps {
            self.active = None;
            return Some(finish(FinishReason::StepLimit));
        }

        let can_evolve = self
            .manager
            .graph
            .spore(current)
            .map(|s| s.can_evolve())
            .unwrap_or(false);
        if !can_evolve {
            self.active = None;
            let merged = self
                .manager
                .graph
                .spore(current)
                .map(|s| s.is_completed())
                .unwrap_or(false);
            return Some(finish(if merged {
                FinishReason::Merged
            } else {
                FinishReason::Died
            }));
        }

        match self.manager.generate_new_spore() {
            Some(next) if next != current => {
                self.steps_taken += 1;
                let event = EvolutionEvent::Stepped {
                    from: current,
                    to: next,
                };
                self.active = Some(next);
                Some(event)
            }
            _ => {
                // No progress: report the terminal state of the current spore.
                self.active = None;
                let merged = self
                    .manager
                    .graph
                    .spore(current)
                    .map(|s| s.is_completed())
                    .unwrap_or(false);
                Some(finish(if merged {
                    FinishReason::Merged
                } else {
                    FinishReason::Died
                }))
            }
        }
    }
}
