use std::collections::HashMap;

use crate::tt::{Id, LocalContext, Name, Term};

/// A type-class instance visible at a hole's declaration point.
#[derive(Debug, Clone)]
pub struct LocalInstance {
    pub class_name: Name,
    pub local: Id,
}

/// Declaration of a hole (metavariable).
#[derive(Debug, Clone)]
pub struct HoleDecl {
    pub id: Id,
    /// The local context the hole was declared in; bounds which locals may
    /// appear in its eventual assignment.
    pub lctx: LocalContext,
    pub ty: Term,
    /// Generation counter at declaration time. Never decreases.
    pub depth: usize,
    /// Created by the system, not the user.
    pub synthetic: bool,
    /// Never eligible for direct assignment by this engine.
    pub read_only: bool,
    pub local_instances: Vec<LocalInstance>,
}

/// The sole piece of shared mutable state of the engine: hole declarations,
/// their assignments, and delayed values for synthetic holes.
///
/// Assignments are visible immediately to sibling recursive calls. Nothing
/// here rolls back on failure; callers that need a clean retry must snapshot
/// and restore externally.
#[derive(Debug, Clone, Default)]
pub struct HoleContext {
    decls: HashMap<Id, HoleDecl>,
    assignments: HashMap<Id, Term>,
    pending: HashMap<Id, Term>,
    depth: usize,
}

impl HoleContext {
    pub fn new() -> HoleContext {
        HoleContext::default()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn bump_depth(&mut self) {
        self.depth += 1;
    }

    pub fn declare(&mut self, decl: HoleDecl) {
        debug_assert!(!self.decls.contains_key(&decl.id));
        self.decls.insert(decl.id, decl);
    }

    /// Declares a fresh hole at the current depth and returns its id.
    pub fn mk_hole(&mut self, lctx: LocalContext, ty: Term) -> Id {
        let id = Id::fresh();
        self.declare(HoleDecl {
            id,
            lctx,
            ty,
            depth: self.depth,
            synthetic: false,
            read_only: false,
            local_instances: vec![],
        });
        id
    }

    pub fn get_decl(&self, id: Id) -> Option<&HoleDecl> {
        self.decls.get(&id)
    }

    pub fn is_declared(&self, id: Id) -> bool {
        self.decls.contains_key(&id)
    }

    pub fn is_assigned(&self, id: Id) -> bool {
        self.assignments.contains_key(&id)
    }

    pub fn get_assignment(&self, id: Id) -> Option<&Term> {
        self.assignments.get(&id)
    }

    /// Records `id := value`. A hole is assigned at most once; re-assignment
    /// indicates a broken caller invariant.
    pub fn assign(&mut self, id: Id, value: Term) {
        debug_assert!(self.is_declared(id));
        debug_assert!(!self.is_assigned(id));
        log::trace!("assign ?{id} := {value}");
        self.assignments.insert(id, value);
    }

    /// Whether this engine may assign `id` directly.
    pub fn is_assignable(&self, id: Id) -> bool {
        match self.decls.get(&id) {
            Some(decl) => !decl.read_only && !decl.synthetic && decl.depth == self.depth,
            None => false,
        }
    }

    /// Registers a delayed value for a synthetic hole (e.g. an unfinished
    /// type-class search) that can later be forced.
    pub fn set_pending(&mut self, id: Id, value: Term) {
        debug_assert!(self.is_declared(id));
        self.pending.insert(id, value);
    }

    pub fn get_pending(&self, id: Id) -> Option<&Term> {
        self.pending.get(&id)
    }

    /// Promotes the pending value of `id` to a real assignment. Returns
    /// false if there is nothing to resolve.
    pub fn resolve_pending(&mut self, id: Id) -> bool {
        if self.assignments.contains_key(&id) {
            return false;
        }
        let Some(value) = self.pending.remove(&id) else {
            return false;
        };
        log::trace!("resolve pending ?{id} := {value}");
        self.assignments.insert(id, value);
        true
    }

    /// Substitutes every assigned hole occurring in `term`.
    pub fn instantiate(&self, term: &Term) -> Term {
        term.replace_hole(&|id| self.assignments.get(&id).cloned())
    }
}
