use std::cmp::Ordering;
use std::collections::HashMap;
use std::iter::zip;

use anyhow::bail;
use thiserror::Error;

use crate::env::{succ_offset, Env, Transparency};
use crate::meta::{HoleContext, HoleDecl, LocalInstance};
use crate::tt::{
    is_def_eq_levels, mk_abs_kinded, mk_app, mk_hole, mk_lit, mk_local, mk_mdata, mk_proj, mk_var,
    BinderKind, Id, LocalContext, LocalDecl, Term,
};

/// Outcome of a single comparison strategy. `Undef` is not failure; it means
/// "try the next strategy".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tri {
    True,
    False,
    Undef,
}

impl From<bool> for Tri {
    fn from(value: bool) -> Tri {
        if value {
            Tri::True
        } else {
            Tri::False
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Unify spines positionally when no pattern solution exists.
    pub first_order_approx: bool,
    /// Narrow over-broad holes through auxiliary holes.
    pub ctx_approx: bool,
    /// Accept pattern parameters that already live in the hole's declaring
    /// context.
    pub quasi_pattern: bool,
    pub transparency: Transparency,
    /// Report a hard error instead of deferring when both heads are
    /// unassignable holes.
    pub stuck_is_error: bool,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            first_order_approx: true,
            ctx_approx: true,
            quasi_pattern: false,
            transparency: Transparency::Default,
            stuck_is_error: false,
        }
    }
}

/// Reasons an assignment attempt is abandoned. All of these except
/// `UnknownHole` are recovered at the assignment boundary and turned into an
/// ordinary negative answer; `UnknownHole` indicates caller misuse and always
/// propagates.
#[derive(Debug, Error)]
pub enum AssignError {
    #[error("occurs check failed for ?{0}")]
    OccursCheck(Id),
    #[error("local ${0} is out of scope for ?{1}")]
    OutOfScopeLocal(Id, Id),
    #[error("?{0} cannot be narrowed")]
    ReadOnlyWithBiggerContext(Id),
    #[error("type of ?{0} is ill-formed in the narrowed context")]
    IllFormedTypeInNarrowedContext(Id),
    #[error("unknown hole ?{0}")]
    UnknownHole(Id),
    #[error("solution does not match the declared type of ?{0}")]
    TypeMismatchOnFinalize(Id),
    #[error("equality is stuck on an unassignable hole")]
    Stuck,
    #[error("constraint is not solvable as a pattern")]
    UseFirstOrder,
}

fn head_hole(term: &Term) -> Option<Id> {
    match term.head() {
        Term::Hole(inner) => Some(inner.id),
        _ => None,
    }
}

fn collect_locals(term: &Term, acc: &mut Vec<Id>) {
    if !term.has_local() {
        return;
    }
    match term {
        Term::Local(inner) => {
            if !acc.contains(&inner.id) {
                acc.push(inner.id);
            }
        }
        Term::Var(_) | Term::Hole(_) | Term::Lit(_) | Term::Sort(_) | Term::Const(_) => {}
        Term::App(inner) => {
            collect_locals(&inner.fun, acc);
            collect_locals(&inner.arg, acc);
        }
        Term::Abs(inner) => {
            collect_locals(&inner.binder_type, acc);
            collect_locals(&inner.body, acc);
        }
        Term::Pi(inner) => {
            collect_locals(&inner.binder_type, acc);
            collect_locals(&inner.body, acc);
        }
        Term::Let(inner) => {
            collect_locals(&inner.binder_type, acc);
            collect_locals(&inner.value, acc);
            collect_locals(&inner.body, acc);
        }
        Term::Proj(inner) => collect_locals(&inner.arg, acc),
        Term::Mdata(inner) => collect_locals(&inner.inner, acc),
    }
}

/// The equality engine. One value per top-level query; the memo cache is
/// scoped to that query, while hole assignments persist in the shared
/// [`HoleContext`].
///
/// Assignments are made as soon as a sub-constraint succeeds and are never
/// rolled back here; a caller that wants to retry from a clean state must
/// snapshot the hole context beforehand.
pub struct DefEq<'a> {
    env: Env<'a>,
    holes: &'a mut HoleContext,
    lctx: LocalContext,
    local_instances: Vec<LocalInstance>,
    config: Config,
    /// Memo keyed by the pointer identity of the two sides. Each entry owns
    /// clones of the keyed terms: an entry must keep its addresses alive, or
    /// a later allocation could reuse them and inherit the verdict.
    cache: HashMap<(usize, usize), (bool, Term, Term)>,
}

impl<'a> DefEq<'a> {
    pub fn new(
        env: Env<'a>,
        holes: &'a mut HoleContext,
        lctx: LocalContext,
        config: Config,
    ) -> DefEq<'a> {
        DefEq {
            env,
            holes,
            lctx,
            local_instances: vec![],
            config,
            cache: HashMap::new(),
        }
    }

    pub fn is_def_eq(&mut self, t: &Term, s: &Term) -> anyhow::Result<bool> {
        let key = (t.addr(), s.addr());
        if let Some(&(hit, ..)) = self.cache.get(&key) {
            return Ok(hit);
        }
        log::trace!("{t} =?= {s}");
        let result = self.check(t, s)?;
        // a negative answer involving holes may be invalidated by a later
        // assignment, so only hole-free negatives are memoized
        if result || (!t.has_hole() && !s.has_hole()) {
            self.cache.insert(key, (result, t.clone(), s.clone()));
        }
        Ok(result)
    }

    fn check(&mut self, t: &Term, s: &Term) -> anyhow::Result<bool> {
        match self.quick_check(t, s)? {
            Tri::True => return Ok(true),
            Tri::False => return Ok(false),
            Tri::Undef => {}
        }
        if let Some(result) = self.proof_irrelevance(t, s)? {
            return Ok(result);
        }
        let mut t_n = self.env.whnf_core(self.holes, &self.lctx, t);
        let mut s_n = self.env.whnf_core(self.holes, &self.lctx, s);
        if !t_n.ptr_eq(t) || !s_n.ptr_eq(s) {
            match self.quick_check(&t_n, &s_n)? {
                Tri::True => return Ok(true),
                Tri::False => return Ok(false),
                Tri::Undef => {}
            }
        }
        if let Some(result) = self.offset_shortcut(&t_n, &s_n)? {
            return Ok(result);
        }
        match self.lazy_delta(&mut t_n, &mut s_n)? {
            Tri::True => return Ok(true),
            Tri::False => return Ok(false),
            Tri::Undef => {}
        }
        if let Some(result) = self.try_eta(&t_n, &s_n)? {
            return Ok(result);
        }
        match (t_n.strip_mdata(), s_n.strip_mdata()) {
            (Term::Const(a), Term::Const(b)) if a.name == b.name => {
                return Ok(is_def_eq_levels(&a.levels, &b.levels));
            }
            (Term::Proj(a), Term::Proj(b))
                if a.struct_name == b.struct_name && a.field == b.field =>
            {
                let (x, y) = (a.arg.clone(), b.arg.clone());
                return self.is_def_eq(&x, &y);
            }
            (Term::Abs(_), Term::Abs(_)) | (Term::Pi(_), Term::Pi(_)) => {
                return self.is_def_eq_binding(&t_n, &s_n);
            }
            _ => {}
        }
        if t_n.is_app() && s_n.is_app() {
            let t_head = t_n.head().clone();
            let s_head = s_n.head().clone();
            if self.is_def_eq(&t_head, &s_head)? {
                let t_args: Vec<Term> = t_n.args().into_iter().cloned().collect();
                let s_args: Vec<Term> = s_n.args().into_iter().cloned().collect();
                if self.is_def_eq_args(&t_head, &t_args, &s_args)? {
                    return Ok(true);
                }
            }
        }
        // a hole with a delayed value may be blocking reduction; force it
        // once and start over
        if self.try_unstuck(&t_n) || self.try_unstuck(&s_n) {
            let t_n = self.holes.instantiate(&t_n);
            let s_n = self.holes.instantiate(&s_n);
            return self.check(&t_n, &s_n);
        }
        Ok(false)
    }

    /// Cheap syntactic pre-filter. Also the sole dispatcher into the
    /// assignment pipeline, which keeps hole solving ahead of any unfolding.
    fn quick_check(&mut self, t: &Term, s: &Term) -> anyhow::Result<Tri> {
        let t = t.strip_mdata();
        let s = s.strip_mdata();
        if t.ptr_eq(s) {
            return Ok(Tri::True);
        }
        match (t, s) {
            (Term::Lit(a), Term::Lit(b)) => return Ok(Tri::from(a.value == b.value)),
            (Term::Sort(a), Term::Sort(b)) => {
                return Ok(Tri::from(crate::tt::is_def_eq_level(&a.level, &b.level)));
            }
            (Term::Local(a), Term::Local(b)) => {
                // let-bound locals compare by value, not identity; defer to
                // the reducer
                let let_bound =
                    |x: Id| self.lctx.get(x).is_some_and(LocalDecl::is_let_bound);
                if let_bound(a.id) || let_bound(b.id) {
                    return Ok(Tri::Undef);
                }
                return Ok(Tri::from(a.id == b.id));
            }
            _ => {}
        }
        if let Some(result) = self.try_eta(t, s)? {
            return Ok(Tri::from(result));
        }
        let t_hole = head_hole(t);
        let s_hole = head_hole(s);
        if t_hole.is_none() && s_hole.is_none() {
            return Ok(Tri::Undef);
        }
        if let Some(m) = t_hole {
            if self.resolve_head(m) {
                let t = self.holes.instantiate(t);
                return self.quick_check(&t, s);
            }
        }
        if let Some(m) = s_hole {
            if self.resolve_head(m) {
                let s = self.holes.instantiate(s);
                return self.quick_check(t, &s);
            }
        }
        let t_assignable = t_hole.is_some_and(|m| self.holes.is_assignable(m));
        let s_assignable = s_hole.is_some_and(|m| self.holes.is_assignable(m));
        if t_assignable && s_assignable {
            // assign the hole with the larger declaring context: a solution
            // in the smaller context is valid in more places
            let (t_sub, s_sub) = {
                let t_decl = t_hole.and_then(|m| self.holes.get_decl(m));
                let s_decl = s_hole.and_then(|m| self.holes.get_decl(m));
                match (t_decl, s_decl) {
                    (Some(a), Some(b)) => (
                        a.lctx.is_sub_prefix_of(&b.lctx),
                        b.lctx.is_sub_prefix_of(&a.lctx),
                    ),
                    _ => (true, true),
                }
            };
            let assign_left = match (t_sub, s_sub) {
                (false, _) => true,
                (true, false) => false,
                // tie: keep application-shaped terms on the value side
                (true, true) => !(t.is_app() && !s.is_app()),
            };
            return if assign_left {
                Ok(Tri::from(self.process_assignment(t, s)?))
            } else {
                Ok(Tri::from(self.process_assignment(s, t)?))
            };
        }
        if t_assignable {
            return Ok(Tri::from(self.process_assignment(t, s)?));
        }
        if s_assignable {
            return Ok(Tri::from(self.process_assignment(s, t)?));
        }
        if self.config.stuck_is_error {
            return Err(AssignError::Stuck.into());
        }
        Ok(Tri::Undef)
    }

    /// Makes the head hole's value visible, if it has one. Returns whether
    /// instantiating is now worthwhile.
    fn resolve_head(&mut self, m: Id) -> bool {
        if self.holes.is_assigned(m) {
            return true;
        }
        let synthetic = self.holes.get_decl(m).is_some_and(|decl| decl.synthetic);
        if synthetic && self.holes.get_pending(m).is_some() {
            return self.holes.resolve_pending(m);
        }
        false
    }

    fn try_unstuck(&mut self, t: &Term) -> bool {
        let reduced = self.env.whnf_core(self.holes, &self.lctx, t);
        match reduced.head() {
            Term::Hole(inner) => self.holes.resolve_pending(inner.id),
            _ => false,
        }
    }

    /// `t =?= s` with `t` a lambda and `s` not: wrap `s` in a pointwise
    /// application and recurse, provided `s` has a function type.
    fn try_eta(&mut self, t: &Term, s: &Term) -> anyhow::Result<Option<bool>> {
        if t.is_abs() && !s.is_abs() {
            if let Some(result) = self.eta_expand_right(t, s)? {
                return Ok(Some(result));
            }
        }
        if s.is_abs() && !t.is_abs() {
            if let Some(result) = self.eta_expand_right(s, t)? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    fn eta_expand_right(&mut self, lam: &Term, other: &Term) -> anyhow::Result<Option<bool>> {
        let Ok(ty) = self.env.infer_type(self.holes, &self.lctx, other) else {
            return Ok(None);
        };
        let ty = self.env.whnf(self.holes, &self.lctx, &ty, self.config.transparency);
        let Term::Pi(pi) = ty.strip_mdata() else {
            return Ok(None);
        };
        let expanded = mk_abs_kinded(
            pi.binder_name.clone(),
            pi.binder_kind,
            pi.binder_type.clone(),
            mk_app(other.clone(), mk_var(0)),
        );
        Ok(Some(self.is_def_eq(lam, &expanded)?))
    }

    /// `λ x₁…xₙ. ?m x₁…xₙ` with `?m` unassigned and assignable: an
    /// eta-expanded unresolved pattern, solvable right away rather than worth
    /// postponing.
    fn is_eta_unassigned_hole(&self, term: &Term) -> bool {
        let mut body = term.strip_mdata();
        let mut depth = 0;
        while let Term::Abs(inner) = body {
            body = inner.body.strip_mdata();
            depth += 1;
        }
        let Term::Hole(inner) = body.head() else {
            return false;
        };
        if self.holes.is_assigned(inner.id) || !self.holes.is_assignable(inner.id) {
            return false;
        }
        let args = body.args();
        args.len() == depth
            && args
                .iter()
                .enumerate()
                .all(|(i, arg)| {
                    matches!(arg.strip_mdata(), Term::Var(v) if v.index == depth - 1 - i)
                })
    }

    /// Compares two same-shape binder telescopes under fresh locals,
    /// registering class-typed domains as local instances along the way.
    fn is_def_eq_binding(&mut self, t: &Term, s: &Term) -> anyhow::Result<bool> {
        let saved_lctx = self.lctx.decls.len();
        let saved_instances = self.local_instances.len();
        let result = self.binding_loop(t.strip_mdata().clone(), s.strip_mdata().clone());
        self.lctx.decls.truncate(saved_lctx);
        self.local_instances.truncate(saved_instances);
        result
    }

    fn binding_loop(&mut self, mut t: Term, mut s: Term) -> anyhow::Result<bool> {
        loop {
            let (t_dom, t_body, binder_name, binder_kind, s_dom, s_body) = match (&t, &s) {
                (Term::Abs(a), Term::Abs(b)) => (
                    a.binder_type.clone(),
                    a.body.clone(),
                    a.binder_name.clone(),
                    a.binder_kind,
                    b.binder_type.clone(),
                    b.body.clone(),
                ),
                (Term::Pi(a), Term::Pi(b)) => (
                    a.binder_type.clone(),
                    a.body.clone(),
                    a.binder_name.clone(),
                    a.binder_kind,
                    b.binder_type.clone(),
                    b.body.clone(),
                ),
                _ => break,
            };
            if !t_dom.ptr_eq(&s_dom) && !self.is_def_eq(&t_dom, &s_dom)? {
                return Ok(false);
            }
            let x = match &binder_name {
                Some(name) => Id::fresh_with_name(name.clone()),
                None => Id::fresh(),
            };
            let dom_w = self
                .env
                .whnf(self.holes, &self.lctx, &t_dom, Transparency::Reducible);
            if let Some(class_name) = self.env.is_class(&dom_w) {
                self.local_instances.push(LocalInstance {
                    class_name,
                    local: x,
                });
            }
            self.lctx.push(LocalDecl::new(x, t_dom).with_kind(binder_kind));
            let t_next = t_body.open(&[mk_local(x)], 0);
            let s_next = s_body.open(&[mk_local(x)], 0);
            t = t_next.strip_mdata().clone();
            s = s_next.strip_mdata().clone();
        }
        self.is_def_eq(&t, &s)
    }

    /// Two-pass spine comparison for a common head. Explicit positions are
    /// compared in order; implicit and instance positions wait until the
    /// explicit ones have pinned down more of the holes.
    fn is_def_eq_args(
        &mut self,
        fun: &Term,
        t_args: &[Term],
        s_args: &[Term],
    ) -> anyhow::Result<bool> {
        if t_args.len() != s_args.len() {
            return Ok(false);
        }
        let kinds = self.binder_kinds(fun, t_args);
        let mut postponed: Vec<(usize, BinderKind)> = vec![];
        for (i, (a, b)) in zip(t_args, s_args).enumerate() {
            let kind = kinds.get(i).copied().unwrap_or(BinderKind::Explicit);
            if kind.is_explicit() || self.is_eta_unassigned_hole(a) || self.is_eta_unassigned_hole(b)
            {
                if !self.is_def_eq(a, b)? {
                    return Ok(false);
                }
            } else {
                postponed.push((i, kind));
            }
        }
        for (i, kind) in postponed {
            if kind.is_inst_implicit() {
                self.force_pending(&t_args[i]);
                self.force_pending(&s_args[i]);
                // instance arguments always unfold at least default-eligible
                // definitions
                let saved = self.config.transparency;
                if saved < Transparency::Default {
                    self.config.transparency = Transparency::Default;
                }
                let result = self.is_def_eq(&t_args[i], &s_args[i]);
                self.config.transparency = saved;
                if !result? {
                    return Ok(false);
                }
            } else if !self.is_def_eq(&t_args[i], &s_args[i])? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn binder_kinds(&mut self, fun: &Term, args: &[Term]) -> Vec<BinderKind> {
        let mut kinds = Vec::with_capacity(args.len());
        let Ok(mut ty) = self.env.infer_type(self.holes, &self.lctx, fun) else {
            return kinds;
        };
        for arg in args {
            ty = self
                .env
                .whnf(self.holes, &self.lctx, &ty, Transparency::Default);
            let Term::Pi(pi) = ty.strip_mdata() else {
                break;
            };
            kinds.push(pi.binder_kind);
            ty = pi.body.open(std::slice::from_ref(arg), 0);
        }
        kinds
    }

    fn force_pending(&mut self, term: &Term) {
        if let Term::Hole(inner) = term.head() {
            self.holes.resolve_pending(inner.id);
        }
    }

    /// `?hole a₁…aₙ =?= s`, with `?hole` assignable. Classifies the spine as
    /// a pattern, scope-checks the candidate value, abstracts it over the
    /// parameters, and commits the assignment after a final type check.
    fn process_assignment(&mut self, t: &Term, s: &Term) -> anyhow::Result<bool> {
        let Some(hole) = head_hole(t) else {
            return Ok(false);
        };
        if self.holes.is_assigned(hole) {
            let t = self.holes.instantiate(t);
            return self.is_def_eq(&t, s);
        }
        let (hole_lctx, hole_ty) = match self.holes.get_decl(hole) {
            Some(decl) => (decl.lctx.clone(), decl.ty.clone()),
            None => bail!(AssignError::UnknownHole(hole)),
        };
        let mut fvars: Vec<Id> = vec![];
        let mut pattern = true;
        for arg in t.args() {
            let arg = self.normalize_pattern_arg(arg);
            match &arg {
                Term::Local(inner)
                    if !fvars.contains(&inner.id)
                        && (self.config.quasi_pattern || !hole_lctx.contains(inner.id)) =>
                {
                    fvars.push(inner.id);
                }
                _ => {
                    pattern = false;
                    break;
                }
            }
        }
        if !pattern {
            log::trace!("spine of ?{hole} is not a pattern");
            return self.first_order(t, s);
        }
        let value = self.holes.instantiate(s);
        let checked = if self.check_assignment_quick(hole, &hole_lctx, &fvars, &value) {
            value
        } else {
            match self.check_assignment(hole, &hole_lctx, &fvars, &value) {
                Ok(checked) => checked,
                Err(err) => return self.recover(err, t, s),
            }
        };
        // abstracting a parameter that other locals' types depend on would
        // produce an ill-typed lambda
        if fvars.iter().any(|x| hole_lctx.contains(*x))
            && !self.abstraction_well_typed(&checked, &fvars)
        {
            log::trace!("abstraction for ?{hole} would be ill-typed");
            return self.first_order(t, s);
        }
        let mut solution = checked;
        for &x in fvars.iter().rev() {
            let Some(decl) = self.lctx.get(x) else {
                bail!("pattern parameter {x} is not in the ambient context");
            };
            let (binder_name, binder_kind, binder_type) =
                (decl.name.clone(), decl.kind, decl.ty.clone());
            solution = mk_abs_kinded(binder_name, binder_kind, binder_type, solution.close(&[x], 0));
        }
        let solution_ty = match self.env.infer_type(self.holes, &self.lctx, &solution) {
            Ok(ty) => ty,
            Err(err) => {
                log::debug!("cannot type the solution for ?{hole}: {err:#}");
                return Ok(false);
            }
        };
        if !self.is_def_eq(&solution_ty, &hole_ty)? {
            log::debug!("{}", AssignError::TypeMismatchOnFinalize(hole));
            return Ok(false);
        }
        // a recursive call above may have solved the hole already
        if self.holes.is_assigned(hole) {
            let t = self.holes.instantiate(t);
            return self.is_def_eq(&t, s);
        }
        self.holes.assign(hole, solution);
        Ok(true)
    }

    fn normalize_pattern_arg(&self, arg: &Term) -> Term {
        let mut arg = self.holes.instantiate(arg);
        loop {
            let stripped = arg.strip_mdata().clone();
            if let Term::Local(inner) = &stripped {
                if let Some(value) = self.lctx.get(inner.id).and_then(|d| d.value.clone()) {
                    arg = value;
                    continue;
                }
            }
            return stripped;
        }
    }

    fn recover(&mut self, err: anyhow::Error, t: &Term, s: &Term) -> anyhow::Result<bool> {
        match err.downcast_ref::<AssignError>() {
            Some(AssignError::UnknownHole(_)) | None => Err(err),
            Some(kind) => {
                log::debug!("assignment attempt failed: {kind}");
                self.first_order(t, s)
            }
        }
    }

    fn abstraction_well_typed(&self, checked: &Term, fvars: &[Id]) -> bool {
        let mut locals = vec![];
        collect_locals(checked, &mut locals);
        for y in locals {
            if fvars.contains(&y) {
                continue;
            }
            let Some(decl) = self.lctx.get(y) else {
                continue;
            };
            if fvars.iter().any(|&x| decl.ty.contains_local(x)) {
                return false;
            }
        }
        true
    }

    /// Precise scope check for `?hole := value` with `fvars` as the
    /// abstracted parameters. Returns the value with let-bound locals
    /// unfolded, assigned holes substituted, and over-broad holes narrowed
    /// through auxiliaries.
    fn check_assignment(
        &mut self,
        hole: Id,
        hole_lctx: &LocalContext,
        fvars: &[Id],
        value: &Term,
    ) -> anyhow::Result<Term> {
        if !value.has_local() && !value.has_hole() {
            return Ok(value.clone());
        }
        match value {
            Term::Local(inner) => {
                let x = inner.id;
                if hole_lctx.contains(x) {
                    return Ok(value.clone());
                }
                if !fvars.contains(&x) {
                    if let Some(bound) = self.lctx.get(x).and_then(|d| d.value.clone()) {
                        return self.check_assignment(hole, hole_lctx, fvars, &bound);
                    }
                }
                if fvars.contains(&x) {
                    return Ok(value.clone());
                }
                Err(AssignError::OutOfScopeLocal(x, hole).into())
            }
            Term::Hole(inner) => {
                let n = inner.id;
                if let Some(assigned) = self.holes.get_assignment(n) {
                    let assigned = assigned.clone();
                    return self.check_assignment(hole, hole_lctx, fvars, &assigned);
                }
                if n == hole {
                    return Err(AssignError::OccursCheck(hole).into());
                }
                let (n_is_sub, hole_is_sub, narrowable, n_ty) = match self.holes.get_decl(n) {
                    Some(decl) => (
                        decl.lctx.is_sub_prefix_of(hole_lctx),
                        hole_lctx.is_sub_prefix_of(&decl.lctx),
                        decl.depth == self.holes.depth() && !decl.synthetic && !decl.read_only,
                        decl.ty.clone(),
                    ),
                    None => return Err(AssignError::UnknownHole(n).into()),
                };
                if n_is_sub {
                    return Ok(value.clone());
                }
                if !narrowable {
                    return Err(AssignError::ReadOnlyWithBiggerContext(n).into());
                }
                if self.config.ctx_approx && hole_is_sub {
                    // known to be imprecise for some dependent shapes; the
                    // kernel re-checks whatever this solves
                    let ty = match self.check_assignment(hole, hole_lctx, &[], &n_ty) {
                        Ok(ty) => ty,
                        Err(err) => match err.downcast_ref::<AssignError>() {
                            Some(AssignError::UnknownHole(_)) | None => return Err(err),
                            Some(_) => {
                                return Err(
                                    AssignError::IllFormedTypeInNarrowedContext(n).into()
                                );
                            }
                        },
                    };
                    let aux = Id::fresh();
                    self.holes.declare(HoleDecl {
                        id: aux,
                        lctx: hole_lctx.clone(),
                        ty,
                        depth: self.holes.depth(),
                        synthetic: false,
                        read_only: false,
                        local_instances: self.local_instances.clone(),
                    });
                    let aux_term = mk_hole(aux);
                    self.holes.assign(n, aux_term.clone());
                    return Ok(aux_term);
                }
                Err(AssignError::UseFirstOrder.into())
            }
            Term::Var(_) | Term::Lit(_) | Term::Sort(_) | Term::Const(_) => Ok(value.clone()),
            Term::App(inner) => {
                let fun = self.check_assignment(hole, hole_lctx, fvars, &inner.fun)?;
                let arg = self.check_assignment(hole, hole_lctx, fvars, &inner.arg)?;
                if inner.fun.ptr_eq(&fun) && inner.arg.ptr_eq(&arg) {
                    Ok(value.clone())
                } else {
                    Ok(mk_app(fun, arg))
                }
            }
            Term::Abs(inner) => {
                let binder_type =
                    self.check_assignment(hole, hole_lctx, fvars, &inner.binder_type)?;
                let body = self.check_assignment(hole, hole_lctx, fvars, &inner.body)?;
                if inner.binder_type.ptr_eq(&binder_type) && inner.body.ptr_eq(&body) {
                    Ok(value.clone())
                } else {
                    Ok(mk_abs_kinded(
                        inner.binder_name.clone(),
                        inner.binder_kind,
                        binder_type,
                        body,
                    ))
                }
            }
            Term::Pi(inner) => {
                let binder_type =
                    self.check_assignment(hole, hole_lctx, fvars, &inner.binder_type)?;
                let body = self.check_assignment(hole, hole_lctx, fvars, &inner.body)?;
                if inner.binder_type.ptr_eq(&binder_type) && inner.body.ptr_eq(&body) {
                    Ok(value.clone())
                } else {
                    Ok(crate::tt::mk_pi_kinded(
                        inner.binder_name.clone(),
                        inner.binder_kind,
                        binder_type,
                        body,
                    ))
                }
            }
            Term::Let(inner) => {
                let binder_type =
                    self.check_assignment(hole, hole_lctx, fvars, &inner.binder_type)?;
                let bound = self.check_assignment(hole, hole_lctx, fvars, &inner.value)?;
                let body = self.check_assignment(hole, hole_lctx, fvars, &inner.body)?;
                if inner.binder_type.ptr_eq(&binder_type)
                    && inner.value.ptr_eq(&bound)
                    && inner.body.ptr_eq(&body)
                {
                    Ok(value.clone())
                } else {
                    Ok(crate::tt::mk_let(
                        inner.binder_name.clone(),
                        binder_type,
                        bound,
                        body,
                    ))
                }
            }
            Term::Proj(inner) => {
                let arg = self.check_assignment(hole, hole_lctx, fvars, &inner.arg)?;
                if inner.arg.ptr_eq(&arg) {
                    Ok(value.clone())
                } else {
                    Ok(mk_proj(inner.struct_name.clone(), inner.field, arg))
                }
            }
            Term::Mdata(inner) => {
                let body = self.check_assignment(hole, hole_lctx, fvars, &inner.inner)?;
                if inner.inner.ptr_eq(&body) {
                    Ok(value.clone())
                } else {
                    Ok(mk_mdata(inner.annot.clone(), body))
                }
            }
        }
    }

    /// Mirror of [`check_assignment`](Self::check_assignment) that performs no
    /// substitution and creates nothing. Returns true only when the value is
    /// definitely usable as-is; anything it cannot decide safely is false and
    /// takes the precise path.
    fn check_assignment_quick(
        &self,
        hole: Id,
        hole_lctx: &LocalContext,
        fvars: &[Id],
        value: &Term,
    ) -> bool {
        if !value.has_local() && !value.has_hole() {
            return true;
        }
        match value {
            Term::Local(inner) => hole_lctx.contains(inner.id) || fvars.contains(&inner.id),
            Term::Hole(inner) => {
                if inner.id == hole || self.holes.is_assigned(inner.id) {
                    return false;
                }
                match self.holes.get_decl(inner.id) {
                    Some(decl) => decl.lctx.is_sub_prefix_of(hole_lctx),
                    None => false,
                }
            }
            Term::Var(_) | Term::Lit(_) | Term::Sort(_) | Term::Const(_) => true,
            Term::App(inner) => {
                self.check_assignment_quick(hole, hole_lctx, fvars, &inner.fun)
                    && self.check_assignment_quick(hole, hole_lctx, fvars, &inner.arg)
            }
            Term::Abs(inner) => {
                self.check_assignment_quick(hole, hole_lctx, fvars, &inner.binder_type)
                    && self.check_assignment_quick(hole, hole_lctx, fvars, &inner.body)
            }
            Term::Pi(inner) => {
                self.check_assignment_quick(hole, hole_lctx, fvars, &inner.binder_type)
                    && self.check_assignment_quick(hole, hole_lctx, fvars, &inner.body)
            }
            Term::Let(inner) => {
                self.check_assignment_quick(hole, hole_lctx, fvars, &inner.binder_type)
                    && self.check_assignment_quick(hole, hole_lctx, fvars, &inner.value)
                    && self.check_assignment_quick(hole, hole_lctx, fvars, &inner.body)
            }
            Term::Proj(inner) => self.check_assignment_quick(hole, hole_lctx, fvars, &inner.arg),
            Term::Mdata(inner) => self.check_assignment_quick(hole, hole_lctx, fvars, &inner.inner),
        }
    }

    /// Spine alignment for `?hole a₁…aₙ =?= s` when no pattern solution
    /// exists. Unsound on purpose; the kernel has the final word.
    fn first_order(&mut self, t: &Term, s: &Term) -> anyhow::Result<bool> {
        if !self.config.first_order_approx || t.args().is_empty() {
            return Ok(false);
        }
        log::trace!("spine approximation: {t} =?= {s}");
        let mut s = s.clone();
        loop {
            if !s.is_app() {
                match self.env.unfold_definition(&s, self.config.transparency) {
                    Some(next) => {
                        s = self.env.whnf_core(self.holes, &self.lctx, &next);
                        continue;
                    }
                    None => return Ok(false),
                }
            }
            let t_args: Vec<Term> = t.args().into_iter().cloned().collect();
            let s_args: Vec<Term> = s.args().into_iter().cloned().collect();
            let (t_head, t_args, s_head, s_args) = if t_args.len() >= s_args.len() {
                let extra = t_args.len() - s_args.len();
                (
                    t.head().apply(t_args[..extra].iter().cloned()),
                    t_args[extra..].to_vec(),
                    s.head().clone(),
                    s_args,
                )
            } else {
                let extra = s_args.len() - t_args.len();
                (
                    t.head().clone(),
                    t_args,
                    s.head().apply(s_args[..extra].iter().cloned()),
                    s_args[extra..].to_vec(),
                )
            };
            for (a, b) in zip(&t_args, &s_args) {
                if !self.is_def_eq(a, b)? {
                    return Ok(false);
                }
            }
            return self.is_def_eq(&t_head, &s_head);
        }
    }

    /// Unfolds one or both sides until the heads can be compared without
    /// delta, choosing sides by projection status, reducibility, and the
    /// per-symbol hint order. `Undef` means no side made progress.
    fn lazy_delta(&mut self, t: &mut Term, s: &mut Term) -> anyhow::Result<Tri> {
        loop {
            let t_redex = self.env.is_delta_redex(t, self.config.transparency);
            let s_redex = self.env.is_delta_redex(s, self.config.transparency);
            match (t_redex, s_redex) {
                (false, false) => return Ok(Tri::Undef),
                (true, false) => {
                    if !self.unfold_into(t) {
                        return Ok(Tri::Undef);
                    }
                }
                (false, true) => {
                    if !self.unfold_into(s) {
                        return Ok(Tri::Undef);
                    }
                }
                (true, true) => {
                    if let Some(result) = self.delta_both(t, s)? {
                        return Ok(result);
                    }
                }
            }
        }
    }

    fn unfold_into(&mut self, t: &mut Term) -> bool {
        match self.env.unfold_definition(t, self.config.transparency) {
            Some(next) => {
                *t = self.env.whnf_core(self.holes, &self.lctx, &next);
                true
            }
            None => false,
        }
    }

    fn delta_both(&mut self, t: &mut Term, s: &mut Term) -> anyhow::Result<Option<Tri>> {
        let t_name = t.head().const_name().cloned();
        let s_name = s.head().const_name().cloned();
        let (Some(t_name), Some(s_name)) = (t_name, s_name) else {
            self.unfold_into(t);
            self.unfold_into(s);
            return Ok(None);
        };
        if t_name == s_name {
            // same constant: argument congruence is cheaper than unfolding
            if self.try_congruence(t, s)? {
                return Ok(Some(Tri::True));
            }
            self.unfold_into(t);
            self.unfold_into(s);
            return Ok(None);
        }
        let t_proj = self.env.is_projection_app(t);
        let s_proj = self.env.is_projection_app(s);
        if t_proj != s_proj {
            if t_proj {
                self.unfold_into(t);
            } else {
                self.unfold_into(s);
            }
            return Ok(None);
        }
        let reducible = |name: &crate::tt::Name| {
            self.env.get_const(name).is_some_and(|info| info.reducible)
        };
        let t_reducible = reducible(&t_name);
        let s_reducible = reducible(&s_name);
        if t_reducible != s_reducible {
            if t_reducible {
                self.unfold_into(t);
            } else {
                self.unfold_into(s);
            }
            return Ok(None);
        }
        if !t.has_hole() && !s.has_hole() {
            match self.env.unfold_hint(t).cmp(&self.env.unfold_hint(s)) {
                Ordering::Greater => {
                    self.unfold_into(t);
                }
                Ordering::Less => {
                    self.unfold_into(s);
                }
                Ordering::Equal => {
                    self.unfold_into(t);
                    self.unfold_into(s);
                }
            }
            return Ok(None);
        }
        // with holes around, prefer the side whose unfolded head lines up
        // with the other side
        let t_next = self
            .env
            .unfold_definition(t, self.config.transparency)
            .map(|u| self.env.whnf_core(self.holes, &self.lctx, &u));
        let s_next = self
            .env
            .unfold_definition(s, self.config.transparency)
            .map(|u| self.env.whnf_core(self.holes, &self.lctx, &u));
        match (t_next, s_next) {
            (Some(tn), Some(sn)) => {
                if tn.head().const_name() == Some(&s_name) {
                    *t = tn;
                } else if sn.head().const_name() == Some(&t_name) {
                    *s = sn;
                } else {
                    *t = tn;
                    *s = sn;
                }
                Ok(None)
            }
            (Some(tn), None) => {
                *t = tn;
                Ok(None)
            }
            (None, Some(sn)) => {
                *s = sn;
                Ok(None)
            }
            (None, None) => Ok(Some(Tri::Undef)),
        }
    }

    fn try_congruence(&mut self, t: &Term, s: &Term) -> anyhow::Result<bool> {
        let (Term::Const(t_head), Term::Const(s_head)) = (t.head(), s.head()) else {
            return Ok(false);
        };
        if t_head.name != s_head.name || !is_def_eq_levels(&t_head.levels, &s_head.levels) {
            return Ok(false);
        }
        let t_args = t.args();
        let s_args = s.args();
        if t_args.len() != s_args.len() {
            return Ok(false);
        }
        for (a, b) in zip(&t_args, &s_args) {
            if !self.is_def_eq(a, b)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// `Nat.succ` spines compare by base and offset, skipping unary
    /// unfolding.
    fn offset_shortcut(&mut self, t: &Term, s: &Term) -> anyhow::Result<Option<bool>> {
        let (t_base, t_offset) = succ_offset(t);
        let (s_base, s_offset) = succ_offset(s);
        if t_offset == 0 && s_offset == 0 {
            return Ok(None);
        }
        let as_lit = |base: &Term| match base.strip_mdata() {
            Term::Lit(inner) => Some(inner.value),
            _ => None,
        };
        match (as_lit(&t_base), as_lit(&s_base)) {
            (Some(a), Some(b)) => match (a.checked_add(t_offset), b.checked_add(s_offset)) {
                (Some(t_total), Some(s_total)) => Ok(Some(t_total == s_total)),
                _ => Ok(None),
            },
            (Some(a), None) => {
                let Some(total) = a.checked_add(t_offset) else {
                    return Ok(None);
                };
                if total < s_offset {
                    return Ok(None);
                }
                Ok(Some(self.is_def_eq(&mk_lit(total - s_offset), &s_base)?))
            }
            (None, Some(b)) => {
                let Some(total) = b.checked_add(s_offset) else {
                    return Ok(None);
                };
                if total < t_offset {
                    return Ok(None);
                }
                Ok(Some(self.is_def_eq(&t_base, &mk_lit(total - t_offset))?))
            }
            (None, None) => {
                if t_offset == s_offset {
                    Ok(Some(self.is_def_eq(&t_base, &s_base)?))
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Inhabitants of a proposition are equal as long as their types are.
    fn proof_irrelevance(&mut self, t: &Term, s: &Term) -> anyhow::Result<Option<bool>> {
        let Ok(t_ty) = self.env.infer_type(self.holes, &self.lctx, t) else {
            return Ok(None);
        };
        if !self.env.is_prop(self.holes, &self.lctx, &t_ty) {
            return Ok(None);
        }
        let Ok(s_ty) = self.env.infer_type(self.holes, &self.lctx, s) else {
            return Ok(None);
        };
        if self.is_def_eq(&t_ty, &s_ty)? {
            Ok(Some(true))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::fixtures::EnvFixture;
    use crate::env::ConstInfo;
    use crate::tt::{
        mk_abs, mk_const, mk_level_succ, mk_pi, mk_pi_kinded, mk_prop, mk_sort, Level, Name,
    };

    fn type1() -> Term {
        mk_sort(mk_level_succ(Level::Zero))
    }

    fn nat() -> Term {
        mk_const(Name::from_str("Nat"), vec![])
    }

    fn run(env: &Env<'_>, holes: &mut HoleContext, lctx: &LocalContext, t: &Term, s: &Term) -> bool {
        run_with(env, holes, lctx, t, s, Config::default())
    }

    fn run_with(
        env: &Env<'_>,
        holes: &mut HoleContext,
        lctx: &LocalContext,
        t: &Term,
        s: &Term,
        config: Config,
    ) -> bool {
        let mut checker = DefEq::new(env.clone(), holes, lctx.clone(), config);
        checker.is_def_eq(t, s).unwrap()
    }

    #[test]
    fn identity_is_immediate() {
        let fixture = EnvFixture::new();
        let env = fixture.env();
        let mut holes = HoleContext::new();
        let lctx = LocalContext::default();

        let t = mk_app(
            mk_const(Name::from_str("f"), vec![]),
            mk_const(Name::from_str("a"), vec![]),
        );
        assert!(run(&env, &mut holes, &lctx, &t, &t));
    }

    #[test]
    fn eta_law_holds() {
        let a = mk_const(Name::from_str("A"), vec![]);
        let b = mk_const(Name::from_str("B"), vec![]);
        let fixture = EnvFixture::new()
            .with_const("A", ConstInfo::opaque(type1()))
            .with_const("B", ConstInfo::opaque(type1()))
            .with_const("f", ConstInfo::opaque(mk_pi(None, a.clone(), b)));
        let env = fixture.env();
        let mut holes = HoleContext::new();
        let lctx = LocalContext::default();

        let f = mk_const(Name::from_str("f"), vec![]);
        let expanded = mk_abs(None, a, mk_app(f.clone(), mk_var(0)));
        assert!(run(&env, &mut holes, &lctx, &f, &expanded));
        assert!(run(&env, &mut holes, &lctx, &expanded, &f));
    }

    #[test]
    fn pattern_assignment_solves_then_discriminates() {
        let fixture = EnvFixture::new().with_const("Nat", ConstInfo::opaque(type1()));
        let env = fixture.env();
        let mut holes = HoleContext::new();

        let a = Id::fresh();
        let b = Id::fresh();
        let mut lctx = LocalContext::default();
        lctx.push(LocalDecl::new(a, nat()));
        lctx.push(LocalDecl::new(b, nat()));

        let m = holes.mk_hole(LocalContext::default(), mk_pi(None, nat(), nat()));

        let t = mk_app(mk_hole(m), mk_local(a));
        assert!(run(&env, &mut holes, &lctx, &t, &mk_local(a)));
        assert!(holes.is_assigned(m));
        assert_eq!(
            holes.instantiate(&mk_hole(m)).to_string(),
            "λ_:Nat. #0"
        );

        let later = mk_app(mk_hole(m), mk_local(b));
        assert!(!run(&env, &mut holes, &lctx, &later, &mk_local(a)));
    }

    #[test]
    fn out_of_scope_local_is_rejected() {
        let fixture = EnvFixture::new().with_const("Nat", ConstInfo::opaque(type1()));
        let env = fixture.env();
        let mut holes = HoleContext::new();

        let x = Id::fresh();
        let mut lctx = LocalContext::default();
        lctx.push(LocalDecl::new(x, nat()));

        let m = holes.mk_hole(LocalContext::default(), nat());
        assert!(!run(&env, &mut holes, &lctx, &mk_hole(m), &mk_local(x)));
        assert!(!holes.is_assigned(m));
    }

    #[test]
    fn assigned_hole_is_substituted_not_reassigned() {
        let fixture = EnvFixture::new()
            .with_const("Nat", ConstInfo::opaque(type1()))
            .with_const("a", ConstInfo::opaque(nat()))
            .with_const("b", ConstInfo::opaque(nat()));
        let env = fixture.env();
        let mut holes = HoleContext::new();
        let lctx = LocalContext::default();

        let m = holes.mk_hole(LocalContext::default(), nat());
        let a = mk_const(Name::from_str("a"), vec![]);
        let b = mk_const(Name::from_str("b"), vec![]);

        assert!(run(&env, &mut holes, &lctx, &mk_hole(m), &a));
        assert_eq!(holes.instantiate(&mk_hole(m)).to_string(), "a");

        assert!(!run(&env, &mut holes, &lctx, &mk_hole(m), &b));
        assert_eq!(holes.instantiate(&mk_hole(m)).to_string(), "a");
    }

    #[test]
    fn occurs_check_blocks_cyclic_solution() {
        let fixture = EnvFixture::new()
            .with_const("Nat", ConstInfo::opaque(type1()))
            .with_const("g", ConstInfo::opaque(mk_pi(None, nat(), nat())));
        let env = fixture.env();
        let mut holes = HoleContext::new();
        let lctx = LocalContext::default();

        let m = holes.mk_hole(LocalContext::default(), nat());
        let g = mk_const(Name::from_str("g"), vec![]);
        let cyclic = mk_app(g, mk_hole(m));
        assert!(!run(&env, &mut holes, &lctx, &mk_hole(m), &cyclic));
        assert!(!holes.is_assigned(m));
    }

    #[test]
    fn dependent_abstraction_falls_back() {
        let id_ty = mk_pi(None, type1(), mk_pi(None, mk_var(0), mk_var(1)));
        let id_val = mk_abs(None, type1(), mk_abs(None, mk_var(0), mk_var(0)));
        let fixture = EnvFixture::new().with_const("id", ConstInfo::definition(id_ty, id_val));
        let env = fixture.env();
        let mut holes = HoleContext::new();

        let alpha = Id::fresh();
        let a = Id::fresh();
        let mut lctx = LocalContext::default();
        lctx.push(LocalDecl::new(alpha, type1()));
        lctx.push(LocalDecl::new(a, mk_local(alpha)));

        let m = holes.mk_hole(lctx.clone(), mk_pi(None, type1(), type1()));
        let t = mk_app(mk_hole(m), mk_local(alpha));
        let s = mk_const(Name::from_str("id"), vec![]).apply([mk_local(alpha), mk_local(a)]);

        let config = Config {
            quasi_pattern: true,
            ..Config::default()
        };
        assert!(!run_with(&env, &mut holes, &lctx, &t, &s, config));
        assert!(!holes.is_assigned(m));
    }

    #[test]
    fn delta_unfolds_the_defined_side() {
        let id_ty = mk_pi(None, type1(), mk_pi(None, mk_var(0), mk_var(1)));
        let id_val = mk_abs(None, type1(), mk_abs(None, mk_var(0), mk_var(0)));
        let unit = mk_const(Name::from_str("Unit"), vec![]);
        let fixture = EnvFixture::new()
            .with_const("Unit", ConstInfo::opaque(type1()))
            .with_const("tt", ConstInfo::opaque(unit.clone()))
            .with_const("id", ConstInfo::definition(id_ty, id_val));
        let env = fixture.env();
        let mut holes = HoleContext::new();
        let lctx = LocalContext::default();

        let tt = mk_const(Name::from_str("tt"), vec![]);
        let t = mk_const(Name::from_str("id"), vec![]).apply([unit, tt.clone()]);
        assert!(run(&env, &mut holes, &lctx, &t, &tt));
    }

    #[test]
    fn proofs_of_one_proposition_are_equal() {
        let p = mk_const(Name::from_str("P"), vec![]);
        let fixture = EnvFixture::new()
            .with_const("P", ConstInfo::opaque(mk_prop()))
            .with_const("h1", ConstInfo::opaque(p.clone()))
            .with_const("h2", ConstInfo::opaque(p));
        let env = fixture.env();
        let mut holes = HoleContext::new();
        let lctx = LocalContext::default();

        let h1 = mk_const(Name::from_str("h1"), vec![]);
        let h2 = mk_const(Name::from_str("h2"), vec![]);
        assert!(run(&env, &mut holes, &lctx, &h1, &h2));
    }

    #[test]
    fn binder_domains_must_match() {
        let a = mk_const(Name::from_str("A"), vec![]);
        let b = mk_const(Name::from_str("B"), vec![]);
        let fixture = EnvFixture::new()
            .with_const("A", ConstInfo::opaque(type1()))
            .with_const("B", ConstInfo::opaque(type1()));
        let env = fixture.env();
        let mut holes = HoleContext::new();
        let lctx = LocalContext::default();

        let t = mk_abs(None, a, mk_var(0));
        let s = mk_abs(None, b, mk_var(0));
        assert!(!run(&env, &mut holes, &lctx, &t, &s));
    }

    #[test]
    fn bare_hole_argument_is_solved_in_the_first_pass() {
        let f_ty = mk_pi_kinded(
            None,
            BinderKind::Implicit,
            type1(),
            mk_pi(None, mk_var(0), mk_var(1)),
        );
        let fixture = EnvFixture::new()
            .with_const("Nat", ConstInfo::opaque(type1()))
            .with_const("f", ConstInfo::opaque(f_ty));
        let env = fixture.env();
        let mut holes = HoleContext::new();

        let a = Id::fresh();
        let mut lctx = LocalContext::default();
        lctx.push(LocalDecl::new(a, nat()));

        let m = holes.mk_hole(LocalContext::default(), type1());
        let f = mk_const(Name::from_str("f"), vec![]);
        let t = f.apply([mk_hole(m), mk_local(a)]);
        let s = f.apply([nat(), mk_local(a)]);

        assert!(run(&env, &mut holes, &lctx, &t, &s));
        assert_eq!(holes.instantiate(&mk_hole(m)).to_string(), "Nat");
    }

    #[test]
    fn narrowing_creates_an_auxiliary_hole() {
        let fixture = EnvFixture::new()
            .with_const("Nat", ConstInfo::opaque(type1()))
            .with_const("g", ConstInfo::opaque(mk_pi(None, nat(), nat())));
        let env = fixture.env();
        let mut holes = HoleContext::new();

        let x = Id::fresh();
        let mut lctx = LocalContext::default();
        lctx.push(LocalDecl::new(x, nat()));

        let m = holes.mk_hole(LocalContext::default(), nat());
        let n = holes.mk_hole(lctx.clone(), nat());

        let g = mk_const(Name::from_str("g"), vec![]);
        let t = mk_hole(m);
        let s = mk_app(g, mk_hole(n));
        assert!(run(&env, &mut holes, &lctx, &t, &s));
        assert!(holes.is_assigned(m));
        assert!(holes.is_assigned(n));
        assert_eq!(
            holes.instantiate(&t).to_string(),
            holes.instantiate(&s).to_string()
        );
    }

    #[test]
    fn let_bound_local_unfolds_into_the_solution() {
        let fixture = EnvFixture::new()
            .with_const("Nat", ConstInfo::opaque(type1()))
            .with_const("a", ConstInfo::opaque(nat()));
        let env = fixture.env();
        let mut holes = HoleContext::new();

        let a = mk_const(Name::from_str("a"), vec![]);
        let v = Id::fresh();
        let mut lctx = LocalContext::default();
        lctx.push(LocalDecl::new(v, nat()).with_value(a));

        let m = holes.mk_hole(LocalContext::default(), nat());
        assert!(run(&env, &mut holes, &lctx, &mk_hole(m), &mk_local(v)));
        assert_eq!(holes.instantiate(&mk_hole(m)).to_string(), "a");
    }

    #[test]
    fn let_bound_locals_compare_by_value() {
        let fixture = EnvFixture::new()
            .with_const("Nat", ConstInfo::opaque(type1()))
            .with_const("a", ConstInfo::opaque(nat()));
        let env = fixture.env();
        let mut holes = HoleContext::new();

        let a = mk_const(Name::from_str("a"), vec![]);
        let v = Id::fresh();
        let w = Id::fresh();
        let mut lctx = LocalContext::default();
        lctx.push(LocalDecl::new(v, nat()).with_value(a.clone()));
        lctx.push(LocalDecl::new(w, nat()).with_value(a));

        assert!(run(&env, &mut holes, &lctx, &mk_local(v), &mk_local(w)));
    }

    #[test]
    fn successor_spines_compare_by_offset() {
        let fixture = EnvFixture::new()
            .with_const("Nat", ConstInfo::opaque(type1()))
            .with_const("Nat.succ", ConstInfo::opaque(mk_pi(None, nat(), nat())));
        let env = fixture.env();
        let mut holes = HoleContext::new();
        let lctx = LocalContext::default();

        let succ = mk_const(Name::from_str("Nat.succ"), vec![]);
        let t = mk_app(succ.clone(), mk_app(succ, mk_lit(1)));
        assert!(run(&env, &mut holes, &lctx, &t, &mk_lit(3)));
        assert!(!run(&env, &mut holes, &lctx, &t, &mk_lit(4)));
    }

    #[test]
    fn strict_mode_reports_stuck() {
        let fixture = EnvFixture::new().with_const("Nat", ConstInfo::opaque(type1()));
        let env = fixture.env();
        let mut holes = HoleContext::new();
        let lctx = LocalContext::default();

        let m = Id::fresh();
        let n = Id::fresh();
        for id in [m, n] {
            holes.declare(HoleDecl {
                id,
                lctx: LocalContext::default(),
                ty: nat(),
                depth: 0,
                synthetic: false,
                read_only: true,
                local_instances: vec![],
            });
        }

        let config = Config {
            stuck_is_error: true,
            ..Config::default()
        };
        let mut checker = DefEq::new(env.clone(), &mut holes, lctx, config);
        let err = checker.is_def_eq(&mk_hole(m), &mk_hole(n)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<AssignError>(),
            Some(AssignError::Stuck)
        ));
    }

    #[test]
    fn pending_value_unsticks_a_blocked_comparison() {
        let fixture = EnvFixture::new()
            .with_const("Nat", ConstInfo::opaque(type1()))
            .with_const("a", ConstInfo::opaque(nat()))
            .with_const("g", ConstInfo::opaque(mk_pi(None, nat(), nat())));
        let env = fixture.env();
        let mut holes = HoleContext::new();
        let lctx = LocalContext::default();

        let m = Id::fresh();
        holes.declare(HoleDecl {
            id: m,
            lctx: LocalContext::default(),
            ty: nat(),
            depth: 0,
            synthetic: true,
            read_only: false,
            local_instances: vec![],
        });
        let a = mk_const(Name::from_str("a"), vec![]);
        holes.set_pending(m, a.clone());

        let g = mk_const(Name::from_str("g"), vec![]);
        let t = mk_app(g.clone(), mk_hole(m));
        let s = mk_app(g, a);
        assert!(run(&env, &mut holes, &lctx, &t, &s));
        assert!(holes.is_assigned(m));
    }

    #[test]
    fn cache_entries_keep_recycled_addresses_apart() {
        let fixture = EnvFixture::new();
        let env = fixture.env();
        let mut holes = HoleContext::new();
        let mut checker = DefEq::new(
            env.clone(),
            &mut holes,
            LocalContext::default(),
            Config::default(),
        );
        for _ in 0..1000 {
            let one = mk_lit(1);
            let two = mk_lit(2);
            assert!(!checker.is_def_eq(&one, &two).unwrap());
            drop(one);
            // a fresh same-sized node may land on the dropped term's address
            let fresh = mk_lit(2);
            assert!(checker.is_def_eq(&fresh, &two).unwrap());
        }
    }

    #[test]
    fn huge_literal_offsets_do_not_wrap() {
        let fixture = EnvFixture::new()
            .with_const("Nat", ConstInfo::opaque(type1()))
            .with_const("Nat.succ", ConstInfo::opaque(mk_pi(None, nat(), nat())));
        let env = fixture.env();
        let mut holes = HoleContext::new();
        let lctx = LocalContext::default();

        let succ = mk_const(Name::from_str("Nat.succ"), vec![]);
        let t = mk_app(succ.clone(), mk_lit(u64::MAX));
        assert!(!run(&env, &mut holes, &lctx, &t, &mk_lit(0)));
        assert!(!run(&env, &mut holes, &lctx, &mk_lit(0), &t));

        let s = mk_app(succ, mk_lit(u64::MAX));
        assert!(run(&env, &mut holes, &lctx, &t, &s));
    }

    #[test]
    fn implicit_positions_are_postponed_to_the_second_pass() {
        let f_ty = mk_pi_kinded(
            None,
            BinderKind::Implicit,
            type1(),
            mk_pi(None, type1(), nat()),
        );
        let fixture = EnvFixture::new()
            .with_const("Nat", ConstInfo::opaque(type1()))
            .with_const("g", ConstInfo::opaque(mk_pi(None, type1(), type1())))
            .with_const("f", ConstInfo::opaque(f_ty));
        let env = fixture.env();
        let mut holes = HoleContext::new();
        let lctx = LocalContext::default();

        let m = holes.mk_hole(LocalContext::default(), type1());
        let f = mk_const(Name::from_str("f"), vec![]);
        let g = mk_const(Name::from_str("g"), vec![]);
        let t = f.apply([mk_app(g.clone(), mk_hole(m)), mk_hole(m)]);
        let s = f.apply([mk_app(g, nat()), nat()]);

        assert!(run(&env, &mut holes, &lctx, &t, &s));
        assert_eq!(holes.instantiate(&mk_hole(m)).to_string(), "Nat");
    }

    #[test]
    fn instance_arguments_force_their_pending_values() {
        let c_ty = mk_const(Name::from_str("C"), vec![]);
        let f_ty = mk_pi_kinded(
            None,
            BinderKind::InstImplicit,
            c_ty.clone(),
            mk_pi(None, nat(), nat()),
        );
        let fixture = EnvFixture::new()
            .with_const("Nat", ConstInfo::opaque(type1()))
            .with_const("C", ConstInfo::opaque(type1()))
            .with_const("c", ConstInfo::opaque(c_ty.clone()))
            .with_const("a", ConstInfo::opaque(nat()))
            .with_const("f", ConstInfo::opaque(f_ty));
        let env = fixture.env();
        let mut holes = HoleContext::new();
        let lctx = LocalContext::default();

        let i = Id::fresh();
        holes.declare(HoleDecl {
            id: i,
            lctx: LocalContext::default(),
            ty: c_ty,
            depth: 0,
            synthetic: true,
            read_only: false,
            local_instances: vec![],
        });
        let c = mk_const(Name::from_str("c"), vec![]);
        holes.set_pending(i, c.clone());

        let f = mk_const(Name::from_str("f"), vec![]);
        let a = mk_const(Name::from_str("a"), vec![]);
        let t = f.apply([mk_hole(i), a.clone()]);
        let s = f.apply([c, a]);

        assert!(run(&env, &mut holes, &lctx, &t, &s));
        assert!(holes.is_assigned(i));
    }

    #[test]
    fn instance_arguments_unfold_at_default_transparency() {
        let c_ty = mk_const(Name::from_str("C"), vec![]);
        let c = mk_const(Name::from_str("c"), vec![]);
        let f_ty = mk_pi_kinded(
            None,
            BinderKind::InstImplicit,
            c_ty.clone(),
            mk_pi(None, nat(), nat()),
        );
        let fixture = EnvFixture::new()
            .with_const("Nat", ConstInfo::opaque(type1()))
            .with_const("C", ConstInfo::opaque(type1()))
            .with_const("c", ConstInfo::opaque(c_ty.clone()))
            .with_const("d", ConstInfo::definition(c_ty, c.clone()))
            .with_const("a", ConstInfo::opaque(nat()))
            .with_const("f", ConstInfo::opaque(f_ty));
        let env = fixture.env();
        let mut holes = HoleContext::new();
        let lctx = LocalContext::default();

        let config = Config {
            transparency: Transparency::Reducible,
            ..Config::default()
        };
        let d = mk_const(Name::from_str("d"), vec![]);
        assert!(!run_with(&env, &mut holes, &lctx, &d, &c, config));

        let f = mk_const(Name::from_str("f"), vec![]);
        let a = mk_const(Name::from_str("a"), vec![]);
        let t = f.apply([d, a.clone()]);
        let s = f.apply([c, a]);
        assert!(run_with(&env, &mut holes, &lctx, &t, &s, config));
    }
}
