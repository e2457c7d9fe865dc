use std::collections::{HashMap, HashSet};
use std::iter::zip;

use anyhow::bail;

use crate::meta::HoleContext;
use crate::tt::{
    mk_const, mk_level_max, mk_level_succ, mk_local, mk_pi_kinded, mk_sort, Id, Level, LocalContext,
    LocalDecl, Name, Term,
};

/// Per-symbol unfolding priority, mirroring the kernel's ordering:
/// `Opaque` never wins a race, `Abbrev` always does, `Regular` definitions
/// compare by definitional height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnfoldHint {
    Opaque,
    Regular(u32),
    Abbrev,
}

/// Which definitions are eligible for delta-unfolding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Transparency {
    Reducible,
    Default,
    All,
}

#[derive(Debug, Clone)]
pub struct ConstInfo {
    pub level_params: Vec<Name>,
    pub ty: Term,
    /// Delta target; absent for axioms, constructors, and opaque constants.
    pub value: Option<Term>,
    pub hint: UnfoldHint,
    pub reducible: bool,
    /// Marks projection functions for the lazy-delta preference order.
    pub projection: bool,
    /// Present iff the constant is a constructor; carries the number of
    /// leading parameters, for projection reduction.
    pub constructor_params: Option<usize>,
}

impl ConstInfo {
    pub fn opaque(ty: Term) -> ConstInfo {
        ConstInfo {
            level_params: vec![],
            ty,
            value: None,
            hint: UnfoldHint::Opaque,
            reducible: false,
            projection: false,
            constructor_params: None,
        }
    }

    pub fn definition(ty: Term, value: Term) -> ConstInfo {
        ConstInfo {
            level_params: vec![],
            ty,
            value: Some(value),
            hint: UnfoldHint::Regular(1),
            reducible: false,
            projection: false,
            constructor_params: None,
        }
    }

    pub fn with_level_params(mut self, level_params: Vec<Name>) -> ConstInfo {
        self.level_params = level_params;
        self
    }

    pub fn with_hint(mut self, hint: UnfoldHint) -> ConstInfo {
        self.hint = hint;
        self
    }

    pub fn with_reducible(mut self) -> ConstInfo {
        self.reducible = true;
        self
    }

    pub fn with_projection(mut self) -> ConstInfo {
        self.projection = true;
        self
    }

    pub fn with_constructor_params(mut self, num_params: usize) -> ConstInfo {
        self.constructor_params = Some(num_params);
        self
    }
}

/// Name-indexed constant lookup plus the reduction and inference
/// collaborators of the equality engine.
#[derive(Debug, Clone)]
pub struct Env<'a> {
    pub const_table: &'a HashMap<Name, ConstInfo>,
    /// Head constants that are type classes.
    pub class_table: &'a HashSet<Name>,
}

impl Env<'_> {
    pub fn get_const(&self, name: &Name) -> Option<&ConstInfo> {
        self.const_table.get(name)
    }

    fn may_unfold(&self, info: &ConstInfo, transparency: Transparency) -> bool {
        if info.value.is_none() {
            return false;
        }
        match transparency {
            Transparency::Reducible => info.reducible,
            Transparency::Default => info.hint != UnfoldHint::Opaque || info.reducible,
            Transparency::All => true,
        }
    }

    pub fn is_delta_redex(&self, m: &Term, transparency: Transparency) -> bool {
        match m.head().const_name() {
            Some(name) => self
                .get_const(name)
                .is_some_and(|info| self.may_unfold(info, transparency)),
            None => false,
        }
    }

    pub fn unfold_hint(&self, m: &Term) -> UnfoldHint {
        match m.head().const_name() {
            Some(name) => self
                .get_const(name)
                .map_or(UnfoldHint::Opaque, |info| info.hint),
            None => UnfoldHint::Opaque,
        }
    }

    pub fn is_projection_app(&self, m: &Term) -> bool {
        match m.strip_mdata() {
            Term::Proj(_) => true,
            _ => match m.head().const_name() {
                Some(name) => self.get_const(name).is_some_and(|info| info.projection),
                None => false,
            },
        }
    }

    /// One delta step on the head constant, honoring the transparency mode.
    pub fn unfold_definition(&self, m: &Term, transparency: Transparency) -> Option<Term> {
        let head = m.head();
        let Term::Const(head_const) = head else {
            return None;
        };
        let info = self.get_const(&head_const.name)?;
        if !self.may_unfold(info, transparency) {
            return None;
        }
        let value = info.value.as_ref()?;
        if info.level_params.len() != head_const.levels.len() {
            return None;
        }
        let subst: Vec<(Name, Level)> = zip(&info.level_params, &head_const.levels)
            .map(|(x, l)| (x.clone(), l.clone()))
            .collect();
        let unfolded_head = value.subst_levels(&subst);
        Some(unfolded_head.apply(m.args().into_iter().cloned()))
    }

    /// Weak-head reduction without delta: beta, let-zeta, metadata stripping,
    /// assigned-hole instantiation, let-bound local unfolding, and projection
    /// of literal constructor applications.
    pub fn whnf_core(&self, holes: &HoleContext, lctx: &LocalContext, m: &Term) -> Term {
        let mut term = m.strip_mdata().clone();
        loop {
            match &term {
                Term::Let(inner) => {
                    let next = inner.body.open(&[inner.value.clone()], 0);
                    term = next.strip_mdata().clone();
                    continue;
                }
                Term::Proj(inner) => {
                    let arg = self.whnf_core(holes, lctx, &inner.arg);
                    let head = arg.head();
                    let Some(name) = head.const_name() else {
                        // re-wrap with the reduced argument so callers see progress
                        if !arg.ptr_eq(&inner.arg) {
                            term = crate::tt::mk_proj(inner.struct_name.clone(), inner.field, arg);
                        }
                        break;
                    };
                    let Some(num_params) = self
                        .get_const(name)
                        .and_then(|info| info.constructor_params)
                    else {
                        if !arg.ptr_eq(&inner.arg) {
                            term = crate::tt::mk_proj(inner.struct_name.clone(), inner.field, arg);
                        }
                        break;
                    };
                    let args = arg.args();
                    let idx = num_params + inner.field;
                    if idx >= args.len() {
                        break;
                    }
                    term = args[idx].clone();
                    continue;
                }
                _ => {}
            }

            let head = term.head();
            match head {
                Term::Hole(inner) => {
                    if let Some(value) = holes.get_assignment(inner.id) {
                        let value = value.clone();
                        let args: Vec<Term> = term.args().into_iter().cloned().collect();
                        term = value.apply(args);
                        term = term.strip_mdata().clone();
                        continue;
                    }
                    break;
                }
                Term::Local(inner) => {
                    let Some(decl) = lctx.get(inner.id) else {
                        break;
                    };
                    let Some(value) = &decl.value else {
                        break;
                    };
                    let value = value.clone();
                    let args: Vec<Term> = term.args().into_iter().cloned().collect();
                    term = value.apply(args);
                    term = term.strip_mdata().clone();
                    continue;
                }
                Term::Abs(_) => {
                    let mut args: Vec<Term> = term.args().into_iter().cloned().collect();
                    if args.is_empty() {
                        break;
                    }
                    let mut fun = term.head().clone();
                    let mut consumed = 0;
                    while consumed < args.len() {
                        let Term::Abs(abs) = fun.strip_mdata() else {
                            break;
                        };
                        fun = abs.body.open(&[args[consumed].clone()], 0);
                        consumed += 1;
                    }
                    term = fun.apply(args.drain(consumed..));
                    term = term.strip_mdata().clone();
                    continue;
                }
                _ => break,
            }
        }
        term
    }

    /// Weak head normal form: `whnf_core` plus delta steps to fixpoint.
    pub fn whnf(
        &self,
        holes: &HoleContext,
        lctx: &LocalContext,
        m: &Term,
        transparency: Transparency,
    ) -> Term {
        let mut term = self.whnf_core(holes, lctx, m);
        while let Some(unfolded) = self.unfold_definition(&term, transparency) {
            term = self.whnf_core(holes, lctx, &unfolded);
        }
        term
    }

    /// Type synthesis for well-typed terms. Holes take their declared type;
    /// no conformance checking is performed.
    pub fn infer_type(
        &self,
        holes: &HoleContext,
        lctx: &LocalContext,
        m: &Term,
    ) -> anyhow::Result<Term> {
        match m {
            Term::Var(inner) => bail!("cannot infer type of loose variable #{}", inner.index),
            Term::Local(inner) => match lctx.get(inner.id) {
                Some(decl) => Ok(decl.ty.clone()),
                None => bail!("unbound local: {}", inner.id),
            },
            Term::Hole(inner) => match holes.get_decl(inner.id) {
                Some(decl) => Ok(decl.ty.clone()),
                None => bail!("unknown hole: ?{}", inner.id),
            },
            Term::Sort(inner) => Ok(mk_sort(mk_level_succ(inner.level.clone()))),
            Term::Const(inner) => {
                let Some(info) = self.get_const(&inner.name) else {
                    bail!("unknown constant: {}", inner.name);
                };
                if info.level_params.len() != inner.levels.len() {
                    bail!("level arity mismatch for constant {}", inner.name);
                }
                let subst: Vec<(Name, Level)> = zip(&info.level_params, &inner.levels)
                    .map(|(x, l)| (x.clone(), l.clone()))
                    .collect();
                Ok(info.ty.subst_levels(&subst))
            }
            Term::Lit(_) => Ok(mk_const(Name::from_str("Nat"), vec![])),
            Term::App(inner) => {
                let fun_ty = self.infer_type(holes, lctx, &inner.fun)?;
                let fun_ty = self.whnf(holes, lctx, &fun_ty, Transparency::Default);
                match fun_ty.strip_mdata() {
                    Term::Pi(pi) => Ok(pi.body.open(&[inner.arg.clone()], 0)),
                    _ => bail!("expected a function type but got {fun_ty}"),
                }
            }
            Term::Abs(inner) => {
                let x = Id::fresh();
                let mut inner_lctx = lctx.clone();
                inner_lctx.push(
                    LocalDecl::new(x, inner.binder_type.clone()).with_kind(inner.binder_kind),
                );
                let body = inner.body.open(&[mk_local(x)], 0);
                let body_ty = self.infer_type(holes, &inner_lctx, &body)?;
                Ok(mk_pi_kinded(
                    inner.binder_name.clone(),
                    inner.binder_kind,
                    inner.binder_type.clone(),
                    body_ty.close(&[x], 0),
                ))
            }
            Term::Pi(inner) => {
                let dom_sort = self.infer_sort(holes, lctx, &inner.binder_type)?;
                let x = Id::fresh();
                let mut inner_lctx = lctx.clone();
                inner_lctx.push(
                    LocalDecl::new(x, inner.binder_type.clone()).with_kind(inner.binder_kind),
                );
                let body = inner.body.open(&[mk_local(x)], 0);
                let cod_sort = self.infer_sort(holes, &inner_lctx, &body)?;
                // imax: a function into Prop is a Prop
                let level = if cod_sort.is_zero() {
                    cod_sort
                } else {
                    mk_level_max(dom_sort, cod_sort)
                };
                Ok(mk_sort(level))
            }
            Term::Let(inner) => {
                let x = Id::fresh();
                let mut inner_lctx = lctx.clone();
                inner_lctx.push(
                    LocalDecl::new(x, inner.binder_type.clone()).with_value(inner.value.clone()),
                );
                let body = inner.body.open(&[mk_local(x)], 0);
                let body_ty = self.infer_type(holes, &inner_lctx, &body)?;
                Ok(body_ty.replace_local(&|id| {
                    if id == x {
                        Some(inner.value.clone())
                    } else {
                        None
                    }
                }))
            }
            Term::Proj(inner) => bail!("cannot infer type of projection {m}", m = inner.arg),
            Term::Mdata(inner) => self.infer_type(holes, lctx, &inner.inner),
        }
    }

    fn infer_sort(
        &self,
        holes: &HoleContext,
        lctx: &LocalContext,
        ty: &Term,
    ) -> anyhow::Result<Level> {
        let sort = self.infer_type(holes, lctx, ty)?;
        let sort = self.whnf(holes, lctx, &sort, Transparency::Default);
        match sort.strip_mdata() {
            Term::Sort(inner) => Ok(inner.level.clone()),
            _ => bail!("expected a sort but got {sort}"),
        }
    }

    /// A type with at most one, evidentially irrelevant, inhabitant.
    pub fn is_prop(&self, holes: &HoleContext, lctx: &LocalContext, ty: &Term) -> bool {
        match self.infer_type(holes, lctx, ty) {
            Ok(sort) => self
                .whnf(holes, lctx, &sort, Transparency::Default)
                .is_sort_zero(),
            Err(_) => false,
        }
    }

    /// The class predicate, by head constant.
    pub fn is_class(&self, ty: &Term) -> Option<Name> {
        let name = ty.head().const_name()?;
        if self.class_table.contains(name) {
            Some(name.clone())
        } else {
            None
        }
    }
}

/// Peels `Nat.succ` applications, returning the base and the offset.
/// A literal base is kept as-is so callers can fold it themselves.
pub fn succ_offset(m: &Term) -> (Term, u64) {
    let succ = Name::from_str("Nat.succ");
    let mut term = m.strip_mdata().clone();
    let mut offset = 0;
    loop {
        let head = term.head();
        if head.const_name() == Some(&succ) {
            let args = term.args();
            if args.len() == 1 {
                let next = args[0].clone();
                term = next.strip_mdata().clone();
                offset += 1;
                continue;
            }
        }
        return (term, offset);
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub(crate) struct EnvFixture {
        const_table: HashMap<Name, ConstInfo>,
        class_table: HashSet<Name>,
    }

    impl EnvFixture {
        pub(crate) fn new() -> Self {
            EnvFixture {
                const_table: HashMap::new(),
                class_table: HashSet::new(),
            }
        }

        pub(crate) fn with_const(mut self, name: &str, info: ConstInfo) -> Self {
            self.const_table.insert(Name::from_str(name), info);
            self
        }

        pub(crate) fn with_class(mut self, name: &str) -> Self {
            self.class_table.insert(Name::from_str(name));
            self
        }

        pub(crate) fn env(&self) -> Env<'_> {
            Env {
                const_table: &self.const_table,
                class_table: &self.class_table,
            }
        }
    }
}
