use std::collections::HashMap;
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::iter::zip;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, Weak};

use once_cell::sync::Lazy;

#[derive(Debug, Clone, Ord, PartialOrd, Default)]
pub struct Name(Arc<String>);

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct Id(usize);

static NAME_TABLE: Lazy<Mutex<HashMap<String, Weak<String>>>> = Lazy::new(Default::default);

static ID_COUNTER: AtomicUsize = AtomicUsize::new(0);
static ID_NAME_TABLE: Lazy<Mutex<HashMap<Name, Id>>> = Lazy::new(Default::default);
static ID_NAME_REV_TABLE: Lazy<Mutex<HashMap<Id, Name>>> = Lazy::new(Default::default);

impl Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Name {
    pub fn from_str(value: &str) -> Name {
        let mut table = NAME_TABLE.lock().unwrap();
        if let Some(existing) = table.get(value).and_then(|weak| weak.upgrade()) {
            return Name(existing);
        }

        let owned = Arc::new(value.to_owned());
        table.insert(value.to_owned(), Arc::downgrade(&owned));
        Name(owned)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(name) = self.name() {
            return write!(f, "{}{}", name, self.0);
        }
        write!(f, "{}", self.0)
    }
}

impl Id {
    pub fn fresh() -> Self {
        let id = ID_COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Id(id)
    }

    pub fn fresh_with_name(name: Name) -> Self {
        let new_id = Id::fresh();
        ID_NAME_REV_TABLE.lock().unwrap().insert(new_id, name);
        new_id
    }

    pub fn from_name(name: &Name) -> Id {
        let mut id_table = ID_NAME_TABLE.lock().unwrap();
        if let Some(&id) = id_table.get(name) {
            return id;
        }

        let id = Id::fresh();
        id_table.insert(name.clone(), id);
        drop(id_table);
        ID_NAME_REV_TABLE.lock().unwrap().insert(id, name.clone());
        id
    }

    pub fn name(&self) -> Option<Name> {
        ID_NAME_REV_TABLE.lock().unwrap().get(self).cloned()
    }
}

/// Universe levels. Level holes are not represented; the elaborator
/// resolves them before terms reach this engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Zero,
    Succ(Arc<Level>),
    Max(Arc<(Level, Level)>),
    Param(Name),
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (rest, offset) = self.to_offset();
        match rest {
            Level::Zero => write!(f, "{offset}"),
            Level::Succ(_) => unreachable!(),
            Level::Max(inner) => {
                if offset > 0 {
                    write!(f, "(max {} {}) + {offset}", inner.0, inner.1)
                } else {
                    write!(f, "max {} {}", inner.0, inner.1)
                }
            }
            Level::Param(name) => {
                if offset > 0 {
                    write!(f, "{name} + {offset}")
                } else {
                    write!(f, "{name}")
                }
            }
        }
    }
}

pub fn mk_level_zero() -> Level {
    Level::Zero
}

pub fn mk_level_succ(level: Level) -> Level {
    Level::Succ(Arc::new(level))
}

pub fn mk_level_max(left: Level, right: Level) -> Level {
    Level::Max(Arc::new((left, right)))
}

pub fn mk_level_param(name: Name) -> Level {
    Level::Param(name)
}

impl Level {
    pub fn is_zero(&self) -> bool {
        matches!(self, Level::Zero)
    }

    /// Peels `Succ` constructors, returning the base and the number peeled.
    pub fn to_offset(&self) -> (&Level, usize) {
        let mut level = self;
        let mut offset = 0;
        while let Level::Succ(inner) = level {
            level = inner;
            offset += 1;
        }
        (level, offset)
    }

    /// Simultaneously substitute levels for parameters.
    pub fn subst(&self, subst: &[(Name, Level)]) -> Level {
        match self {
            Level::Zero => self.clone(),
            Level::Succ(inner) => mk_level_succ(inner.subst(subst)),
            Level::Max(inner) => mk_level_max(inner.0.subst(subst), inner.1.subst(subst)),
            Level::Param(name) => subst
                .iter()
                .find(|(x, _)| x == name)
                .map(|(_, l)| l.clone())
                .unwrap_or_else(|| self.clone()),
        }
    }
}

/// The level-equality oracle. Decides equality of ground levels up to
/// offset peeling, idempotence and commutativity of `max`; incomparable
/// shapes are conservatively unequal.
pub fn is_def_eq_level(left: &Level, right: &Level) -> bool {
    let (left, left_offset) = left.to_offset();
    let (right, right_offset) = right.to_offset();
    if left_offset != right_offset {
        return false;
    }
    match (left, right) {
        (Level::Zero, Level::Zero) => true,
        (Level::Param(x), Level::Param(y)) => x == y,
        (Level::Max(l), Level::Max(r)) => {
            (is_def_eq_level(&l.0, &r.0) && is_def_eq_level(&l.1, &r.1))
                || (is_def_eq_level(&l.0, &r.1) && is_def_eq_level(&l.1, &r.0))
        }
        (Level::Max(l), _) => is_def_eq_level(&l.0, right) && is_def_eq_level(&l.1, right),
        (_, Level::Max(r)) => is_def_eq_level(left, &r.0) && is_def_eq_level(left, &r.1),
        _ => false,
    }
}

pub fn is_def_eq_levels(left: &[Level], right: &[Level]) -> bool {
    left.len() == right.len() && zip(left, right).all(|(l, r)| is_def_eq_level(l, r))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinderKind {
    Explicit,
    Implicit,
    InstImplicit,
}

impl BinderKind {
    pub fn is_explicit(&self) -> bool {
        matches!(self, BinderKind::Explicit)
    }

    pub fn is_inst_implicit(&self) -> bool {
        matches!(self, BinderKind::InstImplicit)
    }
}

#[derive(Clone, Debug, Default)]
pub struct TermMetadata {
    /// One plus the largest loose de Bruijn index, zero if none.
    pub bound: usize,
    pub has_local: bool,
    pub has_hole: bool,
}

/// Locally nameless representation. See [Charguéraud, 2012].
/// Use syn's convention [https://docs.rs/syn/latest/syn/enum.Expr.html#syntax-tree-enums].
#[derive(Clone, Debug)]
pub enum Term {
    Var(Arc<TermVar>),
    Local(Arc<TermLocal>),
    Hole(Arc<TermHole>),
    App(Arc<TermApp>),
    Abs(Arc<TermAbs>),
    Pi(Arc<TermPi>),
    Let(Arc<TermLet>),
    Lit(Arc<TermLit>),
    Sort(Arc<TermSort>),
    Const(Arc<TermConst>),
    Proj(Arc<TermProj>),
    Mdata(Arc<TermMdata>),
}

#[derive(Clone, Debug)]
pub struct TermVar {
    pub metadata: TermMetadata,
    pub index: usize,
}

#[derive(Clone, Debug)]
pub struct TermLocal {
    pub metadata: TermMetadata,
    pub id: Id,
}

#[derive(Clone, Debug)]
pub struct TermHole {
    pub metadata: TermMetadata,
    pub id: Id,
}

#[derive(Clone, Debug)]
pub struct TermApp {
    pub metadata: TermMetadata,
    pub fun: Term,
    pub arg: Term,
}

#[derive(Clone, Debug)]
pub struct TermAbs {
    pub metadata: TermMetadata,
    // for pretty-printing
    pub binder_name: Option<Name>,
    pub binder_kind: BinderKind,
    pub binder_type: Term,
    pub body: Term,
}

#[derive(Clone, Debug)]
pub struct TermPi {
    pub metadata: TermMetadata,
    pub binder_name: Option<Name>,
    pub binder_kind: BinderKind,
    pub binder_type: Term,
    pub body: Term,
}

#[derive(Clone, Debug)]
pub struct TermLet {
    pub metadata: TermMetadata,
    pub binder_name: Option<Name>,
    pub binder_type: Term,
    pub value: Term,
    pub body: Term,
}

#[derive(Clone, Debug)]
pub struct TermLit {
    pub metadata: TermMetadata,
    pub value: u64,
}

#[derive(Clone, Debug)]
pub struct TermSort {
    pub metadata: TermMetadata,
    pub level: Level,
}

#[derive(Clone, Debug)]
pub struct TermConst {
    pub metadata: TermMetadata,
    pub name: Name,
    pub levels: Vec<Level>,
}

#[derive(Clone, Debug)]
pub struct TermProj {
    pub metadata: TermMetadata,
    pub struct_name: Name,
    pub field: usize,
    pub arg: Term,
}

/// Carries no semantic content; every traversal must look through it.
#[derive(Clone, Debug)]
pub struct TermMdata {
    pub metadata: TermMetadata,
    pub annot: Name,
    pub inner: Term,
}

impl Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const TERM_PREC_BINDER: u8 = 0;
        const TERM_PREC_APP: u8 = 1;
        const TERM_PREC_ATOM: u8 = 2;

        fn fmt_term(term: &Term, f: &mut std::fmt::Formatter<'_>, prec: u8) -> std::fmt::Result {
            match term {
                Term::Var(inner) => write!(f, "#{}", inner.index),
                Term::Local(inner) => write!(f, "${}", inner.id),
                Term::Hole(inner) => write!(f, "?{}", inner.id),
                Term::App(inner) => {
                    let needs_paren = prec > TERM_PREC_APP;
                    if needs_paren {
                        write!(f, "(")?;
                    }
                    fmt_term(&inner.fun, f, TERM_PREC_APP)?;
                    write!(f, " ")?;
                    fmt_term(&inner.arg, f, TERM_PREC_ATOM)?;
                    if needs_paren {
                        write!(f, ")")?;
                    }
                    Ok(())
                }
                Term::Abs(inner) => {
                    let needs_paren = prec > TERM_PREC_BINDER;
                    if needs_paren {
                        write!(f, "(")?;
                    }
                    match &inner.binder_name {
                        Some(name) => write!(f, "λ{}:{}. ", name.as_str(), inner.binder_type)?,
                        None => write!(f, "λ_:{}. ", inner.binder_type)?,
                    }
                    fmt_term(&inner.body, f, TERM_PREC_BINDER)?;
                    if needs_paren {
                        write!(f, ")")?;
                    }
                    Ok(())
                }
                Term::Pi(inner) => {
                    let needs_paren = prec > TERM_PREC_BINDER;
                    if needs_paren {
                        write!(f, "(")?;
                    }
                    match &inner.binder_name {
                        Some(name) => write!(f, "Π{}:{}. ", name.as_str(), inner.binder_type)?,
                        None => write!(f, "Π_:{}. ", inner.binder_type)?,
                    }
                    fmt_term(&inner.body, f, TERM_PREC_BINDER)?;
                    if needs_paren {
                        write!(f, ")")?;
                    }
                    Ok(())
                }
                Term::Let(inner) => {
                    let needs_paren = prec > TERM_PREC_BINDER;
                    if needs_paren {
                        write!(f, "(")?;
                    }
                    match &inner.binder_name {
                        Some(name) => write!(
                            f,
                            "let {}:{} := {} in ",
                            name.as_str(),
                            inner.binder_type,
                            inner.value
                        )?,
                        None => write!(f, "let _:{} := {} in ", inner.binder_type, inner.value)?,
                    }
                    fmt_term(&inner.body, f, TERM_PREC_BINDER)?;
                    if needs_paren {
                        write!(f, ")")?;
                    }
                    Ok(())
                }
                Term::Lit(inner) => write!(f, "{}", inner.value),
                Term::Sort(inner) => write!(f, "Sort {}", inner.level),
                Term::Const(inner) => {
                    write!(f, "{}", inner.name)?;
                    if !inner.levels.is_empty() {
                        write!(f, ".{{")?;
                        for (idx, level) in inner.levels.iter().enumerate() {
                            if idx > 0 {
                                write!(f, ", ")?;
                            }
                            write!(f, "{level}")?;
                        }
                        write!(f, "}}")?;
                    }
                    Ok(())
                }
                Term::Proj(inner) => {
                    fmt_term(&inner.arg, f, TERM_PREC_ATOM)?;
                    write!(f, ".{}", inner.field)
                }
                Term::Mdata(inner) => fmt_term(&inner.inner, f, prec),
            }
        }

        fmt_term(self, f, TERM_PREC_BINDER)
    }
}

pub fn mk_var(index: usize) -> Term {
    let metadata = TermMetadata {
        bound: index + 1,
        has_local: false,
        has_hole: false,
    };
    Term::Var(Arc::new(TermVar { metadata, index }))
}

pub fn mk_local(id: Id) -> Term {
    let metadata = TermMetadata {
        bound: 0,
        has_local: true,
        has_hole: false,
    };
    Term::Local(Arc::new(TermLocal { metadata, id }))
}

pub fn mk_hole(id: Id) -> Term {
    let metadata = TermMetadata {
        bound: 0,
        has_local: false,
        has_hole: true,
    };
    Term::Hole(Arc::new(TermHole { metadata, id }))
}

pub fn mk_app(fun: Term, arg: Term) -> Term {
    let lhs = fun.metadata();
    let rhs = arg.metadata();
    let metadata = TermMetadata {
        bound: lhs.bound.max(rhs.bound),
        has_local: lhs.has_local || rhs.has_local,
        has_hole: lhs.has_hole || rhs.has_hole,
    };
    Term::App(Arc::new(TermApp { metadata, fun, arg }))
}

pub fn mk_abs(binder_name: Option<Name>, binder_type: Term, body: Term) -> Term {
    mk_abs_kinded(binder_name, BinderKind::Explicit, binder_type, body)
}

pub fn mk_abs_kinded(
    binder_name: Option<Name>,
    binder_kind: BinderKind,
    binder_type: Term,
    body: Term,
) -> Term {
    let ty_meta = binder_type.metadata();
    let body_meta = body.metadata();
    let metadata = TermMetadata {
        bound: ty_meta.bound.max(body_meta.bound.saturating_sub(1)),
        has_local: ty_meta.has_local || body_meta.has_local,
        has_hole: ty_meta.has_hole || body_meta.has_hole,
    };
    Term::Abs(Arc::new(TermAbs {
        metadata,
        binder_name,
        binder_kind,
        binder_type,
        body,
    }))
}

pub fn mk_pi(binder_name: Option<Name>, binder_type: Term, body: Term) -> Term {
    mk_pi_kinded(binder_name, BinderKind::Explicit, binder_type, body)
}

pub fn mk_pi_kinded(
    binder_name: Option<Name>,
    binder_kind: BinderKind,
    binder_type: Term,
    body: Term,
) -> Term {
    let ty_meta = binder_type.metadata();
    let body_meta = body.metadata();
    let metadata = TermMetadata {
        bound: ty_meta.bound.max(body_meta.bound.saturating_sub(1)),
        has_local: ty_meta.has_local || body_meta.has_local,
        has_hole: ty_meta.has_hole || body_meta.has_hole,
    };
    Term::Pi(Arc::new(TermPi {
        metadata,
        binder_name,
        binder_kind,
        binder_type,
        body,
    }))
}

pub fn mk_let(binder_name: Option<Name>, binder_type: Term, value: Term, body: Term) -> Term {
    let ty_meta = binder_type.metadata();
    let value_meta = value.metadata();
    let body_meta = body.metadata();
    let metadata = TermMetadata {
        bound: ty_meta
            .bound
            .max(value_meta.bound)
            .max(body_meta.bound.saturating_sub(1)),
        has_local: ty_meta.has_local || value_meta.has_local || body_meta.has_local,
        has_hole: ty_meta.has_hole || value_meta.has_hole || body_meta.has_hole,
    };
    Term::Let(Arc::new(TermLet {
        metadata,
        binder_name,
        binder_type,
        value,
        body,
    }))
}

pub fn mk_lit(value: u64) -> Term {
    Term::Lit(Arc::new(TermLit {
        metadata: TermMetadata::default(),
        value,
    }))
}

pub fn mk_sort(level: Level) -> Term {
    Term::Sort(Arc::new(TermSort {
        metadata: TermMetadata::default(),
        level,
    }))
}

pub fn mk_prop() -> Term {
    mk_sort(mk_level_zero())
}

pub fn mk_const(name: Name, levels: Vec<Level>) -> Term {
    Term::Const(Arc::new(TermConst {
        metadata: TermMetadata::default(),
        name,
        levels,
    }))
}

pub fn mk_proj(struct_name: Name, field: usize, arg: Term) -> Term {
    let metadata = arg.metadata().clone();
    Term::Proj(Arc::new(TermProj {
        metadata,
        struct_name,
        field,
        arg,
    }))
}

pub fn mk_mdata(annot: Name, inner: Term) -> Term {
    let metadata = inner.metadata().clone();
    Term::Mdata(Arc::new(TermMdata {
        metadata,
        annot,
        inner,
    }))
}

impl Term {
    #[inline]
    pub fn metadata(&self) -> &TermMetadata {
        match self {
            Term::Var(inner) => &inner.metadata,
            Term::Local(inner) => &inner.metadata,
            Term::Hole(inner) => &inner.metadata,
            Term::App(inner) => &inner.metadata,
            Term::Abs(inner) => &inner.metadata,
            Term::Pi(inner) => &inner.metadata,
            Term::Let(inner) => &inner.metadata,
            Term::Lit(inner) => &inner.metadata,
            Term::Sort(inner) => &inner.metadata,
            Term::Const(inner) => &inner.metadata,
            Term::Proj(inner) => &inner.metadata,
            Term::Mdata(inner) => &inner.metadata,
        }
    }

    pub fn ptr_eq(&self, other: &Term) -> bool {
        match (self, other) {
            (Term::Var(a), Term::Var(b)) => Arc::ptr_eq(a, b),
            (Term::Local(a), Term::Local(b)) => Arc::ptr_eq(a, b),
            (Term::Hole(a), Term::Hole(b)) => Arc::ptr_eq(a, b),
            (Term::App(a), Term::App(b)) => Arc::ptr_eq(a, b),
            (Term::Abs(a), Term::Abs(b)) => Arc::ptr_eq(a, b),
            (Term::Pi(a), Term::Pi(b)) => Arc::ptr_eq(a, b),
            (Term::Let(a), Term::Let(b)) => Arc::ptr_eq(a, b),
            (Term::Lit(a), Term::Lit(b)) => Arc::ptr_eq(a, b),
            (Term::Sort(a), Term::Sort(b)) => Arc::ptr_eq(a, b),
            (Term::Const(a), Term::Const(b)) => Arc::ptr_eq(a, b),
            (Term::Proj(a), Term::Proj(b)) => Arc::ptr_eq(a, b),
            (Term::Mdata(a), Term::Mdata(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Address of the shared inner node, used as a cheap cache key.
    pub fn addr(&self) -> usize {
        match self {
            Term::Var(inner) => Arc::as_ptr(inner) as usize,
            Term::Local(inner) => Arc::as_ptr(inner) as usize,
            Term::Hole(inner) => Arc::as_ptr(inner) as usize,
            Term::App(inner) => Arc::as_ptr(inner) as usize,
            Term::Abs(inner) => Arc::as_ptr(inner) as usize,
            Term::Pi(inner) => Arc::as_ptr(inner) as usize,
            Term::Let(inner) => Arc::as_ptr(inner) as usize,
            Term::Lit(inner) => Arc::as_ptr(inner) as usize,
            Term::Sort(inner) => Arc::as_ptr(inner) as usize,
            Term::Const(inner) => Arc::as_ptr(inner) as usize,
            Term::Proj(inner) => Arc::as_ptr(inner) as usize,
            Term::Mdata(inner) => Arc::as_ptr(inner) as usize,
        }
    }

    pub fn has_loose_vars(&self) -> bool {
        self.metadata().bound > 0
    }

    pub fn has_local(&self) -> bool {
        self.metadata().has_local
    }

    pub fn has_hole(&self) -> bool {
        self.metadata().has_hole
    }

    pub fn strip_mdata(&self) -> &Term {
        let mut term = self;
        while let Term::Mdata(inner) = term {
            term = &inner.inner;
        }
        term
    }

    /// self.open([x, y], k) == [x/k+1,y/k]self
    ///
    /// The substituted terms must be closed.
    pub fn open(&self, xs: &[Term], level: usize) -> Term {
        if self.metadata().bound <= level {
            return self.clone();
        }
        match self {
            Term::Var(inner) => {
                if inner.index >= level {
                    let i = inner.index - level;
                    if i < xs.len() {
                        return xs[xs.len() - i - 1].clone();
                    }
                }
                self.clone()
            }
            Term::Local(_) | Term::Hole(_) | Term::Lit(_) | Term::Sort(_) | Term::Const(_) => {
                self.clone()
            }
            Term::App(inner) => {
                let fun = inner.fun.open(xs, level);
                let arg = inner.arg.open(xs, level);
                if inner.fun.ptr_eq(&fun) && inner.arg.ptr_eq(&arg) {
                    self.clone()
                } else {
                    mk_app(fun, arg)
                }
            }
            Term::Abs(inner) => {
                let binder_type = inner.binder_type.open(xs, level);
                let body = inner.body.open(xs, level + 1);
                if inner.binder_type.ptr_eq(&binder_type) && inner.body.ptr_eq(&body) {
                    self.clone()
                } else {
                    mk_abs_kinded(
                        inner.binder_name.clone(),
                        inner.binder_kind,
                        binder_type,
                        body,
                    )
                }
            }
            Term::Pi(inner) => {
                let binder_type = inner.binder_type.open(xs, level);
                let body = inner.body.open(xs, level + 1);
                if inner.binder_type.ptr_eq(&binder_type) && inner.body.ptr_eq(&body) {
                    self.clone()
                } else {
                    mk_pi_kinded(
                        inner.binder_name.clone(),
                        inner.binder_kind,
                        binder_type,
                        body,
                    )
                }
            }
            Term::Let(inner) => {
                let binder_type = inner.binder_type.open(xs, level);
                let value = inner.value.open(xs, level);
                let body = inner.body.open(xs, level + 1);
                if inner.binder_type.ptr_eq(&binder_type)
                    && inner.value.ptr_eq(&value)
                    && inner.body.ptr_eq(&body)
                {
                    self.clone()
                } else {
                    mk_let(inner.binder_name.clone(), binder_type, value, body)
                }
            }
            Term::Proj(inner) => {
                let arg = inner.arg.open(xs, level);
                if inner.arg.ptr_eq(&arg) {
                    self.clone()
                } else {
                    mk_proj(inner.struct_name.clone(), inner.field, arg)
                }
            }
            Term::Mdata(inner) => {
                let body = inner.inner.open(xs, level);
                if inner.inner.ptr_eq(&body) {
                    self.clone()
                } else {
                    mk_mdata(inner.annot.clone(), body)
                }
            }
        }
    }

    /// self.close([x, y], k) == [k+1/x, k/y]self
    pub fn close(&self, xs: &[Id], level: usize) -> Term {
        if !self.metadata().has_local {
            return self.clone();
        }
        match self {
            Term::Local(inner) => {
                let id = inner.id;
                for (i, &x) in xs.iter().rev().enumerate() {
                    if id == x {
                        return mk_var(level + i);
                    }
                }
                self.clone()
            }
            Term::Var(_) | Term::Hole(_) | Term::Lit(_) | Term::Sort(_) | Term::Const(_) => {
                self.clone()
            }
            Term::App(inner) => {
                let fun = inner.fun.close(xs, level);
                let arg = inner.arg.close(xs, level);
                if inner.fun.ptr_eq(&fun) && inner.arg.ptr_eq(&arg) {
                    self.clone()
                } else {
                    mk_app(fun, arg)
                }
            }
            Term::Abs(inner) => {
                let binder_type = inner.binder_type.close(xs, level);
                let body = inner.body.close(xs, level + 1);
                if inner.binder_type.ptr_eq(&binder_type) && inner.body.ptr_eq(&body) {
                    self.clone()
                } else {
                    mk_abs_kinded(
                        inner.binder_name.clone(),
                        inner.binder_kind,
                        binder_type,
                        body,
                    )
                }
            }
            Term::Pi(inner) => {
                let binder_type = inner.binder_type.close(xs, level);
                let body = inner.body.close(xs, level + 1);
                if inner.binder_type.ptr_eq(&binder_type) && inner.body.ptr_eq(&body) {
                    self.clone()
                } else {
                    mk_pi_kinded(
                        inner.binder_name.clone(),
                        inner.binder_kind,
                        binder_type,
                        body,
                    )
                }
            }
            Term::Let(inner) => {
                let binder_type = inner.binder_type.close(xs, level);
                let value = inner.value.close(xs, level);
                let body = inner.body.close(xs, level + 1);
                if inner.binder_type.ptr_eq(&binder_type)
                    && inner.value.ptr_eq(&value)
                    && inner.body.ptr_eq(&body)
                {
                    self.clone()
                } else {
                    mk_let(inner.binder_name.clone(), binder_type, value, body)
                }
            }
            Term::Proj(inner) => {
                let arg = inner.arg.close(xs, level);
                if inner.arg.ptr_eq(&arg) {
                    self.clone()
                } else {
                    mk_proj(inner.struct_name.clone(), inner.field, arg)
                }
            }
            Term::Mdata(inner) => {
                let body = inner.inner.close(xs, level);
                if inner.inner.ptr_eq(&body) {
                    self.clone()
                } else {
                    mk_mdata(inner.annot.clone(), body)
                }
            }
        }
    }

    pub fn replace_local(&self, f: &impl Fn(Id) -> Option<Term>) -> Term {
        if !self.metadata().has_local {
            return self.clone();
        }
        match self {
            Term::Local(inner) => f(inner.id).unwrap_or_else(|| self.clone()),
            Term::Var(_) | Term::Hole(_) | Term::Lit(_) | Term::Sort(_) | Term::Const(_) => {
                self.clone()
            }
            Term::App(inner) => {
                let fun = inner.fun.replace_local(f);
                let arg = inner.arg.replace_local(f);
                if inner.fun.ptr_eq(&fun) && inner.arg.ptr_eq(&arg) {
                    self.clone()
                } else {
                    mk_app(fun, arg)
                }
            }
            Term::Abs(inner) => {
                let binder_type = inner.binder_type.replace_local(f);
                let body = inner.body.replace_local(f);
                if inner.binder_type.ptr_eq(&binder_type) && inner.body.ptr_eq(&body) {
                    self.clone()
                } else {
                    mk_abs_kinded(
                        inner.binder_name.clone(),
                        inner.binder_kind,
                        binder_type,
                        body,
                    )
                }
            }
            Term::Pi(inner) => {
                let binder_type = inner.binder_type.replace_local(f);
                let body = inner.body.replace_local(f);
                if inner.binder_type.ptr_eq(&binder_type) && inner.body.ptr_eq(&body) {
                    self.clone()
                } else {
                    mk_pi_kinded(
                        inner.binder_name.clone(),
                        inner.binder_kind,
                        binder_type,
                        body,
                    )
                }
            }
            Term::Let(inner) => {
                let binder_type = inner.binder_type.replace_local(f);
                let value = inner.value.replace_local(f);
                let body = inner.body.replace_local(f);
                if inner.binder_type.ptr_eq(&binder_type)
                    && inner.value.ptr_eq(&value)
                    && inner.body.ptr_eq(&body)
                {
                    self.clone()
                } else {
                    mk_let(inner.binder_name.clone(), binder_type, value, body)
                }
            }
            Term::Proj(inner) => {
                let arg = inner.arg.replace_local(f);
                if inner.arg.ptr_eq(&arg) {
                    self.clone()
                } else {
                    mk_proj(inner.struct_name.clone(), inner.field, arg)
                }
            }
            Term::Mdata(inner) => {
                let body = inner.inner.replace_local(f);
                if inner.inner.ptr_eq(&body) {
                    self.clone()
                } else {
                    mk_mdata(inner.annot.clone(), body)
                }
            }
        }
    }

    /// Replacements are themselves rewritten, so chains of assignments resolve fully.
    pub fn replace_hole(&self, f: &impl Fn(Id) -> Option<Term>) -> Term {
        if !self.metadata().has_hole {
            return self.clone();
        }
        match self {
            Term::Hole(inner) => {
                if let Some(replacement) = f(inner.id) {
                    replacement.replace_hole(f)
                } else {
                    self.clone()
                }
            }
            Term::Var(_) | Term::Local(_) | Term::Lit(_) | Term::Sort(_) | Term::Const(_) => {
                self.clone()
            }
            Term::App(inner) => {
                let fun = inner.fun.replace_hole(f);
                let arg = inner.arg.replace_hole(f);
                if inner.fun.ptr_eq(&fun) && inner.arg.ptr_eq(&arg) {
                    self.clone()
                } else {
                    mk_app(fun, arg)
                }
            }
            Term::Abs(inner) => {
                let binder_type = inner.binder_type.replace_hole(f);
                let body = inner.body.replace_hole(f);
                if inner.binder_type.ptr_eq(&binder_type) && inner.body.ptr_eq(&body) {
                    self.clone()
                } else {
                    mk_abs_kinded(
                        inner.binder_name.clone(),
                        inner.binder_kind,
                        binder_type,
                        body,
                    )
                }
            }
            Term::Pi(inner) => {
                let binder_type = inner.binder_type.replace_hole(f);
                let body = inner.body.replace_hole(f);
                if inner.binder_type.ptr_eq(&binder_type) && inner.body.ptr_eq(&body) {
                    self.clone()
                } else {
                    mk_pi_kinded(
                        inner.binder_name.clone(),
                        inner.binder_kind,
                        binder_type,
                        body,
                    )
                }
            }
            Term::Let(inner) => {
                let binder_type = inner.binder_type.replace_hole(f);
                let value = inner.value.replace_hole(f);
                let body = inner.body.replace_hole(f);
                if inner.binder_type.ptr_eq(&binder_type)
                    && inner.value.ptr_eq(&value)
                    && inner.body.ptr_eq(&body)
                {
                    self.clone()
                } else {
                    mk_let(inner.binder_name.clone(), binder_type, value, body)
                }
            }
            Term::Proj(inner) => {
                let arg = inner.arg.replace_hole(f);
                if inner.arg.ptr_eq(&arg) {
                    self.clone()
                } else {
                    mk_proj(inner.struct_name.clone(), inner.field, arg)
                }
            }
            Term::Mdata(inner) => {
                let body = inner.inner.replace_hole(f);
                if inner.inner.ptr_eq(&body) {
                    self.clone()
                } else {
                    mk_mdata(inner.annot.clone(), body)
                }
            }
        }
    }

    /// Head of the application spine, looking through metadata wrappers.
    pub fn head(&self) -> &Term {
        let mut term = self;
        loop {
            match term {
                Term::App(inner) => term = &inner.fun,
                Term::Mdata(inner) => term = &inner.inner,
                _ => return term,
            }
        }
    }

    /// Arguments of the application spine, outermost last.
    pub fn args(&self) -> Vec<&Term> {
        let mut term = self;
        let mut args = vec![];
        loop {
            match term {
                Term::App(inner) => {
                    args.push(&inner.arg);
                    term = &inner.fun;
                }
                Term::Mdata(inner) => term = &inner.inner,
                _ => break,
            }
        }
        args.reverse();
        args
    }

    pub fn apply(&self, args: impl IntoIterator<Item = Term>) -> Term {
        let mut fun = self.clone();
        for arg in args {
            fun = mk_app(fun, arg);
        }
        fun
    }

    pub fn is_abs(&self) -> bool {
        matches!(self.strip_mdata(), Term::Abs(_))
    }

    pub fn is_pi(&self) -> bool {
        matches!(self.strip_mdata(), Term::Pi(_))
    }

    pub fn is_hole(&self) -> bool {
        matches!(self.strip_mdata(), Term::Hole(_))
    }

    pub fn is_app(&self) -> bool {
        matches!(self.strip_mdata(), Term::App(_))
    }

    pub fn is_sort_zero(&self) -> bool {
        match self.strip_mdata() {
            Term::Sort(inner) => inner.level.is_zero(),
            _ => false,
        }
    }

    pub fn contains_local(&self, id: Id) -> bool {
        if !self.metadata().has_local {
            return false;
        }
        match self {
            Term::Local(inner) => inner.id == id,
            Term::Var(_) | Term::Hole(_) | Term::Lit(_) | Term::Sort(_) | Term::Const(_) => false,
            Term::App(inner) => inner.fun.contains_local(id) || inner.arg.contains_local(id),
            Term::Abs(inner) => {
                inner.binder_type.contains_local(id) || inner.body.contains_local(id)
            }
            Term::Pi(inner) => inner.binder_type.contains_local(id) || inner.body.contains_local(id),
            Term::Let(inner) => {
                inner.binder_type.contains_local(id)
                    || inner.value.contains_local(id)
                    || inner.body.contains_local(id)
            }
            Term::Proj(inner) => inner.arg.contains_local(id),
            Term::Mdata(inner) => inner.inner.contains_local(id),
        }
    }

    pub fn contains_hole(&self, id: Id) -> bool {
        if !self.metadata().has_hole {
            return false;
        }
        match self {
            Term::Hole(inner) => inner.id == id,
            Term::Var(_) | Term::Local(_) | Term::Lit(_) | Term::Sort(_) | Term::Const(_) => false,
            Term::App(inner) => inner.fun.contains_hole(id) || inner.arg.contains_hole(id),
            Term::Abs(inner) => inner.binder_type.contains_hole(id) || inner.body.contains_hole(id),
            Term::Pi(inner) => inner.binder_type.contains_hole(id) || inner.body.contains_hole(id),
            Term::Let(inner) => {
                inner.binder_type.contains_hole(id)
                    || inner.value.contains_hole(id)
                    || inner.body.contains_hole(id)
            }
            Term::Proj(inner) => inner.arg.contains_hole(id),
            Term::Mdata(inner) => inner.inner.contains_hole(id),
        }
    }

    pub fn const_name(&self) -> Option<&Name> {
        match self.strip_mdata() {
            Term::Const(inner) => Some(&inner.name),
            _ => None,
        }
    }

    /// Substitutes level parameters throughout sorts and constants.
    pub fn subst_levels(&self, subst: &[(Name, Level)]) -> Term {
        if subst.is_empty() {
            return self.clone();
        }
        match self {
            Term::Var(_) | Term::Local(_) | Term::Hole(_) | Term::Lit(_) => self.clone(),
            Term::Sort(inner) => mk_sort(inner.level.subst(subst)),
            Term::Const(inner) => {
                let levels: Vec<Level> = inner.levels.iter().map(|l| l.subst(subst)).collect();
                if zip(&inner.levels, &levels).all(|(l, r)| l == r) {
                    self.clone()
                } else {
                    mk_const(inner.name.clone(), levels)
                }
            }
            Term::App(inner) => {
                let fun = inner.fun.subst_levels(subst);
                let arg = inner.arg.subst_levels(subst);
                if inner.fun.ptr_eq(&fun) && inner.arg.ptr_eq(&arg) {
                    self.clone()
                } else {
                    mk_app(fun, arg)
                }
            }
            Term::Abs(inner) => {
                let binder_type = inner.binder_type.subst_levels(subst);
                let body = inner.body.subst_levels(subst);
                if inner.binder_type.ptr_eq(&binder_type) && inner.body.ptr_eq(&body) {
                    self.clone()
                } else {
                    mk_abs_kinded(
                        inner.binder_name.clone(),
                        inner.binder_kind,
                        binder_type,
                        body,
                    )
                }
            }
            Term::Pi(inner) => {
                let binder_type = inner.binder_type.subst_levels(subst);
                let body = inner.body.subst_levels(subst);
                if inner.binder_type.ptr_eq(&binder_type) && inner.body.ptr_eq(&body) {
                    self.clone()
                } else {
                    mk_pi_kinded(
                        inner.binder_name.clone(),
                        inner.binder_kind,
                        binder_type,
                        body,
                    )
                }
            }
            Term::Let(inner) => {
                let binder_type = inner.binder_type.subst_levels(subst);
                let value = inner.value.subst_levels(subst);
                let body = inner.body.subst_levels(subst);
                if inner.binder_type.ptr_eq(&binder_type)
                    && inner.value.ptr_eq(&value)
                    && inner.body.ptr_eq(&body)
                {
                    self.clone()
                } else {
                    mk_let(inner.binder_name.clone(), binder_type, value, body)
                }
            }
            Term::Proj(inner) => {
                let arg = inner.arg.subst_levels(subst);
                if inner.arg.ptr_eq(&arg) {
                    self.clone()
                } else {
                    mk_proj(inner.struct_name.clone(), inner.field, arg)
                }
            }
            Term::Mdata(inner) => {
                let body = inner.inner.subst_levels(subst);
                if inner.inner.ptr_eq(&body) {
                    self.clone()
                } else {
                    mk_mdata(inner.annot.clone(), body)
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalDecl {
    pub id: Id,
    pub name: Option<Name>,
    pub ty: Term,
    /// Present iff the declaration is let-bound.
    pub value: Option<Term>,
    pub kind: BinderKind,
}

impl LocalDecl {
    pub fn new(id: Id, ty: Term) -> LocalDecl {
        LocalDecl {
            id,
            name: None,
            ty,
            value: None,
            kind: BinderKind::Explicit,
        }
    }

    pub fn with_value(mut self, value: Term) -> LocalDecl {
        self.value = Some(value);
        self
    }

    pub fn with_kind(mut self, kind: BinderKind) -> LocalDecl {
        self.kind = kind;
        self
    }

    pub fn is_let_bound(&self) -> bool {
        self.value.is_some()
    }
}

/// Ordered free-variable declarations. The sub-prefix partial order on
/// these contexts is the scoping backbone of the engine.
#[derive(Debug, Clone, Default)]
pub struct LocalContext {
    pub decls: Vec<LocalDecl>,
}

impl LocalContext {
    pub fn get(&self, id: Id) -> Option<&LocalDecl> {
        self.decls.iter().rev().find(|decl| decl.id == id)
    }

    pub fn contains(&self, id: Id) -> bool {
        self.get(id).is_some()
    }

    pub fn push(&mut self, decl: LocalDecl) {
        self.decls.push(decl);
    }

    pub fn pop(&mut self) -> Option<LocalDecl> {
        self.decls.pop()
    }

    /// `self ⊑ other` iff self's declarations appear, in order, within other's.
    pub fn is_sub_prefix_of(&self, other: &LocalContext) -> bool {
        let mut others = other.decls.iter();
        'outer: for decl in &self.decls {
            for candidate in others.by_ref() {
                if candidate.id == decl.id {
                    continue 'outer;
                }
            }
            return false;
        }
        true
    }

    pub fn restrict(&self, keep: impl Fn(&LocalDecl) -> bool) -> LocalContext {
        LocalContext {
            decls: self.decls.iter().filter(|d| keep(d)).cloned().collect(),
        }
    }
}
