//! Definitional equality for a dependently-typed term language with holes
//! (metavariables). [`DefEq`] decides `t =?= s` up to beta, eta, zeta, delta
//! and proof irrelevance, solving assignable holes along the way.
//!
//! Terms are locally nameless with `Arc`-shared subterms; see [`tt`] for the
//! data model, [`meta`] for the hole store, and [`env`] for constants and
//! reduction.

mod defeq;
mod env;
mod meta;
pub mod tt;

pub use defeq::{AssignError, Config, DefEq, Tri};
pub use env::{succ_offset, ConstInfo, Env, Transparency, UnfoldHint};
pub use meta::{HoleContext, HoleDecl, LocalInstance};
pub use tt::{
    is_def_eq_level, is_def_eq_levels, mk_abs, mk_abs_kinded, mk_app, mk_const, mk_hole,
    mk_let, mk_level_max, mk_level_param, mk_level_succ, mk_level_zero, mk_lit, mk_local,
    mk_mdata, mk_pi, mk_pi_kinded, mk_proj, mk_prop, mk_sort, mk_var, BinderKind, Id, Level,
    LocalContext, LocalDecl, Name, Term,
};
