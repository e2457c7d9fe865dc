use std::collections::{HashMap, HashSet};

use defeq::{
    mk_abs, mk_app, mk_const, mk_hole, mk_level_succ, mk_level_zero, mk_lit, mk_local, mk_pi,
    mk_sort, mk_var, Config, ConstInfo, DefEq, Env, HoleContext, Id, LocalContext, LocalDecl,
    Name, Term,
};

/// Owns the constant and class tables an [`Env`] borrows from.
#[derive(Default)]
struct World {
    consts: HashMap<Name, ConstInfo>,
    classes: HashSet<Name>,
}

impl World {
    fn define(mut self, name: &str, info: ConstInfo) -> World {
        self.consts.insert(Name::from_str(name), info);
        self
    }

    fn env(&self) -> Env<'_> {
        Env {
            const_table: &self.consts,
            class_table: &self.classes,
        }
    }
}

fn type1() -> Term {
    mk_sort(mk_level_succ(mk_level_zero()))
}

fn nat() -> Term {
    mk_const(Name::from_str("Nat"), vec![])
}

fn solve(world: &World, holes: &mut HoleContext, lctx: &LocalContext, t: &Term, s: &Term) -> bool {
    let mut checker = DefEq::new(world.env(), holes, lctx.clone(), Config::default());
    match checker.is_def_eq(t, s) {
        Ok(result) => result,
        Err(err) => panic!("equality check failed: {err:#}"),
    }
}

#[test]
fn pattern_solution_snapshot() {
    let world = World::default().define("Nat", ConstInfo::opaque(type1()));
    let mut holes = HoleContext::new();

    let a = Id::fresh();
    let mut lctx = LocalContext::default();
    lctx.push(LocalDecl::new(a, nat()));

    let m = holes.mk_hole(LocalContext::default(), mk_pi(None, nat(), nat()));
    let t = mk_app(mk_hole(m), mk_local(a));

    assert!(solve(&world, &mut holes, &lctx, &t, &mk_local(a)));
    insta::assert_snapshot!(holes.instantiate(&mk_hole(m)), @"λ_:Nat. #0");
}

#[test]
fn eta_expansion_solves_the_hole_pointwise() {
    let a = mk_const(Name::from_str("A"), vec![]);
    let b = mk_const(Name::from_str("B"), vec![]);
    let world = World::default()
        .define("A", ConstInfo::opaque(type1()))
        .define("B", ConstInfo::opaque(type1()))
        .define("f", ConstInfo::opaque(mk_pi(None, a.clone(), b)));
    let mut holes = HoleContext::new();
    let lctx = LocalContext::default();

    let m = holes.mk_hole(
        LocalContext::default(),
        mk_pi(None, a.clone(), mk_const(Name::from_str("B"), vec![])),
    );
    let f = mk_const(Name::from_str("f"), vec![]);
    let s = mk_abs(None, a, mk_app(mk_hole(m), mk_var(0)));

    assert!(solve(&world, &mut holes, &lctx, &f, &s));
    insta::assert_snapshot!(holes.instantiate(&mk_hole(m)), @"λ_:A. f #0");
}

#[test]
fn definitions_unfold_lazily() {
    let id_ty = mk_pi(None, type1(), mk_pi(None, mk_var(0), mk_var(1)));
    let id_val = mk_abs(None, type1(), mk_abs(None, mk_var(0), mk_var(0)));
    let unit = mk_const(Name::from_str("Unit"), vec![]);
    let world = World::default()
        .define("Unit", ConstInfo::opaque(type1()))
        .define("tt", ConstInfo::opaque(unit.clone()))
        .define("id", ConstInfo::definition(id_ty, id_val));
    let mut holes = HoleContext::new();
    let lctx = LocalContext::default();

    let tt = mk_const(Name::from_str("tt"), vec![]);
    let applied = mk_const(Name::from_str("id"), vec![]).apply([unit.clone(), tt.clone()]);
    assert!(solve(&world, &mut holes, &lctx, &applied, &tt));

    let nested = mk_const(Name::from_str("id"), vec![]).apply([unit, applied]);
    assert!(solve(&world, &mut holes, &lctx, &nested, &tt));
}

#[test]
fn successor_offsets_avoid_unfolding() {
    let world = World::default()
        .define("Nat", ConstInfo::opaque(type1()))
        .define("Nat.succ", ConstInfo::opaque(mk_pi(None, nat(), nat())));
    let mut holes = HoleContext::new();
    let lctx = LocalContext::default();

    let succ = mk_const(Name::from_str("Nat.succ"), vec![]);
    let t = mk_app(succ.clone(), mk_app(succ.clone(), mk_lit(40)));
    assert!(solve(&world, &mut holes, &lctx, &t, &mk_lit(42)));
    assert!(!solve(&world, &mut holes, &lctx, &t, &mk_lit(41)));

    // symmetric orientation
    assert!(solve(&world, &mut holes, &lctx, &mk_lit(42), &mk_app(succ, mk_lit(41))));
}

#[test]
fn hole_chains_resolve_through_each_other() {
    let world = World::default()
        .define("Nat", ConstInfo::opaque(type1()))
        .define("a", ConstInfo::opaque(nat()));
    let mut holes = HoleContext::new();
    let lctx = LocalContext::default();

    let m = holes.mk_hole(LocalContext::default(), nat());
    let n = holes.mk_hole(LocalContext::default(), nat());

    assert!(solve(&world, &mut holes, &lctx, &mk_hole(m), &mk_hole(n)));
    let a = mk_const(Name::from_str("a"), vec![]);
    assert!(solve(&world, &mut holes, &lctx, &mk_hole(n), &a));

    insta::assert_snapshot!(holes.instantiate(&mk_hole(m)), @"a");
    insta::assert_snapshot!(holes.instantiate(&mk_hole(n)), @"a");
}
